// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// The attribute data types of the schema, spelled the way they appear in the
/// `type="..."` XML attribute. `uid` is a historical alias for `string`,
/// accepted on read and never written back.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
pub enum OksDataType {
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "s8")]
    S8,
    #[strum(serialize = "u8")]
    U8,
    #[strum(serialize = "s16")]
    S16,
    #[strum(serialize = "u16")]
    U16,
    #[strum(serialize = "s32")]
    S32,
    #[strum(serialize = "u32")]
    U32,
    #[strum(serialize = "s64")]
    S64,
    #[strum(serialize = "u64")]
    U64,
    #[strum(serialize = "float")]
    Float,
    #[strum(serialize = "double")]
    Double,
    #[strum(serialize = "date")]
    Date,
    #[strum(serialize = "time")]
    Time,
    #[strum(serialize = "uid", to_string = "string")]
    String,
    #[strum(serialize = "enum")]
    Enum,
    #[strum(serialize = "class")]
    Class,
}

impl OksDataType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            OksDataType::S8
                | OksDataType::U8
                | OksDataType::S16
                | OksDataType::U16
                | OksDataType::S32
                | OksDataType::U32
                | OksDataType::S64
                | OksDataType::U64
        )
    }

    pub fn is_number(&self) -> bool {
        self.is_integer() || matches!(self, OksDataType::Float | OksDataType::Double)
    }
}

/// Print base for integer attributes, from the schema `format="..."` XML
/// attribute.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Display, EnumString, IntoStaticStr)]
pub enum IntFormat {
    #[default]
    #[strum(serialize = "dec")]
    Dec,
    #[strum(serialize = "oct")]
    Oct,
    #[strum(serialize = "hex")]
    Hex,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn type_names_round_trip() {
        for (name, t) in [
            ("bool", OksDataType::Bool),
            ("u32", OksDataType::U32),
            ("double", OksDataType::Double),
            ("string", OksDataType::String),
            ("enum", OksDataType::Enum),
            ("class", OksDataType::Class),
        ] {
            assert_eq!(OksDataType::from_str(name).unwrap(), t);
            assert_eq!(t.to_string(), name);
        }
    }

    #[test]
    fn uid_is_a_string_alias() {
        assert_eq!(OksDataType::from_str("uid").unwrap(), OksDataType::String);
        assert_eq!(OksDataType::String.to_string(), "string");
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(OksDataType::from_str("u128").is_err());
    }
}
