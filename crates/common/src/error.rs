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

use oks_var::ValueError;
use oks_xml::XmlError;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("{0} name cannot be empty")]
    EmptyName(&'static str),

    #[error("{0} name is {1} bytes long, the limit is {max}", max = crate::MAX_NAME_LEN)]
    NameTooLong(&'static str, usize),

    #[error("description is {0} bytes long, the limit is {max}", max = crate::MAX_DESCRIPTION_LEN)]
    DescriptionTooLong(usize),

    #[error("class '{0}' is already defined")]
    DuplicateClass(String),

    #[error("class '{class}' already has a direct member named '{member}'")]
    DuplicateMember { class: String, member: String },

    #[error("class '{class}' has no member named '{member}'")]
    NoSuchMember { class: String, member: String },

    #[error("unknown data type '{0}'")]
    UnknownType(String),

    #[error("super-class '{superclass}' of class '{class}' is not defined")]
    MissingSuperClass { class: String, superclass: String },

    #[error("circular inheritance through class '{0}'")]
    CircularInheritance(String),

    #[error("class-type '{class_type}' of relationship '{relationship}' of class '{class}' is not defined")]
    UnresolvedClassType {
        class: String,
        relationship: String,
        class_type: String,
    },

    #[error("bad range '{range}': {reason}")]
    BadRange { range: String, reason: String },

    #[error("enumeration range cannot be empty")]
    EmptyEnumRange,

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Xml(#[from] XmlError),
}
