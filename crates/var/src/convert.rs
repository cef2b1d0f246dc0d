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

//! Scalar token parsing and type conversion.
//!
//! Numeric tokens follow `strtol(_, _, 0)` conventions: `0x` prefix is hex,
//! a leading `0` is octal, anything else decimal, and parsing takes the
//! longest valid prefix rather than insisting the whole token is numeric.

use crate::date::{parse_date, parse_time};
use crate::value::EnumValue;
use crate::{Name, OksDataType, Value, ValueError};

/// Signed integer prefix parse with C radix detection.
pub fn parse_int(s: &str) -> Option<i128> {
    let s = s.trim();
    let (neg, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let magnitude = parse_uint(s)?;
    let magnitude = i128::try_from(magnitude).ok()?;
    Some(if neg { -magnitude } else { magnitude })
}

/// Unsigned integer prefix parse with C radix detection.
pub fn parse_uint(s: &str) -> Option<u128> {
    let s = s.trim();
    let (radix, digits) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
    {
        (16, hex)
    } else if s.len() > 1 && s.starts_with('0') {
        (8, &s[1..])
    } else {
        (10, s)
    };
    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        // a bare "0" is consumed entirely by the octal prefix strip
        return if s == "0" { Some(0) } else { None };
    }
    u128::from_str_radix(&digits[..end], radix).ok()
}

/// Float prefix parse, `strtod`-style.
fn parse_float(s: &str) -> Option<f64> {
    let s = s.trim();
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end] as char;
        match c {
            '0'..='9' => seen_digit = true,
            '+' | '-' if end == 0 => {}
            '.' if !seen_dot && !seen_exp => seen_dot = true,
            'e' | 'E' if seen_digit && !seen_exp => {
                seen_exp = true;
                if let Some(&sign) = bytes.get(end + 1)
                    && (sign == b'+' || sign == b'-')
                {
                    end += 1;
                }
            }
            _ => break,
        }
        end += 1;
    }
    if !seen_digit {
        return None;
    }
    s[..end].parse().ok()
}

fn bad(token: &str, data_type: OksDataType, reason: &str) -> ValueError {
    ValueError::BadToken {
        token: token.to_string(),
        data_type: data_type.into(),
        reason: reason.to_string(),
    }
}

macro_rules! int_case {
    ($token:expr, $dtype:expr, $parse:ident, $target:ty, $variant:ident) => {{
        let n = $parse($token).ok_or_else(|| bad($token, $dtype, "not a number"))?;
        let n = <$target>::try_from(n).map_err(|_| bad($token, $dtype, "out of range"))?;
        Value::$variant(n)
    }};
}

impl Value {
    /// Parse one scalar token for the given schema type. Enumerator tokens
    /// are resolved against the owning attribute's table.
    pub fn parse_token(
        token: &str,
        data_type: OksDataType,
        enumerators: &[Name],
    ) -> Result<Value, ValueError> {
        Ok(match data_type {
            OksDataType::Bool => match token {
                "1" | "true" => Value::Bool(true),
                "0" | "false" => Value::Bool(false),
                _ => return Err(bad(token, data_type, "expected 0/1/true/false")),
            },
            OksDataType::S8 => int_case!(token, data_type, parse_int, i8, S8),
            OksDataType::U8 => int_case!(token, data_type, parse_uint, u8, U8),
            OksDataType::S16 => int_case!(token, data_type, parse_int, i16, S16),
            OksDataType::U16 => int_case!(token, data_type, parse_uint, u16, U16),
            OksDataType::S32 => int_case!(token, data_type, parse_int, i32, S32),
            OksDataType::U32 => int_case!(token, data_type, parse_uint, u32, U32),
            OksDataType::S64 => int_case!(token, data_type, parse_int, i64, S64),
            OksDataType::U64 => int_case!(token, data_type, parse_uint, u64, U64),
            OksDataType::Float => Value::Float(
                parse_float(token).ok_or_else(|| bad(token, data_type, "not a number"))? as f32,
            ),
            OksDataType::Double => Value::Double(
                parse_float(token).ok_or_else(|| bad(token, data_type, "not a number"))?,
            ),
            OksDataType::Date => Value::Date(parse_date(token)?),
            OksDataType::Time => Value::Time(parse_time(token)?),
            OksDataType::String => Value::String(token.to_string()),
            OksDataType::Enum => {
                let index = enumerators
                    .iter()
                    .position(|e| e.as_str() == token)
                    .ok_or_else(|| ValueError::BadEnumerator(token.to_string()))?;
                Value::Enum(EnumValue {
                    index,
                    token: enumerators[index].clone(),
                })
            }
            OksDataType::Class => Value::ClassRef(Name::from(token)),
        })
    }

    /// Convert to the shape an attribute requires: scalar type first, then
    /// cardinality. Cross-type conversion goes through the token text, the
    /// way the original engine converted via `strtol`/`strtod`; enumerators
    /// are re-resolved against the target attribute's table.
    pub fn coerce(
        self,
        data_type: OksDataType,
        multi: bool,
        enumerators: &[Name],
    ) -> Result<Value, ValueError> {
        match self {
            Value::Object(_) => Err(ValueError::CannotConvert {
                from: "object reference".to_string(),
                to: data_type.to_string(),
            }),
            Value::List(items) => {
                let converted = items
                    .into_iter()
                    .map(|v| v.coerce_scalar(data_type, enumerators))
                    .collect::<Result<Vec<_>, _>>()?;
                if multi {
                    Ok(Value::List(converted))
                } else {
                    // a singleton list narrows; anything longer cannot
                    let mut converted = converted;
                    match converted.len() {
                        0 => Value::zero(data_type, enumerators),
                        1 => Ok(converted.pop().unwrap()),
                        n => Err(ValueError::CannotNarrowList(n)),
                    }
                }
            }
            scalar => {
                let scalar = scalar.coerce_scalar(data_type, enumerators)?;
                if multi {
                    Ok(Value::List(vec![scalar]))
                } else {
                    Ok(scalar)
                }
            }
        }
    }

    fn coerce_scalar(
        self,
        data_type: OksDataType,
        enumerators: &[Name],
    ) -> Result<Value, ValueError> {
        match self.scalar_type() {
            // same type: enums still re-resolve, the enumerator table may differ
            Some(t) if t == data_type && data_type != OksDataType::Enum => Ok(self),
            Some(_) => Value::parse_token(&self.to_token(), data_type, enumerators),
            None => Err(ValueError::CannotConvert {
                from: "list".to_string(),
                to: data_type.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("42", Some(42); "decimal")]
    #[test_case("0x2a", Some(42); "hex")]
    #[test_case("052", Some(42); "octal")]
    #[test_case("0", Some(0); "zero")]
    #[test_case("-7", Some(-7); "negative")]
    #[test_case("12abc", Some(12); "longest prefix wins")]
    #[test_case("abc", None; "no digits")]
    fn int_tokens(s: &str, expect: Option<i128>) {
        assert_eq!(parse_int(s), expect);
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(Value::parse_token("300", OksDataType::U8, &[]).is_err());
        assert!(Value::parse_token("-1", OksDataType::U32, &[]).is_err());
        assert!(Value::parse_token("128", OksDataType::S8, &[]).is_err());
    }

    #[test]
    fn enum_tokens_resolve_against_the_table() {
        let enums: Vec<crate::Name> = vec!["red".into(), "green".into()];
        let v = Value::parse_token("green", OksDataType::Enum, &enums).unwrap();
        assert_eq!(v.to_token(), "green");
        assert!(Value::parse_token("blue", OksDataType::Enum, &enums).is_err());
    }

    #[test]
    fn scalar_cross_type_goes_through_text() {
        let v = Value::S32(17)
            .coerce(OksDataType::U16, false, &[])
            .unwrap();
        assert_eq!(v, Value::U16(17));

        let v = Value::String("0x10".into())
            .coerce(OksDataType::U32, false, &[])
            .unwrap();
        assert_eq!(v, Value::U32(16));

        // floats truncate through the text form
        let v = Value::Double(1.0).coerce(OksDataType::U8, false, &[]).unwrap();
        assert_eq!(v, Value::U8(1));
    }

    #[test]
    fn cardinality_widens_and_narrows() {
        let v = Value::U32(5).coerce(OksDataType::U32, true, &[]).unwrap();
        assert_eq!(v, Value::List(vec![Value::U32(5)]));

        let v = Value::List(vec![Value::U32(5)])
            .coerce(OksDataType::U32, false, &[])
            .unwrap();
        assert_eq!(v, Value::U32(5));

        let err = Value::List(vec![Value::U32(1), Value::U32(2)])
            .coerce(OksDataType::U32, false, &[]);
        assert!(err.is_err());
    }

    #[test]
    fn empty_list_narrows_to_zero() {
        let v = Value::List(vec![])
            .coerce(OksDataType::U32, false, &[])
            .unwrap();
        assert_eq!(v, Value::U32(0));
    }
}
