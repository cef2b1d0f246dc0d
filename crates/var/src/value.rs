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

use crate::date::{format_date, format_time};
use crate::{Name, ObjIdx, ObjRef, OksDataType, ValueError};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// An enumerator value: the token plus its position in the owning
/// attribute's enumerator table. The index is a cache; identity is the
/// token.
#[derive(Debug, Clone, Eq)]
pub struct EnumValue {
    pub index: usize,
    pub token: Name,
}

impl PartialEq for EnumValue {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl PartialOrd for EnumValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EnumValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token.cmp(&other.token)
    }
}

/// A single attribute or relationship value. Lists are homogeneous by
/// contract; the schema member that owns the slot dictates the scalar type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    S8(i8),
    U8(u8),
    S16(i16),
    U16(u16),
    S32(i32),
    U32(u32),
    S64(i64),
    U64(u64),
    Float(f32),
    Double(f64),
    Date(NaiveDate),
    Time(NaiveDateTime),
    String(String),
    Enum(EnumValue),
    /// A class named by the value of a `class`-typed attribute; existence is
    /// checked against the schema at bind time.
    ClassRef(Name),
    List(Vec<Value>),
    Object(ObjRef),
}

impl Value {
    /// The schema data type of a scalar value. Lists and object references
    /// have no attribute type.
    pub fn scalar_type(&self) -> Option<OksDataType> {
        Some(match self {
            Value::Bool(_) => OksDataType::Bool,
            Value::S8(_) => OksDataType::S8,
            Value::U8(_) => OksDataType::U8,
            Value::S16(_) => OksDataType::S16,
            Value::U16(_) => OksDataType::U16,
            Value::S32(_) => OksDataType::S32,
            Value::U32(_) => OksDataType::U32,
            Value::S64(_) => OksDataType::S64,
            Value::U64(_) => OksDataType::U64,
            Value::Float(_) => OksDataType::Float,
            Value::Double(_) => OksDataType::Double,
            Value::Date(_) => OksDataType::Date,
            Value::Time(_) => OksDataType::Time,
            Value::String(_) => OksDataType::String,
            Value::Enum(_) => OksDataType::Enum,
            Value::ClassRef(_) => OksDataType::Class,
            Value::List(_) | Value::Object(_) => return None,
        })
    }

    /// The zero/empty value of a type: what a slot holds before any
    /// init-value is applied. Date and time default to "now", as the
    /// original library did.
    pub fn zero(data_type: OksDataType, enumerators: &[Name]) -> Result<Value, ValueError> {
        Ok(match data_type {
            OksDataType::Bool => Value::Bool(false),
            OksDataType::S8 => Value::S8(0),
            OksDataType::U8 => Value::U8(0),
            OksDataType::S16 => Value::S16(0),
            OksDataType::U16 => Value::U16(0),
            OksDataType::S32 => Value::S32(0),
            OksDataType::U32 => Value::U32(0),
            OksDataType::S64 => Value::S64(0),
            OksDataType::U64 => Value::U64(0),
            OksDataType::Float => Value::Float(0.0),
            OksDataType::Double => Value::Double(0.0),
            OksDataType::Date => Value::Date(Utc::now().date_naive()),
            OksDataType::Time => Value::Time(Utc::now().naive_utc()),
            OksDataType::String => Value::String(String::new()),
            OksDataType::Enum => {
                let first = enumerators.first().ok_or(ValueError::NoEnumerators)?;
                Value::Enum(EnumValue {
                    index: 0,
                    token: first.clone(),
                })
            }
            OksDataType::Class => Value::ClassRef(arcstr::literal!("")),
        })
    }

    /// True for the values a `is-not-null` attribute or a `low-cc=one`
    /// relationship may not hold.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::List(l) => l.is_empty(),
            Value::String(s) => s.is_empty(),
            Value::Object(r) => r.is_nil(),
            Value::ClassRef(c) => c.is_empty(),
            _ => false,
        }
    }

    /// The unquoted text form a scalar is saved in. Lists and object
    /// references are written structurally by the object writer, not as one
    /// token.
    pub fn to_token(&self) -> String {
        match self {
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::S8(v) => v.to_string(),
            Value::U8(v) => v.to_string(),
            Value::S16(v) => v.to_string(),
            Value::U16(v) => v.to_string(),
            Value::S32(v) => v.to_string(),
            Value::U32(v) => v.to_string(),
            Value::S64(v) => v.to_string(),
            Value::U64(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::Date(d) => format_date(d),
            Value::Time(t) => format_time(t),
            Value::String(s) => s.clone(),
            Value::Enum(e) => e.token.to_string(),
            Value::ClassRef(c) => c.to_string(),
            Value::List(_) => String::new(),
            Value::Object(_) => String::new(),
        }
    }

    /// Ordering between two values of the same shape. Object references
    /// compare by `(class, id)` identity resolved through `ident`, with the
    /// pointer-equal fast path for two live handles. Values of different
    /// shapes do not compare.
    pub fn cmp_semantic(
        &self,
        other: &Value,
        ident: &dyn Fn(ObjIdx) -> Option<(Name, Name)>,
    ) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::S8(a), Value::S8(b)) => Some(a.cmp(b)),
            (Value::U8(a), Value::U8(b)) => Some(a.cmp(b)),
            (Value::S16(a), Value::S16(b)) => Some(a.cmp(b)),
            (Value::U16(a), Value::U16(b)) => Some(a.cmp(b)),
            (Value::S32(a), Value::S32(b)) => Some(a.cmp(b)),
            (Value::U32(a), Value::U32(b)) => Some(a.cmp(b)),
            (Value::S64(a), Value::S64(b)) => Some(a.cmp(b)),
            (Value::U64(a), Value::U64(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Enum(a), Value::Enum(b)) => Some(a.cmp(b)),
            (Value::ClassRef(a), Value::ClassRef(b)) => Some(a.cmp(b)),
            (Value::Object(a), Value::Object(b)) => {
                if let (ObjRef::Resolved(x), ObjRef::Resolved(y)) = (a, b)
                    && x == y
                {
                    return Some(Ordering::Equal);
                }
                Some(a.identity(ident)?.cmp(&b.identity(ident)?))
            }
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.cmp_semantic(y, ident)? {
                        Ordering::Equal => continue,
                        ord => return Some(ord),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// Semantic equality; see [`Value::cmp_semantic`].
    pub fn eq_semantic(
        &self,
        other: &Value,
        ident: &dyn Fn(ObjIdx) -> Option<(Name, Name)>,
    ) -> bool {
        self.cmp_semantic(other, ident) == Some(Ordering::Equal)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Object(r) => write!(f, "{r}"),
            Value::List(l) => {
                write!(f, "(")?;
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
            other => write!(f, "{}", other.to_token()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn no_ident(_: ObjIdx) -> Option<(Name, Name)> {
        None
    }

    #[test]
    fn scalar_types() {
        assert_eq!(Value::U32(5).scalar_type(), Some(OksDataType::U32));
        assert_eq!(Value::List(vec![]).scalar_type(), None);
        assert_eq!(Value::Object(ObjRef::Nil).scalar_type(), None);
    }

    #[test]
    fn zero_values() {
        assert_eq!(
            Value::zero(OksDataType::U16, &[]).unwrap(),
            Value::U16(0)
        );
        assert_eq!(
            Value::zero(OksDataType::String, &[]).unwrap(),
            Value::String(String::new())
        );
        let e = Value::zero(OksDataType::Enum, &["on".into(), "off".into()]).unwrap();
        assert_eq!(e.to_token(), "on");
        assert!(Value::zero(OksDataType::Enum, &[]).is_err());
    }

    #[test]
    fn emptiness() {
        assert!(Value::List(vec![]).is_empty());
        assert!(Value::Object(ObjRef::Nil).is_empty());
        assert!(Value::String(String::new()).is_empty());
        assert!(!Value::U32(0).is_empty());
        assert!(!Value::List(vec![Value::U32(0)]).is_empty());
    }

    #[test]
    fn bool_token_form() {
        assert_eq!(Value::Bool(true).to_token(), "1");
        assert_eq!(Value::Bool(false).to_token(), "0");
    }

    #[test]
    fn enum_values_compare_by_token() {
        let a = Value::Enum(EnumValue {
            index: 0,
            token: "on".into(),
        });
        let b = Value::Enum(EnumValue {
            index: 5,
            token: "on".into(),
        });
        assert_eq!(a, b);
        assert!(a.eq_semantic(&b, &no_ident));
    }

    #[test]
    fn mixed_shapes_do_not_compare() {
        assert_eq!(
            Value::U32(1).cmp_semantic(&Value::S32(1), &no_ident),
            None
        );
    }

    #[test]
    fn reference_identity_comparison() {
        let a = Value::Object(ObjRef::Unresolved {
            class: "C".into(),
            id: "x".into(),
        });
        let b = Value::Object(ObjRef::Semi {
            class: "C".into(),
            id: "x".into(),
        });
        assert!(a.eq_semantic(&b, &no_ident));
    }

    #[test]
    fn list_ordering_is_lexicographic() {
        let a = Value::List(vec![Value::U32(1), Value::U32(2)]);
        let b = Value::List(vec![Value::U32(1), Value::U32(3)]);
        assert_eq!(a.cmp_semantic(&b, &no_ident), Some(Ordering::Less));
        let shorter = Value::List(vec![Value::U32(1)]);
        assert_eq!(shorter.cmp_semantic(&a, &no_ident), Some(Ordering::Less));
    }
}
