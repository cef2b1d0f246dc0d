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

use crate::range::Range;
use crate::{SchemaError, bool_xml, validate_description, validate_name, xml_bool};
use oks_var::{IntFormat, Name, OksDataType, Value, ValueError};
use oks_xml::{XmlAttr, XmlInputStream, XmlOutputStream};
use std::io::{Read, Write};
use std::str::FromStr;
use tracing::warn;

pub(crate) const ATTRIBUTE_TAG: &str = "attribute";

/// A schema attribute: one typed, optionally multi-valued, optionally
/// range-constrained data member of a class.
#[derive(Debug, Clone)]
pub struct Attribute {
    name: Name,
    data_type: OksDataType,
    multi: bool,
    not_null: bool,
    init_text: String,
    format: IntFormat,
    description: String,
    ordered: bool,
    range: Range,
    enumerators: Vec<Name>,
    // both computed once per schema edit, copied into every new object
    cached_init: Value,
    cached_empty: Value,
}

impl Attribute {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        data_type: OksDataType,
        multi: bool,
        init_text: &str,
        description: &str,
        not_null: bool,
        format: IntFormat,
        range_text: &str,
        ordered: bool,
        skip_string_range: bool,
    ) -> Result<Attribute, SchemaError> {
        let mut a = Attribute {
            name: validate_name(name, "attribute")?,
            data_type,
            multi,
            not_null,
            init_text: init_text.to_string(),
            format,
            description: validate_description(description)?,
            ordered,
            range: Range::default(),
            enumerators: Vec::new(),
            cached_init: Value::Bool(false),
            cached_empty: Value::Bool(false),
        };
        a.recompile(range_text, skip_string_range)?;
        Ok(a)
    }

    /// Recompile enumerators, range and the cached initial values after any
    /// mutation of type, range or init-value.
    fn recompile(&mut self, range_text: &str, skip_string_range: bool) -> Result<(), SchemaError> {
        if self.data_type == OksDataType::Enum {
            // the range of an enumeration is its enumerator list
            self.enumerators = range_text
                .split(',')
                .filter(|t| !t.is_empty())
                .map(Name::from)
                .collect();
            if self.enumerators.is_empty() {
                return Err(SchemaError::EmptyEnumRange);
            }
        } else {
            self.enumerators.clear();
        }
        self.range = if self.data_type == OksDataType::String && skip_string_range {
            Range::uncompiled(range_text)
        } else {
            Range::compile(range_text, self.data_type, &self.enumerators)?
        };
        self.cached_empty = if self.multi {
            Value::List(vec![])
        } else {
            Value::zero(self.data_type, &self.enumerators)?
        };
        self.cached_init = self.compute_init()?;
        Ok(())
    }

    fn compute_init(&self) -> Result<Value, ValueError> {
        if self.init_text.is_empty() {
            return Ok(self.cached_empty.clone());
        }
        if self.multi {
            let items = self
                .init_text
                .split(',')
                .filter(|t| !t.is_empty())
                .map(|t| Value::parse_token(t, self.data_type, &self.enumerators))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::List(items))
        } else {
            Value::parse_token(&self.init_text, self.data_type, &self.enumerators)
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn data_type(&self) -> OksDataType {
        self.data_type
    }

    pub fn is_multi_value(&self) -> bool {
        self.multi
    }

    pub fn is_not_null(&self) -> bool {
        self.not_null
    }

    pub fn init_text(&self) -> &str {
        &self.init_text
    }

    pub fn format(&self) -> IntFormat {
        self.format
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub fn range_text(&self) -> &str {
        self.range.text()
    }

    pub fn enumerators(&self) -> &[Name] {
        &self.enumerators
    }

    /// The precomputed initial value copied into every new object.
    pub fn init_value(&self) -> &Value {
        &self.cached_init
    }

    /// The empty value a cleared slot falls back to.
    pub fn empty_value(&self) -> &Value {
        &self.cached_empty
    }

    pub fn set_description(&mut self, description: &str) -> Result<(), SchemaError> {
        self.description = validate_description(description)?;
        Ok(())
    }

    pub fn set_type(
        &mut self,
        data_type: OksDataType,
        skip_string_range: bool,
    ) -> Result<(), SchemaError> {
        let range_text = self.range.text().to_string();
        let old = self.data_type;
        self.data_type = data_type;
        if let Err(e) = self.recompile(&range_text, skip_string_range) {
            self.data_type = old;
            let _ = self.recompile(&range_text, skip_string_range);
            return Err(e);
        }
        Ok(())
    }

    pub fn set_range(&mut self, range_text: &str, skip_string_range: bool) -> Result<(), SchemaError> {
        self.recompile(range_text, skip_string_range)
    }

    pub fn set_init_value(&mut self, init_text: &str) -> Result<(), SchemaError> {
        let old = std::mem::replace(&mut self.init_text, init_text.to_string());
        match self.compute_init() {
            Ok(v) => {
                self.cached_init = v;
                Ok(())
            }
            Err(e) => {
                self.init_text = old;
                Err(e.into())
            }
        }
    }

    pub fn set_is_multi_value(&mut self, multi: bool, skip_string_range: bool) -> Result<(), SchemaError> {
        self.multi = multi;
        let range_text = self.range.text().to_string();
        self.recompile(&range_text, skip_string_range)
    }

    pub fn set_is_not_null(&mut self, not_null: bool) {
        self.not_null = not_null;
    }

    pub fn set_format(&mut self, format: IntFormat) {
        self.format = format;
    }

    pub fn set_ordered(&mut self, ordered: bool) {
        self.ordered = ordered;
    }

    /// Range check with the attribute's diagnostics.
    pub fn check_range(&self, value: &Value) -> Result<(), ValueError> {
        if self.range.validate(value) {
            Ok(())
        } else {
            Err(ValueError::RangeViolation {
                value: value.to_string(),
                range: self.range.text().to_string(),
            })
        }
    }

    /// Convert an arbitrary value to this attribute's type and cardinality.
    pub fn convert(&self, value: Value) -> Result<Value, ValueError> {
        value.coerce(self.data_type, self.multi, &self.enumerators)
    }

    /// The save-file text of one scalar, honoring the integer print format.
    pub fn format_token(&self, value: &Value) -> String {
        match (self.format, value) {
            (IntFormat::Hex, v) if unsigned_of(v).is_some() => {
                format!("0x{:x}", unsigned_of(v).unwrap())
            }
            (IntFormat::Oct, v) if unsigned_of(v).is_some() => {
                format!("0{:o}", unsigned_of(v).unwrap())
            }
            _ => value.to_token(),
        }
    }

    /// The init-value text as it is saved. Date and time initial values
    /// are rewritten in ISO basic form whatever form they were read in.
    fn normalized_init_text(&self) -> String {
        if self.init_text.is_empty()
            || !matches!(self.data_type, OksDataType::Date | OksDataType::Time)
        {
            return self.init_text.clone();
        }
        match &self.cached_init {
            Value::List(items) => items
                .iter()
                .map(Value::to_token)
                .collect::<Vec<_>>()
                .join(","),
            v => v.to_token(),
        }
    }

    /// Parse `<attribute .../>`; the start tag is already consumed.
    pub fn read_xml<R: Read>(
        s: &mut XmlInputStream<R>,
        skip_string_range: bool,
    ) -> Result<Attribute, SchemaError> {
        let mut name = String::new();
        let mut data_type = None;
        let mut multi = false;
        let mut not_null = false;
        let mut init_text = String::new();
        let mut format = IntFormat::default();
        let mut description = String::new();
        let mut ordered = false;
        let mut range_text = String::new();
        loop {
            match s.get_attribute()? {
                XmlAttr::Pair(n, v) => match n.as_str() {
                    "name" => name = v,
                    "description" => description = v,
                    "type" => {
                        data_type = Some(
                            OksDataType::from_str(&v).map_err(|_| SchemaError::UnknownType(v))?,
                        )
                    }
                    "range" => range_text = v,
                    "format" => {
                        format = IntFormat::from_str(&v).unwrap_or_else(|_| {
                            warn!("bad format '{v}' of attribute '{name}', using dec");
                            IntFormat::Dec
                        })
                    }
                    "is-multi-value" => multi = xml_bool(&v),
                    "init-value" => init_text = v,
                    "is-not-null" => not_null = xml_bool(&v),
                    "ordered" => ordered = xml_bool(&v),
                    // historic hint, carried by old files
                    "multi-value-implementation" => {}
                    other => return Err(s.unexpected_attribute(other).into()),
                },
                XmlAttr::EndOfElement => break,
                XmlAttr::EndOfTag => {
                    return Err(s
                        .parse_error("attribute element cannot have children")
                        .into());
                }
            }
        }
        let data_type =
            data_type.ok_or_else(|| SchemaError::UnknownType("<missing>".to_string()))?;
        Attribute::new(
            &name,
            data_type,
            multi,
            &init_text,
            &description,
            not_null,
            format,
            &range_text,
            ordered,
            skip_string_range,
        )
    }

    pub fn write_xml<W: Write>(&self, s: &mut XmlOutputStream<W>) -> std::io::Result<()> {
        s.put_raw("  ")?;
        s.put_start_tag(ATTRIBUTE_TAG)?;
        s.put_attribute("name", &self.name)?;
        if !self.description.is_empty() {
            s.put_attribute("description", &self.description)?;
        }
        s.put_attribute("type", self.data_type.into())?;
        if !self.range.text().is_empty() {
            s.put_attribute("range", self.range.text())?;
        }
        if self.format != IntFormat::Dec {
            s.put_attribute("format", self.format.into())?;
        }
        s.put_attribute("is-multi-value", bool_xml(self.multi))?;
        let init = self.normalized_init_text();
        if !init.is_empty() {
            s.put_attribute("init-value", &init)?;
        }
        s.put_attribute("is-not-null", bool_xml(self.not_null))?;
        if self.ordered {
            s.put_attribute("ordered", bool_xml(self.ordered))?;
        }
        s.finish_empty()?;
        s.put_eol()
    }
}

fn unsigned_of(v: &Value) -> Option<u64> {
    match v {
        Value::U8(n) => Some(*n as u64),
        Value::U16(n) => Some(*n as u64),
        Value::U32(n) => Some(*n as u64),
        Value::U64(n) => Some(*n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn u32_attr(range: &str, init: &str) -> Attribute {
        Attribute::new(
            "x",
            OksDataType::U32,
            false,
            init,
            "",
            false,
            IntFormat::Dec,
            range,
            false,
            false,
        )
        .unwrap()
    }

    #[test]
    fn init_value_is_cached() {
        let a = u32_attr("1..10", "5");
        assert_eq!(a.init_value(), &Value::U32(5));
        assert_eq!(a.empty_value(), &Value::U32(0));
    }

    #[test]
    fn range_is_enforced() {
        let a = u32_attr("1..10", "5");
        assert!(a.check_range(&Value::U32(10)).is_ok());
        assert!(a.check_range(&Value::U32(11)).is_err());
    }

    #[test]
    fn enum_range_is_the_enumerator_table() {
        let a = Attribute::new(
            "state",
            OksDataType::Enum,
            false,
            "off",
            "",
            false,
            IntFormat::Dec,
            "on,off",
            false,
            false,
        )
        .unwrap();
        assert_eq!(a.enumerators().len(), 2);
        assert_eq!(a.init_value().to_token(), "off");
        assert!(
            Attribute::new(
                "state",
                OksDataType::Enum,
                false,
                "",
                "",
                false,
                IntFormat::Dec,
                "",
                false,
                false
            )
            .is_err()
        );
    }

    #[test]
    fn multi_value_init_is_a_list() {
        let a = Attribute::new(
            "xs",
            OksDataType::U32,
            true,
            "1,2,3",
            "",
            false,
            IntFormat::Dec,
            "",
            false,
            false,
        )
        .unwrap();
        assert_eq!(
            a.init_value(),
            &Value::List(vec![Value::U32(1), Value::U32(2), Value::U32(3)])
        );
        assert_eq!(a.empty_value(), &Value::List(vec![]));
    }

    #[test]
    fn print_formats() {
        let mut a = u32_attr("", "");
        a.set_format(IntFormat::Hex);
        assert_eq!(a.format_token(&Value::U32(255)), "0xff");
        a.set_format(IntFormat::Oct);
        assert_eq!(a.format_token(&Value::U32(8)), "010");
    }

    #[test]
    fn xml_round_trip() {
        let a = Attribute::new(
            "mask",
            OksDataType::U32,
            false,
            "0x10",
            "bit mask",
            true,
            IntFormat::Hex,
            "",
            false,
            false,
        )
        .unwrap();
        let mut buf = Vec::new();
        let mut w = XmlOutputStream::new(&mut buf);
        a.write_xml(&mut w).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut r = XmlInputStream::new(text.as_bytes());
        assert_eq!(r.get_tag_start().unwrap().unwrap(), ATTRIBUTE_TAG);
        let b = Attribute::read_xml(&mut r, false).unwrap();
        assert_eq!(b.name().as_str(), "mask");
        assert_eq!(b.data_type(), OksDataType::U32);
        assert_eq!(b.format(), IntFormat::Hex);
        assert!(b.is_not_null());
        assert_eq!(b.init_value(), &Value::U32(16));
    }

    #[test]
    fn failed_init_edit_rolls_back() {
        let mut a = u32_attr("", "5");
        assert!(a.set_init_value("not-a-number!").is_err());
        assert_eq!(a.init_text(), "5");
        assert_eq!(a.init_value(), &Value::U32(5));
    }
}
