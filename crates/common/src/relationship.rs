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

use crate::{SchemaError, bool_xml, validate_description, validate_name, xml_bool};
use oks_var::Name;
use oks_xml::{XmlAttr, XmlInputStream, XmlOutputStream};
use std::io::{Read, Write};
use std::str::FromStr;
use strum::{Display, EnumString, IntoStaticStr};

pub(crate) const RELATIONSHIP_TAG: &str = "relationship";

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Display, EnumString, IntoStaticStr)]
pub enum LowCardinality {
    #[default]
    #[strum(serialize = "zero")]
    Zero,
    #[strum(serialize = "one")]
    One,
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Display, EnumString, IntoStaticStr)]
pub enum HighCardinality {
    #[default]
    #[strum(serialize = "one")]
    One,
    #[strum(serialize = "many")]
    Many,
}

/// A schema relationship: a typed reference member. `composite` makes the
/// referencing object a parent of the target (tracked by an RCR on the
/// target); `exclusive` allows at most one composite parent via this
/// relationship; `dependent` destroys the target with its last composite
/// parent.
#[derive(Debug, Clone)]
pub struct Relationship {
    name: Name,
    class_type: Name,
    low_cc: LowCardinality,
    high_cc: HighCardinality,
    composite: bool,
    exclusive: bool,
    dependent: bool,
    description: String,
    ordered: bool,
}

impl Relationship {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        class_type: &str,
        low_cc: LowCardinality,
        high_cc: HighCardinality,
        composite: bool,
        exclusive: bool,
        dependent: bool,
        description: &str,
        ordered: bool,
    ) -> Result<Relationship, SchemaError> {
        Ok(Relationship {
            name: validate_name(name, "relationship")?,
            class_type: validate_name(class_type, "relationship class-type")?,
            low_cc,
            high_cc,
            composite,
            exclusive,
            dependent,
            description: validate_description(description)?,
            ordered,
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn class_type(&self) -> &Name {
        &self.class_type
    }

    pub fn low_cc(&self) -> LowCardinality {
        self.low_cc
    }

    pub fn high_cc(&self) -> HighCardinality {
        self.high_cc
    }

    pub fn is_multi_value(&self) -> bool {
        self.high_cc == HighCardinality::Many
    }

    pub fn is_composite(&self) -> bool {
        self.composite
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_dependent(&self) -> bool {
        self.dependent
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub fn set_class_type(&mut self, class_type: &str) -> Result<(), SchemaError> {
        self.class_type = validate_name(class_type, "relationship class-type")?;
        Ok(())
    }

    pub fn set_description(&mut self, description: &str) -> Result<(), SchemaError> {
        self.description = validate_description(description)?;
        Ok(())
    }

    pub fn set_low_cc(&mut self, low_cc: LowCardinality) {
        self.low_cc = low_cc;
    }

    pub fn set_high_cc(&mut self, high_cc: HighCardinality) {
        self.high_cc = high_cc;
    }

    pub fn set_is_composite(&mut self, composite: bool) {
        self.composite = composite;
    }

    pub fn set_is_exclusive(&mut self, exclusive: bool) {
        self.exclusive = exclusive;
    }

    pub fn set_is_dependent(&mut self, dependent: bool) {
        self.dependent = dependent;
    }

    pub fn set_ordered(&mut self, ordered: bool) {
        self.ordered = ordered;
    }

    /// Parse `<relationship .../>`; the start tag is already consumed.
    pub fn read_xml<R: Read>(s: &mut XmlInputStream<R>) -> Result<Relationship, SchemaError> {
        let mut name = String::new();
        let mut class_type = String::new();
        let mut description = String::new();
        let mut low_cc = LowCardinality::Zero;
        let mut high_cc = HighCardinality::One;
        let mut composite = false;
        let mut exclusive = false;
        let mut dependent = false;
        let mut ordered = false;
        loop {
            match s.get_attribute()? {
                XmlAttr::Pair(n, v) => match n.as_str() {
                    "name" => name = v,
                    "description" => description = v,
                    "class-type" => class_type = v,
                    "low-cc" => {
                        low_cc = LowCardinality::from_str(&v)
                            .map_err(|_| s.parse_error(format!("bad low-cc '{v}'")))?
                    }
                    "high-cc" => {
                        high_cc = HighCardinality::from_str(&v)
                            .map_err(|_| s.parse_error(format!("bad high-cc '{v}'")))?
                    }
                    "is-composite" => composite = xml_bool(&v),
                    "is-exclusive" => exclusive = xml_bool(&v),
                    "is-dependent" => dependent = xml_bool(&v),
                    "ordered" => ordered = xml_bool(&v),
                    "multi-value-implementation" => {}
                    other => return Err(s.unexpected_attribute(other).into()),
                },
                XmlAttr::EndOfElement => break,
                XmlAttr::EndOfTag => {
                    return Err(s
                        .parse_error("relationship element cannot have children")
                        .into());
                }
            }
        }
        Relationship::new(
            &name,
            &class_type,
            low_cc,
            high_cc,
            composite,
            exclusive,
            dependent,
            &description,
            ordered,
        )
    }

    pub fn write_xml<W: Write>(&self, s: &mut XmlOutputStream<W>) -> std::io::Result<()> {
        s.put_raw("  ")?;
        s.put_start_tag(RELATIONSHIP_TAG)?;
        s.put_attribute("name", &self.name)?;
        if !self.description.is_empty() {
            s.put_attribute("description", &self.description)?;
        }
        s.put_attribute("class-type", &self.class_type)?;
        s.put_attribute("low-cc", self.low_cc.into())?;
        s.put_attribute("high-cc", self.high_cc.into())?;
        s.put_attribute("is-composite", bool_xml(self.composite))?;
        s.put_attribute("is-exclusive", bool_xml(self.exclusive))?;
        s.put_attribute("is-dependent", bool_xml(self.dependent))?;
        if self.ordered {
            s.put_attribute("ordered", bool_xml(self.ordered))?;
        }
        s.finish_empty()?;
        s.put_eol()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn xml_round_trip() {
        let r = Relationship::new(
            "kids",
            "Child",
            LowCardinality::Zero,
            HighCardinality::Many,
            true,
            false,
            true,
            "the children",
            false,
        )
        .unwrap();
        let mut buf = Vec::new();
        let mut w = XmlOutputStream::new(&mut buf);
        r.write_xml(&mut w).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut rd = XmlInputStream::new(text.as_bytes());
        assert_eq!(rd.get_tag_start().unwrap().unwrap(), RELATIONSHIP_TAG);
        let back = Relationship::read_xml(&mut rd).unwrap();
        assert_eq!(back.name().as_str(), "kids");
        assert_eq!(back.class_type().as_str(), "Child");
        assert_eq!(back.high_cc(), HighCardinality::Many);
        assert!(back.is_composite());
        assert!(!back.is_exclusive());
        assert!(back.is_dependent());
    }

    #[test]
    fn empty_class_type_is_rejected() {
        assert!(
            Relationship::new(
                "r",
                "",
                LowCardinality::Zero,
                HighCardinality::One,
                false,
                false,
                false,
                "",
                false
            )
            .is_err()
        );
    }
}
