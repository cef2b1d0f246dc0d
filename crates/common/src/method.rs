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

use crate::{SchemaError, validate_description, validate_name};
use oks_var::Name;
use oks_xml::{XmlAttr, XmlInputStream, XmlOutputStream};
use std::io::{Read, Write};

pub(crate) const METHOD_TAG: &str = "method";
pub(crate) const METHOD_IMPL_TAG: &str = "method-implementation";

/// One per-language rendition of a method. Purely descriptive; the engine
/// never executes bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodImplementation {
    language: Name,
    prototype: String,
    body: String,
}

impl MethodImplementation {
    pub fn new(language: &str, prototype: &str, body: &str) -> Result<Self, SchemaError> {
        Ok(MethodImplementation {
            language: validate_name(language, "method-implementation language")?,
            prototype: prototype.to_string(),
            body: body.to_string(),
        })
    }

    pub fn language(&self) -> &Name {
        &self.language
    }

    pub fn prototype(&self) -> &str {
        &self.prototype
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_prototype(&mut self, prototype: &str) {
        self.prototype = prototype.to_string();
    }

    pub fn set_body(&mut self, body: &str) {
        self.body = body.to_string();
    }

    fn read_xml<R: Read>(s: &mut XmlInputStream<R>) -> Result<Self, SchemaError> {
        let mut language = String::new();
        let mut prototype = String::new();
        let mut body = String::new();
        loop {
            match s.get_attribute()? {
                XmlAttr::Pair(n, v) => match n.as_str() {
                    "language" => language = v,
                    "prototype" => prototype = v,
                    "body" => body = v,
                    other => return Err(s.unexpected_attribute(other).into()),
                },
                XmlAttr::EndOfElement => break,
                XmlAttr::EndOfTag => {
                    return Err(s
                        .parse_error("method-implementation element cannot have children")
                        .into());
                }
            }
        }
        MethodImplementation::new(&language, &prototype, &body)
    }

    fn write_xml<W: Write>(&self, s: &mut XmlOutputStream<W>) -> std::io::Result<()> {
        s.put_raw("   ")?;
        s.put_start_tag(METHOD_IMPL_TAG)?;
        s.put_attribute("language", &self.language)?;
        s.put_attribute("prototype", &self.prototype)?;
        s.put_attribute("body", &self.body)?;
        s.finish_empty()?;
        s.put_eol()
    }
}

/// A named, described method with its per-language implementations.
#[derive(Debug, Clone)]
pub struct Method {
    name: Name,
    description: String,
    implementations: Vec<MethodImplementation>,
}

impl Method {
    pub fn new(name: &str, description: &str) -> Result<Method, SchemaError> {
        Ok(Method {
            name: validate_name(name, "method")?,
            description: validate_description(description)?,
            implementations: Vec::new(),
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn implementations(&self) -> &[MethodImplementation] {
        &self.implementations
    }

    pub fn set_description(&mut self, description: &str) -> Result<(), SchemaError> {
        self.description = validate_description(description)?;
        Ok(())
    }

    pub fn find_implementation(&self, language: &str) -> Option<&MethodImplementation> {
        self.implementations
            .iter()
            .find(|i| i.language().as_str() == language)
    }

    pub fn add_implementation(
        &mut self,
        implementation: MethodImplementation,
    ) -> Result<(), SchemaError> {
        if self
            .find_implementation(implementation.language())
            .is_some()
        {
            return Err(SchemaError::DuplicateMember {
                class: self.name.to_string(),
                member: implementation.language().to_string(),
            });
        }
        self.implementations.push(implementation);
        Ok(())
    }

    pub fn remove_implementation(&mut self, language: &str) -> Result<(), SchemaError> {
        let at = self
            .implementations
            .iter()
            .position(|i| i.language().as_str() == language)
            .ok_or_else(|| SchemaError::NoSuchMember {
                class: self.name.to_string(),
                member: language.to_string(),
            })?;
        self.implementations.remove(at);
        Ok(())
    }

    /// Parse `<method ...>...</method>`; the start tag is already consumed.
    pub fn read_xml<R: Read>(s: &mut XmlInputStream<R>) -> Result<Method, SchemaError> {
        let mut name = String::new();
        let mut description = String::new();
        let mut open = false;
        loop {
            match s.get_attribute()? {
                XmlAttr::Pair(n, v) => match n.as_str() {
                    "name" => name = v,
                    "description" => description = v,
                    other => return Err(s.unexpected_attribute(other).into()),
                },
                XmlAttr::EndOfElement => break,
                XmlAttr::EndOfTag => {
                    open = true;
                    break;
                }
            }
        }
        let mut method = Method::new(&name, &description)?;
        if open {
            loop {
                let tag = s
                    .get_tag_start()?
                    .ok_or_else(|| s.parse_error("unterminated method element"))?;
                match tag.as_str() {
                    METHOD_IMPL_TAG => {
                        method.add_implementation(MethodImplementation::read_xml(s)?)?
                    }
                    "/method" => break,
                    other => return Err(s.unexpected_tag(other, METHOD_IMPL_TAG).into()),
                }
            }
        }
        Ok(method)
    }

    pub fn write_xml<W: Write>(&self, s: &mut XmlOutputStream<W>) -> std::io::Result<()> {
        s.put_raw("  ")?;
        s.put_start_tag(METHOD_TAG)?;
        s.put_attribute("name", &self.name)?;
        if !self.description.is_empty() {
            s.put_attribute("description", &self.description)?;
        }
        if self.implementations.is_empty() {
            s.finish_empty()?;
            return s.put_eol();
        }
        s.finish_tag()?;
        s.put_eol()?;
        for i in &self.implementations {
            i.write_xml(s)?;
        }
        s.put_raw("  ")?;
        s.put_last_tag(METHOD_TAG)?;
        s.put_eol()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn xml_round_trip() {
        let mut m = Method::new("reset", "bring the module to its power-on state").unwrap();
        m.add_implementation(
            MethodImplementation::new("c++", "void reset()", "hw->reset();").unwrap(),
        )
        .unwrap();

        let mut buf = Vec::new();
        let mut w = XmlOutputStream::new(&mut buf);
        m.write_xml(&mut w).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut r = XmlInputStream::new(text.as_bytes());
        assert_eq!(r.get_tag_start().unwrap().unwrap(), METHOD_TAG);
        let back = Method::read_xml(&mut r).unwrap();
        assert_eq!(back.name().as_str(), "reset");
        assert_eq!(back.implementations().len(), 1);
        assert_eq!(
            back.find_implementation("c++").unwrap().prototype(),
            "void reset()"
        );
    }

    #[test]
    fn duplicate_language_is_rejected() {
        let mut m = Method::new("m", "").unwrap();
        m.add_implementation(MethodImplementation::new("java", "void m()", "").unwrap())
            .unwrap();
        assert!(
            m.add_implementation(MethodImplementation::new("java", "void m()", "").unwrap())
                .is_err()
        );
    }
}
