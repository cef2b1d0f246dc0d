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

//! The OKS schema model: classes and their members, range constraints,
//! the materialized inheritance closures, and the schema-file XML grammar.

mod attribute;
mod class;
mod error;
mod method;
mod range;
mod relationship;

pub use attribute::Attribute;
pub use class::{
    Class, ClassMap, ClassMember, ChangeKind, MemberKind, SlotInfo, registrate_classes,
};
pub use error::SchemaError;
pub use method::{Method, MethodImplementation};
pub use range::Range;
pub use relationship::{HighCardinality, LowCardinality, Relationship};

use oks_var::Name;

/// Direct member names are unique within a class and bounded.
pub const MAX_NAME_LEN: usize = 128;
/// Descriptions are bounded too.
pub const MAX_DESCRIPTION_LEN: usize = 2000;

pub(crate) fn validate_name(name: &str, what: &'static str) -> Result<Name, SchemaError> {
    if name.is_empty() {
        return Err(SchemaError::EmptyName(what));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(SchemaError::NameTooLong(what, name.len()));
    }
    Ok(Name::from(name))
}

pub(crate) fn validate_description(description: &str) -> Result<String, SchemaError> {
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(SchemaError::DescriptionTooLong(description.len()));
    }
    Ok(description.to_string())
}

/// Schema files spell booleans `yes`/`no`; absence means `no`.
pub(crate) fn xml_bool(value: &str) -> bool {
    value == "yes" || value == "true"
}

pub(crate) fn bool_xml(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
