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

use crate::attribute::{ATTRIBUTE_TAG, Attribute};
use crate::method::{METHOD_TAG, Method};
use crate::relationship::{RELATIONSHIP_TAG, Relationship};
use crate::{SchemaError, bool_xml, validate_description, validate_name, xml_bool};
use indexmap::IndexMap;
use oks_var::Name;
use oks_xml::{XmlAttr, XmlInputStream, XmlOutputStream};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use strum::Display;

pub(crate) const CLASS_TAG: &str = "class";
const SUPERCLASS_TAG: &str = "superclass";

/// Everything loaded classes are kept in, ordered by insertion so saves are
/// stable.
pub type ClassMap = IndexMap<Name, Class>;

/// What changed, for schema-modified notifications and edit propagation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display)]
pub enum ChangeKind {
    #[strum(serialize = "super-classes list")]
    SuperClassesList,
    #[strum(serialize = "sub-classes list")]
    SubClassesList,
    #[strum(serialize = "class description")]
    Description,
    #[strum(serialize = "abstractness")]
    Abstractness,
    #[strum(serialize = "attributes list")]
    AttributesList,
    #[strum(serialize = "attribute type")]
    AttributeType,
    #[strum(serialize = "attribute range")]
    AttributeRange,
    #[strum(serialize = "attribute format")]
    AttributeFormat,
    #[strum(serialize = "attribute multi-value cardinality")]
    AttributeMultiValue,
    #[strum(serialize = "attribute initial value")]
    AttributeInitValue,
    #[strum(serialize = "attribute description")]
    AttributeDescription,
    #[strum(serialize = "attribute is-not-null flag")]
    AttributeNotNull,
    #[strum(serialize = "relationships list")]
    RelationshipsList,
    #[strum(serialize = "relationship class type")]
    RelationshipClassType,
    #[strum(serialize = "relationship description")]
    RelationshipDescription,
    #[strum(serialize = "relationship low cardinality")]
    RelationshipLowCc,
    #[strum(serialize = "relationship high cardinality")]
    RelationshipHighCc,
    #[strum(serialize = "relationship composite flag")]
    RelationshipComposite,
    #[strum(serialize = "relationship exclusive flag")]
    RelationshipExclusive,
    #[strum(serialize = "relationship dependent flag")]
    RelationshipDependent,
    #[strum(serialize = "methods list")]
    MethodsList,
    #[strum(serialize = "method description")]
    MethodDescription,
    #[strum(serialize = "method implementation")]
    MethodImplementation,
}

impl ChangeKind {
    /// Structural edits force a closure rebuild of the class and all its
    /// subclasses before anyone is notified.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ChangeKind::SuperClassesList
                | ChangeKind::AttributesList
                | ChangeKind::RelationshipsList
                | ChangeKind::MethodsList
        )
    }

    /// Edits after which live objects must be reshaped or converted.
    pub fn reshapes_instances(&self) -> bool {
        self.is_structural()
            || matches!(
                self,
                ChangeKind::AttributeType
                    | ChangeKind::AttributeMultiValue
                    | ChangeKind::RelationshipHighCc
            )
    }
}

/// A closure entry: the member plus the class that contributed it.
#[derive(Debug, Clone)]
pub struct ClassMember<T> {
    pub defined_in: Name,
    pub member: T,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemberKind {
    /// Index into `all_attributes`.
    Attribute(usize),
    /// Index into `all_relationships`.
    Relationship(usize),
}

/// One entry of the slot directory: where a member's value lives in every
/// object's `data` array, and which closure entry describes it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SlotInfo {
    pub slot: usize,
    pub kind: MemberKind,
}

/// A schema class: direct members plus the closures materialized by
/// [`registrate_classes`]. Slot indices handed out by `data_info` are
/// stable until the next closure rebuild.
#[derive(Debug, Clone)]
pub struct Class {
    name: Name,
    description: String,
    is_abstract: bool,
    file: PathBuf,

    super_class_names: Vec<Name>,
    attributes: Vec<Attribute>,
    relationships: Vec<Relationship>,
    methods: Vec<Method>,

    all_super: Vec<Name>,
    all_sub: Vec<Name>,
    all_attributes: Vec<ClassMember<Attribute>>,
    all_relationships: Vec<ClassMember<Relationship>>,
    all_methods: Vec<ClassMember<Method>>,
    data_info: HashMap<Name, SlotInfo>,
    instance_size: usize,
}

impl Class {
    pub fn new(
        name: &str,
        description: &str,
        is_abstract: bool,
        file: &Path,
    ) -> Result<Class, SchemaError> {
        Ok(Class {
            name: validate_name(name, "class")?,
            description: validate_description(description)?,
            is_abstract,
            file: file.to_path_buf(),
            super_class_names: Vec::new(),
            attributes: Vec::new(),
            relationships: Vec::new(),
            methods: Vec::new(),
            all_super: Vec::new(),
            all_sub: Vec::new(),
            all_attributes: Vec::new(),
            all_relationships: Vec::new(),
            all_methods: Vec::new(),
            data_info: HashMap::new(),
            instance_size: 0,
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn set_file(&mut self, file: &Path) {
        self.file = file.to_path_buf();
    }

    pub fn set_description(&mut self, description: &str) -> Result<(), SchemaError> {
        self.description = validate_description(description)?;
        Ok(())
    }

    pub fn set_is_abstract(&mut self, is_abstract: bool) {
        self.is_abstract = is_abstract;
    }

    pub fn direct_super_classes(&self) -> &[Name] {
        &self.super_class_names
    }

    pub fn direct_attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn direct_relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn direct_methods(&self) -> &[Method] {
        &self.methods
    }

    fn has_direct_member(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name().as_str() == name)
            || self.relationships.iter().any(|r| r.name().as_str() == name)
    }

    fn duplicate(&self, member: &str) -> SchemaError {
        SchemaError::DuplicateMember {
            class: self.name.to_string(),
            member: member.to_string(),
        }
    }

    fn no_such(&self, member: &str) -> SchemaError {
        SchemaError::NoSuchMember {
            class: self.name.to_string(),
            member: member.to_string(),
        }
    }

    pub fn add_super_class(&mut self, super_class: &str) -> Result<(), SchemaError> {
        let super_class = validate_name(super_class, "superclass")?;
        if self.super_class_names.contains(&super_class) {
            return Err(self.duplicate(&super_class));
        }
        self.super_class_names.push(super_class);
        Ok(())
    }

    pub fn remove_super_class(&mut self, super_class: &str) -> Result<(), SchemaError> {
        let at = self
            .super_class_names
            .iter()
            .position(|s| s.as_str() == super_class)
            .ok_or_else(|| self.no_such(super_class))?;
        self.super_class_names.remove(at);
        Ok(())
    }

    pub fn add_attribute(&mut self, attribute: Attribute) -> Result<(), SchemaError> {
        if self.has_direct_member(attribute.name()) {
            return Err(self.duplicate(attribute.name()));
        }
        self.attributes.push(attribute);
        Ok(())
    }

    pub fn remove_attribute(&mut self, name: &str) -> Result<Attribute, SchemaError> {
        let at = self
            .attributes
            .iter()
            .position(|a| a.name().as_str() == name)
            .ok_or_else(|| self.no_such(name))?;
        Ok(self.attributes.remove(at))
    }

    pub fn find_direct_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name().as_str() == name)
    }

    pub fn find_direct_attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes
            .iter_mut()
            .find(|a| a.name().as_str() == name)
    }

    pub fn add_relationship(&mut self, relationship: Relationship) -> Result<(), SchemaError> {
        if self.has_direct_member(relationship.name()) {
            return Err(self.duplicate(relationship.name()));
        }
        self.relationships.push(relationship);
        Ok(())
    }

    pub fn remove_relationship(&mut self, name: &str) -> Result<Relationship, SchemaError> {
        let at = self
            .relationships
            .iter()
            .position(|r| r.name().as_str() == name)
            .ok_or_else(|| self.no_such(name))?;
        Ok(self.relationships.remove(at))
    }

    pub fn find_direct_relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships
            .iter()
            .find(|r| r.name().as_str() == name)
    }

    pub fn find_direct_relationship_mut(&mut self, name: &str) -> Option<&mut Relationship> {
        self.relationships
            .iter_mut()
            .find(|r| r.name().as_str() == name)
    }

    pub fn add_method(&mut self, method: Method) -> Result<(), SchemaError> {
        if self.methods.iter().any(|m| m.name() == method.name()) {
            return Err(self.duplicate(method.name()));
        }
        self.methods.push(method);
        Ok(())
    }

    pub fn remove_method(&mut self, name: &str) -> Result<Method, SchemaError> {
        let at = self
            .methods
            .iter()
            .position(|m| m.name().as_str() == name)
            .ok_or_else(|| self.no_such(name))?;
        Ok(self.methods.remove(at))
    }

    pub fn find_direct_method_mut(&mut self, name: &str) -> Option<&mut Method> {
        self.methods.iter_mut().find(|m| m.name().as_str() == name)
    }

    // ---- closures, valid after the last registrate_classes() pass ----

    /// Transitive super-classes, base-first, deduplicated.
    pub fn all_super_classes(&self) -> &[Name] {
        &self.all_super
    }

    /// Transitive subclasses across the loaded class set.
    pub fn all_sub_classes(&self) -> &[Name] {
        &self.all_sub
    }

    pub fn all_attributes(&self) -> &[ClassMember<Attribute>] {
        &self.all_attributes
    }

    pub fn all_relationships(&self) -> &[ClassMember<Relationship>] {
        &self.all_relationships
    }

    pub fn all_methods(&self) -> &[ClassMember<Method>] {
        &self.all_methods
    }

    /// Slots an object of this class carries: attributes first, then
    /// relationships.
    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    pub fn slot_of(&self, member: &str) -> Option<&SlotInfo> {
        self.data_info.get(member)
    }

    /// The closure attribute occupying `slot`, if it is an attribute slot.
    pub fn attribute_at(&self, slot: usize) -> Option<&ClassMember<Attribute>> {
        self.all_attributes.get(slot)
    }

    /// The closure relationship occupying `slot`, counted over the whole
    /// data array.
    pub fn relationship_at(&self, slot: usize) -> Option<&ClassMember<Relationship>> {
        slot.checked_sub(self.all_attributes.len())
            .and_then(|i| self.all_relationships.get(i))
    }

    pub fn find_attribute(&self, name: &str) -> Option<&ClassMember<Attribute>> {
        match self.data_info.get(name)?.kind {
            MemberKind::Attribute(i) => self.all_attributes.get(i),
            MemberKind::Relationship(_) => None,
        }
    }

    pub fn find_relationship(&self, name: &str) -> Option<&ClassMember<Relationship>> {
        match self.data_info.get(name)?.kind {
            MemberKind::Relationship(i) => self.all_relationships.get(i),
            MemberKind::Attribute(_) => None,
        }
    }

    /// The classes an object id must be unique across when the
    /// duplicated-id-via-inheritance check is on: every super and every
    /// subclass of this class.
    pub fn inheritance_hierarchy(&self) -> impl Iterator<Item = &Name> {
        self.all_super.iter().chain(self.all_sub.iter())
    }

    /// True when `other` names this class or one of its super-classes;
    /// what relationship target compatibility means.
    pub fn is_or_derives_from(&self, other: &str) -> bool {
        self.name.as_str() == other || self.all_super.iter().any(|s| s.as_str() == other)
    }

    /// Parse `<class ...>...</class>`; the start tag is already consumed.
    pub fn read_xml<R: Read>(
        s: &mut XmlInputStream<R>,
        file: &Path,
        skip_string_range: bool,
    ) -> Result<Class, SchemaError> {
        let mut name = String::new();
        let mut description = String::new();
        let mut is_abstract = false;
        let mut open = false;
        loop {
            match s.get_attribute()? {
                XmlAttr::Pair(n, v) => match n.as_str() {
                    "name" => name = v,
                    "description" => description = v,
                    "is-abstract" => is_abstract = xml_bool(&v),
                    other => return Err(s.unexpected_attribute(other).into()),
                },
                XmlAttr::EndOfElement => break,
                XmlAttr::EndOfTag => {
                    open = true;
                    break;
                }
            }
        }
        let mut class = Class::new(&name, &description, is_abstract, file)?;
        if open {
            loop {
                let tag = s
                    .get_tag_start()?
                    .ok_or_else(|| s.parse_error("unterminated class element"))?;
                match tag.as_str() {
                    SUPERCLASS_TAG => {
                        let mut super_name = String::new();
                        loop {
                            match s.get_attribute()? {
                                XmlAttr::Pair(n, v) if n == "name" => super_name = v,
                                XmlAttr::Pair(n, _) => {
                                    return Err(s.unexpected_attribute(&n).into());
                                }
                                XmlAttr::EndOfElement => break,
                                XmlAttr::EndOfTag => {
                                    return Err(s
                                        .parse_error("superclass element cannot have children")
                                        .into());
                                }
                            }
                        }
                        class.add_super_class(&super_name)?;
                    }
                    ATTRIBUTE_TAG => {
                        class.add_attribute(Attribute::read_xml(s, skip_string_range)?)?
                    }
                    RELATIONSHIP_TAG => class.add_relationship(Relationship::read_xml(s)?)?,
                    METHOD_TAG => class.add_method(Method::read_xml(s)?)?,
                    "/class" => break,
                    other => {
                        return Err(s
                            .unexpected_tag(other, "superclass/attribute/relationship/method")
                            .into());
                    }
                }
            }
        }
        Ok(class)
    }

    pub fn write_xml<W: Write>(&self, s: &mut XmlOutputStream<W>) -> std::io::Result<()> {
        s.put_start_tag(CLASS_TAG)?;
        s.put_attribute("name", &self.name)?;
        if !self.description.is_empty() {
            s.put_attribute("description", &self.description)?;
        }
        if self.is_abstract {
            s.put_attribute("is-abstract", bool_xml(self.is_abstract))?;
        }
        let empty = self.super_class_names.is_empty()
            && self.attributes.is_empty()
            && self.relationships.is_empty()
            && self.methods.is_empty();
        if empty {
            s.finish_empty()?;
            return s.put_eol();
        }
        s.finish_tag()?;
        s.put_eol()?;
        for super_class in &self.super_class_names {
            s.put_raw("  ")?;
            s.put_start_tag(SUPERCLASS_TAG)?;
            s.put_attribute("name", super_class)?;
            s.finish_empty()?;
            s.put_eol()?;
        }
        for a in &self.attributes {
            a.write_xml(s)?;
        }
        for r in &self.relationships {
            r.write_xml(s)?;
        }
        for m in &self.methods {
            m.write_xml(s)?;
        }
        s.put_last_tag(CLASS_TAG)?;
        s.put_eol()
    }
}

/// Recompute every closure across the loaded class set. Must run after any
/// structural schema change; nothing else keeps `all_*`, `data_info` or
/// `instance_size` in step with the direct members.
///
/// Override rules: between sibling super-classes the first-traversed
/// definition wins; a direct definition always wins and suppresses the
/// inherited entry. Disagreements on type or cardinality between the
/// overriding and overridden member are reported as warnings, not errors.
pub fn registrate_classes(classes: &mut ClassMap) -> Result<Vec<String>, SchemaError> {
    let mut warnings = Vec::new();

    // transitive supers, base-first
    let names: Vec<Name> = classes.keys().cloned().collect();
    let mut supers: HashMap<Name, Vec<Name>> = HashMap::new();
    for name in &names {
        let mut out = Vec::new();
        let mut stack = vec![name.clone()];
        collect_supers(name, classes, &mut stack, &mut out)?;
        supers.insert(name.clone(), out);
    }
    for name in &names {
        classes[name].all_super = supers.remove(name).unwrap();
        classes[name].all_sub.clear();
    }

    // subclasses are the inverse relation
    for name in &names {
        let supers_of = classes[name].all_super.clone();
        for s in supers_of {
            classes[&s].all_sub.push(name.clone());
        }
    }

    // member closures + slot directory
    for name in &names {
        let mut all_attributes: Vec<ClassMember<Attribute>> = Vec::new();
        let mut all_relationships: Vec<ClassMember<Relationship>> = Vec::new();
        let mut all_methods: Vec<ClassMember<Method>> = Vec::new();

        let chain: Vec<Name> = classes[name]
            .all_super
            .iter()
            .cloned()
            .chain(std::iter::once(name.clone()))
            .collect();
        for (step, link) in chain.iter().enumerate() {
            let direct = step + 1 == chain.len();
            let contributor = &classes[link];
            for a in &contributor.attributes {
                merge_member(
                    &mut all_attributes,
                    link,
                    a.clone(),
                    direct,
                    |old, new| {
                        if old.data_type() != new.data_type()
                            || old.is_multi_value() != new.is_multi_value()
                        {
                            Some(format!(
                                "attribute '{}' of class '{name}': definition from '{link}' overrides one with a different type or multiplicity",
                                new.name()
                            ))
                        } else {
                            None
                        }
                    },
                    |a| a.name().clone(),
                    &mut warnings,
                );
            }
            for r in &contributor.relationships {
                merge_member(
                    &mut all_relationships,
                    link,
                    r.clone(),
                    direct,
                    |old, new| {
                        if old.high_cc() != new.high_cc() {
                            Some(format!(
                                "relationship '{}' of class '{name}': definition from '{link}' overrides one with a different high cardinality",
                                new.name()
                            ))
                        } else {
                            None
                        }
                    },
                    |r| r.name().clone(),
                    &mut warnings,
                );
            }
            for m in &contributor.methods {
                merge_member(
                    &mut all_methods,
                    link,
                    m.clone(),
                    direct,
                    |_, _| None,
                    |m| m.name().clone(),
                    &mut warnings,
                );
            }
        }

        let mut data_info = HashMap::new();
        for (i, a) in all_attributes.iter().enumerate() {
            data_info.insert(
                a.member.name().clone(),
                SlotInfo {
                    slot: i,
                    kind: MemberKind::Attribute(i),
                },
            );
        }
        let n_attrs = all_attributes.len();
        for (i, r) in all_relationships.iter().enumerate() {
            data_info.insert(
                r.member.name().clone(),
                SlotInfo {
                    slot: n_attrs + i,
                    kind: MemberKind::Relationship(i),
                },
            );
        }

        let class = &mut classes[name];
        class.instance_size = all_attributes.len() + all_relationships.len();
        class.all_attributes = all_attributes;
        class.all_relationships = all_relationships;
        class.all_methods = all_methods;
        class.data_info = data_info;
    }

    // relationship targets should exist once the whole schema is in; a
    // missing one only degrades binding, so it is not fatal here
    for name in &names {
        for r in &classes[name].all_relationships {
            if !classes.contains_key(r.member.class_type()) {
                warnings.push(format!(
                    "class-type '{}' of relationship '{}' of class '{name}' is not loaded",
                    r.member.class_type(),
                    r.member.name()
                ));
            }
        }
    }

    Ok(warnings)
}

fn collect_supers(
    name: &Name,
    classes: &ClassMap,
    stack: &mut Vec<Name>,
    out: &mut Vec<Name>,
) -> Result<(), SchemaError> {
    let class = classes
        .get(name)
        .ok_or_else(|| SchemaError::MissingSuperClass {
            class: stack.first().map(|n| n.to_string()).unwrap_or_default(),
            superclass: name.to_string(),
        })?;
    for super_name in &class.super_class_names {
        if stack.contains(super_name) {
            return Err(SchemaError::CircularInheritance(super_name.to_string()));
        }
        if !classes.contains_key(super_name) {
            return Err(SchemaError::MissingSuperClass {
                class: name.to_string(),
                superclass: super_name.to_string(),
            });
        }
        stack.push(super_name.clone());
        collect_supers(super_name, classes, stack, out)?;
        stack.pop();
        if !out.contains(super_name) {
            out.push(super_name.clone());
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn merge_member<T>(
    into: &mut Vec<ClassMember<T>>,
    contributor: &Name,
    member: T,
    direct: bool,
    mismatch: impl Fn(&T, &T) -> Option<String>,
    name_of: impl Fn(&T) -> Name,
    warnings: &mut Vec<String>,
) {
    let member_name = name_of(&member);
    match into.iter().position(|m| name_of(&m.member) == member_name) {
        None => into.push(ClassMember {
            defined_in: contributor.clone(),
            member,
        }),
        Some(at) => {
            if let Some(w) = mismatch(&into[at].member, &member) {
                warnings.push(w);
            }
            // a direct declaration replaces the inherited entry in place;
            // between sibling supers the first-traversed one stays
            if direct {
                into[at] = ClassMember {
                    defined_in: contributor.clone(),
                    member,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::{HighCardinality, LowCardinality};
    use oks_var::{IntFormat, OksDataType};
    use pretty_assertions::assert_eq;

    fn attr(name: &str, data_type: OksDataType) -> Attribute {
        Attribute::new(
            name,
            data_type,
            false,
            "",
            "",
            false,
            IntFormat::Dec,
            "",
            false,
            false,
        )
        .unwrap()
    }

    fn schema_file() -> PathBuf {
        PathBuf::from("test.schema.xml")
    }

    fn class_with(name: &str, supers: &[&str], attrs: &[Attribute]) -> Class {
        let mut c = Class::new(name, "", false, &schema_file()).unwrap();
        for s in supers {
            c.add_super_class(s).unwrap();
        }
        for a in attrs {
            c.add_attribute(a.clone()).unwrap();
        }
        c
    }

    fn registered(classes: Vec<Class>) -> ClassMap {
        let mut map = ClassMap::new();
        for c in classes {
            map.insert(c.name().clone(), c);
        }
        registrate_classes(&mut map).unwrap();
        map
    }

    #[test]
    fn supers_are_base_first_and_deduplicated() {
        // diamond: D -> (B, C), B -> A, C -> A
        let map = registered(vec![
            class_with("A", &[], &[attr("a", OksDataType::U32)]),
            class_with("B", &["A"], &[attr("b", OksDataType::U32)]),
            class_with("C", &["A"], &[attr("c", OksDataType::U32)]),
            class_with("D", &["B", "C"], &[attr("d", OksDataType::U32)]),
        ]);
        let d = &map["D"];
        let supers: Vec<&str> = d.all_super_classes().iter().map(|s| s.as_str()).collect();
        assert_eq!(supers, vec!["A", "B", "C"]);

        let slots: Vec<&str> = d
            .all_attributes()
            .iter()
            .map(|a| a.member.name().as_str())
            .collect();
        assert_eq!(slots, vec!["a", "b", "c", "d"]);
        assert_eq!(d.instance_size(), 4);
        assert_eq!(d.slot_of("a").unwrap().slot, 0);
        assert_eq!(d.slot_of("d").unwrap().slot, 3);
    }

    #[test]
    fn sub_classes_are_the_inverse() {
        let map = registered(vec![
            class_with("A", &[], &[]),
            class_with("B", &["A"], &[]),
            class_with("C", &["B"], &[]),
        ]);
        let subs: Vec<&str> = map["A"]
            .all_sub_classes()
            .iter()
            .map(|s| s.as_str())
            .collect();
        assert_eq!(subs, vec!["B", "C"]);
        assert!(map["C"].all_sub_classes().is_empty());
        assert!(map["B"].is_or_derives_from("A"));
        assert!(!map["A"].is_or_derives_from("B"));
    }

    #[test]
    fn direct_member_overrides_inherited_in_place() {
        let map = registered(vec![
            class_with("A", &[], &[attr("x", OksDataType::U32), attr("y", OksDataType::U32)]),
            class_with("B", &["A"], &[attr("x", OksDataType::String)]),
        ]);
        let b = &map["B"];
        let names: Vec<&str> = b
            .all_attributes()
            .iter()
            .map(|a| a.member.name().as_str())
            .collect();
        // override keeps the inherited position, so layouts stay compatible
        assert_eq!(names, vec!["x", "y"]);
        let x = b.find_attribute("x").unwrap();
        assert_eq!(x.defined_in.as_str(), "B");
        assert_eq!(x.member.data_type(), OksDataType::String);
    }

    #[test]
    fn type_mismatch_on_override_warns() {
        let mut map = ClassMap::new();
        for c in [
            class_with("A", &[], &[attr("x", OksDataType::U32)]),
            class_with("B", &["A"], &[attr("x", OksDataType::String)]),
        ] {
            map.insert(c.name().clone(), c);
        }
        let warnings = registrate_classes(&mut map).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("different type"));
    }

    #[test]
    fn missing_super_is_an_error() {
        let mut map = ClassMap::new();
        let c = class_with("B", &["Nowhere"], &[]);
        map.insert(c.name().clone(), c);
        assert!(matches!(
            registrate_classes(&mut map),
            Err(SchemaError::MissingSuperClass { .. })
        ));
    }

    #[test]
    fn circular_inheritance_is_an_error() {
        let mut map = ClassMap::new();
        for c in [class_with("A", &["B"], &[]), class_with("B", &["A"], &[])] {
            map.insert(c.name().clone(), c);
        }
        assert!(matches!(
            registrate_classes(&mut map),
            Err(SchemaError::CircularInheritance(_))
        ));
    }

    #[test]
    fn duplicate_direct_member_is_rejected() {
        let mut c = class_with("A", &[], &[attr("x", OksDataType::U32)]);
        assert!(c.add_attribute(attr("x", OksDataType::U32)).is_err());
        let r = Relationship::new(
            "x",
            "A",
            LowCardinality::Zero,
            HighCardinality::One,
            false,
            false,
            false,
            "",
            false,
        )
        .unwrap();
        assert!(c.add_relationship(r).is_err());
    }

    #[test]
    fn relationships_slot_after_attributes() {
        let mut c = class_with("P", &[], &[attr("x", OksDataType::U32)]);
        c.add_relationship(
            Relationship::new(
                "kids",
                "P",
                LowCardinality::Zero,
                HighCardinality::Many,
                true,
                false,
                false,
                "",
                false,
            )
            .unwrap(),
        )
        .unwrap();
        let mut map = ClassMap::new();
        map.insert(c.name().clone(), c);
        registrate_classes(&mut map).unwrap();
        let p = &map["P"];
        assert_eq!(p.instance_size(), 2);
        assert_eq!(p.slot_of("kids").unwrap().slot, 1);
        assert!(p.find_relationship("kids").is_some());
        assert!(p.find_attribute("kids").is_none());
    }

    #[test]
    fn class_xml_round_trip() {
        let mut c = class_with("Module", &[], &[attr("slot", OksDataType::U16)]);
        c.add_super_class("Component").unwrap();
        c.add_relationship(
            Relationship::new(
                "boards",
                "Board",
                LowCardinality::Zero,
                HighCardinality::Many,
                true,
                true,
                true,
                "",
                false,
            )
            .unwrap(),
        )
        .unwrap();

        let mut buf = Vec::new();
        let mut w = XmlOutputStream::new(&mut buf);
        c.write_xml(&mut w).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut r = XmlInputStream::new(text.as_bytes());
        assert_eq!(r.get_tag_start().unwrap().unwrap(), CLASS_TAG);
        let back = Class::read_xml(&mut r, &schema_file(), false).unwrap();
        assert_eq!(back.name().as_str(), "Module");
        assert_eq!(back.direct_super_classes().len(), 1);
        assert_eq!(back.direct_attributes().len(), 1);
        assert_eq!(back.direct_relationships().len(), 1);
    }
}
