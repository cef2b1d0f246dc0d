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

//! Schema editing. Every mutation funnels through
//! [`OksKernel::registrate_class_change`]: validate and apply the direct
//! edit, rebuild the closures of the class and its subclasses for
//! structural changes, reshape live objects when the slot layout or a
//! member's type changed, then notify. A conversion failure rolls the
//! whole edit back.

use crate::kernel::{Notice, OksKernel};
use crate::object::empty_relationship_value;
use crate::object_ops::destroy_inner;
use crate::{KernelState, OksError};
use oks_common::{
    Attribute, ChangeKind, Class, Method, MethodImplementation, Relationship, SchemaError,
    registrate_classes,
};
use oks_common::{HighCardinality, LowCardinality};
use oks_var::{IntFormat, Name, ObjIdx, OksDataType, Value};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

impl OksKernel {
    /// Add a freshly constructed class. A colliding name is an error
    /// unless the kernel allows duplicated classes, in which case the
    /// later definition is ignored with a warning.
    pub fn add_class(&self, class: Class) -> Result<(), OksError> {
        let name = class.name().clone();
        let mut notices = Vec::new();
        {
            let mut st = self.state.write().unwrap();
            if st.classes.contains_key(&name) {
                if self.settings.allow_duplicated_classes {
                    warn!("class '{name}' is already defined; later definition ignored");
                    return Ok(());
                }
                return Err(SchemaError::DuplicateClass(name.to_string()).into());
            }
            let file = class.file().to_path_buf();
            if st.file(&file).is_none() {
                return Err(OksError::UnknownFile(file));
            }
            st.touch_file(&file)?;
            let backup = st.classes.clone();
            st.classes.insert(name.clone(), class);
            match registrate_classes(&mut st.classes) {
                Ok(warnings) => log_warnings(&warnings),
                Err(e) => {
                    st.classes = backup;
                    let _ = registrate_classes(&mut st.classes);
                    return Err(e.into());
                }
            }
            notices.push(Notice::ClassCreated(name));
        }
        self.dispatch(notices);
        Ok(())
    }

    /// Remove a class: its objects are destroyed first. Fails while some
    /// other class still names it as a direct super-class.
    pub fn remove_class(&self, name: &str) -> Result<(), OksError> {
        let mut notices = Vec::new();
        {
            let mut st = self.state.write().unwrap();
            if !st.classes.contains_key(name) {
                return Err(OksError::UnknownClass(name.to_string()));
            }
            for (other_name, other) in &st.classes {
                if other.direct_super_classes().iter().any(|s| s.as_str() == name) {
                    return Err(SchemaError::MissingSuperClass {
                        class: other_name.to_string(),
                        superclass: name.to_string(),
                    }
                    .into());
                }
            }
            let file = st.classes[name].file().to_path_buf();
            st.touch_file(&file)?;

            let mut in_progress = HashSet::new();
            for idx in st.store.objects_of_class(name) {
                destroy_inner(&mut st, idx, &mut in_progress, &mut notices)?;
            }
            st.classes.shift_remove(name);
            st.indices.retain(|(class, _), _| class.as_str() != name);
            match registrate_classes(&mut st.classes) {
                Ok(warnings) => log_warnings(&warnings),
                Err(e) => return Err(e.into()),
            }
            notices.push(Notice::ClassDeleted(Name::from(name)));
        }
        self.dispatch(notices);
        Ok(())
    }

    // ---- class-level setters ----

    pub fn set_class_description(&self, class: &str, description: &str) -> Result<(), OksError> {
        self.registrate_class_change(class, ChangeKind::Description, None, |c| {
            c.set_description(description).map_err(Into::into)
        })
    }

    pub fn set_class_is_abstract(&self, class: &str, is_abstract: bool) -> Result<(), OksError> {
        self.registrate_class_change(class, ChangeKind::Abstractness, None, |c| {
            c.set_is_abstract(is_abstract);
            Ok(())
        })
    }

    pub fn add_super_class(&self, class: &str, super_class: &str) -> Result<(), OksError> {
        self.registrate_class_change(
            class,
            ChangeKind::SuperClassesList,
            Some(super_class.to_string()),
            |c| c.add_super_class(super_class).map_err(Into::into),
        )
    }

    pub fn remove_super_class(&self, class: &str, super_class: &str) -> Result<(), OksError> {
        self.registrate_class_change(
            class,
            ChangeKind::SuperClassesList,
            Some(super_class.to_string()),
            |c| c.remove_super_class(super_class).map_err(Into::into),
        )
    }

    // ---- attribute edits ----

    pub fn add_attribute(&self, class: &str, attribute: Attribute) -> Result<(), OksError> {
        let hint = attribute.name().to_string();
        self.registrate_class_change(class, ChangeKind::AttributesList, Some(hint), |c| {
            c.add_attribute(attribute).map_err(Into::into)
        })
    }

    pub fn remove_attribute(&self, class: &str, name: &str) -> Result<(), OksError> {
        self.registrate_class_change(
            class,
            ChangeKind::AttributesList,
            Some(name.to_string()),
            |c| c.remove_attribute(name).map(|_| ()).map_err(Into::into),
        )
    }

    pub fn set_attribute_type(
        &self,
        class: &str,
        name: &str,
        data_type: OksDataType,
    ) -> Result<(), OksError> {
        let skip = self.settings.skip_string_range;
        self.edit_attribute(class, name, ChangeKind::AttributeType, |a| {
            a.set_type(data_type, skip).map_err(Into::into)
        })
    }

    pub fn set_attribute_range(&self, class: &str, name: &str, range: &str) -> Result<(), OksError> {
        let skip = self.settings.skip_string_range;
        self.edit_attribute(class, name, ChangeKind::AttributeRange, |a| {
            a.set_range(range, skip).map_err(Into::into)
        })
    }

    pub fn set_attribute_format(
        &self,
        class: &str,
        name: &str,
        format: IntFormat,
    ) -> Result<(), OksError> {
        self.edit_attribute(class, name, ChangeKind::AttributeFormat, |a| {
            a.set_format(format);
            Ok(())
        })
    }

    pub fn set_attribute_is_multi_value(
        &self,
        class: &str,
        name: &str,
        multi: bool,
    ) -> Result<(), OksError> {
        let skip = self.settings.skip_string_range;
        self.edit_attribute(class, name, ChangeKind::AttributeMultiValue, |a| {
            a.set_is_multi_value(multi, skip).map_err(Into::into)
        })
    }

    pub fn set_attribute_init_value(
        &self,
        class: &str,
        name: &str,
        init: &str,
    ) -> Result<(), OksError> {
        self.edit_attribute(class, name, ChangeKind::AttributeInitValue, |a| {
            a.set_init_value(init).map_err(Into::into)
        })
    }

    pub fn set_attribute_description(
        &self,
        class: &str,
        name: &str,
        description: &str,
    ) -> Result<(), OksError> {
        self.edit_attribute(class, name, ChangeKind::AttributeDescription, |a| {
            a.set_description(description).map_err(Into::into)
        })
    }

    pub fn set_attribute_is_not_null(
        &self,
        class: &str,
        name: &str,
        not_null: bool,
    ) -> Result<(), OksError> {
        self.edit_attribute(class, name, ChangeKind::AttributeNotNull, |a| {
            a.set_is_not_null(not_null);
            Ok(())
        })
    }

    fn edit_attribute(
        &self,
        class: &str,
        name: &str,
        kind: ChangeKind,
        edit: impl FnOnce(&mut Attribute) -> Result<(), OksError>,
    ) -> Result<(), OksError> {
        self.registrate_class_change(class, kind, Some(name.to_string()), |c| {
            let a = c
                .find_direct_attribute_mut(name)
                .ok_or_else(|| OksError::NoSuchMember {
                    class: class.to_string(),
                    what: "direct attribute",
                    member: name.to_string(),
                })?;
            edit(a)
        })
    }

    // ---- relationship edits ----

    pub fn add_relationship(&self, class: &str, relationship: Relationship) -> Result<(), OksError> {
        let hint = relationship.name().to_string();
        self.registrate_class_change(class, ChangeKind::RelationshipsList, Some(hint), |c| {
            c.add_relationship(relationship).map_err(Into::into)
        })
    }

    pub fn remove_relationship(&self, class: &str, name: &str) -> Result<(), OksError> {
        self.registrate_class_change(
            class,
            ChangeKind::RelationshipsList,
            Some(name.to_string()),
            |c| c.remove_relationship(name).map(|_| ()).map_err(Into::into),
        )
    }

    pub fn set_relationship_class_type(
        &self,
        class: &str,
        name: &str,
        class_type: &str,
    ) -> Result<(), OksError> {
        self.edit_relationship(class, name, ChangeKind::RelationshipClassType, |r| {
            r.set_class_type(class_type).map_err(Into::into)
        })
    }

    pub fn set_relationship_description(
        &self,
        class: &str,
        name: &str,
        description: &str,
    ) -> Result<(), OksError> {
        self.edit_relationship(class, name, ChangeKind::RelationshipDescription, |r| {
            r.set_description(description).map_err(Into::into)
        })
    }

    pub fn set_relationship_low_cc(
        &self,
        class: &str,
        name: &str,
        low_cc: LowCardinality,
    ) -> Result<(), OksError> {
        self.edit_relationship(class, name, ChangeKind::RelationshipLowCc, |r| {
            r.set_low_cc(low_cc);
            Ok(())
        })
    }

    pub fn set_relationship_high_cc(
        &self,
        class: &str,
        name: &str,
        high_cc: HighCardinality,
    ) -> Result<(), OksError> {
        self.edit_relationship(class, name, ChangeKind::RelationshipHighCc, |r| {
            r.set_high_cc(high_cc);
            Ok(())
        })
    }

    pub fn set_relationship_is_composite(
        &self,
        class: &str,
        name: &str,
        composite: bool,
    ) -> Result<(), OksError> {
        self.edit_relationship(class, name, ChangeKind::RelationshipComposite, |r| {
            r.set_is_composite(composite);
            Ok(())
        })
    }

    pub fn set_relationship_is_exclusive(
        &self,
        class: &str,
        name: &str,
        exclusive: bool,
    ) -> Result<(), OksError> {
        self.edit_relationship(class, name, ChangeKind::RelationshipExclusive, |r| {
            r.set_is_exclusive(exclusive);
            Ok(())
        })
    }

    pub fn set_relationship_is_dependent(
        &self,
        class: &str,
        name: &str,
        dependent: bool,
    ) -> Result<(), OksError> {
        self.edit_relationship(class, name, ChangeKind::RelationshipDependent, |r| {
            r.set_is_dependent(dependent);
            Ok(())
        })
    }

    fn edit_relationship(
        &self,
        class: &str,
        name: &str,
        kind: ChangeKind,
        edit: impl FnOnce(&mut Relationship) -> Result<(), OksError>,
    ) -> Result<(), OksError> {
        self.registrate_class_change(class, kind, Some(name.to_string()), |c| {
            let r = c
                .find_direct_relationship_mut(name)
                .ok_or_else(|| OksError::NoSuchMember {
                    class: class.to_string(),
                    what: "direct relationship",
                    member: name.to_string(),
                })?;
            edit(r)
        })
    }

    // ---- method edits ----

    pub fn add_method(&self, class: &str, method: Method) -> Result<(), OksError> {
        let hint = method.name().to_string();
        self.registrate_class_change(class, ChangeKind::MethodsList, Some(hint), |c| {
            c.add_method(method).map_err(Into::into)
        })
    }

    pub fn remove_method(&self, class: &str, name: &str) -> Result<(), OksError> {
        self.registrate_class_change(
            class,
            ChangeKind::MethodsList,
            Some(name.to_string()),
            |c| c.remove_method(name).map(|_| ()).map_err(Into::into),
        )
    }

    pub fn set_method_description(
        &self,
        class: &str,
        name: &str,
        description: &str,
    ) -> Result<(), OksError> {
        self.edit_method(class, name, ChangeKind::MethodDescription, |m| {
            m.set_description(description).map_err(Into::into)
        })
    }

    pub fn add_method_implementation(
        &self,
        class: &str,
        method: &str,
        implementation: MethodImplementation,
    ) -> Result<(), OksError> {
        self.edit_method(class, method, ChangeKind::MethodImplementation, |m| {
            m.add_implementation(implementation).map_err(Into::into)
        })
    }

    pub fn remove_method_implementation(
        &self,
        class: &str,
        method: &str,
        language: &str,
    ) -> Result<(), OksError> {
        self.edit_method(class, method, ChangeKind::MethodImplementation, |m| {
            m.remove_implementation(language).map_err(Into::into)
        })
    }

    fn edit_method(
        &self,
        class: &str,
        name: &str,
        kind: ChangeKind,
        edit: impl FnOnce(&mut Method) -> Result<(), OksError>,
    ) -> Result<(), OksError> {
        self.registrate_class_change(class, kind, Some(name.to_string()), |c| {
            let m = c
                .find_direct_method_mut(name)
                .ok_or_else(|| OksError::NoSuchMember {
                    class: class.to_string(),
                    what: "method",
                    member: name.to_string(),
                })?;
            edit(m)
        })
    }

    /// The one funnel for schema edits. Applies `edit` to the class,
    /// rebuilds closures and reshapes instances as the change kind
    /// demands, and rolls the whole schema back when any step fails.
    pub fn registrate_class_change(
        &self,
        class: &str,
        kind: ChangeKind,
        hint: Option<String>,
        edit: impl FnOnce(&mut Class) -> Result<(), OksError>,
    ) -> Result<(), OksError> {
        let mut notices = Vec::new();
        {
            let mut st = self.state.write().unwrap();
            let file = st
                .classes
                .get(class)
                .ok_or_else(|| OksError::UnknownClass(class.to_string()))?
                .file()
                .to_path_buf();
            st.touch_file(&file)?;

            let rebuild = kind.is_structural() || kind.reshapes_instances();
            let backup = rebuild.then(|| st.classes.clone());
            // old layouts, captured while the closures still describe them
            let old_layouts = rebuild.then(|| snapshot_layouts(&st));
            let mut affected: HashSet<Name> = HashSet::new();
            if rebuild {
                affected.insert(Name::from(class));
                if let Some(c) = st.classes.get(class) {
                    affected.extend(c.all_sub_classes().iter().cloned());
                }
            }

            edit(st.classes.get_mut(class).unwrap())?;

            if rebuild {
                let outcome = (|| -> Result<(), OksError> {
                    let warnings = registrate_classes(&mut st.classes)?;
                    log_warnings(&warnings);
                    if let Some(c) = st.classes.get(class) {
                        affected.extend(c.all_sub_classes().iter().cloned());
                    }
                    registrate_instances(&mut st, &affected, old_layouts.as_ref().unwrap())
                })();
                if let Err(e) = outcome {
                    st.classes = backup.unwrap();
                    let _ = registrate_classes(&mut st.classes);
                    return Err(e);
                }
                st.indices
                    .retain(|(class, _), _| !affected.contains(class));
            } else if !matches!(
                kind,
                ChangeKind::Description | ChangeKind::Abstractness | ChangeKind::SubClassesList
            ) {
                // member edits must refresh the closures: subclasses hold
                // clones of inherited members
                let warnings = registrate_classes(&mut st.classes)?;
                log_warnings(&warnings);
            }
            notices.push(Notice::ClassModified(Name::from(class), kind, hint));
        }
        self.dispatch(notices);
        Ok(())
    }
}

fn log_warnings(warnings: &[String]) {
    for w in warnings {
        warn!("{w}");
    }
}

/// member name → old slot, for every class.
type Layouts = HashMap<Name, HashMap<Name, usize>>;

fn snapshot_layouts(st: &KernelState) -> Layouts {
    st.classes
        .iter()
        .map(|(name, class)| {
            let mut slots = HashMap::new();
            for a in class.all_attributes() {
                if let Some(info) = class.slot_of(a.member.name()) {
                    slots.insert(a.member.name().clone(), info.slot);
                }
            }
            for r in class.all_relationships() {
                if let Some(info) = class.slot_of(r.member.name()) {
                    slots.insert(r.member.name().clone(), info.slot);
                }
            }
            (name.clone(), slots)
        })
        .collect()
}

/// Reshape every live object of the affected classes to the new closure:
/// same-named slots move (converting where the member changed shape), new
/// slots take their defaults. Computes every new array before committing
/// any, so a conversion error leaves all objects untouched.
fn registrate_instances(
    st: &mut KernelState,
    affected: &HashSet<Name>,
    old_layouts: &Layouts,
) -> Result<(), OksError> {
    let mut new_arrays: Vec<(ObjIdx, Vec<Value>)> = Vec::new();

    for class_name in affected {
        let Some(class) = st.classes.get(class_name) else {
            continue;
        };
        let old_layout = old_layouts.get(class_name);
        for idx in st.store.objects_of_class(class_name) {
            let Some(object) = st.store.get(idx) else {
                continue;
            };
            let mut data = Vec::with_capacity(class.instance_size());
            for a in class.all_attributes() {
                let attr = &a.member;
                let old_value = old_layout
                    .and_then(|l| l.get(attr.name()))
                    .and_then(|&slot| object.data().get(slot));
                match old_value {
                    Some(v) => data.push(attr.convert(v.clone())?),
                    None => data.push(attr.init_value().clone()),
                }
            }
            for r in class.all_relationships() {
                let rel = &r.member;
                let old_value = old_layout
                    .and_then(|l| l.get(rel.name()))
                    .and_then(|&slot| object.data().get(slot));
                data.push(convert_relationship_value(old_value, rel.high_cc()));
            }
            new_arrays.push((idx, data));
        }
    }

    for (idx, data) in new_arrays {
        if let Some(object) = st.store.get_mut(idx) {
            *object.data_mut() = data;
        }
    }
    Ok(())
}

/// Cardinality conversion for relationship slots across a schema change.
/// Narrowing a list keeps its first reference.
fn convert_relationship_value(old: Option<&Value>, high_cc: HighCardinality) -> Value {
    match (old, high_cc) {
        (Some(Value::List(items)), HighCardinality::Many) => Value::List(items.clone()),
        (Some(v @ Value::Object(_)), HighCardinality::Many) => Value::List(vec![v.clone()]),
        (Some(Value::List(items)), HighCardinality::One) => items
            .first()
            .cloned()
            .unwrap_or_else(|| empty_relationship_value(HighCardinality::One)),
        (Some(v @ Value::Object(_)), HighCardinality::One) => v.clone(),
        _ => empty_relationship_value(high_cc),
    }
}

/// Drop every class owned by `file`, destroying their objects; what
/// closing a schema file does once nothing else includes it.
pub(crate) fn remove_classes_of_file(
    st: &mut KernelState,
    file: &std::path::Path,
    notices: &mut Vec<Notice>,
) -> Result<(), OksError> {
    let doomed: Vec<Name> = st
        .classes
        .iter()
        .filter(|(_, c)| c.file() == file)
        .map(|(n, _)| n.clone())
        .collect();
    if doomed.is_empty() {
        return Ok(());
    }
    let mut in_progress = HashSet::new();
    for name in &doomed {
        for idx in st.store.objects_of_class(name) {
            destroy_inner(st, idx, &mut in_progress, notices)?;
        }
    }
    for name in &doomed {
        st.classes.shift_remove(name);
        st.indices.retain(|(class, _), _| class != name);
        notices.push(Notice::ClassDeleted(name.clone()));
    }
    info!("removed {} classes of '{}'", doomed.len(), file.display());
    match registrate_classes(&mut st.classes) {
        Ok(warnings) => log_warnings(&warnings),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Test for duplicated ids across inheritance hierarchies, logged as
/// warnings; reload re-runs this after re-binding.
pub(crate) fn check_inherited_duplicates(st: &KernelState) {
    for (name, class) in &st.classes {
        for sub in class.all_sub_classes() {
            for idx in st.store.objects_of_class(sub) {
                if let Some(object) = st.store.get(idx)
                    && st.store.find(name, object.id()).is_some()
                {
                    warn!(
                        "object id '{}' exists in both '{}' and its subclass '{}'",
                        object.id(),
                        name,
                        sub
                    );
                }
            }
        }
    }
}
