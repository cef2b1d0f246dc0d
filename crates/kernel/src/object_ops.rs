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

//! Object lifecycle and slot mutation: the kernel entry points behind every
//! create/get/set/destroy, with the RCR bookkeeping composite relationships
//! demand.

use crate::kernel::{KernelState, Notice, ObjectNotice, OksKernel};
use crate::object::{OksObject, Rcr};
use crate::{AttributeIndex, OksError};
use oks_common::{HighCardinality, Relationship};
use oks_var::{Name, ObjIdx, ObjRef, Value};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

impl OksKernel {
    /// Create an object of `class` from schema defaults. An empty `id`
    /// draws a unique one by `^N` probing. `file` defaults to the active
    /// data file.
    pub fn create_object(
        &self,
        class: &str,
        id: &str,
        file: Option<&Path>,
    ) -> Result<ObjIdx, OksError> {
        let mut notices = Vec::new();
        let idx = {
            let mut st = self.state.write().unwrap();
            let cls = st
                .classes
                .get(class)
                .ok_or_else(|| OksError::UnknownClass(class.to_string()))?;
            if cls.is_abstract() {
                return Err(OksError::AbstractClass(class.to_string()));
            }
            let file = match file {
                Some(f) => {
                    if !st.data_files.contains_key(f) {
                        return Err(OksError::UnknownFile(f.to_path_buf()));
                    }
                    f.to_path_buf()
                }
                None => st.active_data.clone().ok_or(OksError::NoActiveData)?,
            };
            let id = if id.is_empty() {
                st.store.unique_id(class, "")
            } else {
                Name::from(id)
            };
            self.check_inherited_id(&st, class, &id)?;
            let cls = st.classes.get(class).unwrap();
            let object = OksObject::from_defaults(cls, id.clone(), &file);
            let idx = st.store.insert(object)?;
            st.touch_file(&file)?;
            notices.push(Notice::ObjectCreated(ObjectNotice {
                handle: idx,
                class: Name::from(class),
                id,
            }));
            idx
        };
        self.dispatch(notices);
        Ok(idx)
    }

    /// Id uniqueness across the inheritance hierarchy, when that mode is
    /// on.
    fn check_inherited_id(
        &self,
        st: &KernelState,
        class: &str,
        id: &str,
    ) -> Result<(), OksError> {
        if !self.settings.test_duplicated_objects_via_inheritance {
            return Ok(());
        }
        let Some(cls) = st.classes.get(class) else {
            return Ok(());
        };
        for other in cls.inheritance_hierarchy() {
            if st.store.find(other, id).is_some() {
                return Err(OksError::DuplicateObjectViaInheritance {
                    class: class.to_string(),
                    in_class: other.to_string(),
                    id: id.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Destroy an object: drop it from the registries, release the RCRs it
    /// holds on composite targets, and cascade into dependent children
    /// left without a composite parent.
    pub fn destroy_object(&self, idx: ObjIdx) -> Result<(), OksError> {
        let mut notices = Vec::new();
        {
            let mut st = self.state.write().unwrap();
            if st.store.get(idx).is_none() {
                return Err(OksError::DanglingHandle(idx));
            }
            let mut in_progress = HashSet::new();
            destroy_inner(&mut st, idx, &mut in_progress, &mut notices)?;
        }
        self.dispatch(notices);
        Ok(())
    }

    /// Rename an object; fails when the new id is taken.
    pub fn set_object_id(&self, idx: ObjIdx, new_id: &str) -> Result<(), OksError> {
        let mut notices = Vec::new();
        {
            let mut st = self.state.write().unwrap();
            let object = st.store.get(idx).ok_or(OksError::DanglingHandle(idx))?;
            let class = object.class_name().clone();
            let file = object.file().to_path_buf();
            self.check_inherited_id(&st, &class, new_id)?;
            st.store.rename(idx, new_id)?;
            st.touch_file(&file)?;
            notices.push(Notice::ObjectChanged(ObjectNotice {
                handle: idx,
                class,
                id: Name::from(new_id),
            }));
        }
        self.dispatch(notices);
        Ok(())
    }

    /// Move an object to another loaded, writable data file.
    pub fn set_object_file(&self, idx: ObjIdx, file: &Path) -> Result<(), OksError> {
        let mut notices = Vec::new();
        {
            let mut st = self.state.write().unwrap();
            if !st.data_files.contains_key(file) {
                return Err(OksError::UnknownFile(file.to_path_buf()));
            }
            if st.data_files[file].is_read_only() {
                return Err(OksError::NotWritable(file.to_path_buf()));
            }
            let object = st.store.get(idx).ok_or(OksError::DanglingHandle(idx))?;
            let old_file = object.file().to_path_buf();
            if old_file == file {
                return Ok(());
            }
            let (class, id) = st.store.identity(idx).unwrap();
            st.touch_file(&old_file)?;
            st.touch_file(file)?;
            st.store.get_mut(idx).unwrap().set_file(file);
            notices.push(Notice::ObjectChanged(ObjectNotice {
                handle: idx,
                class,
                id,
            }));
        }
        self.dispatch(notices);
        Ok(())
    }

    /// Set an attribute slot: coerce to the declared type, validate the
    /// range and the no-null contract, maintain any index, notify.
    pub fn set_attribute(&self, idx: ObjIdx, name: &str, value: Value) -> Result<(), OksError> {
        let mut notices = Vec::new();
        {
            let mut st = self.state.write().unwrap();
            let (slot, attr) = {
                let class = st.class_of(idx)?;
                let member = class
                    .find_attribute(name)
                    .ok_or_else(|| OksError::NoSuchMember {
                        class: class.name().to_string(),
                        what: "attribute",
                        member: name.to_string(),
                    })?;
                (class.slot_of(name).unwrap().slot, member.member.clone())
            };
            let object = st.store.get(idx).ok_or(OksError::DanglingHandle(idx))?;
            let (class_name, id) = (object.class_name().clone(), object.id().clone());
            let file = object.file().to_path_buf();

            let value = attr.convert(value)?;
            attr.check_range(&value)?;
            if attr.is_not_null() && value.is_empty() {
                return Err(OksError::NotNullViolation {
                    class: class_name.to_string(),
                    id: id.to_string(),
                    attribute: name.to_string(),
                });
            }

            let old = object.data()[slot].clone();
            st.touch_file(&file)?;
            if let Some(index) = st.indices.get_mut(&(class_name.clone(), Name::from(name))) {
                index.remove(&old, idx);
                index.insert(value.clone(), idx);
            }
            st.store.get_mut(idx).unwrap().set_slot(slot, value);
            notices.push(Notice::ObjectChanged(ObjectNotice {
                handle: idx,
                class: class_name,
                id,
            }));
        }
        self.dispatch(notices);
        Ok(())
    }

    /// Assign a single-valued relationship. The previous composite RCR is
    /// released, the new one installed; on any failure the slot and the
    /// RCRs are as they were.
    pub fn set_relationship(
        &self,
        idx: ObjIdx,
        name: &str,
        target: ObjRef,
    ) -> Result<(), OksError> {
        self.mutate_relationship(idx, name, |rel, _old| {
            if rel.high_cc() != HighCardinality::One {
                return Err(OksError::NotSingleValue {
                    relationship: name.to_string(),
                });
            }
            Ok(Value::Object(target.clone()))
        })
    }

    /// Replace the whole value list of a many-valued relationship.
    pub fn set_relationship_list(
        &self,
        idx: ObjIdx,
        name: &str,
        targets: Vec<ObjRef>,
    ) -> Result<(), OksError> {
        self.mutate_relationship(idx, name, |rel, _old| {
            if rel.high_cc() != HighCardinality::Many {
                return Err(OksError::NotMultiValue {
                    relationship: name.to_string(),
                });
            }
            Ok(Value::List(
                targets.iter().cloned().map(Value::Object).collect(),
            ))
        })
    }

    /// Append one target to a many-valued relationship.
    pub fn add_relationship_target(
        &self,
        idx: ObjIdx,
        name: &str,
        target: ObjRef,
    ) -> Result<(), OksError> {
        self.mutate_relationship(idx, name, |rel, old| {
            if rel.high_cc() != HighCardinality::Many {
                return Err(OksError::NotMultiValue {
                    relationship: name.to_string(),
                });
            }
            let mut items = match old {
                Value::List(items) => items.clone(),
                _ => Vec::new(),
            };
            items.push(Value::Object(target.clone()));
            Ok(Value::List(items))
        })
    }

    /// A target named by class and id: live objects resolve, absent ones
    /// stay unresolved until the next bind.
    pub fn add_relationship_target_by_id(
        &self,
        idx: ObjIdx,
        name: &str,
        class: &str,
        id: &str,
    ) -> Result<(), OksError> {
        let target = self.reference_for(class, id);
        self.add_relationship_target(idx, name, target)
    }

    pub fn set_relationship_by_id(
        &self,
        idx: ObjIdx,
        name: &str,
        class: &str,
        id: &str,
    ) -> Result<(), OksError> {
        let target = self.reference_for(class, id);
        self.set_relationship(idx, name, target)
    }

    fn reference_for(&self, class: &str, id: &str) -> ObjRef {
        let st = self.state.read().unwrap();
        match st.store.find(class, id) {
            Some(t) => ObjRef::Resolved(t),
            None if st.classes.contains_key(class) => ObjRef::Semi {
                class: Name::from(class),
                id: Name::from(id),
            },
            None => ObjRef::Unresolved {
                class: Name::from(class),
                id: Name::from(id),
            },
        }
    }

    /// Remove one target from a many-valued relationship.
    pub fn remove_relationship_target(
        &self,
        idx: ObjIdx,
        name: &str,
        target: ObjIdx,
    ) -> Result<(), OksError> {
        let (class, id) = self
            .object_identity(target)
            .ok_or(OksError::DanglingHandle(target))?;
        self.mutate_relationship(idx, name, |rel, old| {
            if rel.high_cc() != HighCardinality::Many {
                return Err(OksError::NotMultiValue {
                    relationship: name.to_string(),
                });
            }
            let Value::List(items) = old else {
                return Err(OksError::NotMultiValue {
                    relationship: name.to_string(),
                });
            };
            let mut items = items.clone();
            let at = items
                .iter()
                .position(|v| matches!(v, Value::Object(ObjRef::Resolved(t)) if *t == target))
                .ok_or_else(|| OksError::NotInRelationship {
                    relationship: name.to_string(),
                    class: class.to_string(),
                    id: id.to_string(),
                })?;
            items.remove(at);
            Ok(Value::List(items))
        })
    }

    /// The shared shape of every relationship mutation: compute the new
    /// slot value, check target compatibility, swap the RCR set
    /// transactionally, touch the file, notify.
    fn mutate_relationship(
        &self,
        idx: ObjIdx,
        name: &str,
        new_value: impl FnOnce(&Relationship, &Value) -> Result<Value, OksError>,
    ) -> Result<(), OksError> {
        let mut notices = Vec::new();
        {
            let mut st = self.state.write().unwrap();
            let (slot, rel) = {
                let class = st.class_of(idx)?;
                let member = class
                    .find_relationship(name)
                    .ok_or_else(|| OksError::NoSuchMember {
                        class: class.name().to_string(),
                        what: "relationship",
                        member: name.to_string(),
                    })?;
                (class.slot_of(name).unwrap().slot, member.member.clone())
            };
            let object = st.store.get(idx).ok_or(OksError::DanglingHandle(idx))?;
            let (class_name, id) = (object.class_name().clone(), object.id().clone());
            let file = object.file().to_path_buf();

            let old = object.data()[slot].clone();
            let new = new_value(&rel, &old)?;
            for target in references_of(&new) {
                check_target_compatibility(&st, &rel, &class_name, target)?;
            }

            st.touch_file(&file)?;
            swap_rcrs(&mut st, idx, &rel, &old, &new)?;
            st.store.get_mut(idx).unwrap().set_slot(slot, new);
            notices.push(Notice::ObjectChanged(ObjectNotice {
                handle: idx,
                class: class_name,
                id,
            }));
        }
        self.dispatch(notices);
        Ok(())
    }

    // ---- per-attribute ordered indices ----

    /// Build (or rebuild) the ordered index over one attribute of a class.
    pub fn build_index(&self, class: &str, attribute: &str) -> Result<(), OksError> {
        let mut st = self.state.write().unwrap();
        let slot = {
            let cls = st
                .classes
                .get(class)
                .ok_or_else(|| OksError::UnknownClass(class.to_string()))?;
            cls.find_attribute(attribute)
                .and_then(|_| cls.slot_of(attribute))
                .ok_or_else(|| OksError::NoSuchMember {
                    class: class.to_string(),
                    what: "attribute",
                    member: attribute.to_string(),
                })?
                .slot
        };
        let entries: Vec<(Value, ObjIdx)> = st
            .store
            .objects_of_class(class)
            .into_iter()
            .filter_map(|i| st.store.get(i).map(|o| (o.data()[slot].clone(), i)))
            .collect();
        st.indices.insert(
            (Name::from(class), Name::from(attribute)),
            AttributeIndex::build(entries.into_iter()),
        );
        Ok(())
    }

    pub fn drop_index(&self, class: &str, attribute: &str) {
        self.state
            .write()
            .unwrap()
            .indices
            .remove(&(Name::from(class), Name::from(attribute)));
    }

    /// Index lookup; `None` when no index exists for the pair.
    pub fn find_by_index(
        &self,
        class: &str,
        attribute: &str,
        value: &Value,
    ) -> Option<Vec<ObjIdx>> {
        let st = self.state.read().unwrap();
        st.indices
            .get(&(Name::from(class), Name::from(attribute)))
            .map(|i| i.find_equal(value))
    }
}

fn references_of(value: &Value) -> Vec<&ObjRef> {
    match value {
        Value::Object(r) => vec![r],
        Value::List(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::Object(r) => Some(r),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// The target must be of the relationship's class or a subclass of it.
/// Unresolved targets pass; bind re-checks them once they materialize.
fn check_target_compatibility(
    st: &KernelState,
    rel: &Relationship,
    holder_class: &Name,
    target: &ObjRef,
) -> Result<(), OksError> {
    let class_name = match target {
        ObjRef::Nil | ObjRef::Unresolved { .. } => return Ok(()),
        ObjRef::Semi { class, .. } => class.clone(),
        ObjRef::Resolved(t) => st
            .store
            .get(*t)
            .ok_or(OksError::DanglingHandle(*t))?
            .class_name()
            .clone(),
    };
    match st.classes.get(&class_name) {
        Some(target_class) if target_class.is_or_derives_from(rel.class_type()) => Ok(()),
        Some(_) => Err(OksError::IncompatibleTarget {
            class: holder_class.to_string(),
            relationship: rel.name().to_string(),
            target: class_name.to_string(),
        }),
        // an unloaded class cannot be checked; bind warns about it
        None => Ok(()),
    }
}

/// Swap the RCR set of a composite relationship from the targets of `old`
/// to the targets of `new`. All edits are undone on failure, so the caller
/// sees all-or-nothing.
pub(crate) fn swap_rcrs(
    st: &mut KernelState,
    parent: ObjIdx,
    rel: &Relationship,
    old: &Value,
    new: &Value,
) -> Result<(), OksError> {
    if !rel.is_composite() {
        return Ok(());
    }
    let mut removed: Vec<ObjIdx> = Vec::new();
    let mut added: Vec<ObjIdx> = Vec::new();

    let rollback = |st: &mut KernelState, removed: &[ObjIdx], added: &[ObjIdx]| {
        for t in added {
            if let Some(o) = st.store.get_mut(*t) {
                o.pop_rcr(parent, rel.name());
            }
        }
        for t in removed {
            if let Some(o) = st.store.get_mut(*t) {
                o.push_rcr(Rcr {
                    parent,
                    relationship: rel.name().clone(),
                });
            }
        }
    };

    for r in references_of(old) {
        if let ObjRef::Resolved(t) = r
            && let Some(o) = st.store.get_mut(*t)
            && o.pop_rcr(parent, rel.name())
        {
            removed.push(*t);
        }
    }
    for r in references_of(new) {
        let ObjRef::Resolved(t) = r else {
            continue;
        };
        let Some(child) = st.store.get_mut(*t) else {
            rollback(st, &removed, &added);
            return Err(OksError::DanglingHandle(*t));
        };
        if rel.is_exclusive() && child.has_other_parent_via(parent, rel.name()) {
            let (class, id) = (child.class_name().clone(), child.id().clone());
            rollback(st, &removed, &added);
            return Err(OksError::ExclusivityViolation {
                class: class.to_string(),
                id: id.to_string(),
                relationship: rel.name().to_string(),
            });
        }
        child.push_rcr(Rcr {
            parent,
            relationship: rel.name().clone(),
        });
        added.push(*t);
    }
    Ok(())
}

/// Recursive destruction with the in-progress set guarding cycles among
/// dependent composites.
pub(crate) fn destroy_inner(
    st: &mut KernelState,
    idx: ObjIdx,
    in_progress: &mut HashSet<ObjIdx>,
    notices: &mut Vec<Notice>,
) -> Result<(), OksError> {
    if !in_progress.insert(idx) {
        return Ok(());
    }
    let Some(object) = st.store.remove(idx) else {
        return Ok(());
    };
    debug!("destroy object {}@{}", object.id(), object.class_name());
    let file = object.file().to_path_buf();
    if st.file(&file).is_some() {
        st.touch_file(&file)?;
    }
    notices.push(Notice::ObjectDeleted(ObjectNotice {
        handle: idx,
        class: object.class_name().clone(),
        id: object.id().clone(),
    }));
    for index in st.indices.values_mut() {
        index.remove_object(idx);
    }

    // release the RCRs this object held on its composite targets, then
    // cascade into orphaned dependent children
    let rels: Vec<(usize, Relationship)> = match st.classes.get(object.class_name()) {
        Some(class) => class
            .all_relationships()
            .iter()
            .enumerate()
            .map(|(j, r)| (class.all_attributes().len() + j, r.member.clone()))
            .collect(),
        None => Vec::new(),
    };
    for (slot, rel) in rels {
        if !rel.is_composite() {
            continue;
        }
        let Some(value) = object.data().get(slot) else {
            continue;
        };
        for r in references_of(value) {
            let ObjRef::Resolved(t) = r else {
                continue;
            };
            let Some(child) = st.store.get_mut(*t) else {
                continue;
            };
            child.pop_rcr(idx, rel.name());
            if rel.is_dependent() && child.rcrs().is_empty() && !in_progress.contains(t) {
                destroy_inner(st, *t, in_progress, notices)?;
            }
        }
    }
    Ok(())
}
