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

use crate::OksError;
use crate::object::OksObject;
use ahash::AHashMap;
use oks_var::{Name, ObjIdx};

/// The arena every loaded object lives in. Slots are reused through a free
/// list; each reuse bumps the slot's generation, so a handle held across a
/// destroy can never alias a newer tenant. Identity lookups go through the
/// per-class id registries.
#[derive(Debug, Default)]
pub struct ObjectStore {
    slots: Vec<Option<OksObject>>,
    generations: Vec<u32>,
    free: Vec<u32>,
    by_class: AHashMap<Name, AHashMap<Name, ObjIdx>>,
    count: usize,
}

impl ObjectStore {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, idx: ObjIdx) -> Option<&OksObject> {
        let slot = self.slots.get(idx.slot as usize)?;
        if self.generations[idx.slot as usize] != idx.generation {
            return None;
        }
        slot.as_ref()
    }

    pub fn get_mut(&mut self, idx: ObjIdx) -> Option<&mut OksObject> {
        let slot = self.slots.get_mut(idx.slot as usize)?;
        if self.generations[idx.slot as usize] != idx.generation {
            return None;
        }
        slot.as_mut()
    }

    /// `(class, id)` of a live handle; the resolver object references
    /// compare and serialize through.
    pub fn identity(&self, idx: ObjIdx) -> Option<(Name, Name)> {
        self.get(idx)
            .map(|o| (o.class_name().clone(), o.id().clone()))
    }

    pub fn find(&self, class: &str, id: &str) -> Option<ObjIdx> {
        self.by_class.get(class)?.get(id).copied()
    }

    pub fn class_population(&self, class: &str) -> usize {
        self.by_class.get(class).map(|m| m.len()).unwrap_or(0)
    }

    /// Handles of every object of exactly this class.
    pub fn objects_of_class(&self, class: &str) -> Vec<ObjIdx> {
        self.by_class
            .get(class)
            .map(|m| m.values().copied().collect())
            .unwrap_or_default()
    }

    /// Ids of a class, sorted; saves iterate in this order.
    pub fn sorted_ids_of_class(&self, class: &str) -> Vec<Name> {
        let mut ids: Vec<Name> = self
            .by_class
            .get(class)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjIdx, &OksObject)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.as_ref().map(|o| {
                (
                    ObjIdx {
                        slot: i as u32,
                        generation: self.generations[i],
                    },
                    o,
                )
            })
        })
    }

    pub fn handles(&self) -> Vec<ObjIdx> {
        self.iter().map(|(idx, _)| idx).collect()
    }

    /// Insert a new object; fails when the id is taken within its class.
    pub fn insert(&mut self, object: OksObject) -> Result<ObjIdx, OksError> {
        let registry = self.by_class.entry(object.class_name().clone()).or_default();
        if registry.contains_key(object.id()) {
            return Err(OksError::DuplicateObject {
                class: object.class_name().to_string(),
                id: object.id().to_string(),
            });
        }
        let idx = match self.free.pop() {
            Some(slot) => ObjIdx {
                slot,
                generation: self.generations[slot as usize],
            },
            None => {
                self.slots.push(None);
                self.generations.push(0);
                ObjIdx {
                    slot: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        registry.insert(object.id().clone(), idx);
        self.slots[idx.slot as usize] = Some(object);
        self.count += 1;
        Ok(idx)
    }

    /// Remove and return; the slot's generation is bumped so the handle
    /// goes stale immediately.
    pub fn remove(&mut self, idx: ObjIdx) -> Option<OksObject> {
        self.get(idx)?;
        let object = self.slots[idx.slot as usize].take()?;
        self.generations[idx.slot as usize] += 1;
        self.free.push(idx.slot);
        self.count -= 1;
        if let Some(registry) = self.by_class.get_mut(object.class_name()) {
            registry.remove(object.id());
            if registry.is_empty() {
                self.by_class.remove(object.class_name());
            }
        }
        Some(object)
    }

    /// Re-key an object under a new id. The caller has checked uniqueness
    /// policy; this enforces plain per-class uniqueness.
    pub fn rename(&mut self, idx: ObjIdx, new_id: &str) -> Result<(), OksError> {
        let Some(object) = self.get(idx) else {
            return Err(OksError::DanglingHandle(idx));
        };
        let class = object.class_name().clone();
        let old_id = object.id().clone();
        if old_id.as_str() == new_id {
            return Ok(());
        }
        let registry = self.by_class.entry(class.clone()).or_default();
        if registry.contains_key(new_id) {
            return Err(OksError::DuplicateObject {
                class: class.to_string(),
                id: new_id.to_string(),
            });
        }
        registry.remove(&old_id);
        let new_id = Name::from(new_id);
        registry.insert(new_id.clone(), idx);
        self.get_mut(idx).unwrap().set_id(new_id);
        Ok(())
    }

    /// A free id derived from `seed` by `^N` probing.
    pub fn unique_id(&self, class: &str, seed: &str) -> Name {
        let seed = if seed.is_empty() { class } else { seed };
        let mut n = 1u64;
        loop {
            let candidate = format!("{seed}^{n}");
            if self.find(class, &candidate).is_none() {
                return Name::from(candidate);
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn obj(class: &str, id: &str) -> OksObject {
        OksObject::bare(Name::from(class), Name::from(id), Path::new("f.data.xml"))
    }

    #[test]
    fn insert_find_remove() {
        let mut store = ObjectStore::default();
        let a = store.insert(obj("A", "a1")).unwrap();
        assert_eq!(store.find("A", "a1"), Some(a));
        assert_eq!(store.len(), 1);
        assert!(store.insert(obj("A", "a1")).is_err());

        let gone = store.remove(a).unwrap();
        assert_eq!(gone.id().as_str(), "a1");
        assert_eq!(store.find("A", "a1"), None);
        assert!(store.get(a).is_none());
    }

    #[test]
    fn generations_keep_stale_handles_stale() {
        let mut store = ObjectStore::default();
        let a = store.insert(obj("A", "a1")).unwrap();
        store.remove(a);
        let b = store.insert(obj("A", "a2")).unwrap();
        // slot reused, generation bumped
        assert_eq!(a.slot, b.slot);
        assert_ne!(a.generation, b.generation);
        assert!(store.get(a).is_none());
        assert!(store.get(b).is_some());
    }

    #[test]
    fn rename_re_keys() {
        let mut store = ObjectStore::default();
        let a = store.insert(obj("A", "a1")).unwrap();
        store.insert(obj("A", "a2")).unwrap();
        assert!(store.rename(a, "a2").is_err());
        store.rename(a, "a3").unwrap();
        assert_eq!(store.find("A", "a3"), Some(a));
        assert_eq!(store.find("A", "a1"), None);
    }

    #[test]
    fn unique_ids_probe() {
        let mut store = ObjectStore::default();
        store.insert(obj("A", "A^1")).unwrap();
        let id = store.unique_id("A", "");
        assert_eq!(id.as_str(), "A^2");
    }
}
