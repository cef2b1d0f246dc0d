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

use crate::file::{FileFormat, OksFile};
use crate::index::AttributeIndex;
use crate::settings::KernelSettings;
use crate::store::ObjectStore;
use crate::{OksError, path};
use ahash::AHashMap;
use indexmap::IndexMap;
use oks_common::{ChangeKind, Class, ClassMap};
use oks_var::{Name, ObjIdx, Value};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

/// Everything a kernel owns, behind its one state lock: file registries
/// keyed by canonical path, the class map, the object arena, indices, and
/// the active-file selectors.
#[derive(Default)]
pub(crate) struct KernelState {
    pub schema_files: IndexMap<PathBuf, OksFile>,
    pub data_files: IndexMap<PathBuf, OksFile>,
    pub classes: ClassMap,
    pub store: ObjectStore,
    pub indices: AHashMap<(Name, Name), AttributeIndex>,
    pub active_schema: Option<PathBuf>,
    pub active_data: Option<PathBuf>,
}

impl KernelState {
    pub fn file(&self, path: &Path) -> Option<&OksFile> {
        self.data_files
            .get(path)
            .or_else(|| self.schema_files.get(path))
    }

    pub fn file_mut(&mut self, path: &Path) -> Option<&mut OksFile> {
        self.data_files
            .get_mut(path)
            .or_else(|| self.schema_files.get_mut(path))
    }

    pub fn class_of(&self, idx: ObjIdx) -> Result<&Class, OksError> {
        let object = self.store.get(idx).ok_or(OksError::DanglingHandle(idx))?;
        self.classes
            .get(object.class_name())
            .ok_or_else(|| OksError::UnknownClass(object.class_name().to_string()))
    }

    /// Mark a mutated file: take its on-disk lock if not yet held and
    /// remember it needs saving.
    pub fn touch_file(&mut self, path: &Path) -> Result<(), OksError> {
        let file = self
            .file_mut(path)
            .ok_or_else(|| OksError::UnknownFile(path.to_path_buf()))?;
        if !file.is_locked() {
            file.lock()?;
        }
        file.set_updated(true);
        Ok(())
    }

    /// The transitive include closure of a file, canonical paths.
    pub fn include_closure(&self, root: &Path, settings: &KernelSettings) -> Vec<PathBuf> {
        let mut out = vec![root.to_path_buf()];
        let mut at = 0;
        while at < out.len() {
            let current = out[at].clone();
            at += 1;
            if let Some(file) = self.file(&current) {
                let dir = current.parent().map(Path::to_path_buf);
                for include in file.includes() {
                    if let Ok(full) =
                        path::resolve_file_path(settings, include, dir.as_deref())
                        && !out.contains(&full)
                    {
                        out.push(full);
                    }
                }
            }
        }
        out
    }
}

/// The identity an object notification speaks about. `Deleted` notices
/// carry a handle that is already stale; class and id stay usable.
#[derive(Debug, Clone)]
pub struct ObjectNotice {
    pub handle: ObjIdx,
    pub class: Name,
    pub id: Name,
}

pub type ObjectCallback = Box<dyn Fn(&OksKernel, &ObjectNotice) + Send + Sync>;
pub type ClassCallback = Box<dyn Fn(&OksKernel, &Name) + Send + Sync>;
pub type ClassModifiedCallback =
    Box<dyn Fn(&OksKernel, &Name, ChangeKind, Option<&str>) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    create_object: RwLock<Vec<Option<ObjectCallback>>>,
    change_object: RwLock<Vec<Option<ObjectCallback>>>,
    delete_object: RwLock<Vec<Option<ObjectCallback>>>,
    class_created: RwLock<Vec<Option<ClassCallback>>>,
    class_modified: RwLock<Vec<Option<ClassModifiedCallback>>>,
    class_deleted: RwLock<Vec<Option<ClassCallback>>>,
}

/// A pending notification, recorded under the state lock and dispatched
/// after it is released, from the mutating thread, in mutation order.
#[derive(Debug)]
pub(crate) enum Notice {
    ObjectCreated(ObjectNotice),
    ObjectChanged(ObjectNotice),
    ObjectDeleted(ObjectNotice),
    ClassCreated(Name),
    ClassModified(Name, ChangeKind, Option<String>),
    ClassDeleted(Name),
}

/// Token returned by the subscribe calls; feed it back to the matching
/// unsubscribe.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CallbackId(usize);

/// The owner and coordinator: registries of files, classes and objects,
/// load/save/reload orchestration, binding, notification fan-out.
pub struct OksKernel {
    pub(crate) settings: KernelSettings,
    pub(crate) state: RwLock<KernelState>,
    callbacks: Callbacks,
}

impl Default for OksKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OksKernel {
    fn drop(&mut self) {
        // a clean exit leaves no lock siblings behind; a crashed holder
        // does, and the operator removes them
        if let Ok(st) = self.state.get_mut() {
            for file in st
                .schema_files
                .values_mut()
                .chain(st.data_files.values_mut())
            {
                file.unlock();
            }
        }
    }
}

impl OksKernel {
    /// A kernel with settings taken from the process environment.
    pub fn new() -> OksKernel {
        Self::with_settings(KernelSettings::from_env())
    }

    pub fn with_settings(settings: KernelSettings) -> OksKernel {
        debug!(
            "new kernel; search path {:?}, pool size {}",
            settings.search_path,
            settings.effective_pool_size()
        );
        OksKernel {
            settings,
            state: RwLock::new(KernelState::default()),
            callbacks: Callbacks::default(),
        }
    }

    pub fn settings(&self) -> &KernelSettings {
        &self.settings
    }

    /// Resolve a file reference against the search list, the repository,
    /// and the including file's directory.
    pub fn get_file_path(
        &self,
        name: &str,
        including: Option<&Path>,
    ) -> Result<PathBuf, OksError> {
        let dir = including.and_then(Path::parent).map(Path::to_path_buf);
        crate::path::resolve_file_path(&self.settings, name, dir.as_deref())
    }

    // ---- schema & object queries (shared lock) ----

    pub fn class_names(&self) -> Vec<Name> {
        self.state.read().unwrap().classes.keys().cloned().collect()
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.state.read().unwrap().classes.contains_key(name)
    }

    /// Run `f` against a class under the shared lock.
    pub fn with_class<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Class) -> T,
    ) -> Result<T, OksError> {
        let st = self.state.read().unwrap();
        let class = st
            .classes
            .get(name)
            .ok_or_else(|| OksError::UnknownClass(name.to_string()))?;
        Ok(f(class))
    }

    pub fn get_object(&self, class: &str, id: &str) -> Option<ObjIdx> {
        self.state.read().unwrap().store.find(class, id)
    }

    pub fn object_identity(&self, idx: ObjIdx) -> Option<(Name, Name)> {
        self.state.read().unwrap().store.identity(idx)
    }

    pub fn object_file(&self, idx: ObjIdx) -> Option<PathBuf> {
        self.state
            .read()
            .unwrap()
            .store
            .get(idx)
            .map(|o| o.file().to_path_buf())
    }

    pub fn objects_of_class(&self, class: &str) -> Vec<ObjIdx> {
        self.state.read().unwrap().store.objects_of_class(class)
    }

    /// Objects of a class and all of its subclasses.
    pub fn objects_of_class_deep(&self, class: &str) -> Vec<ObjIdx> {
        let st = self.state.read().unwrap();
        let Some(c) = st.classes.get(class) else {
            return Vec::new();
        };
        let mut out = st.store.objects_of_class(class);
        for sub in c.all_sub_classes() {
            out.extend(st.store.objects_of_class(sub));
        }
        out
    }

    pub fn number_of_objects(&self) -> usize {
        self.state.read().unwrap().store.len()
    }

    /// The reverse composite references currently held on an object.
    pub fn object_rcrs(&self, idx: ObjIdx) -> Result<Vec<(ObjIdx, Name)>, OksError> {
        let st = self.state.read().unwrap();
        let object = st.store.get(idx).ok_or(OksError::DanglingHandle(idx))?;
        Ok(object
            .rcrs()
            .iter()
            .map(|r| (r.parent, r.relationship.clone()))
            .collect())
    }

    /// The value held in a member slot, by member name.
    pub fn get_value(&self, idx: ObjIdx, member: &str) -> Result<Value, OksError> {
        let st = self.state.read().unwrap();
        let object = st.store.get(idx).ok_or(OksError::DanglingHandle(idx))?;
        let class = st.class_of(idx)?;
        let info = class
            .slot_of(member)
            .ok_or_else(|| OksError::NoSuchMember {
                class: class.name().to_string(),
                what: "member",
                member: member.to_string(),
            })?;
        Ok(object.data()[info.slot].clone())
    }

    // ---- files ----

    pub fn schema_file_names(&self) -> Vec<PathBuf> {
        self.state.read().unwrap().schema_files.keys().cloned().collect()
    }

    pub fn data_file_names(&self) -> Vec<PathBuf> {
        self.state.read().unwrap().data_files.keys().cloned().collect()
    }

    pub fn with_file<T>(
        &self,
        path: &Path,
        f: impl FnOnce(&OksFile) -> T,
    ) -> Result<T, OksError> {
        let st = self.state.read().unwrap();
        let file = st
            .file(path)
            .ok_or_else(|| OksError::UnknownFile(path.to_path_buf()))?;
        Ok(f(file))
    }

    pub fn active_schema(&self) -> Option<PathBuf> {
        self.state.read().unwrap().active_schema.clone()
    }

    pub fn active_data(&self) -> Option<PathBuf> {
        self.state.read().unwrap().active_data.clone()
    }

    pub fn set_active_schema(&self, path: Option<&Path>) -> Result<(), OksError> {
        let mut st = self.state.write().unwrap();
        if let Some(p) = path
            && !st.schema_files.contains_key(p)
        {
            return Err(OksError::UnknownFile(p.to_path_buf()));
        }
        st.active_schema = path.map(Path::to_path_buf);
        Ok(())
    }

    pub fn set_active_data(&self, path: Option<&Path>) -> Result<(), OksError> {
        let mut st = self.state.write().unwrap();
        if let Some(p) = path
            && !st.data_files.contains_key(p)
        {
            return Err(OksError::UnknownFile(p.to_path_buf()));
        }
        st.active_data = path.map(Path::to_path_buf);
        Ok(())
    }

    /// A fresh schema file, in memory until its first save, made active.
    pub fn new_schema(&self, name: &str) -> Result<PathBuf, OksError> {
        self.new_file(name, FileFormat::Schema)
    }

    /// A fresh data file, in memory until its first save, made active.
    pub fn new_data(&self, name: &str, format: FileFormat) -> Result<PathBuf, OksError> {
        if format == FileFormat::Schema {
            return Err(OksError::UnknownFile(PathBuf::from(name)));
        }
        self.new_file(name, format)
    }

    fn new_file(&self, name: &str, format: FileFormat) -> Result<PathBuf, OksError> {
        let full = absolute_for_new(name)?;
        let mut st = self.state.write().unwrap();
        if st.file(&full).is_some() {
            return Ok(full);
        }
        let file = OksFile::create(Path::new(name), &full, "", "", format);
        info!("new {format} file '{}'", full.display());
        if format == FileFormat::Schema {
            st.schema_files.insert(full.clone(), file);
            st.active_schema = Some(full.clone());
        } else {
            st.data_files.insert(full.clone(), file);
            st.active_data = Some(full.clone());
        }
        Ok(full)
    }

    /// Add an include to a loaded file and load the included file.
    pub fn add_include(&self, file: &Path, include: &str) -> Result<PathBuf, OksError> {
        {
            let mut st = self.state.write().unwrap();
            let f = st
                .file_mut(file)
                .ok_or_else(|| OksError::UnknownFile(file.to_path_buf()))?;
            if self.settings.repository_root.is_some() {
                path::validate_repository_include(file, include)?;
            }
            f.add_include(include);
            st.touch_file(file)?;
        }
        self.load_file_included_by(include, file)
    }

    // ---- notifications ----

    pub fn subscribe_create_object(&self, f: ObjectCallback) -> CallbackId {
        let mut v = self.callbacks.create_object.write().unwrap();
        v.push(Some(f));
        CallbackId(v.len() - 1)
    }

    pub fn subscribe_change_object(&self, f: ObjectCallback) -> CallbackId {
        let mut v = self.callbacks.change_object.write().unwrap();
        v.push(Some(f));
        CallbackId(v.len() - 1)
    }

    pub fn subscribe_delete_object(&self, f: ObjectCallback) -> CallbackId {
        let mut v = self.callbacks.delete_object.write().unwrap();
        v.push(Some(f));
        CallbackId(v.len() - 1)
    }

    pub fn subscribe_class_created(&self, f: ClassCallback) -> CallbackId {
        let mut v = self.callbacks.class_created.write().unwrap();
        v.push(Some(f));
        CallbackId(v.len() - 1)
    }

    pub fn subscribe_class_modified(&self, f: ClassModifiedCallback) -> CallbackId {
        let mut v = self.callbacks.class_modified.write().unwrap();
        v.push(Some(f));
        CallbackId(v.len() - 1)
    }

    pub fn subscribe_class_deleted(&self, f: ClassCallback) -> CallbackId {
        let mut v = self.callbacks.class_deleted.write().unwrap();
        v.push(Some(f));
        CallbackId(v.len() - 1)
    }

    pub fn unsubscribe_create_object(&self, id: CallbackId) {
        if let Some(slot) = self.callbacks.create_object.write().unwrap().get_mut(id.0) {
            *slot = None;
        }
    }

    pub fn unsubscribe_change_object(&self, id: CallbackId) {
        if let Some(slot) = self.callbacks.change_object.write().unwrap().get_mut(id.0) {
            *slot = None;
        }
    }

    pub fn unsubscribe_delete_object(&self, id: CallbackId) {
        if let Some(slot) = self.callbacks.delete_object.write().unwrap().get_mut(id.0) {
            *slot = None;
        }
    }

    pub(crate) fn dispatch(&self, notices: Vec<Notice>) {
        for notice in notices {
            match &notice {
                Notice::ObjectCreated(n) => {
                    for cb in self.callbacks.create_object.read().unwrap().iter().flatten() {
                        cb(self, n);
                    }
                }
                Notice::ObjectChanged(n) => {
                    for cb in self.callbacks.change_object.read().unwrap().iter().flatten() {
                        cb(self, n);
                    }
                }
                Notice::ObjectDeleted(n) => {
                    for cb in self.callbacks.delete_object.read().unwrap().iter().flatten() {
                        cb(self, n);
                    }
                }
                Notice::ClassCreated(name) => {
                    for cb in self.callbacks.class_created.read().unwrap().iter().flatten() {
                        cb(self, name);
                    }
                }
                Notice::ClassModified(name, kind, hint) => {
                    for cb in self.callbacks.class_modified.read().unwrap().iter().flatten() {
                        cb(self, name, *kind, hint.as_deref());
                    }
                }
                Notice::ClassDeleted(name) => {
                    for cb in self.callbacks.class_deleted.read().unwrap().iter().flatten() {
                        cb(self, name);
                    }
                }
            }
        }
    }
}

/// The canonical path a not-yet-existing file will get: canonical parent
/// plus file name.
pub(crate) fn absolute_for_new(name: &str) -> Result<PathBuf, OksError> {
    let p = PathBuf::from(path::substitute_env(name));
    let p = if p.is_absolute() {
        p
    } else {
        std::env::current_dir()
            .map_err(|e| OksError::file("resolve", Path::new(name), e))?
            .join(p)
    };
    let parent = p.parent().unwrap_or(Path::new("/"));
    let file_name = p.file_name().ok_or_else(|| {
        OksError::file(
            "resolve",
            &p,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
        )
    })?;
    match path::canonical_path(parent) {
        Ok(parent) => Ok(parent.join(file_name)),
        Err(_) => Ok(p),
    }
}
