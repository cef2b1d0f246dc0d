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

//! Saving. Every write goes to a freshly probed temporary sibling and is
//! renamed over the destination, so a failed save leaves the old content
//! and mode untouched. File mode is restored after the rename, group
//! ownership best-effort.

use crate::file::{DATA_ROOT_TAG, FileFormat, SCHEMA_ROOT_TAG, process_host, process_user};
use crate::kernel::{KernelState, OksKernel};
use crate::object::write_object;
use crate::{OksError, kernel::absolute_for_new};
use oks_var::{ObjRef, Value};
use oks_xml::XmlOutputStream;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

impl OksKernel {
    pub fn save_schema(&self, path: &Path) -> Result<(), OksError> {
        let mut st = self.state.write().unwrap();
        self.save_schema_locked(&mut st, path)
    }

    pub fn save_data(&self, path: &Path) -> Result<(), OksError> {
        let mut st = self.state.write().unwrap();
        self.save_data_locked(&mut st, path, None, false)
    }

    /// Save a data file in an explicit format; `tolerant` admits
    /// unresolved references (migration dumps).
    pub fn save_data_as_format(
        &self,
        path: &Path,
        format: FileFormat,
        tolerant: bool,
    ) -> Result<(), OksError> {
        if format == FileFormat::Schema {
            return Err(OksError::UnknownFile(path.to_path_buf()));
        }
        let mut st = self.state.write().unwrap();
        self.save_data_locked(&mut st, path, Some(format), tolerant)
    }

    pub fn save_all_schema(&self) -> Result<(), OksError> {
        let mut st = self.state.write().unwrap();
        for path in st.schema_files.keys().cloned().collect::<Vec<_>>() {
            self.save_schema_locked(&mut st, &path)?;
        }
        Ok(())
    }

    pub fn save_all_data(&self) -> Result<(), OksError> {
        let mut st = self.state.write().unwrap();
        for path in st.data_files.keys().cloned().collect::<Vec<_>>() {
            self.save_data_locked(&mut st, &path, None, false)?;
        }
        Ok(())
    }

    /// Rename a file and save it under the new name; a failed save rewinds
    /// the rename.
    pub fn save_as(&self, path: &Path, new_name: &str) -> Result<PathBuf, OksError> {
        let new_full = absolute_for_new(new_name)?;
        let mut st = self.state.write().unwrap();
        let is_schema = st.schema_files.contains_key(path);
        if !is_schema && !st.data_files.contains_key(path) {
            return Err(OksError::UnknownFile(path.to_path_buf()));
        }

        let rewind = |st: &mut KernelState, is_schema: bool, new_full: &Path, old: &Path| {
            let registry = if is_schema {
                &mut st.schema_files
            } else {
                &mut st.data_files
            };
            if let Some(mut f) = registry.shift_remove(new_full) {
                f.set_names(old, old);
                registry.insert(old.to_path_buf(), f);
            }
        };

        {
            let registry = if is_schema {
                &mut st.schema_files
            } else {
                &mut st.data_files
            };
            let mut file = registry.shift_remove(path).unwrap();
            // the on-disk lock belongs to the old name
            file.unlock();
            file.set_names(Path::new(new_name), &new_full);
            registry.insert(new_full.clone(), file);
        }
        if st.active_schema.as_deref() == Some(path) {
            st.active_schema = Some(new_full.clone());
        }
        if st.active_data.as_deref() == Some(path) {
            st.active_data = Some(new_full.clone());
        }

        let saved = if is_schema {
            self.save_schema_locked(&mut st, &new_full)
        } else {
            self.save_data_locked(&mut st, &new_full, None, false)
        };
        if let Err(e) = saved {
            rewind(&mut st, is_schema, &new_full, path);
            if st.active_schema.as_deref() == Some(new_full.as_path()) {
                st.active_schema = Some(path.to_path_buf());
            }
            if st.active_data.as_deref() == Some(new_full.as_path()) {
                st.active_data = Some(path.to_path_buf());
            }
            return Err(e);
        }
        Ok(new_full)
    }

    fn save_schema_locked(&self, st: &mut KernelState, path: &Path) -> Result<(), OksError> {
        if !st.schema_files.contains_key(path) {
            return Err(OksError::UnknownFile(path.to_path_buf()));
        }
        let was_locked = st.schema_files[path].is_locked();
        st.schema_files.get_mut(path).unwrap().lock()?;

        let class_names: Vec<_> = st
            .classes
            .iter()
            .filter(|(_, c)| c.file() == path)
            .map(|(n, _)| n.clone())
            .collect();

        let tmp = tmp_file_for(path);
        let result = (|| -> Result<(), OksError> {
            let out = std::fs::File::create(&tmp)
                .map_err(|e| save_error(path, &tmp, format!("cannot create: {e}")))?;
            let mut s = XmlOutputStream::new(BufWriter::new(out));
            let file = &st.schema_files[path];
            file.write_header(&mut s, class_names.len())
                .map_err(|e| save_error(path, &tmp, e.to_string()))?;
            for name in &class_names {
                st.classes[name]
                    .write_xml(&mut s)
                    .map_err(|e| save_error(path, &tmp, e.to_string()))?;
                s.put_eol()
                    .map_err(|e| save_error(path, &tmp, e.to_string()))?;
            }
            s.put_last_tag(SCHEMA_ROOT_TAG)
                .and_then(|_| s.put_eol())
                .map_err(|e| save_error(path, &tmp, e.to_string()))?;
            s.into_inner()
                .flush()
                .map_err(|e| save_error(path, &tmp, e.to_string()))?;
            commit_tmp(&tmp, path)
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        let file = st.schema_files.get_mut(path).unwrap();
        if result.is_ok() {
            file.set_number_of_items(class_names.len());
            file.set_updated(false);
            file.record_status();
            info!("saved schema '{}' ({} classes)", path.display(), class_names.len());
        }
        if !was_locked && st.active_schema.as_deref() != Some(path) {
            st.schema_files.get_mut(path).unwrap().unlock();
        }
        result
    }

    fn save_data_locked(
        &self,
        st: &mut KernelState,
        path: &Path,
        format_override: Option<FileFormat>,
        tolerant: bool,
    ) -> Result<(), OksError> {
        if !st.data_files.contains_key(path) {
            return Err(OksError::UnknownFile(path.to_path_buf()));
        }
        let was_locked = st.data_files[path].is_locked();
        st.data_files.get_mut(path).unwrap().lock()?;
        if let Some(format) = format_override {
            st.data_files.get_mut(path).unwrap().set_format(format);
        }
        let format = st.data_files[path].format();

        check_consistency(st, path, &self.settings, tolerant)?;

        // per class in schema order, per id in sorted order
        let mut to_write: Vec<(oks_var::Name, oks_var::ObjIdx)> = Vec::new();
        for class_name in st.classes.keys() {
            for id in st.store.sorted_ids_of_class(class_name) {
                if let Some(idx) = st.store.find(class_name, &id)
                    && st.store.get(idx).is_some_and(|o| o.file() == path)
                {
                    to_write.push((class_name.clone(), idx));
                }
            }
        }

        let tmp = tmp_file_for(path);
        let result = (|| -> Result<(), OksError> {
            let out = std::fs::File::create(&tmp)
                .map_err(|e| save_error(path, &tmp, format!("cannot create: {e}")))?;
            let mut s = XmlOutputStream::new(BufWriter::new(out));
            let file = &st.data_files[path];
            file.write_header(&mut s, to_write.len())
                .map_err(|e| save_error(path, &tmp, e.to_string()))?;
            let ident = |i| st.store.identity(i);
            for (class_name, idx) in &to_write {
                let class = &st.classes[class_name];
                let object = st.store.get(*idx).expect("writable object is live");
                write_object(&mut s, object, class, format, &ident)
                    .map_err(|e| save_error(path, &tmp, e.to_string()))?;
            }
            s.put_last_tag(DATA_ROOT_TAG)
                .and_then(|_| s.put_eol())
                .map_err(|e| save_error(path, &tmp, e.to_string()))?;
            s.into_inner()
                .flush()
                .map_err(|e| save_error(path, &tmp, e.to_string()))?;
            commit_tmp(&tmp, path)
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        let file = st.data_files.get_mut(path).unwrap();
        if result.is_ok() {
            file.set_number_of_items(to_write.len());
            file.set_updated(false);
            file.record_status();
            info!("saved data '{}' ({} objects)", path.display(), to_write.len());
        }
        if !was_locked && st.active_data.as_deref() != Some(path) {
            st.data_files.get_mut(path).unwrap().unlock();
        }
        result
    }
}

/// The save-time object checks: dangling-by-include targets and empty
/// required references warn; unresolved references are an error unless the
/// save is tolerant.
fn check_consistency(
    st: &KernelState,
    path: &Path,
    settings: &crate::KernelSettings,
    tolerant: bool,
) -> Result<(), OksError> {
    let closure = st.include_closure(path, settings);
    for (_, object) in st.store.iter().filter(|(_, o)| o.file() == path) {
        let Some(class) = st.classes.get(object.class_name()) else {
            continue;
        };
        let n_attrs = class.all_attributes().len();
        for (j, r) in class.all_relationships().iter().enumerate() {
            let rel = &r.member;
            let Some(value) = object.data().get(n_attrs + j) else {
                continue;
            };
            if rel.low_cc() == oks_common::LowCardinality::One && value.is_empty() {
                warn!(
                    "relationship '{}' of '{}@{}' must not be empty",
                    rel.name(),
                    object.id(),
                    object.class_name()
                );
            }
            let mut refs = Vec::new();
            flatten_refs(value, &mut refs);
            for reference in refs {
                match reference {
                    ObjRef::Nil => {}
                    ObjRef::Resolved(t) => {
                        if let Some(target) = st.store.get(*t)
                            && !closure.contains(&target.file().to_path_buf())
                        {
                            warn!(
                                "'{}@{}' references '{}@{}' of '{}', which '{}' does not include",
                                object.id(),
                                object.class_name(),
                                target.id(),
                                target.class_name(),
                                target.file().display(),
                                path.display()
                            );
                        }
                    }
                    ObjRef::Semi { class, id } => {
                        warn!(
                            "'{}@{}' references '{id}@{class}', which is not loaded",
                            object.id(),
                            object.class_name()
                        );
                    }
                    ObjRef::Unresolved { class, id } => {
                        if tolerant {
                            warn!(
                                "'{}@{}' keeps unresolved reference '{id}@{class}'",
                                object.id(),
                                object.class_name()
                            );
                        } else {
                            return Err(OksError::Consistency {
                                file: path.to_path_buf(),
                                reason: format!(
                                    "'{}@{}' holds unresolved reference '{id}@{class}'",
                                    object.id(),
                                    object.class_name()
                                ),
                            });
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn flatten_refs<'a>(value: &'a Value, out: &mut Vec<&'a ObjRef>) {
    match value {
        Value::Object(r) => out.push(r),
        Value::List(items) => {
            for item in items {
                flatten_refs(item, out);
            }
        }
        _ => {}
    }
}

/// Probe `{path}.{user}:{host}:{pid}:{n}` until a free name comes up.
fn tmp_file_for(path: &Path) -> PathBuf {
    let user = process_user();
    let host = process_host();
    let pid = std::process::id();
    for n in 1..1_000_000u32 {
        let candidate = PathBuf::from(format!("{}.{user}:{host}:{pid}:{n}", path.display()));
        if !candidate.exists() {
            return candidate;
        }
    }
    PathBuf::from(format!("{}.tmp", path.display()))
}

/// Rename the temporary over the destination and restore mode and group.
fn commit_tmp(tmp: &Path, dest: &Path) -> Result<(), OksError> {
    let old_meta = std::fs::metadata(dest).ok();
    std::fs::rename(tmp, dest)
        .map_err(|e| save_error(dest, tmp, format!("rename failed: {e}")))?;
    if let Some(meta) = old_meta {
        if let Err(e) = std::fs::set_permissions(dest, meta.permissions()) {
            warn!("cannot restore mode of '{}': {e}", dest.display());
        }
        #[cfg(unix)]
        {
            use std::os::unix::ffi::OsStrExt;
            use std::os::unix::fs::MetadataExt;
            if let Ok(c_path) = std::ffi::CString::new(dest.as_os_str().as_bytes()) {
                // keep the owner, best-effort restore of the group
                let rc = unsafe { libc::chown(c_path.as_ptr(), !0, meta.gid()) };
                if rc != 0 {
                    warn!("cannot restore group of '{}'", dest.display());
                }
            }
        }
    }
    Ok(())
}

fn save_error(file: &Path, tmp: &Path, reason: String) -> OksError {
    OksError::Save {
        file: file.to_path_buf(),
        tmp: tmp.to_path_buf(),
        reason,
    }
}
