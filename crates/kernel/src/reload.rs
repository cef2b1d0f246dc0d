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

//! Incremental reloading of data files that changed on disk: surviving
//! objects are re-parsed in place (keeping their handles and incoming
//! RCRs), disappeared objects are detached, new objects and newly included
//! files join the world, and the whole state is re-bound.

use crate::file::OksFile;
use crate::kernel::{KernelState, Notice, ObjectNotice, OksKernel};
use crate::load::{bind_objects, detach_object, parse_data_file};
use crate::schema_ops::check_inherited_duplicates;
use crate::OksError;
use oks_var::{Name, ObjIdx, ObjRef, Value};
use oks_xml::XmlInputStream;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::{debug, info};

impl OksKernel {
    /// Reload a set of data files after external modification. Schema
    /// files cannot reload.
    pub fn reload_data(&self, files: &[PathBuf]) -> Result<(), OksError> {
        let mut notices = Vec::new();
        {
            let mut st = self.state.write().unwrap();

            // only loaded data files qualify; release our locks up front
            for f in files {
                if st.schema_files.contains_key(f) {
                    return Err(OksError::CannotReloadSchema(f.clone()));
                }
                if !st.data_files.contains_key(f) {
                    return Err(OksError::UnknownFile(f.clone()));
                }
            }
            for f in files {
                st.data_files.get_mut(f).unwrap().unlock();
            }
            info!("reloading {} data file(s)", files.len());

            // candidates: everything the reloaded files currently own
            let target_set: HashSet<&PathBuf> = files.iter().collect();
            let mut candidates: HashMap<(Name, Name), ObjIdx> = st
                .store
                .iter()
                .filter(|(_, o)| target_set.contains(&o.file().to_path_buf()))
                .map(|(idx, o)| ((o.class_name().clone(), o.id().clone()), idx))
                .collect();
            debug!("{} candidate object(s) for reload", candidates.len());

            // refresh headers; new includes (and their data) join the world
            let mut pending_new = Vec::new();
            for f in files {
                let handle = File::open(f).map_err(|e| OksError::file("open", f, e))?;
                let mut stream = XmlInputStream::new(BufReader::new(handle));
                let (header, _) = OksFile::read_header(f, f, &mut stream)?;
                let includes = header.includes().to_vec();
                {
                    let file = st.data_files.get_mut(f).unwrap();
                    file.set_includes(includes.clone());
                    file.set_format(header.format());
                }
                for include in &includes {
                    self.load_rec(&mut st, include, Some(f.as_path()), &mut pending_new, &mut notices)?;
                }
            }

            // the RCRs candidates hold are dropped; re-parsing and the
            // bind pass reinstall whatever edges survive
            release_held_rcrs(&mut st, candidates.values().copied());

            // re-parse each target file, updating survivors in place
            for f in files {
                let format = st.data_files[f].format();
                let (_, objects) =
                    parse_data_file(&st.classes, f, format).map_err(|(_, e)| e)?;
                let count = objects.len();
                let mut fresh = Vec::new();
                for parsed in objects {
                    let key = (parsed.class_name().clone(), parsed.id().clone());
                    match candidates.remove(&key) {
                        Some(idx) => {
                            let data = parsed.into_data();
                            let object = st.store.get_mut(idx).expect("candidate is live");
                            *object.data_mut() = data;
                            object.set_file(f);
                            notices.push(Notice::ObjectChanged(ObjectNotice {
                                handle: idx,
                                class: key.0,
                                id: key.1,
                            }));
                        }
                        None => fresh.push(parsed),
                    }
                }
                for idx in self.integrate_objects(&mut st, f, fresh)? {
                    let (class, id) = st.store.identity(idx).expect("just inserted");
                    notices.push(Notice::ObjectCreated(ObjectNotice {
                        handle: idx,
                        class,
                        id,
                    }));
                }
                let file = st.data_files.get_mut(f).unwrap();
                file.set_number_of_items(count);
                file.set_updated(false);
                file.record_status();
            }

            // everything still in the candidate map vanished from its file
            let disappeared: Vec<ObjIdx> = candidates.into_values().collect();
            for idx in disappeared {
                detach_object(&mut st, idx, &mut notices);
            }

            // parse data files brought in by new includes
            for idx in self.parse_data_files(&mut st, pending_new)? {
                let (class, id) = st.store.identity(idx).expect("just inserted");
                notices.push(Notice::ObjectCreated(ObjectNotice {
                    handle: idx,
                    class,
                    id,
                }));
            }

            // drop data files no root can reach anymore
            self.close_unreachable(&mut st, &mut notices);

            bind_objects(&mut st).log();
            if self.settings.test_duplicated_objects_via_inheritance {
                check_inherited_duplicates(&st);
            }
        }
        self.dispatch(notices);
        Ok(())
    }

    /// Files with no including parent are roots; every data file outside
    /// the union of their include closures gets closed. Schema files stay:
    /// reload never unloads schema.
    fn close_unreachable(&self, st: &mut KernelState, notices: &mut Vec<Notice>) {
        let roots: Vec<PathBuf> = st
            .schema_files
            .iter()
            .chain(st.data_files.iter())
            .filter(|(_, f)| f.parent().is_none())
            .map(|(p, _)| p.clone())
            .collect();
        let mut reachable: HashSet<PathBuf> = HashSet::new();
        for root in &roots {
            reachable.extend(st.include_closure(root, &self.settings));
        }
        let doomed: Vec<PathBuf> = st
            .data_files
            .keys()
            .filter(|p| !reachable.contains(*p))
            .cloned()
            .collect();
        for p in doomed {
            info!("closing '{}': no longer included", p.display());
            let dead: Vec<ObjIdx> = st
                .store
                .iter()
                .filter(|(_, o)| o.file() == p)
                .map(|(idx, _)| idx)
                .collect();
            for idx in dead {
                detach_object(st, idx, notices);
            }
            if let Some(mut f) = st.data_files.shift_remove(&p) {
                f.unlock();
            }
            if st.active_data.as_deref() == Some(p.as_path()) {
                st.active_data = None;
            }
        }
    }
}

/// Drop every RCR the given parents hold on anyone.
fn release_held_rcrs(st: &mut KernelState, parents: impl Iterator<Item = ObjIdx>) {
    for parent in parents {
        let Some(object) = st.store.get(parent) else {
            continue;
        };
        let Some(class) = st.classes.get(object.class_name()) else {
            continue;
        };
        let n_attrs = class.all_attributes().len();
        let mut held: Vec<(ObjIdx, Name)> = Vec::new();
        for (j, r) in class.all_relationships().iter().enumerate() {
            if !r.member.is_composite() {
                continue;
            }
            if let Some(value) = object.data().get(n_attrs + j) {
                collect_targets(value, r.member.name(), &mut held);
            }
        }
        for (target, rel_name) in held {
            if let Some(child) = st.store.get_mut(target) {
                child.pop_rcr(parent, &rel_name);
            }
        }
    }
}

fn collect_targets(value: &Value, rel: &Name, out: &mut Vec<(ObjIdx, Name)>) {
    match value {
        Value::Object(ObjRef::Resolved(t)) => out.push((*t, rel.clone())),
        Value::List(items) => {
            for item in items {
                collect_targets(item, rel, out);
            }
        }
        _ => {}
    }
}
