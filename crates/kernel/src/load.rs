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

//! Loading: path resolution, recursive include processing, single-threaded
//! schema parsing, the worker pool that parses data files in parallel, and
//! the bind pass that rewrites textual references to live handles.

use crate::file::{FileFormat, OksFile};
use crate::kernel::{KernelState, Notice, ObjectNotice, OksKernel};
use crate::object::{OksObject, Rcr, ReadCtx, read_object, read_object_after_tag};
use crate::schema_ops::{check_inherited_duplicates, remove_classes_of_file};
use crate::{OksError, path};
use oks_common::{Class, ClassMap, LowCardinality, registrate_classes};
use oks_var::{Name, ObjRef, OksDataType, Value};
use oks_xml::XmlInputStream;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

impl OksKernel {
    /// Load a schema or data file (and, recursively, everything it
    /// includes), then bind. Loading an already-loaded file is a no-op
    /// that returns the existing handle.
    pub fn load_file(&self, name: &str) -> Result<PathBuf, OksError> {
        self.load(name, None)
    }

    /// Like [`OksKernel::load_file`], checking the result is a schema.
    pub fn load_schema(&self, name: &str) -> Result<PathBuf, OksError> {
        let full = self.load(name, None)?;
        let st = self.state.read().unwrap();
        if !st.schema_files.contains_key(&full) {
            return Err(OksError::UnknownFile(full));
        }
        Ok(full)
    }

    /// Like [`OksKernel::load_file`], checking the result is a data file.
    pub fn load_data(&self, name: &str) -> Result<PathBuf, OksError> {
        let full = self.load(name, None)?;
        let st = self.state.read().unwrap();
        if !st.data_files.contains_key(&full) {
            return Err(OksError::UnknownFile(full));
        }
        Ok(full)
    }

    pub(crate) fn load_file_included_by(
        &self,
        name: &str,
        parent: &Path,
    ) -> Result<PathBuf, OksError> {
        self.load(name, Some(parent.to_path_buf()))
    }

    fn load(&self, name: &str, parent: Option<PathBuf>) -> Result<PathBuf, OksError> {
        let mut notices = Vec::new();
        let root = {
            let mut st = self.state.write().unwrap();
            let mut pending = Vec::new();
            let root = self.load_rec(&mut st, name, parent.as_deref(), &mut pending, &mut notices)?;

            if !st.classes.is_empty() || !pending.is_empty() {
                let warnings = registrate_classes(&mut st.classes)?;
                for w in &warnings {
                    warn!("{w}");
                }
            }
            self.parse_data_files(&mut st, pending)?;

            let report = bind_objects(&mut st);
            report.log();
            if self.settings.test_duplicated_objects_via_inheritance {
                check_inherited_duplicates(&st);
            }
            root
        };
        self.dispatch(notices);
        Ok(root)
    }

    /// Open one file, read its header, recurse into its includes. Schema
    /// bodies parse inline (single-threaded under the kernel lock); data
    /// bodies are queued for the parallel pipeline.
    pub(crate) fn load_rec(
        &self,
        st: &mut KernelState,
        name: &str,
        parent: Option<&Path>,
        pending: &mut Vec<(PathBuf, FileFormat)>,
        notices: &mut Vec<Notice>,
    ) -> Result<PathBuf, OksError> {
        let including_dir = parent.and_then(Path::parent);
        let full = path::resolve_file_path(&self.settings, name, including_dir)?;

        if let Some(existing) = st.file_mut(&full) {
            // a second include of a loaded file only re-records parentage
            if existing.parent() != parent {
                existing.set_parent(parent);
            }
            return Ok(full);
        }

        info!("loading '{}'", full.display());
        let f = File::open(&full).map_err(|e| OksError::file("open", &full, e))?;
        let mut stream = XmlInputStream::new(BufReader::new(f));
        let (mut file, mut next_tag) =
            OksFile::read_header(Path::new(name), &full, &mut stream)?;
        file.set_parent(parent);
        file.record_status();
        file.check_read_only();
        let format = file.format();
        let includes = file.includes().to_vec();

        let in_repository = self
            .settings
            .repository_root
            .as_ref()
            .is_some_and(|root| full.starts_with(root));

        if format == FileFormat::Schema {
            st.schema_files.insert(full.clone(), file);
        } else {
            st.data_files.insert(full.clone(), file);
        }

        for include in &includes {
            if in_repository {
                path::validate_repository_include(&full, include)?;
            }
            self.load_rec(st, include, Some(&full), pending, notices)?;
        }

        match format {
            FileFormat::Schema => {
                let mut count = 0usize;
                loop {
                    let Some(tag) = next_tag.take() else { break };
                    match tag.as_str() {
                        "class" => {
                            let class = Class::read_xml(
                                &mut stream,
                                &full,
                                self.settings.skip_string_range,
                            )?;
                            let class_name = class.name().clone();
                            if st.classes.contains_key(&class_name) {
                                if !self.settings.allow_duplicated_classes {
                                    return Err(oks_common::SchemaError::DuplicateClass(
                                        class_name.to_string(),
                                    )
                                    .into());
                                }
                                warn!(
                                    "class '{class_name}' of '{}' is already defined; later definition ignored",
                                    full.display()
                                );
                            } else {
                                st.classes.insert(class_name.clone(), class);
                                notices.push(Notice::ClassCreated(class_name));
                                count += 1;
                            }
                        }
                        "/oks-schema" => break,
                        other => {
                            return Err(OksError::parse(
                                &full,
                                stream.unexpected_tag(other, "class"),
                            ));
                        }
                    }
                    next_tag = stream.get_tag_start().map_err(|e| OksError::parse(&full, e))?;
                }
                if let Some(f) = st.schema_files.get_mut(&full) {
                    f.set_number_of_items(count);
                }
            }
            _ => pending.push((full.clone(), format)),
        }
        Ok(full)
    }

    /// Parse the queued data files, each in its own worker task, and
    /// integrate the results. Pool size 1 parses in-thread. Returns the
    /// handles of every inserted object.
    pub(crate) fn parse_data_files(
        &self,
        st: &mut KernelState,
        pending: Vec<(PathBuf, FileFormat)>,
    ) -> Result<Vec<oks_var::ObjIdx>, OksError> {
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.settings.effective_pool_size().min(pending.len());
        debug!("parsing {} data file(s) with {pool} worker(s)", pending.len());

        type ParseResult = Result<(PathBuf, Vec<OksObject>), (PathBuf, OksError)>;
        let classes = &st.classes;
        let results: Vec<ParseResult> = if pool <= 1 {
            pending
                .iter()
                .map(|(p, f)| parse_data_file(classes, p, *f))
                .collect()
        } else {
            std::thread::scope(|scope| {
                let (job_tx, job_rx) = flume::unbounded::<(PathBuf, FileFormat)>();
                let (result_tx, result_rx) = flume::unbounded::<ParseResult>();
                for job in pending.iter().cloned() {
                    job_tx.send(job).expect("job queue open");
                }
                drop(job_tx);
                for _ in 0..pool {
                    let job_rx = job_rx.clone();
                    let result_tx = result_tx.clone();
                    scope.spawn(move || {
                        while let Ok((p, f)) = job_rx.recv() {
                            let _ = result_tx.send(parse_data_file(classes, &p, f));
                        }
                    });
                }
                drop(result_tx);
                result_rx.iter().collect()
            })
        };

        let mut failures = Vec::new();
        let mut inserted = Vec::new();
        for result in results {
            match result {
                Ok((file, objects)) => {
                    inserted.extend(self.integrate_objects(st, &file, objects)?)
                }
                Err((file, e)) => {
                    error!("cannot load '{}': {e}", file.display());
                    failures.push(format!("{}: {e}", file.display()));
                }
            }
        }
        if !failures.is_empty() {
            return Err(OksError::LoadErrors(failures.len(), failures.join("\n")));
        }
        Ok(inserted)
    }

    /// Append one file's parsed objects to the store, applying the
    /// duplicate-id policy. Returns the inserted handles.
    pub(crate) fn integrate_objects(
        &self,
        st: &mut KernelState,
        file: &Path,
        objects: Vec<OksObject>,
    ) -> Result<Vec<oks_var::ObjIdx>, OksError> {
        let count = objects.len();
        let mut inserted = Vec::with_capacity(count);
        for mut object in objects {
            if st
                .store
                .find(object.class_name(), object.id())
                .is_some()
            {
                if !self.settings.allow_duplicated_objects {
                    return Err(OksError::DuplicateObject {
                        class: object.class_name().to_string(),
                        id: object.id().to_string(),
                    });
                }
                let fresh = st.store.unique_id(object.class_name(), object.id());
                let n: i32 = fresh
                    .rsplit('^')
                    .next()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(0);
                warn!(
                    "duplicated object '{}@{}' of '{}' renamed to '{fresh}'",
                    object.id(),
                    object.class_name(),
                    file.display()
                );
                object.set_id(fresh);
                object.set_duplicated_id_idx(n);
            }
            inserted.push(st.store.insert(object)?);
        }
        if let Some(f) = st.data_files.get_mut(file) {
            f.set_number_of_items(count);
        }
        Ok(inserted)
    }

    /// Re-run the bind pass by hand; loading and reloading already do.
    pub fn bind_objects(&self) -> (Vec<String>, Vec<String>) {
        let mut st = self.state.write().unwrap();
        let report = bind_objects(&mut st);
        report.log();
        (report.errors, report.warnings)
    }

    // ---- closing ----

    /// Close a data file: its objects leave the store (incoming references
    /// fall back to semi-resolved), the file is unlocked and forgotten.
    pub fn close_data(&self, path_to_close: &Path) -> Result<(), OksError> {
        let mut notices = Vec::new();
        {
            let mut st = self.state.write().unwrap();
            if !st.data_files.contains_key(path_to_close) {
                return Err(OksError::UnknownFile(path_to_close.to_path_buf()));
            }
            self.check_not_included(&st, path_to_close)?;
            let doomed: Vec<_> = st
                .store
                .iter()
                .filter(|(_, o)| o.file() == path_to_close)
                .map(|(idx, _)| idx)
                .collect();
            for idx in doomed {
                detach_object(&mut st, idx, &mut notices);
            }
            let mut file = st.data_files.shift_remove(path_to_close).unwrap();
            file.unlock();
            if st.active_data.as_deref() == Some(path_to_close) {
                st.active_data = None;
            }
        }
        self.dispatch(notices);
        Ok(())
    }

    /// Close a schema file: its classes (and their objects) go away.
    pub fn close_schema(&self, path_to_close: &Path) -> Result<(), OksError> {
        let mut notices = Vec::new();
        {
            let mut st = self.state.write().unwrap();
            if !st.schema_files.contains_key(path_to_close) {
                return Err(OksError::UnknownFile(path_to_close.to_path_buf()));
            }
            self.check_not_included(&st, path_to_close)?;
            remove_classes_of_file(&mut st, path_to_close, &mut notices)?;
            let mut file = st.schema_files.shift_remove(path_to_close).unwrap();
            file.unlock();
            if st.active_schema.as_deref() == Some(path_to_close) {
                st.active_schema = None;
            }
        }
        self.dispatch(notices);
        Ok(())
    }

    pub fn close_all_data(&self) -> Result<(), OksError> {
        for path in self.data_file_names().into_iter().rev() {
            self.close_data(&path)?;
        }
        Ok(())
    }

    pub fn close_all_schema(&self) -> Result<(), OksError> {
        for path in self.schema_file_names().into_iter().rev() {
            self.close_schema(&path)?;
        }
        Ok(())
    }

    fn check_not_included(&self, st: &KernelState, target: &Path) -> Result<(), OksError> {
        let all_files = st
            .schema_files
            .iter()
            .chain(st.data_files.iter());
        for (holder_path, holder) in all_files {
            if holder_path == target {
                continue;
            }
            let dir = holder_path.parent();
            for include in holder.includes() {
                if let Ok(full) = path::resolve_file_path(&self.settings, include, dir)
                    && full == target
                {
                    return Err(OksError::StillIncluded(
                        target.to_path_buf(),
                        holder_path.clone(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Parse the whole body of one data file against the loaded schema. Runs
/// on worker threads; touches nothing but the file and the (shared,
/// read-only) class map.
pub(crate) fn parse_data_file(
    classes: &ClassMap,
    file: &Path,
    format: FileFormat,
) -> Result<(PathBuf, Vec<OksObject>), (PathBuf, OksError)> {
    let fail = |e: OksError| (file.to_path_buf(), e);
    let f = File::open(file).map_err(|e| fail(OksError::file("open", file, e)))?;
    let mut stream = XmlInputStream::new(BufReader::new(f));
    let (_, first) = OksFile::read_header(file, file, &mut stream).map_err(fail)?;

    let ctx = ReadCtx {
        classes,
        file,
        format,
    };
    let mut objects = Vec::new();
    match first.as_deref() {
        None | Some("/oks-data") => {}
        // the header reader consumed the first object's start tag
        Some(tag) if tag == ctx.object_tag() => {
            objects.push(read_object_after_tag(&mut stream, &ctx).map_err(fail)?);
            while let Some(object) = read_object(&mut stream, &ctx).map_err(fail)? {
                objects.push(object);
            }
        }
        Some(other) => {
            return Err(fail(OksError::parse(
                file,
                stream.unexpected_tag(other, ctx.object_tag()),
            )));
        }
    }
    Ok((file.to_path_buf(), objects))
}

/// Remove one object without cascading: incoming resolved references are
/// rewritten to semi-resolved, the RCRs it holds on composite targets are
/// released. Close and reload use this for objects that disappear.
pub(crate) fn detach_object(st: &mut KernelState, idx: oks_var::ObjIdx, notices: &mut Vec<Notice>) {
    let Some((class, id)) = st.store.identity(idx) else {
        return;
    };

    // incoming edges fall back to the textual identity
    let holders = st.store.handles();
    for holder in holders {
        if holder == idx {
            continue;
        }
        let Some(object) = st.store.get(holder) else {
            continue;
        };
        let mut changed = false;
        let mut data: Vec<Value> = object.data().to_vec();
        for value in data.iter_mut() {
            changed |= demote_references(value, idx, &class, &id);
        }
        if changed {
            let (holder_class, holder_id) = st.store.identity(holder).unwrap();
            *st.store.get_mut(holder).unwrap().data_mut() = data;
            notices.push(Notice::ObjectChanged(ObjectNotice {
                handle: holder,
                class: holder_class,
                id: holder_id,
            }));
        }
    }

    // outgoing composite edges release their RCRs; no dependent cascade,
    // unloading a file must not destroy other files' objects
    if let Some(object) = st.store.get(idx) {
        let targets: Vec<(oks_var::ObjIdx, Name)> = match st.classes.get(&class) {
            Some(cls) => {
                let n_attrs = cls.all_attributes().len();
                cls.all_relationships()
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.member.is_composite())
                    .flat_map(|(j, r)| {
                        let mut found = Vec::new();
                        if let Some(value) = object.data().get(n_attrs + j) {
                            collect_resolved(value, &mut found);
                        }
                        found
                            .into_iter()
                            .map(|t| (t, r.member.name().clone()))
                            .collect::<Vec<_>>()
                    })
                    .collect()
            }
            None => Vec::new(),
        };
        for (target, rel_name) in targets {
            if let Some(child) = st.store.get_mut(target) {
                child.pop_rcr(idx, &rel_name);
            }
        }
    }

    for index in st.indices.values_mut() {
        index.remove_object(idx);
    }
    st.store.remove(idx);
    notices.push(Notice::ObjectDeleted(ObjectNotice {
        handle: idx,
        class,
        id,
    }));
}

fn demote_references(value: &mut Value, idx: oks_var::ObjIdx, class: &Name, id: &Name) -> bool {
    match value {
        Value::Object(r) => {
            if matches!(r, ObjRef::Resolved(t) if *t == idx) {
                *r = ObjRef::Semi {
                    class: class.clone(),
                    id: id.clone(),
                };
                true
            } else {
                false
            }
        }
        Value::List(items) => {
            let mut changed = false;
            for item in items {
                changed |= demote_references(item, idx, class, id);
            }
            changed
        }
        _ => false,
    }
}

fn collect_resolved(value: &Value, out: &mut Vec<oks_var::ObjIdx>) {
    match value {
        Value::Object(ObjRef::Resolved(t)) => out.push(*t),
        Value::List(items) => {
            for item in items {
                collect_resolved(item, out);
            }
        }
        _ => {}
    }
}

// ---- bind ----

pub(crate) struct BindReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl BindReport {
    pub fn log(&self) {
        for w in &self.warnings {
            warn!("{w}");
        }
        for e in &self.errors {
            error!("{e}");
        }
    }
}

/// The second pass of loading: rewrite unresolved and semi-resolved
/// references to live handles and install the RCRs of composite edges.
/// Idempotent: resolved references and already-present RCRs are left
/// alone.
pub(crate) fn bind_objects(st: &mut KernelState) -> BindReport {
    let mut report = BindReport {
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    for idx in st.store.handles() {
        let Some(object) = st.store.get(idx) else {
            continue;
        };
        let holder_class = object.class_name().clone();
        let holder_id = object.id().clone();
        let Some(class) = st.classes.get(&holder_class) else {
            continue;
        };
        let n_attrs = class.all_attributes().len();

        // class-typed attribute values must name loaded classes
        for (i, a) in class.all_attributes().iter().enumerate() {
            if a.member.data_type() != OksDataType::Class {
                continue;
            }
            let Some(value) = object.data().get(i) else {
                continue;
            };
            for token in class_ref_tokens(value) {
                if !token.is_empty() && !st.classes.contains_key(&token) {
                    report.errors.push(format!(
                        "attribute '{}' of '{holder_id}@{holder_class}' references unknown class '{token}'",
                        a.member.name()
                    ));
                }
            }
        }

        let rels: Vec<(usize, oks_common::Relationship)> = class
            .all_relationships()
            .iter()
            .enumerate()
            .map(|(j, r)| (n_attrs + j, r.member.clone()))
            .collect();

        for (slot, rel) in rels {
            let Some(old) = st.store.get(idx).and_then(|o| o.data().get(slot)).cloned() else {
                continue;
            };
            let mut value = old.clone();
            let mut rcrs_to_add: Vec<oks_var::ObjIdx> = Vec::new();
            visit_references(&mut value, &mut |r| {
                bind_one(st, &rel, &holder_class, &holder_id, r, &mut rcrs_to_add, &mut report)
            });
            for target in rcrs_to_add {
                let exclusive_conflict = {
                    let child = st.store.get_mut(target).expect("bind target is live");
                    if child.has_rcr(idx, rel.name()) {
                        false
                    } else if rel.is_exclusive() && child.has_other_parent_via(idx, rel.name()) {
                        true
                    } else {
                        child.push_rcr(Rcr {
                            parent: idx,
                            relationship: rel.name().clone(),
                        });
                        false
                    }
                };
                if exclusive_conflict {
                    let (c, i) = st.store.identity(target).unwrap();
                    report.errors.push(format!(
                        "'{i}@{c}' already has an exclusive composite parent via '{}'; edge from '{holder_id}@{holder_class}' keeps no reverse reference",
                        rel.name()
                    ));
                }
            }
            if value != old {
                st.store.get_mut(idx).unwrap().set_slot(slot, value);
            }
        }
    }
    report
}

/// Resolve one reference in place, collecting the composite RCRs to add.
fn bind_one(
    st: &KernelState,
    rel: &oks_common::Relationship,
    holder_class: &Name,
    holder_id: &Name,
    r: &mut ObjRef,
    rcrs_to_add: &mut Vec<oks_var::ObjIdx>,
    report: &mut BindReport,
) {
    let (class, id) = match r {
        ObjRef::Nil => return,
        ObjRef::Resolved(t) => {
            // already live; make sure a composite edge has its RCR
            if rel.is_composite() && st.store.get(*t).is_some() {
                rcrs_to_add.push(*t);
            }
            return;
        }
        ObjRef::Semi { class, id } | ObjRef::Unresolved { class, id } => {
            (class.clone(), id.clone())
        }
    };

    if let Some(target) = st.store.find(&class, &id) {
        // check compatibility against the declared target class
        let compatible = st
            .classes
            .get(&class)
            .map(|c| c.is_or_derives_from(rel.class_type()))
            .unwrap_or(true);
        if !compatible {
            report.errors.push(format!(
                "relationship '{}' of '{holder_id}@{holder_class}' references '{id}@{class}', not a '{}'",
                rel.name(),
                rel.class_type()
            ));
            return;
        }
        *r = ObjRef::Resolved(target);
        if rel.is_composite() {
            rcrs_to_add.push(target);
        }
        return;
    }

    if !st.classes.contains_key(&class) {
        report.errors.push(format!(
            "relationship '{}' of '{holder_id}@{holder_class}' references '{id}@{class}' of an unknown class",
            rel.name()
        ));
        return;
    }

    // class known, object absent: legal when the low cardinality permits
    *r = ObjRef::Semi {
        class: class.clone(),
        id: id.clone(),
    };
    let message = format!(
        "relationship '{}' of '{holder_id}@{holder_class}' references '{id}@{class}', which is not loaded",
        rel.name()
    );
    if rel.low_cc() == LowCardinality::One {
        report.errors.push(message);
    } else {
        report.warnings.push(message);
    }
}

fn visit_references(value: &mut Value, f: &mut impl FnMut(&mut ObjRef)) {
    match value {
        Value::Object(r) => f(r),
        Value::List(items) => {
            for item in items {
                visit_references(item, f);
            }
        }
        _ => {}
    }
}

fn class_ref_tokens(value: &Value) -> Vec<Name> {
    match value {
        Value::ClassRef(c) => vec![c.clone()],
        Value::List(items) => items.iter().flat_map(class_ref_tokens).collect(),
        _ => Vec::new(),
    }
}
