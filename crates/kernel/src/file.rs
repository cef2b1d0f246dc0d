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
use chrono::{NaiveDateTime, Utc};
use oks_var::{format_time, parse_time};
use oks_xml::{XmlAttr, XmlInputStream, XmlOutputStream};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use strum::{Display, EnumString, IntoStaticStr};
use tracing::warn;

pub const SCHEMA_ROOT_TAG: &str = "oks-schema";
pub const DATA_ROOT_TAG: &str = "oks-data";
const INFO_TAG: &str = "info";
const INCLUDE_TAG: &str = "include";
const FILE_TAG: &str = "file";

/// What a file holds and how its objects are spelled. `data` is the normal
/// format; `extended` repeats every type so the file loads without its
/// schema; `compact` shortens the object grammar.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, EnumString, IntoStaticStr)]
pub enum FileFormat {
    #[strum(serialize = "schema")]
    Schema,
    #[strum(serialize = "data")]
    Data,
    #[strum(serialize = "extended")]
    Extended,
    #[strum(serialize = "compact")]
    Compact,
}

impl FileFormat {
    pub fn is_data(&self) -> bool {
        !matches!(self, FileFormat::Schema)
    }

    pub fn root_tag(&self) -> &'static str {
        match self {
            FileFormat::Schema => SCHEMA_ROOT_TAG,
            _ => DATA_ROOT_TAG,
        }
    }
}

/// Result of polling a file against its last recorded on-disk state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FileStatus {
    Unchanged,
    Modified,
    Removed,
}

pub(crate) fn process_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

pub(crate) fn process_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// A persistent unit: header metadata, the include list, lock state, and
/// change-tracking. A file never owns the classes or objects parsed from
/// it; those live in the kernel, keyed back to the file by path.
#[derive(Debug)]
pub struct OksFile {
    short_name: PathBuf,
    full_name: PathBuf,
    logical_name: String,
    file_type: String,
    format: FileFormat,
    created_by: String,
    created_on: String,
    creation_time: NaiveDateTime,
    includes: Vec<String>,
    number_of_items: usize,
    last_size: u64,
    last_mtime: Option<SystemTime>,
    lock: Option<PathBuf>,
    parent: Option<PathBuf>,
    updated: bool,
    read_only: bool,
}

impl OksFile {
    /// A fresh in-memory file; exists on disk only after the first save.
    pub fn create(
        short_name: &Path,
        full_name: &Path,
        logical_name: &str,
        file_type: &str,
        format: FileFormat,
    ) -> OksFile {
        OksFile {
            short_name: short_name.to_path_buf(),
            full_name: full_name.to_path_buf(),
            logical_name: logical_name.to_string(),
            file_type: file_type.to_string(),
            format,
            created_by: process_user(),
            created_on: process_host(),
            creation_time: Utc::now().naive_utc(),
            includes: Vec::new(),
            number_of_items: 0,
            last_size: 0,
            last_mtime: None,
            lock: None,
            parent: None,
            updated: true,
            read_only: false,
        }
    }

    pub fn short_name(&self) -> &Path {
        &self.short_name
    }

    pub fn full_name(&self) -> &Path {
        &self.full_name
    }

    pub(crate) fn set_names(&mut self, short_name: &Path, full_name: &Path) {
        self.short_name = short_name.to_path_buf();
        self.full_name = full_name.to_path_buf();
    }

    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    pub fn file_type(&self) -> &str {
        &self.file_type
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn set_format(&mut self, format: FileFormat) {
        self.format = format;
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn created_on(&self) -> &str {
        &self.created_on
    }

    pub fn creation_time(&self) -> &NaiveDateTime {
        &self.creation_time
    }

    pub fn includes(&self) -> &[String] {
        &self.includes
    }

    pub fn add_include(&mut self, path: &str) {
        if !self.includes.iter().any(|i| i == path) {
            self.includes.push(path.to_string());
            self.updated = true;
        }
    }

    pub fn remove_include(&mut self, path: &str) -> bool {
        let before = self.includes.len();
        self.includes.retain(|i| i != path);
        let removed = self.includes.len() != before;
        if removed {
            self.updated = true;
        }
        removed
    }

    pub(crate) fn set_includes(&mut self, includes: Vec<String>) {
        self.includes = includes;
    }

    pub fn number_of_items(&self) -> usize {
        self.number_of_items
    }

    pub(crate) fn set_number_of_items(&mut self, n: usize) {
        self.number_of_items = n;
    }

    pub fn parent(&self) -> Option<&Path> {
        self.parent.as_deref()
    }

    pub(crate) fn set_parent(&mut self, parent: Option<&Path>) {
        self.parent = parent.map(Path::to_path_buf);
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn set_updated(&mut self, updated: bool) {
        self.updated = updated;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    // ---- on-disk locking ----

    fn lock_path(&self) -> PathBuf {
        let name = self
            .full_name
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.full_name
            .with_file_name(format!(".{name}.oks-lock"))
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Take the advisory on-disk lock: an exclusively-created sibling file
    /// recording `user@host:pid`. A crashed holder leaves the sibling
    /// behind; removing it is an operator action.
    pub fn lock(&mut self) -> Result<(), OksError> {
        if self.lock.is_some() {
            return Ok(());
        }
        let lock_path = self.lock_path();
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut f) => {
                let holder =
                    format!("{}@{}:{}", process_user(), process_host(), std::process::id());
                f.write_all(holder.as_bytes())
                    .map_err(|e| OksError::file("write lock for", &self.full_name, e))?;
                self.lock = Some(lock_path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&lock_path)
                    .unwrap_or_else(|_| "<unknown>".to_string());
                Err(OksError::AlreadyLocked {
                    path: self.full_name.clone(),
                    holder,
                })
            }
            Err(e) => Err(OksError::file("lock", &self.full_name, e)),
        }
    }

    pub fn unlock(&mut self) {
        if let Some(lock_path) = self.lock.take()
            && let Err(e) = std::fs::remove_file(&lock_path)
        {
            warn!("cannot remove lock file '{}': {e}", lock_path.display());
        }
    }

    /// Probe whether a save could succeed: saving writes a temporary
    /// sibling, so the directory must admit new files.
    pub fn check_read_only(&mut self) -> bool {
        let name = self
            .full_name
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let probe = self
            .full_name
            .with_file_name(format!(".{name}.oks-probe-{}", std::process::id()));
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&probe)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&probe);
                self.read_only = false;
            }
            Err(_) => {
                self.read_only = true;
            }
        }
        self.read_only
    }

    // ---- change polling ----

    /// Record current size and mtime; later polls compare against them.
    pub fn record_status(&mut self) {
        if let Ok(meta) = std::fs::metadata(&self.full_name) {
            self.last_size = meta.len();
            self.last_mtime = meta.modified().ok();
        }
    }

    /// Classify the file against the last recorded state without updating
    /// it.
    pub fn update_status_of_file(&self) -> FileStatus {
        match std::fs::metadata(&self.full_name) {
            Err(_) => FileStatus::Removed,
            Ok(meta) => {
                if meta.len() != self.last_size || meta.modified().ok() != self.last_mtime {
                    FileStatus::Modified
                } else {
                    FileStatus::Unchanged
                }
            }
        }
    }

    // ---- header XML ----

    /// Read the root tag, `<info>` and any `<include>` block. Returns the
    /// first tag following the header (`class`, `obj`, a close tag), or
    /// `None` at end of input.
    pub fn read_header<R: Read>(
        short_name: &Path,
        full_name: &Path,
        s: &mut XmlInputStream<R>,
    ) -> Result<(OksFile, Option<String>), OksError> {
        let parse = |e: oks_xml::XmlError| OksError::parse(full_name, e);

        let root = s
            .get_tag_start()
            .map_err(parse)?
            .ok_or_else(|| parse(s.parse_error("empty file")))?;
        if root != SCHEMA_ROOT_TAG && root != DATA_ROOT_TAG {
            return Err(parse(s.unexpected_tag(&root, "oks-schema or oks-data")));
        }
        match s.get_attribute().map_err(parse)? {
            XmlAttr::EndOfTag => {}
            _ => return Err(parse(s.parse_error("malformed root tag"))),
        }

        let info = s
            .get_tag_start()
            .map_err(parse)?
            .ok_or_else(|| parse(s.parse_error("missing info tag")))?;
        if info != INFO_TAG {
            return Err(parse(s.unexpected_tag(&info, INFO_TAG)));
        }

        let mut file = OksFile::create(short_name, full_name, "", "", FileFormat::Data);
        file.updated = false;
        let mut format = None;
        loop {
            match s.get_attribute().map_err(parse)? {
                XmlAttr::Pair(n, v) => match n.as_str() {
                    "name" => file.logical_name = v,
                    "type" => file.file_type = v,
                    "num-of-items" => file.number_of_items = v.parse().unwrap_or(0),
                    "oks-format" => {
                        format = Some(v.parse::<FileFormat>().map_err(|_| {
                            parse(s.parse_error(format!("unknown oks-format '{v}'")))
                        })?)
                    }
                    "oks-version" => {}
                    "created-by" => file.created_by = v,
                    "created-on" => file.created_on = v,
                    "creation-time" => {
                        if let Ok(t) = parse_time(&v) {
                            file.creation_time = t;
                        }
                    }
                    "last-modified-by" | "last-modified-on" | "last-modification-time" => {}
                    other => {
                        warn!(
                            "unknown header attribute '{other}' in '{}'",
                            full_name.display()
                        );
                    }
                },
                XmlAttr::EndOfElement => break,
                XmlAttr::EndOfTag => {
                    return Err(parse(s.parse_error("info element cannot have children")));
                }
            }
        }
        let format =
            format.ok_or_else(|| parse(s.parse_error("header carries no oks-format")))?;
        let schema_root = root == SCHEMA_ROOT_TAG;
        if schema_root != (format == FileFormat::Schema) {
            return Err(parse(s.parse_error(format!(
                "oks-format '{format}' does not match the '{root}' root"
            ))));
        }
        file.format = format;

        // includes, then hand the first body tag back to the caller
        loop {
            let Some(tag) = s.get_tag_start().map_err(parse)? else {
                return Ok((file, None));
            };
            if tag != INCLUDE_TAG {
                return Ok((file, Some(tag)));
            }
            match s.get_attribute().map_err(parse)? {
                XmlAttr::EndOfTag => {}
                XmlAttr::EndOfElement => continue,
                XmlAttr::Pair(n, _) => return Err(parse(s.unexpected_attribute(&n))),
            }
            loop {
                let Some(tag) = s.get_tag_start().map_err(parse)? else {
                    return Err(parse(s.parse_error("unterminated include block")));
                };
                match tag.as_str() {
                    FILE_TAG => {
                        let mut path = String::new();
                        loop {
                            match s.get_attribute().map_err(parse)? {
                                XmlAttr::Pair(n, v) if n == "path" => path = v,
                                XmlAttr::Pair(n, _) => {
                                    return Err(parse(s.unexpected_attribute(&n)));
                                }
                                XmlAttr::EndOfElement => break,
                                XmlAttr::EndOfTag => {
                                    return Err(parse(
                                        s.parse_error("file element cannot have children"),
                                    ));
                                }
                            }
                        }
                        if path.is_empty() {
                            return Err(parse(s.parse_error("include file without a path")));
                        }
                        file.includes.push(path);
                    }
                    "/include" => break,
                    other => return Err(parse(s.unexpected_tag(other, FILE_TAG))),
                }
            }
        }
    }

    /// Write the prolog, root open tag, `<info>` and the include block.
    pub fn write_header<W: Write>(
        &self,
        s: &mut XmlOutputStream<W>,
        number_of_items: usize,
    ) -> std::io::Result<()> {
        let root = self.format.root_tag();
        s.put_raw("<?xml version=\"1.0\" encoding=\"ASCII\"?>\n\n")?;
        s.put_raw(&format!("<!-- {root} version 2.0 -->\n\n\n"))?;
        s.put_start_tag(root)?;
        s.finish_tag()?;
        s.put_eol()?;
        s.put_eol()?;

        s.put_start_tag(INFO_TAG)?;
        s.put_attribute("name", &self.logical_name)?;
        s.put_attribute("type", &self.file_type)?;
        s.put_num_attribute("num-of-items", number_of_items)?;
        s.put_attribute("oks-format", self.format.into())?;
        s.put_attribute("oks-version", env!("CARGO_PKG_VERSION"))?;
        s.put_attribute("created-by", &self.created_by)?;
        s.put_attribute("created-on", &self.created_on)?;
        s.put_attribute("creation-time", &format_time(&self.creation_time))?;
        s.finish_empty()?;
        s.put_eol()?;
        s.put_eol()?;

        if !self.includes.is_empty() {
            s.put_start_tag(INCLUDE_TAG)?;
            s.finish_tag()?;
            s.put_eol()?;
            for include in &self.includes {
                s.put_raw(" ")?;
                s.put_start_tag(FILE_TAG)?;
                s.put_attribute("path", include)?;
                s.finish_empty()?;
                s.put_eol()?;
            }
            s.put_last_tag(INCLUDE_TAG)?;
            s.put_eol()?;
            s.put_eol()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn header_round_trip() {
        let mut f = OksFile::create(
            Path::new("core.data.xml"),
            Path::new("/db/core.data.xml"),
            "core",
            "data-file",
            FileFormat::Data,
        );
        f.add_include("core.schema.xml");
        f.add_include("other.data.xml");

        let mut buf = Vec::new();
        let mut w = XmlOutputStream::new(&mut buf);
        f.write_header(&mut w, 7).unwrap();
        w.put_last_tag(DATA_ROOT_TAG).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let mut r = XmlInputStream::new(text.as_bytes());
        let (back, next) = OksFile::read_header(
            Path::new("core.data.xml"),
            Path::new("/db/core.data.xml"),
            &mut r,
        )
        .unwrap();
        assert_eq!(back.logical_name(), "core");
        assert_eq!(back.file_type(), "data-file");
        assert_eq!(back.format(), FileFormat::Data);
        assert_eq!(back.number_of_items(), 7);
        assert_eq!(back.includes(), &["core.schema.xml", "other.data.xml"]);
        assert_eq!(next, Some("/oks-data".to_string()));
    }

    #[test]
    fn mismatched_root_and_format_is_rejected() {
        let text = "<oks-schema>\n<info name=\"\" type=\"\" num-of-items=\"0\" oks-format=\"data\" created-by=\"u\" created-on=\"h\" creation-time=\"20240101T000000\"/>\n</oks-schema>\n";
        let mut r = XmlInputStream::new(text.as_bytes());
        assert!(
            OksFile::read_header(Path::new("x"), Path::new("/x"), &mut r).is_err()
        );
    }

    #[test]
    fn lock_files_are_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.data.xml");
        std::fs::write(&path, "x").unwrap();

        let mut f1 = OksFile::create(Path::new("a.data.xml"), &path, "", "", FileFormat::Data);
        let mut f2 = OksFile::create(Path::new("a.data.xml"), &path, "", "", FileFormat::Data);
        f1.lock().unwrap();
        assert!(f1.is_locked());
        let err = f2.lock().unwrap_err();
        assert!(matches!(err, OksError::AlreadyLocked { .. }));
        f1.unlock();
        assert!(!f1.is_locked());
        f2.lock().unwrap();
        f2.unlock();
    }

    #[test]
    fn status_polling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.data.xml");
        std::fs::write(&path, "one").unwrap();

        let mut f = OksFile::create(Path::new("a.data.xml"), &path, "", "", FileFormat::Data);
        f.record_status();
        assert_eq!(f.update_status_of_file(), FileStatus::Unchanged);
        std::fs::write(&path, "longer content").unwrap();
        assert_eq!(f.update_status_of_file(), FileStatus::Modified);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(f.update_status_of_file(), FileStatus::Removed);
    }
}
