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

use oks_common::SchemaError;
use oks_var::{ObjIdx, ValueError};
use oks_xml::XmlError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum OksError {
    #[error("cannot parse '{file}': {source}")]
    Parse {
        file: PathBuf,
        #[source]
        source: XmlError,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("cannot {op} '{path}': {source}")]
    File {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot find file '{name}'; tried: {}", itertools::join(tried.iter().map(|p| p.display()), ", "))]
    CannotResolvePath { name: String, tried: Vec<PathBuf> },

    #[error("include path '{path}' of repository file '{file}' must be repository-relative")]
    BadRepositoryInclude { file: PathBuf, path: String },

    #[error("file '{0}' is not loaded")]
    UnknownFile(PathBuf),

    #[error("file '{path}' is locked by {holder}")]
    AlreadyLocked { path: PathBuf, holder: String },

    #[error("file '{0}' is not writable")]
    NotWritable(PathBuf),

    #[error("file '{0}' is still included by '{1}'")]
    StillIncluded(PathBuf, PathBuf),

    #[error("class '{0}' is not loaded")]
    UnknownClass(String),

    #[error("object '{id}@{class}' is not found")]
    UnknownObject { class: String, id: String },

    #[error("object handle {0} is dangling")]
    DanglingHandle(ObjIdx),

    #[error("object '{id}@{class}' already exists")]
    DuplicateObject { class: String, id: String },

    #[error("object id '{id}' already exists in class '{in_class}' of the inheritance hierarchy of '{class}'")]
    DuplicateObjectViaInheritance {
        class: String,
        in_class: String,
        id: String,
    },

    #[error("cannot instantiate abstract class '{0}'")]
    AbstractClass(String),

    #[error("class '{class}' has no {what} '{member}'")]
    NoSuchMember {
        class: String,
        what: &'static str,
        member: String,
    },

    #[error("relationship '{relationship}' of '{class}' cannot reference an object of class '{target}'")]
    IncompatibleTarget {
        class: String,
        relationship: String,
        target: String,
    },

    #[error("'{id}@{class}' already has an exclusive composite parent via '{relationship}'")]
    ExclusivityViolation {
        class: String,
        id: String,
        relationship: String,
    },

    #[error("relationship '{relationship}' is single-valued")]
    NotMultiValue { relationship: String },

    #[error("relationship '{relationship}' is multi-valued")]
    NotSingleValue { relationship: String },

    #[error("'{id}@{class}' is not a value of relationship '{relationship}'")]
    NotInRelationship {
        relationship: String,
        class: String,
        id: String,
    },

    #[error("attribute '{attribute}' of '{id}@{class}' cannot be null")]
    NotNullViolation {
        class: String,
        id: String,
        attribute: String,
    },

    #[error("there is no active data file")]
    NoActiveData,

    #[error("there is no active schema file")]
    NoActiveSchema,

    #[error("cannot reload schema file '{0}'; only data files reload")]
    CannotReloadSchema(PathBuf),

    #[error("file '{file}' contains inconsistent objects: {reason}")]
    Consistency { file: PathBuf, reason: String },

    #[error("{0} file(s) failed to load:\n{1}")]
    LoadErrors(usize, String),

    #[error("cannot save '{file}' via '{tmp}': {reason}")]
    Save {
        file: PathBuf,
        tmp: PathBuf,
        reason: String,
    },
}

impl OksError {
    pub(crate) fn file(op: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        OksError::File {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn parse(file: &std::path::Path, source: XmlError) -> Self {
        OksError::Parse {
            file: file.to_path_buf(),
            source,
        }
    }
}
