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

//! A pull-style XML reader and writer for the restricted grammar of OKS
//! schema and data files: start tag, attributes, optional child tags, close
//! tag. No mixed content, no namespaces, a closed set of short tag names. A
//! general XML parser would be overkill here, and slower.

mod read;
mod write;

pub use read::{XmlAttr, XmlInputStream};
pub use write::XmlOutputStream;

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("io error at line {1}, position {2}: {0}")]
    Io(std::io::Error, usize, usize),

    #[error("{msg} (line {line}, position {pos})")]
    Parse { msg: String, line: usize, pos: usize },

    #[error("unexpected tag '{got}' (expected '{want}') at line {line}, position {pos}")]
    UnexpectedTag {
        got: String,
        want: String,
        line: usize,
        pos: usize,
    },

    #[error("unexpected attribute '{got}' at line {line}, position {pos}")]
    UnexpectedAttribute { got: String, line: usize, pos: usize },

    #[error("premature end of file at line {0}, position {1}")]
    Eof(usize, usize),
}
