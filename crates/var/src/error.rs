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

#[derive(Debug, Clone, thiserror::Error)]
pub enum ValueError {
    #[error("bad value '{token}' for type {data_type}: {reason}")]
    BadToken {
        token: String,
        data_type: &'static str,
        reason: String,
    },

    #[error("'{0}' is not a valid enumerator")]
    BadEnumerator(String),

    #[error("attribute has no enumerators")]
    NoEnumerators,

    #[error("cannot convert {from} value to {to}")]
    CannotConvert { from: String, to: String },

    #[error("cannot narrow {0} values to a single value")]
    CannotNarrowList(usize),

    #[error("value {value} is out of range '{range}'")]
    RangeViolation { value: String, range: String },

    #[error("bad date '{0}': {1}")]
    BadDate(String, String),

    #[error("bad time '{0}': {1}")]
    BadTime(String, String),
}
