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

use crate::SchemaError;
use oks_var::{Name, ObjIdx, OksDataType, Value};
use regex::Regex;
use std::cmp::Ordering;

fn no_refs(_: ObjIdx) -> Option<(Name, Name)> {
    None
}

/// A compiled range constraint: `token[,token...]` where a token is `V`,
/// `V..V`, `*..V`, `V..*`, or, for string-typed attributes, a regex
/// pattern. An empty range admits everything.
#[derive(Debug, Clone, Default)]
pub struct Range {
    text: String,
    equal: Vec<Value>,
    less_eq: Vec<Value>,
    greater_eq: Vec<Value>,
    intervals: Vec<(Value, Value)>,
    patterns: Vec<Regex>,
}

impl Range {
    /// A range that keeps its declaration text but validates nothing; what
    /// string ranges compile to when the kernel's skip-string-range switch
    /// is on.
    pub fn uncompiled(text: &str) -> Range {
        Range {
            text: text.to_string(),
            ..Range::default()
        }
    }

    pub fn compile(
        text: &str,
        data_type: OksDataType,
        enumerators: &[Name],
    ) -> Result<Range, SchemaError> {
        let mut range = Range {
            text: text.to_string(),
            ..Range::default()
        };
        if text.is_empty() {
            return Ok(range);
        }
        let bad = |reason: &str| SchemaError::BadRange {
            range: text.to_string(),
            reason: reason.to_string(),
        };
        for token in text.split(',') {
            if token.is_empty() {
                return Err(bad("empty token"));
            }
            if token.contains(char::is_whitespace) {
                return Err(bad("whitespace inside a token"));
            }
            if data_type == OksDataType::String {
                let anchored = format!("^(?:{token})$");
                let re = Regex::new(&anchored).map_err(|e| bad(&e.to_string()))?;
                range.patterns.push(re);
                continue;
            }
            match token.split_once("..") {
                Some(("*", "*")) => return Err(bad("'*..*' constrains nothing")),
                Some(("*", hi)) => {
                    range
                        .less_eq
                        .push(Value::parse_token(hi, data_type, enumerators)?);
                }
                Some((lo, "*")) => {
                    range
                        .greater_eq
                        .push(Value::parse_token(lo, data_type, enumerators)?);
                }
                Some((lo, hi)) => {
                    let lo = Value::parse_token(lo, data_type, enumerators)?;
                    let hi = Value::parse_token(hi, data_type, enumerators)?;
                    range.intervals.push((lo, hi));
                }
                None => {
                    range
                        .equal
                        .push(Value::parse_token(token, data_type, enumerators)?);
                }
            }
        }
        Ok(range)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.equal.is_empty()
            && self.less_eq.is_empty()
            && self.greater_eq.is_empty()
            && self.intervals.is_empty()
            && self.patterns.is_empty()
    }

    /// True iff the value matches any bucket, or every bucket is empty.
    /// Lists validate element-wise.
    pub fn validate(&self, value: &Value) -> bool {
        if self.is_empty() {
            return true;
        }
        if let Value::List(items) = value {
            return items.iter().all(|v| self.validate_scalar(v));
        }
        self.validate_scalar(value)
    }

    fn validate_scalar(&self, value: &Value) -> bool {
        let cmp = |bound: &Value| value.cmp_semantic(bound, &no_refs);
        if self.equal.iter().any(|b| cmp(b) == Some(Ordering::Equal)) {
            return true;
        }
        if self
            .less_eq
            .iter()
            .any(|b| matches!(cmp(b), Some(Ordering::Less | Ordering::Equal)))
        {
            return true;
        }
        if self
            .greater_eq
            .iter()
            .any(|b| matches!(cmp(b), Some(Ordering::Greater | Ordering::Equal)))
        {
            return true;
        }
        if self.intervals.iter().any(|(lo, hi)| {
            matches!(value.cmp_semantic(lo, &no_refs), Some(Ordering::Greater | Ordering::Equal))
                && matches!(value.cmp_semantic(hi, &no_refs), Some(Ordering::Less | Ordering::Equal))
        }) {
            return true;
        }
        if !self.patterns.is_empty() {
            let token = value.to_token();
            if self.patterns.iter().any(|re| re.is_match(&token)) {
                return true;
            }
        }
        false
    }
}
