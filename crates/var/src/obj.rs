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

use crate::Name;
use std::fmt::{Display, Formatter};

/// Opaque handle into the kernel's object arena. The generation counter is
/// bumped when a slot is reused, so a handle kept across a destroy never
/// aliases a reborn object.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObjIdx {
    pub slot: u32,
    pub generation: u32,
}

impl Display for ObjIdx {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}.{}", self.slot, self.generation)
    }
}

/// The shapes an object reference passes through between parse and bind.
///
/// A reference read from a file starts `Unresolved` (both class and object
/// named by string), becomes `Semi` once the class is known to the schema,
/// and `Resolved` once the target object itself is materialized. After a
/// completed bind no live slot holds an unresolved shape, except references
/// across classes absent from the loaded schema.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ObjRef {
    /// The null reference; legal when the relationship's low cardinality is
    /// `zero`.
    Nil,
    /// A live object in the kernel's store.
    Resolved(ObjIdx),
    /// Class resolved, target object not yet present.
    Semi { class: Name, id: Name },
    /// Neither class nor target known yet.
    Unresolved { class: Name, id: Name },
}

impl ObjRef {
    pub fn is_nil(&self) -> bool {
        matches!(self, ObjRef::Nil)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ObjRef::Nil | ObjRef::Resolved(_))
    }

    /// The `(class, id)` identity this reference names, resolving live
    /// handles through `ident`. `Nil` names the empty identity, the form it
    /// is saved in. A dangling handle yields `None`.
    pub fn identity(
        &self,
        ident: &dyn Fn(ObjIdx) -> Option<(Name, Name)>,
    ) -> Option<(Name, Name)> {
        match self {
            ObjRef::Nil => Some((arcstr::literal!(""), arcstr::literal!(""))),
            ObjRef::Resolved(idx) => ident(*idx),
            ObjRef::Semi { class, id } | ObjRef::Unresolved { class, id } => {
                Some((class.clone(), id.clone()))
            }
        }
    }

    /// Semantic equality: same `(class, id)`, with a pointer-equal fast path
    /// for two resolved handles.
    pub fn same_target(
        &self,
        other: &ObjRef,
        ident: &dyn Fn(ObjIdx) -> Option<(Name, Name)>,
    ) -> bool {
        if let (ObjRef::Resolved(a), ObjRef::Resolved(b)) = (self, other) {
            return a == b;
        }
        match (self.identity(ident), other.identity(ident)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl Display for ObjRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjRef::Nil => write!(f, "#[]"),
            ObjRef::Resolved(idx) => write!(f, "#[{idx}]"),
            ObjRef::Semi { class, id } | ObjRef::Unresolved { class, id } => {
                write!(f, "#[{id}@{class}]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_ident(_: ObjIdx) -> Option<(Name, Name)> {
        None
    }

    #[test]
    fn unresolved_and_semi_compare_by_identity() {
        let a = ObjRef::Unresolved {
            class: "Child".into(),
            id: "c1".into(),
        };
        let b = ObjRef::Semi {
            class: "Child".into(),
            id: "c1".into(),
        };
        assert!(a.same_target(&b, &no_ident));
    }

    #[test]
    fn resolved_compares_by_handle_fast_path() {
        let idx = ObjIdx {
            slot: 3,
            generation: 1,
        };
        let a = ObjRef::Resolved(idx);
        let b = ObjRef::Resolved(idx);
        assert!(a.same_target(&b, &no_ident));

        let stale = ObjRef::Resolved(ObjIdx {
            slot: 3,
            generation: 2,
        });
        assert!(!a.same_target(&stale, &no_ident));
    }
}
