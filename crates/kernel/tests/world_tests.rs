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

//! In-memory world behavior: slot defaults and validation, composite
//! reference bookkeeping, cascade destruction, schema evolution and
//! notifications.

use oks_common::{Attribute, Class, HighCardinality, LowCardinality, Relationship};
use oks_kernel::{FileFormat, KernelSettings, OksError, OksKernel};
use oks_var::{IntFormat, ObjRef, OksDataType, Value};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

struct World {
    _dir: TempDir,
    kernel: OksKernel,
    schema: PathBuf,
    data: PathBuf,
}

fn u32_attr(name: &str, range: &str, init: &str) -> Attribute {
    Attribute::new(
        name,
        OksDataType::U32,
        false,
        init,
        "",
        false,
        IntFormat::Dec,
        range,
        false,
        false,
    )
    .unwrap()
}

fn kids_rel(composite: bool, exclusive: bool, dependent: bool) -> Relationship {
    Relationship::new(
        "kids",
        "Child",
        LowCardinality::Zero,
        HighCardinality::Many,
        composite,
        exclusive,
        dependent,
        "",
        false,
    )
    .unwrap()
}

/// A kernel with `Parent { x: u32, kids -> Child }` and `Child` classes and
/// one open data file.
fn world(composite: bool, exclusive: bool, dependent: bool) -> World {
    let dir = tempfile::tempdir().unwrap();
    let kernel = OksKernel::with_settings(KernelSettings::default());
    let schema = kernel
        .new_schema(dir.path().join("core.schema.xml").to_str().unwrap())
        .unwrap();
    let data = kernel
        .new_data(
            dir.path().join("core.data.xml").to_str().unwrap(),
            FileFormat::Data,
        )
        .unwrap();

    let mut parent = Class::new("Parent", "", false, &schema).unwrap();
    parent.add_attribute(u32_attr("x", "1..10", "5")).unwrap();
    parent
        .add_relationship(kids_rel(composite, exclusive, dependent))
        .unwrap();
    let child = Class::new("Child", "", false, &schema).unwrap();
    kernel.add_class(child).unwrap();
    kernel.add_class(parent).unwrap();

    World {
        _dir: dir,
        kernel,
        schema,
        data,
    }
}

#[test]
fn initial_values_and_range_validation() {
    let w = world(false, false, false);
    let a = w.kernel.create_object("Parent", "p1", None).unwrap();
    assert_eq!(w.kernel.get_value(a, "x").unwrap(), Value::U32(5));

    let err = w.kernel.set_attribute(a, "x", Value::U32(11)).unwrap_err();
    assert!(matches!(err, OksError::Value(_)), "got {err}");
    // the failed setter rolled nothing in
    assert_eq!(w.kernel.get_value(a, "x").unwrap(), Value::U32(5));

    w.kernel.set_attribute(a, "x", Value::U32(10)).unwrap();
    assert_eq!(w.kernel.get_value(a, "x").unwrap(), Value::U32(10));
}

#[test]
fn set_coerces_through_the_declared_type() {
    let w = world(false, false, false);
    let a = w.kernel.create_object("Parent", "p1", None).unwrap();
    w.kernel
        .set_attribute(a, "x", Value::String("7".into()))
        .unwrap();
    assert_eq!(w.kernel.get_value(a, "x").unwrap(), Value::U32(7));
}

#[test]
fn object_ids_are_unique_per_class() {
    let w = world(false, false, false);
    w.kernel.create_object("Child", "c1", None).unwrap();
    let err = w.kernel.create_object("Child", "c1", None).unwrap_err();
    assert!(matches!(err, OksError::DuplicateObject { .. }));

    // empty ids draw from the probe sequence
    let fresh = w.kernel.create_object("Child", "", None).unwrap();
    let (_, id) = w.kernel.object_identity(fresh).unwrap();
    assert_eq!(id.as_str(), "Child^1");
}

#[test]
fn composite_edges_keep_rcr_symmetry() {
    let w = world(true, false, false);
    let p = w.kernel.create_object("Parent", "p", None).unwrap();
    let c1 = w.kernel.create_object("Child", "c1", None).unwrap();
    let c2 = w.kernel.create_object("Child", "c2", None).unwrap();
    w.kernel
        .add_relationship_target(p, "kids", ObjRef::Resolved(c1))
        .unwrap();
    w.kernel
        .add_relationship_target(p, "kids", ObjRef::Resolved(c2))
        .unwrap();

    assert_eq!(
        w.kernel.get_value(p, "kids").unwrap(),
        Value::List(vec![
            Value::Object(ObjRef::Resolved(c1)),
            Value::Object(ObjRef::Resolved(c2)),
        ])
    );
    for c in [c1, c2] {
        let rcrs = w.kernel.object_rcrs(c).unwrap();
        assert_eq!(rcrs.len(), 1);
        assert_eq!(rcrs[0].0, p);
        assert_eq!(rcrs[0].1.as_str(), "kids");
    }

    // removing the edge removes the reverse reference
    w.kernel.remove_relationship_target(p, "kids", c1).unwrap();
    assert!(w.kernel.object_rcrs(c1).unwrap().is_empty());
    assert_eq!(w.kernel.object_rcrs(c2).unwrap().len(), 1);
}

#[test]
fn exclusive_relationships_admit_one_parent() {
    let w = world(true, true, false);
    let p1 = w.kernel.create_object("Parent", "p1", None).unwrap();
    let p2 = w.kernel.create_object("Parent", "p2", None).unwrap();
    let c = w.kernel.create_object("Child", "c", None).unwrap();

    w.kernel
        .add_relationship_target(p1, "kids", ObjRef::Resolved(c))
        .unwrap();
    let err = w
        .kernel
        .add_relationship_target(p2, "kids", ObjRef::Resolved(c))
        .unwrap_err();
    assert!(matches!(err, OksError::ExclusivityViolation { .. }), "got {err}");

    // the losing call left everything as it was
    assert_eq!(w.kernel.get_value(p2, "kids").unwrap(), Value::List(vec![]));
    let rcrs = w.kernel.object_rcrs(c).unwrap();
    assert_eq!(rcrs.len(), 1);
    assert_eq!(rcrs[0].0, p1);
}

#[test]
fn dependent_children_die_with_their_last_parent() {
    let w = world(true, false, true);
    let p = w.kernel.create_object("Parent", "p", None).unwrap();
    let c = w.kernel.create_object("Child", "c", None).unwrap();
    w.kernel
        .add_relationship_target(p, "kids", ObjRef::Resolved(c))
        .unwrap();

    w.kernel.destroy_object(p).unwrap();
    assert_eq!(w.kernel.get_object("Parent", "p"), None);
    assert_eq!(w.kernel.get_object("Child", "c"), None);
}

#[test]
fn dependent_children_survive_while_another_parent_holds_them() {
    let w = world(true, false, true);
    let p1 = w.kernel.create_object("Parent", "p1", None).unwrap();
    let p2 = w.kernel.create_object("Parent", "p2", None).unwrap();
    let c = w.kernel.create_object("Child", "c", None).unwrap();
    for p in [p1, p2] {
        w.kernel
            .add_relationship_target(p, "kids", ObjRef::Resolved(c))
            .unwrap();
    }

    w.kernel.destroy_object(p1).unwrap();
    assert!(w.kernel.get_object("Child", "c").is_some());
    w.kernel.destroy_object(p2).unwrap();
    assert_eq!(w.kernel.get_object("Child", "c"), None);
}

#[test]
fn destroying_a_child_releases_the_parents_edge_bookkeeping() {
    let w = world(true, false, false);
    let p = w.kernel.create_object("Parent", "p", None).unwrap();
    let c = w.kernel.create_object("Child", "c", None).unwrap();
    w.kernel
        .add_relationship_target(p, "kids", ObjRef::Resolved(c))
        .unwrap();
    w.kernel.destroy_object(c).unwrap();
    // the handle in the parent's slot has gone stale
    let Value::List(kids) = w.kernel.get_value(p, "kids").unwrap() else {
        panic!("kids should be a list");
    };
    assert_eq!(kids.len(), 1);
    assert!(w.kernel.object_identity(c).is_none());
}

#[test]
fn renaming_objects_rekeys_the_registry() {
    let w = world(false, false, false);
    let c = w.kernel.create_object("Child", "old", None).unwrap();
    w.kernel.create_object("Child", "taken", None).unwrap();

    assert!(matches!(
        w.kernel.set_object_id(c, "taken").unwrap_err(),
        OksError::DuplicateObject { .. }
    ));
    w.kernel.set_object_id(c, "fresh").unwrap();
    assert_eq!(w.kernel.get_object("Child", "fresh"), Some(c));
    assert_eq!(w.kernel.get_object("Child", "old"), None);
}

#[test]
fn schema_evolution_reshapes_live_objects() {
    let w = world(false, false, false);
    let p = w.kernel.create_object("Parent", "p", None).unwrap();
    w.kernel.set_attribute(p, "x", Value::U32(9)).unwrap();

    // a new attribute appears with its default in every live object
    w.kernel
        .add_attribute("Parent", u32_attr("y", "", "3"))
        .unwrap();
    assert_eq!(w.kernel.get_value(p, "y").unwrap(), Value::U32(3));
    assert_eq!(w.kernel.get_value(p, "x").unwrap(), Value::U32(9));

    // a type change converts values in place
    w.kernel.set_attribute_range("Parent", "x", "").unwrap();
    w.kernel
        .set_attribute_type("Parent", "x", OksDataType::String)
        .unwrap();
    assert_eq!(
        w.kernel.get_value(p, "x").unwrap(),
        Value::String("9".into())
    );

    // and a dropped attribute takes its slot with it
    w.kernel.remove_attribute("Parent", "y").unwrap();
    assert!(w.kernel.get_value(p, "y").is_err());
    assert_eq!(
        w.kernel.get_value(p, "x").unwrap(),
        Value::String("9".into())
    );
}

#[test]
fn inherited_members_come_before_direct_ones() {
    let w = world(false, false, false);
    let mut special = Class::new("SpecialChild", "", false, &w.schema).unwrap();
    special.add_super_class("Child").unwrap();
    special.add_attribute(u32_attr("extra", "", "1")).unwrap();
    w.kernel.add_class(special).unwrap();

    let sizes = w
        .kernel
        .with_class("SpecialChild", |c| {
            (
                c.instance_size(),
                c.all_super_classes().to_vec(),
                c.slot_of("extra").unwrap().slot,
            )
        })
        .unwrap();
    assert_eq!(sizes.0, 1);
    assert_eq!(sizes.1.len(), 1);
    assert_eq!(sizes.2, 0);

    // subclass membership is visible from the super side
    let subs = w
        .kernel
        .with_class("Child", |c| c.all_sub_classes().to_vec())
        .unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].as_str(), "SpecialChild");
}

#[test]
fn failed_attribute_conversion_aborts_the_schema_change() {
    let w = world(false, false, false);
    let p = w.kernel.create_object("Parent", "p", None).unwrap();
    w.kernel.set_attribute_range("Parent", "x", "").unwrap();
    w.kernel
        .set_attribute_type("Parent", "x", OksDataType::String)
        .unwrap();
    w.kernel
        .set_attribute(p, "x", Value::String("not a number".into()))
        .unwrap();

    // converting "not a number" back to u32 cannot work; the edit must
    // leave the schema and the object as they were
    let err = w
        .kernel
        .set_attribute_type("Parent", "x", OksDataType::U32)
        .unwrap_err();
    assert!(matches!(err, OksError::Value(_)), "got {err}");
    let data_type = w
        .kernel
        .with_class("Parent", |c| c.find_attribute("x").unwrap().member.data_type())
        .unwrap();
    assert_eq!(data_type, OksDataType::String);
    assert_eq!(
        w.kernel.get_value(p, "x").unwrap(),
        Value::String("not a number".into())
    );
}

#[test]
fn attribute_indices_follow_mutations() {
    let w = world(false, false, false);
    let p1 = w.kernel.create_object("Parent", "p1", None).unwrap();
    let p2 = w.kernel.create_object("Parent", "p2", None).unwrap();
    w.kernel.set_attribute(p2, "x", Value::U32(7)).unwrap();

    w.kernel.build_index("Parent", "x").unwrap();
    assert_eq!(
        w.kernel.find_by_index("Parent", "x", &Value::U32(5)).unwrap(),
        vec![p1]
    );
    w.kernel.set_attribute(p1, "x", Value::U32(7)).unwrap();
    let sevens = w
        .kernel
        .find_by_index("Parent", "x", &Value::U32(7))
        .unwrap();
    assert_eq!(sevens.len(), 2);
    assert!(sevens.contains(&p1) && sevens.contains(&p2));

    w.kernel.destroy_object(p2).unwrap();
    assert_eq!(
        w.kernel.find_by_index("Parent", "x", &Value::U32(7)).unwrap(),
        vec![p1]
    );
}

#[test]
fn notifications_fire_in_mutation_order() {
    let w = world(false, false, false);
    let created = Arc::new(AtomicUsize::new(0));
    let changed = Arc::new(AtomicUsize::new(0));
    let deleted = Arc::new(AtomicUsize::new(0));

    let c = created.clone();
    w.kernel
        .subscribe_create_object(Box::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
    let c = changed.clone();
    w.kernel
        .subscribe_change_object(Box::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
    let c = deleted.clone();
    w.kernel
        .subscribe_delete_object(Box::new(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

    let p = w.kernel.create_object("Parent", "p", None).unwrap();
    w.kernel.set_attribute(p, "x", Value::U32(2)).unwrap();
    w.kernel.destroy_object(p).unwrap();

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(changed.load(Ordering::SeqCst), 1);
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
}

#[test]
fn callbacks_can_query_the_kernel() {
    let w = world(false, false, false);
    let seen = Arc::new(AtomicUsize::new(0));
    let c = seen.clone();
    w.kernel
        .subscribe_create_object(Box::new(move |kernel, notice| {
            // re-entrant queries must not deadlock
            assert!(kernel.get_object(&notice.class, &notice.id).is_some());
            c.fetch_add(1, Ordering::SeqCst);
        }));
    w.kernel.create_object("Child", "c", None).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn abstract_classes_cannot_be_instantiated() {
    let w = world(false, false, false);
    let abstract_class = Class::new("Template", "", true, &w.schema).unwrap();
    w.kernel.add_class(abstract_class).unwrap();
    assert!(matches!(
        w.kernel.create_object("Template", "t", None).unwrap_err(),
        OksError::AbstractClass(_)
    ));
}

#[test]
fn objects_need_an_active_data_file() {
    let dir = tempfile::tempdir().unwrap();
    let kernel = OksKernel::with_settings(KernelSettings::default());
    let schema = kernel
        .new_schema(dir.path().join("s.schema.xml").to_str().unwrap())
        .unwrap();
    kernel
        .add_class(Class::new("A", "", false, &schema).unwrap())
        .unwrap();
    assert!(matches!(
        kernel.create_object("A", "a", None).unwrap_err(),
        OksError::NoActiveData
    ));
}

#[test]
fn objects_move_between_data_files() {
    let w = world(false, false, false);
    let second = w
        .kernel
        .new_data(
            w.data.parent().unwrap().join("more.data.xml").to_str().unwrap(),
            FileFormat::Data,
        )
        .unwrap();
    let p = w.kernel.create_object("Parent", "p", Some(&w.data)).unwrap();
    w.kernel.set_object_file(p, &second).unwrap();
    assert_eq!(w.kernel.object_file(p).unwrap(), second);
}
