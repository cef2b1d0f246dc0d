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

//! On-disk behavior: save/load round trips in all three data formats,
//! include processing, binding across files, reloading after external
//! modification, and rename-atomic save failures.

use oks_common::{Attribute, Class, HighCardinality, LowCardinality, Relationship};
use oks_kernel::{FileFormat, KernelSettings, OksError, OksKernel};
use oks_var::{IntFormat, ObjRef, OksDataType, Value};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fresh_kernel() -> OksKernel {
    OksKernel::with_settings(KernelSettings::default())
}

fn single_threaded_kernel() -> OksKernel {
    OksKernel::with_settings(KernelSettings {
        threads_pool_size: 1,
        ..KernelSettings::default()
    })
}

/// Build the standard fixture schema on disk and return its path:
/// `Parent { x: u32 = 5, tags: string multi, kid -> Child, kids: composite
/// many -> Child }`, `Child { d: date = 2024-01-31 }`.
fn write_fixture_schema(dir: &Path) -> PathBuf {
    let kernel = fresh_kernel();
    let schema = kernel
        .new_schema(dir.join("core.schema.xml").to_str().unwrap())
        .unwrap();

    let mut child = Class::new("Child", "a child thing", false, &schema).unwrap();
    child
        .add_attribute(
            Attribute::new(
                "d",
                OksDataType::Date,
                false,
                "2024-01-31",
                "",
                false,
                IntFormat::Dec,
                "",
                false,
                false,
            )
            .unwrap(),
        )
        .unwrap();
    kernel.add_class(child).unwrap();

    let mut parent = Class::new("Parent", "", false, &schema).unwrap();
    parent
        .add_attribute(
            Attribute::new(
                "x",
                OksDataType::U32,
                false,
                "5",
                "",
                false,
                IntFormat::Dec,
                "1..100",
                false,
                false,
            )
            .unwrap(),
        )
        .unwrap();
    parent
        .add_attribute(
            Attribute::new(
                "tags",
                OksDataType::String,
                true,
                "",
                "",
                false,
                IntFormat::Dec,
                "",
                false,
                false,
            )
            .unwrap(),
        )
        .unwrap();
    parent
        .add_relationship(
            Relationship::new(
                "kid",
                "Child",
                LowCardinality::Zero,
                HighCardinality::One,
                false,
                false,
                false,
                "",
                false,
            )
            .unwrap(),
        )
        .unwrap();
    parent
        .add_relationship(
            Relationship::new(
                "kids",
                "Child",
                LowCardinality::Zero,
                HighCardinality::Many,
                true,
                false,
                false,
                "",
                false,
            )
            .unwrap(),
        )
        .unwrap();
    kernel.add_class(parent).unwrap();
    kernel.save_all_schema().unwrap();
    kernel.close_all_schema().unwrap();
    schema
}

/// A populated world saved to disk; returns the data file path.
fn write_fixture_data(kernel: &OksKernel, dir: &Path, schema: &Path) -> PathBuf {
    kernel.load_file(schema.to_str().unwrap()).unwrap();
    let data = kernel
        .new_data(dir.join("core.data.xml").to_str().unwrap(), FileFormat::Data)
        .unwrap();
    kernel
        .add_include(&data, schema.to_str().unwrap())
        .unwrap();

    let p = kernel.create_object("Parent", "p", None).unwrap();
    let c1 = kernel.create_object("Child", "c1", None).unwrap();
    let c2 = kernel.create_object("Child", "c2", None).unwrap();
    kernel.set_attribute(p, "x", Value::U32(42)).unwrap();
    kernel
        .set_attribute(
            p,
            "tags",
            Value::List(vec![
                Value::String("first tag".into()),
                Value::String("second <&> tag".into()),
            ]),
        )
        .unwrap();
    kernel
        .set_relationship(p, "kid", ObjRef::Resolved(c1))
        .unwrap();
    kernel
        .add_relationship_target(p, "kids", ObjRef::Resolved(c1))
        .unwrap();
    kernel
        .add_relationship_target(p, "kids", ObjRef::Resolved(c2))
        .unwrap();
    kernel.save_all_data().unwrap();
    data
}

fn assert_fixture_world(kernel: &OksKernel) {
    let p = kernel.get_object("Parent", "p").expect("p is loaded");
    let c1 = kernel.get_object("Child", "c1").expect("c1 is loaded");
    let c2 = kernel.get_object("Child", "c2").expect("c2 is loaded");

    assert_eq!(kernel.get_value(p, "x").unwrap(), Value::U32(42));
    assert_eq!(
        kernel.get_value(p, "tags").unwrap(),
        Value::List(vec![
            Value::String("first tag".into()),
            Value::String("second <&> tag".into()),
        ])
    );
    assert_eq!(
        kernel.get_value(p, "kid").unwrap(),
        Value::Object(ObjRef::Resolved(c1))
    );
    assert_eq!(
        kernel.get_value(p, "kids").unwrap(),
        Value::List(vec![
            Value::Object(ObjRef::Resolved(c1)),
            Value::Object(ObjRef::Resolved(c2)),
        ])
    );
    for c in [c1, c2] {
        let rcrs = kernel.object_rcrs(c).unwrap();
        assert_eq!(rcrs.len(), 1, "exactly one reverse composite reference");
        assert_eq!(rcrs[0].0, p);
        assert_eq!(rcrs[0].1.as_str(), "kids");
    }
    let d = kernel.get_value(c1, "d").unwrap();
    assert_eq!(d.to_token(), "20240131");
}

#[test]
fn round_trip_normal_format() {
    let dir = TempDir::new().unwrap();
    let schema = write_fixture_schema(dir.path());
    let writer = fresh_kernel();
    let data = write_fixture_data(&writer, dir.path(), &schema);

    let reader = fresh_kernel();
    reader.load_file(data.to_str().unwrap()).unwrap();
    assert_fixture_world(&reader);
    assert_eq!(reader.number_of_objects(), 3);
}

#[test]
fn round_trip_extended_and_compact_formats() {
    for format in [FileFormat::Extended, FileFormat::Compact] {
        let dir = TempDir::new().unwrap();
        let schema = write_fixture_schema(dir.path());
        let writer = fresh_kernel();
        let data = write_fixture_data(&writer, dir.path(), &schema);
        writer.save_data_as_format(&data, format, false).unwrap();

        let reader = fresh_kernel();
        reader.load_file(data.to_str().unwrap()).unwrap();
        assert_fixture_world(&reader);
    }
}

#[test]
fn schema_round_trip_preserves_declarations() {
    let dir = TempDir::new().unwrap();
    let schema = write_fixture_schema(dir.path());

    // scenario: the date init-value went in as ISO extended and must be
    // stored in ISO basic form
    let text = std::fs::read_to_string(&schema).unwrap();
    assert!(
        text.contains("init-value=\"20240131\""),
        "date init not normalized: {text}"
    );

    let kernel = fresh_kernel();
    kernel.load_schema(schema.to_str().unwrap()).unwrap();
    let (range, init, not_null) = kernel
        .with_class("Parent", |c| {
            let x = c.find_attribute("x").unwrap();
            (
                x.member.range_text().to_string(),
                x.member.init_value().clone(),
                x.member.is_not_null(),
            )
        })
        .unwrap();
    assert_eq!(range, "1..100");
    assert_eq!(init, Value::U32(5));
    assert!(!not_null);

    let kids = kernel
        .with_class("Parent", |c| c.find_relationship("kids").unwrap().member.clone())
        .unwrap();
    assert!(kids.is_composite());
    assert_eq!(kids.high_cc(), HighCardinality::Many);
    assert_eq!(kids.class_type().as_str(), "Child");
}

#[test]
fn bind_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let schema = write_fixture_schema(dir.path());
    let writer = fresh_kernel();
    let data = write_fixture_data(&writer, dir.path(), &schema);

    let kernel = fresh_kernel();
    kernel.load_file(data.to_str().unwrap()).unwrap();
    let c1 = kernel.get_object("Child", "c1").unwrap();
    let before = kernel.object_rcrs(c1).unwrap();
    kernel.bind_objects();
    kernel.bind_objects();
    assert_eq!(kernel.object_rcrs(c1).unwrap(), before);
}

#[test]
fn unresolved_reference_waits_for_its_file() {
    let dir = TempDir::new().unwrap();
    let schema = write_fixture_schema(dir.path());
    let schema_str = schema.to_str().unwrap();

    let more = dir.path().join("more.data.xml");
    std::fs::write(
        &more,
        data_file_text(&[schema_str], "<obj class=\"Child\" id=\"c9\">\n</obj>\n"),
    )
    .unwrap();
    let main = dir.path().join("main.data.xml");
    std::fs::write(
        &main,
        data_file_text(
            &[schema_str],
            "<obj class=\"Parent\" id=\"p\">\n <rel name=\"kid\" class=\"Child\" id=\"c9\"/>\n</obj>\n",
        ),
    )
    .unwrap();

    // the target's file is not included: the load succeeds and the
    // reference stays unresolved
    let kernel = fresh_kernel();
    let main_full = kernel.load_file(main.to_str().unwrap()).unwrap();
    let p = kernel.get_object("Parent", "p").unwrap();
    assert_eq!(kernel.get_object("Child", "c9"), None);
    match kernel.get_value(p, "kid").unwrap() {
        Value::Object(ObjRef::Semi { class, id }) => {
            assert_eq!(class.as_str(), "Child");
            assert_eq!(id.as_str(), "c9");
        }
        other => panic!("expected a semi-resolved reference, got {other:?}"),
    }

    // adding the include and reloading resolves it
    std::fs::write(
        &main,
        data_file_text(
            &[schema_str, more.to_str().unwrap()],
            "<obj class=\"Parent\" id=\"p\">\n <rel name=\"kid\" class=\"Child\" id=\"c9\"/>\n</obj>\n",
        ),
    )
    .unwrap();
    kernel.reload_data(&[main_full]).unwrap();

    let p = kernel.get_object("Parent", "p").unwrap();
    let c9 = kernel.get_object("Child", "c9").expect("c9 loaded via include");
    assert_eq!(
        kernel.get_value(p, "kid").unwrap(),
        Value::Object(ObjRef::Resolved(c9))
    );
}

#[test]
fn reload_updates_survivors_in_place_and_detaches_the_gone() {
    let dir = TempDir::new().unwrap();
    let schema = write_fixture_schema(dir.path());
    let schema_str = schema.to_str().unwrap();

    let main = dir.path().join("main.data.xml");
    std::fs::write(
        &main,
        data_file_text(
            &[schema_str],
            "<obj class=\"Parent\" id=\"p\">\n <attr name=\"x\" val=\"7\"/>\n</obj>\n\n<obj class=\"Parent\" id=\"q\">\n</obj>\n",
        ),
    )
    .unwrap();

    let kernel = fresh_kernel();
    let main_full = kernel.load_file(main.to_str().unwrap()).unwrap();
    let p = kernel.get_object("Parent", "p").unwrap();
    assert!(kernel.get_object("Parent", "q").is_some());

    // p changes, q disappears, r appears
    std::fs::write(
        &main,
        data_file_text(
            &[schema_str],
            "<obj class=\"Parent\" id=\"p\">\n <attr name=\"x\" val=\"8\"/>\n</obj>\n\n<obj class=\"Parent\" id=\"r\">\n</obj>\n",
        ),
    )
    .unwrap();
    kernel.reload_data(&[main_full]).unwrap();

    // the surviving object kept its handle
    assert_eq!(kernel.get_object("Parent", "p"), Some(p));
    assert_eq!(kernel.get_value(p, "x").unwrap(), Value::U32(8));
    assert_eq!(kernel.get_object("Parent", "q"), None);
    assert!(kernel.get_object("Parent", "r").is_some());
}

#[test]
fn parallel_load_of_many_files() {
    let dir = TempDir::new().unwrap();
    let schema = write_fixture_schema(dir.path());
    let schema_str = schema.to_str().unwrap().to_string();

    let mut includes: Vec<String> = vec![schema_str.clone()];
    for i in 0..6 {
        let chunk = dir.path().join(format!("chunk{i}.data.xml"));
        let mut body = String::new();
        for j in 0..10 {
            body.push_str(&format!("<obj class=\"Child\" id=\"c{i}_{j}\">\n</obj>\n"));
        }
        std::fs::write(&chunk, data_file_text(&[&schema_str], &body)).unwrap();
        includes.push(chunk.to_str().unwrap().to_string());
    }
    let root = dir.path().join("root.data.xml");
    let include_refs: Vec<&str> = includes.iter().map(String::as_str).collect();
    std::fs::write(&root, data_file_text(&include_refs, "")).unwrap();

    for kernel in [fresh_kernel(), single_threaded_kernel()] {
        kernel.load_file(root.to_str().unwrap()).unwrap();
        assert_eq!(kernel.number_of_objects(), 60);
        assert!(kernel.get_object("Child", "c5_9").is_some());
    }
}

#[test]
fn failed_save_leaves_the_destination_alone() {
    let dir = TempDir::new().unwrap();
    let schema = write_fixture_schema(dir.path());
    let kernel = fresh_kernel();
    let data = write_fixture_data(&kernel, dir.path(), &schema);
    let saved_bytes = std::fs::read(&data).unwrap();

    // an unresolved reference makes a strict save fail...
    let p = kernel.get_object("Parent", "p").unwrap();
    kernel
        .set_relationship(
            p,
            "kid",
            ObjRef::Unresolved {
                class: "Ghost".into(),
                id: "g".into(),
            },
        )
        .unwrap();
    let err = kernel.save_data(&data).unwrap_err();
    assert!(matches!(err, OksError::Consistency { .. }), "got {err}");
    assert_eq!(std::fs::read(&data).unwrap(), saved_bytes);

    // ...and a tolerant one writes it through
    kernel
        .save_data_as_format(&data, FileFormat::Data, true)
        .unwrap();
    assert_ne!(std::fs::read(&data).unwrap(), saved_bytes);
}

#[test]
fn loading_twice_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let schema = write_fixture_schema(dir.path());
    let writer = fresh_kernel();
    let data = write_fixture_data(&writer, dir.path(), &schema);

    let kernel = fresh_kernel();
    let first = kernel.load_file(data.to_str().unwrap()).unwrap();
    let second = kernel.load_file(data.to_str().unwrap()).unwrap();
    assert_eq!(first, second);
    assert_eq!(kernel.number_of_objects(), 3);
}

#[test]
fn save_as_renames_and_rewrites() {
    let dir = TempDir::new().unwrap();
    let schema = write_fixture_schema(dir.path());
    let kernel = fresh_kernel();
    let data = write_fixture_data(&kernel, dir.path(), &schema);

    let renamed = kernel
        .save_as(&data, dir.path().join("renamed.data.xml").to_str().unwrap())
        .unwrap();
    assert!(renamed.exists());
    assert!(kernel.data_file_names().contains(&renamed));
    assert!(!kernel.data_file_names().contains(&data));

    let reader = fresh_kernel();
    reader.load_file(renamed.to_str().unwrap()).unwrap();
    assert_fixture_world(&reader);
}

#[test]
fn close_data_detaches_its_objects() {
    let dir = TempDir::new().unwrap();
    let schema = write_fixture_schema(dir.path());
    let kernel = fresh_kernel();
    let data = write_fixture_data(&kernel, dir.path(), &schema);

    kernel.close_data(&data).unwrap();
    assert_eq!(kernel.number_of_objects(), 0);
    assert!(kernel.get_object("Parent", "p").is_none());
    // the schema survives
    assert!(kernel.has_class("Parent"));
}

#[test]
fn status_polling_sees_external_modification() {
    let dir = TempDir::new().unwrap();
    let schema = write_fixture_schema(dir.path());
    let kernel = fresh_kernel();
    let data = write_fixture_data(&kernel, dir.path(), &schema);

    let status = kernel
        .with_file(&data, |f| f.update_status_of_file())
        .unwrap();
    assert_eq!(status, oks_kernel::FileStatus::Unchanged);

    let mut bytes = std::fs::read(&data).unwrap();
    bytes.extend_from_slice(b"\n<!-- touched -->\n");
    std::fs::write(&data, bytes).unwrap();
    let status = kernel
        .with_file(&data, |f| f.update_status_of_file())
        .unwrap();
    assert_eq!(status, oks_kernel::FileStatus::Modified);
}

/// A syntactically complete data file with the given includes and body.
fn data_file_text(includes: &[&str], body: &str) -> String {
    let mut text = String::from(
        "<?xml version=\"1.0\" encoding=\"ASCII\"?>\n\n<!-- oks-data version 2.0 -->\n\n\n<oks-data>\n\n<info name=\"\" type=\"\" num-of-items=\"0\" oks-format=\"data\" oks-version=\"test\" created-by=\"tester\" created-on=\"testhost\" creation-time=\"20240101T000000\"/>\n\n",
    );
    if !includes.is_empty() {
        text.push_str("<include>\n");
        for include in includes {
            text.push_str(&format!(" <file path=\"{include}\"/>\n"));
        }
        text.push_str("</include>\n\n");
    }
    text.push_str(body);
    text.push_str("\n</oks-data>\n");
    text
}
