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
use crate::file::FileFormat;
use oks_common::{Attribute, Class, ClassMap, HighCardinality, MemberKind};
use oks_var::{Name, ObjIdx, ObjRef, OksDataType, Value};
use oks_xml::{XmlAttr, XmlInputStream, XmlOutputStream};
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

const OBJ_TAG: &str = "obj";
const OBJ2_TAG: &str = "o";
const ATTR_TAG: &str = "attr";
const REL_TAG: &str = "rel";
const DATA_TAG: &str = "data";
const REF_TAG: &str = "ref";

/// One reverse composite reference: the parent object holding a composite
/// edge to this one, and the relationship it holds it through.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Rcr {
    pub parent: ObjIdx,
    pub relationship: Name,
}

/// A runtime instance: identity, the flat slot array laid out by the
/// class's closure (attributes first, relationships after), the reverse
/// composite references held on it, and its source file.
pub struct OksObject {
    class: Name,
    id: Name,
    file: PathBuf,
    data: Vec<Value>,
    rcrs: Vec<Rcr>,
    duplicated_id_idx: i32,
    user_tag: i64,
    user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl Debug for OksObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OksObject")
            .field("class", &self.class)
            .field("id", &self.id)
            .field("file", &self.file)
            .field("data", &self.data)
            .field("rcrs", &self.rcrs)
            .finish_non_exhaustive()
    }
}

impl OksObject {
    /// An identity-only shell; store bookkeeping and tests.
    pub fn bare(class: Name, id: Name, file: &Path) -> OksObject {
        OksObject {
            class,
            id,
            file: file.to_path_buf(),
            data: Vec::new(),
            rcrs: Vec::new(),
            duplicated_id_idx: -1,
            user_tag: 0,
            user_data: None,
        }
    }

    /// A new instance of `class` with every slot at its schema default.
    pub fn from_defaults(class: &Class, id: Name, file: &Path) -> OksObject {
        let mut data = Vec::with_capacity(class.instance_size());
        for a in class.all_attributes() {
            data.push(a.member.init_value().clone());
        }
        for r in class.all_relationships() {
            data.push(empty_relationship_value(r.member.high_cc()));
        }
        OksObject {
            class: class.name().clone(),
            id,
            file: file.to_path_buf(),
            data,
            rcrs: Vec::new(),
            duplicated_id_idx: -1,
            user_tag: 0,
            user_data: None,
        }
    }

    pub fn class_name(&self) -> &Name {
        &self.class
    }

    pub fn id(&self) -> &Name {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: Name) {
        self.id = id;
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub(crate) fn set_file(&mut self, file: &Path) {
        self.file = file.to_path_buf();
    }

    pub fn data(&self) -> &[Value] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut Vec<Value> {
        &mut self.data
    }

    pub fn slot(&self, at: usize) -> Option<&Value> {
        self.data.get(at)
    }

    pub(crate) fn set_slot(&mut self, at: usize, value: Value) {
        self.data[at] = value;
    }

    pub fn rcrs(&self) -> &[Rcr] {
        &self.rcrs
    }

    pub(crate) fn push_rcr(&mut self, rcr: Rcr) {
        self.rcrs.push(rcr);
    }

    /// Remove one matching RCR; true when something was removed.
    pub(crate) fn pop_rcr(&mut self, parent: ObjIdx, relationship: &str) -> bool {
        match self
            .rcrs
            .iter()
            .position(|r| r.parent == parent && r.relationship.as_str() == relationship)
        {
            Some(at) => {
                self.rcrs.remove(at);
                true
            }
            None => false,
        }
    }

    pub(crate) fn has_rcr(&self, parent: ObjIdx, relationship: &str) -> bool {
        self.rcrs
            .iter()
            .any(|r| r.parent == parent && r.relationship.as_str() == relationship)
    }

    /// Another parent already holds this relationship on us; what
    /// exclusivity forbids.
    pub(crate) fn has_other_parent_via(&self, parent: ObjIdx, relationship: &str) -> bool {
        self.rcrs
            .iter()
            .any(|r| r.relationship.as_str() == relationship && r.parent != parent)
    }

    /// ≥0 when the id was auto-renamed to break a collision at load.
    pub fn duplicated_id_idx(&self) -> i32 {
        self.duplicated_id_idx
    }

    pub(crate) fn set_duplicated_id_idx(&mut self, idx: i32) {
        self.duplicated_id_idx = idx;
    }

    pub fn user_tag(&self) -> i64 {
        self.user_tag
    }

    pub fn set_user_tag(&mut self, tag: i64) {
        self.user_tag = tag;
    }

    pub fn user_data(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.user_data.as_ref()
    }

    /// Consume a parsed shell, keeping only its slot array; reload moves
    /// it into the surviving object.
    pub(crate) fn into_data(mut self) -> Vec<Value> {
        std::mem::take(&mut self.data)
    }

    pub fn set_user_data(&mut self, data: Option<Arc<dyn Any + Send + Sync>>) {
        self.user_data = data;
    }
}

pub(crate) fn empty_relationship_value(high_cc: HighCardinality) -> Value {
    match high_cc {
        HighCardinality::Many => Value::List(vec![]),
        HighCardinality::One => Value::Object(ObjRef::Nil),
    }
}

// ---- XML reading ----

pub(crate) struct ReadCtx<'a> {
    pub classes: &'a ClassMap,
    pub file: &'a Path,
    pub format: FileFormat,
}

impl ReadCtx<'_> {
    pub(crate) fn object_tag(&self) -> &'static str {
        if self.format == FileFormat::Compact {
            OBJ2_TAG
        } else {
            OBJ_TAG
        }
    }
}

/// Read the next `<obj>` (or `<o>`) element, or `None` at `</oks-data>`.
/// The returned object carries parsed slots and no RCRs; bind installs
/// those once references resolve.
pub(crate) fn read_object<R: Read>(
    s: &mut XmlInputStream<R>,
    ctx: &ReadCtx,
) -> Result<Option<OksObject>, OksError> {
    let parse = |e: oks_xml::XmlError| OksError::parse(ctx.file, e);

    let Some(tag) = s.get_tag_start().map_err(parse)? else {
        return Ok(None);
    };
    if tag == "/oks-data" {
        return Ok(None);
    }
    if tag != ctx.object_tag() {
        return Err(parse(s.unexpected_tag(&tag, ctx.object_tag())));
    }
    read_object_after_tag(s, ctx).map(Some)
}

/// Parse an object element whose start tag is already consumed.
pub(crate) fn read_object_after_tag<R: Read>(
    s: &mut XmlInputStream<R>,
    ctx: &ReadCtx,
) -> Result<OksObject, OksError> {
    let parse = |e: oks_xml::XmlError| OksError::parse(ctx.file, e);

    let (class_attr, id_attr) = if ctx.format == FileFormat::Compact {
        ("c", "i")
    } else {
        ("class", "id")
    };
    let mut class_name = String::new();
    let mut id = String::new();
    let mut open = false;
    loop {
        match s.get_attribute().map_err(parse)? {
            XmlAttr::Pair(n, v) => {
                if n == class_attr {
                    class_name = v;
                } else if n == id_attr {
                    id = v;
                } else {
                    return Err(parse(s.unexpected_attribute(&n)));
                }
            }
            XmlAttr::EndOfTag => {
                open = true;
                break;
            }
            XmlAttr::EndOfElement => break,
        }
    }
    if class_name.is_empty() {
        return Err(parse(s.parse_error("object without a class")));
    }
    if id.is_empty() {
        return Err(parse(s.parse_error("object without an id")));
    }
    let class = ctx
        .classes
        .get(class_name.as_str())
        .ok_or_else(|| OksError::UnknownClass(class_name.clone()))?;

    let mut object = OksObject::from_defaults(class, Name::from(id.as_str()), ctx.file);
    if !open {
        return Ok(object);
    }

    loop {
        let tag = s
            .get_tag_start()
            .map_err(parse)?
            .ok_or_else(|| parse(s.parse_error("unterminated object element")))?;
        match tag.as_str() {
            ATTR_TAG => read_attr_element(s, ctx, class, &mut object)?,
            REL_TAG => read_rel_element(s, ctx, class, &mut object)?,
            t if t == format!("/{}", ctx.object_tag()) => break,
            other => return Err(parse(s.unexpected_tag(other, "attr or rel"))),
        }
    }
    Ok(object)
}

fn read_attr_element<R: Read>(
    s: &mut XmlInputStream<R>,
    ctx: &ReadCtx,
    class: &Class,
    object: &mut OksObject,
) -> Result<(), OksError> {
    let parse = |e: oks_xml::XmlError| OksError::parse(ctx.file, e);

    let mut name = String::new();
    let mut type_text: Option<String> = None;
    let mut single_val: Option<String> = None;
    let mut num: Option<usize> = None;
    let mut open = false;
    loop {
        match s.get_attribute().map_err(parse)? {
            XmlAttr::Pair(n, v) => match n.as_str() {
                "name" => name = v,
                "type" => type_text = Some(v),
                "val" => single_val = Some(v),
                "num" => num = v.parse().ok(),
                other => return Err(parse(s.unexpected_attribute(other))),
            },
            XmlAttr::EndOfTag => {
                open = true;
                break;
            }
            XmlAttr::EndOfElement => break,
        }
    }

    // collect the value tokens regardless of whether the attribute is
    // known; unknown ones are then discarded in one place
    let mut tokens: Vec<String> = Vec::new();
    let mut multi_shape = num.is_some();
    if let Some(v) = single_val {
        tokens.push(v);
    }
    if open {
        if ctx.format == FileFormat::Compact {
            while let Some(token) = s.get_any_token().map_err(parse)? {
                tokens.push(token);
            }
            multi_shape = true;
            expect_close(s, ctx, ATTR_TAG)?;
        } else {
            multi_shape = true;
            loop {
                let tag = s
                    .get_tag_start()
                    .map_err(parse)?
                    .ok_or_else(|| parse(s.parse_error("unterminated attr element")))?;
                match tag.as_str() {
                    DATA_TAG => {
                        let mut val = None;
                        loop {
                            match s.get_attribute().map_err(parse)? {
                                XmlAttr::Pair(n, v) if n == "val" => val = Some(v),
                                XmlAttr::Pair(n, _) => {
                                    return Err(parse(s.unexpected_attribute(&n)));
                                }
                                XmlAttr::EndOfElement => break,
                                XmlAttr::EndOfTag => {
                                    return Err(parse(
                                        s.parse_error("data element cannot have children"),
                                    ));
                                }
                            }
                        }
                        tokens.push(val.ok_or_else(|| {
                            parse(s.parse_error("data element without a val"))
                        })?);
                    }
                    "/attr" => break,
                    other => return Err(parse(s.unexpected_tag(other, DATA_TAG))),
                }
            }
        }
    }
    if let Some(n) = num
        && n != tokens.len()
    {
        warn!(
            "attribute '{name}' of '{}@{}' declares {n} values but carries {} (file '{}', line {})",
            object.id(),
            object.class_name(),
            tokens.len(),
            ctx.file.display(),
            s.line()
        );
    }

    let Some(info) = class.slot_of(&name) else {
        warn!(
            "attribute '{name}' is not declared by class '{}'; value discarded (file '{}', line {})",
            class.name(),
            ctx.file.display(),
            s.line()
        );
        return Ok(());
    };
    let MemberKind::Attribute(member_at) = info.kind else {
        warn!(
            "'{name}' of class '{}' is a relationship, not an attribute; value discarded (file '{}', line {})",
            class.name(),
            ctx.file.display(),
            s.line()
        );
        return Ok(());
    };
    let attr = &class.all_attributes()[member_at].member;

    let value = assemble_attribute_value(s, ctx, object, attr, type_text, tokens, multi_shape)?;
    if attr.check_range(&value).is_err() {
        warn!(
            "value of attribute '{name}' of '{}@{}' violates range '{}' (file '{}', line {})",
            object.id(),
            object.class_name(),
            attr.range_text(),
            ctx.file.display(),
            s.line()
        );
    }
    object.set_slot(info.slot, value);
    Ok(())
}

/// Turn the collected tokens into a value of the attribute's type and
/// cardinality. A declared foreign type converts through [`Value::coerce`]
/// with a warning, matching how old files with stale types keep loading.
fn assemble_attribute_value<R: Read>(
    s: &mut XmlInputStream<R>,
    ctx: &ReadCtx,
    object: &OksObject,
    attr: &Attribute,
    type_text: Option<String>,
    tokens: Vec<String>,
    multi_shape: bool,
) -> Result<Value, OksError> {
    let target_type = attr.data_type();
    let declared = match type_text.as_deref() {
        None | Some("-") => target_type,
        Some(t) => OksDataType::from_str(t).unwrap_or_else(|_| {
            warn!(
                "unknown type '{t}' of attribute '{}' (file '{}', line {}); using the schema type",
                attr.name(),
                ctx.file.display(),
                s.line()
            );
            target_type
        }),
    };

    let parse_one = |token: &str| -> Result<Value, OksError> {
        if declared == target_type {
            Ok(Value::parse_token(token, target_type, attr.enumerators())?)
        } else {
            // parse in the declared type, then convert; foreign enums parse
            // as text since only the owning attribute knows its table
            let parsed = if declared == OksDataType::Enum {
                Value::String(token.to_string())
            } else {
                Value::parse_token(token, declared, &[])?
            };
            Ok(parsed.coerce(target_type, false, attr.enumerators())?)
        }
    };

    if declared != target_type || (multi_shape != attr.is_multi_value() && !tokens.is_empty()) {
        warn!(
            "converting {}-value {declared} to {}-value {target_type} as required for attribute '{}' of '{}@{}' (file '{}', line {})",
            if multi_shape { "multi" } else { "single" },
            if attr.is_multi_value() { "multi" } else { "single" },
            attr.name(),
            object.id(),
            object.class_name(),
            ctx.file.display(),
            s.line()
        );
    }

    if attr.is_multi_value() {
        let items = tokens
            .iter()
            .map(|t| parse_one(t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::List(items))
    } else {
        match tokens.len() {
            0 => Ok(attr.empty_value().clone()),
            1 => parse_one(&tokens[0]),
            _ => {
                // narrowing keeps the first value, as conversion does
                parse_one(&tokens[0])
            }
        }
    }
}

fn read_rel_element<R: Read>(
    s: &mut XmlInputStream<R>,
    ctx: &ReadCtx,
    class: &Class,
    object: &mut OksObject,
) -> Result<(), OksError> {
    let parse = |e: oks_xml::XmlError| OksError::parse(ctx.file, e);

    let mut name = String::new();
    let mut class_name: Option<String> = None;
    let mut id: Option<String> = None;
    let mut num: Option<usize> = None;
    let mut open = false;
    loop {
        match s.get_attribute().map_err(parse)? {
            XmlAttr::Pair(n, v) => match n.as_str() {
                "name" => name = v,
                "class" => class_name = Some(v),
                "id" => id = Some(v),
                "num" => num = v.parse().ok(),
                other => return Err(parse(s.unexpected_attribute(other))),
            },
            XmlAttr::EndOfTag => {
                open = true;
                break;
            }
            XmlAttr::EndOfElement => break,
        }
    }

    let mut refs: Vec<ObjRef> = Vec::new();
    if let (Some(c), Some(i)) = (&class_name, &id) {
        refs.push(ObjRef::Unresolved {
            class: Name::from(c.as_str()),
            id: Name::from(i.as_str()),
        });
    }
    if open {
        if ctx.format == FileFormat::Compact {
            loop {
                let Some(c) = s.get_any_token().map_err(parse)? else {
                    break;
                };
                let Some(i) = s.get_any_token().map_err(parse)? else {
                    return Err(parse(s.parse_error("reference class without an id")));
                };
                refs.push(ObjRef::Unresolved {
                    class: Name::from(c.as_str()),
                    id: Name::from(i.as_str()),
                });
            }
            expect_close(s, ctx, REL_TAG)?;
        } else {
            loop {
                let tag = s
                    .get_tag_start()
                    .map_err(parse)?
                    .ok_or_else(|| parse(s.parse_error("unterminated rel element")))?;
                match tag.as_str() {
                    REF_TAG => {
                        let mut c = String::new();
                        let mut i = String::new();
                        loop {
                            match s.get_attribute().map_err(parse)? {
                                XmlAttr::Pair(n, v) if n == "class" => c = v,
                                XmlAttr::Pair(n, v) if n == "id" => i = v,
                                XmlAttr::Pair(n, _) => {
                                    return Err(parse(s.unexpected_attribute(&n)));
                                }
                                XmlAttr::EndOfElement => break,
                                XmlAttr::EndOfTag => {
                                    return Err(parse(
                                        s.parse_error("ref element cannot have children"),
                                    ));
                                }
                            }
                        }
                        refs.push(ObjRef::Unresolved {
                            class: Name::from(c.as_str()),
                            id: Name::from(i.as_str()),
                        });
                    }
                    "/rel" => break,
                    other => return Err(parse(s.unexpected_tag(other, REF_TAG))),
                }
            }
        }
    }
    if let Some(n) = num
        && n != refs.len()
    {
        warn!(
            "relationship '{name}' of '{}@{}' declares {n} references but carries {} (file '{}', line {})",
            object.id(),
            object.class_name(),
            refs.len(),
            ctx.file.display(),
            s.line()
        );
    }

    let Some(rel) = class.find_relationship(&name) else {
        warn!(
            "relationship '{name}' is not declared by class '{}'; value discarded (file '{}', line {})",
            class.name(),
            ctx.file.display(),
            s.line()
        );
        return Ok(());
    };
    let info = class.slot_of(&name).unwrap();

    let value = if rel.member.is_multi_value() {
        Value::List(refs.into_iter().map(Value::Object).collect())
    } else {
        if refs.len() > 1 {
            warn!(
                "single-valued relationship '{name}' of '{}@{}' carries {} references; keeping the first (file '{}', line {})",
                object.id(),
                object.class_name(),
                refs.len(),
                ctx.file.display(),
                s.line()
            );
        }
        Value::Object(refs.into_iter().next().unwrap_or(ObjRef::Nil))
    };
    object.set_slot(info.slot, value);
    Ok(())
}

fn expect_close<R: Read>(
    s: &mut XmlInputStream<R>,
    ctx: &ReadCtx,
    tag: &str,
) -> Result<(), OksError> {
    let parse = |e: oks_xml::XmlError| OksError::parse(ctx.file, e);
    let close = s
        .get_tag_start()
        .map_err(parse)?
        .ok_or_else(|| parse(s.parse_error(format!("unterminated {tag} element"))))?;
    if close != format!("/{tag}") {
        return Err(parse(s.unexpected_tag(&close, &format!("/{tag}"))));
    }
    Ok(())
}

// ---- XML writing ----

type IdentFn<'a> = &'a dyn Fn(ObjIdx) -> Option<(Name, Name)>;

fn reference_identity(r: &ObjRef, ident: IdentFn) -> (Name, Name) {
    r.identity(ident)
        .unwrap_or((Name::default(), Name::default()))
}

/// Write one object in the file's format. Resolved references serialize
/// through `ident`; binding guarantees identity is available for anything
/// live.
pub(crate) fn write_object<W: Write>(
    s: &mut XmlOutputStream<W>,
    object: &OksObject,
    class: &Class,
    format: FileFormat,
    ident: IdentFn,
) -> std::io::Result<()> {
    let compact = format == FileFormat::Compact;
    let extended = format == FileFormat::Extended;
    let (tag, class_attr, id_attr) = if compact {
        (OBJ2_TAG, "c", "i")
    } else {
        (OBJ_TAG, "class", "id")
    };

    s.put_start_tag(tag)?;
    s.put_attribute(class_attr, object.class_name())?;
    s.put_attribute(id_attr, object.id())?;
    s.finish_tag()?;
    s.put_eol()?;

    for (i, a) in class.all_attributes().iter().enumerate() {
        let attr = &a.member;
        let value = &object.data()[i];
        s.put_raw(" ")?;
        s.put_start_tag(ATTR_TAG)?;
        s.put_attribute("name", attr.name())?;
        if extended {
            s.put_attribute("type", attr.data_type().into())?;
        }
        match value {
            Value::List(items) => {
                let mut items: Vec<&Value> = items.iter().collect();
                if attr.is_ordered() {
                    items.sort_by(|x, y| {
                        x.cmp_semantic(y, &|_| None)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                }
                if compact {
                    s.put_num_attribute("num", items.len())?;
                    s.finish_tag()?;
                    for item in &items {
                        s.put_raw(" ")?;
                        put_compact_token(s, attr, item)?;
                    }
                    s.put_last_tag(ATTR_TAG)?;
                } else if items.is_empty() {
                    s.finish_empty()?;
                } else {
                    s.finish_tag()?;
                    s.put_eol()?;
                    for item in &items {
                        s.put_raw("  ")?;
                        s.put_start_tag(DATA_TAG)?;
                        s.put_attribute("val", &attr.format_token(item))?;
                        s.finish_empty()?;
                        s.put_eol()?;
                    }
                    s.put_raw(" ")?;
                    s.put_last_tag(ATTR_TAG)?;
                }
            }
            scalar => {
                s.put_attribute("val", &attr.format_token(scalar))?;
                s.finish_empty()?;
            }
        }
        s.put_eol()?;
    }

    for (j, r) in class.all_relationships().iter().enumerate() {
        let rel = &r.member;
        let value = &object.data()[class.all_attributes().len() + j];
        s.put_raw(" ")?;
        s.put_start_tag(REL_TAG)?;
        s.put_attribute("name", rel.name())?;
        match value {
            Value::List(items) => {
                let mut ids: Vec<(Name, Name)> = items
                    .iter()
                    .filter_map(|v| match v {
                        Value::Object(r) => Some(reference_identity(r, ident)),
                        _ => None,
                    })
                    .filter(|(c, _)| !c.is_empty())
                    .collect();
                if rel.is_ordered() {
                    ids.sort();
                }
                if compact {
                    s.put_num_attribute("num", ids.len())?;
                    s.finish_tag()?;
                    for (c, i) in &ids {
                        s.put_raw(" ")?;
                        s.put_quoted(c)?;
                        s.put_raw(" ")?;
                        s.put_quoted(i)?;
                    }
                    s.put_last_tag(REL_TAG)?;
                } else if ids.is_empty() {
                    s.finish_empty()?;
                } else {
                    s.finish_tag()?;
                    s.put_eol()?;
                    for (c, i) in &ids {
                        s.put_raw("  ")?;
                        s.put_start_tag(REF_TAG)?;
                        s.put_attribute("class", c)?;
                        s.put_attribute("id", i)?;
                        s.finish_empty()?;
                        s.put_eol()?;
                    }
                    s.put_raw(" ")?;
                    s.put_last_tag(REL_TAG)?;
                }
            }
            Value::Object(r) => {
                let (c, i) = reference_identity(r, ident);
                if !c.is_empty() {
                    s.put_attribute("class", &c)?;
                    s.put_attribute("id", &i)?;
                }
                s.finish_empty()?;
            }
            other => {
                warn!(
                    "relationship slot '{}' of '{}@{}' holds a non-reference value {other}; written empty",
                    rel.name(),
                    object.id(),
                    object.class_name()
                );
                s.finish_empty()?;
            }
        }
        s.put_eol()?;
    }

    s.put_last_tag(tag)?;
    s.put_eol()?;
    s.put_eol()
}

/// Compact naked values: strings are quoted (they may hold whitespace),
/// everything else is written bare.
fn put_compact_token<W: Write>(
    s: &mut XmlOutputStream<W>,
    attr: &Attribute,
    value: &Value,
) -> std::io::Result<()> {
    let token = attr.format_token(value);
    if attr.data_type() == OksDataType::String {
        s.put_quoted(&token)
    } else {
        s.put_value(&token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oks_common::{LowCardinality, Relationship, registrate_classes};
    use oks_var::IntFormat;
    use pretty_assertions::assert_eq;

    fn test_classes() -> ClassMap {
        let file = Path::new("t.schema.xml");
        let mut a = Class::new("A", "", false, file).unwrap();
        a.add_attribute(
            Attribute::new(
                "x",
                OksDataType::U32,
                false,
                "5",
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
        a.add_attribute(
            Attribute::new(
                "names",
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
        a.add_relationship(
            Relationship::new(
                "kid",
                "A",
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
        a.add_relationship(
            Relationship::new(
                "kids",
                "A",
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
        let mut map = ClassMap::new();
        map.insert(a.name().clone(), a);
        registrate_classes(&mut map).unwrap();
        map
    }

    fn read_one(text: &str, classes: &ClassMap, format: FileFormat) -> OksObject {
        let mut s = XmlInputStream::new(text.as_bytes());
        let ctx = ReadCtx {
            classes,
            file: Path::new("t.data.xml"),
            format,
        };
        read_object(&mut s, &ctx).unwrap().unwrap()
    }

    #[test]
    fn defaults_then_overrides() {
        let classes = test_classes();
        let o = read_one(
            "<obj class=\"A\" id=\"a1\">\n <attr name=\"x\" val=\"7\"/>\n</obj>",
            &classes,
            FileFormat::Data,
        );
        assert_eq!(o.data()[0], Value::U32(7));
        // untouched slots keep schema defaults
        assert_eq!(o.data()[1], Value::List(vec![]));
        assert_eq!(o.data()[2], Value::Object(ObjRef::Nil));
    }

    #[test]
    fn unknown_members_are_discarded() {
        let classes = test_classes();
        let o = read_one(
            "<obj class=\"A\" id=\"a1\">\n <attr name=\"nope\" val=\"7\"/>\n <rel name=\"nada\" class=\"A\" id=\"x\"/>\n</obj>",
            &classes,
            FileFormat::Data,
        );
        assert_eq!(o.data()[0], Value::U32(5));
    }

    #[test]
    fn type_mismatch_converts() {
        let classes = test_classes();
        let o = read_one(
            "<obj class=\"A\" id=\"a1\">\n <attr name=\"x\" type=\"s32\" val=\"9\"/>\n</obj>",
            &classes,
            FileFormat::Data,
        );
        assert_eq!(o.data()[0], Value::U32(9));
    }

    #[test]
    fn references_parse_unresolved() {
        let classes = test_classes();
        let o = read_one(
            "<obj class=\"A\" id=\"a1\">\n <rel name=\"kid\" class=\"A\" id=\"a2\"/>\n <rel name=\"kids\">\n  <ref class=\"A\" id=\"a3\"/>\n  <ref class=\"A\" id=\"a4\"/>\n </rel>\n</obj>",
            &classes,
            FileFormat::Data,
        );
        assert_eq!(
            o.data()[2],
            Value::Object(ObjRef::Unresolved {
                class: "A".into(),
                id: "a2".into()
            })
        );
        let Value::List(kids) = &o.data()[3] else {
            panic!("kids should be a list");
        };
        assert_eq!(kids.len(), 2);
    }

    #[test]
    fn write_read_round_trip_all_formats() {
        let classes = test_classes();
        let class = &classes["A"];
        let mut o = OksObject::from_defaults(class, "a1".into(), Path::new("t.data.xml"));
        o.set_slot(0, Value::U32(9));
        o.set_slot(
            1,
            Value::List(vec![
                Value::String("first one".into()),
                Value::String("second".into()),
            ]),
        );
        o.set_slot(
            2,
            Value::Object(ObjRef::Unresolved {
                class: "A".into(),
                id: "a2".into(),
            }),
        );
        o.set_slot(
            3,
            Value::List(vec![Value::Object(ObjRef::Unresolved {
                class: "A".into(),
                id: "a3".into(),
            })]),
        );

        for format in [FileFormat::Data, FileFormat::Extended, FileFormat::Compact] {
            let mut buf = Vec::new();
            let mut w = XmlOutputStream::new(&mut buf);
            write_object(&mut w, &o, class, format, &|_| None).unwrap();
            let text = String::from_utf8(buf).unwrap();

            let back = read_one(&text, &classes, format);
            assert_eq!(back.id().as_str(), "a1");
            assert_eq!(back.data()[0], o.data()[0], "format {format}");
            assert_eq!(back.data()[1], o.data()[1], "format {format}");
            assert_eq!(back.data()[2], o.data()[2], "format {format}");
            assert_eq!(back.data()[3], o.data()[3], "format {format}");
        }
    }
}
