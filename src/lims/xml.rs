//! Helpers over the LIMS XML documents.
//!
//! Everything here works on `quick-xml` events so that documents are patched
//! in a single pass and content the crate does not know about is passed
//! through untouched.

use std::fmt::Display;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const UDF_FIELD: &str = "udf:field";
pub const UDF_STRING_TYPE: &str = "String";

/// Element names that are always emitted as JSON arrays.
const FORCED_LISTS: &[&str] = &[UDF_FIELD];

fn xml_err(e: impl Display) -> Error {
    Error::integration(format!("malformed XML from LIMS: {e}"))
}

fn attr_value(e: &BytesStart<'_>, key: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        if attr.key.as_ref() == key.as_bytes() {
            return Ok(Some(attr.unescape_value().map_err(xml_err)?.into_owned()));
        }
    }
    Ok(None)
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// `post-process-uri` of every `input` element in a process document.
pub fn post_process_uris(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut uris = Vec::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"input" => {
                if let Some(uri) = attr_value(&e, "post-process-uri")? {
                    uris.push(uri);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(uris)
}

/// `limsid` attributes of the root element's direct children.
pub fn child_limsids(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut ids = Vec::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                if depth == 1 {
                    ids.extend(attr_value(&e, "limsid")?);
                }
                depth += 1;
            }
            Event::Empty(e) if depth == 1 => ids.extend(attr_value(&e, "limsid")?),
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(ids)
}

/// Text of the `message` element of a LIMS exception document.
pub fn exception_message(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_message = false;
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) if e.local_name().as_ref() == b"message" => in_message = true,
            Event::Text(t) if in_message => return t.unescape().ok().map(|s| s.into_owned()),
            Event::End(e) if e.local_name().as_ref() == b"message" => return None,
            Event::Eof => return None,
            _ => {}
        }
    }
}

/// Sets the user-defined field `name` of a sample document to `value`.
///
/// An existing `udf:field` slot directly under the root is overwritten in
/// place and its type reset to `String`; otherwise a new slot is appended as
/// the root's last child.
pub fn set_udf_field(xml: &str, name: &str, value: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 64));
    let mut depth = 0usize;
    let mut found = false;

    loop {
        let event = reader.read_event().map_err(xml_err)?;
        match event {
            Event::Start(e) if depth == 1 && is_udf_slot(&e, name)? => {
                let end = e.to_end().into_owned();
                reader.read_to_end(end.name()).map_err(xml_err)?;
                write_udf_field(&mut writer, retyped(&e)?, value)?;
                found = true;
            }
            Event::Empty(e) if depth == 1 && is_udf_slot(&e, name)? => {
                write_udf_field(&mut writer, retyped(&e)?, value)?;
                found = true;
            }
            Event::Start(e) => {
                depth += 1;
                writer.write_event(Event::Start(e)).map_err(xml_err)?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 0 && !found {
                    let mut slot = BytesStart::new(UDF_FIELD);
                    slot.push_attribute(("type", UDF_STRING_TYPE));
                    slot.push_attribute(("name", name));
                    write_udf_field(&mut writer, slot, value)?;
                    found = true;
                }
                writer.write_event(Event::End(e)).map_err(xml_err)?;
            }
            Event::Eof => break,
            other => writer.write_event(other).map_err(xml_err)?,
        }
    }

    if !found {
        return Err(xml_err("document has no root element"));
    }
    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

fn is_udf_slot(e: &BytesStart<'_>, name: &str) -> Result<bool> {
    if e.local_name().as_ref() != b"field" {
        return Ok(false);
    }
    Ok(attr_value(e, "name")?.as_deref() == Some(name))
}

fn retyped(e: &BytesStart<'_>) -> Result<BytesStart<'static>> {
    let mut slot = BytesStart::new(qualified_name(e));
    let mut typed = false;
    for attr in e.attributes() {
        let attr = attr.map_err(xml_err)?;
        if attr.key.as_ref() == b"type" {
            slot.push_attribute(("type", UDF_STRING_TYPE));
            typed = true;
        } else {
            slot.push_attribute(attr);
        }
    }
    if !typed {
        slot.push_attribute(("type", UDF_STRING_TYPE));
    }
    Ok(slot)
}

fn write_udf_field(writer: &mut Writer<Vec<u8>>, slot: BytesStart<'_>, value: &str) -> Result<()> {
    let end = BytesEnd::new(qualified_name(&slot));
    writer.write_event(Event::Start(slot)).map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(xml_err)?;
    writer.write_event(Event::End(end)).map_err(xml_err)?;
    Ok(())
}

struct Frame {
    name: String,
    map: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(e: &BytesStart<'_>) -> Result<Self> {
        let mut map = Map::new();
        for attr in e.attributes() {
            let attr = attr.map_err(xml_err)?;
            let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
            let value = attr.unescape_value().map_err(xml_err)?.into_owned();
            map.insert(key, Value::String(value));
        }
        Ok(Self {
            name: qualified_name(e),
            map,
            text: String::new(),
        })
    }

    fn close(self) -> (String, Value) {
        let text = self.text.trim();
        let value = match (self.map.is_empty(), text.is_empty()) {
            (true, true) => Value::Null,
            (true, false) => Value::String(text.to_owned()),
            (false, _) => {
                let mut map = self.map;
                if !text.is_empty() {
                    map.insert("#text".to_owned(), Value::String(text.to_owned()));
                }
                Value::Object(map)
            }
        };
        (self.name, value)
    }
}

fn insert_child(map: &mut Map<String, Value>, name: String, value: Value) {
    let forced = FORCED_LISTS.contains(&name.as_str());
    match map.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None if forced => {
            map.insert(name, Value::Array(vec![value]));
        }
        None => {
            map.insert(name, value);
        }
    }
}

/// Converts a LIMS document to JSON: attributes become `@name` keys, element
/// text becomes `#text` (or the bare value for text-only elements), repeated
/// children become arrays and `udf:field` is always an array.
pub fn to_json(xml: &str) -> Result<Value> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<Frame> = Vec::new();
    let mut root = Map::new();

    let mut close_into = |stack: &mut Vec<Frame>, frame: Frame| {
        let (name, value) = frame.close();
        match stack.last_mut() {
            Some(parent) => insert_child(&mut parent.map, name, value),
            None => insert_child(&mut root, name, value),
        }
    };

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => stack.push(Frame::open(&e)?),
            Event::Empty(e) => {
                let frame = Frame::open(&e)?;
                close_into(&mut stack, frame);
            }
            Event::Text(t) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&t.unescape().map_err(xml_err)?);
                }
            }
            Event::CData(t) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| xml_err("unbalanced closing tag"))?;
                close_into(&mut stack, frame);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(xml_err("unexpected end of document"));
    }
    Ok(Value::Object(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<smp:sample xmlns:udf="http://genologics.com/ri/userdefined" xmlns:smp="http://genologics.com/ri/sample" uri="https://lims.example/api/v2/samples/ADM1" limsid="ADM1">
    <name>Swab 1</name>
    <udf:field type="String" name="Patient Name">Jane Doe</udf:field>
    <udf:field type="Numeric" name="Customer Sample Name">12</udf:field>
    <udf:field type="String" name="Sex"/>
</smp:sample>"#;

    const PROCESS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<prc:process xmlns:prc="http://genologics.com/ri/process" limsid="24-101">
    <input-output-map>
        <input post-process-uri="https://lims.example/api/v2/artifacts/2-1" uri="https://lims.example/api/v2/artifacts/2-0" limsid="2-0"/>
        <output uri="https://lims.example/api/v2/artifacts/92-1" limsid="92-1"/>
    </input-output-map>
    <input-output-map>
        <input post-process-uri="https://lims.example/api/v2/artifacts/2-2" limsid="2-9"/>
    </input-output-map>
</prc:process>"#;

    const ARTIFACT: &str = r#"<art:artifact xmlns:art="http://genologics.com/ri/artifact" limsid="2-1">
    <name>Swab 1</name>
    <sample uri="https://lims.example/api/v2/samples/ADM1" limsid="ADM1"/>
    <sample uri="https://lims.example/api/v2/samples/ADM2" limsid="ADM2"></sample>
    <location><container limsid="27-1"/></location>
</art:artifact>"#;

    #[test]
    fn collects_post_process_uris() {
        let uris = post_process_uris(PROCESS).unwrap();
        assert_eq!(
            uris,
            [
                "https://lims.example/api/v2/artifacts/2-1",
                "https://lims.example/api/v2/artifacts/2-2"
            ]
        );
    }

    #[test]
    fn collects_only_direct_child_limsids() {
        let ids = child_limsids(ARTIFACT).unwrap();
        assert_eq!(ids, ["ADM1", "ADM2"]);
    }

    #[test]
    fn extracts_exception_message() {
        let body = r#"<exc:exception xmlns:exc="http://genologics.com/ri/exception">
  <message>Process not found: 24-999</message>
</exc:exception>"#;
        assert_eq!(
            exception_message(body).as_deref(),
            Some("Process not found: 24-999")
        );
        assert_eq!(exception_message("<html>oops</html>"), None);
    }

    #[test]
    fn overwrites_existing_slot() {
        let patched = set_udf_field(SAMPLE, "Customer Sample Name", "MI20-00007").unwrap();
        assert!(patched.contains(
            r#"<udf:field type="String" name="Customer Sample Name">MI20-00007</udf:field>"#
        ));
        assert!(!patched.contains(">12<"));
        assert_eq!(patched.matches("Customer Sample Name").count(), 1);
        assert!(patched.contains("<name>Swab 1</name>"));
        assert!(patched.contains(r#"<udf:field type="String" name="Patient Name">Jane Doe</udf:field>"#));
    }

    #[test]
    fn fills_empty_slot() {
        let patched = set_udf_field(SAMPLE, "Sex", "F").unwrap();
        assert!(patched.contains(r#"<udf:field type="String" name="Sex">F</udf:field>"#));
    }

    #[test]
    fn appends_missing_slot_before_root_end() {
        let patched = set_udf_field(SAMPLE, "Medical Record Number", "A&B").unwrap();
        assert!(patched.ends_with(
            "<udf:field type=\"String\" name=\"Medical Record Number\">A&amp;B</udf:field></smp:sample>"
        ));
        let json = to_json(&patched).unwrap();
        let fields = json["smp:sample"]["udf:field"].as_array().unwrap();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[3]["#text"], "A&B");
    }

    #[test]
    fn converts_sample_to_json() {
        let json = to_json(SAMPLE).unwrap();
        let sample = &json["smp:sample"];
        assert_eq!(sample["@limsid"], "ADM1");
        assert_eq!(sample["name"], "Swab 1");
        let fields = sample["udf:field"].as_array().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0]["@name"], "Patient Name");
        assert_eq!(fields[0]["#text"], "Jane Doe");
        assert!(fields[2].get("#text").is_none());
    }

    #[test]
    fn single_udf_field_is_still_a_list() {
        let xml = r#"<smp:sample><udf:field name="Sex">M</udf:field><tag>a</tag><tag>b</tag></smp:sample>"#;
        let json = to_json(xml).unwrap();
        assert!(json["smp:sample"]["udf:field"].is_array());
        assert_eq!(json["smp:sample"]["tag"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn rejects_truncated_documents() {
        assert!(to_json("<smp:sample><name>x</name>").is_err());
        assert!(set_udf_field("", "Sex", "F").is_err());
    }
}
