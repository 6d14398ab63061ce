//! BER-TLV helpers for secure messaging and authentication payloads

use iso7816_tlv::ber::{Tag, Tlv, Value};

use crate::{Error, Result};

/// A data object parsed from a message, with the bytes it occupied on the wire
#[derive(Debug)]
pub(crate) struct DataObject<'a> {
    pub(crate) tlv: Tlv,
    pub(crate) raw: &'a [u8],
}

impl DataObject<'_> {
    /// Whether the object carries `tag`
    pub(crate) fn has_tag(&self, tag: u8) -> bool {
        tag_is(&self.tlv, tag)
    }

    /// Value of a primitive object
    pub(crate) fn primitive(&self) -> Result<&[u8]> {
        primitive_value(&self.tlv)
    }
}

/// Encode a primitive data object
pub(crate) fn primitive(tag: u8, value: &[u8]) -> Result<Vec<u8>> {
    Ok(Tlv::new(Tag::try_from(tag)?, Value::Primitive(value.to_vec()))?.to_vec())
}

/// Encode a constructed object holding a single primitive child
pub(crate) fn wrapped(outer: u8, inner: u8, value: &[u8]) -> Result<Vec<u8>> {
    let child = Tlv::new(Tag::try_from(inner)?, Value::Primitive(value.to_vec()))?;
    Ok(Tlv::new(Tag::try_from(outer)?, Value::Constructed(vec![child]))?.to_vec())
}

/// Split `input` into consecutive data objects
pub(crate) fn parse_objects(input: &[u8]) -> Result<Vec<DataObject<'_>>> {
    let mut objects = Vec::new();
    let mut remaining = input;
    while !remaining.is_empty() {
        let (tlv, rest) = Tlv::parse(remaining);
        let tlv = tlv?;
        let consumed = remaining.len() - rest.len();
        objects.push(DataObject {
            tlv,
            raw: &remaining[..consumed],
        });
        remaining = rest;
    }
    Ok(objects)
}

/// Find the first object carrying `tag`
pub(crate) fn find<'o, 'a>(objects: &'o [DataObject<'a>], tag: u8) -> Option<&'o DataObject<'a>> {
    objects.iter().find(|object| object.has_tag(tag))
}

/// Unwrap `outer { inner }` and return the inner primitive value
pub(crate) fn nested_value(input: &[u8], outer: u8, inner: u8) -> Result<Vec<u8>> {
    let (tlv, rest) = Tlv::parse(input);
    let tlv = tlv?;
    if !rest.is_empty() || !tag_is(&tlv, outer) {
        return Err(Error::Protocol("unexpected dynamic authentication template"));
    }
    match tlv.value() {
        Value::Constructed(children) => children
            .iter()
            .find(|child| tag_is(child, inner))
            .ok_or(Error::Protocol("missing dynamic authentication data"))
            .and_then(|child| primitive_value(child).map(<[u8]>::to_vec)),
        Value::Primitive(_) => Err(Error::Protocol("expected constructed template")),
    }
}

fn tag_is(tlv: &Tlv, tag: u8) -> bool {
    Tag::try_from(tag).is_ok_and(|expected| tlv.tag() == &expected)
}

fn primitive_value(tlv: &Tlv) -> Result<&[u8]> {
    match tlv.value() {
        Value::Primitive(bytes) => Ok(bytes.as_slice()),
        Value::Constructed(_) => Err(Error::Protocol("expected primitive data object")),
    }
}
