//! The AMF3 decoder: dispatches on the type marker byte and reconstructs an
//! [`AmfValue`] tree, consulting [`Context`] for every reference/trait header
//! along the way (§4.4).

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

use bytes::{Buf, Bytes};
use flate2::read::ZlibDecoder;

use crate::class::{
    AliasRegistry, ClassAlias, ClassDefinition, DynamicAlias, ObjectEncoding, ProxyAlias,
};
use crate::context::Context;
use crate::error::AmfError;
use crate::stream::DataInput;
use crate::value::{AmfValue, ByteArrayValue, Key, MixedArray, PropertyMap};
use crate::varint::read_u29;

/// Caps recursive `read_element` depth so a malicious or corrupt stream
/// can't blow the native stack via self-nested arrays/objects. Not part of
/// the original wire format; a safety addition for untrusted input (see
/// DESIGN.md).
const MAX_NESTING_DEPTH: usize = 64;

/// Decode-time knobs. `strict` governs what happens when an inline class
/// name has no registered alias; `use_proxies` and `timezone_offset` mirror
/// their encode-side counterparts so a round-trip can share one value.
#[derive(Debug, Clone)]
pub struct DecoderOptions {
    /// Recognize and transparently unwrap `ArrayCollection`/`ObjectProxy`
    /// wrappers back into a plain `List`/`Dict`.
    pub use_proxies: bool,
    /// Fail with `UnknownClassAlias` instead of synthesizing a typed-object
    /// placeholder when an inline class name isn't registered.
    pub strict: bool,
    /// Milliseconds added to every decoded `Date`.
    pub timezone_offset: Option<i64>,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        DecoderOptions {
            use_proxies: false,
            strict: false,
            timezone_offset: None,
        }
    }
}

/// Decodes a stream of AMF3 elements. Owns the reference [`Context`] for as
/// long as the caller keeps it around; [`Context::clear`] resets it between
/// independent top-level messages that must not share references.
#[derive(Debug)]
pub struct Decoder {
    pub context: Context,
    pub options: DecoderOptions,
    registry: AliasRegistry,
    depth: usize,
}

impl Decoder {
    pub fn new(registry: AliasRegistry, options: DecoderOptions) -> Self {
        let mut context = Context::new();
        context.timezone_offset = options.timezone_offset;

        Decoder {
            context,
            options,
            registry,
            depth: 0,
        }
    }

    /// Decodes a single element from the front of `buf`.
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        self.read_element(buf)
    }

    /// Decodes every element `buf` holds, stopping cleanly at end of stream
    /// (§7): `EndOfStream` on the first byte of an element is not an error
    /// here, it's the batch terminator.
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();

        loop {
            if !buf.has_remaining() {
                break;
            }

            match self.read_element(buf) {
                Ok(value) => values.push(value),
                Err(AmfError::EndOfStream) => break,
                Err(err) => return Err(err),
            }
        }

        Ok(values)
    }

    pub(crate) fn read_element(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        self.depth += 1;

        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::NestingTooDeep);
        }

        let result = self.read_element_inner(buf);
        self.depth -= 1;
        result
    }

    fn read_element_inner(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if !buf.has_remaining() {
            return Err(AmfError::EndOfStream);
        }

        match buf.get_u8() {
            0x00 => Ok(AmfValue::Undefined),
            0x01 => Ok(AmfValue::Null),
            0x02 => Ok(AmfValue::Boolean(false)),
            0x03 => Ok(AmfValue::Boolean(true)),
            0x04 => self.read_integer(buf),
            0x05 => self.read_number(buf),
            0x06 => Ok(AmfValue::String(self.read_string_value(buf)?)),
            0x07 => self.read_xml(buf, true),
            0x08 => self.read_date(buf),
            0x09 => self.read_array(buf),
            0x0A => self.read_object(buf),
            0x0B => self.read_xml(buf, false),
            0x0C => self.read_byte_array(buf),
            other => Err(AmfError::Decode(format!("unknown AMF3 type marker 0x{:02X}", other))),
        }
    }

    fn read_integer(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let n = read_u29(buf, true)?;
        Ok(AmfValue::Integer(n as i32))
    }

    fn read_number(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        require(buf, 8)?;
        Ok(AmfValue::Double(buf.get_f64()))
    }

    /// Reads a U29-prefixed string, consulting/populating the string
    /// reference table (§4.2). Shared by the `String` type, XML/ByteArray
    /// length-prefixes don't go through here — only the cases that are
    /// genuinely UTF-8 "string" wire values (array keys, class/property
    /// names included).
    fn read_string_value(&mut self, buf: &mut Bytes) -> Result<Rc<str>, AmfError> {
        let header = read_u29(buf, false)? as u32;

        if header & 1 == 0 {
            let idx = header >> 1;
            tracing::trace!(idx, "string reference hit");
            return self.context.strings.get(idx).ok_or(AmfError::UnknownReference(idx));
        }

        let len = (header >> 1) as usize;
        if len == 0 {
            return Ok(Rc::from(""));
        }

        require(buf, len)?;
        let raw = buf.copy_to_bytes(len);
        let s = String::from_utf8(raw.to_vec()).map_err(|_| AmfError::InvalidUtf8)?;
        let rc: Rc<str> = Rc::from(s);
        self.context.strings.append(Rc::clone(&rc));
        Ok(rc)
    }

    fn read_date(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let header = read_u29(buf, false)? as u32;

        if header & 1 == 0 {
            let idx = header >> 1;
            tracing::trace!(idx, "object reference hit (date)");
            return self.context.objects.get(idx).ok_or(AmfError::UnknownReference(idx));
        }

        require(buf, 8)?;
        let mut ms = buf.get_f64();
        if let Some(offset) = self.context.timezone_offset {
            ms += offset as f64;
        }

        // No recursive read follows, so registering after (rather than
        // before, per invariant 4) can't observe a self-reference; this
        // matches the reference decoder's actual order.
        let value = AmfValue::date(ms);
        self.context.objects.append(value.clone());
        Ok(value)
    }

    fn read_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let header = read_u29(buf, false)? as u32;

        if header & 1 == 0 {
            let idx = header >> 1;
            tracing::trace!(idx, "object reference hit (array)");
            return self.context.objects.get(idx).ok_or(AmfError::UnknownReference(idx));
        }

        let size = (header >> 1) as usize;
        let mut key = self.read_string_value(buf)?;

        if key.is_empty() {
            let value = AmfValue::list(Vec::with_capacity(size));
            self.context.objects.append(value.clone());

            match &value {
                AmfValue::List(list) => {
                    for _ in 0..size {
                        let element = self.read_element(buf)?;
                        list.borrow_mut().push(element);
                    }
                }
                _ => unreachable!(),
            }

            Ok(value)
        } else {
            let value = AmfValue::dict(MixedArray::new());
            self.context.objects.append(value.clone());

            match &value {
                AmfValue::Dict(dict) => {
                    while !key.is_empty() {
                        let element = self.read_element(buf)?;
                        dict.borrow_mut().set(Key::Str(key.to_string()), element);
                        key = self.read_string_value(buf)?;
                    }

                    for i in 0..size as u32 {
                        let element = self.read_element(buf)?;
                        dict.borrow_mut().set(Key::Int(i), element);
                    }
                }
                _ => unreachable!(),
            }

            Ok(value)
        }
    }

    fn read_object(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let header = read_u29(buf, false)? as u32;

        if header & 1 == 0 {
            let idx = header >> 1;
            tracing::trace!(idx, "object reference hit");
            let value = self.context.objects.get(idx).ok_or(AmfError::UnknownReference(idx))?;
            return Ok(self.maybe_unwrap_proxy(value));
        }

        let class_def = self.read_class_definition(buf, header >> 1)?;
        let instance = class_def.alias.create_instance();
        let value = AmfValue::Object(Rc::clone(&instance));
        self.context.objects.append(value.clone());

        match class_def.encoding {
            ObjectEncoding::External | ObjectEncoding::Proxy => {
                let mut input = DataInput::new(buf, self);
                class_def.alias.read_external(&instance, &mut input)?;
            }
            ObjectEncoding::Static => {
                let attrs = self.read_static_attrs(buf, &class_def)?;
                class_def.alias.apply_attributes(&instance, attrs);
            }
            ObjectEncoding::Dynamic => {
                let mut attrs = self.read_static_attrs(buf, &class_def)?;
                loop {
                    let key = self.read_string_value(buf)?;
                    if key.is_empty() {
                        break;
                    }
                    let element = self.read_element(buf)?;
                    attrs.set(key.to_string(), element);
                }
                class_def.alias.apply_attributes(&instance, attrs);
            }
        }

        Ok(self.maybe_unwrap_proxy(value))
    }

    /// Unwraps a decoded `ArrayCollection`/`ObjectProxy` back into the plain
    /// value it wraps, but only when `use_proxies` is enabled — mirroring
    /// the encoder only producing these wrappers under the same option
    /// (§6's configuration table). With the option off, a proxy on the wire
    /// decodes as the plain externalizable `Object` it is.
    fn maybe_unwrap_proxy(&self, value: AmfValue) -> AmfValue {
        if self.options.use_proxies {
            unwrap_if_proxy(value)
        } else {
            value
        }
    }

    fn read_static_attrs(&mut self, buf: &mut Bytes, class_def: &ClassDefinition) -> Result<PropertyMap, AmfError> {
        let mut attrs = PropertyMap::new();
        for name in &class_def.static_properties {
            let element = self.read_element(buf)?;
            attrs.set(name.clone(), element);
        }
        Ok(attrs)
    }

    /// Reads the trait header (§4.3): `header` is the U29 value already
    /// shifted past the object-inline bit. Its own low bit distinguishes a
    /// trait reference from an inline trait definition.
    fn read_class_definition(&mut self, buf: &mut Bytes, header: u32) -> Result<Rc<ClassDefinition>, AmfError> {
        if header & 1 == 0 {
            let idx = header >> 1;
            tracing::debug!(idx, "class trait cache hit (reference)");
            return self.context.classes.get_by_index(idx).ok_or(AmfError::UnknownReference(idx));
        }

        let rest = header >> 1;
        let name = self.read_string_value(buf)?;
        let encoding = ObjectEncoding::from_bits(rest)?;
        let attr_len = (rest >> 2) as usize;

        let mut static_properties = Vec::with_capacity(attr_len);
        for _ in 0..attr_len {
            static_properties.push(self.read_string_value(buf)?.to_string());
        }

        tracing::debug!(class = %name, attr_len, "class trait cache miss; compiling new definition");

        let alias = self.resolve_alias(&name)?;
        let def = Rc::new(ClassDefinition::from_wire(alias, encoding, static_properties));
        self.context.classes.append(name.to_string(), Rc::clone(&def));
        Ok(def)
    }

    fn resolve_alias(&self, name: &str) -> Result<Rc<dyn ClassAlias>, AmfError> {
        if name.is_empty() {
            return Ok(DynamicAlias::anonymous());
        }

        if ProxyAlias::matches(name) {
            return Ok(if name == crate::class::ARRAY_COLLECTION_ALIAS {
                ProxyAlias::for_list()
            } else {
                ProxyAlias::for_dict()
            });
        }

        if let Some(alias) = self.registry.by_wire_name(name) {
            return Ok(alias);
        }

        if self.options.strict {
            return Err(AmfError::UnknownClassAlias(name.to_string()));
        }

        tracing::warn!(class = name, "unknown class alias; decoding as typed-object placeholder");
        Ok(DynamicAlias::typed_placeholder(name.to_string()))
    }

    fn read_xml(&mut self, buf: &mut Bytes, legacy: bool) -> Result<AmfValue, AmfError> {
        let header = read_u29(buf, false)? as u32;

        if header & 1 == 0 {
            let idx = header >> 1;
            tracing::trace!(idx, "object reference hit (xml)");
            return self.context.objects.get(idx).ok_or(AmfError::UnknownReference(idx));
        }

        let len = (header >> 1) as usize;
        require(buf, len)?;
        let raw = buf.copy_to_bytes(len);
        let content = String::from_utf8(raw.to_vec()).map_err(|_| AmfError::InvalidUtf8)?;

        let value = AmfValue::xml(content);
        self.context.objects.append(value.clone());

        if legacy {
            if let Some(id) = value.object_identity() {
                self.context.legacy_xml.mark(id);
            }
        }

        Ok(value)
    }

    fn read_byte_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let header = read_u29(buf, false)? as u32;

        if header & 1 == 0 {
            let idx = header >> 1;
            tracing::trace!(idx, "object reference hit (byte array)");
            return self.context.objects.get(idx).ok_or(AmfError::UnknownReference(idx));
        }

        let len = (header >> 1) as usize;
        require(buf, len)?;
        let raw = buf.copy_to_bytes(len).to_vec();
        let (data, compressed) = decompress_if_zlib(&raw);

        let value = AmfValue::ByteArray(Rc::new(RefCell::new(ByteArrayValue { data, compressed })));
        self.context.objects.append(value.clone());
        Ok(value)
    }
}

fn require(buf: &Bytes, n: usize) -> Result<(), AmfError> {
    if buf.remaining() < n {
        Err(AmfError::EndOfStream)
    } else {
        Ok(())
    }
}

/// Unwraps a decoded `ArrayCollection`/`ObjectProxy` Object back into the
/// plain value it wraps. Applies to both a freshly-decoded proxy and one
/// resolved through the object reference table, so repeated references to
/// the same proxy instance stay transparent.
fn unwrap_if_proxy(value: AmfValue) -> AmfValue {
    if let AmfValue::Object(rc) = &value {
        let is_proxy = rc
            .borrow()
            .class_name
            .as_deref()
            .map(ProxyAlias::matches)
            .unwrap_or(false);

        if is_proxy {
            if let Some(inner) = crate::class::unwrap_proxied(rc) {
                return inner;
            }
        }
    }

    value
}

/// Attempts a zlib inflate, per `ByteArray`'s opportunistic compression
/// (§4.4): always try the inflate first and keep the result only if it
/// succeeds; any failure falls back to the raw bytes as uncompressed. No
/// magic-byte pre-check — a valid zlib stream using a non-default window
/// (CMF byte other than 0x78, all legal per RFC 1950) must still be
/// recognized, matching pyamf's unconditional `zlib.decompress` attempt.
fn decompress_if_zlib(raw: &[u8]) -> (Vec<u8>, bool) {
    let mut decoder = ZlibDecoder::new(raw);
    let mut out = Vec::new();
    if decoder.read_to_end(&mut out).is_ok() {
        return (out, true);
    }

    (raw.to_vec(), false)
}
