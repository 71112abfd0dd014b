//! The AMF3 encoder: the mirror of [`crate::decoder::Decoder`], writing an
//! [`AmfValue`] tree out as a wire-format byte stream (§4.5).

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use bytes::{BufMut, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::class::{
    AliasRegistry, ClassAlias, ClassDefinition, DynamicAlias, ObjectEncoding, ProxyAlias,
    ARRAY_COLLECTION_ALIAS,
};
use crate::context::Context;
use crate::error::AmfError;
use crate::stream::DataOutput;
use crate::value::{AmfValue, Key, ObjectValue};
use crate::varint::{encode_signed, write_u29};

/// Encode-time knobs mirroring [`crate::decoder::DecoderOptions`].
#[derive(Debug, Clone)]
pub struct EncoderOptions {
    /// Wrap every `List`/`Dict` in an `ArrayCollection`/`ObjectProxy`
    /// externalizable instead of writing the bare array marker.
    pub use_proxies: bool,
    /// Intern repeated strings via the reference table. When `false`, every
    /// string is emitted inline, trading wire size for simplicity.
    pub string_references: bool,
    /// Milliseconds subtracted from every encoded `Date`.
    pub timezone_offset: Option<i64>,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        EncoderOptions {
            use_proxies: false,
            string_references: true,
            timezone_offset: None,
        }
    }
}

/// Encodes [`AmfValue`]s to AMF3 wire bytes, maintaining the same
/// [`Context`] across calls so repeated composites collapse into
/// references.
#[derive(Debug)]
pub struct Encoder {
    pub context: Context,
    pub options: EncoderOptions,
    registry: AliasRegistry,
}

impl Encoder {
    pub fn new(registry: AliasRegistry, options: EncoderOptions) -> Self {
        let mut context = Context::new();
        context.timezone_offset = options.timezone_offset;

        Encoder { context, options, registry }
    }

    /// Encodes a single element, appending to `buf`.
    pub fn encode(&mut self, buf: &mut BytesMut, value: &AmfValue) -> Result<(), AmfError> {
        self.write_element(buf, value)
    }

    pub(crate) fn write_element(&mut self, buf: &mut BytesMut, value: &AmfValue) -> Result<(), AmfError> {
        match value {
            AmfValue::Undefined => {
                buf.put_u8(0x00);
                Ok(())
            }
            AmfValue::Null => {
                buf.put_u8(0x01);
                Ok(())
            }
            AmfValue::Boolean(false) => {
                buf.put_u8(0x02);
                Ok(())
            }
            AmfValue::Boolean(true) => {
                buf.put_u8(0x03);
                Ok(())
            }
            AmfValue::Integer(n) => self.write_integer(buf, *n),
            AmfValue::Double(d) => {
                buf.put_u8(0x05);
                buf.put_f64(*d);
                Ok(())
            }
            AmfValue::String(s) => {
                buf.put_u8(0x06);
                self.write_string_raw(buf, s);
                Ok(())
            }
            AmfValue::Date(ms) => self.write_date(buf, ms),
            AmfValue::List(list) => self.write_list(buf, list),
            AmfValue::Dict(dict) => self.write_dict(buf, dict),
            AmfValue::Object(obj) => self.write_object(buf, obj),
            AmfValue::ByteArray(ba) => self.write_byte_array(buf, ba),
            AmfValue::Xml(xml) => self.write_xml(buf, value, xml),
        }
    }

    /// An `Integer` outside the 29-bit signed range has no wire
    /// representation of its own kind and is promoted to `Number` (§4.5).
    fn write_integer(&mut self, buf: &mut BytesMut, n: i32) -> Result<(), AmfError> {
        match encode_signed(n) {
            Ok(bits) => {
                buf.put_u8(0x04);
                write_u29(buf, bits);
            }
            Err(_) => {
                buf.put_u8(0x05);
                buf.put_f64(n as f64);
            }
        }
        Ok(())
    }

    /// Writes a U29-prefixed string, consulting/populating the string
    /// reference table unless `string_references` is disabled. Shared by
    /// the `String` type and every raw name (class names, property keys,
    /// array keys) that isn't wrapped in its own type marker.
    fn write_string_raw(&mut self, buf: &mut BytesMut, s: &str) {
        if s.is_empty() {
            write_u29(buf, 0x01);
            return;
        }

        if self.options.string_references {
            if let Some(idx) = self.context.strings.reference_to(s) {
                tracing::trace!(idx, "string reference hit");
                write_u29(buf, idx << 1);
                return;
            }
        }

        write_u29(buf, ((s.len() as u32) << 1) | 1);
        buf.put_slice(s.as_bytes());

        if self.options.string_references {
            self.context.strings.append(Rc::from(s));
        }
    }

    fn write_date(&mut self, buf: &mut BytesMut, ms: &Rc<f64>) -> Result<(), AmfError> {
        buf.put_u8(0x08);

        let handle = AmfValue::Date(Rc::clone(ms));
        if let Some(idx) = self.context.objects.reference_to(&handle) {
            tracing::trace!(idx, "object reference hit (date)");
            write_u29(buf, idx << 1);
            return Ok(());
        }

        // Registered before the payload is written, matching invariant 4.
        self.context.objects.append(handle);
        write_u29(buf, 0x01);

        let mut value = **ms;
        if let Some(offset) = self.context.timezone_offset {
            value -= offset as f64;
        }
        buf.put_f64(value);
        Ok(())
    }

    fn write_list(&mut self, buf: &mut BytesMut, list: &Rc<RefCell<Vec<AmfValue>>>) -> Result<(), AmfError> {
        if self.options.use_proxies {
            let inner = AmfValue::List(Rc::clone(list));
            return self.write_proxied(buf, inner, true);
        }

        let handle = AmfValue::List(Rc::clone(list));
        buf.put_u8(0x09);
        if let Some(idx) = self.context.objects.reference_to(&handle) {
            tracing::trace!(idx, "object reference hit (list)");
            write_u29(buf, idx << 1);
            return Ok(());
        }

        self.context.objects.append(handle);

        let items = list.borrow();
        write_u29(buf, ((items.len() as u32) << 1) | 1);
        self.write_string_raw(buf, ""); // no associative pairs in a dense list

        for item in items.iter() {
            self.write_element(buf, item)?;
        }
        Ok(())
    }

    fn write_dict(&mut self, buf: &mut BytesMut, dict: &Rc<RefCell<crate::value::MixedArray>>) -> Result<(), AmfError> {
        if self.options.use_proxies {
            let inner = AmfValue::Dict(Rc::clone(dict));
            return self.write_proxied(buf, inner, false);
        }

        {
            let map = dict.borrow();
            if map.iter().any(|(key, _)| matches!(key, Key::Str(s) if s.is_empty())) {
                return Err(AmfError::Encode("dict cannot contain an empty string key".to_string()));
            }
        }

        let handle = AmfValue::Dict(Rc::clone(dict));
        buf.put_u8(0x09);
        if let Some(idx) = self.context.objects.reference_to(&handle) {
            tracing::trace!(idx, "object reference hit (dict)");
            write_u29(buf, idx << 1);
            return Ok(());
        }

        self.context.objects.append(handle);

        let map = dict.borrow();

        // Integer keys form the dense part only if the smallest one is 0;
        // otherwise every integer key is reclassified as its decimal-string
        // form and folded into the associative part (§4.5's Dict rule).
        let mut int_keys: Vec<u32> = map.iter().filter_map(|(k, _)| match k {
            Key::Int(i) => Some(*i),
            _ => None,
        }).collect();
        int_keys.sort_unstable();
        let keep_dense = int_keys.first() == Some(&0);
        if !keep_dense {
            int_keys.clear();
        }

        write_u29(buf, ((int_keys.len() as u32) << 1) | 1);

        for (key, val) in map.iter() {
            match key {
                Key::Str(s) => {
                    self.write_string_raw(buf, s);
                    self.write_element(buf, val)?;
                }
                Key::Int(i) if !keep_dense => {
                    self.write_string_raw(buf, &i.to_string());
                    self.write_element(buf, val)?;
                }
                Key::Int(_) => {}
            }
        }
        self.write_string_raw(buf, "");

        if keep_dense {
            for i in &int_keys {
                let val = map.get(&Key::Int(*i)).cloned().unwrap_or(AmfValue::Undefined);
                self.write_element(buf, &val)?;
            }
        }
        Ok(())
    }

    /// Wraps `inner` in the built-in `ArrayCollection`/`ObjectProxy`
    /// externalizable and writes it as a regular `Object` (§4.5's
    /// proxy-wrapping note).
    fn write_proxied(&mut self, buf: &mut BytesMut, inner: AmfValue, is_list: bool) -> Result<(), AmfError> {
        let alias = if is_list { ProxyAlias::for_list() } else { ProxyAlias::for_dict() };
        let wrapper = crate::class::wrap_for_proxy(&alias, inner);
        self.write_object(buf, &wrapper)
    }

    fn write_object(&mut self, buf: &mut BytesMut, obj: &Rc<RefCell<ObjectValue>>) -> Result<(), AmfError> {
        buf.put_u8(0x0A);

        let handle = AmfValue::Object(Rc::clone(obj));
        if let Some(idx) = self.context.objects.reference_to(&handle) {
            tracing::trace!(idx, "object reference hit");
            write_u29(buf, idx << 1);
            return Ok(());
        }

        self.context.objects.append(handle);

        let class_name = obj.borrow().class_name.clone();
        let host_key = class_name.clone().unwrap_or_default();

        let class_def = match self.context.classes.get_by_name(&host_key) {
            Some(def) => {
                let ref_idx = def
                    .reference_index()
                    .expect("a cached class definition always has an assigned reference index");
                tracing::debug!(class = %host_key, idx = ref_idx, "class trait cache hit");
                write_u29(buf, (ref_idx << 2) | 0x01);
                def
            }
            None => {
                let alias = self.resolve_alias_for_encode(class_name.as_deref());
                let def = Rc::new(ClassDefinition::compile(Rc::clone(&alias)));

                tracing::debug!(
                    class = %host_key,
                    encoding = ?def.encoding,
                    attr_len = def.attr_len(),
                    "class trait cache miss; compiling new definition"
                );

                let header = ((def.attr_len() as u32) << 4) | ((encoding_bits(def.encoding)) << 2) | 0x03;
                write_u29(buf, header);
                self.write_string_raw(buf, alias.wire_name());
                for name in &def.static_properties {
                    self.write_string_raw(buf, name);
                }

                self.context.classes.append(host_key, Rc::clone(&def));
                def
            }
        };

        self.write_object_body(buf, obj, &class_def)
    }

    fn write_object_body(&mut self, buf: &mut BytesMut, obj: &Rc<RefCell<ObjectValue>>, def: &ClassDefinition) -> Result<(), AmfError> {
        match def.encoding {
            ObjectEncoding::External | ObjectEncoding::Proxy => {
                let mut output = DataOutput::new(buf, self);
                def.alias.write_external(obj, &mut output)
            }
            ObjectEncoding::Static => {
                let attrs = def.alias.encodable_attributes(obj);
                for name in &def.static_properties {
                    let value = attrs.get(name).cloned().unwrap_or(AmfValue::Undefined);
                    self.write_element(buf, &value)?;
                }
                Ok(())
            }
            ObjectEncoding::Dynamic => {
                let attrs = def.alias.encodable_attributes(obj);
                for name in &def.static_properties {
                    let value = attrs.get(name).cloned().unwrap_or(AmfValue::Undefined);
                    self.write_element(buf, &value)?;
                }
                for (key, value) in attrs.iter() {
                    if def.static_properties.contains(key) {
                        continue;
                    }
                    self.write_string_raw(buf, key);
                    self.write_element(buf, value)?;
                }
                self.write_string_raw(buf, "");
                Ok(())
            }
        }
    }

    fn resolve_alias_for_encode(&self, class_name: Option<&str>) -> Rc<dyn ClassAlias> {
        match class_name {
            None => DynamicAlias::anonymous(),
            Some(name) if name.is_empty() => DynamicAlias::anonymous(),
            Some(name) if ProxyAlias::matches(name) => {
                if name == ARRAY_COLLECTION_ALIAS {
                    ProxyAlias::for_list()
                } else {
                    ProxyAlias::for_dict()
                }
            }
            Some(name) => match self.registry.by_class_name(name) {
                Some(alias) => alias,
                None => {
                    tracing::warn!(class = name, "no registered alias for class; encoding as typed-object placeholder");
                    DynamicAlias::typed_placeholder(name.to_string())
                }
            },
        }
    }

    fn write_byte_array(&mut self, buf: &mut BytesMut, ba: &Rc<RefCell<crate::value::ByteArrayValue>>) -> Result<(), AmfError> {
        buf.put_u8(0x0C);

        let handle = AmfValue::ByteArray(Rc::clone(ba));
        if let Some(idx) = self.context.objects.reference_to(&handle) {
            tracing::trace!(idx, "object reference hit (byte array)");
            write_u29(buf, idx << 1);
            return Ok(());
        }

        self.context.objects.append(handle);

        let value = ba.borrow();
        let payload = if value.compressed {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&value.data).map_err(|e| AmfError::Encode(e.to_string()))?;
            encoder.finish().map_err(|e| AmfError::Encode(e.to_string()))?
        } else {
            value.data.clone()
        };

        write_u29(buf, ((payload.len() as u32) << 1) | 1);
        buf.put_slice(&payload);
        Ok(())
    }

    fn write_xml(&mut self, buf: &mut BytesMut, handle_source: &AmfValue, xml: &Rc<crate::value::XmlValue>) -> Result<(), AmfError> {
        let id = handle_source.object_identity().expect("Xml variant always has an identity");
        let legacy = self.context.legacy_xml.contains(id);
        buf.put_u8(if legacy { 0x07 } else { 0x0B });

        let handle = AmfValue::Xml(Rc::clone(xml));
        if let Some(idx) = self.context.objects.reference_to(&handle) {
            tracing::trace!(idx, "object reference hit (xml)");
            write_u29(buf, idx << 1);
            return Ok(());
        }

        self.context.objects.append(handle);

        let bytes = xml.content.as_bytes();
        write_u29(buf, ((bytes.len() as u32) << 1) | 1);
        buf.put_slice(bytes);
        Ok(())
    }
}

fn encoding_bits(encoding: ObjectEncoding) -> u32 {
    encoding as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{MixedArray, OrderedMap};
    use bytes::Buf;

    fn encoder() -> Encoder {
        Encoder::new(AliasRegistry::new(), EncoderOptions::default())
    }

    #[test]
    fn encodes_primitives() {
        let mut e = encoder();
        let mut buf = BytesMut::new();
        e.encode(&mut buf, &AmfValue::Undefined).unwrap();
        e.encode(&mut buf, &AmfValue::Null).unwrap();
        e.encode(&mut buf, &AmfValue::Boolean(true)).unwrap();
        assert_eq!(&buf[..], &[0x00, 0x01, 0x03]);
    }

    #[test]
    fn encodes_integer_zero_and_minus_one() {
        let mut e = encoder();
        let mut buf = BytesMut::new();
        e.encode(&mut buf, &AmfValue::Integer(0)).unwrap();
        assert_eq!(&buf[..], &[0x04, 0x00]);

        let mut e = encoder();
        let mut buf = BytesMut::new();
        e.encode(&mut buf, &AmfValue::Integer(-1)).unwrap();
        assert_eq!(&buf[..], &[0x04, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn out_of_range_integer_promotes_to_double() {
        let mut e = encoder();
        let mut buf = BytesMut::new();
        e.encode(&mut buf, &AmfValue::Integer(i32::MAX)).unwrap();
        assert_eq!(buf[0], 0x05);
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn string_reference_collapses_repeat() {
        let mut e = encoder();
        let mut buf = BytesMut::new();
        e.encode(&mut buf, &AmfValue::string("hi")).unwrap();
        e.encode(&mut buf, &AmfValue::string("hi")).unwrap();
        assert_eq!(&buf[..], &[0x06, 0x05, b'h', b'i', 0x06, 0x00]);
    }

    #[test]
    fn disabling_string_references_always_inlines() {
        let mut e = Encoder::new(
            AliasRegistry::new(),
            EncoderOptions { string_references: false, ..EncoderOptions::default() },
        );
        let mut buf = BytesMut::new();
        e.encode(&mut buf, &AmfValue::string("hi")).unwrap();
        e.encode(&mut buf, &AmfValue::string("hi")).unwrap();
        assert_eq!(&buf[..], &[0x06, 0x05, b'h', b'i', 0x06, 0x05, b'h', b'i']);
    }

    #[test]
    fn encodes_dense_list() {
        let mut e = encoder();
        let mut buf = BytesMut::new();
        let list = AmfValue::list(vec![AmfValue::Integer(1), AmfValue::Integer(2)]);
        e.encode(&mut buf, &list).unwrap();
        assert_eq!(&buf[..], &[0x09, 0x05, 0x01, 0x04, 0x02, 0x04, 0x04]);
    }

    #[test]
    fn repeated_list_emits_object_reference() {
        let mut e = encoder();
        let mut buf = BytesMut::new();
        let list = AmfValue::list(vec![]);
        e.encode(&mut buf, &list).unwrap();
        e.encode(&mut buf, &list).unwrap();
        assert_eq!(&buf[..], &[0x09, 0x01, 0x01, 0x09, 0x00]);
    }

    #[test]
    fn encodes_mixed_dict() {
        let mut e = encoder();
        let mut buf = BytesMut::new();
        let mut map: MixedArray = OrderedMap::new();
        map.set(Key::Str("a".into()), AmfValue::Integer(1));
        map.set(Key::Int(0), AmfValue::Integer(2));
        let dict = AmfValue::dict(map);
        e.encode(&mut buf, &dict).unwrap();
        assert_eq!(&buf[..], &[0x09, 0x03, 0x03, b'a', 0x04, 0x02, 0x01, 0x04, 0x04]);
    }

    #[test]
    fn non_zero_prefixed_integer_key_reclassifies_as_string() {
        let mut e = encoder();
        let mut buf = BytesMut::new();
        let mut map: MixedArray = OrderedMap::new();
        map.set(Key::Str("a".into()), AmfValue::Integer(1));
        map.set(Key::Int(2), AmfValue::string("x"));
        let dict = AmfValue::dict(map);
        e.encode(&mut buf, &dict).unwrap();

        // size=0 (no dense part): both pairs end up associative, in
        // insertion order, the integer key converted to its decimal string.
        assert_eq!(
            &buf[..],
            &[0x09, 0x01, 0x03, b'a', 0x04, 0x01, 0x03, b'2', 0x06, 0x03, b'x', 0x01]
        );
    }

    #[test]
    fn sparse_dense_keys_are_written_positionally() {
        let mut e = encoder();
        let mut buf = BytesMut::new();
        let mut map: MixedArray = OrderedMap::new();
        map.set(Key::Int(0), AmfValue::Integer(10));
        map.set(Key::Int(5), AmfValue::Integer(50));
        let dict = AmfValue::dict(map);
        e.encode(&mut buf, &dict).unwrap();

        // Two dense values, re-indexed 0 and 1 rather than 0 and 5: marker,
        // size=2 inline, assoc terminator, then the two values in key order.
        assert_eq!(&buf[..], &[0x09, 0x05, 0x01, 0x04, 10, 0x04, 50]);
    }

    #[test]
    fn empty_dict_key_is_rejected() {
        let mut e = encoder();
        let mut buf = BytesMut::new();
        let mut map: MixedArray = OrderedMap::new();
        map.set(Key::Str("".into()), AmfValue::Integer(1));
        let dict = AmfValue::dict(map);

        let err = e.encode(&mut buf, &dict).unwrap_err();
        assert!(matches!(err, AmfError::Encode(_)));
        assert!(buf.is_empty(), "no bytes should be emitted for a rejected dict");
    }

    #[test]
    fn anonymous_objects_share_one_class_reference() {
        let mut e = encoder();
        let mut buf = BytesMut::new();

        let a = AmfValue::object(ObjectValue::anonymous());
        let b = AmfValue::object(ObjectValue::anonymous());
        e.encode(&mut buf, &a).unwrap();
        e.encode(&mut buf, &b).unwrap();

        // Both inline objects (new instances), but the second reuses the
        // first's trait via a class reference rather than redeclaring it.
        assert_eq!(buf[0], 0x0A);
        assert_eq!(&buf[1..3], &[0x0B, 0x01]); // trait inline, dynamic, empty name
        let second_start = 3 + 1; // marker + terminator byte for first object's empty dynamic body
        assert_eq!(buf[second_start], 0x0A);
        assert_eq!(buf[second_start + 1], 0x01); // class reference form: (0<<2)|0x01
    }

    #[test]
    fn byte_array_round_trip_marker_and_length() {
        let mut e = encoder();
        let mut buf = BytesMut::new();
        let ba = AmfValue::byte_array(vec![1, 2, 3]);
        e.encode(&mut buf, &ba).unwrap();
        assert_eq!(buf[0], 0x0C);
        let mut rest = buf.freeze();
        rest.advance(1);
        assert_eq!(&rest[..], &[0x07, 1, 2, 3]);
    }

    #[test]
    fn xml_string_uses_modern_marker_by_default() {
        let mut e = encoder();
        let mut buf = BytesMut::new();
        let xml = AmfValue::xml("<a/>");
        e.encode(&mut buf, &xml).unwrap();
        assert_eq!(buf[0], 0x0B);
    }
}
