//! AMF3 (Action Message Format v3) codec.
//!
//! A bidirectional, bit-exact encoder/decoder for the binary wire format
//! Flash/Flex uses to exchange ActionScript 3 object graphs: the U29
//! variable-length integer scheme, the four reference/interning tables that
//! make repeated strings and composite values collapse to back-references,
//! class-trait resolution for typed objects, and the handful of composite
//! types (arrays, dates, XML, byte arrays) layered on top.
//!
//! A real class hierarchy, XML parser, and zlib implementation are
//! deliberately out of scope; this crate consumes them through the
//! [`ClassAlias`]/[`AliasRegistry`] seam and the `flate2` crate rather than
//! reimplementing them.

mod class;
mod context;
mod decoder;
mod encoder;
mod error;
mod stream;
mod value;
mod varint;

pub use class::{AliasRegistry, ClassAlias, ClassDefinition, ObjectEncoding};
pub use context::Context;
pub use decoder::{Decoder, DecoderOptions};
pub use encoder::{Encoder, EncoderOptions};
pub use error::AmfError;
pub use stream::{DataInput, DataOutput};
pub use value::{AmfValue, ByteArrayValue, Key, MixedArray, ObjectValue, PropertyMap, XmlValue};

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Bytes, BytesMut};

    /// A small end-to-end sanity check: encode an anonymous dynamic object
    /// through one context, decode it back through a fresh one, and check
    /// the round trip preserves both shape and values.
    #[test]
    fn round_trips_an_anonymous_object() {
        let mut obj = ObjectValue::anonymous();
        obj.properties.set("name".to_string(), AmfValue::string("amf3-rs"));
        obj.properties.set("count".to_string(), AmfValue::Integer(7));
        let value = AmfValue::object(obj);

        let mut encoder = Encoder::new(AliasRegistry::new(), EncoderOptions::default());
        let mut buf = BytesMut::new();
        encoder.encode(&mut buf, &value).unwrap();

        let mut decoder = Decoder::new(AliasRegistry::new(), DecoderOptions::default());
        let mut bytes: Bytes = buf.freeze();
        let decoded = decoder.decode(&mut bytes).unwrap();

        match decoded {
            AmfValue::Object(obj) => {
                let obj = obj.borrow();
                assert_eq!(obj.class_name, None);
                match obj.properties.get(&"name".to_string()) {
                    Some(AmfValue::String(s)) => assert_eq!(&**s, "amf3-rs"),
                    other => panic!("unexpected {:?}", other),
                }
                assert!(matches!(obj.properties.get(&"count".to_string()), Some(AmfValue::Integer(7))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn round_trips_a_list_through_proxy_wrapping() {
        let list = AmfValue::list(vec![AmfValue::Integer(1), AmfValue::Integer(2)]);

        let mut encoder = Encoder::new(
            AliasRegistry::new(),
            EncoderOptions { use_proxies: true, ..EncoderOptions::default() },
        );
        let mut buf = BytesMut::new();
        encoder.encode(&mut buf, &list).unwrap();

        // On the wire this is a regular externalizable Object (the
        // ArrayCollection wrapper), not a bare Array marker.
        assert_eq!(buf[0], 0x0A);

        let mut decoder = Decoder::new(
            AliasRegistry::new(),
            DecoderOptions { use_proxies: true, ..DecoderOptions::default() },
        );
        let mut bytes: Bytes = buf.freeze();
        let decoded = decoder.decode(&mut bytes).unwrap();

        match decoded {
            AmfValue::List(rc) => {
                let items = rc.borrow();
                assert_eq!(items.len(), 2);
                assert!(matches!(items[0], AmfValue::Integer(1)));
                assert!(matches!(items[1], AmfValue::Integer(2)));
            }
            other => panic!("expected the proxy to unwrap back into a List, got {:?}", other),
        }
    }

    #[test]
    fn proxy_wrapped_list_stays_wrapped_without_use_proxies_on_decode() {
        let list = AmfValue::list(vec![AmfValue::Integer(1)]);

        let mut encoder = Encoder::new(
            AliasRegistry::new(),
            EncoderOptions { use_proxies: true, ..EncoderOptions::default() },
        );
        let mut buf = BytesMut::new();
        encoder.encode(&mut buf, &list).unwrap();

        // Decoding with use_proxies off leaves the ArrayCollection wrapper
        // as a plain externalizable Object instead of unwrapping it.
        let mut decoder = Decoder::new(AliasRegistry::new(), DecoderOptions::default());
        let mut bytes: Bytes = buf.freeze();
        let decoded = decoder.decode(&mut bytes).unwrap();

        match decoded {
            AmfValue::Object(obj) => {
                assert_eq!(obj.borrow().class_name.as_deref(), Some("flex.messaging.io.ArrayCollection"));
            }
            other => panic!("expected an unwrapped proxy Object, got {:?}", other),
        }
    }

    #[test]
    fn round_trips_a_self_referential_list() {
        let list = AmfValue::list(vec![]);
        if let AmfValue::List(rc) = &list {
            rc.borrow_mut().push(list.clone());
        }

        let mut encoder = Encoder::new(AliasRegistry::new(), EncoderOptions::default());
        let mut buf = BytesMut::new();
        encoder.encode(&mut buf, &list).unwrap();

        let mut decoder = Decoder::new(AliasRegistry::new(), DecoderOptions::default());
        let mut bytes: Bytes = buf.freeze();
        let decoded = decoder.decode(&mut bytes).unwrap();

        match decoded {
            AmfValue::List(rc) => {
                let inner = rc.borrow();
                assert_eq!(inner.len(), 1);
                match &inner[0] {
                    AmfValue::List(self_ref) => assert!(std::rc::Rc::ptr_eq(&rc, self_ref)),
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
