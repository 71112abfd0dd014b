//! Class-trait resolution
//!
//! Compiles a [`ClassAlias`] (the consumed, host-owned registry entry for a
//! class) into a [`ClassDefinition`] — the encoding kind, static property
//! order, and reference index the encoder/decoder need — and caches it in
//! the [`crate::context::Context`].

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::error::AmfError;
use crate::stream::{DataInput, DataOutput};
use crate::value::{ObjectValue, PropertyMap};

/// How an object's properties are carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectEncoding {
    /// Property names come from the class trait; only values follow.
    Static = 0x00,
    /// The object serializes itself via `read_external`/`write_external`.
    External = 0x01,
    /// Name/value pairs follow until an empty-string terminator.
    Dynamic = 0x02,
    /// An ArrayCollection/ObjectProxy wrapper (proxy-wrapping requested).
    Proxy = 0x03,
}

impl ObjectEncoding {
    pub fn from_bits(bits: u32) -> Result<Self, AmfError> {
        match bits & 0x03 {
            0x00 => Ok(ObjectEncoding::Static),
            0x01 => Ok(ObjectEncoding::External),
            0x02 => Ok(ObjectEncoding::Dynamic),
            0x03 => Ok(ObjectEncoding::Proxy),
            _ => unreachable!(),
        }
    }
}

/// The consumed, host-owned description of a class: its on-wire alias, its
/// encoding flags, and the callbacks needed to construct/read/write an
/// instance. This is the one external collaborator the core depends on for
/// anything beyond anonymous dynamic objects (see §1/§6).
pub trait ClassAlias: fmt::Debug {
    /// The on-wire class name. Empty means anonymous (typed as `Object`).
    fn wire_name(&self) -> &str;

    fn is_external(&self) -> bool;
    fn is_dynamic(&self) -> bool;

    /// Ordered static property names, written/read positionally.
    fn static_attrs(&self) -> &[String];

    /// The full set of properties this alias will actually encode. Used
    /// only to decide `Static` vs `Dynamic` encoding (§3 invariant 6):
    /// `Static` iff non-dynamic and this equals `static_attrs` exactly.
    fn encodable_properties(&self) -> &[String];

    fn create_instance(&self) -> Rc<std::cell::RefCell<ObjectValue>>;

    fn apply_attributes(&self, obj: &Rc<std::cell::RefCell<ObjectValue>>, attrs: PropertyMap);

    fn encodable_attributes(&self, obj: &Rc<std::cell::RefCell<ObjectValue>>) -> PropertyMap;

    fn read_external(
        &self,
        obj: &Rc<std::cell::RefCell<ObjectValue>>,
        input: &mut DataInput<'_>,
    ) -> Result<(), AmfError> {
        let _ = (obj, input);
        Err(AmfError::Decode(format!(
            "class '{}' is marked externalizable but has no read_external implementation",
            self.wire_name()
        )))
    }

    fn write_external(
        &self,
        obj: &Rc<std::cell::RefCell<ObjectValue>>,
        output: &mut DataOutput<'_>,
    ) -> Result<(), AmfError> {
        let _ = (obj, output);
        Err(AmfError::Encode(format!(
            "class '{}' is marked externalizable but has no write_external implementation",
            self.wire_name()
        )))
    }
}

/// A host-owned lookup table mapping wire names and host class names to
/// their [`ClassAlias`]. Constructed and owned by the caller, then handed
/// to an [`crate::encoder::Encoder`]/[`crate::decoder::Decoder`] — a plain
/// struct, not global state, in the shape of the stream registry this
/// codec's sibling modules use elsewhere in this crate's lineage.
#[derive(Debug, Default)]
pub struct AliasRegistry {
    by_wire_name: std::collections::HashMap<String, Rc<dyn ClassAlias>>,
    by_class_name: std::collections::HashMap<String, Rc<dyn ClassAlias>>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `alias` under both its wire name and `class_name` (the key
    /// an `AmfValue::Object`'s `class_name` field carries).
    pub fn register(&mut self, class_name: impl Into<String>, alias: Rc<dyn ClassAlias>) {
        let class_name = class_name.into();

        if !alias.wire_name().is_empty() {
            self.by_wire_name.insert(alias.wire_name().to_string(), Rc::clone(&alias));
        }

        self.by_class_name.insert(class_name, alias);
    }

    pub fn by_wire_name(&self, name: &str) -> Option<Rc<dyn ClassAlias>> {
        self.by_wire_name.get(name).cloned()
    }

    pub fn by_class_name(&self, name: &str) -> Option<Rc<dyn ClassAlias>> {
        self.by_class_name.get(name).cloned()
    }
}

/// A compiled, per-context class trait descriptor, computed once per class
/// and cached in [`crate::context::ClassTable`].
#[derive(Debug)]
pub struct ClassDefinition {
    pub alias: Rc<dyn ClassAlias>,
    reference_index: Cell<Option<u32>>,
    pub encoding: ObjectEncoding,
    pub static_properties: Vec<String>,
}

impl ClassDefinition {
    /// Compiles `alias` into a definition, choosing the encoding per
    /// invariant 6 in §3: `External` iff marked externalizable; else
    /// `Static` iff non-dynamic and `static_attrs == encodable_properties`;
    /// else `Dynamic`.
    pub fn compile(alias: Rc<dyn ClassAlias>) -> Self {
        let encoding = if alias.is_external() {
            ObjectEncoding::External
        } else if !alias.is_dynamic() && alias.static_attrs() == alias.encodable_properties() {
            ObjectEncoding::Static
        } else {
            ObjectEncoding::Dynamic
        };

        // An externalizable class's sealed-member count/names aren't part of
        // the wire format at all (the trait header's remaining bits are
        // meaningless once the external flag is set); keep the definition's
        // property list empty so the header and body writers don't emit any.
        let static_properties = if encoding == ObjectEncoding::External {
            Vec::new()
        } else {
            alias.static_attrs().to_vec()
        };

        ClassDefinition {
            alias,
            reference_index: Cell::new(None),
            encoding,
            static_properties,
        }
    }

    /// Compiles a definition directly from a decoded trait header, where
    /// the encoding and property list are read off the wire rather than
    /// derived from the alias (§4.3).
    pub fn from_wire(alias: Rc<dyn ClassAlias>, encoding: ObjectEncoding, static_properties: Vec<String>) -> Self {
        ClassDefinition {
            alias,
            reference_index: Cell::new(None),
            encoding,
            static_properties,
        }
    }

    pub fn reference_index(&self) -> Option<u32> {
        self.reference_index.get()
    }

    pub(crate) fn set_reference_index(&self, idx: u32) {
        self.reference_index.set(Some(idx));
    }

    pub fn attr_len(&self) -> usize {
        self.static_properties.len()
    }
}

/// The wire name PyAMF's `flex.messaging.io.ArrayCollection` proxy uses to
/// wrap a `List`/`Dict` when proxy-wrapping is requested.
pub const ARRAY_COLLECTION_ALIAS: &str = "flex.messaging.io.ArrayCollection";
/// The wire name for the `ObjectProxy` wrapper around a dynamic `Object`.
pub const OBJECT_PROXY_ALIAS: &str = "flex.messaging.io.ObjectProxy";

const PROXIED_KEY: &str = "__proxied__";

/// A dynamic, non-externalizable alias synthesized by the codec itself
/// rather than looked up in the host's [`AliasRegistry`]: the anonymous
/// `Object` (empty wire name) and, in non-strict decode, a placeholder for a
/// class name the registry doesn't recognize (§4.3/§9).
#[derive(Debug)]
pub struct DynamicAlias {
    wire_name: String,
}

impl DynamicAlias {
    pub fn anonymous() -> Rc<dyn ClassAlias> {
        Rc::new(DynamicAlias { wire_name: String::new() })
    }

    pub fn typed_placeholder(name: String) -> Rc<dyn ClassAlias> {
        Rc::new(DynamicAlias { wire_name: name })
    }
}

impl ClassAlias for DynamicAlias {
    fn wire_name(&self) -> &str {
        &self.wire_name
    }

    fn is_external(&self) -> bool {
        false
    }

    fn is_dynamic(&self) -> bool {
        true
    }

    fn static_attrs(&self) -> &[String] {
        &[]
    }

    fn encodable_properties(&self) -> &[String] {
        &[]
    }

    fn create_instance(&self) -> Rc<std::cell::RefCell<ObjectValue>> {
        let obj = if self.wire_name.is_empty() {
            ObjectValue::anonymous()
        } else {
            ObjectValue::typed(self.wire_name.clone())
        };
        Rc::new(std::cell::RefCell::new(obj))
    }

    fn apply_attributes(&self, obj: &Rc<std::cell::RefCell<ObjectValue>>, attrs: PropertyMap) {
        obj.borrow_mut().properties = attrs;
    }

    fn encodable_attributes(&self, obj: &Rc<std::cell::RefCell<ObjectValue>>) -> PropertyMap {
        obj.borrow().properties.clone()
    }
}

/// The built-in externalizable alias for the two Flex proxy wrappers: its
/// external payload is just a single nested element (the wrapped
/// `List`/`Dict`/`Object`), per the real `ArrayCollection`/`ObjectProxy`
/// wire contract.
#[derive(Debug)]
pub struct ProxyAlias {
    wire_name: &'static str,
}

impl ProxyAlias {
    pub fn for_list() -> Rc<dyn ClassAlias> {
        Rc::new(ProxyAlias { wire_name: ARRAY_COLLECTION_ALIAS })
    }

    pub fn for_dict() -> Rc<dyn ClassAlias> {
        Rc::new(ProxyAlias { wire_name: OBJECT_PROXY_ALIAS })
    }

    pub fn matches(wire_name: &str) -> bool {
        wire_name == ARRAY_COLLECTION_ALIAS || wire_name == OBJECT_PROXY_ALIAS
    }
}

impl ClassAlias for ProxyAlias {
    fn wire_name(&self) -> &str {
        self.wire_name
    }

    fn is_external(&self) -> bool {
        true
    }

    fn is_dynamic(&self) -> bool {
        false
    }

    fn static_attrs(&self) -> &[String] {
        &[]
    }

    fn encodable_properties(&self) -> &[String] {
        &[]
    }

    fn create_instance(&self) -> Rc<std::cell::RefCell<ObjectValue>> {
        Rc::new(std::cell::RefCell::new(ObjectValue::typed(self.wire_name)))
    }

    fn apply_attributes(&self, _obj: &Rc<std::cell::RefCell<ObjectValue>>, _attrs: PropertyMap) {}

    fn encodable_attributes(&self, _obj: &Rc<std::cell::RefCell<ObjectValue>>) -> PropertyMap {
        PropertyMap::new()
    }

    fn read_external(
        &self,
        obj: &Rc<std::cell::RefCell<ObjectValue>>,
        input: &mut DataInput<'_>,
    ) -> Result<(), AmfError> {
        let inner = input.read_element()?;
        obj.borrow_mut().properties.set(PROXIED_KEY.to_string(), inner);
        Ok(())
    }

    fn write_external(
        &self,
        obj: &Rc<std::cell::RefCell<ObjectValue>>,
        output: &mut DataOutput<'_>,
    ) -> Result<(), AmfError> {
        let inner = obj
            .borrow()
            .properties
            .get(&PROXIED_KEY.to_string())
            .cloned()
            .unwrap_or(crate::value::AmfValue::Undefined);
        output.write_element(&inner)
    }
}

/// Extracts the wrapped value a [`ProxyAlias`] stashed during
/// `read_external`, unwrapping a decoded proxy `Object` back into its plain
/// `List`/`Dict`/`Object` for the caller.
pub fn unwrap_proxied(obj: &Rc<std::cell::RefCell<ObjectValue>>) -> Option<crate::value::AmfValue> {
    obj.borrow().properties.get(&PROXIED_KEY.to_string()).cloned()
}

/// Builds the proxy wrapper instance an encoder writes in place of a plain
/// `List`/`Dict` when proxy-wrapping is requested, stashing `inner` where
/// [`ProxyAlias::write_external`] expects it.
pub fn wrap_for_proxy(alias: &Rc<dyn ClassAlias>, inner: crate::value::AmfValue) -> Rc<std::cell::RefCell<ObjectValue>> {
    let obj = alias.create_instance();
    obj.borrow_mut().properties.set(PROXIED_KEY.to_string(), inner);
    obj
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectValue;
    use std::cell::RefCell;

    #[derive(Debug)]
    struct StubAlias {
        wire_name: String,
        dynamic: bool,
        external: bool,
        static_attrs: Vec<String>,
    }

    impl ClassAlias for StubAlias {
        fn wire_name(&self) -> &str {
            &self.wire_name
        }

        fn is_external(&self) -> bool {
            self.external
        }

        fn is_dynamic(&self) -> bool {
            self.dynamic
        }

        fn static_attrs(&self) -> &[String] {
            &self.static_attrs
        }

        fn encodable_properties(&self) -> &[String] {
            &self.static_attrs
        }

        fn create_instance(&self) -> Rc<RefCell<ObjectValue>> {
            Rc::new(RefCell::new(ObjectValue::typed(self.wire_name.clone())))
        }

        fn apply_attributes(&self, obj: &Rc<RefCell<ObjectValue>>, attrs: PropertyMap) {
            obj.borrow_mut().properties = attrs;
        }

        fn encodable_attributes(&self, obj: &Rc<RefCell<ObjectValue>>) -> PropertyMap {
            obj.borrow().properties.clone()
        }
    }

    #[test]
    fn static_encoding_when_attrs_match_and_not_dynamic() {
        let alias = Rc::new(StubAlias {
            wire_name: "Point".into(),
            dynamic: false,
            external: false,
            static_attrs: vec!["x".into(), "y".into()],
        });

        let def = ClassDefinition::compile(alias);
        assert_eq!(def.encoding, ObjectEncoding::Static);
    }

    #[test]
    fn dynamic_encoding_when_marked_dynamic() {
        let alias = Rc::new(StubAlias {
            wire_name: "Point".into(),
            dynamic: true,
            external: false,
            static_attrs: vec!["x".into()],
        });

        let def = ClassDefinition::compile(alias);
        assert_eq!(def.encoding, ObjectEncoding::Dynamic);
    }

    #[test]
    fn external_wins_over_everything() {
        let alias = Rc::new(StubAlias {
            wire_name: "Blob".into(),
            dynamic: false,
            external: true,
            static_attrs: vec![],
        });

        let def = ClassDefinition::compile(alias);
        assert_eq!(def.encoding, ObjectEncoding::External);
    }

    #[test]
    fn external_classes_never_carry_sealed_properties() {
        // Even if a host's alias reports static_attrs for an externalizable
        // class, the trait header's sealed-member bits aren't meaningful
        // once the external flag is set (real decoders never read them).
        let alias = Rc::new(StubAlias {
            wire_name: "Blob".into(),
            dynamic: false,
            external: true,
            static_attrs: vec!["ignored".into()],
        });

        let def = ClassDefinition::compile(alias);
        assert_eq!(def.encoding, ObjectEncoding::External);
        assert!(def.static_properties.is_empty());
        assert_eq!(def.attr_len(), 0);
    }

    #[test]
    fn reference_index_assigned_once() {
        let alias = Rc::new(StubAlias {
            wire_name: "Point".into(),
            dynamic: false,
            external: false,
            static_attrs: vec![],
        });

        let def = ClassDefinition::compile(alias);
        assert_eq!(def.reference_index(), None);
        def.set_reference_index(3);
        assert_eq!(def.reference_index(), Some(3));
    }

    #[test]
    fn registry_resolves_both_directions() {
        let mut registry = AliasRegistry::new();
        let alias: Rc<dyn ClassAlias> = Rc::new(StubAlias {
            wire_name: "com.example.Point".into(),
            dynamic: false,
            external: false,
            static_attrs: vec![],
        });

        registry.register("Point", Rc::clone(&alias));

        assert!(registry.by_wire_name("com.example.Point").is_some());
        assert!(registry.by_class_name("Point").is_some());
        assert!(registry.by_wire_name("missing").is_none());
    }
}
