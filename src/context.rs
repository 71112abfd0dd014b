//! The AMF3 reference context: four parallel tables shared by the encoder
//! and decoder across a single top-level encode/decode pass.
//!
//! A reference index, once assigned, is stable for the lifetime of the
//! context (invariant 1 in §3); tables only shrink via [`Context::clear`].

use std::collections::HashMap;
use std::rc::Rc;

use crate::class::ClassDefinition;
use crate::value::AmfValue;

/// String reference table: interned by value (raw UTF-8 bytes), not
/// identity. Empty strings are never interned (conceptually index -1).
#[derive(Debug, Default)]
pub struct StringTable {
    items: Vec<Rc<str>>,
    index: HashMap<Rc<str>, u32>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }

    /// Interns `s`, returning its reference index. Must not be called with
    /// an empty string.
    pub fn append(&mut self, s: Rc<str>) -> u32 {
        debug_assert!(!s.is_empty(), "empty strings must never be interned");

        let idx = self.items.len() as u32;
        self.index.insert(Rc::clone(&s), idx);
        self.items.push(s);
        idx
    }

    pub fn get(&self, idx: u32) -> Option<Rc<str>> {
        self.items.get(idx as usize).cloned()
    }

    pub fn reference_to(&self, s: &str) -> Option<u32> {
        self.index.get(s).copied()
    }
}

/// Object reference table: keyed by pointer identity (invariant: mutable
/// composite values are interned by identity, not structural equality).
/// Holds `Date`, `List`, `Dict`, `Object`, `ByteArray` and `Xml` values.
#[derive(Debug, Default)]
pub struct ObjectTable {
    items: Vec<AmfValue>,
    index: HashMap<usize, u32>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }

    /// Registers `value` (a composite) and returns its reference index.
    /// Called before the value's contents are read/written, so
    /// self-referential graphs terminate (invariant 4 in §3).
    pub fn append(&mut self, value: AmfValue) -> u32 {
        let idx = self.items.len() as u32;

        if let Some(id) = value.object_identity() {
            self.index.insert(id, idx);
        }

        self.items.push(value);
        idx
    }

    pub fn get(&self, idx: u32) -> Option<AmfValue> {
        self.items.get(idx as usize).cloned()
    }

    pub fn reference_to(&self, value: &AmfValue) -> Option<u32> {
        value.object_identity().and_then(|id| self.index.get(&id).copied())
    }
}

/// Class trait table: dual-indexed by host class name (for encode, to find
/// a previously-resolved `ClassDefinition` for a given class) and by
/// reference index (for decode, to resolve a trait-reference header).
#[derive(Debug, Default)]
pub struct ClassTable {
    by_name: HashMap<String, Rc<ClassDefinition>>,
    by_index: Vec<Rc<ClassDefinition>>,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.by_index.clear();
    }

    pub fn get_by_name(&self, name: &str) -> Option<Rc<ClassDefinition>> {
        self.by_name.get(name).cloned()
    }

    pub fn get_by_index(&self, idx: u32) -> Option<Rc<ClassDefinition>> {
        self.by_index.get(idx as usize).cloned()
    }

    /// Registers `def` under `host_key` (its class name, or a synthetic key
    /// for anonymous objects) and assigns it the next reference index.
    pub fn append(&mut self, host_key: String, def: Rc<ClassDefinition>) -> u32 {
        let idx = self.by_index.len() as u32;
        def.set_reference_index(idx);
        self.by_index.push(Rc::clone(&def));
        self.by_name.insert(host_key, def);
        idx
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }
}

/// Tracks which XML pointer identities were decoded via the legacy
/// `XMLDocument` marker (0x07), so the encoder re-emits them with the same
/// marker rather than the modern `XMLString` one (0x0B).
#[derive(Debug, Default)]
pub struct LegacyXmlSet {
    seen: std::collections::HashSet<usize>,
}

impl LegacyXmlSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }

    pub fn mark(&mut self, id: usize) {
        self.seen.insert(id);
    }

    pub fn contains(&self, id: usize) -> bool {
        self.seen.contains(&id)
    }
}

/// The AMF3 codec context: the four reference tables plus an optional
/// timezone offset applied to `Date` values. Shared between an encoder and
/// decoder only when the caller explicitly reuses one; cleared between
/// independent top-level messages via [`Context::clear`].
///
/// Not `Sync`: its tables use `Rc`, matching §5's "not safe for concurrent
/// use" requirement at the type level rather than leaving it to a doc note.
#[derive(Debug, Default)]
pub struct Context {
    pub strings: StringTable,
    pub objects: ObjectTable,
    pub classes: ClassTable,
    pub legacy_xml: LegacyXmlSet,
    /// Milliseconds to add to a decoded `Date`, or subtract before encoding
    /// one, to reconcile a local/UTC mismatch. `None` leaves dates as-is.
    pub timezone_offset: Option<i64>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.strings.clear();
        self.objects.clear();
        self.classes.clear();
        self.legacy_xml.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_table_round_trips_reference() {
        let mut table = StringTable::new();
        let idx = table.append(Rc::from("hello"));
        assert_eq!(table.reference_to("hello"), Some(idx));
        assert_eq!(table.get(idx).as_deref(), Some("hello"));
    }

    #[test]
    fn object_table_identity_not_structural() {
        let mut table = ObjectTable::new();
        let a = AmfValue::list(vec![]);
        let b = AmfValue::list(vec![]);

        let idx_a = table.append(a.clone());
        assert_eq!(table.reference_to(&a), Some(idx_a));
        assert_eq!(table.reference_to(&b), None, "structurally-equal but distinct objects must not collide");
    }

    #[test]
    fn clear_resets_all_tables() {
        let mut ctx = Context::new();
        ctx.strings.append(Rc::from("x"));
        ctx.objects.append(AmfValue::list(vec![]));
        ctx.legacy_xml.mark(1);

        ctx.clear();

        assert_eq!(ctx.strings.reference_to("x"), None);
        assert_eq!(ctx.objects.get(0), None);
        assert!(!ctx.legacy_xml.contains(1));
    }
}
