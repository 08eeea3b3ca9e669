use std::{collections::HashMap, rc::Rc};

use crate::{Amf3Value, ClassDefinition, DecodingError, ReferenceTable};

/// Per-stream reference tables shared by the encoder and the decoder.
///
/// Each table hands out indices in order of first occurrence, starting at 0, and never
/// removes or replaces an entry. A context belongs to exactly one stream: indices are
/// meaningless outside of it, so every encoder and decoder owns a fresh one.
#[derive(Debug, Default)]
pub struct Context {
    strings: StringTable,
    classes: ClassTable,
    objects: ObjectTable,
}

#[derive(Debug, Default)]
struct StringTable {
    strings: Vec<Rc<str>>,
    indices: HashMap<Rc<str>, usize>,
}

#[derive(Debug, Default)]
struct ClassTable {
    classes: Vec<Rc<ClassDefinition>>,
    indices: HashMap<Rc<ClassDefinition>, usize>,
}

#[derive(Debug, Default)]
struct ObjectTable {
    slots: Vec<Slot>,
    indices: HashMap<Identity, usize>,
}

#[derive(Debug)]
enum Slot {
    /// Reserved while the value's children are being decoded.
    Pending,
    Filled(Amf3Value),
    /// Written by the encoder, has no identity that could be referenced later.
    Opaque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Identity {
    Shared(*const ()),
    Bytes(*const u8, usize),
}

impl Identity {
    fn of(value: &Amf3Value) -> Option<Self> {
        match value {
            Amf3Value::Array(array) => Some(Identity::Shared(Rc::as_ptr(array).cast())),
            Amf3Value::Object(object) => Some(Identity::Shared(Rc::as_ptr(object).cast())),
            Amf3Value::ByteArray(bytes) => Some(Identity::Bytes(bytes.as_ptr(), bytes.len())),
            _ => None,
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry so the context can serve a new stream.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn get_string(&self, index: usize) -> Result<&str, DecodingError> {
        self.strings
            .strings
            .get(index)
            .map(|s| &**s)
            .ok_or(DecodingError::Reference {
                table: ReferenceTable::String,
                index,
            })
    }

    pub fn string_reference(&self, s: &str) -> Option<usize> {
        self.strings.indices.get(s).copied()
    }

    /// Appends a string and returns its index. The empty string is never stored and
    /// yields `None`.
    ///
    /// Every call appends, even for a string that is already in the table: a stream that
    /// repeats a string inline still assigns it a new index. Reverse lookups keep
    /// pointing at the first occurrence.
    pub fn add_string(&mut self, s: &str) -> Option<usize> {
        if s.is_empty() {
            return None;
        }
        let index = self.strings.strings.len();
        let s: Rc<str> = Rc::from(s);
        self.strings.strings.push(s.clone());
        self.strings.indices.entry(s).or_insert(index);
        Some(index)
    }

    pub fn string_count(&self) -> usize {
        self.strings.strings.len()
    }

    pub fn class_by_reference(&self, index: usize) -> Result<Rc<ClassDefinition>, DecodingError> {
        self.classes
            .classes
            .get(index)
            .cloned()
            .ok_or(DecodingError::Reference {
                table: ReferenceTable::Class,
                index,
            })
    }

    pub fn class_reference(&self, class: &ClassDefinition) -> Option<usize> {
        self.classes.indices.get(class).copied()
    }

    pub fn add_class(&mut self, class: Rc<ClassDefinition>) -> usize {
        let index = self.classes.classes.len();
        self.classes.classes.push(class.clone());
        self.classes.indices.entry(class).or_insert(index);
        index
    }

    /// Index the next new class trait will get.
    pub fn class_count(&self) -> usize {
        self.classes.classes.len()
    }

    /// Reserves the next object index before the object's children are decoded, so that
    /// nested complex values get higher indices than their parent.
    pub fn reserve_object(&mut self) -> usize {
        self.objects.slots.push(Slot::Pending);
        self.objects.slots.len() - 1
    }

    pub fn fill_object(&mut self, index: usize, value: Amf3Value) {
        if let Some(slot) = self.objects.slots.get_mut(index) {
            *slot = Slot::Filled(value);
        }
    }

    /// Fails for indices past the end of the table and for slots whose value is still
    /// being decoded.
    pub fn object_by_reference(&self, index: usize) -> Result<Amf3Value, DecodingError> {
        match self.objects.slots.get(index) {
            Some(Slot::Filled(value)) => Ok(value.clone()),
            Some(Slot::Pending) => Err(DecodingError::CyclicReference(index)),
            Some(Slot::Opaque) | None => Err(DecodingError::Reference {
                table: ReferenceTable::Object,
                index,
            }),
        }
    }

    /// Index of a previously added value with the same identity: the same `Rc` for arrays
    /// and objects, the same buffer for byte arrays.
    pub fn object_reference(&self, value: &Amf3Value) -> Option<usize> {
        let identity = Identity::of(value)?;
        self.objects.indices.get(&identity).copied()
    }

    /// Registers a value written inline by the encoder. Values without identity still take
    /// an index so that both sides of the stream count the same way.
    pub fn add_object(&mut self, value: &Amf3Value) -> usize {
        let index = self.objects.slots.len();
        match Identity::of(value) {
            Some(identity) => {
                // The clone keeps the allocation alive, so its address cannot be reused by
                // another value while the context exists.
                self.objects.slots.push(Slot::Filled(value.clone()));
                self.objects.indices.entry(identity).or_insert(index);
            }
            None => self.objects.slots.push(Slot::Opaque),
        }
        index
    }

    pub fn object_count(&self) -> usize {
        self.objects.slots.len()
    }
}
