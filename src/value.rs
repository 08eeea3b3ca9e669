use std::rc::Rc;

use bytes::Bytes;

use crate::ClassDefinition;

pub(crate) const UNDEFINED: u8 = 0x00;
pub(crate) const NULL: u8 = 0x01;
pub(crate) const FALSE: u8 = 0x02;
pub(crate) const TRUE: u8 = 0x03;
pub(crate) const INTEGER: u8 = 0x04;
pub(crate) const DOUBLE: u8 = 0x05;
pub(crate) const STRING: u8 = 0x06;
pub(crate) const XML_DOC: u8 = 0x07;
pub(crate) const DATE: u8 = 0x08;
pub(crate) const ARRAY: u8 = 0x09;
pub(crate) const OBJECT: u8 = 0x0A;
pub(crate) const XML: u8 = 0x0B;
pub(crate) const BYTE_ARRAY: u8 = 0x0C;
pub(crate) const VECTOR_INT: u8 = 0x0D;
pub(crate) const VECTOR_UINT: u8 = 0x0E;
pub(crate) const VECTOR_DOUBLE: u8 = 0x0F;
pub(crate) const VECTOR_OBJECT: u8 = 0x10;
pub(crate) const DICTIONARY: u8 = 0x11;

/// Decoded AMF3 value.
///
/// Arrays and objects are reference counted. Encoding the same `Rc` twice in one stream
/// emits an object reference the second time, and decoding a reference hands back the
/// same `Rc` that was produced for the first occurrence.
///
/// XML, vector and dictionary payloads are shared too, so the decoder's object table holds
/// them without a second copy. Their identity is not tracked on encode.
#[derive(Debug, Clone, PartialEq)]
pub enum Amf3Value {
    Undefined,
    Null,
    Boolean(bool),
    Integer(i32),
    Double(f64),
    String(String),
    XmlDoc(Rc<str>),
    /// Milliseconds since the Unix epoch, UTC.
    Date(f64),
    Array(Rc<Array>),
    Object(Rc<Object>),
    Xml(Rc<str>),
    ByteArray(Bytes),
    VectorInt {
        fixed_length: bool,
        values: Rc<[i32]>,
    },
    VectorUInt {
        fixed_length: bool,
        values: Rc<[u32]>,
    },
    VectorDouble {
        fixed_length: bool,
        values: Rc<[f64]>,
    },
    VectorObject {
        fixed_length: bool,
        class_name: Option<String>,
        values: Rc<[Amf3Value]>,
    },
    Dictionary {
        weak_references: bool,
        entries: Rc<[(Amf3Value, Amf3Value)]>,
    },
}

impl Amf3Value {
    pub fn array(associative: Vec<(String, Amf3Value)>, dense: Vec<Amf3Value>) -> Self {
        Amf3Value::Array(Rc::new(Array { associative, dense }))
    }

    pub fn object(object: Object) -> Self {
        Amf3Value::Object(Rc::new(object))
    }

    pub fn as_object(&self) -> Option<&Rc<Object>> {
        match self {
            Amf3Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Amf3Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Amf3Value {
    fn from(s: &str) -> Self {
        Amf3Value::String(s.to_string())
    }
}

impl From<String> for Amf3Value {
    fn from(s: String) -> Self {
        Amf3Value::String(s)
    }
}

impl From<i32> for Amf3Value {
    fn from(i: i32) -> Self {
        Amf3Value::Integer(i)
    }
}

impl From<f64> for Amf3Value {
    fn from(d: f64) -> Self {
        Amf3Value::Double(d)
    }
}

impl From<bool> for Amf3Value {
    fn from(b: bool) -> Self {
        Amf3Value::Boolean(b)
    }
}

impl From<Bytes> for Amf3Value {
    fn from(bytes: Bytes) -> Self {
        Amf3Value::ByteArray(bytes)
    }
}

/// ECMA array: ordered string keyed part followed by the dense part.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Array {
    pub associative: Vec<(String, Amf3Value)>,
    pub dense: Vec<Amf3Value>,
}

/// Instance of a class.
///
/// `sealed` holds one value per entry of `class.static_properties()`, in the same order.
/// `dynamic` is only written for dynamic classes and `external` only for externalizable
/// ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub class: Rc<ClassDefinition>,
    pub sealed: Vec<Amf3Value>,
    pub dynamic: Vec<(String, Amf3Value)>,
    pub external: Vec<Amf3Value>,
}

impl Object {
    pub fn new(
        class: impl Into<Rc<ClassDefinition>>,
        sealed: Vec<Amf3Value>,
        dynamic: Vec<(String, Amf3Value)>,
    ) -> Self {
        Self {
            class: class.into(),
            sealed,
            dynamic,
            external: Vec::new(),
        }
    }

    /// Plain `{}` object of the anonymous dynamic class.
    pub fn anonymous(dynamic: Vec<(String, Amf3Value)>) -> Self {
        Self::new(ClassDefinition::anonymous(), Vec::new(), dynamic)
    }

    pub fn externalizable(class: impl Into<Rc<ClassDefinition>>, external: Vec<Amf3Value>) -> Self {
        Self {
            class: class.into(),
            sealed: Vec::new(),
            dynamic: Vec::new(),
            external,
        }
    }

    /// Looks a property up among the sealed values first, then among the dynamic ones.
    pub fn get(&self, name: &str) -> Option<&Amf3Value> {
        if let Some(value) = self
            .class
            .property_index(name)
            .and_then(|idx| self.sealed.get(idx))
        {
            return Some(value);
        }
        self.dynamic
            .iter()
            .find_map(|(key, value)| (key == name).then_some(value))
    }

    /// Sealed properties in declaration order, then dynamic ones.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &Amf3Value)> {
        let sealed = self
            .class
            .static_properties()
            .iter()
            .map(String::as_str)
            .zip(self.sealed.iter());
        let dynamic = self.dynamic.iter().map(|(k, v)| (k.as_str(), v));
        sealed.chain(dynamic)
    }
}
