use std::{collections::HashMap, fmt, rc::Rc};

use bytes::Bytes;

use crate::{Amf3Value, DecodingError, EncodingError, Object};

/// Aliases of the Flex collection classes whose externalized body is a single AMF3 value.
pub const FLEX_PROXY_ALIASES: [&str; 3] = [
    "flex.messaging.io.ArrayCollection",
    "flex.messaging.io.ArrayList",
    "flex.messaging.io.ObjectProxy",
];

/// How instance data follows a trait header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Sealed members only.
    Static,
    /// Sealed members followed by name/value pairs terminated with an empty name.
    Dynamic,
    /// Body written by an [`Externalizable`] handler.
    Externalizable,
}

/// Wire trait of a class: its alias, encoding and ordered sealed member names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassDefinition {
    alias: String,
    encoding: Encoding,
    static_properties: Vec<String>,
}

impl ClassDefinition {
    /// Class of plain dynamic objects, with an empty alias.
    pub fn anonymous() -> Self {
        Self::dynamic("", Vec::<String>::new())
    }

    pub fn sealed<S: Into<String>>(alias: impl Into<String>, static_properties: Vec<S>) -> Self {
        Self::new(alias, Encoding::Static, static_properties)
    }

    pub fn dynamic<S: Into<String>>(alias: impl Into<String>, static_properties: Vec<S>) -> Self {
        Self::new(alias, Encoding::Dynamic, static_properties)
    }

    pub fn externalizable(alias: impl Into<String>) -> Self {
        Self::new(alias, Encoding::Externalizable, Vec::<String>::new())
    }

    /// Externalizable classes never declare members, `static_properties` is dropped for them.
    pub fn new<S: Into<String>>(
        alias: impl Into<String>,
        encoding: Encoding,
        static_properties: Vec<S>,
    ) -> Self {
        let static_properties = match encoding {
            Encoding::Externalizable => Vec::new(),
            Encoding::Static | Encoding::Dynamic => {
                static_properties.into_iter().map(Into::into).collect()
            }
        };
        Self {
            alias: alias.into(),
            encoding,
            static_properties,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn is_anonymous(&self) -> bool {
        self.alias.is_empty()
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn is_dynamic(&self) -> bool {
        self.encoding == Encoding::Dynamic
    }

    pub fn is_externalizable(&self) -> bool {
        self.encoding == Encoding::Externalizable
    }

    pub fn static_properties(&self) -> &[String] {
        &self.static_properties
    }

    pub fn attr_len(&self) -> usize {
        self.static_properties.len()
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.static_properties.iter().position(|p| p == name)
    }
}

/// Reads an externalized body on behalf of an [`Externalizable`] handler.
pub trait ExternalReader {
    fn read_value(&mut self) -> Result<Amf3Value, DecodingError>;
    fn read_u8(&mut self) -> Result<u8, DecodingError>;
    fn read_u29(&mut self) -> Result<u32, DecodingError>;
    fn read_bytes(&mut self, len: usize) -> Result<Bytes, DecodingError>;
}

/// Writes an externalized body on behalf of an [`Externalizable`] handler.
pub trait ExternalWriter {
    fn write_value(&mut self, value: &Amf3Value) -> Result<(), EncodingError>;
    fn write_u8(&mut self, byte: u8);
    fn write_u29(&mut self, u29: u32) -> Result<(), EncodingError>;
    fn write_bytes(&mut self, bytes: &[u8]);
}

/// Custom body layout of an externalizable class. The decoded body ends up in
/// [`Object::external`].
pub trait Externalizable {
    fn read_external(
        &self,
        class: &ClassDefinition,
        reader: &mut dyn ExternalReader,
    ) -> Result<Vec<Amf3Value>, DecodingError>;

    fn write_external(
        &self,
        object: &Object,
        writer: &mut dyn ExternalWriter,
    ) -> Result<(), EncodingError>;
}

/// Body made of exactly one AMF3 value, used by `ArrayCollection`, `ArrayList` and
/// `ObjectProxy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyBody;

impl Externalizable for ProxyBody {
    fn read_external(
        &self,
        _class: &ClassDefinition,
        reader: &mut dyn ExternalReader,
    ) -> Result<Vec<Amf3Value>, DecodingError> {
        Ok(vec![reader.read_value()?])
    }

    fn write_external(
        &self,
        object: &Object,
        writer: &mut dyn ExternalWriter,
    ) -> Result<(), EncodingError> {
        match object.external.as_slice() {
            [source] => writer.write_value(source),
            body => Err(EncodingError::TraitMismatch {
                alias: object.class.alias().to_string(),
                expected: 1,
                actual: body.len(),
            }),
        }
    }
}

/// Application-side view of a registered class.
#[derive(Clone)]
pub struct ClassBinding {
    pub definition: Rc<ClassDefinition>,
    pub externalizer: Option<Rc<dyn Externalizable>>,
}

impl fmt::Debug for ClassBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBinding")
            .field("definition", &self.definition)
            .field("externalizer", &self.externalizer.is_some())
            .finish()
    }
}

/// Maps aliases found on the wire, or carried by objects being encoded, to registered
/// classes.
pub trait ClassResolver {
    fn resolve_alias(&self, alias: &str) -> Option<ClassBinding>;
}

#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, ClassBinding>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Flex proxy collections bound to [`ProxyBody`].
    pub fn with_flex_classes() -> Self {
        let mut registry = Self::new();
        for alias in FLEX_PROXY_ALIASES {
            registry.register_externalizable(alias, Rc::new(ProxyBody));
        }
        registry
    }

    /// Registers a static or dynamic class. Registering an externalizable definition this
    /// way leaves it without a handler, use `register_externalizable` instead.
    pub fn register(&mut self, definition: ClassDefinition) -> &mut Self {
        self.classes.insert(
            definition.alias().to_string(),
            ClassBinding {
                definition: Rc::new(definition),
                externalizer: None,
            },
        );
        self
    }

    pub fn register_externalizable(
        &mut self,
        alias: impl Into<String>,
        externalizer: Rc<dyn Externalizable>,
    ) -> &mut Self {
        let definition = ClassDefinition::externalizable(alias);
        self.classes.insert(
            definition.alias().to_string(),
            ClassBinding {
                definition: Rc::new(definition),
                externalizer: Some(externalizer),
            },
        );
        self
    }

    pub fn unregister(&mut self, alias: &str) -> Option<ClassBinding> {
        self.classes.remove(alias)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.classes.contains_key(alias)
    }
}

impl ClassResolver for ClassRegistry {
    fn resolve_alias(&self, alias: &str) -> Option<ClassBinding> {
        self.classes.get(alias).cloned()
    }
}
