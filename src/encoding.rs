use std::rc::Rc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::{
    Amf3Config, Amf3Value, Array, ClassDefinition, ClassRegistry, ClassResolver, Context,
    Encoding, EncodingError, ExternalWriter, Externalizable, Object,
    u29::{self, I29_MAX, I29_MIN, U28_MAX},
    value::*,
};

const MAX_SEALED_COUNT: usize = (1 << 25) - 1;
const MAX_CLASS_REFERENCE: usize = (1 << 27) - 1;

const EMPTY_STRING: u32 = 0b1;

// https://github.com/q191201771/doc/blob/master/spec-amf-file-format-spec.pdf
// U29O flags explained in section 3.12.
const OBJECT_INLINE: u32 = 0b0001;
const TRAIT_INLINE: u32 = 0b0010;
const TRAIT_EXTERNALIZABLE: u32 = 0b0100;
const TRAIT_DYNAMIC: u32 = 0b1000;

/// Encode values as one AMF3 stream, sharing reference tables between them.
pub fn encode_amf3_values(amf_values: &[Amf3Value]) -> Result<Bytes, EncodingError> {
    let mut encoder = Amf3Encoder::new(BytesMut::new());
    for value in amf_values {
        encoder.put_value(value)?;
    }
    Ok(encoder.into_inner().freeze())
}

pub struct Amf3Encoder<T> {
    buf: T,
    context: Context,
    resolver: Rc<dyn ClassResolver>,
    config: Amf3Config,
    depth: usize,
}

/// Trait and member values an object is written with, after resolving its class.
struct ObjectLayout<'a> {
    class: Rc<ClassDefinition>,
    body: ObjectBody<'a>,
}

enum ObjectBody<'a> {
    Members {
        sealed: Vec<&'a Amf3Value>,
        dynamic: Vec<(&'a str, &'a Amf3Value)>,
    },
    External(Rc<dyn Externalizable>),
}

impl<T> Amf3Encoder<T>
where
    T: BufMut,
{
    pub fn new(buf: T) -> Self {
        Self::with_config(buf, Amf3Config::default())
    }

    pub fn with_config(buf: T, config: Amf3Config) -> Self {
        Self {
            buf,
            context: Context::new(),
            resolver: Rc::new(ClassRegistry::new()),
            config,
            depth: 0,
        }
    }

    pub fn with_resolver(mut self, resolver: Rc<dyn ClassResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn into_inner(self) -> T {
        self.buf
    }

    pub fn put_value(&mut self, amf3_value: &Amf3Value) -> Result<(), EncodingError> {
        if self.depth >= self.config.max_depth {
            return Err(EncodingError::NestingTooDeep(self.config.max_depth));
        }

        self.depth += 1;
        let result = self.put_marked_value(amf3_value);
        self.depth -= 1;
        result
    }

    fn put_marked_value(&mut self, amf3_value: &Amf3Value) -> Result<(), EncodingError> {
        match amf3_value {
            Amf3Value::Undefined => self.put_marker(UNDEFINED),
            Amf3Value::Null => self.put_marker(NULL),
            Amf3Value::Boolean(b) => self.put_boolean(*b),
            Amf3Value::Integer(i) => self.write_integer(*i)?,
            Amf3Value::Double(d) => self.put_double(*d),
            Amf3Value::String(s) => self.put_string(s)?,
            Amf3Value::XmlDoc(xd) => {
                self.put_complex(XML_DOC, amf3_value, |encoder| encoder.put_utf8(xd))?
            }
            Amf3Value::Date(d) => {
                self.put_complex(DATE, amf3_value, |encoder| encoder.put_date(*d))?
            }
            Amf3Value::Array(array) => {
                self.put_complex(ARRAY, amf3_value, |encoder| encoder.put_array(array))?
            }
            Amf3Value::Object(object) => self.write_object(object)?,
            Amf3Value::Xml(x) => {
                self.put_complex(XML, amf3_value, |encoder| encoder.put_utf8(x))?
            }
            Amf3Value::ByteArray(ba) => self.write_byte_array(ba)?,
            Amf3Value::VectorInt {
                fixed_length,
                values,
            } => self.put_complex(VECTOR_INT, amf3_value, |encoder| {
                encoder.put_vector_int(*fixed_length, values)
            })?,
            Amf3Value::VectorUInt {
                fixed_length,
                values,
            } => self.put_complex(VECTOR_UINT, amf3_value, |encoder| {
                encoder.put_vector_uint(*fixed_length, values)
            })?,
            Amf3Value::VectorDouble {
                fixed_length,
                values,
            } => self.put_complex(VECTOR_DOUBLE, amf3_value, |encoder| {
                encoder.put_vector_double(*fixed_length, values)
            })?,
            Amf3Value::VectorObject {
                fixed_length,
                class_name,
                values,
            } => self.put_complex(VECTOR_OBJECT, amf3_value, |encoder| {
                encoder.put_vector_object(*fixed_length, class_name.as_deref(), values)
            })?,
            Amf3Value::Dictionary {
                weak_references,
                entries,
            } => self.put_complex(DICTIONARY, amf3_value, |encoder| {
                encoder.put_dictionary(*weak_references, entries)
            })?,
        }
        Ok(())
    }

    /// Writes an integer marker and payload. Integers outside of the 29-bit signed range
    /// are written as doubles instead.
    pub fn write_integer(&mut self, i: i32) -> Result<(), EncodingError> {
        if !(I29_MIN..=I29_MAX).contains(&i) {
            trace!(value = i, "Integer does not fit in 29 bits, writing a double");
            self.put_double(f64::from(i));
            return Ok(());
        }

        self.put_marker(INTEGER);
        u29::write_i29(&mut self.buf, i)
    }

    /// Writes a string payload without a marker: a reference when the string was already
    /// written in this stream, inline otherwise. The empty string is always inline.
    pub fn write_string(&mut self, s: &str) -> Result<(), EncodingError> {
        if s.is_empty() {
            return self.put_u29(EMPTY_STRING);
        }

        if let Some(index) = self.context.string_reference(s) {
            return self.put_reference(index);
        }

        self.put_utf8(s)?;
        self.context.add_string(s);
        Ok(())
    }

    /// Writes a byte array marker and payload. Byte arrays are referenced through the
    /// object table, so the same buffer written twice is sent once.
    pub fn write_byte_array(&mut self, bytes: &Bytes) -> Result<(), EncodingError> {
        let amf3_value = Amf3Value::ByteArray(bytes.clone());
        self.put_complex(BYTE_ARRAY, &amf3_value, |encoder| {
            encoder.put_inline_len(bytes.len(), EncodingError::ArrayTooLong)?;
            encoder.buf.put_slice(bytes);
            Ok(())
        })
    }

    /// Writes an object marker and payload, trying an object reference first, then a class
    /// trait reference, and only then a full trait header.
    pub fn write_object(&mut self, object: &Rc<Object>) -> Result<(), EncodingError> {
        let amf3_value = Amf3Value::Object(object.clone());
        self.put_complex(OBJECT, &amf3_value, |encoder| encoder.put_object(object))
    }

    /// Writes the object header referencing `class` if its trait was already written in
    /// this stream. Returns `None` without writing anything otherwise.
    pub fn write_class_reference(
        &mut self,
        class: &ClassDefinition,
    ) -> Result<Option<usize>, EncodingError> {
        let Some(index) = self.context.class_reference(class) else {
            return Ok(None);
        };
        if index > MAX_CLASS_REFERENCE {
            return Err(EncodingError::OutOfRangeU29(index));
        }

        self.put_u29(((index as u32) << 2) | OBJECT_INLINE)?;
        Ok(Some(index))
    }

    fn put_marker(&mut self, marker: u8) {
        self.buf.put_u8(marker);
    }

    fn put_boolean(&mut self, b: bool) {
        match b {
            false => self.put_marker(FALSE),
            true => self.put_marker(TRUE),
        }
    }

    fn put_double(&mut self, d: f64) {
        self.put_marker(DOUBLE);
        self.buf.put_f64(d);
    }

    fn put_string(&mut self, s: &str) -> Result<(), EncodingError> {
        self.put_marker(STRING);
        self.write_string(s)
    }

    fn put_date(&mut self, d: f64) -> Result<(), EncodingError> {
        // For date the only necessary information is if it is a value (`U29D` set to 1).
        // Remaining bits are insignificant, they are set to 0 so the whole value is encoded
        // in 1 byte only.
        self.put_u29(1)?;
        self.buf.put_f64(d);
        Ok(())
    }

    fn put_array(&mut self, array: &Array) -> Result<(), EncodingError> {
        self.put_inline_len(array.dense.len(), EncodingError::ArrayTooLong)?;
        for (key, value) in &array.associative {
            if key.is_empty() {
                warn!("Skipping associative array entry with an empty key");
                continue;
            }
            self.write_string(key)?;
            self.put_value(value)?;
        }
        self.write_string("")?;
        for value in &array.dense {
            self.put_value(value)?;
        }
        Ok(())
    }

    fn put_object(&mut self, object: &Object) -> Result<(), EncodingError> {
        let layout = self.object_layout(object)?;

        // The trait is registered only once its header is complete, a trait cannot
        // reference itself.
        if self.write_class_reference(&layout.class)?.is_none() {
            self.put_trait(&layout.class)?;
            let index = self.context.add_class(layout.class.clone());
            trace!(alias = layout.class.alias(), index, "Class trait registered");
        }

        match layout.body {
            ObjectBody::External(externalizer) => externalizer.write_external(object, self),
            ObjectBody::Members { sealed, dynamic } => {
                for value in sealed {
                    self.put_value(value)?;
                }

                if layout.class.is_dynamic() {
                    for (key, value) in dynamic {
                        if key.is_empty() {
                            warn!(
                                alias = layout.class.alias(),
                                "Skipping dynamic property with an empty name"
                            );
                            continue;
                        }
                        self.write_string(key)?;
                        self.put_value(value)?;
                    }
                    self.write_string("")?;
                }
                Ok(())
            }
        }
    }

    /// Picks the trait an object is written with. A class registered for the object's
    /// alias wins over the one the object carries, its static properties are then looked up
    /// by name.
    fn object_layout<'a>(&self, object: &'a Object) -> Result<ObjectLayout<'a>, EncodingError> {
        let alias = object.class.alias();
        let binding = match object.class.is_anonymous() {
            true => None,
            false => self.resolver.resolve_alias(alias),
        };

        let (class, externalizer) = match binding {
            Some(binding) => (binding.definition, binding.externalizer),
            None if self.config.strict && !object.class.is_anonymous() => {
                return Err(EncodingError::UnresolvedType(alias.to_string()));
            }
            None => (object.class.clone(), None),
        };

        match class.encoding() {
            Encoding::Externalizable => {
                let externalizer =
                    externalizer.ok_or_else(|| EncodingError::UnresolvedType(alias.to_string()))?;
                Ok(ObjectLayout {
                    class,
                    body: ObjectBody::External(externalizer),
                })
            }
            Encoding::Static | Encoding::Dynamic if class == object.class => {
                if object.sealed.len() != class.attr_len() {
                    return Err(EncodingError::TraitMismatch {
                        alias: alias.to_string(),
                        expected: class.attr_len(),
                        actual: object.sealed.len(),
                    });
                }

                let sealed = object.sealed.iter().collect();
                let dynamic = object
                    .dynamic
                    .iter()
                    .map(|(key, value)| (key.as_str(), value))
                    .collect();
                Ok(ObjectLayout {
                    class,
                    body: ObjectBody::Members { sealed, dynamic },
                })
            }
            Encoding::Static | Encoding::Dynamic => {
                let sealed: Vec<&Amf3Value> = class
                    .static_properties()
                    .iter()
                    .filter_map(|name| object.get(name))
                    .collect();
                if sealed.len() != class.attr_len() {
                    return Err(EncodingError::TraitMismatch {
                        alias: alias.to_string(),
                        expected: class.attr_len(),
                        actual: sealed.len(),
                    });
                }

                let undeclared = object
                    .properties()
                    .filter(|(name, _)| class.property_index(name).is_none());
                let dynamic = if class.is_dynamic() {
                    undeclared.collect()
                } else {
                    let dropped = undeclared.count();
                    if dropped > 0 {
                        debug!(
                            alias,
                            dropped,
                            "Dropping properties the sealed class does not declare"
                        );
                    }
                    vec![]
                };

                Ok(ObjectLayout {
                    class,
                    body: ObjectBody::Members { sealed, dynamic },
                })
            }
        }
    }

    fn put_trait(&mut self, class: &ClassDefinition) -> Result<(), EncodingError> {
        let u29o = match class.encoding() {
            Encoding::Externalizable => OBJECT_INLINE | TRAIT_INLINE | TRAIT_EXTERNALIZABLE,
            Encoding::Static | Encoding::Dynamic => {
                let sealed_count = class.attr_len();
                if sealed_count > MAX_SEALED_COUNT {
                    return Err(EncodingError::SealedMembersCountTooLarge(sealed_count));
                }

                let mut u29o = ((sealed_count as u32) << 4) | TRAIT_INLINE | OBJECT_INLINE;
                if class.is_dynamic() {
                    u29o |= TRAIT_DYNAMIC;
                }
                u29o
            }
        };

        self.put_u29(u29o)?;
        self.write_string(class.alias())?;
        for name in class.static_properties() {
            self.write_string(name)?;
        }
        Ok(())
    }

    fn put_vector_int(&mut self, fixed_length: bool, values: &[i32]) -> Result<(), EncodingError> {
        self.put_inline_len(values.len(), EncodingError::VectorTooLong)?;
        self.buf.put_u8(fixed_length.into());
        for int in values {
            self.buf.put_i32(*int);
        }
        Ok(())
    }

    fn put_vector_uint(&mut self, fixed_length: bool, values: &[u32]) -> Result<(), EncodingError> {
        self.put_inline_len(values.len(), EncodingError::VectorTooLong)?;
        self.buf.put_u8(fixed_length.into());
        for uint in values {
            self.buf.put_u32(*uint);
        }
        Ok(())
    }

    fn put_vector_double(
        &mut self,
        fixed_length: bool,
        values: &[f64],
    ) -> Result<(), EncodingError> {
        self.put_inline_len(values.len(), EncodingError::VectorTooLong)?;
        self.buf.put_u8(fixed_length.into());
        for double in values {
            self.buf.put_f64(*double);
        }
        Ok(())
    }

    fn put_vector_object(
        &mut self,
        fixed_length: bool,
        class_name: Option<&str>,
        values: &[Amf3Value],
    ) -> Result<(), EncodingError> {
        self.put_inline_len(values.len(), EncodingError::VectorTooLong)?;
        self.buf.put_u8(fixed_length.into());
        self.write_string(class_name.unwrap_or("*"))?;
        for obj in values {
            self.put_value(obj)?;
        }
        Ok(())
    }

    fn put_dictionary(
        &mut self,
        weak_references: bool,
        entries: &[(Amf3Value, Amf3Value)],
    ) -> Result<(), EncodingError> {
        self.put_inline_len(entries.len(), EncodingError::DictionaryTooLong)?;
        self.buf.put_u8(weak_references.into());
        for (key, value) in entries {
            self.put_value(key)?;
            self.put_value(value)?;
        }
        Ok(())
    }

    /// Writes the marker, then either a reference to a value already in the object table
    /// or, through `put_inline`, the value itself. Inline values are added to the table
    /// before their children are written, the decoder reserves indices in the same order.
    fn put_complex<F>(
        &mut self,
        marker: u8,
        amf3_value: &Amf3Value,
        put_inline: F,
    ) -> Result<(), EncodingError>
    where
        F: FnOnce(&mut Self) -> Result<(), EncodingError>,
    {
        self.put_marker(marker);

        if let Some(index) = self.context.object_reference(amf3_value) {
            trace!(index, "Object reference");
            return self.put_reference(index);
        }

        self.context.add_object(amf3_value);
        put_inline(self)
    }

    fn put_utf8(&mut self, s: &str) -> Result<(), EncodingError> {
        self.put_inline_len(s.len(), EncodingError::StringTooLong)?;
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    fn put_inline_len(
        &mut self,
        len: usize,
        too_long: fn(usize) -> EncodingError,
    ) -> Result<(), EncodingError> {
        if len > U28_MAX as usize {
            return Err(too_long(len));
        }
        self.put_u29(((len as u32) << 1) | 0b1)
    }

    fn put_reference(&mut self, index: usize) -> Result<(), EncodingError> {
        if index > U28_MAX as usize {
            return Err(EncodingError::OutOfRangeU29(index));
        }
        self.put_u29((index as u32) << 1)
    }

    fn put_u29(&mut self, u29: u32) -> Result<(), EncodingError> {
        u29::write_u29(&mut self.buf, u29)
    }
}

impl<T> ExternalWriter for Amf3Encoder<T>
where
    T: BufMut,
{
    fn write_value(&mut self, value: &Amf3Value) -> Result<(), EncodingError> {
        self.put_value(value)
    }

    fn write_u8(&mut self, byte: u8) {
        self.buf.put_u8(byte);
    }

    fn write_u29(&mut self, u29: u32) -> Result<(), EncodingError> {
        self.put_u29(u29)
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }
}

#[cfg(test)]
mod encode_test {
    use std::rc::Rc;

    use bytes::{Bytes, BytesMut};

    use super::*;

    fn encoder() -> Amf3Encoder<BytesMut> {
        Amf3Encoder::new(BytesMut::new())
    }

    fn point(x: i32, y: i32) -> Amf3Value {
        Amf3Value::object(Object::new(
            ClassDefinition::sealed("Point", vec!["x", "y"]),
            vec![Amf3Value::Integer(x), Amf3Value::Integer(y)],
            vec![],
        ))
    }

    #[test]
    fn encode_integer_test() {
        let mut encoder = encoder();
        encoder.write_integer(-2137).unwrap();
        let expected = Bytes::from_iter([INTEGER, 0b11111111, 0b11111111, 0b11110111, 0b10100111]);
        assert_eq!(encoder.into_inner().freeze(), expected);

        let mut encoder = self::encoder();
        encoder.write_integer(-(1 << 28)).unwrap();
        let expected = Bytes::from_iter([INTEGER, 0b11000000, 0b10000000, 0b10000000, 0b00000000]);
        assert_eq!(encoder.into_inner().freeze(), expected);
    }

    #[test]
    fn encode_integer_out_of_range_as_double() {
        let mut encoder = encoder();
        let too_large = (1 << 28) + 3;
        encoder.write_integer(too_large).unwrap();

        let mut expected = BytesMut::new();
        expected.put_u8(DOUBLE);
        expected.put_f64(f64::from(too_large));
        assert_eq!(encoder.into_inner(), expected);
    }

    #[test]
    fn encode_string_references() {
        let mut encoder = encoder();
        encoder.write_string("hello").unwrap();
        encoder.write_string("hello").unwrap();
        encoder.write_string("").unwrap();
        encoder.write_string("").unwrap();

        let expected = Bytes::from_static(&[0x0B, b'h', b'e', b'l', b'l', b'o', 0x00, 0x01, 0x01]);
        assert_eq!(encoder.context().string_count(), 1);
        assert_eq!(encoder.into_inner().freeze(), expected);
    }

    #[test]
    fn encode_trait_reference() {
        let mut encoder = encoder();
        encoder.put_value(&point(1, 2)).unwrap();
        encoder.put_value(&point(3, 4)).unwrap();

        #[rustfmt::skip]
        let expected = Bytes::from_static(&[
            OBJECT, 0x23, 0x0B, b'P', b'o', b'i', b'n', b't', 0x03, b'x', 0x03, b'y',
            INTEGER, 0x01, INTEGER, 0x02,
            OBJECT, 0x01, INTEGER, 0x03, INTEGER, 0x04,
        ]);
        assert_eq!(encoder.context().class_count(), 1);
        assert_eq!(encoder.into_inner().freeze(), expected);
    }

    #[test]
    fn encode_shared_object_reference() {
        let shared = point(1, 2);
        let array = Amf3Value::array(vec![], vec![shared.clone(), shared]);

        let mut encoder = encoder();
        encoder.put_value(&array).unwrap();
        let encoded = encoder.into_inner().freeze();

        // The array takes object index 0, the point index 1.
        assert_eq!(&encoded[encoded.len() - 2..], &[OBJECT, 0x02]);
    }

    #[test]
    fn encode_byte_array_reference() {
        let bytes = Bytes::from_static(b"\x00\x01");
        let mut encoder = encoder();
        encoder.write_byte_array(&bytes).unwrap();
        encoder.write_byte_array(&bytes).unwrap();
        encoder.put_value(&Amf3Value::String("\u{1}".to_string())).unwrap();

        let expected = Bytes::from_static(&[
            BYTE_ARRAY, 0x05, 0x00, 0x01, BYTE_ARRAY, 0x00, STRING, 0x03, 0x01,
        ]);
        assert_eq!(encoder.into_inner().freeze(), expected);
    }

    #[test]
    #[should_panic(expected = "TraitMismatch")]
    fn encode_sealed_object_missing_value() {
        let object = Amf3Value::object(Object::new(
            ClassDefinition::sealed("Point", vec!["x", "y"]),
            vec![Amf3Value::Integer(1)],
            vec![],
        ));
        encoder().put_value(&object).unwrap();
    }

    #[test]
    fn encode_strict_unknown_alias() {
        let config = Amf3Config {
            strict: true,
            ..Default::default()
        };
        let mut encoder = Amf3Encoder::with_config(BytesMut::new(), config);
        assert_eq!(
            encoder.put_value(&point(1, 2)),
            Err(EncodingError::UnresolvedType("Point".to_string()))
        );

        let anonymous = Amf3Value::object(Object::anonymous(vec![("a".to_string(), 1.into())]));
        assert!(encoder.put_value(&anonymous).is_ok());
    }

    #[test]
    fn encode_externalizable_without_handler() {
        let object = Amf3Value::object(Object::externalizable(
            ClassDefinition::externalizable("com.example.Blob"),
            vec![Amf3Value::Null],
        ));
        assert_eq!(
            encoder().put_value(&object),
            Err(EncodingError::UnresolvedType("com.example.Blob".to_string()))
        );
    }

    #[test]
    fn encode_with_registered_layout() {
        let mut registry = ClassRegistry::new();
        registry.register(ClassDefinition::sealed("Point", vec!["x", "y"]));

        // Same alias, but the properties arrive as dynamic pairs in a different order.
        let object = Amf3Value::object(Object::new(
            ClassDefinition::dynamic("Point", Vec::<String>::new()),
            vec![],
            vec![
                ("y".to_string(), 2.into()),
                ("x".to_string(), 1.into()),
                ("z".to_string(), 3.into()),
            ],
        ));

        let mut encoder = encoder().with_resolver(Rc::new(registry));
        encoder.put_value(&object).unwrap();

        let mut expected = self::encoder();
        expected.put_value(&point(1, 2)).unwrap();
        assert_eq!(encoder.into_inner(), expected.into_inner());
    }

    #[test]
    fn encode_nesting_limit() {
        let config = Amf3Config {
            max_depth: 1,
            ..Default::default()
        };
        let nested = Amf3Value::array(vec![], vec![Amf3Value::Null]);
        let mut encoder = Amf3Encoder::with_config(BytesMut::new(), config);
        assert_eq!(encoder.put_value(&nested), Err(EncodingError::NestingTooDeep(1)));
    }
}
