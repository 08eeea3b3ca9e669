use std::rc::Rc;

use bytes::{Buf, Bytes};
use tracing::{trace, warn};

use crate::{
    Amf3Config, Amf3Value, ClassDefinition, ClassRegistry, ClassResolver, Context,
    DecodingError, Encoding, ExternalReader, Externalizable, Object, u29, value::*,
};

/// Decode AMF3 encoded messages.
///
/// `amf_bytes` must include whole AMF3 values. All values share one set of reference
/// tables, as they would within a single `rtmp` Data or Command message.
pub fn decode_amf3_values(amf_bytes: Bytes) -> Result<Vec<Amf3Value>, DecodingError> {
    Amf3Decoder::new(amf_bytes).decode_all()
}

// https://github.com/q191201771/doc/blob/master/spec-amf-file-format-spec.pdf
// Flags explained in section 3.12, they are checked after the object's own inline flag
// has been shifted out.
const TRAIT_INLINE_FLAG: u32 = 0b001;
const TRAIT_EXTERNALIZABLE_FLAG: u32 = 0b010;
const TRAIT_DYNAMIC_FLAG: u32 = 0b100;

pub struct Amf3Decoder<T> {
    buf: T,
    context: Context,
    resolver: Rc<dyn ClassResolver>,
    config: Amf3Config,
    depth: usize,
}

impl<T> Amf3Decoder<T>
where
    T: Buf,
{
    pub fn new(amf_buf: T) -> Self {
        Self::with_config(amf_buf, Amf3Config::default())
    }

    pub fn with_config(amf_buf: T, config: Amf3Config) -> Self {
        Self {
            buf: amf_buf,
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

    pub fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    pub fn into_inner(self) -> T {
        self.buf
    }

    pub fn decode_all(mut self) -> Result<Vec<Amf3Value>, DecodingError> {
        let mut amf_values = vec![];
        while self.buf.has_remaining() {
            amf_values.push(self.decode_value()?);
        }
        Ok(amf_values)
    }

    pub fn decode_value(&mut self) -> Result<Amf3Value, DecodingError> {
        if self.depth >= self.config.max_depth {
            return Err(DecodingError::NestingTooDeep(self.config.max_depth));
        }

        self.depth += 1;
        let result = self.decode_marked_value();
        self.depth -= 1;
        result
    }

    fn decode_marked_value(&mut self) -> Result<Amf3Value, DecodingError> {
        if !self.buf.has_remaining() {
            return Err(DecodingError::InsufficientData);
        }

        let marker = self.buf.get_u8();

        match marker {
            UNDEFINED => Ok(Amf3Value::Undefined),
            NULL => Ok(Amf3Value::Null),
            FALSE => Ok(Amf3Value::Boolean(false)),
            TRUE => Ok(Amf3Value::Boolean(true)),
            INTEGER => Ok(Amf3Value::Integer(self.read_integer(true)?)),
            DOUBLE => self.decode_double(),
            STRING => Ok(Amf3Value::String(self.read_string()?)),
            XML_DOC => self.decode_complex(|decoder, size| {
                Ok(Amf3Value::XmlDoc(decoder.decode_utf8(size)?.into()))
            }),
            DATE => self.decode_date(),
            ARRAY => self.decode_array(),
            OBJECT => self.decode_object(),
            XML => self.decode_complex(|decoder, size| {
                Ok(Amf3Value::Xml(decoder.decode_utf8(size)?.into()))
            }),
            BYTE_ARRAY => self.decode_byte_array(),
            VECTOR_INT => self.decode_int_vec(),
            VECTOR_UINT => self.decode_uint_vec(),
            VECTOR_DOUBLE => self.decode_double_vec(),
            VECTOR_OBJECT => self.decode_object_vec(),
            DICTIONARY => self.decode_dictionary(),
            _ => Err(DecodingError::UnknownType(marker)),
        }
    }

    /// Reads the payload of an integer. Lengths and indices are unsigned, the integer value
    /// type is signed.
    pub fn read_integer(&mut self, signed: bool) -> Result<i32, DecodingError> {
        let u29 = u29::read_u29(&mut self.buf)?;
        match signed {
            true => Ok(u29::u29_to_i29(u29)),
            false => Ok(u29 as i32),
        }
    }

    /// Reads a string payload, inline or from the string table. Strings read inline are
    /// added to the table, except for the empty string.
    pub fn read_string(&mut self) -> Result<String, DecodingError> {
        let u29 = u29::read_u29(&mut self.buf)?;
        let has_value = (u29 & 0b1) == 1;
        let u28 = (u29 >> 1) as usize;

        if !has_value {
            return self.context.get_string(u28).map(str::to_string);
        }
        if u28 == 0 {
            return Ok(String::new());
        }

        let string = self.decode_utf8(u28)?;
        self.context.add_string(&string);
        Ok(string)
    }

    /// Reads a byte array payload. Byte arrays share the object table with the other
    /// complex values, never the string table.
    pub fn read_byte_array(&mut self) -> Result<Bytes, DecodingError> {
        match self.decode_byte_array()? {
            Amf3Value::ByteArray(bytes) => Ok(bytes),
            _ => Err(DecodingError::InvalidReferenceType),
        }
    }

    pub fn class_definition(&self, index: usize) -> Result<Rc<ClassDefinition>, DecodingError> {
        self.context.class_by_reference(index)
    }

    /// Reads exactly `attr_len` values, matching `class.static_properties()` by position.
    pub fn read_static(
        &mut self,
        class: &ClassDefinition,
    ) -> Result<Vec<Amf3Value>, DecodingError> {
        (0..class.attr_len())
            .map(|_| self.decode_value())
            .collect()
    }

    /// Reads name/value pairs until the empty name.
    pub fn read_dynamic(
        &mut self,
        class: &ClassDefinition,
    ) -> Result<Vec<(String, Amf3Value)>, DecodingError> {
        let mut pairs = vec![];
        loop {
            if !self.buf.has_remaining() {
                return Err(DecodingError::TraitMismatch {
                    alias: class.alias().to_string(),
                });
            }

            let key = self.read_string()?;
            if key.is_empty() {
                return Ok(pairs);
            }

            let value = self.decode_value()?;
            pairs.push((key, value));
        }
    }

    fn decode_double(&mut self) -> Result<Amf3Value, DecodingError> {
        if self.buf.remaining() < 8 {
            return Err(DecodingError::InsufficientData);
        }

        Ok(Amf3Value::Double(self.buf.get_f64()))
    }

    fn decode_date(&mut self) -> Result<Amf3Value, DecodingError> {
        let decode = |decoder: &mut Self, _| {
            if decoder.buf.remaining() < 8 {
                return Err(DecodingError::InsufficientData);
            }

            Ok(Amf3Value::Date(decoder.buf.get_f64()))
        };

        self.decode_complex(decode)
    }

    fn decode_array(&mut self) -> Result<Amf3Value, DecodingError> {
        let decode = |decoder: &mut Self, size: usize| {
            decoder.check_length(size)?;
            if decoder.buf.remaining() < size {
                return Err(DecodingError::InsufficientData);
            }

            let associative = decoder.decode_pairs()?;
            let dense = (0..size)
                .map(|_| decoder.decode_value())
                .collect::<Result<_, _>>()?;

            Ok(Amf3Value::array(associative, dense))
        };

        self.decode_complex(decode)
    }

    fn decode_object(&mut self) -> Result<Amf3Value, DecodingError> {
        let decode = |decoder: &mut Self, u28: usize| {
            let class = decoder.decode_object_trait(u28 as u32)?;

            let object = match class.encoding() {
                Encoding::Externalizable => {
                    let externalizer = decoder.externalizer(&class)?;
                    let external = externalizer.read_external(&class, decoder)?;
                    Object::externalizable(class, external)
                }
                Encoding::Static => {
                    let sealed = decoder.read_static(&class)?;
                    Object::new(class, sealed, vec![])
                }
                Encoding::Dynamic => {
                    let sealed = decoder.read_static(&class)?;
                    let dynamic = decoder.read_dynamic(&class)?;
                    Object::new(class, sealed, dynamic)
                }
            };

            Ok(Amf3Value::object(object))
        };

        self.decode_complex(decode)
    }

    fn decode_byte_array(&mut self) -> Result<Amf3Value, DecodingError> {
        let decode = |decoder: &mut Self, size: usize| {
            decoder.check_length(size)?;
            if decoder.buf.remaining() < size {
                return Err(DecodingError::InsufficientData);
            }

            Ok(Amf3Value::ByteArray(decoder.buf.copy_to_bytes(size)))
        };

        self.decode_complex(decode)
    }

    fn decode_int_vec(&mut self) -> Result<Amf3Value, DecodingError> {
        let decode = |decoder: &mut Self, item_count: usize| {
            decoder.check_length(item_count)?;
            const ITEM_SIZE: usize = 4;

            if decoder.buf.remaining() < item_count * ITEM_SIZE + 1 {
                return Err(DecodingError::InsufficientData);
            }

            let fixed_length = decoder.buf.get_u8() == 0x01;
            let values = (0..item_count).map(|_| decoder.buf.get_i32()).collect();

            Ok(Amf3Value::VectorInt {
                fixed_length,
                values,
            })
        };

        self.decode_complex(decode)
    }

    fn decode_uint_vec(&mut self) -> Result<Amf3Value, DecodingError> {
        let decode = |decoder: &mut Self, item_count: usize| {
            decoder.check_length(item_count)?;
            const ITEM_SIZE: usize = 4;

            if decoder.buf.remaining() < item_count * ITEM_SIZE + 1 {
                return Err(DecodingError::InsufficientData);
            }

            let fixed_length = decoder.buf.get_u8() == 0x01;
            let values = (0..item_count).map(|_| decoder.buf.get_u32()).collect();

            Ok(Amf3Value::VectorUInt {
                fixed_length,
                values,
            })
        };

        self.decode_complex(decode)
    }

    fn decode_double_vec(&mut self) -> Result<Amf3Value, DecodingError> {
        let decode = |decoder: &mut Self, item_count: usize| {
            decoder.check_length(item_count)?;
            const ITEM_SIZE: usize = 8;

            if decoder.buf.remaining() < item_count * ITEM_SIZE + 1 {
                return Err(DecodingError::InsufficientData);
            }

            let fixed_length = decoder.buf.get_u8() == 0x01;
            let values = (0..item_count).map(|_| decoder.buf.get_f64()).collect();

            Ok(Amf3Value::VectorDouble {
                fixed_length,
                values,
            })
        };

        self.decode_complex(decode)
    }

    fn decode_object_vec(&mut self) -> Result<Amf3Value, DecodingError> {
        let decode = |decoder: &mut Self, item_count: usize| {
            decoder.check_length(item_count)?;
            if decoder.buf.remaining() < item_count + 1 {
                return Err(DecodingError::InsufficientData);
            }

            let fixed_length = decoder.buf.get_u8() == 0x01;
            let class_name = decoder.read_string()?;
            let class_name = if class_name == "*" {
                None
            } else {
                Some(class_name)
            };

            let values = (0..item_count)
                .map(|_| decoder.decode_value())
                .collect::<Result<_, _>>()?;

            Ok(Amf3Value::VectorObject {
                fixed_length,
                class_name,
                values,
            })
        };

        self.decode_complex(decode)
    }

    fn decode_dictionary(&mut self) -> Result<Amf3Value, DecodingError> {
        let decode = |decoder: &mut Self, entries_count: usize| {
            decoder.check_length(entries_count)?;
            if decoder.buf.remaining() < entries_count * 2 + 1 {
                return Err(DecodingError::InsufficientData);
            }

            let weak_references = decoder.buf.get_u8() == 0x01;

            let entries = (0..entries_count)
                .map(|_| {
                    let key = decoder.decode_value()?;
                    let value = decoder.decode_value()?;
                    Ok((key, value))
                })
                .collect::<Result<_, _>>()?;

            Ok(Amf3Value::Dictionary {
                weak_references,
                entries,
            })
        };

        self.decode_complex(decode)
    }

    /// Reads the U29 header shared by every value kept in the object table. The low bit
    /// tells an inline value (`decode` gets the remaining 28 bits) from a reference.
    ///
    /// The object index is reserved before `decode` runs, so nested values always get
    /// higher indices than their parent, matching the order the encoder assigns them in.
    /// Declared lengths are checked by `decode`, an object header carries trait bits instead.
    fn decode_complex<F>(&mut self, decode: F) -> Result<Amf3Value, DecodingError>
    where
        F: FnOnce(&mut Self, usize) -> Result<Amf3Value, DecodingError>,
    {
        let u29 = u29::read_u29(&mut self.buf)?;
        let has_value = (u29 & 0b1) == 1;
        let u28 = (u29 >> 1) as usize;

        match has_value {
            true => {
                let index = self.context.reserve_object();
                let amf_value = decode(self, u28)?;
                self.context.fill_object(index, amf_value.clone());
                Ok(amf_value)
            }
            false => {
                trace!(index = u28, "Object reference");
                self.context.object_by_reference(u28)
            }
        }
    }

    fn decode_utf8(&mut self, size: usize) -> Result<String, DecodingError> {
        self.check_length(size)?;
        if self.buf.remaining() < size {
            return Err(DecodingError::InsufficientData);
        }

        let utf8 = self.buf.copy_to_bytes(size);
        std::str::from_utf8(&utf8)
            .map(str::to_string)
            .map_err(|_| DecodingError::InvalidUtf8)
    }

    fn decode_pairs(&mut self) -> Result<Vec<(String, Amf3Value)>, DecodingError> {
        let mut pairs = vec![];
        loop {
            let key = self.read_string()?;
            if key.is_empty() {
                return Ok(pairs);
            }

            let value = self.decode_value()?;
            pairs.push((key, value));
        }
    }

    fn decode_object_trait(&mut self, u28: u32) -> Result<Rc<ClassDefinition>, DecodingError> {
        if (u28 & TRAIT_INLINE_FLAG) == 0 {
            let trait_idx = (u28 >> 1) as usize;
            return self.class_definition(trait_idx);
        }

        let alias = self.read_string()?;
        let class = if (u28 & TRAIT_EXTERNALIZABLE_FLAG) != 0 {
            ClassDefinition::externalizable(alias)
        } else {
            let encoding = match (u28 & TRAIT_DYNAMIC_FLAG) != 0 {
                true => Encoding::Dynamic,
                false => Encoding::Static,
            };

            let sealed_members = (u28 >> 3) as usize;
            self.check_length(sealed_members)?;

            let field_names = (0..sealed_members)
                .map(|_| self.read_string())
                .collect::<Result<Vec<_>, _>>()?;

            ClassDefinition::new(alias, encoding, field_names)
        };

        self.check_alias(&class)?;

        let class = Rc::new(class);
        let index = self.context.add_class(class.clone());
        trace!(
            alias = class.alias(),
            index,
            encoding = ?class.encoding(),
            "Class trait registered"
        );
        Ok(class)
    }

    fn check_alias(&self, class: &ClassDefinition) -> Result<(), DecodingError> {
        if class.is_anonymous() || class.is_externalizable() {
            return Ok(());
        }
        if self.resolver.resolve_alias(class.alias()).is_some() {
            return Ok(());
        }
        if self.config.strict {
            return Err(DecodingError::UnresolvedType(class.alias().to_string()));
        }

        warn!(
            alias = class.alias(),
            "No class registered for alias, decoding as a generic typed object"
        );
        Ok(())
    }

    fn externalizer(
        &self,
        class: &ClassDefinition,
    ) -> Result<Rc<dyn Externalizable>, DecodingError> {
        self.resolver
            .resolve_alias(class.alias())
            .and_then(|binding| binding.externalizer)
            .ok_or_else(|| DecodingError::UnresolvedType(class.alias().to_string()))
    }

    fn check_length(&self, len: usize) -> Result<(), DecodingError> {
        if len > self.config.max_length {
            return Err(DecodingError::LengthTooLarge(len));
        }
        Ok(())
    }
}

impl<T> ExternalReader for Amf3Decoder<T>
where
    T: Buf,
{
    fn read_value(&mut self) -> Result<Amf3Value, DecodingError> {
        self.decode_value()
    }

    fn read_u8(&mut self) -> Result<u8, DecodingError> {
        if !self.buf.has_remaining() {
            return Err(DecodingError::InsufficientData);
        }
        Ok(self.buf.get_u8())
    }

    fn read_u29(&mut self) -> Result<u32, DecodingError> {
        u29::read_u29(&mut self.buf)
    }

    fn read_bytes(&mut self, len: usize) -> Result<Bytes, DecodingError> {
        if self.buf.remaining() < len {
            return Err(DecodingError::InsufficientData);
        }
        Ok(self.buf.copy_to_bytes(len))
    }
}

#[cfg(test)]
mod decode_test {
    use std::rc::Rc;

    use bytes::Bytes;

    use super::*;
    use crate::ReferenceTable;

    fn decoder_for(bytes: &[u8]) -> Amf3Decoder<Bytes> {
        Amf3Decoder::new(Bytes::copy_from_slice(bytes))
    }

    fn dense_of(value: &Amf3Value) -> &[Amf3Value] {
        match value {
            Amf3Value::Array(array) => &array.dense,
            _ => panic!("not an array: {value:?}"),
        }
    }

    #[test]
    fn test_read_integer() {
        let mut decoder = decoder_for(&[0b11111111, 0b11111111, 0b11110111, 0b10100111]);
        assert_eq!(decoder.read_integer(true).unwrap(), -2137);

        let mut decoder = decoder_for(&[0b11111111, 0b11111111, 0b11110111, 0b10100111]);
        assert_eq!(decoder.read_integer(false).unwrap(), (1 << 29) - 2137);
    }

    #[test]
    fn test_string_reference() {
        let mut decoder = decoder_for(&[0x0B, b'h', b'e', b'l', b'l', b'o', 0x00, 0x01]);
        assert_eq!(decoder.read_string().unwrap(), "hello");
        assert_eq!(decoder.read_string().unwrap(), "hello");
        assert_eq!(decoder.read_string().unwrap(), "");
        assert_eq!(decoder.context().string_count(), 1);
    }

    #[test]
    fn test_invalid_string_reference() {
        let mut decoder = decoder_for(&[STRING, 0x02]);
        assert_eq!(
            decoder.decode_value(),
            Err(DecodingError::Reference {
                table: ReferenceTable::String,
                index: 1
            })
        );
    }

    #[test]
    fn test_invalid_class_reference() {
        // Inline object, trait reference 0 with an empty class table.
        let mut decoder = decoder_for(&[OBJECT, 0b0000_0001]);
        assert_eq!(
            decoder.decode_value(),
            Err(DecodingError::Reference {
                table: ReferenceTable::Class,
                index: 0
            })
        );
    }

    #[test]
    fn test_self_reference_is_rejected() {
        // Anonymous dynamic object whose only property references the object itself.
        let mut decoder = decoder_for(&[OBJECT, 0x0B, 0x01, 0x03, b'm', OBJECT, 0x00, 0x01]);
        assert_eq!(decoder.decode_value(), Err(DecodingError::CyclicReference(0)));
    }

    #[test]
    fn test_missing_dynamic_terminator() {
        let mut decoder = decoder_for(&[OBJECT, 0x0B, 0x01, 0x03, b'a', NULL]);
        assert_eq!(
            decoder.decode_value(),
            Err(DecodingError::TraitMismatch {
                alias: String::new()
            })
        );
    }

    #[test]
    fn test_shared_array_keeps_identity() {
        // [[1], <ref 1>]
        let mut decoder = decoder_for(&[
            ARRAY, 0x05, 0x01, ARRAY, 0x03, 0x01, INTEGER, 0x01, ARRAY, 0x02,
        ]);
        let outer = decoder.decode_value().unwrap();
        let dense = dense_of(&outer);

        match (&dense[0], &dense[1]) {
            (Amf3Value::Array(first), Amf3Value::Array(second)) => {
                assert!(Rc::ptr_eq(first, second))
            }
            other => panic!("unexpected values: {other:?}"),
        }
    }

    #[test]
    fn test_read_byte_array() {
        let mut decoder = decoder_for(&[0x05, b'a', b'b', 0x00, 0x02]);
        let bytes = decoder.read_byte_array().unwrap();
        assert_eq!(bytes.as_ref(), b"ab");
        assert_eq!(decoder.read_byte_array().unwrap(), bytes);
        assert_eq!(decoder.context().string_count(), 0);
        assert_eq!(
            decoder.read_byte_array(),
            Err(DecodingError::Reference {
                table: ReferenceTable::Object,
                index: 1
            })
        );
    }

    #[test]
    fn test_vectors() {
        let mut decoder = decoder_for(&[
            VECTOR_INT, 0x05, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x07,
        ]);
        assert_eq!(
            decoder.decode_value().unwrap(),
            Amf3Value::VectorInt {
                fixed_length: false,
                values: vec![-1, 7].into(),
            }
        );
    }

    #[test]
    fn test_referenced_payloads_are_shared() {
        // [<int vector [5]>, <ref 1>, <xml "x">, <ref 2>]
        #[rustfmt::skip]
        let mut decoder = decoder_for(&[
            ARRAY, 0x09, 0x01,
            VECTOR_INT, 0x03, 0x00, 0x00, 0x00, 0x00, 0x05, VECTOR_INT, 0x02,
            XML, 0x03, b'x', XML, 0x04,
        ]);
        let outer = decoder.decode_value().unwrap();

        match dense_of(&outer) {
            [
                Amf3Value::VectorInt { values: first, .. },
                Amf3Value::VectorInt { values: second, .. },
                Amf3Value::Xml(first_xml),
                Amf3Value::Xml(second_xml),
            ] => {
                assert_eq!(first.as_ref(), &[5]);
                assert!(Rc::ptr_eq(first, second));
                assert!(Rc::ptr_eq(first_xml, second_xml));
            }
            other => panic!("unexpected values: {other:?}"),
        }
        assert_eq!(decoder.context().object_count(), 3);
    }

    #[test]
    fn test_nesting_limit() {
        let config = Amf3Config {
            max_depth: 2,
            ..Default::default()
        };
        let bytes = Bytes::from_static(&[ARRAY, 0x03, 0x01, ARRAY, 0x03, 0x01, NULL]);
        let mut decoder = Amf3Decoder::with_config(bytes, config);
        assert_eq!(decoder.decode_value(), Err(DecodingError::NestingTooDeep(2)));
    }

    #[test]
    fn test_length_limit() {
        let config = Amf3Config {
            max_length: 4,
            ..Default::default()
        };
        let bytes = Bytes::from_static(&[BYTE_ARRAY, 0x0B, 1, 2, 3, 4, 5]);
        let mut decoder = Amf3Decoder::with_config(bytes, config);
        assert_eq!(decoder.decode_value(), Err(DecodingError::LengthTooLarge(5)));
    }

    #[test]
    fn test_unknown_marker() {
        let mut decoder = decoder_for(&[0x42]);
        assert_eq!(decoder.decode_value(), Err(DecodingError::UnknownType(0x42)));
    }
}
