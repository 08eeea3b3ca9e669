//! AMF3 (Action Message Format 3) serialization.
//!
//! [`Amf3Decoder`] reads values from any [`bytes::Buf`] and [`Amf3Encoder`] writes them to
//! any [`bytes::BufMut`]. Each of them owns a [`Context`] with the string, class trait and
//! object reference tables of the stream it works on.

mod class;
mod config;
mod context;
mod decoding;
mod encoding;
mod error;
mod stream;
pub mod u29;
mod value;


pub use class::{
    ClassBinding, ClassDefinition, ClassRegistry, ClassResolver, Encoding, ExternalReader,
    ExternalWriter, Externalizable, FLEX_PROXY_ALIASES, ProxyBody,
};
pub use config::Amf3Config;
pub use context::Context;
pub use decoding::{Amf3Decoder, decode_amf3_values};
pub use encoding::{Amf3Encoder, encode_amf3_values};
pub use error::{DecodingError, EncodingError, ReferenceTable, StreamError};
pub use stream::{BufferedByteStream, Endian};
pub use value::{Amf3Value, Array, Object};
