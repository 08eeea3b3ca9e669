use serde::{Deserialize, Serialize};

use crate::u29::U28_MAX;

/// Options shared by [`crate::Amf3Encoder`] and [`crate::Amf3Decoder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Amf3Config {
    /// Reject typed objects whose alias is not known to the class resolver. When unset,
    /// such objects are decoded and encoded with the trait found on the wire or carried by
    /// the object.
    pub strict: bool,
    /// Maximum nesting of complex values.
    pub max_depth: usize,
    /// Upper bound for declared lengths of strings, byte arrays and collections, checked
    /// before anything is allocated.
    pub max_length: usize,
}

impl Default for Amf3Config {
    fn default() -> Self {
        Self {
            strict: false,
            max_depth: 256,
            max_length: U28_MAX as usize,
        }
    }
}

#[cfg(test)]
mod config_test {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: Amf3Config = serde_json::from_str(r#"{ "strict": true }"#).unwrap();
        assert_eq!(
            config,
            Amf3Config {
                strict: true,
                ..Default::default()
            }
        );
    }
}
