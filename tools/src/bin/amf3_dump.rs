use anyhow::{Context, Result, bail};
use bytes::Bytes;
use serde_json::{Map, Number, Value, json};
use std::{env, fs, rc::Rc};
use tracing::{debug, info};

use amf3::{Amf3Config, Amf3Decoder, Amf3Value, ClassRegistry};

const USAGE: &str = "Usage: amf3-dump <input.amf3> [config.json]";

fn main() -> Result<()> {
    self::logger::init_logger();

    let mut args = env::args().skip(1);
    let Some(input) = args.next() else {
        bail!(USAGE);
    };
    let config = match args.next() {
        Some(path) => read_config(&path)?,
        None => Amf3Config::default(),
    };
    debug!(?config, "Decoder config");

    let amf_bytes = fs::read(&input).with_context(|| format!("Failed to read {input}."))?;
    let mut decoder = Amf3Decoder::with_config(Bytes::from(amf_bytes), config)
        .with_resolver(Rc::new(ClassRegistry::with_flex_classes()));

    let mut index = 0;
    while decoder.has_remaining() {
        let value = decoder
            .decode_value()
            .with_context(|| format!("Failed to decode value #{index}."))?;
        info!(index, "{}", serde_json::to_string_pretty(&to_json(&value))?);
        index += 1;
    }

    let context = decoder.context();
    info!(
        values = index,
        strings = context.string_count(),
        classes = context.class_count(),
        objects = context.object_count(),
        "Finished decoding {input}"
    );
    Ok(())
}

fn read_config(path: &str) -> Result<Amf3Config> {
    let config = fs::read_to_string(path).with_context(|| format!("Failed to read {path}."))?;
    serde_json::from_str(&config).with_context(|| format!("Invalid decoder config in {path}."))
}

fn number(d: f64) -> Value {
    Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null)
}

fn to_json(value: &Amf3Value) -> Value {
    match value {
        Amf3Value::Undefined | Amf3Value::Null => Value::Null,
        Amf3Value::Boolean(b) => Value::Bool(*b),
        Amf3Value::Integer(i) => json!(i),
        Amf3Value::Double(d) => number(*d),
        Amf3Value::String(s) => Value::String(s.clone()),
        Amf3Value::XmlDoc(xml) | Amf3Value::Xml(xml) => json!({ "$xml": &**xml }),
        Amf3Value::Date(ms) => json!({ "$date": number(*ms) }),
        Amf3Value::Array(array) => {
            let dense: Vec<Value> = array.dense.iter().map(to_json).collect();
            if array.associative.is_empty() {
                return Value::Array(dense);
            }
            let mut map: Map<String, Value> = array
                .associative
                .iter()
                .map(|(key, value)| (key.clone(), to_json(value)))
                .collect();
            map.insert("$dense".to_string(), Value::Array(dense));
            Value::Object(map)
        }
        Amf3Value::Object(object) => {
            let mut map = Map::new();
            if !object.class.is_anonymous() {
                map.insert("$class".to_string(), json!(object.class.alias()));
            }
            for (name, value) in object.properties() {
                map.insert(name.to_string(), to_json(value));
            }
            if object.class.is_externalizable() {
                let external = object.external.iter().map(to_json).collect();
                map.insert("$external".to_string(), Value::Array(external));
            }
            Value::Object(map)
        }
        Amf3Value::ByteArray(bytes) => {
            let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
            json!({ "$bytes": hex })
        }
        Amf3Value::VectorInt { values, .. } => json!(&values[..]),
        Amf3Value::VectorUInt { values, .. } => json!(&values[..]),
        Amf3Value::VectorDouble { values, .. } => {
            Value::Array(values.iter().copied().map(number).collect())
        }
        Amf3Value::VectorObject { values, .. } => {
            Value::Array(values.iter().map(to_json).collect())
        }
        Amf3Value::Dictionary { entries, .. } => Value::Array(
            entries
                .iter()
                .map(|(key, value)| json!([to_json(key), to_json(value)]))
                .collect(),
        ),
    }
}

mod logger {
    use std::{env, str::FromStr};
    use tracing_subscriber::{Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    enum LoggerFormat {
        Pretty,
        Json,
        Compact,
    }

    impl FromStr for LoggerFormat {
        type Err = &'static str;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "json" => Ok(LoggerFormat::Json),
                "pretty" => Ok(LoggerFormat::Pretty),
                "compact" => Ok(LoggerFormat::Compact),
                _ => Err("invalid logger format"),
            }
        }
    }

    pub(super) fn init_logger() {
        let logger_level = match env::var("AMF3_LOGGER_LEVEL") {
            Ok(level) => level,
            Err(_) => "info".to_string(),
        };
        let default_logger_format = LoggerFormat::Compact;
        let logger_format = match env::var("AMF3_LOGGER_FORMAT") {
            Ok(format) => LoggerFormat::from_str(&format).unwrap_or(default_logger_format),
            Err(_) => default_logger_format,
        };

        let stdio_filter = tracing_subscriber::EnvFilter::new(logger_level);
        let stdio_layer = match logger_format {
            LoggerFormat::Pretty => fmt::Layer::default().pretty().boxed(),
            LoggerFormat::Json => fmt::Layer::default().json().boxed(),
            LoggerFormat::Compact => fmt::Layer::default().compact().boxed(),
        }
        .with_filter(stdio_filter);
        Registry::default().with(stdio_layer).init();
    }
}
