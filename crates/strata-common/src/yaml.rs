//! Manifest parsing using yaml-rust2
//!
//! Templaters hand back multi-document YAML. This module turns it into
//! `DynamicObject`s so it can go through the same server-side apply path as
//! every generated object. Conversion goes through `serde_json::Value` so that
//! typed deserialization uses serde_json only.

use kube::api::DynamicObject;
use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::Error;

/// Error type for YAML parsing
#[derive(Debug, Clone)]
pub struct YamlError(String);

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for YamlError {}

/// Parse a multi-document YAML string into one `Value` per non-empty document.
pub fn parse_yaml_documents(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    docs.into_iter()
        .map(yaml_to_json)
        .filter(|doc| !matches!(doc, Ok(Value::Null)))
        .collect()
}

/// Parse manifest bytes into objects.
///
/// Every document must carry `apiVersion`, `kind` and `metadata.name`; a
/// document missing any of them makes the whole manifest invalid, since
/// applying part of a manifest would leave the workload half-upgraded.
pub fn parse_manifest_objects(context: &str, manifest: &[u8]) -> Result<Vec<DynamicObject>, Error> {
    let text = std::str::from_utf8(manifest)
        .map_err(|e| Error::invalid_input(context, format!("manifest is not UTF-8: {}", e)))?;

    let documents = parse_yaml_documents(text)
        .map_err(|e| Error::invalid_input(context, format!("invalid YAML: {}", e)))?;

    documents
        .into_iter()
        .enumerate()
        .map(|(index, doc)| {
            for field in ["/apiVersion", "/kind", "/metadata/name"] {
                if doc.pointer(field).and_then(Value::as_str).is_none() {
                    return Err(Error::invalid_input(
                        context,
                        format!("document {} is missing {}", index, &field[1..]),
                    ));
                }
            }
            serde_json::from_value::<DynamicObject>(doc).map_err(|e| {
                Error::invalid_input(context, format!("document {}: {}", index, e))
            })
        })
        .collect()
}

/// Convert a yaml_rust2::Yaml value to serde_json::Value
fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| YamlError(e.to_string()))?;
            Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Real(r) => r,
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    _ => return Err(YamlError("unsupported YAML key type".to_string())),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>, _>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(YamlError("YAML aliases not supported".to_string())),
        Yaml::BadValue => Err(YamlError("bad YAML value".to_string())),
    }
}
