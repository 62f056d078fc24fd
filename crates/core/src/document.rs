//! Attribute document loading.
//!
//! A run's attribute input is a nested document. It may be written as JSON,
//! YAML or TOML; all three are normalised to a [`serde_json::Value`] tree so
//! the attribute store only ever deals with one representation.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// Supported attribute document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
    Toml,
}

impl DocumentFormat {
    /// Detect the format from a file extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedFormat`] for anything other than
    /// `json`, `yaml`, `yml` or `toml`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            other => Err(Error::unsupported_format(path, other)),
        }
    }
}

/// Parse document text in the given format.
///
/// An empty document (YAML `~`, JSON `null`) is treated as an empty map.
///
/// # Errors
///
/// Returns the format-specific parse error, or a parse error when the
/// top level is not a map.
pub fn parse_document(text: &str, format: DocumentFormat) -> Result<Value> {
    let value = match format {
        DocumentFormat::Json => {
            serde_json::from_str::<Value>(text).map_err(|e| Error::json_parse_failed(e.to_string()))?
        }
        DocumentFormat::Yaml => {
            serde_yaml::from_str::<Value>(text).map_err(|e| Error::yaml_parse_failed(e.to_string()))?
        }
        DocumentFormat::Toml => {
            toml::from_str::<Value>(text).map_err(|e| Error::toml_parse_failed(e.to_string()))?
        }
    };

    match value {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(value),
        other => {
            let reason = format!("top level must be a map, found {}", type_name(&other));
            Err(match format {
                DocumentFormat::Json => Error::json_parse_failed(reason),
                DocumentFormat::Yaml => Error::yaml_parse_failed(reason),
                DocumentFormat::Toml => Error::toml_parse_failed(reason),
            })
        }
    }
}

/// Load and parse an attribute document, picking the format from the
/// file extension.
///
/// # Errors
///
/// Returns an error if the file cannot be read, its extension is not
/// recognised, or its contents fail to parse.
pub fn load_document(path: &Path) -> Result<Value> {
    let format = DocumentFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;

    debug!(path = %path.display(), format = ?format, "Loaded attribute document");
    parse_document(&text, format)
}

/// Parse a `dotted.path=value` assignment.
///
/// The value is read as JSON when it parses (`true`, `3`, `{"a":1}`,
/// `"quoted"`), otherwise it is taken as a plain string.
///
/// # Errors
///
/// Returns [`Error::InvalidAssignment`] when there is no `=` or the path
/// is empty.
pub fn parse_assignment(input: &str) -> Result<(String, Value)> {
    let (path, raw) = input
        .split_once('=')
        .ok_or_else(|| Error::invalid_assignment(input, "expected path=value"))?;

    let path = path.trim();
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(Error::invalid_assignment(input, "empty path segment"));
    }

    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((path.to_string(), value))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}
