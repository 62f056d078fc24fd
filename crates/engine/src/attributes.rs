//! Layered attribute store.
//!
//! Attributes live in three precedence layers: `default` < `normal` <
//! `override`. A lookup deep-merges maps across the layers and takes
//! scalars from the highest layer that defines them. Absent paths are not
//! errors; callers pick their own fallback or use [`AttributeStore::require`].
//!
//! A deep merge can never remove a key a lower layer defines. Values written
//! with [`AttributeStore::replace_override`] mask the lower layers instead, so
//! `{}` there really resolves to an empty map.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::AttributeError;

/// Precedence layer an attribute is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Precedence {
    Default,
    Normal,
    Override,
}

/// A path into the attribute tree.
///
/// Parsed from dotted strings (`chef_server_wrapper.fqdn`) or built from
/// segments when a key itself contains dots (hostnames).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributePath(Vec<String>);

impl AttributePath {
    /// Build a path from explicit segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Append one segment.
    #[must_use]
    pub fn child(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    /// The path segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for AttributePath {
    fn from(path: &str) -> Self {
        Self(
            path.split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl From<String> for AttributePath {
    fn from(path: String) -> Self {
        Self::from(path.as_str())
    }
}

impl From<&AttributePath> for AttributePath {
    fn from(path: &AttributePath) -> Self {
        path.clone()
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Hierarchical key-value configuration consulted by resources.
#[derive(Debug, Clone, Default)]
pub struct AttributeStore {
    default: Map<String, Value>,
    normal: Map<String, Value>,
    overrides: Map<String, Value>,
    /// Override paths that hide the default and normal layers beneath them.
    replaced: Vec<AttributePath>,
}

impl AttributeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a path against all layers.
    pub fn get(&self, path: impl Into<AttributePath>) -> Option<Value> {
        let path = path.into();

        let mut resolved: Option<Value> = None;
        for precedence in [Precedence::Default, Precedence::Normal, Precedence::Override] {
            let Some(value) = self.visible(precedence, &path) else {
                continue;
            };
            resolved = Some(match (resolved, value) {
                (Some(Value::Object(mut lower)), Value::Object(higher)) => {
                    deep_merge(&mut lower, &higher);
                    Value::Object(lower)
                }
                (_, higher) => higher,
            });
        }
        resolved
    }

    /// Resolve a path in one layer only.
    pub fn get_in(&self, precedence: Precedence, path: impl Into<AttributePath>) -> Option<&Value> {
        let path = path.into();
        lookup(self.layer(precedence), path.segments())
    }

    /// Resolve a path or fail with [`AttributeError::Missing`].
    ///
    /// Explicit `null` counts as missing.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::Missing`] when nothing is set at `path`.
    pub fn require(&self, path: impl Into<AttributePath>) -> Result<Value, AttributeError> {
        let path = path.into();
        match self.get(&path) {
            Some(Value::Null) | None => Err(AttributeError::missing(path.to_string())),
            Some(value) => Ok(value),
        }
    }

    /// Resolve a string attribute. Numbers and booleans are stringified.
    pub fn get_str(&self, path: impl Into<AttributePath>) -> Option<String> {
        match self.get(path)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Resolve a string attribute or fail.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::Missing`] when unset, or
    /// [`AttributeError::TypeMismatch`] when the value is a map or list.
    pub fn require_str(&self, path: impl Into<AttributePath>) -> Result<String, AttributeError> {
        let path = path.into();
        match self.require(&path)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(AttributeError::type_mismatch(
                path.to_string(),
                "a string",
                value_kind(&other),
            )),
        }
    }

    /// Resolve a boolean attribute. The strings `"true"` and `"false"` count.
    pub fn get_bool(&self, path: impl Into<AttributePath>) -> Option<bool> {
        match self.get(path)? {
            Value::Bool(b) => Some(b),
            Value::String(s) if s == "true" => Some(true),
            Value::String(s) if s == "false" => Some(false),
            _ => None,
        }
    }

    /// Resolve a subtree and deserialize it.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::Missing`] when unset, or
    /// [`AttributeError::Invalid`] when the subtree does not fit `T`.
    pub fn get_as<T: DeserializeOwned>(
        &self,
        path: impl Into<AttributePath>,
    ) -> Result<T, AttributeError> {
        let path = path.into();
        let value = self.require(&path)?;
        serde_json::from_value(value).map_err(|e| AttributeError::invalid(path.to_string(), e.to_string()))
    }

    /// Whether a path is unset or holds an empty value.
    ///
    /// `null`, `""`, `false`, `{}` and `[]` all count as blank.
    pub fn is_blank(&self, path: impl Into<AttributePath>) -> bool {
        self.get(path).as_ref().is_none_or(is_blank_value)
    }

    /// Merge a value into the default layer (lowest precedence).
    pub fn merge_defaults(&mut self, path: impl Into<AttributePath>, value: Value) {
        self.merge(Precedence::Default, path, value);
    }

    /// Set a value in the normal layer.
    pub fn set_normal(&mut self, path: impl Into<AttributePath>, value: Value) {
        self.set(Precedence::Normal, path, value);
    }

    /// Set a value in the override layer (highest precedence).
    pub fn set_override(&mut self, path: impl Into<AttributePath>, value: Value) {
        self.set(Precedence::Override, path, value);
    }

    /// Set an override that hides whatever the lower layers hold at `path`.
    ///
    /// Unlike [`set_override`](Self::set_override), maps written here do not
    /// merge with default or normal values, which makes it the only way to
    /// clear a map those layers populate.
    pub fn replace_override(&mut self, path: impl Into<AttributePath>, value: Value) {
        let path = path.into();
        self.set(Precedence::Override, &path, value);
        if !self.replaced.contains(&path) {
            self.replaced.push(path);
        }
    }

    /// Replace the value at `path` in one layer, creating intermediate maps.
    pub fn set(&mut self, precedence: Precedence, path: impl Into<AttributePath>, value: Value) {
        let path = path.into();
        match path.segments().split_last() {
            None => {
                if let Value::Object(map) = value {
                    *self.layer_mut(precedence) = map;
                }
            }
            Some((last, parents)) => {
                if let Some(parent) = descend_mut(self.layer_mut(precedence), parents) {
                    parent.insert(last.clone(), value);
                }
            }
        }
    }

    /// Deep-merge a value into one layer at `path`.
    ///
    /// Maps merge key by key; anything else replaces what was there.
    pub fn merge(&mut self, precedence: Precedence, path: impl Into<AttributePath>, value: Value) {
        let path = path.into();
        match path.segments().split_last() {
            None => {
                if let Value::Object(map) = value {
                    deep_merge(self.layer_mut(precedence), &map);
                }
            }
            Some((last, parents)) => {
                let Some(parent) = descend_mut(self.layer_mut(precedence), parents) else {
                    return;
                };
                match (parent.get_mut(last), value) {
                    (Some(Value::Object(existing)), Value::Object(incoming)) => {
                        deep_merge(existing, &incoming);
                    }
                    (_, value) => {
                        parent.insert(last.clone(), value);
                    }
                }
            }
        }
    }

    /// The fully merged tree.
    pub fn merged(&self) -> Value {
        self.get(AttributePath::from_segments(Vec::<String>::new()))
            .unwrap_or_default()
    }

    /// What one layer contributes at `path` once replaced overrides mask it.
    fn visible(&self, precedence: Precedence, path: &AttributePath) -> Option<Value> {
        let layer = self.layer(precedence);
        let mut value = if path.is_root() {
            Value::Object(layer.clone())
        } else {
            lookup(layer, path.segments())?.clone()
        };
        if precedence == Precedence::Override {
            return Some(value);
        }
        for mask in &self.replaced {
            if path.segments().starts_with(mask.segments()) {
                return None;
            }
            if let Some(below) = mask.segments().strip_prefix(path.segments()) {
                remove_at(&mut value, below);
            }
        }
        Some(value)
    }

    fn layer(&self, precedence: Precedence) -> &Map<String, Value> {
        match precedence {
            Precedence::Default => &self.default,
            Precedence::Normal => &self.normal,
            Precedence::Override => &self.overrides,
        }
    }

    fn layer_mut(&mut self, precedence: Precedence) -> &mut Map<String, Value> {
        match precedence {
            Precedence::Default => &mut self.default,
            Precedence::Normal => &mut self.normal,
            Precedence::Override => &mut self.overrides,
        }
    }
}

/// Whether a value counts as blank for guard purposes.
pub fn is_blank_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) => false,
    }
}

/// Short human name of a value's shape, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}

fn lookup<'a>(layer: &'a Map<String, Value>, segments: &[String]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    rest.iter()
        .try_fold(layer.get(first)?, |value, segment| value.as_object()?.get(segment))
}

/// Walk to the map at `segments`, replacing scalars in the way with maps.
fn descend_mut<'a>(
    mut map: &'a mut Map<String, Value>,
    segments: &[String],
) -> Option<&'a mut Map<String, Value>> {
    for segment in segments {
        let entry = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        map = entry.as_object_mut()?;
    }
    Some(map)
}

fn remove_at(value: &mut Value, segments: &[String]) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let parent = parents
        .iter()
        .try_fold(value, |value, segment| value.as_object_mut()?.get_mut(segment));
    if let Some(Value::Object(map)) = parent {
        map.remove(last);
    }
}

fn deep_merge(target: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(child)) => deep_merge(existing, child),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}
