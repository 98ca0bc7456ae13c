//! Agent data envelope.
//!
//! `AgentData` is the universal parameter/result container threaded through
//! functions, jobs, messages and workflow steps. Values are a small tagged
//! union that round-trips through JSON without loss for scalar fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A single value inside an [`AgentData`] map.
///
/// Variant order matters for untagged deserialization: `Bool` and `Int` must
/// be tried before `Double`, and `StrList` before `Object`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    StrList(Vec<String>),
    Object(AgentData),
}

impl From<bool> for AgentValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AgentValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for AgentValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for AgentValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<usize> for AgentValue {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AgentValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for AgentValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for AgentValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<String>> for AgentValue {
    fn from(v: Vec<String>) -> Self {
        Self::StrList(v)
    }
}

impl From<AgentData> for AgentValue {
    fn from(v: AgentData) -> Self {
        Self::Object(v)
    }
}

/// String-keyed map of [`AgentValue`]s. Keys are unique; insertion order is
/// irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentData {
    entries: BTreeMap<String, AgentValue>,
}

impl AgentData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<AgentValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder-style insert for constructing literals in tests and handlers.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<AgentValue>) -> Self {
        self.set(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AgentValue> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(AgentValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_str(key).unwrap_or(default)
    }

    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(AgentValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get_i64(key).unwrap_or(default)
    }

    /// Fetch a float, coercing integers. JSON clients routinely send `1`
    /// where `1.0` is meant (temperature, top_p).
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.entries.get(key) {
            Some(AgentValue::Double(v)) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Some(AgentValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_f64_or(&self, key: &str, default: f64) -> f64 {
        self.get_f64(key).unwrap_or(default)
    }

    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(AgentValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    #[must_use]
    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        match self.entries.get(key) {
            Some(AgentValue::StrList(v)) => v.clone(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn get_object(&self, key: &str) -> Option<&AgentData> {
        match self.entries.get(key) {
            Some(AgentValue::Object(v)) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<AgentValue> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AgentValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Copy every entry of `other` into `self`, overwriting on collision.
    pub fn merge(&mut self, other: &AgentData) {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    /// Merged copy: `self ⊕ other`, with `other` winning on key collisions.
    #[must_use]
    pub fn merged_with(&self, other: &AgentData) -> AgentData {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Build from a JSON object, coercing foreign shapes where possible:
    /// numbers become `Int` or `Double`, arrays become string lists
    /// (non-string elements are stringified), `null` entries are skipped.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CoreError> {
        let serde_json::Value::Object(map) = value else {
            return Err(CoreError::Validation(
                "expected a JSON object for agent data".to_string(),
            ));
        };

        let mut data = AgentData::new();
        for (key, val) in map {
            if let Some(converted) = Self::convert_json_value(val) {
                data.entries.insert(key.clone(), converted);
            }
        }
        Ok(data)
    }

    fn convert_json_value(value: &serde_json::Value) -> Option<AgentValue> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(AgentValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(AgentValue::Int(i))
                } else {
                    n.as_f64().map(AgentValue::Double)
                }
            }
            serde_json::Value::String(s) => Some(AgentValue::Str(s.clone())),
            serde_json::Value::Array(items) => Some(AgentValue::StrList(
                items
                    .iter()
                    .map(|item| match item {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            )),
            serde_json::Value::Object(_) => {
                AgentData::from_json(value).ok().map(AgentValue::Object)
            }
        }
    }
}

impl FromIterator<(String, AgentValue)> for AgentData {
    fn from_iter<T: IntoIterator<Item = (String, AgentValue)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Outcome of one function invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionResult {
    pub success: bool,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub result: AgentData,
    #[serde(default)]
    pub execution_time_ms: f64,
    /// Set only by LLM-backed functions.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub llm_response: String,
}

impl FunctionResult {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn ok_with(result: AgentData) -> Self {
        Self {
            success: true,
            result,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: message.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_return_matching_variants_only() {
        let mut data = AgentData::new();
        data.set("name", "alpha");
        data.set("count", 3);
        data.set("ratio", 0.5);
        data.set("flag", true);
        data.set("tags", vec!["a".to_string(), "b".to_string()]);

        assert_eq!(data.get_str("name"), Some("alpha"));
        assert_eq!(data.get_i64("count"), Some(3));
        assert_eq!(data.get_f64("ratio"), Some(0.5));
        assert_eq!(data.get_bool("flag"), Some(true));
        assert_eq!(data.get_str_list("tags"), vec!["a", "b"]);

        // Mismatched type falls back to default
        assert_eq!(data.get_i64("name"), None);
        assert_eq!(data.get_str_or("count", "none"), "none");
    }

    #[test]
    fn get_f64_coerces_integers() {
        let data = AgentData::new().with("temperature", 1);
        assert_eq!(data.get_f64("temperature"), Some(1.0));
    }

    #[test]
    fn merge_overwrites_on_collision() {
        let base = AgentData::new().with("a", 1).with("b", "keep");
        let input = AgentData::new().with("a", 2);

        let merged = base.merged_with(&input);
        assert_eq!(merged.get_i64("a"), Some(2));
        assert_eq!(merged.get_str("b"), Some("keep"));
    }

    #[test]
    fn json_round_trip_preserves_scalars() {
        let data = AgentData::new()
            .with("s", "text")
            .with("i", 42)
            .with("d", 2.25)
            .with("b", false)
            .with("list", vec!["x".to_string(), "y".to_string()])
            .with("nested", AgentData::new().with("inner", 7));

        let json = data.to_json();
        let back = AgentData::from_json(&json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn from_json_rejects_non_objects() {
        assert!(AgentData::from_json(&serde_json::json!([1, 2])).is_err());
        assert!(AgentData::from_json(&serde_json::json!("str")).is_err());
    }

    #[test]
    fn from_json_skips_nulls_and_stringifies_mixed_arrays() {
        let json = serde_json::json!({
            "gone": null,
            "mixed": ["a", 1, true],
        });
        let data = AgentData::from_json(&json).unwrap();
        assert!(!data.contains("gone"));
        assert_eq!(data.get_str_list("mixed"), vec!["a", "1", "true"]);
    }

    #[test]
    fn function_result_constructors() {
        assert!(FunctionResult::ok().success);
        let failed = FunctionResult::fail("boom");
        assert!(!failed.success);
        assert_eq!(failed.error_message, "boom");
    }
}
