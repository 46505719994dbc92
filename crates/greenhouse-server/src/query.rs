//! Request parameters
//!
//! HTTP handlers receive the query string, channel handlers the JSON payload
//! of the frame. Both are flattened into [`Params`]. Read endpoints decode
//! them into `Deserialize` structs with [`Params::decode`]; every value is
//! text, so typed fields go through [`from_text`] or [`from_text_list`].

use crate::error::{ApiError, ApiResult};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

fn trimmed(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Optional value parsed from its text form; empty counts as absent
pub fn from_text<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let Some(raw) = trimmed(Option::deserialize(de)?) else {
        return Ok(None);
    };
    raw.parse()
        .map(Some)
        .map_err(|_| de::Error::custom(format!("Invalid value: {raw}")))
}

/// Comma separated list, each item parsed; empty items are skipped
pub fn from_text_list<'de, D, T>(de: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = trimmed(Option::deserialize(de)?) else {
        return Ok(None);
    };
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse()
                .map_err(|e: T::Err| de::Error::custom(format!("Invalid value: {e}")))
        })
        .collect::<Result<Vec<T>, D::Error>>()
        .map(Some)
}

fn missing(keys: &[&str]) -> ApiError {
    ApiError::missing(format!(
        "Missing one or many of the following parameters: {}",
        keys.join(", ")
    ))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(HashMap<String, String>);

impl Params {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self(map)
    }

    /// Flatten the top-level fields of a JSON object; nested values keep
    /// their JSON text and `null` counts as absent
    pub fn from_json(value: &Value) -> Self {
        let mut map = HashMap::new();
        if let Value::Object(fields) = value {
            for (key, field) in fields {
                let text = match field {
                    Value::Null => continue,
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                map.insert(key.clone(), text);
            }
        }
        Self(map)
    }

    /// Value of `key`, `None` when absent or empty
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Decode into a parameter struct; unknown keys are ignored
    pub fn decode<T: DeserializeOwned>(&self) -> ApiResult<T> {
        let fields = self
            .0
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        serde_json::from_value(Value::Object(fields)).map_err(|e| ApiError::invalid(e.to_string()))
    }

    /// Fail with `Missing arguments` when any of `keys` is absent
    pub fn require(&self, keys: &[&str]) -> ApiResult<()> {
        if keys.iter().all(|key| self.get(key).is_some()) {
            return Ok(());
        }
        Err(missing(keys))
    }

    pub fn string(&self, key: &str) -> ApiResult<String> {
        self.get(key)
            .map(str::to_string)
            .ok_or_else(|| missing(&[key]))
    }

    /// Parse an optional value
    pub fn parse<T: FromStr>(&self, key: &str) -> ApiResult<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ApiError::invalid(format!("Invalid value for {key}: {raw}"))),
        }
    }

    /// Parse a mandatory value
    pub fn parse_required<T: FromStr>(&self, key: &str) -> ApiResult<T> {
        self.parse(key)?
            .ok_or_else(|| missing(&[key]))
    }
}

impl From<HashMap<String, String>> for Params {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Params {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}
