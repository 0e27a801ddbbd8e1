//! The daemon's spec document: a versioned table of known error codes.
//!
//! ```json
//! {"version": "1", "exceptions": {"-32600": {"exc_name": "UnauthorizedError", "docstring": "Unauthorized"}}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Why a fetched document was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("spec document is not a JSON object")]
    NotAnObject,
    #[error("spec document is missing a non-empty '{0}' key")]
    MissingKey(&'static str),
    #[error("spec key '{0}' has the wrong type")]
    WrongType(&'static str),
    #[error("exception entry '{code}' is invalid: {reason}")]
    InvalidEntry { code: String, reason: &'static str },
}

/// One known error code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionSpec {
    /// Name of the error kind, e.g. `UnauthorizedError`.
    pub exc_name: String,
    /// Human description used as the error message.
    pub docstring: String,
}

/// Validated spec document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecDocument {
    pub version: String,
    /// Error code (as a string) → exception metadata.
    pub exceptions: BTreeMap<String, ExceptionSpec>,
}

impl Default for SpecDocument {
    /// The built-in document used until a valid one is fetched.
    fn default() -> Self {
        let mut exceptions = BTreeMap::new();
        exceptions.insert(
            "-32600".to_string(),
            ExceptionSpec {
                exc_name: "UnauthorizedError".to_string(),
                docstring: "Unauthorized".to_string(),
            },
        );
        Self {
            version: "0.0".to_string(),
            exceptions,
        }
    }
}

impl SpecDocument {
    /// Validate the structural shape of a raw JSON document.
    ///
    /// Both `version` and `exceptions` must be present and non-empty, and
    /// every exception entry must carry string `exc_name` and `docstring`
    /// fields. Unknown extra keys are ignored.
    pub fn from_value(value: &Value) -> Result<Self, SpecError> {
        let object = value.as_object().ok_or(SpecError::NotAnObject)?;

        let version = match object.get("version") {
            None | Some(Value::Null) => return Err(SpecError::MissingKey("version")),
            Some(Value::String(v)) if v.is_empty() => return Err(SpecError::MissingKey("version")),
            Some(Value::String(v)) => v.clone(),
            Some(_) => return Err(SpecError::WrongType("version")),
        };

        let raw_exceptions = match object.get("exceptions") {
            None | Some(Value::Null) => return Err(SpecError::MissingKey("exceptions")),
            Some(Value::Object(map)) if map.is_empty() => {
                return Err(SpecError::MissingKey("exceptions"))
            }
            Some(Value::Object(map)) => map,
            Some(_) => return Err(SpecError::WrongType("exceptions")),
        };

        let mut exceptions = BTreeMap::new();
        for (code, entry) in raw_exceptions {
            let entry = entry.as_object().ok_or_else(|| SpecError::InvalidEntry {
                code: code.clone(),
                reason: "not an object",
            })?;
            let exc_name = string_field(entry, "exc_name").ok_or_else(|| SpecError::InvalidEntry {
                code: code.clone(),
                reason: "exc_name must be a non-empty string",
            })?;
            let docstring = entry
                .get("docstring")
                .and_then(Value::as_str)
                .ok_or_else(|| SpecError::InvalidEntry {
                    code: code.clone(),
                    reason: "docstring must be a string",
                })?;
            exceptions.insert(
                code.clone(),
                ExceptionSpec {
                    exc_name,
                    docstring: docstring.to_string(),
                },
            );
        }

        Ok(Self {
            version,
            exceptions,
        })
    }

    /// Parse and validate a document from JSON text.
    pub fn from_json(json: &str) -> Result<Self, SpecError> {
        let value: Value = serde_json::from_str(json).map_err(|_| SpecError::NotAnObject)?;
        Self::from_value(&value)
    }

    /// Metadata for an error code, if known.
    pub fn lookup(&self, code: i64) -> Option<&ExceptionSpec> {
        self.exceptions.get(&code.to_string())
    }
}

fn string_field(entry: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
