//! Error kinds reported by the daemon and the code → kind mapper.
//!
//! Error kinds are named by the daemon's spec document, so the set is open
//! ended. Each name is interned once per process: mapping the same name twice
//! yields the same [`ErrorKind`], which callers can compare with
//! [`ErrorKind::same`] or match on by [`ErrorKind::name`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::spec::SpecDocument;

/// An interned, daemon-defined error kind.
#[derive(Clone)]
pub struct ErrorKind(Arc<str>);

impl ErrorKind {
    /// Kind name as published in the spec document.
    pub fn name(&self) -> &str {
        &self.0
    }

    /// True if both values come from the same interned entry.
    pub fn same(&self, other: &ErrorKind) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        self.same(other) || self.0 == other.0
    }
}

impl Eq for ErrorKind {}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorKind").field(&self.name()).finish()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Memoized name → kind table.
#[derive(Default)]
pub struct KindRegistry {
    kinds: RwLock<HashMap<String, ErrorKind>>,
}

impl KindRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static KindRegistry {
        static GLOBAL: OnceLock<KindRegistry> = OnceLock::new();
        GLOBAL.get_or_init(KindRegistry::new)
    }

    /// Return the kind for `name`, creating it on first use.
    pub fn intern(&self, name: &str) -> ErrorKind {
        if let Some(kind) = self
            .kinds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return kind.clone();
        }
        let mut kinds = self.kinds.write().unwrap_or_else(PoisonError::into_inner);
        kinds
            .entry(name.to_string())
            .or_insert_with(|| ErrorKind(Arc::from(name)))
            .clone()
    }

    /// Number of interned kinds.
    pub fn len(&self) -> usize {
        self.kinds.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True if nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A daemon error whose code is listed in the spec document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub kind: ErrorKind,
    pub code: i64,
    /// The spec document's description of the code.
    pub message: String,
}

impl RequestError {
    /// True if this error is of the kind named `name`.
    pub fn is(&self, name: &str) -> bool {
        self.kind.name() == name
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RequestError {}

/// Result of mapping a daemon error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedError {
    /// The code is listed in the spec document.
    Known(RequestError),
    /// The code is not listed; the raw message is kept.
    Unknown { code: i64, message: String },
}

/// Turns `(code, message)` pairs from the daemon into [`MappedError`]s.
#[derive(Clone, Copy)]
pub struct ErrorMapper<'a> {
    registry: &'a KindRegistry,
}

impl Default for ErrorMapper<'static> {
    fn default() -> Self {
        Self {
            registry: KindRegistry::global(),
        }
    }
}

impl<'a> ErrorMapper<'a> {
    /// A mapper interning into `registry` instead of the global one.
    pub fn with_registry(registry: &'a KindRegistry) -> Self {
        Self { registry }
    }

    /// Map a daemon error against `spec`.
    pub fn map(&self, spec: &SpecDocument, code: i64, message: &str) -> MappedError {
        match spec.lookup(code) {
            Some(entry) => MappedError::Known(RequestError {
                kind: self.registry.intern(&entry.exc_name),
                code,
                message: entry.docstring.clone(),
            }),
            None => MappedError::Unknown {
                code,
                message: message.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> SpecDocument {
        SpecDocument::from_value(&json!({
            "version": "1",
            "exceptions": {
                "-32600": {"exc_name": "Unauthorized", "docstring": "Unauthorized"},
                "-32601": {"exc_name": "Unauthorized", "docstring": "Also unauthorized"},
                "-32002": {"exc_name": "InvoiceNotFound", "docstring": "No such invoice"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn known_code_maps_to_named_kind() {
        let registry = KindRegistry::new();
        let mapper = ErrorMapper::with_registry(&registry);
        match mapper.map(&spec(), -32002, "raw text") {
            MappedError::Known(err) => {
                assert_eq!(err.kind.name(), "InvoiceNotFound");
                assert_eq!(err.message, "No such invoice");
                assert_eq!(err.code, -32002);
                assert!(err.is("InvoiceNotFound"));
                assert_eq!(err.to_string(), "InvoiceNotFound: No such invoice");
            }
            other => panic!("expected known error, got {other:?}"),
        }
    }

    #[test]
    fn same_name_yields_same_kind() {
        let registry = KindRegistry::new();
        let mapper = ErrorMapper::with_registry(&registry);
        let spec = spec();
        let (MappedError::Known(a), MappedError::Known(b)) =
            (mapper.map(&spec, -32600, ""), mapper.map(&spec, -32601, ""))
        else {
            panic!("both codes are listed");
        };
        assert!(a.kind.same(&b.kind));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_code_keeps_raw_message() {
        let mapper = ErrorMapper::default();
        assert_eq!(
            mapper.map(&spec(), 42, "something broke"),
            MappedError::Unknown {
                code: 42,
                message: "something broke".to_string()
            }
        );
    }

    #[test]
    fn global_registry_is_shared() {
        let a = KindRegistry::global().intern("SharedKindForTest");
        let b = KindRegistry::global().intern("SharedKindForTest");
        assert!(a.same(&b));
    }

    #[test]
    fn distinct_registries_compare_by_name() {
        let a = KindRegistry::new().intern("X");
        let b = KindRegistry::new().intern("X");
        assert!(!a.same(&b));
        assert_eq!(a, b);
    }
}
