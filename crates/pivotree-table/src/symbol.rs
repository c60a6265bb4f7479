//! Symbol interning: canonical, deduplicated storage for string scalars.

use std::sync::Arc;

use ahash::AHashSet;

use crate::Scalar;

/// Deduplicating store for string payloads.
///
/// Interning keeps one `Arc<str>` per distinct string, so every node value,
/// primary key and string aggregate that passes through a tree shares storage.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: AHashSet<Arc<str>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct strings interned.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Intern a string, returning its canonical scalar.
    pub fn intern_str(&mut self, s: &str) -> Scalar {
        if let Some(existing) = self.symbols.get(s) {
            return Scalar::Str(Arc::clone(existing));
        }
        let sym: Arc<str> = Arc::from(s);
        self.symbols.insert(Arc::clone(&sym));
        Scalar::Str(sym)
    }

    /// Canonicalize a scalar. Non-string values are returned unchanged.
    pub fn intern(&mut self, value: &Scalar) -> Scalar {
        match value {
            Scalar::Str(s) => {
                if let Some(existing) = self.symbols.get(s.as_ref()) {
                    return Scalar::Str(Arc::clone(existing));
                }
                self.symbols.insert(Arc::clone(s));
                Scalar::Str(Arc::clone(s))
            }
            other => other.clone(),
        }
    }

    /// Look up an already-interned string without inserting.
    pub fn get(&self, s: &str) -> Option<Scalar> {
        self.symbols.get(s).map(|sym| Scalar::Str(Arc::clone(sym)))
    }
}
