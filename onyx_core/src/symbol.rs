//! Symbol table.
//!
//! Symbols are interned strings identified by a dense `u32` id. The id is
//! packed into the payload bits of a symbol [`Value`], so two symbols for
//! the same string compare equal as plain words. The table owns the interned
//! strings for the lifetime of the VM; member names are hot and never
//! released.

use crate::value::Value;
use rustc_hash::FxHashMap;

/// Interns strings and resolves symbol values back to them.
#[derive(Default)]
pub struct SymbolTable {
    names: Vec<Box<str>>,
    ids: FxHashMap<Box<str>, u32>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Intern a string, returning its symbol value. Repeated interning of
    /// the same string yields the identical value.
    pub fn intern(&mut self, name: &str) -> Value {
        if let Some(&id) = self.ids.get(name) {
            return Value::symbol(id);
        }
        let id = self.names.len() as u32;
        self.names.push(name.into());
        self.ids.insert(name.into(), id);
        Value::symbol(id)
    }

    /// Resolve a symbol value back to its string. Values that were never
    /// interned by this table resolve to `None`.
    pub fn resolve(&self, symbol: Value) -> Option<&str> {
        if !symbol.is_symbol() {
            return None;
        }
        self.names.get(symbol.symbol_id() as usize).map(|s| &**s)
    }

    /// Printable form of a symbol, with a placeholder for unknown ids.
    pub fn display(&self, symbol: Value) -> &str {
        self.resolve(symbol).unwrap_or("<unknown symbol>")
    }

    /// Number of interned symbols.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.intern("push");
        let b = table.intern("push");
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_distinct_names_get_distinct_symbols() {
        let mut table = SymbolTable::new();
        let a = table.intern("foo");
        let b = table.intern("bar");
        assert_ne!(a, b);
    }

    #[test]
    fn test_resolve_round_trip() {
        let mut table = SymbolTable::new();
        let sym = table.intern("constructor");
        assert_eq!(table.resolve(sym), Some("constructor"));
    }

    #[test]
    fn test_resolve_unknown() {
        let table = SymbolTable::new();
        assert_eq!(table.resolve(Value::symbol(99)), None);
        assert_eq!(table.display(Value::symbol(99)), "<unknown symbol>");
        assert_eq!(table.resolve(Value::NULL), None);
    }
}
