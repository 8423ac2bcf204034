//! The global string interner, which converts identifier names into small
//! integer [`Symbol`]s with identity equality.
//!
//! The interner is process-wide and append-only: concurrent readers are safe,
//! and mutation is serialized behind a mutex. Tests that want a clean slate
//! can construct a private [`Interner`] instead of going through [`intern`].

use std::sync::{LazyLock, Mutex};

use hashbrown::HashMap;

use crate::types::Idx;

/// An interned string. Two symbols compare equal iff the underlying strings
/// are identical.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Idx for Symbol {
  fn into_usize(self) -> usize { self.0 as usize }
  fn from_usize(n: usize) -> Self { Self(n.try_into().expect("overflow")) }
}

impl Symbol {
  /// The symbol for the wildcard name `_`, which is never declared.
  pub const UNDER: Self = Self(0);
  /// The symbol for `init`, the per-file initializer function name.
  pub const INIT: Self = Self(1);
  /// The symbol for `.`, the merge-into-file-scope import name.
  pub const DOT: Self = Self(2);
}

/// A string interner. [`intern`] uses a process-wide instance of this.
#[derive(Debug)]
pub struct Interner {
  map: HashMap<Box<str>, Symbol>,
  strings: Vec<Box<str>>,
}

impl Default for Interner {
  fn default() -> Self { Self::new() }
}

impl Interner {
  /// Construct a fresh interner, with the distinguished symbols pre-interned.
  #[must_use] pub fn new() -> Self {
    let mut i = Self { map: HashMap::new(), strings: vec![] };
    let s = i.intern("_");
    debug_assert_eq!(s, Symbol::UNDER);
    let s = i.intern("init");
    debug_assert_eq!(s, Symbol::INIT);
    let s = i.intern(".");
    debug_assert_eq!(s, Symbol::DOT);
    i
  }

  /// Intern a string, returning the canonical symbol for it.
  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let sym = Symbol(self.strings.len().try_into().expect("interner overflow"));
    self.strings.push(s.into());
    self.map.insert(s.into(), sym);
    sym
  }

  /// Get the string for a symbol.
  ///
  /// # Panics
  /// Panics if the symbol did not come from this interner.
  #[must_use] pub fn get(&self, s: Symbol) -> &str { &self.strings[s.0 as usize] }
}

static INTERNER: LazyLock<Mutex<Interner>> = LazyLock::new(|| Mutex::new(Interner::new()));

/// Intern a string in the global interner.
pub fn intern(s: &str) -> Symbol {
  INTERNER.lock().expect("poisoned").intern(s)
}

impl Symbol {
  /// Get the string for this symbol, cloned out of the global interner.
  #[must_use] pub fn as_str(self) -> String {
    INTERNER.lock().expect("poisoned").get(self).into()
  }
}

impl std::fmt::Display for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    self.as_str().fmt(f)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identity_after_intern() {
    assert_eq!(intern("foo"), intern("foo"));
    assert_ne!(intern("foo"), intern("bar"));
    assert_eq!(intern("_"), Symbol::UNDER);
    assert_eq!(intern("init"), Symbol::INIT);
  }

  #[test]
  fn roundtrip() {
    let s = intern("late_str");
    assert_eq!(s.as_str(), "late_str");
  }
}
