//! Interned strings.
//!
//! Every identifier in the compiler (variable names, type names, field and
//! variant names, module names, generated C names) is a [`Symbol`], a `Copy`
//! index into a process-global interner. Interned strings are leaked, which
//! is fine for a batch compiler: one compilation, one process.

use std::fmt;
use std::sync::{LazyLock, Mutex};

/// An interned string. Cheap to copy, compare and hash.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

#[derive(Default)]
struct Interner {
  map: hashbrown::HashMap<&'static str, Symbol>,
  names: Vec<&'static str>,
}

impl Interner {
  fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let s: &'static str = Box::leak(s.to_owned().into_boxed_str());
    let sym = Symbol(u32::try_from(self.names.len()).expect("symbol overflow"));
    self.names.push(s);
    self.map.insert(s, sym);
    sym
  }
}

static INTERNER: LazyLock<Mutex<Interner>> = LazyLock::new(Default::default);

/// Intern a string, returning its [`Symbol`].
pub fn intern(s: &str) -> Symbol {
  INTERNER.lock().expect("interner poisoned").intern(s)
}

impl Symbol {
  /// The string this symbol was interned from.
  #[must_use] pub fn as_str(self) -> &'static str {
    INTERNER.lock().expect("interner poisoned").names[self.0 as usize]
  }

  #[must_use] pub fn into_usize(self) -> usize { self.0 as usize }
}

impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.as_str().fmt(f) }
}

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.as_str().fmt(f) }
}

impl From<&str> for Symbol {
  fn from(s: &str) -> Symbol { intern(s) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn intern_is_idempotent() {
    let a = intern("foo");
    let b = intern("foo");
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "foo");
    assert_ne!(a, intern("bar"));
  }
}
