//! The compiler's error taxonomy.
//!
//! Every error is fatal for the compilation unit: `main` prints it on
//! stderr and exits non-zero, and no partial C output is written. There is
//! no recovery or continuation strategy.

use std::fmt;
use std::io;

use crate::Symbol;
use crate::types::ty::Mono;

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

/// A failed unification. `failed` is the pair that could not be matched at
/// this level; `sub` is the failure inside it, so the chain bottoms out at
/// the innermost conflict.
#[derive(Debug)]
pub struct FailedToMatch {
  pub failed: (Mono, Mono),
  pub sub: Option<Box<FailedToMatch>>,
}

impl FailedToMatch {
  #[must_use] pub fn leaf(a: Mono, b: Mono) -> Box<Self> {
    Box::new(Self { failed: (a, b), sub: None })
  }

  #[must_use] pub fn wrap(a: Mono, b: Mono, sub: Box<Self>) -> Box<Self> {
    Box::new(Self { failed: (a, b), sub: Some(sub) })
  }

  /// The innermost conflicting pair.
  #[must_use] pub fn innermost(&self) -> &(Mono, Mono) {
    let mut e = self;
    while let Some(sub) = &e.sub { e = sub }
    &e.failed
  }
}

impl fmt::Display for FailedToMatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "cannot unify `{}` with `{}`", self.failed.0, self.failed.1)?;
    let (a, b) = self.innermost();
    if self.sub.is_some() {
      write!(f, " because `{a}` does not match `{b}`")?
    }
    Ok(())
  }
}

/// What kind of name a [`CompileError::Name`] or [`CompileError::Duplicate`]
/// is about.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NameKind {
  Var,
  Global,
  Type,
  Field,
  Variant,
  Module,
}

impl fmt::Display for NameKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      NameKind::Var => "variable",
      NameKind::Global => "global",
      NameKind::Type => "type",
      NameKind::Field => "field",
      NameKind::Variant => "variant",
      NameKind::Module => "module",
    })
  }
}

#[derive(Debug)]
pub enum CompileError {
  /// Two types could not be unified.
  Unify(Box<FailedToMatch>),
  /// The module import graph has a cycle: `from` was loading `offending`
  /// when it found it already in evaluation.
  ModuleCycle { from: Symbol, offending: String },
  /// Unknown variable, type, field, variant or module.
  Name { kind: NameKind, name: String },
  /// Two declarations collide in the same scope.
  Duplicate { kind: NameKind, name: String },
  /// Refutable pattern in a non-matching position, bad struct/enum pattern
  /// shape, tuple access out of bounds, and the like.
  Pattern(String),
  /// Type constructor applied to the wrong number of arguments.
  Arity { name: Symbol, expected: usize, got: usize },
  /// The front end rejected the source text.
  Parse { line: u32, msg: String },
  Io(io::Error),
}

impl fmt::Display for CompileError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CompileError::Unify(e) => write!(f, "type error: {e}"),
      CompileError::ModuleCycle { from, offending } =>
        write!(f, "module cycle: {from} imports {offending}, which is still being evaluated"),
      CompileError::Name { kind, name } => write!(f, "unknown {kind} `{name}`"),
      CompileError::Duplicate { kind, name } => write!(f, "duplicate {kind} `{name}`"),
      CompileError::Pattern(msg) => write!(f, "pattern error: {msg}"),
      CompileError::Arity { name, expected, got } =>
        write!(f, "type `{name}` expects {expected} argument(s), got {got}"),
      CompileError::Parse { line, msg } => write!(f, "parse error at line {line}: {msg}"),
      CompileError::Io(e) => write!(f, "io error: {e}"),
    }
  }
}

impl std::error::Error for CompileError {}

impl From<Box<FailedToMatch>> for CompileError {
  fn from(e: Box<FailedToMatch>) -> Self { CompileError::Unify(e) }
}

impl From<io::Error> for CompileError {
  fn from(e: io::Error) -> Self { CompileError::Io(e) }
}
