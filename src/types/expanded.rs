//! The expanded expression IR: the surface AST after pattern desugaring.
//!
//! Patterns are gone, replaced by stacks of single-variable let bindings
//! over primitive projections plus boolean guards; lambdas are gone (they
//! only ever occur as function-binding sugar); multi-argument calls are a
//! single application of a tuple. `match` survives in guard-compiled form
//! so the typed AST can be rebuilt arm by arm.

use crate::Symbol;
use crate::types::ast::{Binop, Lit, TypeExpr, Unop};

#[derive(Debug, Clone)]
pub enum Expanded {
  Lit(Lit),
  Var { path: Box<[Symbol]>, name: Symbol },
  Tuple(Box<[Expanded]>),
  /// Application of one value (unit / single / tuple).
  Apply(Box<Expanded>, Box<Expanded>),
  Let(Symbol, Box<Expanded>, Box<Expanded>),
  Seq(Box<Expanded>, Box<Expanded>),
  /// A missing `else` is an explicit unit branch.
  If(Box<Expanded>, Box<Expanded>, Box<Expanded>),
  /// Guard-compiled match. The scrutinee is always a variable reference
  /// bound by an enclosing `Let`. An unmatched value traps at runtime;
  /// there is no explicit default arm.
  Match(Box<Expanded>, Box<[MatchArm]>),
  Binop(Binop, Box<Expanded>, Box<Expanded>),
  Unop(Unop, Box<Expanded>),
  Assign(Box<Expanded>, Box<Expanded>),
  Struct(Symbol, Box<[(Symbol, Expanded)]>),
  FieldAccess(Box<Expanded>, Symbol),
  TupleAccess(Box<Expanded>, u32),
  /// `true` iff the value's tag is the given variant.
  CheckVariant(Symbol, Box<Expanded>),
  /// Project a variant's payload out of an enum value.
  AccessEnumField(Symbol, Box<Expanded>),
  /// Desugaring-only: statically assert the value is of the named struct
  /// type; evaluates to the value itself.
  AssertStruct(Symbol, Box<Expanded>),
  /// Desugaring-only: statically assert the named variant carries no
  /// payload; evaluates to the value itself.
  AssertEmptyEnumField(Symbol, Box<Expanded>),
  Ref(Box<Expanded>),
  Deref(Box<Expanded>),
  Sizeof(TypeExpr),
  Loop(Box<Expanded>),
  Break(Box<Expanded>),
  Return(Box<Expanded>),
  Assert(Box<Expanded>),
  Typed(Box<Expanded>, TypeExpr),
}

/// One compiled match arm. `cond` is `Lit(true)` for an irrefutable
/// pattern, otherwise a short-circuit conjunction of `CheckVariant` and
/// equality guards over projection chains of the scrutinee.
#[derive(Debug, Clone)]
pub struct MatchArm {
  pub cond: Expanded,
  /// Bindings in dependency order; earlier ones are visible to later ones
  /// and to the body.
  pub bindings: Box<[(Symbol, Expanded)]>,
  pub body: Expanded,
}

impl Expanded {
  #[must_use] pub fn local(name: Symbol) -> Expanded {
    Expanded::Var { path: Box::new([]), name }
  }

  #[must_use] pub fn bx(self) -> Box<Expanded> { Box::new(self) }
}
