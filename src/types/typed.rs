//! The typed expression IR: the expanded form with every node annotated by
//! a resolved monotype.

use crate::Symbol;
use crate::types::ast::{Binop, Lit, Unop};
use crate::types::entity::TopVar;
use crate::types::ty::Mono;

/// The substitution recorded when a polymorphic global is instantiated:
/// each quantified name mapped to its solved monotype, in quantifier order.
pub type InstMap = Box<[(Symbol, Mono)]>;

#[derive(Debug, Clone)]
pub struct Typed {
  pub ty: Mono,
  pub kind: TypedKind,
}

#[derive(Debug, Clone)]
pub enum TypedKind {
  Lit(Lit),
  Local(Symbol),
  /// A reference to a top-level binding, with the instantiation map when
  /// the binding is polymorphic.
  Glob(TopVar, Option<InstMap>),
  Tuple(Box<[Typed]>),
  Apply(Box<Typed>, Box<Typed>),
  Let(Symbol, Box<Typed>, Box<Typed>),
  Seq(Box<Typed>, Box<Typed>),
  If(Box<Typed>, Box<Typed>, Box<Typed>),
  Match(Box<Typed>, Box<[TypedArm]>),
  Binop(Binop, Box<Typed>, Box<Typed>),
  Unop(Unop, Box<Typed>),
  Assign(Box<Typed>, Box<Typed>),
  /// Struct construction with fields in declared (sorted) order. The
  /// instantiated type is the node's `ty`.
  Struct(Symbol, Box<[(Symbol, Typed)]>),
  FieldAccess(Box<Typed>, Symbol),
  TupleAccess(Box<Typed>, u32),
  /// Enum construction.
  Enum(Symbol, Option<Box<Typed>>),
  CheckVariant(Symbol, Box<Typed>),
  AccessEnumField(Symbol, Box<Typed>),
  Ref(Box<Typed>),
  Deref(Box<Typed>),
  Sizeof(Mono),
  Loop(Box<Typed>),
  Break(Box<Typed>),
  Return(Box<Typed>),
  Assert(Box<Typed>),
}

#[derive(Debug, Clone)]
pub struct TypedArm {
  pub cond: Typed,
  pub bindings: Box<[(Symbol, Typed)]>,
  pub body: Typed,
}

impl Typed {
  #[must_use] pub fn new(ty: Mono, kind: TypedKind) -> Typed { Typed { ty, kind } }

  #[must_use] pub fn bx(self) -> Box<Typed> { Box::new(self) }
}
