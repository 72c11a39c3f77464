//! Monotypes, polytypes and user-defined types.
//!
//! Unification state lives inside the types themselves: every `Var` and
//! `Indir` carries a shared mutable cell holding either `Unbound` or
//! `Bound(mono)`. Unification records substitutions by writing these cells,
//! and [`inner_mono`] follows chains of bound cells to the representative,
//! rewriting intermediate cells as it goes (path compression). The result is
//! a union-find where the "table" is the type graph itself.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use crate::Symbol;

/// A monotype. `Rc`-shared so that unification through a cell is visible to
/// every expression annotated with the same node.
pub type Mono = Rc<MonoKind>;

/// The mutable binding cell of a `Var` or `Indir`.
pub type TypeCell = Rc<RefCell<CellState>>;

/// Contents of a unification cell.
#[derive(Debug)]
pub enum CellState {
  /// Not yet constrained.
  Unbound,
  /// Identified with another monotype by unification.
  Bound(Mono),
}

/// Allocate a fresh unbound cell.
#[must_use] pub fn unbound_cell() -> TypeCell {
  Rc::new(RefCell::new(CellState::Unbound))
}

bitflags! {
  /// Conservative structure bits, computed without following cell bindings.
  /// Once a cell is bound the bits can overstate (a `HAS_INDIR` subtree may
  /// have been resolved to something ground since) but never understate, so
  /// an empty flag set is a licence to skip a traversal.
  #[derive(Copy, Clone, Debug, PartialEq, Eq)]
  pub struct MonoFlags: u8 {
    /// Contains a `Var` somewhere.
    const HAS_VAR = 1;
    /// Contains an `Indir` somewhere.
    const HAS_INDIR = 2;
  }
}

#[derive(Debug)]
pub enum MonoKind {
  Unit,
  I64,
  CInt,
  F64,
  Bool,
  Char,
  /// A raw pointer, `&T` in the surface syntax.
  Pointer(Mono),
  Tuple(Box<[Mono]>),
  /// Functions take exactly one value; multi-argument functions take a
  /// tuple and zero-argument functions take `Unit`.
  Func(Mono, Mono),
  /// An instantiated user-defined type.
  User(InstUser),
  /// Unifies only with a structurally identical `Opaque`.
  Opaque(Mono),
  /// A named type variable: a quantifier occurrence, or a declaration's
  /// parameter. Its cell may be bound once (by unification or weakening)
  /// but is never rewritten afterwards.
  Var(Symbol, TypeCell),
  /// A fresh unknown introduced during inference. Its cell may be rewritten
  /// by path compression, always towards a more resolved representative.
  Indir(u32, TypeCell),
}

impl MonoKind {
  #[must_use] pub fn rc(self) -> Mono { Rc::new(self) }

  #[must_use] pub fn flags(&self) -> MonoFlags {
    match self {
      MonoKind::Unit | MonoKind::I64 | MonoKind::CInt | MonoKind::F64 |
      MonoKind::Bool | MonoKind::Char => MonoFlags::empty(),
      MonoKind::Pointer(t) | MonoKind::Opaque(t) => t.flags(),
      MonoKind::Tuple(ts) =>
        ts.iter().fold(MonoFlags::empty(), |f, t| f | t.flags()),
      MonoKind::Func(a, r) => a.flags() | r.flags(),
      MonoKind::User(iu) =>
        iu.monos.iter().fold(MonoFlags::empty(), |f, t| f | t.flags()),
      MonoKind::Var(..) => MonoFlags::HAS_VAR,
      MonoKind::Indir(..) => MonoFlags::HAS_INDIR,
    }
  }
}

/// Follow chains of bound cells to the terminal representative.
///
/// Idempotent, and allocation-free once the chain is compressed: every bound
/// cell on the path is rewritten to point directly at the result.
#[must_use] pub fn inner_mono(m: &Mono) -> Mono {
  match &**m {
    MonoKind::Var(_, cell) | MonoKind::Indir(_, cell) => {
      let bound = match &*cell.borrow() {
        CellState::Bound(t) => t.clone(),
        CellState::Unbound => return m.clone(),
      };
      let res = inner_mono(&bound);
      if !Rc::ptr_eq(&res, &bound) {
        *cell.borrow_mut() = CellState::Bound(res.clone());
      }
      res
    }
    _ => m.clone(),
  }
}

/// A user-defined type declaration: alias, struct or enum.
///
/// `info` starts empty and is filled exactly once during elaboration. The
/// two-phase construction is what allows a declaration to mention itself
/// (`type list(a) := { next: option(&list(a)) }`): the `UserType` is
/// registered before its body is resolved.
pub struct UserType {
  /// The declared name.
  pub name: Symbol,
  /// Compilation-unique name; doubles as the C identifier stem.
  pub repr_name: Symbol,
  /// Declared type parameters.
  pub ty_vars: Box<[Symbol]>,
  pub info: RefCell<Option<UserInfo>>,
}

pub type User = Rc<UserType>;

#[derive(Debug)]
pub enum UserInfo {
  Alias(Mono),
  Struct(Box<[(Symbol, Mono)]>),
  Enum(Box<[(Symbol, Option<Mono>)]>),
}

// The info cell can reach back to the same `UserType` through a pointer or
// tuple, so the derived impl would recurse forever.
impl fmt::Debug for UserType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("UserType")
      .field("name", &self.name)
      .field("repr_name", &self.repr_name)
      .field("ty_vars", &self.ty_vars)
      .finish_non_exhaustive()
  }
}

/// A user type applied to a vector of monotype arguments, one per `ty_vars`
/// entry.
#[derive(Debug)]
pub struct InstUser {
  pub user: User,
  pub monos: Box<[Mono]>,
  /// Cached expansion when the declaration is an alias.
  pub inst_user_mono: RefCell<Option<Mono>>,
}

impl InstUser {
  #[must_use] pub fn new(user: User, monos: Box<[Mono]>) -> Self {
    Self { user, monos, inst_user_mono: RefCell::new(None) }
  }

  /// Build the substitution from this instantiation's declaration parameters
  /// to its arguments.
  #[must_use] pub fn subst_map(&self) -> HashMap<Symbol, Mono> {
    self.user.ty_vars.iter().copied().zip(self.monos.iter().cloned()).collect()
  }
}

/// If `iu`'s declaration is an alias, expand it at `iu`'s arguments.
/// The expansion is cached in the instantiation.
#[must_use] pub fn user_type_monify(iu: &InstUser) -> Option<Mono> {
  if let Some(m) = &*iu.inst_user_mono.borrow() { return Some(m.clone()) }
  let body = match &*iu.user.info.borrow() {
    Some(UserInfo::Alias(body)) => body.clone(),
    _ => return None,
  };
  let m = subst_ty_vars(&body, &iu.subst_map());
  *iu.inst_user_mono.borrow_mut() = Some(m.clone());
  Some(m)
}

/// Substitute `Var` occurrences by name, rebuilding only subtrees that can
/// contain one. Bound cells are followed first so a variable hidden behind
/// an `Indir` chain is still replaced, which is also why `HAS_INDIR`
/// subtrees cannot be skipped.
#[must_use] pub fn subst_ty_vars(m: &Mono, map: &HashMap<Symbol, Mono>) -> Mono {
  if map.is_empty() { return m.clone() }
  let m = inner_mono(m);
  if m.flags().is_empty() { return m }
  match &*m {
    MonoKind::Var(name, _) => match map.get(name) {
      Some(t) => t.clone(),
      None => m.clone(),
    },
    MonoKind::Pointer(t) => MonoKind::Pointer(subst_ty_vars(t, map)).rc(),
    MonoKind::Opaque(t) => MonoKind::Opaque(subst_ty_vars(t, map)).rc(),
    MonoKind::Tuple(ts) =>
      MonoKind::Tuple(ts.iter().map(|t| subst_ty_vars(t, map)).collect()).rc(),
    MonoKind::Func(a, r) =>
      MonoKind::Func(subst_ty_vars(a, map), subst_ty_vars(r, map)).rc(),
    MonoKind::User(iu) => MonoKind::User(InstUser::new(
      iu.user.clone(),
      iu.monos.iter().map(|t| subst_ty_vars(t, map)).collect(),
    )).rc(),
    _ => m.clone(),
  }
}

/// A polytype: zero or more universal quantifiers around a monotype.
/// Quantifiers are introduced only by generalization.
#[derive(Debug, Clone)]
pub enum Poly {
  Mono(Mono),
  ForAll(Symbol, Box<Poly>),
}

impl Poly {
  /// The monotype under all quantifiers.
  #[must_use] pub fn skeleton(&self) -> &Mono {
    let mut p = self;
    loop {
      match p {
        Poly::Mono(m) => return m,
        Poly::ForAll(_, inner) => p = inner,
      }
    }
  }

  #[must_use] pub fn is_mono(&self) -> bool { matches!(self, Poly::Mono(_)) }
}

impl fmt::Display for MonoKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MonoKind::Unit => write!(f, "unit"),
      MonoKind::I64 => write!(f, "i64"),
      MonoKind::CInt => write!(f, "c_int"),
      MonoKind::F64 => write!(f, "f64"),
      MonoKind::Bool => write!(f, "bool"),
      MonoKind::Char => write!(f, "char"),
      MonoKind::Pointer(t) => write!(f, "&{t}"),
      MonoKind::Tuple(ts) => {
        write!(f, "(")?;
        for (i, t) in ts.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          write!(f, "{t}")?
        }
        write!(f, ")")
      }
      MonoKind::Func(a, r) => write!(f, "{a} -> {r}"),
      MonoKind::User(iu) => {
        write!(f, "{}", iu.user.name)?;
        if !iu.monos.is_empty() {
          write!(f, "(")?;
          for (i, t) in iu.monos.iter().enumerate() {
            if i != 0 { write!(f, ", ")? }
            write!(f, "{t}")?
          }
          write!(f, ")")?
        }
        Ok(())
      }
      MonoKind::Opaque(t) => write!(f, "opaque({t})"),
      MonoKind::Var(name, cell) => match &*cell.borrow() {
        CellState::Bound(t) => write!(f, "{t}"),
        CellState::Unbound => write!(f, "'{name}"),
      },
      MonoKind::Indir(id, cell) => match &*cell.borrow() {
        CellState::Bound(t) => write!(f, "{t}"),
        CellState::Unbound => write!(f, "_{id}"),
      },
    }
  }
}

impl fmt::Display for Poly {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut p = self;
    let mut any = false;
    while let Poly::ForAll(name, inner) = p {
      write!(f, "{}{name}", if any { " " } else { "forall " })?;
      any = true;
      p = inner;
    }
    if any { write!(f, ". ")? }
    match p {
      Poly::Mono(m) => write!(f, "{m}"),
      Poly::ForAll(..) => unreachable!(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn indir(id: u32) -> Mono { MonoKind::Indir(id, unbound_cell()).rc() }

  #[test]
  fn inner_mono_compresses_chains() {
    let a = indir(0);
    let b = indir(1);
    let i64_ty = MonoKind::I64.rc();
    // a -> b -> i64
    if let MonoKind::Indir(_, cell) = &*b {
      *cell.borrow_mut() = CellState::Bound(i64_ty.clone());
    }
    if let MonoKind::Indir(_, cell) = &*a {
      *cell.borrow_mut() = CellState::Bound(b.clone());
    }
    let res = inner_mono(&a);
    assert!(matches!(*res, MonoKind::I64));
    // a's cell now points directly at the representative
    if let MonoKind::Indir(_, cell) = &*a {
      match &*cell.borrow() {
        CellState::Bound(t) => assert!(Rc::ptr_eq(t, &res)),
        CellState::Unbound => panic!("cell lost its binding"),
      }
    }
  }

  #[test]
  fn flags_are_conservative() {
    let a = indir(0);
    let tup = MonoKind::Tuple(Box::new([MonoKind::I64.rc(), a.clone()])).rc();
    assert!(tup.flags().contains(MonoFlags::HAS_INDIR));
    // binding the cell does not clear the (stale but safe) flag
    if let MonoKind::Indir(_, cell) = &*a {
      *cell.borrow_mut() = CellState::Bound(MonoKind::Bool.rc());
    }
    assert!(tup.flags().contains(MonoFlags::HAS_INDIR));
    assert!(MonoKind::I64.rc().flags().is_empty());
  }

  #[test]
  fn alias_expansion_caches() {
    let user = Rc::new(UserType {
      name: "pair".into(),
      repr_name: "pair".into(),
      ty_vars: Box::new(["a".into()]),
      info: RefCell::new(None),
    });
    let var = MonoKind::Var("a".into(), unbound_cell()).rc();
    *user.info.borrow_mut() = Some(UserInfo::Alias(
      MonoKind::Tuple(Box::new([var.clone(), var])).rc(),
    ));
    let iu = InstUser::new(user, Box::new([MonoKind::Bool.rc()]));
    let m = user_type_monify(&iu).expect("alias");
    match &*m {
      MonoKind::Tuple(ts) => {
        assert!(matches!(*ts[0], MonoKind::Bool));
        assert!(matches!(*ts[1], MonoKind::Bool));
      }
      k => panic!("expected tuple, got {k:?}"),
    }
    let again = user_type_monify(&iu).expect("alias");
    assert!(Rc::ptr_eq(&m, &again));
  }
}
