//! Destructive unification over the cell-based union-find.

use std::rc::Rc;

use crate::error::FailedToMatch;
use crate::types::ty::{
  CellState, Mono, MonoKind, TypeCell, inner_mono, user_type_monify,
};

type UResult = Result<Mono, Box<FailedToMatch>>;

/// Does `cell` occur in `m`? Guards against building infinite types
/// (`a ~ &a`). Only unbound cells are compared: both sides are resolved
/// before binding, so a bound cell on the path has already been chased.
fn occurs(cell: &TypeCell, m: &Mono) -> bool {
  match &*inner_mono(m) {
    MonoKind::Var(_, c) | MonoKind::Indir(_, c) => Rc::ptr_eq(cell, c),
    MonoKind::Pointer(t) | MonoKind::Opaque(t) => occurs(cell, t),
    MonoKind::Tuple(ts) => ts.iter().any(|t| occurs(cell, t)),
    MonoKind::Func(a, r) => occurs(cell, a) || occurs(cell, r),
    MonoKind::User(iu) => iu.monos.iter().any(|t| occurs(cell, t)),
    _ => false,
  }
}

fn bind(cell: &TypeCell, this: &Mono, other: &Mono) -> UResult {
  if occurs(cell, other) {
    return Err(FailedToMatch::leaf(this.clone(), other.clone()))
  }
  *cell.borrow_mut() = CellState::Bound(other.clone());
  Ok(other.clone())
}

/// Compute the most general unifier of `a` and `b`, destructively updating
/// unification cells, and return the resolved representative.
pub fn unify(a: &Mono, b: &Mono) -> UResult {
  let a = inner_mono(a);
  let b = inner_mono(b);
  if Rc::ptr_eq(&a, &b) { return Ok(a) }
  let wrap = |sub| FailedToMatch::wrap(a.clone(), b.clone(), sub);
  match (&*a, &*b) {
    (MonoKind::Unit, MonoKind::Unit) |
    (MonoKind::I64, MonoKind::I64) |
    (MonoKind::CInt, MonoKind::CInt) |
    (MonoKind::F64, MonoKind::F64) |
    (MonoKind::Bool, MonoKind::Bool) |
    (MonoKind::Char, MonoKind::Char) => Ok(a.clone()),

    (MonoKind::Var(_, cell), _) | (MonoKind::Indir(_, cell), _) =>
      bind(cell, &a, &b),
    (_, MonoKind::Var(_, cell)) | (_, MonoKind::Indir(_, cell)) =>
      bind(cell, &b, &a),

    (MonoKind::Pointer(x), MonoKind::Pointer(y)) => {
      unify(x, y).map_err(wrap)?;
      Ok(a.clone())
    }
    (MonoKind::Tuple(xs), MonoKind::Tuple(ys)) => {
      if xs.len() != ys.len() {
        return Err(FailedToMatch::leaf(a.clone(), b.clone()))
      }
      for (x, y) in xs.iter().zip(ys.iter()) {
        unify(x, y).map_err(wrap)?;
      }
      Ok(a.clone())
    }
    (MonoKind::Func(a1, r1), MonoKind::Func(a2, r2)) => {
      unify(a1, a2).map_err(wrap)?;
      unify(r1, r2).map_err(wrap)?;
      Ok(a.clone())
    }
    (MonoKind::Opaque(x), MonoKind::Opaque(y)) => {
      unify(x, y).map_err(wrap)?;
      Ok(a.clone())
    }

    (MonoKind::User(ia), MonoKind::User(ib)) => {
      if ia.user.repr_name == ib.user.repr_name {
        for (x, y) in ia.monos.iter().zip(ib.monos.iter()) {
          unify(x, y).map_err(wrap)?;
        }
        Ok(a.clone())
      } else {
        Err(FailedToMatch::leaf(a.clone(), b.clone()))
      }
    }
    // an alias unifies with a non-user type through its expansion
    (MonoKind::User(iu), _) => match user_type_monify(iu) {
      Some(exp) => unify(&exp, &b).map_err(wrap),
      None => Err(FailedToMatch::leaf(a.clone(), b.clone())),
    },
    (_, MonoKind::User(iu)) => match user_type_monify(iu) {
      Some(exp) => unify(&a, &exp).map_err(wrap),
      None => Err(FailedToMatch::leaf(a.clone(), b.clone())),
    },

    _ => Err(FailedToMatch::leaf(a.clone(), b.clone())),
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;

  use super::*;
  use crate::types::ty::{InstUser, UserInfo, UserType, unbound_cell};

  fn i64_ty() -> Mono { MonoKind::I64.rc() }
  fn indir(id: u32) -> Mono { MonoKind::Indir(id, unbound_cell()).rc() }

  fn list_of(elem: Mono) -> Mono {
    let user = Rc::new(UserType {
      name: "list".into(),
      repr_name: "list".into(),
      ty_vars: Box::new(["a".into()]),
      info: RefCell::new(Some(UserInfo::Enum(Box::new([
        ("Cons".into(), None),
        ("Nil".into(), None),
      ])))),
    });
    MonoKind::User(InstUser::new(user, Box::new([elem]))).rc()
  }

  #[test]
  fn base_types() {
    assert!(unify(&i64_ty(), &i64_ty()).is_ok());
    assert!(unify(&i64_ty(), &MonoKind::Bool.rc()).is_err());
  }

  #[test]
  fn binding_resolves_both_sides() {
    let a = indir(0);
    let f1 = MonoKind::Func(a.clone(), a.clone()).rc();
    let f2 = MonoKind::Func(i64_ty(), indir(1)).rc();
    let res = unify(&f1, &f2).expect("unify");
    // a is now i64, and both functions resolve to i64 -> i64
    assert!(matches!(*inner_mono(&a), MonoKind::I64));
    match &*res {
      MonoKind::Func(x, r) => {
        assert!(matches!(*inner_mono(x), MonoKind::I64));
        assert!(matches!(*inner_mono(r), MonoKind::I64));
      }
      k => panic!("{k:?}"),
    }
  }

  #[test]
  fn unify_is_idempotent() {
    let t = MonoKind::Tuple(Box::new([i64_ty(), MonoKind::Bool.rc()])).rc();
    let r1 = unify(&t, &t).expect("unify");
    let r2 = unify(&t, &r1).expect("unify");
    assert!(Rc::ptr_eq(&r1, &r2));
  }

  #[test]
  fn tuple_arity_mismatch() {
    let t2 = MonoKind::Tuple(Box::new([i64_ty(), i64_ty()])).rc();
    let t3 = MonoKind::Tuple(Box::new([i64_ty(), i64_ty(), i64_ty()])).rc();
    assert!(unify(&t2, &t3).is_err());
  }

  #[test]
  fn occurs_check_rejects_infinite_type() {
    let a = indir(0);
    let ptr = MonoKind::Pointer(a.clone()).rc();
    assert!(unify(&a, &ptr).is_err());
  }

  #[test]
  fn nested_failure_keeps_innermost_conflict() {
    // list(&char) ~ list(i64) fails with inner conflict &char vs i64
    let lhs = list_of(MonoKind::Pointer(MonoKind::Char.rc()).rc());
    let rhs = list_of(i64_ty());
    let err = unify(&lhs, &rhs).expect_err("must fail");
    let (a, b) = err.innermost();
    assert!(matches!(&**a, MonoKind::Pointer(t) if matches!(**t, MonoKind::Char)));
    assert!(matches!(&**b, MonoKind::I64));
    // and the outermost frame is the list pair itself
    assert!(matches!(&*err.failed.0, MonoKind::User(_)));
  }

  #[test]
  fn distinct_repr_names_do_not_unify() {
    let u1 = Rc::new(UserType {
      name: "t".into(), repr_name: "A_t".into(),
      ty_vars: Box::new([]), info: RefCell::new(Some(UserInfo::Alias(i64_ty()))),
    });
    let u2 = Rc::new(UserType {
      name: "t".into(), repr_name: "B_t".into(),
      ty_vars: Box::new([]), info: RefCell::new(Some(UserInfo::Alias(i64_ty()))),
    });
    let m1 = MonoKind::User(InstUser::new(u1, Box::new([]))).rc();
    let m2 = MonoKind::User(InstUser::new(u2, Box::new([]))).rc();
    // aliases of the same structural type, but different repr_name: no
    // expansion fires because both sides are user types
    assert!(unify(&m1, &m2).is_err());
    // one-sided expansion does fire
    assert!(unify(&m1, &i64_ty()).is_ok());
  }

  #[test]
  fn opaque_only_unifies_with_opaque() {
    let o = MonoKind::Opaque(i64_ty()).rc();
    assert!(unify(&o, &MonoKind::Opaque(i64_ty()).rc()).is_ok());
    assert!(unify(&o, &i64_ty()).is_err());
  }
}
