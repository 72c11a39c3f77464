//! The inference engine: Algorithm W with destructive unification,
//! let-generalization of function bindings over whole SCCs, and weakening
//! of non-function bindings (the value restriction).
//!
//! A component is checked in three steps: every member gets a fresh
//! monotype skeleton, every body is inferred under an environment where
//! the members are visible at their skeletons, and then the component is
//! generalized as a unit so mutually recursive members share one quantifier
//! environment.

use std::collections::HashMap;
use std::rc::Rc;

use crate::Compiler;
use crate::error::{CompileError, NameKind, Result};
use crate::symbol::{Symbol, intern};
use crate::types::ast::{Binop, Lit, Unop};
use crate::types::entity::{Args, ElVar, ModuleRef, Scc, TcState, TopVar};
use crate::types::expanded::Expanded;
use crate::types::ty::{
  CellState, InstUser, Mono, MonoFlags, MonoKind, Poly, User, UserInfo,
  inner_mono, subst_ty_vars, unbound_cell, user_type_monify,
};
use crate::types::typed::{InstMap, Typed, TypedArm, TypedKind};
use crate::unify::unify;

/// Context threaded through expression inference.
#[derive(Clone)]
struct Cx {
  module: ModuleRef,
  locals: im::HashMap<Symbol, Mono>,
  /// The enclosing function's return type; `None` in a non-function body.
  res_type: Option<Mono>,
  /// The enclosing loop's break type.
  break_type: Option<Mono>,
}

impl Cx {
  fn with_local(&self, name: Symbol, ty: Mono) -> Cx {
    Cx { locals: self.locals.update(name, ty), ..self.clone() }
  }
}

fn tuple_or_single(mut tys: Vec<Mono>) -> Mono {
  match tys.len() {
    0 => MonoKind::Unit.rc(),
    1 => tys.pop().expect("len checked"),
    _ => MonoKind::Tuple(tys.into()).rc(),
  }
}

impl Compiler {
  /// Type-check one strongly connected component of `mref`'s bindings.
  pub(crate) fn check_scc(&mut self, mref: &ModuleRef, scc: &Rc<Scc>) -> Result<()> {
    scc.state.set(TcState::InChecking);

    // 1. skeletons: every member becomes visible at a fresh monotype
    let mut fn_args: Vec<Option<Vec<(Symbol, Mono)>>> = vec![];
    for var in &scc.vars {
      let (skel, args) = match &var.args {
        Args::Func(args) => {
          let mut arg_tys = Vec::with_capacity(args.len());
          for (a, annot) in args {
            let ty = match annot {
              Some(te) => self.resolve_type_expr(mref, &HashMap::new(), te)?,
              None => self.fresh_indir(),
            };
            arg_tys.push((*a, ty))
          }
          let dom = tuple_or_single(arg_tys.iter().map(|(_, t)| t.clone()).collect());
          let ret = match &var.ret_annot {
            Some(te) => self.resolve_type_expr(mref, &HashMap::new(), te)?,
            None => self.fresh_indir(),
          };
          (MonoKind::Func(dom, ret).rc(), Some(arg_tys))
        }
        Args::NonFunc => (self.fresh_indir(), None),
      };
      *var.poly.borrow_mut() = Poly::Mono(skel);
      fn_args.push(args)
    }

    // 2. infer each body and unify it against the skeleton
    for (var, args) in scc.vars.iter().zip(&fn_args) {
      let skel = var.poly.borrow().skeleton().clone();
      let (locals, res_type, expected) = match args {
        Some(arg_tys) => {
          let locals = arg_tys.iter().cloned().collect();
          let MonoKind::Func(_, ret) = &*skel else { unreachable!("func skeleton") };
          (locals, Some(ret.clone()), ret.clone())
        }
        None => (im::HashMap::new(), None, skel.clone()),
      };
      let cx = Cx { module: mref.clone(), locals, res_type, break_type: None };
      let typed = self.infer(&cx, &var.expr)?;
      unify(&typed.ty, &expected)?;
      *var.typed_expr.borrow_mut() = Some(Rc::new(typed));
    }

    // 3. arithmetic operands that are still unknown default to i64; known
    // non-numeric operands are rejected here
    for var in &scc.vars {
      let typed = var.typed_expr.borrow().clone().expect("just inferred");
      default_numerics(&typed)?
    }

    // 4. generalize functions, weaken values; one quantifier environment
    // for the whole component
    let mut namer = QuantNamer::default();
    for var in &scc.vars {
      if var.args.is_func() {
        generalize(var, &mut namer)
      } else {
        self.weaken(var)
      }
    }
    scc.state.set(TcState::Done);
    Ok(())
  }

  /// Strip quantifiers, substituting each by a fresh unknown. Two calls on
  /// the same polytype share no cells.
  pub(crate) fn inst(&self, poly: &Poly) -> (Mono, InstMap) {
    let mut map = vec![];
    let mut p = poly;
    while let Poly::ForAll(name, inner) = p {
      map.push((*name, self.fresh_indir()));
      p = inner
    }
    let Poly::Mono(m) = p else { unreachable!() };
    if map.is_empty() {
      (m.clone(), Box::new([]))
    } else {
      let subst: HashMap<Symbol, Mono> = map.iter().cloned().collect();
      (subst_ty_vars(m, &subst), map.into())
    }
  }

  /// The type at which a global is visible, instantiating its polytype.
  /// An `Untouched` component is checked on the spot; an `InChecking` one
  /// hands out its skeleton (mutual recursion).
  fn global_type(&mut self, def_module: &ModuleRef, tv: &TopVar)
    -> Result<(Mono, Option<InstMap>)>
  {
    match tv {
      TopVar::El(var) => {
        let scc = var.scc();
        if scc.state.get() == TcState::Untouched {
          self.check_scc(def_module, &scc)?
        }
        let poly = var.poly.borrow().clone();
        let (m, map) = self.inst(&poly);
        Ok((m, if map.is_empty() { None } else { Some(map) }))
      }
      TopVar::Extern(v) | TopVar::ImplicitExtern(v) => Ok((v.ty.clone(), None)),
    }
  }

  /// A fresh instantiation of a user type: one new unknown per parameter.
  fn fresh_user_inst(&self, user: &User) -> (Mono, HashMap<Symbol, Mono>) {
    let monos: Vec<Mono> = user.ty_vars.iter().map(|_| self.fresh_indir()).collect();
    let map = user.ty_vars.iter().copied().zip(monos.iter().cloned()).collect();
    (MonoKind::User(InstUser::new(user.clone(), monos.into())).rc(), map)
  }

  fn enum_variant(&self, user: &User, variant: Symbol) -> Option<Option<Mono>> {
    match &*user.info.borrow() {
      Some(UserInfo::Enum(variants)) =>
        variants.iter().find(|(v, _)| *v == variant).map(|(_, p)| p.clone()),
      _ => None,
    }
  }

  fn infer(&mut self, cx: &Cx, e: &Expanded) -> Result<Typed> {
    Ok(match e {
      Expanded::Lit(l) => Typed::new(lit_type(l), TypedKind::Lit(l.clone())),

      Expanded::Var { path, name } => {
        if path.is_empty() {
          if let Some(ty) = cx.locals.get(name) {
            return Ok(Typed::new(ty.clone(), TypedKind::Local(*name)))
          }
        }
        if let Some((tv, def)) = self.lookup_global(cx, path, *name)? {
          let (ty, inst) = self.global_type(&def, &tv)?;
          return Ok(Typed::new(ty, TypedKind::Glob(tv, inst)))
        }
        if let Some(user) = self.resolve_variant(&cx.module, path, *name)? {
          let payload = self.enum_variant(&user, *name).expect("variant table");
          if payload.is_some() {
            return Err(CompileError::Arity { name: *name, expected: 1, got: 0 })
          }
          let (ty, _) = self.fresh_user_inst(&user);
          return Ok(Typed::new(ty, TypedKind::Enum(*name, None)))
        }
        return Err(CompileError::Name { kind: NameKind::Var, name: name.to_string() })
      }

      Expanded::Tuple(es) => {
        let ts = es.iter().map(|e| self.infer(cx, e)).collect::<Result<Vec<_>>>()?;
        let ty = MonoKind::Tuple(ts.iter().map(|t| t.ty.clone()).collect()).rc();
        Typed::new(ty, TypedKind::Tuple(ts.into()))
      }

      Expanded::Apply(f, x) => {
        // an application whose head names an enum variant is a construction
        if let Expanded::Var { path, name } = &**f {
          let shadowed = path.is_empty() && cx.locals.contains_key(name);
          if !shadowed && self.lookup_global(cx, path, *name)?.is_none() {
            if let Some(user) = self.resolve_variant(&cx.module, path, *name)? {
              return self.infer_enum_construction(cx, &user, *name, x)
            }
          }
        }
        let tf = self.infer(cx, f)?;
        let tx = self.infer(cx, x)?;
        let res = self.fresh_indir();
        unify(&tf.ty, &MonoKind::Func(tx.ty.clone(), res.clone()).rc())?;
        Typed::new(res, TypedKind::Apply(tf.bx(), tx.bx()))
      }

      Expanded::Let(name, rhs, body) => {
        let trhs = self.infer(cx, rhs)?;
        let tbody = self.infer(&cx.with_local(*name, trhs.ty.clone()), body)?;
        Typed::new(tbody.ty.clone(), TypedKind::Let(*name, trhs.bx(), tbody.bx()))
      }

      Expanded::Seq(a, b) => {
        let ta = self.infer(cx, a)?;
        let tb = self.infer(cx, b)?;
        Typed::new(tb.ty.clone(), TypedKind::Seq(ta.bx(), tb.bx()))
      }

      Expanded::If(c, t, e) => {
        let tc = self.infer(cx, c)?;
        unify(&tc.ty, &MonoKind::Bool.rc())?;
        let tt = self.infer(cx, t)?;
        let te = self.infer(cx, e)?;
        let ty = unify(&tt.ty, &te.ty)?;
        Typed::new(ty, TypedKind::If(tc.bx(), tt.bx(), te.bx()))
      }

      Expanded::Match(scrut, arms) => {
        let tscrut = self.infer(cx, scrut)?;
        let res = self.fresh_indir();
        let arms = arms.iter().map(|arm| {
          let cond = self.infer(cx, &arm.cond)?;
          unify(&cond.ty, &MonoKind::Bool.rc())?;
          let mut inner = cx.clone();
          let mut bindings = Vec::with_capacity(arm.bindings.len());
          for (name, rhs) in &arm.bindings {
            let trhs = self.infer(&inner, rhs)?;
            inner = inner.with_local(*name, trhs.ty.clone());
            bindings.push((*name, trhs))
          }
          let body = self.infer(&inner, &arm.body)?;
          unify(&body.ty, &res)?;
          Ok(TypedArm { cond, bindings: bindings.into(), body })
        }).collect::<Result<Box<[_]>>>()?;
        Typed::new(res, TypedKind::Match(tscrut.bx(), arms))
      }

      Expanded::Binop(op, a, b) => {
        let ta = self.infer(cx, a)?;
        let tb = self.infer(cx, b)?;
        let ty = if matches!(op, Binop::And | Binop::Or) {
          let bool_ty = MonoKind::Bool.rc();
          unify(&ta.ty, &bool_ty)?;
          unify(&tb.ty, &bool_ty)?;
          bool_ty
        } else if op.is_cmp() {
          unify(&ta.ty, &tb.ty)?;
          MonoKind::Bool.rc()
        } else {
          // arithmetic: both operands and the result share one type; see
          // default_numerics for the i64 fallback
          unify(&ta.ty, &tb.ty)?
        };
        Typed::new(ty, TypedKind::Binop(*op, ta.bx(), tb.bx()))
      }

      Expanded::Unop(op, a) => {
        let ta = self.infer(cx, a)?;
        let ty = match op {
          Unop::Not => {
            unify(&ta.ty, &MonoKind::Bool.rc())?;
            MonoKind::Bool.rc()
          }
          Unop::Neg => ta.ty.clone(),
        };
        Typed::new(ty, TypedKind::Unop(*op, ta.bx()))
      }

      Expanded::Assign(lhs, rhs) => {
        let tl = self.infer(cx, lhs)?;
        let tr = self.infer(cx, rhs)?;
        unify(&tl.ty, &tr.ty)?;
        Typed::new(MonoKind::Unit.rc(), TypedKind::Assign(tl.bx(), tr.bx()))
      }

      Expanded::Struct(name, fields) => {
        let user = self.resolve_user_type(&cx.module, &[], *name)?;
        let (ty, map) = self.fresh_user_inst(&user);
        let decl = match &*user.info.borrow() {
          Some(UserInfo::Struct(fields)) => fields.clone(),
          _ => return Err(CompileError::Pattern(
            format!("`{name}` is not a struct type"),
          )),
        };
        let mut given: Vec<(Symbol, &Expanded)> =
          fields.iter().map(|(f, e)| (*f, e)).collect();
        given.sort_by_key(|&(f, _)| f);
        if given.len() != decl.len() {
          return Err(CompileError::Pattern(format!(
            "struct `{name}` has {} field(s), literal supplies {}",
            decl.len(), given.len(),
          )))
        }
        let mut typed_fields = Vec::with_capacity(decl.len());
        for ((f, e), (df, dty)) in given.into_iter().zip(decl.iter()) {
          if f != *df {
            return Err(CompileError::Name { kind: NameKind::Field, name: f.to_string() })
          }
          let te = self.infer(cx, e)?;
          unify(&te.ty, &subst_ty_vars(dty, &map))?;
          typed_fields.push((f, te))
        }
        Typed::new(ty, TypedKind::Struct(*name, typed_fields.into()))
      }

      Expanded::FieldAccess(e, f) => {
        let te = self.infer(cx, e)?;
        let user = self.resolve_field(&cx.module, *f).ok_or_else(|| {
          CompileError::Name { kind: NameKind::Field, name: f.to_string() }
        })?;
        let (owner_ty, map) = self.fresh_user_inst(&user);
        unify(&te.ty, &owner_ty)?;
        let decl = match &*user.info.borrow() {
          Some(UserInfo::Struct(fields)) => fields.clone(),
          _ => unreachable!("field table points at a struct"),
        };
        let (_, fty) = decl.iter().find(|(df, _)| df == f).expect("field table");
        Typed::new(subst_ty_vars(fty, &map), TypedKind::FieldAccess(te.bx(), *f))
      }

      Expanded::TupleAccess(e, i) => {
        let te = self.infer(cx, e)?;
        let resolved = resolve_through_aliases(&te.ty);
        let MonoKind::Tuple(ts) = &*resolved else {
          return Err(CompileError::Pattern(format!(
            "tuple access on a value of type `{resolved}`",
          )))
        };
        let Some(ty) = ts.get(*i as usize) else {
          return Err(CompileError::Pattern(format!(
            "tuple access .{i} out of bounds for `{resolved}`",
          )))
        };
        Typed::new(ty.clone(), TypedKind::TupleAccess(te.bx(), *i))
      }

      Expanded::CheckVariant(v, e) => {
        let user = self.variant_owner(cx, *v)?;
        let te = self.infer(cx, e)?;
        let (owner_ty, _) = self.fresh_user_inst(&user);
        unify(&te.ty, &owner_ty)?;
        Typed::new(MonoKind::Bool.rc(), TypedKind::CheckVariant(*v, te.bx()))
      }

      Expanded::AccessEnumField(v, e) => {
        let user = self.variant_owner(cx, *v)?;
        let te = self.infer(cx, e)?;
        let (owner_ty, map) = self.fresh_user_inst(&user);
        unify(&te.ty, &owner_ty)?;
        let Some(Some(payload)) = self.enum_variant(&user, *v) else {
          return Err(CompileError::Pattern(format!("variant `{v}` carries no payload")))
        };
        Typed::new(subst_ty_vars(&payload, &map), TypedKind::AccessEnumField(*v, te.bx()))
      }

      Expanded::AssertStruct(name, e) => {
        let user = self.resolve_user_type(&cx.module, &[], *name)?;
        if !matches!(&*user.info.borrow(), Some(UserInfo::Struct(_))) {
          return Err(CompileError::Pattern(format!("`{name}` is not a struct type")))
        }
        let te = self.infer(cx, e)?;
        let (owner_ty, _) = self.fresh_user_inst(&user);
        unify(&te.ty, &owner_ty)?;
        te
      }

      Expanded::AssertEmptyEnumField(v, e) => {
        let user = self.variant_owner(cx, *v)?;
        let te = self.infer(cx, e)?;
        let (owner_ty, _) = self.fresh_user_inst(&user);
        unify(&te.ty, &owner_ty)?;
        if !matches!(self.enum_variant(&user, *v), Some(None)) {
          return Err(CompileError::Pattern(format!(
            "variant `{v}` carries a payload that the pattern ignores",
          )))
        }
        te
      }

      Expanded::Ref(e) => {
        let te = self.infer(cx, e)?;
        Typed::new(MonoKind::Pointer(te.ty.clone()).rc(), TypedKind::Ref(te.bx()))
      }

      Expanded::Deref(e) => {
        let te = self.infer(cx, e)?;
        let inner = self.fresh_indir();
        unify(&te.ty, &MonoKind::Pointer(inner.clone()).rc())?;
        Typed::new(inner, TypedKind::Deref(te.bx()))
      }

      Expanded::Sizeof(texpr) => {
        let mono = self.resolve_type_expr(&cx.module, &HashMap::new(), texpr)?;
        Typed::new(MonoKind::I64.rc(), TypedKind::Sizeof(mono))
      }

      Expanded::Loop(body) => {
        let break_ty = self.fresh_indir();
        let mut inner = cx.clone();
        inner.break_type = Some(break_ty.clone());
        let tb = self.infer(&inner, body)?;
        unify(&tb.ty, &MonoKind::Unit.rc())?;
        Typed::new(break_ty, TypedKind::Loop(tb.bx()))
      }

      Expanded::Break(e) => {
        let te = self.infer(cx, e)?;
        let Some(bt) = &cx.break_type else {
          return Err(CompileError::Pattern("break outside of a loop".into()))
        };
        unify(&te.ty, bt)?;
        Typed::new(self.fresh_indir(), TypedKind::Break(te.bx()))
      }

      Expanded::Return(e) => {
        let te = self.infer(cx, e)?;
        let Some(rt) = &cx.res_type else {
          return Err(CompileError::Pattern("return outside of a function".into()))
        };
        unify(&te.ty, rt)?;
        Typed::new(self.fresh_indir(), TypedKind::Return(te.bx()))
      }

      Expanded::Assert(e) => {
        let te = self.infer(cx, e)?;
        unify(&te.ty, &MonoKind::Bool.rc())?;
        Typed::new(MonoKind::Unit.rc(), TypedKind::Assert(te.bx()))
      }

      Expanded::Typed(e, texpr) => {
        let te = self.infer(cx, e)?;
        let mono = self.resolve_type_expr(&cx.module, &HashMap::new(), texpr)?;
        unify(&te.ty, &mono)?;
        te
      }
    })
  }

  fn infer_enum_construction(
    &mut self, cx: &Cx, user: &User, variant: Symbol, payload: &Expanded,
  ) -> Result<Typed> {
    let Some(Some(pty)) = self.enum_variant(user, variant) else {
      return Err(CompileError::Arity { name: variant, expected: 0, got: 1 })
    };
    let (ty, map) = self.fresh_user_inst(user);
    let tp = self.infer(cx, payload)?;
    unify(&tp.ty, &subst_ty_vars(&pty, &map))?;
    Ok(Typed::new(ty, TypedKind::Enum(variant, Some(tp.bx()))))
  }

  fn lookup_global(&mut self, cx: &Cx, path: &[Symbol], name: Symbol)
    -> Result<Option<(TopVar, ModuleRef)>>
  {
    if path.is_empty() {
      if let Some(tv) = self.resolve_global(&cx.module, &[], name)? {
        // the defining module matters for on-demand checking
        let def = self.defining_module(&cx.module, name);
        return Ok(Some((tv, def)))
      }
      return Ok(None)
    }
    let def = self.resolve_module_path(&cx.module, path)?;
    let tv = def.borrow().glob_vars.get(&name).cloned();
    Ok(tv.map(|tv| (tv, def)))
  }

  fn defining_module(&self, cx_module: &ModuleRef, name: Symbol) -> ModuleRef {
    if cx_module.borrow().glob_vars.contains_key(&name) {
      return cx_module.clone()
    }
    for open in cx_module.borrow().opens.iter() {
      if open.borrow().glob_vars.contains_key(&name) {
        return open.clone()
      }
    }
    cx_module.clone()
  }

  fn variant_owner(&mut self, cx: &Cx, v: Symbol) -> Result<User> {
    self.resolve_variant(&cx.module, &[], v)?.ok_or_else(|| {
      CompileError::Name { kind: NameKind::Variant, name: v.to_string() }
    })
  }

  /// Weakening: every free `Var` in a non-function binding's type becomes a
  /// fresh unknown instead of being quantified, so the binding stays
  /// monomorphic and later uses constrain it.
  fn weaken(&self, var: &ElVar) {
    let mono = var.poly.borrow().skeleton().clone();
    self.weaken_walk(&mono);
    *var.poly.borrow_mut() = Poly::Mono(mono)
  }

  fn weaken_walk(&self, m: &Mono) {
    let m = inner_mono(m);
    if m.flags().is_empty() { return }
    match &*m {
      MonoKind::Var(_, cell) =>
        *cell.borrow_mut() = CellState::Bound(self.fresh_indir()),
      MonoKind::Indir(..) => {}
      MonoKind::Pointer(t) | MonoKind::Opaque(t) => self.weaken_walk(t),
      MonoKind::Tuple(ts) => for t in ts { self.weaken_walk(t) },
      MonoKind::Func(a, r) => {
        self.weaken_walk(a);
        self.weaken_walk(r)
      }
      MonoKind::User(iu) => for t in &iu.monos { self.weaken_walk(t) },
      _ => {}
    }
  }
}

fn lit_type(l: &Lit) -> Mono {
  match l {
    Lit::I64(_) => MonoKind::I64.rc(),
    Lit::CInt(_) => MonoKind::CInt.rc(),
    Lit::F64(_) => MonoKind::F64.rc(),
    Lit::Bool(_) => MonoKind::Bool.rc(),
    Lit::Char(_) => MonoKind::Char.rc(),
    Lit::Str(_) => MonoKind::Pointer(MonoKind::Char.rc()).rc(),
    Lit::Unit => MonoKind::Unit.rc(),
  }
}

/// Chase bound cells and alias expansions down to a structural type.
fn resolve_through_aliases(m: &Mono) -> Mono {
  let mut m = inner_mono(m);
  loop {
    let expanded = match &*m {
      MonoKind::User(iu) => user_type_monify(iu),
      _ => None,
    };
    match expanded {
      Some(t) => m = inner_mono(&t),
      None => return m,
    }
  }
}

/// Alphabetic quantifier names, shared by every member of one SCC.
#[derive(Default)]
struct QuantNamer {
  count: u32,
}

impl QuantNamer {
  fn next(&mut self) -> Symbol {
    let n = self.count;
    self.count += 1;
    if n < 26 {
      intern(std::str::from_utf8(&[b'a' + n as u8]).expect("ascii"))
    } else {
      intern(&format!("t{}", n - 26))
    }
  }
}

/// Bind every still-unbound `Indir` reachable from `m` to a freshly named
/// quantifier variable. Sibling bindings in the same SCC see the variable
/// through the shared cell and reuse its name.
fn bind_free(m: &Mono, namer: &mut QuantNamer) {
  let m = inner_mono(m);
  if m.flags().is_empty() { return }
  match &*m {
    MonoKind::Indir(_, cell) => {
      let name = namer.next();
      *cell.borrow_mut() = CellState::Bound(MonoKind::Var(name, unbound_cell()).rc())
    }
    MonoKind::Var(..) => {}
    MonoKind::Pointer(t) | MonoKind::Opaque(t) => bind_free(t, namer),
    MonoKind::Tuple(ts) => for t in ts { bind_free(t, namer) },
    MonoKind::Func(a, r) => {
      bind_free(a, namer);
      bind_free(r, namer)
    }
    MonoKind::User(iu) => for t in &iu.monos { bind_free(t, namer) },
    _ => {}
  }
}

/// Collect quantified variable names in order of first occurrence.
fn collect_var_names(m: &Mono, out: &mut Vec<Symbol>) {
  let m = inner_mono(m);
  if !m.flags().contains(MonoFlags::HAS_VAR) && !m.flags().contains(MonoFlags::HAS_INDIR) {
    return
  }
  match &*m {
    MonoKind::Var(name, _) => {
      if !out.contains(name) { out.push(*name) }
    }
    MonoKind::Pointer(t) | MonoKind::Opaque(t) => collect_var_names(t, out),
    MonoKind::Tuple(ts) => for t in ts { collect_var_names(t, out) },
    MonoKind::Func(a, r) => {
      collect_var_names(a, out);
      collect_var_names(r, out)
    }
    MonoKind::User(iu) => for t in &iu.monos { collect_var_names(t, out) },
    _ => {}
  }
}

/// Close a function binding's type: name every free unknown, then wrap the
/// monotype in `ForAll`s in occurrence order. The typed body shares the
/// cells, so the renaming is visible to later instantiations without a
/// second traversal.
fn generalize(var: &ElVar, namer: &mut QuantNamer) {
  let mono = var.poly.borrow().skeleton().clone();
  bind_free(&mono, namer);
  let mut names = vec![];
  collect_var_names(&mono, &mut names);
  let poly = names.into_iter().rev()
    .fold(Poly::Mono(mono), |p, n| Poly::ForAll(n, Box::new(p)));
  *var.poly.borrow_mut() = poly
}

/// Post-inference pass over a typed tree: an arithmetic operand that is
/// still an unbound unknown is pinned to `i64`; a resolved non-numeric
/// operand is a type error.
fn default_numerics(t: &Typed) -> Result<()> {
  let check_numeric = |ty: &Mono| -> Result<()> {
    let r = inner_mono(ty);
    match &*r {
      MonoKind::I64 | MonoKind::CInt | MonoKind::F64 => Ok(()),
      _ => {
        unify(&r, &MonoKind::I64.rc())?;
        Ok(())
      }
    }
  };
  match &t.kind {
    TypedKind::Binop(op, a, b) => {
      default_numerics(a)?;
      default_numerics(b)?;
      if op.is_arith() { check_numeric(&t.ty)? }
    }
    TypedKind::Unop(op, a) => {
      default_numerics(a)?;
      if *op == Unop::Neg { check_numeric(&t.ty)? }
    }
    TypedKind::Lit(_) | TypedKind::Local(_) | TypedKind::Glob(..) |
    TypedKind::Sizeof(_) => {}
    TypedKind::Tuple(ts) => for t in ts { default_numerics(t)? },
    TypedKind::Struct(_, fields) => for (_, t) in fields { default_numerics(t)? },
    TypedKind::Apply(a, b) | TypedKind::Seq(a, b) |
    TypedKind::Assign(a, b) | TypedKind::Let(_, a, b) => {
      default_numerics(a)?;
      default_numerics(b)?
    }
    TypedKind::If(c, a, b) => {
      default_numerics(c)?;
      default_numerics(a)?;
      default_numerics(b)?
    }
    TypedKind::Match(scrut, arms) => {
      default_numerics(scrut)?;
      for arm in arms {
        default_numerics(&arm.cond)?;
        for (_, b) in &arm.bindings { default_numerics(b)? }
        default_numerics(&arm.body)?
      }
    }
    TypedKind::FieldAccess(e, _) | TypedKind::TupleAccess(e, _) |
    TypedKind::CheckVariant(_, e) | TypedKind::AccessEnumField(_, e) |
    TypedKind::Ref(e) | TypedKind::Deref(e) | TypedKind::Loop(e) |
    TypedKind::Break(e) | TypedKind::Return(e) | TypedKind::Assert(e) =>
      default_numerics(e)?,
    TypedKind::Enum(_, payload) => {
      if let Some(p) = payload { default_numerics(p)? }
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Compiler;

  fn check(src: &str) -> Compiler {
    let mut comp = Compiler::new(".");
    comp.compile_source("main", src).expect("compile");
    comp
  }

  fn poly_of(comp: &Compiler, name: &str) -> Poly {
    let m = comp.modules[&intern("Main")].borrow();
    match &m.glob_vars[&intern(name)] {
      TopVar::El(v) => v.poly.borrow().clone(),
      tv => panic!("{tv:?}"),
    }
  }

  #[test]
  fn identity_generalizes() {
    let comp = check("let id = fun x -> x\nlet main() : i64 = id(0)");
    let poly = poly_of(&comp, "id");
    let Poly::ForAll(a, inner) = &poly else { panic!("not generalized: {poly}") };
    assert_eq!(a.as_str(), "a");
    assert!(inner.is_mono());
    assert_eq!(poly.to_string(), "forall a. 'a -> 'a");
  }

  #[test]
  fn mutually_recursive_pair_shares_one_scc() {
    let comp = check(
      "let even(n) = if n = 0 then true else odd(n - 1)\n\
       let odd(n) = if n = 0 then false else even(n - 1)\n\
       let main() : i64 = if even(10) then 0 else 1",
    );
    let m = comp.modules[&intern("Main")].borrow();
    let TopVar::El(even) = &m.glob_vars[&intern("even")] else { panic!() };
    let TopVar::El(odd) = &m.glob_vars[&intern("odd")] else { panic!() };
    assert!(Rc::ptr_eq(&even.scc(), &odd.scc()));
    assert_eq!(even.scc().state.get(), TcState::Done);
    assert_eq!(even.poly.borrow().to_string(), "i64 -> bool");
    assert_eq!(odd.poly.borrow().to_string(), "i64 -> bool");
  }

  #[test]
  fn non_function_binding_weakens() {
    // x's type stays a fresh unknown rather than forall a. &a
    let comp = check("let x = &0\nlet main() : i64 = **&x");
    let poly = poly_of(&comp, "x");
    assert!(poly.is_mono());
    assert_eq!(poly.to_string(), "&i64");
  }

  #[test]
  fn instantiations_are_fresh() {
    let comp = check("let id = fun x -> x\nlet main() : i64 = id(0)");
    let poly = poly_of(&comp, "id");
    let (m1, i1) = comp.inst(&poly);
    let (m2, _) = comp.inst(&poly);
    assert_eq!(i1.len(), 1);
    // the two instantiations are independently unifiable
    unify(&m1, &MonoKind::Func(MonoKind::I64.rc(), MonoKind::I64.rc()).rc())
      .expect("first instantiation");
    unify(&m2, &MonoKind::Func(MonoKind::Bool.rc(), MonoKind::Bool.rc()).rc())
      .expect("second instantiation is unconstrained by the first");
  }

  #[test]
  fn arithmetic_defaults_to_i64() {
    let comp = check("let double = fun x -> x + x");
    assert_eq!(poly_of(&comp, "double").to_string(), "i64 -> i64");
  }

  #[test]
  fn match_on_option_infers_payload() {
    let comp = check(
      "type option(a) := | Some(a) | None\n\
       let main() : i64 = match Some(1) with | Some(x) -> x | None -> 0",
    );
    let poly = poly_of(&comp, "main");
    assert_eq!(poly.to_string(), "unit -> i64");
  }

  #[test]
  fn branch_type_mismatch_fails() {
    let mut comp = Compiler::new(".");
    let err = comp
      .compile_source("main", "let main() : i64 = if true then 1 else false")
      .expect_err("mismatch");
    assert!(matches!(err, CompileError::Unify(_)));
  }

  #[test]
  fn aliased_function_weakens_instead_of_generalizing() {
    // `f` is a non-function binding, so its copy of `id`'s type is a fresh
    // unknown rather than a quantifier; the first use pins it
    let comp = check(
      "let id = fun x -> x\n\
       let f = id\n\
       let main() : i64 = f(1)",
    );
    let poly = poly_of(&comp, "f");
    assert!(poly.is_mono());
    assert_eq!(poly.to_string(), "i64 -> i64");

    let mut comp = Compiler::new(".");
    let err = comp.compile_source(
      "main",
      "let id = fun x -> x\n\
       let f = id\n\
       let use1() : i64 = f(1)\n\
       let bad() : bool = f(true)",
    ).expect_err("a weakened binding cannot be used at two types");
    assert!(matches!(err, CompileError::Unify(_)));
  }

  #[test]
  fn weakened_ref_rejects_incompatible_uses() {
    let mut comp = Compiler::new(".");
    let err = comp.compile_source(
      "main",
      "let p = &0\nlet bad() : bool = *p\n",
    ).expect_err("incompatible use");
    assert!(matches!(err, CompileError::Unify(_)));
  }

  #[test]
  fn loop_break_types_flow() {
    let comp = check(
      "let first() : i64 = loop (break 7)\n",
    );
    assert_eq!(poly_of(&comp, "first").to_string(), "unit -> i64");
  }
}
