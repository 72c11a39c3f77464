//! Build the expanded IR from the surface AST.
//!
//! The pass is purely syntactic: patterns become stacks of single-variable
//! bindings over primitive projections, `match` arms become boolean guards,
//! multi-argument calls become a single application. Name resolution is
//! deferred to inference; all this pass needs is a fresh-name supply.

use crate::Compiler;
use crate::error::{CompileError, Result};
use crate::symbol::Symbol;
use crate::types::ast::{self, Binop, Lit, Pattern, TypeExpr};
use crate::types::expanded::{Expanded, MatchArm};

pub(crate) struct Expander<'a> {
  pub comp: &'a Compiler,
}

/// Bindings produced by breaking a pattern apart, in dependency order.
pub(crate) type Bindings = Vec<(Symbol, Expanded)>;

fn and(a: Expanded, b: Expanded) -> Expanded {
  if matches!(a, Expanded::Lit(Lit::Bool(true))) { return b }
  if matches!(b, Expanded::Lit(Lit::Bool(true))) { return a }
  Expanded::Binop(Binop::And, a.bx(), b.bx())
}

fn is_place(e: &ast::Expr) -> bool {
  match e {
    ast::Expr::Var { .. } | ast::Expr::Deref(_) => true,
    ast::Expr::Field(e, _) | ast::Expr::TupleIdx(e, _) => is_place(e),
    _ => false,
  }
}

impl Expander<'_> {
  fn fresh(&self, base: &str) -> Symbol { self.comp.gensym(base) }

  pub fn expand(&self, e: &ast::Expr) -> Result<Expanded> {
    Ok(match e {
      ast::Expr::Lit(l) => Expanded::Lit(l.clone()),
      ast::Expr::Var { path, name } =>
        Expanded::Var { path: path.clone(), name: *name },
      ast::Expr::Tuple(es) =>
        Expanded::Tuple(es.iter().map(|e| self.expand(e)).collect::<Result<_>>()?),
      ast::Expr::Call(f, args) =>
        Expanded::Apply(self.expand(f)?.bx(), self.args_value(args)?.bx()),
      ast::Expr::Lambda(..) => return Err(CompileError::Pattern(
        "a lambda is only allowed as the right-hand side of a let binding".into(),
      )),
      ast::Expr::Let(pat, rhs, body) => {
        let stack = self.breakup_patterns(pat, self.expand(rhs)?)?;
        let mut acc = self.expand(body)?;
        for (name, e) in stack.into_iter().rev() {
          acc = Expanded::Let(name, e.bx(), acc.bx())
        }
        acc
      }
      ast::Expr::Seq(a, b) =>
        Expanded::Seq(self.expand(a)?.bx(), self.expand(b)?.bx()),
      ast::Expr::If(c, t, e) => {
        let els = match e {
          Some(e) => self.expand(e)?,
          None => Expanded::Lit(Lit::Unit),
        };
        Expanded::If(self.expand(c)?.bx(), self.expand(t)?.bx(), els.bx())
      }
      ast::Expr::Match(scrut, arms) => {
        let sv = self.fresh("m");
        let arms = arms.iter().map(|(pat, body)| {
          let (cond, bindings) = self.match_pattern(pat, Expanded::local(sv))?;
          Ok(MatchArm { cond, bindings: bindings.into(), body: self.expand(body)? })
        }).collect::<Result<Box<[_]>>>()?;
        Expanded::Let(
          sv,
          self.expand(scrut)?.bx(),
          Expanded::Match(Expanded::local(sv).bx(), arms).bx(),
        )
      }
      ast::Expr::Binop(op, a, b) =>
        Expanded::Binop(*op, self.expand(a)?.bx(), self.expand(b)?.bx()),
      ast::Expr::Unop(op, a) => Expanded::Unop(*op, self.expand(a)?.bx()),
      ast::Expr::Assign(lhs, rhs) => {
        if !is_place(lhs) {
          return Err(CompileError::Pattern("assignment target is not a place".into()))
        }
        Expanded::Assign(self.expand(lhs)?.bx(), self.expand(rhs)?.bx())
      }
      ast::Expr::Struct(name, fields) => Expanded::Struct(
        *name,
        fields.iter().map(|(f, e)| Ok((*f, self.expand(e)?)))
          .collect::<Result<_>>()?,
      ),
      ast::Expr::Field(e, f) => Expanded::FieldAccess(self.expand(e)?.bx(), *f),
      ast::Expr::TupleIdx(e, i) => Expanded::TupleAccess(self.expand(e)?.bx(), *i),
      ast::Expr::Ref(e) => Expanded::Ref(self.expand(e)?.bx()),
      ast::Expr::Deref(e) => Expanded::Deref(self.expand(e)?.bx()),
      ast::Expr::Sizeof(t) => Expanded::Sizeof(t.clone()),
      ast::Expr::Loop(e) => Expanded::Loop(self.expand(e)?.bx()),
      ast::Expr::Break(e) => Expanded::Break(self.expand(e)?.bx()),
      ast::Expr::Return(e) => Expanded::Return(self.expand(e)?.bx()),
      ast::Expr::Assert(e) => Expanded::Assert(self.expand(e)?.bx()),
      ast::Expr::Typed(e, t) => Expanded::Typed(self.expand(e)?.bx(), t.clone()),
    })
  }

  /// Pack a call's argument list into the single applied value.
  fn args_value(&self, args: &[ast::Expr]) -> Result<Expanded> {
    Ok(match args {
      [] => Expanded::Lit(Lit::Unit),
      [a] => self.expand(a)?,
      _ => Expanded::Tuple(args.iter().map(|a| self.expand(a)).collect::<Result<_>>()?),
    })
  }

  /// Break an irrefutable pattern into a stack of variable bindings whose
  /// order makes earlier ones available to later projections.
  pub fn breakup_patterns(&self, pat: &Pattern, rhs: Expanded) -> Result<Bindings> {
    let mut out = vec![];
    self.breakup(&mut out, pat, rhs)?;
    Ok(out)
  }

  fn breakup(&self, out: &mut Bindings, pat: &Pattern, rhs: Expanded) -> Result<()> {
    match pat {
      Pattern::Var(n) => out.push((*n, rhs)),
      Pattern::Unit => {
        out.push((self.fresh("u"), Expanded::Typed(rhs.bx(), TypeExpr::Unit)))
      }
      Pattern::Lit(_) => return Err(CompileError::Pattern(
        "refutable pattern in let binding".into(),
      )),
      Pattern::Tuple(ps) => {
        let v = self.fresh("t");
        out.push((v, rhs));
        for (i, p) in ps.iter().enumerate() {
          let i = u32::try_from(i).expect("tuple width");
          self.breakup(out, p, Expanded::TupleAccess(Expanded::local(v).bx(), i))?
        }
      }
      Pattern::Ref(p) => {
        let v = self.fresh("r");
        out.push((v, rhs));
        self.breakup(out, p, Expanded::Deref(Expanded::local(v).bx()))?
      }
      Pattern::Struct(name, fields) => {
        let v = self.fresh("s");
        out.push((v, Expanded::AssertStruct(*name, rhs.bx())));
        for (f, sub) in fields {
          let sub = sub.clone().unwrap_or(Pattern::Var(*f));
          self.breakup(&mut *out, &sub,
            Expanded::FieldAccess(Expanded::local(v).bx(), *f))?
        }
      }
      Pattern::Typed(p, t) => {
        let v = self.fresh("a");
        out.push((v, Expanded::Typed(rhs.bx(), t.clone())));
        self.breakup(out, p, Expanded::local(v))?
      }
      Pattern::Enum(name, Some(p)) => {
        let v = self.fresh("e");
        out.push((v, Expanded::AccessEnumField(*name, rhs.bx())));
        self.breakup(out, p, Expanded::local(v))?
      }
      Pattern::Enum(name, None) => {
        out.push((self.fresh("e"), Expanded::AssertEmptyEnumField(*name, rhs.bx())))
      }
    }
    Ok(())
  }

  /// Compile a match-arm pattern against the scrutinee reference `rhs`.
  ///
  /// Guards must be evaluable before any arm binding exists, so they are
  /// built over projection chains of the scrutinee rather than over the
  /// bound names; the bindings repeat the same (pure) chains for the body.
  fn match_pattern(&self, pat: &Pattern, rhs: Expanded) -> Result<(Expanded, Bindings)> {
    let tt = Expanded::Lit(Lit::Bool(true));
    Ok(match pat {
      Pattern::Var(n) => (tt, vec![(*n, rhs)]),
      Pattern::Unit => (tt, vec![
        (self.fresh("u"), Expanded::Typed(rhs.bx(), TypeExpr::Unit)),
      ]),
      Pattern::Lit(l) => (
        Expanded::Binop(Binop::Eq, rhs.bx(), Expanded::Lit(l.clone()).bx()),
        vec![],
      ),
      Pattern::Tuple(ps) => {
        let mut cond = tt;
        let mut bindings = vec![];
        for (i, p) in ps.iter().enumerate() {
          let i = u32::try_from(i).expect("tuple width");
          let proj = Expanded::TupleAccess(rhs.clone().bx(), i);
          let (c, mut bs) = self.match_pattern(p, proj)?;
          cond = and(cond, c);
          bindings.append(&mut bs)
        }
        (cond, bindings)
      }
      Pattern::Ref(p) => self.match_pattern(p, Expanded::Deref(rhs.bx()))?,
      Pattern::Struct(name, fields) => {
        let mut cond = tt;
        let mut bindings = vec![
          (self.fresh("s"), Expanded::AssertStruct(*name, rhs.clone().bx())),
        ];
        for (f, sub) in fields {
          let sub = sub.clone().unwrap_or(Pattern::Var(*f));
          let proj = Expanded::FieldAccess(rhs.clone().bx(), *f);
          let (c, mut bs) = self.match_pattern(&sub, proj)?;
          cond = and(cond, c);
          bindings.append(&mut bs)
        }
        (cond, bindings)
      }
      Pattern::Typed(p, t) => {
        let mut bindings = vec![
          (self.fresh("a"), Expanded::Typed(rhs.clone().bx(), t.clone())),
        ];
        let (cond, mut bs) = self.match_pattern(p, rhs)?;
        bindings.append(&mut bs);
        (cond, bindings)
      }
      Pattern::Enum(name, Some(p)) => {
        let check = Expanded::CheckVariant(*name, rhs.clone().bx());
        let proj = Expanded::AccessEnumField(*name, rhs.bx());
        let (c, bindings) = self.match_pattern(p, proj)?;
        (and(check, c), bindings)
      }
      Pattern::Enum(name, None) => (
        Expanded::CheckVariant(*name, rhs.clone().bx()),
        vec![(self.fresh("e"), Expanded::AssertEmptyEnumField(*name, rhs.bx()))],
      ),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Compiler;
  use crate::parser::parse;
  use crate::symbol::intern;

  fn expand_rhs(src: &str) -> Result<Expanded> {
    let comp = Compiler::new(".");
    let tops = parse(src).expect("parse");
    match &tops[0] {
      ast::TopLevel::Let { expr, .. } | ast::TopLevel::LetFn { body: expr, .. } =>
        Expander { comp: &comp }.expand(expr),
      t => panic!("{t:?}"),
    }
  }

  #[test]
  fn tuple_pattern_breaks_into_projections() {
    let comp = Compiler::new(".");
    let tops = parse("let f(v) = let (a, b) = v; a").expect("parse");
    let ast::TopLevel::LetFn { body, .. } = &tops[0] else { panic!() };
    let e = Expander { comp: &comp }.expand(body).expect("expand");
    // let t0 = v; let a = t0.0; let b = t0.1; a
    let Expanded::Let(_, _, rest) = &e else { panic!("{e:?}") };
    let Expanded::Let(a, proj, rest) = &**rest else { panic!() };
    assert_eq!(a.as_str(), "a");
    assert!(matches!(&**proj, Expanded::TupleAccess(_, 0)));
    let Expanded::Let(b, proj, _) = &**rest else { panic!() };
    assert_eq!(b.as_str(), "b");
    assert!(matches!(&**proj, Expanded::TupleAccess(_, 1)));
  }

  #[test]
  fn refutable_let_pattern_is_rejected() {
    assert!(matches!(
      expand_rhs("let f(v) = let 1 = v; 0"),
      Err(CompileError::Pattern(_)),
    ));
  }

  #[test]
  fn match_compiles_to_guards() {
    let e = expand_rhs(
      "let f(v) = match v with | Some(x) -> x | None -> 0",
    ).expect("expand");
    let Expanded::Let(_, _, m) = &e else { panic!("{e:?}") };
    let Expanded::Match(_, arms) = &**m else { panic!("{m:?}") };
    assert_eq!(arms.len(), 2);
    // first arm: guard checks the variant, binding projects the payload
    assert!(matches!(&arms[0].cond, Expanded::CheckVariant(v, _) if v.as_str() == "Some"));
    assert_eq!(arms[0].bindings.len(), 1);
    assert_eq!(arms[0].bindings[0].0.as_str(), "x");
    assert!(matches!(&arms[0].bindings[0].1, Expanded::AccessEnumField(..)));
    // second arm: guard only, payload asserted empty
    assert!(matches!(&arms[1].cond, Expanded::CheckVariant(v, _) if v.as_str() == "None"));
    assert!(matches!(&arms[1].bindings[0].1, Expanded::AssertEmptyEnumField(..)));
  }

  #[test]
  fn literal_guards_combine_with_and() {
    let e = expand_rhs("let f(v) = match v with | (1, x) -> x | (_, y) -> y")
      .expect("expand");
    let Expanded::Let(_, _, m) = &e else { panic!() };
    let Expanded::Match(_, arms) = &**m else { panic!() };
    assert!(matches!(&arms[0].cond, Expanded::Binop(Binop::Eq, ..)));
    assert_eq!(arms[0].bindings[0].0, intern("x"));
    // irrefutable second arm has a constant-true guard
    assert!(matches!(&arms[1].cond, Expanded::Lit(Lit::Bool(true))));
  }

  #[test]
  fn lambda_outside_let_is_rejected() {
    assert!(expand_rhs("let f(v) = (fun x -> x)(v)").is_err());
  }
}
