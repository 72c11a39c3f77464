//! The call graph among a module's top-level bindings and its partition
//! into strongly connected components, which are the units of
//! let-generalization. Components come out in completion order (callees
//! before callers), so checking them in that order means every component
//! sees already-generalized types for its dependencies.

use std::cell::Cell;
use std::cmp::min;
use std::collections::HashMap;
use std::rc::Rc;

use bit_set::BitSet;
use smallvec::SmallVec;

use crate::Symbol;
use crate::types::entity::{Args, ElVar, Module, Scc, TcState};
use crate::types::expanded::Expanded;

/// Record, for every `El` var of the module, the set of module globals its
/// body references. Locally bound names shadow globals and produce no edge.
pub(crate) fn collect_used_globals(module: &Module) {
  for var in module.el_vars() {
    let mut locals: Vec<Symbol> = vec![];
    if let Args::Func(args) = &var.args {
      locals.extend(args.iter().map(|(a, _)| *a))
    }
    let mut used = vec![];
    walk(&var.expr, module, &mut locals, &mut used);
    *var.used_globals.borrow_mut() = used.into();
  }
}

fn walk(e: &Expanded, module: &Module, locals: &mut Vec<Symbol>, out: &mut Vec<Symbol>) {
  match e {
    Expanded::Var { path, name } => {
      if path.is_empty() && !locals.contains(name)
        && module.glob_vars.contains_key(name) && !out.contains(name)
      {
        out.push(*name)
      }
    }
    Expanded::Lit(_) | Expanded::Sizeof(_) => {}
    Expanded::Let(name, rhs, body) => {
      walk(rhs, module, locals, out);
      locals.push(*name);
      walk(body, module, locals, out);
      locals.pop();
    }
    Expanded::Match(scrut, arms) => {
      walk(scrut, module, locals, out);
      for arm in arms {
        walk(&arm.cond, module, locals, out);
        let depth = locals.len();
        for (name, rhs) in &arm.bindings {
          walk(rhs, module, locals, out);
          locals.push(*name)
        }
        walk(&arm.body, module, locals, out);
        locals.truncate(depth)
      }
    }
    Expanded::Tuple(es) => for e in es { walk(e, module, locals, out) },
    Expanded::Struct(_, fields) =>
      for (_, e) in fields { walk(e, module, locals, out) },
    Expanded::Apply(a, b) | Expanded::Seq(a, b) |
    Expanded::Binop(_, a, b) | Expanded::Assign(a, b) => {
      walk(a, module, locals, out);
      walk(b, module, locals, out)
    }
    Expanded::If(c, t, e) => {
      walk(c, module, locals, out);
      walk(t, module, locals, out);
      walk(e, module, locals, out)
    }
    Expanded::Unop(_, e) | Expanded::FieldAccess(e, _) |
    Expanded::TupleAccess(e, _) | Expanded::CheckVariant(_, e) |
    Expanded::AccessEnumField(_, e) | Expanded::AssertStruct(_, e) |
    Expanded::AssertEmptyEnumField(_, e) | Expanded::Ref(e) |
    Expanded::Deref(e) | Expanded::Loop(e) | Expanded::Break(e) |
    Expanded::Return(e) | Expanded::Assert(e) | Expanded::Typed(e, _) =>
      walk(e, module, locals, out),
  }
}

/// Tarjan's algorithm over the module's `El` vars. Returns the components
/// in completion order and stores each var's component on the var.
pub(crate) fn partition(module: &Module) -> Vec<Rc<Scc>> {
  let els: Vec<Rc<ElVar>> = module.el_vars().cloned().collect();
  let index_of: HashMap<Symbol, usize> =
    els.iter().map(|v| (v.name, v.order)).collect();
  let succs: Vec<SmallVec<[usize; 2]>> = els.iter().map(|v| {
    v.used_globals.borrow().iter()
      .filter_map(|name| index_of.get(name).copied())
      .collect()
  }).collect();

  let mut t = Tarjan {
    succs: &succs,
    index: vec![None; els.len()],
    lowlink: vec![0; els.len()],
    on_stack: BitSet::with_capacity(els.len()),
    stack: vec![],
    next: 0,
    comps: vec![],
  };
  for v in 0..els.len() {
    if t.index[v].is_none() { t.visit(v) }
  }

  t.comps.into_iter().map(|comp| {
    let scc = Rc::new(Scc {
      vars: comp.iter().map(|&i| els[i].clone()).collect(),
      state: Cell::new(TcState::Untouched),
    });
    for var in &scc.vars {
      *var.scc.borrow_mut() = Some(scc.clone())
    }
    scc
  }).collect()
}

struct Tarjan<'a> {
  succs: &'a [SmallVec<[usize; 2]>],
  index: Vec<Option<u32>>,
  lowlink: Vec<u32>,
  on_stack: BitSet,
  stack: Vec<usize>,
  next: u32,
  comps: Vec<Vec<usize>>,
}

impl Tarjan<'_> {
  fn visit(&mut self, v: usize) {
    self.index[v] = Some(self.next);
    self.lowlink[v] = self.next;
    self.next += 1;
    self.stack.push(v);
    self.on_stack.insert(v);
    let succs = self.succs;
    for &w in &succs[v] {
      if self.index[w].is_none() {
        self.visit(w);
        self.lowlink[v] = min(self.lowlink[v], self.lowlink[w])
      } else if self.on_stack.contains(w) {
        self.lowlink[v] = min(self.lowlink[v], self.index[w].expect("visited"))
      }
    }
    if Some(self.lowlink[v]) == self.index[v] {
      let mut comp = vec![];
      loop {
        let w = self.stack.pop().expect("scc stack underflow");
        self.on_stack.remove(w);
        comp.push(w);
        if w == v { break }
      }
      self.comps.push(comp)
    }
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::path::PathBuf;

  use super::*;
  use crate::symbol::intern;
  use crate::types::ast::Lit;
  use crate::types::entity::TopVar;
  use crate::types::ty::{MonoKind, Poly};

  fn dummy_var_with(name: &str, order: usize, used: &[&str], expr: Expanded) -> Rc<ElVar> {
    Rc::new(ElVar {
      name: intern(name),
      unique_name: intern(name),
      args: Args::NonFunc,
      ret_annot: None,
      expr,
      order,
      poly: RefCell::new(Poly::Mono(MonoKind::Unit.rc())),
      typed_expr: RefCell::new(None),
      used_globals: RefCell::new(used.iter().map(|s| intern(s)).collect()),
      scc: RefCell::new(None),
    })
  }

  fn dummy_var(name: &str, order: usize, used: &[&str]) -> Rc<ElVar> {
    dummy_var_with(name, order, used, Expanded::Lit(Lit::Unit))
  }

  fn module_of(vars: Vec<Rc<ElVar>>) -> Module {
    let mut m = Module::new(intern("Test"), PathBuf::from("test.el2"), None);
    for v in vars {
      m.glob_vars.insert(v.name, TopVar::El(v.clone()));
      m.ordered.push(TopVar::El(v));
    }
    m
  }

  #[test]
  fn mutual_recursion_lands_in_one_component() {
    let even = dummy_var("even", 0, &["odd"]);
    let odd = dummy_var("odd", 1, &["even"]);
    let main = dummy_var("main", 2, &["even"]);
    let m = module_of(vec![even.clone(), odd.clone(), main.clone()]);
    let comps = partition(&m);
    assert_eq!(comps.len(), 2);
    // callee component completes first
    assert_eq!(comps[0].vars.len(), 2);
    assert_eq!(comps[1].vars.len(), 1);
    assert_eq!(comps[1].vars[0].name, intern("main"));
    assert!(Rc::ptr_eq(&even.scc(), &odd.scc()));
    assert!(!Rc::ptr_eq(&even.scc(), &main.scc()));
  }

  #[test]
  fn self_recursion_is_its_own_component() {
    let f = dummy_var("f", 0, &["f"]);
    let m = module_of(vec![f.clone()]);
    let comps = partition(&m);
    assert_eq!(comps.len(), 1);
    assert_eq!(comps[0].vars.len(), 1);
  }

  #[test]
  fn shadowed_global_is_not_an_edge() {
    let g = dummy_var("g", 0, &[]);
    let user = dummy_var_with("user", 1, &[], Expanded::Let(
      intern("g"),
      Expanded::Lit(Lit::I64(1)).bx(),
      Expanded::local(intern("g")).bx(),
    ));
    let m = module_of(vec![g, user.clone()]);
    collect_used_globals(&m);
    assert!(user.used_globals.borrow().is_empty());
  }

  #[test]
  fn global_reference_is_collected() {
    let g = dummy_var("g", 0, &[]);
    let user = dummy_var_with("user", 1, &[], Expanded::Apply(
      Expanded::local(intern("g")).bx(),
      Expanded::Lit(Lit::Unit).bx(),
    ));
    let m = module_of(vec![g, user.clone()]);
    collect_used_globals(&m);
    assert_eq!(&user.used_globals.borrow()[..], &[intern("g")][..]);
  }
}
