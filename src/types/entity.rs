//! Processed top-level declarations and the per-module symbol tables.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use crate::Symbol;
use crate::types::ast::TypeExpr;
use crate::types::expanded::Expanded;
use crate::types::ty::{Mono, Poly, User};
use crate::types::typed::Typed;

/// A top-level binding.
#[derive(Debug, Clone)]
pub enum TopVar {
  El(Rc<ElVar>),
  Extern(Rc<ExternVar>),
  /// No C declaration is emitted; call sites use the external name bare.
  ImplicitExtern(Rc<ExternVar>),
}

#[derive(Debug)]
pub struct ExternVar {
  pub internal: Symbol,
  pub external: Symbol,
  pub ty: Mono,
}

/// Argument shape of a binding. The distinction is syntactic (presence of a
/// parameter list) and drives the value restriction: only `Func` bindings
/// generalize, `NonFunc` bindings weaken.
#[derive(Debug, Clone)]
pub enum Args {
  NonFunc,
  Func(Box<[(Symbol, Option<TypeExpr>)]>),
}

impl Args {
  #[must_use] pub fn is_func(&self) -> bool { matches!(self, Args::Func(_)) }
}

/// A user-written top-level binding of the current compilation.
///
/// The solver fields are interior-mutable so a shared handle can be updated
/// mid-typecheck: `poly` starts as a skeleton and is finalized by
/// generalization, `typed_expr` is filled when the binding's SCC reaches
/// [`TcState::Done`].
pub struct ElVar {
  pub name: Symbol,
  /// Compilation-unique name; the C identifier. Injectivity is checked
  /// before emission.
  pub unique_name: Symbol,
  pub args: Args,
  pub ret_annot: Option<TypeExpr>,
  /// Desugared right-hand side (the body, for a function).
  pub expr: Expanded,
  /// Index in the owning module's declaration order; the SCC node id.
  pub order: usize,
  pub poly: RefCell<Poly>,
  pub typed_expr: RefCell<Option<Rc<Typed>>>,
  /// Names of same-module globals referenced by `expr`.
  pub used_globals: RefCell<Box<[Symbol]>>,
  pub scc: RefCell<Option<Rc<Scc>>>,
}

// A recursive binding's typed body refers back to the binding itself, so
// the derived impl would not terminate.
impl fmt::Debug for ElVar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ElVar")
      .field("name", &self.name)
      .field("unique_name", &self.unique_name)
      .finish_non_exhaustive()
  }
}

impl ElVar {
  /// The SCC this var belongs to. Only valid after partitioning.
  #[must_use] pub fn scc(&self) -> Rc<Scc> {
    self.scc.borrow().clone().expect("SCC not assigned")
  }
}

/// Typechecking status of an SCC.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TcState {
  Untouched,
  /// Currently being checked; a reference back into the component sees the
  /// member's skeleton type (the mutual recursion case).
  InChecking,
  /// All members have closed polytypes and typed bodies.
  Done,
}

/// A strongly connected component of a module's global-reference graph; the
/// unit of let-generalization.
#[derive(Debug)]
pub struct Scc {
  pub vars: Vec<Rc<ElVar>>,
  pub state: Cell<TcState>,
}

pub type ModuleRef = Rc<RefCell<Module>>;

/// One `.el2` file's worth of declarations.
#[derive(Debug)]
pub struct Module {
  pub name: Symbol,
  pub filename: PathBuf,
  /// The module that loaded this one, if any.
  pub parent: Option<Symbol>,
  /// Modules loaded by this one, reachable by qualified paths.
  pub sub_modules: HashMap<Symbol, ModuleRef>,
  pub glob_vars: HashMap<Symbol, TopVar>,
  /// Declaration order, for SCC partitioning and deterministic emission.
  pub ordered: Vec<TopVar>,
  pub types: HashMap<Symbol, User>,
  pub variant_to_type: HashMap<Symbol, User>,
  pub field_to_type: HashMap<Symbol, User>,
  /// Opened modules, most recently opened first.
  pub opens: Vec<ModuleRef>,
  /// `true` while the module is being processed; re-entry is an import
  /// cycle.
  pub in_eval: bool,
}

impl Module {
  #[must_use] pub fn new(name: Symbol, filename: PathBuf, parent: Option<Symbol>) -> Module {
    Module {
      name, filename, parent,
      sub_modules: HashMap::new(),
      glob_vars: HashMap::new(),
      ordered: vec![],
      types: HashMap::new(),
      variant_to_type: HashMap::new(),
      field_to_type: HashMap::new(),
      opens: vec![],
      in_eval: false,
    }
  }

  /// The module's `El` vars in declaration order.
  pub fn el_vars(&self) -> impl Iterator<Item = &Rc<ElVar>> {
    self.ordered.iter().filter_map(|tv| match tv {
      TopVar::El(v) => Some(v),
      _ => None,
    })
  }
}
