//! A compiler for evanlang2, an ML-family language with C-style low-level
//! primitives, emitting a single portable C translation unit.
//!
//! The pipeline: the parser delivers a surface AST per `.el2` file; the
//! expander desugars patterns into single-variable bindings and boolean
//! guards; the module resolver builds per-module symbol tables, loading
//! files lazily and rejecting import cycles; Tarjan's algorithm groups
//! mutually recursive top-levels into SCCs; Hindley-Milner inference with
//! destructive unification checks each SCC, generalizing function bindings
//! and weakening the rest; and the emitter walks the reachable typed
//! bindings, monomorphizing every generic definition it crosses.

pub mod codegen;
pub mod error;
pub mod expand;
pub mod infer;
pub mod lexer;
pub mod modules;
pub mod parser;
pub mod scc;
pub mod symbol;
pub mod types;
pub mod unify;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use error::{CompileError, Result};
pub use symbol::{Symbol, intern};

use types::entity::ModuleRef;
use types::ty::{Mono, MonoKind, unbound_cell};

/// The compilation state: loaded modules plus the fresh-name and
/// fresh-unknown supplies shared by every pass.
pub struct Compiler {
  /// Directory searched for `.el2` files.
  pub root_dir: PathBuf,
  /// Every loaded module, by module name.
  pub modules: HashMap<Symbol, ModuleRef>,
  next_indir: Cell<u32>,
  next_gen: Cell<u32>,
  /// C-name registries; collisions are fatal before emission.
  unique_names: RefCell<HashMap<Symbol, Symbol>>,
  unique_type_names: RefCell<HashMap<Symbol, Symbol>>,
}

impl Compiler {
  #[must_use] pub fn new(root_dir: impl Into<PathBuf>) -> Compiler {
    Compiler {
      root_dir: root_dir.into(),
      modules: HashMap::new(),
      next_indir: Cell::new(0),
      next_gen: Cell::new(0),
      unique_names: RefCell::new(HashMap::new()),
      unique_type_names: RefCell::new(HashMap::new()),
    }
  }

  /// A fresh unknown monotype.
  pub(crate) fn fresh_indir(&self) -> Mono {
    let id = self.next_indir.get();
    self.next_indir.set(id + 1);
    MonoKind::Indir(id, unbound_cell()).rc()
  }

  /// A fresh name for a desugaring temporary. The `__` prefix keeps the
  /// name a valid C identifier.
  pub(crate) fn gensym(&self, base: &str) -> Symbol {
    let n = self.next_gen.get();
    self.next_gen.set(n + 1);
    intern(&format!("__{base}{n}"))
  }

  /// Compile the program rooted at `path`, returning the C translation
  /// unit. Sibling files of `path` are loadable as modules.
  pub fn compile_file(&mut self, path: &Path) -> Result<String> {
    let file = path.file_name().and_then(|f| f.to_str()).ok_or_else(|| {
      CompileError::Name {
        kind: error::NameKind::Module,
        name: path.display().to_string(),
      }
    })?;
    let name = modules::module_name_of_file(file)?;
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        self.root_dir = parent.to_owned()
      }
    }
    let text = std::fs::read_to_string(path)?;
    let mref = self.process_source(name, path.to_owned(), None, &text)?;
    codegen::emit_program(self, &mref)
  }

  /// Compile in-memory source text as the root module `<stem>.el2`.
  pub fn compile_source(&mut self, stem: &str, text: &str) -> Result<String> {
    let file = format!("{stem}.el2");
    let name = modules::module_name_of_file(&file)?;
    let mref = self.process_source(name, PathBuf::from(file), None, text)?;
    codegen::emit_program(self, &mref)
  }
}
