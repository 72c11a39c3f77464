//! The module resolver: elaboration of toplevels into per-module symbol
//! tables, lazy `.el2` loading, and import cycle detection.
//!
//! Loading is strictly lazy: a file is parsed and type-checked the first
//! time something names it, whether through `open`, `open_file`, or a
//! qualified path whose head is an unseen module. The `in_eval` flag is set
//! for the whole duration of processing; re-entering a module whose flag is
//! still up is an import cycle and is fatal.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use if_chain::if_chain;

use crate::error::{CompileError, NameKind, Result};
use crate::expand::Expander;
use crate::symbol::{Symbol, intern};
use crate::types::ast::{Expr, Pattern, TopLevel, TypeDecl, TypeExpr};
use crate::types::entity::{Args, ElVar, ExternVar, Module, ModuleRef, TcState, TopVar};
use crate::types::expanded::Expanded;
use crate::types::ty::{InstUser, Mono, MonoKind, Poly, User, UserInfo, UserType, unbound_cell};
use crate::{Compiler, parser, scc};

/// `Foo_bar` for `foo_bar.el2`: leading character uppercased, extension
/// stripped.
pub(crate) fn module_name_of_file(file: &str) -> Result<Symbol> {
  check_file_name(file)?;
  let stem = &file[..file.len() - ".el2".len()];
  let mut name = String::with_capacity(stem.len());
  let mut chars = stem.chars();
  name.extend(chars.next().map(|c| c.to_ascii_uppercase()));
  name.push_str(chars.as_str());
  Ok(intern(&name))
}

fn file_name_of_module(name: Symbol) -> String {
  let s = name.as_str();
  let mut file = String::with_capacity(s.len() + 4);
  let mut chars = s.chars();
  file.extend(chars.next().map(|c| c.to_ascii_lowercase()));
  file.push_str(chars.as_str());
  file.push_str(".el2");
  file
}

/// File names must match `[a-z][a-z0-9_]*\.el2`.
fn check_file_name(file: &str) -> Result<()> {
  let bad = || CompileError::Name { kind: NameKind::Module, name: file.to_owned() };
  let stem = file.strip_suffix(".el2").ok_or_else(bad)?;
  let mut chars = stem.chars();
  if !chars.next().is_some_and(|c| c.is_ascii_lowercase()) { return Err(bad()) }
  if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
    return Err(bad())
  }
  Ok(())
}

impl Compiler {
  /// Process source text as the module `name`, registering it and running
  /// elaboration, SCC partitioning and typechecking.
  pub(crate) fn process_source(
    &mut self, name: Symbol, filename: PathBuf, parent: Option<Symbol>, text: &str,
  ) -> Result<ModuleRef> {
    let tops = parser::parse(text)?;
    let mref = Rc::new(RefCell::new(Module::new(name, filename, parent)));
    mref.borrow_mut().in_eval = true;
    self.modules.insert(name, mref.clone());
    self.process_module(&mref, &tops)?;
    mref.borrow_mut().in_eval = false;
    Ok(mref)
  }

  /// Load the module `name` from `<root_dir>/<name lowercased>.el2` unless
  /// it is already loaded. Re-entry while it is still in evaluation is an
  /// import cycle.
  pub(crate) fn load_module(&mut self, name: Symbol, loader: &ModuleRef) -> Result<ModuleRef> {
    if let Some(m) = self.modules.get(&name) {
      if m.borrow().in_eval {
        let offending = loader.borrow().filename
          .file_name().map_or_else(String::new, |f| f.to_string_lossy().into_owned());
        return Err(CompileError::ModuleCycle { from: name, offending })
      }
      return Ok(m.clone())
    }
    let file = file_name_of_module(name);
    check_file_name(&file)?;
    let path = self.root_dir.join(&file);
    let text = std::fs::read_to_string(&path)?;
    let from = loader.borrow().name;
    self.process_source(name, path, Some(from), &text)
  }

  fn process_module(&mut self, mref: &ModuleRef, tops: &[TopLevel]) -> Result<()> {
    let mut order = 0usize;
    for top in tops {
      match top {
        TopLevel::OpenFile(file) => {
          let name = module_name_of_file(file)?;
          let sub = self.load_module(name, mref)?;
          mref.borrow_mut().sub_modules.insert(name, sub);
        }
        TopLevel::Open(path) => {
          let m = self.resolve_module_path(mref, path)?;
          mref.borrow_mut().opens.insert(0, m);
        }
        TopLevel::LetType { name, ty_vars, decl } =>
          self.elab_type(mref, *name, ty_vars, decl)?,
        TopLevel::Extern { name, ty, external } =>
          self.elab_extern(mref, *name, ty, external, false)?,
        TopLevel::ImplicitExtern { name, ty, external } =>
          self.elab_extern(mref, *name, ty, external, true)?,
        TopLevel::LetFn { name, args, ret, body } =>
          self.elab_fn(mref, *name, args, ret.as_ref(), body, &mut order)?,
        TopLevel::Let { pat, expr } => {
          // `let f = fun x -> e` is a function binding in disguise
          if_chain! {
            if let Pattern::Var(name) = pat;
            if let Expr::Lambda(args, body) = expr;
            then {
              self.elab_fn(mref, *name, args, None, body, &mut order)?
            } else {
              self.elab_let(mref, pat, expr, &mut order)?
            }
          }
        }
      }
    }
    scc::collect_used_globals(&mref.borrow());
    let comps = scc::partition(&mref.borrow());
    for comp in &comps {
      if comp.state.get() == TcState::Untouched {
        self.check_scc(mref, comp)?
      }
    }
    Ok(())
  }

  // ------------------------------------------------------------ registration

  /// The compilation-unique name of a module-level binding: bare in the
  /// root module, `Module_name` elsewhere. Injectivity is enforced here,
  /// before anything is emitted.
  fn unique_global_name(&self, mref: &ModuleRef, name: Symbol) -> Result<Symbol> {
    let m = mref.borrow();
    let unique = if m.parent.is_none() {
      name
    } else {
      intern(&format!("{}_{name}", m.name))
    };
    let mut taken = self.unique_names.borrow_mut();
    if taken.insert(unique, m.name).is_some() {
      return Err(CompileError::Duplicate {
        kind: NameKind::Global, name: unique.to_string(),
      })
    }
    Ok(unique)
  }

  fn unique_type_name(&self, mref: &ModuleRef, name: Symbol) -> Result<Symbol> {
    let m = mref.borrow();
    let unique = if m.parent.is_none() {
      name
    } else {
      intern(&format!("{}_{name}", m.name))
    };
    let mut taken = self.unique_type_names.borrow_mut();
    if taken.insert(unique, m.name).is_some() {
      return Err(CompileError::Duplicate {
        kind: NameKind::Type, name: unique.to_string(),
      })
    }
    Ok(unique)
  }

  fn register_el(
    &self, mref: &ModuleRef, name: Symbol, args: Args,
    ret_annot: Option<TypeExpr>, expr: Expanded, order: &mut usize,
  ) -> Result<()> {
    let unique_name = self.unique_global_name(mref, name)?;
    let var = Rc::new(ElVar {
      name, unique_name, args, ret_annot, expr,
      order: *order,
      poly: RefCell::new(Poly::Mono(self.fresh_indir())),
      typed_expr: RefCell::new(None),
      used_globals: RefCell::new(Box::new([])),
      scc: RefCell::new(None),
    });
    *order += 1;
    let mut m = mref.borrow_mut();
    if m.glob_vars.insert(name, TopVar::El(var.clone())).is_some() {
      return Err(CompileError::Duplicate { kind: NameKind::Global, name: name.to_string() })
    }
    m.ordered.push(TopVar::El(var));
    Ok(())
  }

  fn elab_fn(
    &mut self, mref: &ModuleRef, name: Symbol,
    args: &[(Symbol, Option<TypeExpr>)], ret: Option<&TypeExpr>,
    body: &Expr, order: &mut usize,
  ) -> Result<()> {
    let expanded = Expander { comp: self }.expand(body)?;
    self.register_el(
      mref, name, Args::Func(args.into()), ret.cloned(), expanded, order,
    )
  }

  fn elab_let(
    &mut self, mref: &ModuleRef, pat: &Pattern, expr: &Expr, order: &mut usize,
  ) -> Result<()> {
    let expander = Expander { comp: self };
    let rhs = expander.expand(expr)?;
    let stack = expander.breakup_patterns(pat, rhs)?;
    for (name, e) in stack {
      self.register_el(mref, name, Args::NonFunc, None, e, order)?
    }
    Ok(())
  }

  fn elab_extern(
    &mut self, mref: &ModuleRef, name: Symbol, ty: &TypeExpr,
    external: &str, implicit: bool,
  ) -> Result<()> {
    let ty = self.resolve_type_expr(mref, &HashMap::new(), ty)?;
    let var = Rc::new(ExternVar { internal: name, external: intern(external), ty });
    let tv = if implicit { TopVar::ImplicitExtern(var) } else { TopVar::Extern(var) };
    let mut m = mref.borrow_mut();
    if m.glob_vars.insert(name, tv.clone()).is_some() {
      return Err(CompileError::Duplicate { kind: NameKind::Global, name: name.to_string() })
    }
    m.ordered.push(tv);
    Ok(())
  }

  fn elab_type(
    &mut self, mref: &ModuleRef, name: Symbol, ty_vars: &[Symbol], decl: &TypeDecl,
  ) -> Result<()> {
    if mref.borrow().types.contains_key(&name) {
      return Err(CompileError::Duplicate { kind: NameKind::Type, name: name.to_string() })
    }
    let repr_name = self.unique_type_name(mref, name)?;
    let user = Rc::new(UserType {
      name, repr_name,
      ty_vars: ty_vars.into(),
      info: RefCell::new(None),
    });
    // registered before the body is resolved, so the declaration can
    // reference itself
    mref.borrow_mut().types.insert(name, user.clone());
    let tvars: HashMap<Symbol, Mono> = ty_vars.iter()
      .map(|&v| (v, MonoKind::Var(v, unbound_cell()).rc()))
      .collect();
    if tvars.len() != ty_vars.len() {
      return Err(CompileError::Duplicate { kind: NameKind::Type, name: name.to_string() })
    }
    let info = match decl {
      TypeDecl::Alias(te) =>
        UserInfo::Alias(self.resolve_type_expr(mref, &tvars, te)?),
      TypeDecl::Struct(fields) => {
        let mut resolved = Vec::with_capacity(fields.len());
        for (f, te) in fields {
          let prev = mref.borrow_mut().field_to_type.insert(*f, user.clone());
          if prev.is_some() {
            return Err(CompileError::Duplicate { kind: NameKind::Field, name: f.to_string() })
          }
          resolved.push((*f, self.resolve_type_expr(mref, &tvars, te)?))
        }
        // construction and emission both want the declared order to be the
        // sorted one
        resolved.sort_by_key(|&(f, _)| f);
        UserInfo::Struct(resolved.into())
      }
      TypeDecl::Enum(variants) => {
        let mut resolved = Vec::with_capacity(variants.len());
        for (v, te) in variants {
          let prev = mref.borrow_mut().variant_to_type.insert(*v, user.clone());
          if prev.is_some() {
            return Err(CompileError::Duplicate { kind: NameKind::Variant, name: v.to_string() })
          }
          let payload = match te {
            Some(te) => Some(self.resolve_type_expr(mref, &tvars, te)?),
            None => None,
          };
          resolved.push((*v, payload))
        }
        UserInfo::Enum(resolved.into())
      }
    };
    *user.info.borrow_mut() = Some(info);
    Ok(())
  }

  // -------------------------------------------------------------- resolution

  /// Walk a qualified module path starting from `mref`: its own
  /// sub-modules, then the sub-modules of each opened module, then an
  /// on-demand file load.
  pub(crate) fn resolve_module_path(
    &mut self, mref: &ModuleRef, path: &[Symbol],
  ) -> Result<ModuleRef> {
    let (&head, rest) = path.split_first().expect("empty module path");
    let mut cur = self.resolve_module_head(mref, head)?;
    for &seg in rest {
      let next = cur.borrow().sub_modules.get(&seg).cloned();
      cur = next.ok_or_else(|| CompileError::Name {
        kind: NameKind::Module, name: seg.to_string(),
      })?
    }
    Ok(cur)
  }

  fn resolve_module_head(&mut self, mref: &ModuleRef, head: Symbol) -> Result<ModuleRef> {
    if let Some(m) = mref.borrow().sub_modules.get(&head) {
      return Ok(m.clone())
    }
    for open in mref.borrow().opens.iter() {
      if let Some(m) = open.borrow().sub_modules.get(&head) {
        return Ok(m.clone())
      }
    }
    let m = self.load_module(head, mref)?;
    mref.borrow_mut().sub_modules.insert(head, m.clone());
    Ok(m)
  }

  /// Resolve a possibly-qualified global name: current module first, then
  /// each opened module most-recently-opened-first.
  pub(crate) fn resolve_global(
    &mut self, mref: &ModuleRef, path: &[Symbol], name: Symbol,
  ) -> Result<Option<TopVar>> {
    if path.is_empty() {
      if let Some(tv) = mref.borrow().glob_vars.get(&name) {
        return Ok(Some(tv.clone()))
      }
      for open in mref.borrow().opens.iter() {
        if let Some(tv) = open.borrow().glob_vars.get(&name) {
          return Ok(Some(tv.clone()))
        }
      }
      return Ok(None)
    }
    let m = self.resolve_module_path(mref, path)?;
    let tv = m.borrow().glob_vars.get(&name).cloned();
    Ok(tv)
  }

  /// Resolve a variant name to its declaring enum.
  pub(crate) fn resolve_variant(
    &mut self, mref: &ModuleRef, path: &[Symbol], name: Symbol,
  ) -> Result<Option<User>> {
    if path.is_empty() {
      if let Some(u) = mref.borrow().variant_to_type.get(&name) {
        return Ok(Some(u.clone()))
      }
      for open in mref.borrow().opens.iter() {
        if let Some(u) = open.borrow().variant_to_type.get(&name) {
          return Ok(Some(u.clone()))
        }
      }
      return Ok(None)
    }
    let m = self.resolve_module_path(mref, path)?;
    let u = m.borrow().variant_to_type.get(&name).cloned();
    Ok(u)
  }

  /// Resolve a field name to the struct declaring it.
  pub(crate) fn resolve_field(&self, mref: &ModuleRef, name: Symbol) -> Option<User> {
    if let Some(u) = mref.borrow().field_to_type.get(&name) {
      return Some(u.clone())
    }
    for open in mref.borrow().opens.iter() {
      if let Some(u) = open.borrow().field_to_type.get(&name) {
        return Some(u.clone())
      }
    }
    None
  }

  /// Resolve a type name, in the same scope order as globals.
  pub(crate) fn resolve_user_type(
    &mut self, mref: &ModuleRef, path: &[Symbol], name: Symbol,
  ) -> Result<User> {
    let found = if path.is_empty() {
      let direct = mref.borrow().types.get(&name).cloned();
      direct.or_else(|| {
        mref.borrow().opens.iter()
          .find_map(|open| open.borrow().types.get(&name).cloned())
      })
    } else {
      let m = self.resolve_module_path(mref, path)?;
      let u = m.borrow().types.get(&name).cloned();
      u
    };
    found.ok_or_else(|| CompileError::Name { kind: NameKind::Type, name: name.to_string() })
  }

  /// Elaborate a surface type expression into a monotype. `tvars` supplies
  /// the type variables in scope (a type declaration's parameters).
  pub(crate) fn resolve_type_expr(
    &mut self, mref: &ModuleRef, tvars: &HashMap<Symbol, Mono>, te: &TypeExpr,
  ) -> Result<Mono> {
    Ok(match te {
      TypeExpr::Unit => MonoKind::Unit.rc(),
      TypeExpr::Pointer(t) =>
        MonoKind::Pointer(self.resolve_type_expr(mref, tvars, t)?).rc(),
      TypeExpr::Opaque(t) =>
        MonoKind::Opaque(self.resolve_type_expr(mref, tvars, t)?).rc(),
      TypeExpr::Tuple(ts) => MonoKind::Tuple(
        ts.iter().map(|t| self.resolve_type_expr(mref, tvars, t))
          .collect::<Result<_>>()?,
      ).rc(),
      TypeExpr::Func(a, r) => MonoKind::Func(
        self.resolve_type_expr(mref, tvars, a)?,
        self.resolve_type_expr(mref, tvars, r)?,
      ).rc(),
      TypeExpr::Name { path, name, args } => {
        if path.is_empty() {
          if let Some(v) = tvars.get(name) {
            if !args.is_empty() {
              return Err(CompileError::Arity { name: *name, expected: 0, got: args.len() })
            }
            return Ok(v.clone())
          }
          let base = match name.as_str() {
            "i64" => Some(MonoKind::I64),
            "c_int" => Some(MonoKind::CInt),
            "f64" => Some(MonoKind::F64),
            "bool" => Some(MonoKind::Bool),
            "char" => Some(MonoKind::Char),
            _ => None,
          };
          if let Some(base) = base {
            if !args.is_empty() {
              return Err(CompileError::Arity { name: *name, expected: 0, got: args.len() })
            }
            return Ok(base.rc())
          }
        }
        let user = self.resolve_user_type(mref, path, *name)?;
        if user.ty_vars.len() != args.len() {
          return Err(CompileError::Arity {
            name: *name, expected: user.ty_vars.len(), got: args.len(),
          })
        }
        let monos = args.iter()
          .map(|t| self.resolve_type_expr(mref, tvars, t))
          .collect::<Result<_>>()?;
        MonoKind::User(InstUser::new(user, monos)).rc()
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  #[test]
  fn module_names_derive_from_file_names() {
    assert_eq!(module_name_of_file("foo.el2").expect("valid"), intern("Foo"));
    assert_eq!(module_name_of_file("a_b2.el2").expect("valid"), intern("A_b2"));
    assert!(module_name_of_file("Foo.el2").is_err());
    assert!(module_name_of_file("foo.el").is_err());
    assert!(module_name_of_file("9foo.el2").is_err());
    assert_eq!(file_name_of_module(intern("A_b2")), "a_b2.el2");
  }

  #[test]
  fn lazy_load_of_qualified_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("util.el2"), "let one() : i64 = 1\n").expect("write");
    fs::write(
      dir.path().join("main.el2"),
      "let main() : i64 = Util.one()\n",
    ).expect("write");
    let mut comp = Compiler::new(dir.path());
    comp.compile_file(&dir.path().join("main.el2")).expect("compile");
    assert!(comp.modules.contains_key(&intern("Util")));
  }

  #[test]
  fn import_cycle_is_detected() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("a.el2"), "open_file \"b.el2\"\nlet x = 1\n").expect("write");
    fs::write(dir.path().join("b.el2"), "open_file \"a.el2\"\nlet y = 1\n").expect("write");
    let mut comp = Compiler::new(dir.path());
    let err = comp.compile_file(&dir.path().join("a.el2")).expect_err("cycle");
    match err {
      CompileError::ModuleCycle { from, offending } => {
        assert_eq!(from, intern("A"));
        assert_eq!(offending, "b.el2");
      }
      e => panic!("expected a module cycle, got {e}"),
    }
  }

  #[test]
  fn open_brings_names_into_scope() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("util.el2"), "let two() : i64 = 2\n").expect("write");
    fs::write(
      dir.path().join("main.el2"),
      "open Util\nlet main() : i64 = two()\n",
    ).expect("write");
    let mut comp = Compiler::new(dir.path());
    comp.compile_file(&dir.path().join("main.el2")).expect("compile");
  }

  #[test]
  fn duplicate_toplevel_is_rejected() {
    let mut comp = Compiler::new(".");
    let err = comp
      .compile_source("main", "let x = 1\nlet x = 2\n")
      .expect_err("duplicate");
    assert!(matches!(err, CompileError::Duplicate { kind: NameKind::Global, .. }));
  }
}
