//! The translation pass from typed bindings to a single C translation
//! unit, monomorphizing every reachable generic definition.
//!
//! Emission walks the monomorphic top-levels and externs of every loaded
//! module; a polymorphic binding is only ever emitted as the ground
//! instantiations reached from those roots. Each (binding, instantiation)
//! pair, user type instantiation, tuple type and function pointer type is
//! cached by its mangled C name, so everything is emitted at most once.
//!
//! Output order on the sink: prelude, type forward declarations, type
//! definitions, value/function declarations, value/function definitions.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::rc::Rc;

use itertools::Itertools;
use smallvec::SmallVec;

use crate::Compiler;
use crate::error::{CompileError, NameKind, Result};
use crate::symbol::Symbol;
use crate::types::ast::{Lit, Unop};
use crate::types::entity::{Args, ElVar, ExternVar, ModuleRef, TopVar};
use crate::types::ty::{CellState, Mono, MonoKind, UserInfo, inner_mono, subst_ty_vars};
use crate::types::typed::{Typed, TypedKind};

const PRELUDE: &str = "\
#include <stdint.h>\n\
#include <stdbool.h>\n\
#include <stdlib.h>\n\
#include <string.h>\n\
#include <assert.h>\n\
#include <stdio.h>\n\
\n\
typedef uint8_t el2_unit;\n";

/// Emit the whole program for `root` and every module it pulled in.
pub(crate) fn emit_program(comp: &Compiler, root: &ModuleRef) -> Result<String> {
  let mut em = Emitter {
    fwd: String::new(),
    types: String::new(),
    decls: String::new(),
    defs: String::new(),
    init_body: String::new(),
    emitted: HashSet::new(),
    emitted_types: HashSet::new(),
    emitted_externs: HashSet::new(),
  };

  // root first, the rest in name order, for a deterministic unit
  let mut mods: Vec<ModuleRef> = vec![root.clone()];
  let mut rest: Vec<ModuleRef> = comp.modules.values()
    .filter(|m| !Rc::ptr_eq(m, root))
    .cloned().collect();
  rest.sort_by_key(|m| m.borrow().name);
  mods.extend(rest);

  let mut worklist: SmallVec<[TopVar; 8]> = SmallVec::new();
  for m in &mods {
    worklist.extend(m.borrow().ordered.iter().cloned())
  }
  for tv in worklist {
    match tv {
      TopVar::El(var) => {
        if var.poly.borrow().is_mono() {
          em.binding(&var, &[])?;
        }
      }
      TopVar::Extern(v) => em.extern_decl(&v)?,
      TopVar::ImplicitExtern(_) => {}
    }
  }

  let mut out = String::from(PRELUDE);
  out.push('\n');
  out.push_str(&em.fwd);
  out.push('\n');
  out.push_str(&em.types);
  out.push('\n');
  out.push_str(&em.decls);
  out.push_str("static void _el2_init(void);\n\n");
  out.push_str(&em.defs);
  out.push_str("static void _el2_init(void) {\n");
  out.push_str(&em.init_body);
  out.push_str("}\n");
  Ok(out)
}

type Subst = HashMap<Symbol, Mono>;

struct Emitter {
  fwd: String,
  types: String,
  decls: String,
  defs: String,
  init_body: String,
  /// (binding, instantiation) pairs already emitted, by C identifier.
  emitted: HashSet<String>,
  emitted_types: HashSet<String>,
  emitted_externs: HashSet<Symbol>,
}

/// Per-function emission state: the statement buffer, local renamings, and
/// the enclosing-loop stack for `break`.
struct FnCtx {
  body: String,
  indent: usize,
  renames: HashMap<Symbol, String>,
  used_names: HashSet<String>,
  next_tmp: u32,
  /// One entry per enclosing loop: the break destination, if non-unit.
  loops: Vec<Option<String>>,
  /// In the global initializer locals are `static`, so a `&` taken of a
  /// temporary stays valid after the initializer returns.
  static_locals: bool,
}

impl FnCtx {
  fn new() -> FnCtx {
    FnCtx {
      body: String::new(),
      indent: 1,
      renames: HashMap::new(),
      used_names: HashSet::new(),
      next_tmp: 0,
      loops: vec![],
      static_locals: false,
    }
  }

  fn stmt(&mut self, s: &str) {
    for _ in 0..self.indent { self.body.push_str("  ") }
    self.body.push_str(s);
    self.body.push('\n');
  }

  /// Declare a local, splitting declaration from assignment when locals
  /// are `static` (block-scope statics need constant initializers).
  fn declare(&mut self, cty: &str, name: &str, init: Option<&str>) {
    if self.static_locals {
      self.stmt(&format!("static {cty} {name};"));
      if let Some(v) = init {
        self.stmt(&format!("{name} = {v};"))
      }
    } else {
      match init {
        Some(v) => self.stmt(&format!("{cty} {name} = {v};")),
        None => self.stmt(&format!("{cty} {name};")),
      }
    }
  }

  /// A function-unique C name based on `base`.
  fn alloc_name(&mut self, base: &str) -> String {
    let base = fix_ident(base);
    let mut name = base.clone();
    let mut n = 1;
    while !self.used_names.insert(name.clone()) {
      n += 1;
      name = format!("{base}_{n}")
    }
    name
  }

  fn fresh_tmp(&mut self) -> String {
    let n = self.next_tmp;
    self.next_tmp += 1;
    self.alloc_name(&format!("_t{n}"))
  }
}

/// Make an identifier C-safe: desugaring temporaries are already `__`
/// prefixed, but user names can collide with C keywords.
fn fix_ident(name: &str) -> String {
  const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do",
    "double", "else", "enum", "extern", "float", "for", "goto", "if",
    "inline", "int", "long", "register", "restrict", "return", "short",
    "signed", "sizeof", "static", "struct", "switch", "typedef", "union",
    "unsigned", "void", "volatile", "while",
  ];
  if C_KEYWORDS.contains(&name) {
    format!("{name}_")
  } else {
    name.to_owned()
  }
}

/// Follow cells to the representative; a still-unbound unknown in emitted
/// code defaults to `unit`.
fn resolve_node(m: &Mono) -> Mono {
  let m = inner_mono(m);
  match &*m {
    MonoKind::Var(_, cell) | MonoKind::Indir(_, cell) => {
      let unit = MonoKind::Unit.rc();
      *cell.borrow_mut() = CellState::Bound(unit.clone());
      unit
    }
    _ => m,
  }
}

fn is_unit(m: &Mono) -> bool {
  matches!(&*resolve_node(m), MonoKind::Unit)
}

/// The mangled name of a ground monotype, used in C identifiers.
fn mono_name(m: &Mono) -> String {
  match &*resolve_node(m) {
    MonoKind::Unit => "Unit".into(),
    MonoKind::I64 => "I64".into(),
    MonoKind::CInt => "C_int".into(),
    MonoKind::F64 => "F64".into(),
    MonoKind::Bool => "Bool".into(),
    MonoKind::Char => "Char".into(),
    MonoKind::Pointer(t) => format!("Ptr_{}", mono_name(t)),
    MonoKind::Opaque(t) => format!("Opaque_{}", mono_name(t)),
    MonoKind::Tuple(ts) =>
      format!("Tup{}_{}", ts.len(), ts.iter().map(mono_name).format("_")),
    MonoKind::Func(a, r) => format!("Fn_{}_{}", mono_name(a), mono_name(r)),
    MonoKind::User(iu) => {
      if iu.monos.is_empty() {
        iu.user.repr_name.to_string()
      } else {
        format!("{}_{}", iu.user.repr_name, iu.monos.iter().map(mono_name).format("_"))
      }
    }
    MonoKind::Var(..) | MonoKind::Indir(..) => unreachable!("resolved"),
  }
}

impl Emitter {
  // ------------------------------------------------------------------- types

  /// The C type of a ground monotype at value position, emitting any
  /// needed definitions on demand.
  fn ctype(&mut self, m: &Mono) -> Result<String> {
    let m = resolve_node(m);
    Ok(match &*m {
      MonoKind::Unit => "el2_unit".into(),
      MonoKind::I64 => "int64_t".into(),
      MonoKind::CInt => "int".into(),
      MonoKind::F64 => "double".into(),
      MonoKind::Bool => "bool".into(),
      MonoKind::Char => "char".into(),
      MonoKind::Pointer(t) => format!("{}*", self.ctype(t)?),
      MonoKind::Opaque(t) => self.ctype(t)?,
      MonoKind::Tuple(ts) => {
        let name = mono_name(&m);
        self.ensure_tuple(&name, ts)?;
        format!("struct {name}")
      }
      MonoKind::Func(a, r) => {
        let name = mono_name(&m);
        self.ensure_fnptr(&name, a, r)?;
        name
      }
      MonoKind::User(iu) => {
        if let Some(UserInfo::Alias(_)) = &*iu.user.info.borrow() {
          let exp = crate::types::ty::user_type_monify(iu).expect("alias");
          return self.ctype(&exp)
        }
        let name = mono_name(&m);
        self.ensure_user(&name, &m)?;
        format!("struct {name}")
      }
      MonoKind::Var(..) | MonoKind::Indir(..) => unreachable!("resolved"),
    })
  }

  fn ensure_tuple(&mut self, name: &str, ts: &[Mono]) -> Result<()> {
    if !self.emitted_types.insert(name.to_owned()) { return Ok(()) }
    let _ = writeln!(self.fwd, "struct {name};");
    let mut body = format!("struct {name} {{\n");
    for (i, t) in ts.iter().enumerate() {
      let _ = writeln!(body, "  {} _{i};", self.ctype(t)?);
    }
    body.push_str("};\n");
    self.types.push_str(&body);
    Ok(())
  }

  fn ensure_fnptr(&mut self, name: &str, dom: &Mono, ret: &Mono) -> Result<()> {
    if !self.emitted_types.insert(name.to_owned()) { return Ok(()) }
    let params = self.param_types(dom)?;
    let ret_c = self.ctype_ret(ret)?;
    let params = if params.is_empty() {
      "void".to_owned()
    } else {
      params.into_iter().format(", ").to_string()
    };
    let _ = writeln!(self.types, "typedef {ret_c} (*{name})({params});");
    Ok(())
  }

  /// Tagged-union lowering of a struct or enum instantiation.
  fn ensure_user(&mut self, name: &str, m: &Mono) -> Result<()> {
    if !self.emitted_types.insert(name.to_owned()) { return Ok(()) }
    let MonoKind::User(iu) = &**m else { unreachable!("user type") };
    let subst = iu.subst_map();
    let _ = writeln!(self.fwd, "struct {name};");
    let info = iu.user.info.borrow();
    match info.as_ref().expect("info set during elaboration") {
      UserInfo::Struct(fields) => {
        let mut body = format!("struct {name} {{\n");
        for (f, fty) in fields {
          let fty = subst_ty_vars(fty, &subst);
          let _ = writeln!(body, "  {} {f};", self.ctype(&fty)?);
        }
        body.push_str("};\n");
        self.types.push_str(&body)
      }
      UserInfo::Enum(variants) => {
        let tags = variants.iter()
          .map(|(v, _)| format!("{}_{}_TAG", name.to_uppercase(), v.as_str().to_uppercase()))
          .format(", ");
        let mut body = format!("enum {name}_tag {{ {tags} }};\n");
        let _ = write!(body, "struct {name} {{\n  enum {name}_tag tag;\n");
        let mut union_body = String::new();
        for (v, payload) in variants {
          if let Some(pty) = payload {
            let pty = subst_ty_vars(pty, &subst);
            let _ = writeln!(union_body, "    {} {v};", self.ctype(&pty)?);
          }
        }
        if !union_body.is_empty() {
          let _ = write!(body, "  union {{\n{union_body}  }} data;\n");
        }
        body.push_str("};\n");
        self.types.push_str(&body)
      }
      UserInfo::Alias(_) => unreachable!("aliases expand in ctype"),
    }
    Ok(())
  }

  /// C parameter types for a function domain, unit parameters dropped.
  fn param_types(&mut self, dom: &Mono) -> Result<Vec<String>> {
    let mut out = vec![];
    match &*resolve_node(dom) {
      MonoKind::Unit => {}
      MonoKind::Tuple(ts) => for t in ts {
        if !is_unit(t) { out.push(self.ctype(t)?) }
      },
      _ => out.push(self.ctype(dom)?),
    }
    Ok(out)
  }

  fn ctype_ret(&mut self, ret: &Mono) -> Result<String> {
    if is_unit(ret) { Ok("void".into()) } else { self.ctype(ret) }
  }

  // ---------------------------------------------------------------- bindings

  fn tag_of(&mut self, enum_ty: &Mono, variant: Symbol) -> Result<String> {
    // the enum type must be materialized before its tags are referenced
    self.ctype(enum_ty)?;
    Ok(format!(
      "{}_{}_TAG",
      mono_name(enum_ty).to_uppercase(),
      variant.as_str().to_uppercase(),
    ))
  }

  fn extern_decl(&mut self, v: &Rc<ExternVar>) -> Result<()> {
    if !self.emitted_externs.insert(v.external) { return Ok(()) }
    let ty = resolve_node(&v.ty);
    match &*ty {
      MonoKind::Func(dom, ret) => {
        let params = self.param_types(dom)?;
        let ret_c = self.ctype_ret(ret)?;
        let params = if params.is_empty() {
          "void".to_owned()
        } else {
          params.into_iter().format(", ").to_string()
        };
        let _ = writeln!(self.decls, "extern {ret_c} {}({params});", v.external);
      }
      _ => {
        let cty = self.ctype(&ty)?;
        let _ = writeln!(self.decls, "extern {cty} {};", v.external);
      }
    }
    Ok(())
  }

  /// Emit one (binding, instantiation) pair, returning its C identifier.
  /// The instantiation monos must be ground.
  fn binding(&mut self, var: &Rc<ElVar>, inst: &[(Symbol, Mono)]) -> Result<String> {
    let stem = fix_ident(var.unique_name.as_str());
    let cname = if inst.is_empty() {
      stem
    } else {
      format!("{stem}_inst_{}", inst.iter().map(|(_, m)| mono_name(m)).format("_"))
    };
    if !self.emitted.insert(cname.clone()) { return Ok(cname) }

    let subst: Subst = inst.iter().cloned().collect();
    let typed = var.typed_expr.borrow().clone().ok_or_else(|| {
      CompileError::Name { kind: NameKind::Global, name: var.name.to_string() }
    })?;
    let skel = subst_ty_vars(var.poly.borrow().skeleton(), &subst);

    match &var.args {
      Args::Func(args) => {
        let fn_ty = resolve_node(&skel);
        let MonoKind::Func(dom, ret) = &*fn_ty else {
          unreachable!("function binding at non-function type")
        };
        let arg_tys: Vec<Mono> = match (args.len(), &*resolve_node(dom)) {
          (0, _) => vec![],
          (1, _) => vec![dom.clone()],
          (_, MonoKind::Tuple(ts)) => ts.to_vec(),
          _ => unreachable!("domain shape matches arity"),
        };

        let mut f = FnCtx::new();
        let mut params = vec![];
        for ((a, _), ty) in args.iter().zip(&arg_tys) {
          if is_unit(ty) {
            // dropped from the signature; references read as the unit value
            f.renames.insert(*a, "0".into());
          } else {
            let name = f.alloc_name(a.as_str());
            params.push(format!("{} {name}", self.ctype(ty)?));
            f.renames.insert(*a, name);
          }
        }
        let ret_c = self.ctype_ret(ret)?;
        let params = if params.is_empty() {
          "void".to_owned()
        } else {
          params.into_iter().format(", ").to_string()
        };
        let linkage = if cname == "main" { "" } else { "static " };
        let _ = writeln!(self.decls, "{linkage}{ret_c} {cname}({params});");

        if cname == "main" {
          f.stmt("_el2_init();")
        }
        let val = self.expr(&mut f, &subst, &typed)?;
        if is_unit(ret) {
          self.discard(&mut f, &val)
        } else {
          f.stmt(&format!("return {val};"))
        }
        let _ = write!(self.defs, "{linkage}{ret_c} {cname}({params}) {{\n{}}}\n\n", f.body);
      }
      Args::NonFunc => {
        let cty = self.ctype(&skel)?;
        let _ = writeln!(self.decls, "static {cty} {cname};");
        // the assignment goes into the global initializer; a block keeps
        // this binding's temporaries out of its neighbors' way
        let mut f = FnCtx::new();
        f.static_locals = true;
        let val = self.expr(&mut f, &subst, &typed)?;
        f.stmt(&format!("{cname} = {val};"));
        let _ = write!(self.init_body, "  {{\n{}  }}\n", indent_block(&f.body));
      }
    }
    Ok(cname)
  }

  // ------------------------------------------------------------- expressions

  /// Emit an expression into `f`'s statement buffer and return a C rvalue
  /// for its result. Unit-typed expressions yield the rvalue `0` (of type
  /// `el2_unit`).
  fn expr(&mut self, f: &mut FnCtx, subst: &Subst, t: &Typed) -> Result<String> {
    let ty = subst_ty_vars(&t.ty, subst);
    Ok(match &t.kind {
      TypedKind::Lit(l) => match l {
        Lit::I64(n) => format!("INT64_C({n})"),
        Lit::CInt(n) => n.to_string(),
        Lit::F64(x) => format!("{x:?}"),
        Lit::Bool(b) => b.to_string(),
        Lit::Char(c) => format!("'{}'", escape_char(*c)),
        // interpolated without escaping
        Lit::Str(s) => format!("\"{s}\""),
        Lit::Unit => "0".into(),
      },

      TypedKind::Local(n) =>
        f.renames.get(n).cloned().expect("local bound before use"),

      TypedKind::Glob(tv, inst) => match tv {
        TopVar::El(var) => {
          let ground: Vec<(Symbol, Mono)> = inst.as_deref().unwrap_or(&[]).iter()
            .map(|(n, m)| (*n, subst_ty_vars(m, subst)))
            .collect();
          self.binding(var, &ground)?
        }
        TopVar::Extern(v) => {
          self.extern_decl(v)?;
          v.external.to_string()
        }
        TopVar::ImplicitExtern(v) => v.external.to_string(),
      },

      TypedKind::Tuple(es) => {
        let cty = self.ctype(&ty)?;
        let vals = es.iter().map(|e| self.expr(f, subst, e)).collect::<Result<Vec<_>>>()?;
        let fields = vals.iter().enumerate()
          .map(|(i, v)| format!("._{i} = {v}"))
          .format(", ");
        format!("(({cty}){{ {fields} }})")
      }

      TypedKind::Apply(fun, arg) => {
        let callee = self.expr(f, subst, fun)?;
        let args = self.call_args(f, subst, arg)?;
        let call = format!("{callee}({})", args.into_iter().format(", "));
        if is_unit(&ty) {
          f.stmt(&format!("{call};"));
          "0".into()
        } else {
          call
        }
      }

      TypedKind::Let(n, rhs, body) => {
        let val = self.expr(f, subst, rhs)?;
        let rty = subst_ty_vars(&rhs.ty, subst);
        let saved = f.renames.get(n).cloned();
        if is_unit(&rty) {
          self.discard(f, &val);
          f.renames.insert(*n, "0".into());
        } else {
          let name = f.alloc_name(n.as_str());
          let cty = self.ctype(&rty)?;
          f.declare(&cty, &name, Some(&val));
          f.renames.insert(*n, name);
        }
        let out = self.expr(f, subst, body)?;
        restore(f, *n, saved);
        out
      }

      TypedKind::Seq(a, b) => {
        let va = self.expr(f, subst, a)?;
        self.discard(f, &va);
        self.expr(f, subst, b)?
      }

      TypedKind::If(c, th, el) => {
        let vc = self.expr(f, subst, c)?;
        if is_unit(&ty) {
          f.stmt(&format!("if ({vc}) {{"));
          self.branch(f, subst, th, None)?;
          f.stmt("} else {");
          self.branch(f, subst, el, None)?;
          f.stmt("}");
          "0".into()
        } else {
          let tmp = f.fresh_tmp();
          let cty = self.ctype(&ty)?;
          f.declare(&cty, &tmp, None);
          f.stmt(&format!("if ({vc}) {{"));
          self.branch(f, subst, th, Some(&tmp))?;
          f.stmt("} else {");
          self.branch(f, subst, el, Some(&tmp))?;
          f.stmt("}");
          tmp
        }
      }

      TypedKind::Match(scrut, arms) => {
        let vs = self.expr(f, subst, scrut)?;
        debug_assert!(vs.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        let dest = if is_unit(&ty) {
          None
        } else {
          let tmp = f.fresh_tmp();
          let cty = self.ctype(&ty)?;
          f.declare(&cty, &tmp, None);
          Some(tmp)
        };
        self.match_arms(f, subst, arms, dest.as_deref())?;
        dest.unwrap_or_else(|| "0".into())
      }

      TypedKind::Binop(op, a, b) => {
        let va = self.expr(f, subst, a)?;
        let vb = self.expr(f, subst, b)?;
        format!("({va} {} {vb})", op.c_token())
      }

      TypedKind::Unop(op, a) => {
        let va = self.expr(f, subst, a)?;
        match op {
          Unop::Neg => format!("(-{va})"),
          Unop::Not => format!("(!{va})"),
        }
      }

      TypedKind::Assign(lhs, rhs) => {
        let lty = subst_ty_vars(&lhs.ty, subst);
        let vl = self.expr(f, subst, lhs)?;
        let vr = self.expr(f, subst, rhs)?;
        if is_unit(&lty) {
          self.discard(f, &vr)
        } else {
          f.stmt(&format!("{vl} = {vr};"))
        }
        "0".into()
      }

      TypedKind::Struct(_, fields) => {
        let cty = self.ctype(&ty)?;
        let vals = fields.iter()
          .map(|(name, e)| Ok((*name, self.expr(f, subst, e)?)))
          .collect::<Result<Vec<_>>>()?;
        let init = vals.iter()
          .map(|(name, v)| format!(".{name} = {v}"))
          .format(", ");
        format!("(({cty}){{ {init} }})")
      }

      TypedKind::FieldAccess(e, field) => {
        let v = self.expr(f, subst, e)?;
        format!("({v}).{field}")
      }

      TypedKind::TupleAccess(e, i) => {
        let v = self.expr(f, subst, e)?;
        format!("({v})._{i}")
      }

      TypedKind::Enum(variant, payload) => {
        let cty = self.ctype(&ty)?;
        let tag = self.tag_of(&ty, *variant)?;
        match payload {
          Some(p) => {
            let vp = self.expr(f, subst, p)?;
            format!("(({cty}){{ .tag = {tag}, .data.{variant} = {vp} }})")
          }
          None => format!("(({cty}){{ .tag = {tag} }})"),
        }
      }

      TypedKind::CheckVariant(variant, e) => {
        let ety = subst_ty_vars(&e.ty, subst);
        let tag = self.tag_of(&ety, *variant)?;
        let v = self.expr(f, subst, e)?;
        format!("(({v}).tag == {tag})")
      }

      TypedKind::AccessEnumField(variant, e) => {
        let v = self.expr(f, subst, e)?;
        format!("(({v}).data.{variant})")
      }

      TypedKind::Ref(e) => {
        let v = self.expr(f, subst, e)?;
        if is_c_place(e) {
          format!("(&{v})")
        } else {
          let ety = subst_ty_vars(&e.ty, subst);
          let cty = self.ctype(&ety)?;
          let tmp = f.fresh_tmp();
          f.declare(&cty, &tmp, Some(&v));
          format!("(&{tmp})")
        }
      }

      TypedKind::Deref(e) => {
        let v = self.expr(f, subst, e)?;
        format!("(*{v})")
      }

      TypedKind::Sizeof(m) => {
        let m = subst_ty_vars(m, subst);
        format!("((int64_t)sizeof({}))", self.ctype(&m)?)
      }

      TypedKind::Loop(body) => {
        let dest = if is_unit(&ty) {
          None
        } else {
          let tmp = f.fresh_tmp();
          let cty = self.ctype(&ty)?;
          f.declare(&cty, &tmp, None);
          Some(tmp)
        };
        f.loops.push(dest.clone());
        f.stmt("for (;;) {");
        self.branch(f, subst, body, None)?;
        f.stmt("}");
        f.loops.pop();
        dest.unwrap_or_else(|| "0".into())
      }

      TypedKind::Break(e) => {
        let v = self.expr(f, subst, e)?;
        match f.loops.last().cloned().expect("break inside a loop") {
          Some(tmp) => f.stmt(&format!("{tmp} = {v};")),
          None => self.discard(f, &v),
        }
        f.stmt("break;");
        "0".into()
      }

      TypedKind::Return(e) => {
        let ety = subst_ty_vars(&e.ty, subst);
        let v = self.expr(f, subst, e)?;
        if is_unit(&ety) {
          self.discard(f, &v);
          f.stmt("return;")
        } else {
          f.stmt(&format!("return {v};"))
        }
        "0".into()
      }

      TypedKind::Assert(e) => {
        let v = self.expr(f, subst, e)?;
        f.stmt(&format!("assert({v});"));
        "0".into()
      }
    })
  }

  /// Emit a statement discarding a value, keeping any effects it carries.
  fn discard(&mut self, f: &mut FnCtx, val: &str) {
    if val != "0" && !val.is_empty() {
      f.stmt(&format!("(void)({val});"))
    }
  }

  /// Emit a branch body into its own scope, optionally assigning its value
  /// to `dest`.
  fn branch(&mut self, f: &mut FnCtx, subst: &Subst, e: &Typed, dest: Option<&str>)
    -> Result<()>
  {
    let saved = f.renames.clone();
    f.indent += 1;
    let v = self.expr(f, subst, e)?;
    match dest {
      Some(tmp) => f.stmt(&format!("{tmp} = {v};")),
      None => self.discard(f, &v),
    }
    f.indent -= 1;
    f.renames = saved;
    Ok(())
  }

  /// `if/else if/.../else assert(0)` chain over compiled match arms.
  fn match_arms(
    &mut self, f: &mut FnCtx, subst: &Subst,
    arms: &[crate::types::typed::TypedArm], dest: Option<&str>,
  ) -> Result<()> {
    let Some((arm, rest)) = arms.split_first() else {
      // the fall-through of an exhausted match traps
      f.stmt("assert(0);");
      return Ok(())
    };
    let vc = self.expr(f, subst, &arm.cond)?;
    f.stmt(&format!("if ({vc}) {{"));
    let saved = f.renames.clone();
    f.indent += 1;
    for (name, rhs) in &arm.bindings {
      let val = self.expr(f, subst, rhs)?;
      let rty = subst_ty_vars(&rhs.ty, subst);
      if is_unit(&rty) {
        self.discard(f, &val);
        f.renames.insert(*name, "0".into());
      } else {
        let cname = f.alloc_name(name.as_str());
        let cty = self.ctype(&rty)?;
        f.declare(&cty, &cname, Some(&val));
        f.renames.insert(*name, cname);
      }
    }
    let v = self.expr(f, subst, &arm.body)?;
    match dest {
      Some(tmp) => f.stmt(&format!("{tmp} = {v};")),
      None => self.discard(f, &v),
    }
    f.indent -= 1;
    f.renames = saved;
    f.stmt("} else {");
    f.indent += 1;
    self.match_arms(f, subst, rest, dest)?;
    f.indent -= 1;
    f.stmt("}");
    Ok(())
  }

  /// Flatten the single applied value back into a C argument list: unit
  /// arguments vanish, tuple literals unpack in place, other tuple values
  /// go through a temporary.
  fn call_args(&mut self, f: &mut FnCtx, subst: &Subst, arg: &Typed) -> Result<Vec<String>> {
    let aty = subst_ty_vars(&arg.ty, subst);
    if is_unit(&aty) {
      let v = self.expr(f, subst, arg)?;
      self.discard(f, &v);
      return Ok(vec![])
    }
    if let MonoKind::Tuple(ts) = &*resolve_node(&aty) {
      if let TypedKind::Tuple(es) = &arg.kind {
        let mut out = vec![];
        for (e, ty) in es.iter().zip(ts.iter()) {
          let v = self.expr(f, subst, e)?;
          if is_unit(ty) { self.discard(f, &v) } else { out.push(v) }
        }
        return Ok(out)
      }
      let v = self.expr(f, subst, arg)?;
      let cty = self.ctype(&aty)?;
      let tmp = f.fresh_tmp();
      f.declare(&cty, &tmp, Some(&v));
      return Ok(
        ts.iter().enumerate()
          .filter(|(_, ty)| !is_unit(ty))
          .map(|(i, _)| format!("{tmp}._{i}"))
          .collect(),
      )
    }
    Ok(vec![self.expr(f, subst, arg)?])
  }
}

fn restore(f: &mut FnCtx, name: Symbol, saved: Option<String>) {
  match saved {
    Some(old) => { f.renames.insert(name, old); }
    None => { f.renames.remove(&name); }
  }
}

/// Does this typed node denote a C lvalue as emitted?
fn is_c_place(t: &Typed) -> bool {
  match &t.kind {
    TypedKind::Local(_) | TypedKind::Deref(_) => true,
    TypedKind::Glob(TopVar::El(v), _) => !v.args.is_func(),
    TypedKind::FieldAccess(e, _) | TypedKind::TupleAccess(e, _) => is_c_place(e),
    _ => false,
  }
}

fn escape_char(c: u8) -> String {
  match c {
    b'\n' => "\\n".into(),
    b'\t' => "\\t".into(),
    b'\r' => "\\r".into(),
    b'\\' => "\\\\".into(),
    b'\'' => "\\'".into(),
    0 => "\\0".into(),
    c if (0x20..0x7f).contains(&c) => (c as char).to_string(),
    c => format!("\\x{c:02x}"),
  }
}

fn indent_block(body: &str) -> String {
  body.lines().map(|l| format!("  {l}\n")).collect()
}

#[cfg(test)]
mod tests {
  use crate::Compiler;

  fn emit(src: &str) -> String {
    Compiler::new(".").compile_source("main", src).expect("compile")
  }

  #[test]
  fn identity_specializes_per_instantiation() {
    let c = emit(
      "let id = fun x -> x\n\
       let main() : i64 = id(0)",
    );
    assert!(c.contains("static int64_t id_inst_I64(int64_t x);"), "{c}");
    assert!(c.contains("id_inst_I64(INT64_C(0))"), "{c}");
    // the generic binding itself is never emitted
    assert!(!c.contains("static int64_t id("), "{c}");
  }

  #[test]
  fn each_instantiation_is_emitted_once() {
    let c = emit(
      "let id = fun x -> x\n\
       let main() : i64 = id(id(1)) + id(2)",
    );
    assert_eq!(c.matches("static int64_t id_inst_I64(int64_t x);").count(), 1, "{c}");
    assert_eq!(c.matches("static int64_t id_inst_I64(int64_t x) {").count(), 1, "{c}");
  }

  #[test]
  fn enum_lowers_to_tagged_union() {
    let c = emit(
      "type option(a) := | Some(a) | None\n\
       let main() : i64 = match Some(1) with | Some(x) -> x | None -> 0",
    );
    assert!(c.contains("enum option_I64_tag { OPTION_I64_SOME_TAG, OPTION_I64_NONE_TAG };"), "{c}");
    assert!(c.contains("struct option_I64;"), "{c}");
    assert!(c.contains(".tag == OPTION_I64_SOME_TAG"), "{c}");
    assert!(c.contains(".data.Some"), "{c}");
    // unmatched values trap
    assert!(c.contains("assert(0);"), "{c}");
  }

  #[test]
  fn unit_params_are_dropped_and_return_lowered_to_void() {
    let c = emit(
      "let ignore(u : unit, n : i64) = ()\n\
       let main() : i64 = ignore((), 3); 0",
    );
    assert!(c.contains("static void ignore(int64_t n);"), "{c}");
    assert!(c.contains("ignore(INT64_C(3));"), "{c}");
  }

  #[test]
  fn tuples_become_structs() {
    let c = emit(
      "let pair() : (i64, bool) = (7, true)\n\
       let main() : i64 = (pair()).0",
    );
    assert!(c.contains("struct Tup2_I64_Bool {"), "{c}");
    assert!(c.contains("._0 = INT64_C(7)"), "{c}");
    assert!(c.contains("._1 = true"), "{c}");
  }

  #[test]
  fn globals_initialize_in_dependency_order() {
    let c = emit(
      "let base = 2\n\
       let doubled = base + base\n\
       let main() : i64 = doubled",
    );
    assert!(c.contains("static int64_t base;"), "{c}");
    assert!(c.contains("static int64_t doubled;"), "{c}");
    let init = c.find("static void _el2_init(void) {").expect("init fn");
    let base_at = c[init..].find("base = INT64_C(2);").expect("base assignment");
    let doubled_at = c[init..].find("doubled = (base + base);").expect("doubled assignment");
    assert!(base_at < doubled_at, "{c}");
    // main runs the initializer first
    assert!(c.contains("_el2_init();"), "{c}");
  }

  #[test]
  fn externs_declare_and_implicit_externs_do_not() {
    let c = emit(
      "extern square : i64 -> i64 = \"el2_square\"\n\
       implicit_extern put : c_int -> c_int = \"putchar\"\n\
       let main() : i64 = put(65c); square(4)",
    );
    assert!(c.contains("extern int64_t el2_square(int64_t);"), "{c}");
    assert!(!c.contains("extern int putchar"), "{c}");
    assert!(c.contains("putchar(65)"), "{c}");
  }

  #[test]
  fn if_expression_uses_a_temporary() {
    let c = emit("let main() : i64 = if true then 1 else 2");
    assert!(c.contains("int64_t _t0;"), "{c}");
    assert!(c.contains("_t0 = INT64_C(1);"), "{c}");
    assert!(c.contains("_t0 = INT64_C(2);"), "{c}");
  }

  #[test]
  fn prelude_and_section_order() {
    let c = emit("let main() : i64 = 0");
    let incl = c.find("#include <stdint.h>").expect("prelude");
    let decl = c.find("int64_t main(void);").expect("declaration");
    let def = c.find("int64_t main(void) {").expect("definition");
    assert!(incl < decl && decl < def, "{c}");
  }
}
