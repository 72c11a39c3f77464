//! Recursive-descent parser with a precedence-climbing binary operator
//! loop. Delivers the toplevel list consumed by the module resolver.
//!
//! Qualified paths lean on the module naming convention: a module name is
//! always capitalized (file names are lowercase, the module name uppercases
//! the first letter), so in `M.x` the capitalized `M` followed by a dot is
//! a path component while `x.f` is a field access.

use crate::error::{CompileError, Result};
use crate::lexer::{Kw, Token, tokenize};
use crate::symbol::Symbol;
use crate::types::ast::*;

pub fn parse(src: &str) -> Result<Vec<TopLevel>> {
  let mut p = Parser { toks: tokenize(src)?, pos: 0 };
  let mut out = vec![];
  while *p.peek() != Token::Eof {
    out.push(p.toplevel()?)
  }
  Ok(out)
}

struct Parser {
  toks: Vec<(Token, u32)>,
  pos: usize,
}

fn is_module_name(s: Symbol) -> bool {
  s.as_str().chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

impl Parser {
  fn peek(&self) -> &Token { &self.toks[self.pos].0 }
  fn peek2(&self) -> &Token {
    &self.toks.get(self.pos + 1).unwrap_or(&self.toks[self.toks.len() - 1]).0
  }
  fn line(&self) -> u32 { self.toks[self.pos].1 }

  fn bump(&mut self) -> Token {
    let t = self.toks[self.pos].0.clone();
    if self.pos + 1 < self.toks.len() { self.pos += 1 }
    t
  }

  fn eat(&mut self, t: &Token) -> bool {
    if self.peek() == t { self.bump(); true } else { false }
  }

  fn err(&self, msg: impl Into<String>) -> CompileError {
    CompileError::Parse { line: self.line(), msg: msg.into() }
  }

  fn expect(&mut self, t: &Token, what: &str) -> Result<()> {
    if self.eat(t) { Ok(()) } else {
      Err(self.err(format!("expected {what}, found {:?}", self.peek())))
    }
  }

  fn ident(&mut self, what: &str) -> Result<Symbol> {
    match self.peek() {
      &Token::Ident(s) => { self.bump(); Ok(s) }
      t => Err(self.err(format!("expected {what}, found {t:?}"))),
    }
  }

  fn str_lit(&mut self, what: &str) -> Result<String> {
    match self.peek() {
      Token::Str(s) => { let s = s.clone(); self.bump(); Ok(s) }
      t => Err(self.err(format!("expected {what}, found {t:?}"))),
    }
  }

  // ---------------------------------------------------------------- toplevels

  fn toplevel(&mut self) -> Result<TopLevel> {
    match self.bump() {
      Token::Kw(Kw::Open) => {
        let mut path = vec![self.ident("module name")?];
        while self.eat(&Token::Dot) { path.push(self.ident("module name")?) }
        Ok(TopLevel::Open(path.into()))
      }
      Token::Kw(Kw::OpenFile) => Ok(TopLevel::OpenFile(self.str_lit("file name")?)),
      Token::Kw(Kw::Type) => self.let_type(),
      Token::Kw(Kw::Extern) => self.extern_(false),
      Token::Kw(Kw::ImplicitExtern) => self.extern_(true),
      Token::Kw(Kw::Let) => self.let_(),
      t => Err(self.err(format!("expected a toplevel declaration, found {t:?}"))),
    }
  }

  fn extern_(&mut self, implicit: bool) -> Result<TopLevel> {
    let name = self.ident("extern name")?;
    self.expect(&Token::Colon, "`:`")?;
    let ty = self.type_expr()?;
    self.expect(&Token::Eq, "`=`")?;
    let external = self.str_lit("external name")?;
    Ok(if implicit {
      TopLevel::ImplicitExtern { name, ty, external }
    } else {
      TopLevel::Extern { name, ty, external }
    })
  }

  fn let_type(&mut self) -> Result<TopLevel> {
    let name = self.ident("type name")?;
    let mut ty_vars = vec![];
    if self.eat(&Token::LParen) {
      loop {
        ty_vars.push(self.ident("type variable")?);
        if !self.eat(&Token::Comma) { break }
      }
      self.expect(&Token::RParen, "`)`")?;
    }
    self.expect(&Token::ColonEq, "`:=`")?;
    let decl = match self.peek() {
      Token::Pipe => {
        let mut variants = vec![];
        while self.eat(&Token::Pipe) {
          let v = self.ident("variant name")?;
          let payload = if self.eat(&Token::LParen) {
            let t = self.type_expr()?;
            self.expect(&Token::RParen, "`)`")?;
            Some(t)
          } else { None };
          variants.push((v, payload))
        }
        TypeDecl::Enum(variants.into())
      }
      Token::LBrace => {
        self.bump();
        let mut fields = vec![];
        while !self.eat(&Token::RBrace) {
          let f = self.ident("field name")?;
          self.expect(&Token::Colon, "`:`")?;
          fields.push((f, self.type_expr()?));
          if !self.eat(&Token::Comma) {
            self.expect(&Token::RBrace, "`}`")?;
            break
          }
        }
        TypeDecl::Struct(fields.into())
      }
      _ => TypeDecl::Alias(self.type_expr()?),
    };
    Ok(TopLevel::LetType { name, ty_vars: ty_vars.into(), decl })
  }

  fn let_(&mut self) -> Result<TopLevel> {
    if let (&Token::Ident(name), &Token::LParen) = (self.peek(), self.peek2()) {
      self.bump();
      self.bump();
      let mut args = vec![];
      while !self.eat(&Token::RParen) {
        let a = self.ident("argument name")?;
        let ty = if self.eat(&Token::Colon) { Some(self.type_expr()?) } else { None };
        args.push((a, ty));
        if !self.eat(&Token::Comma) {
          self.expect(&Token::RParen, "`)`")?;
          break
        }
      }
      let ret = if self.eat(&Token::Colon) { Some(self.type_expr()?) } else { None };
      self.expect(&Token::Eq, "`=`")?;
      let body = self.expr()?;
      return Ok(TopLevel::LetFn { name, args: args.into(), ret, body })
    }
    let pat = self.pattern()?;
    self.expect(&Token::Eq, "`=`")?;
    Ok(TopLevel::Let { pat, expr: self.expr()? })
  }

  // -------------------------------------------------------------- expressions

  /// Statement level: expression `let` and `;` sequencing.
  fn expr(&mut self) -> Result<Expr> {
    if self.eat(&Token::Kw(Kw::Let)) {
      let pat = self.pattern()?;
      self.expect(&Token::Eq, "`=`")?;
      let rhs = self.assign_expr()?;
      self.expect(&Token::Semi, "`;` after let binding")?;
      return Ok(Expr::Let(pat, rhs.into(), self.expr()?.into()))
    }
    let e = self.assign_expr()?;
    if self.eat(&Token::Semi) {
      Ok(Expr::Seq(e.into(), self.expr()?.into()))
    } else {
      Ok(e)
    }
  }

  fn assign_expr(&mut self) -> Result<Expr> {
    let e = self.binop_expr(1)?;
    if self.eat(&Token::LArrow) {
      Ok(Expr::Assign(e.into(), self.assign_expr()?.into()))
    } else {
      Ok(e)
    }
  }

  fn binop(&self) -> Option<(Binop, u8)> {
    Some(match self.peek() {
      Token::OrOr => (Binop::Or, 1),
      Token::AndAnd => (Binop::And, 2),
      Token::Eq => (Binop::Eq, 3),
      Token::Ne => (Binop::Ne, 3),
      Token::Lt => (Binop::Lt, 3),
      Token::Gt => (Binop::Gt, 3),
      Token::Le => (Binop::Le, 3),
      Token::Ge => (Binop::Ge, 3),
      Token::Plus => (Binop::Add, 4),
      Token::Minus => (Binop::Sub, 4),
      Token::Star => (Binop::Mul, 5),
      Token::Slash => (Binop::Div, 5),
      Token::Percent => (Binop::Rem, 5),
      _ => return None,
    })
  }

  fn binop_expr(&mut self, min_prec: u8) -> Result<Expr> {
    let mut lhs = self.unary()?;
    while let Some((op, prec)) = self.binop() {
      if prec < min_prec { break }
      self.bump();
      let rhs = self.binop_expr(prec + 1)?;
      lhs = Expr::Binop(op, lhs.into(), rhs.into())
    }
    Ok(lhs)
  }

  fn unary(&mut self) -> Result<Expr> {
    match self.peek() {
      Token::Bang => { self.bump(); Ok(Expr::Unop(Unop::Not, self.unary()?.into())) }
      Token::Minus => { self.bump(); Ok(Expr::Unop(Unop::Neg, self.unary()?.into())) }
      Token::Amp => { self.bump(); Ok(Expr::Ref(self.unary()?.into())) }
      Token::Star => { self.bump(); Ok(Expr::Deref(self.unary()?.into())) }
      _ => self.postfix(),
    }
  }

  fn postfix(&mut self) -> Result<Expr> {
    let mut e = self.atom()?;
    loop {
      match self.peek() {
        Token::LParen => {
          self.bump();
          let mut args = vec![];
          while !self.eat(&Token::RParen) {
            args.push(self.assign_expr()?);
            if !self.eat(&Token::Comma) {
              self.expect(&Token::RParen, "`)`")?;
              break
            }
          }
          e = Expr::Call(e.into(), args.into())
        }
        Token::Dot => {
          self.bump();
          match self.bump() {
            Token::Ident(f) => e = Expr::Field(e.into(), f),
            Token::Int(i) => {
              let i = u32::try_from(i).map_err(|_| self.err("bad tuple index"))?;
              e = Expr::TupleIdx(e.into(), i)
            }
            t => return Err(self.err(format!("expected field or tuple index, found {t:?}"))),
          }
        }
        _ => return Ok(e),
      }
    }
  }

  fn can_start_expr(&self) -> bool {
    matches!(self.peek(),
      Token::Ident(_) | Token::Int(_) | Token::CInt(_) | Token::Float(_) |
      Token::Char(_) | Token::Str(_) | Token::LParen | Token::Bang |
      Token::Minus | Token::Amp | Token::Star |
      Token::Kw(Kw::If | Kw::Match | Kw::Loop | Kw::Fun | Kw::True | Kw::False |
        Kw::Sizeof | Kw::Assert | Kw::Break | Kw::Return))
  }

  fn atom(&mut self) -> Result<Expr> {
    match self.bump() {
      Token::Int(n) => Ok(Expr::Lit(Lit::I64(n))),
      Token::CInt(n) => Ok(Expr::Lit(Lit::CInt(n))),
      Token::Float(x) => Ok(Expr::Lit(Lit::F64(x))),
      Token::Char(c) => Ok(Expr::Lit(Lit::Char(c))),
      Token::Str(s) => Ok(Expr::Lit(Lit::Str(s))),
      Token::Kw(Kw::True) => Ok(Expr::Lit(Lit::Bool(true))),
      Token::Kw(Kw::False) => Ok(Expr::Lit(Lit::Bool(false))),
      Token::LParen => {
        if self.eat(&Token::RParen) { return Ok(Expr::Lit(Lit::Unit)) }
        let e = self.expr()?;
        if self.eat(&Token::Comma) {
          let mut elems = vec![e];
          loop {
            elems.push(self.assign_expr()?);
            if !self.eat(&Token::Comma) { break }
          }
          self.expect(&Token::RParen, "`)`")?;
          Ok(Expr::Tuple(elems.into()))
        } else if self.eat(&Token::Colon) {
          let t = self.type_expr()?;
          self.expect(&Token::RParen, "`)`")?;
          Ok(Expr::Typed(e.into(), t))
        } else {
          self.expect(&Token::RParen, "`)`")?;
          Ok(e)
        }
      }
      Token::Kw(Kw::If) => {
        let cond = self.expr()?;
        self.expect(&Token::Kw(Kw::Then), "`then`")?;
        let then = self.assign_expr()?;
        let els = if self.eat(&Token::Kw(Kw::Else)) {
          Some(Box::new(self.assign_expr()?))
        } else { None };
        Ok(Expr::If(cond.into(), then.into(), els))
      }
      Token::Kw(Kw::Match) => {
        let scrut = self.expr()?;
        self.expect(&Token::Kw(Kw::With), "`with`")?;
        let mut arms = vec![];
        while self.eat(&Token::Pipe) {
          let pat = self.pattern()?;
          self.expect(&Token::Arrow, "`->`")?;
          arms.push((pat, self.expr()?))
        }
        if arms.is_empty() {
          return Err(self.err("match needs at least one arm"))
        }
        Ok(Expr::Match(scrut.into(), arms.into()))
      }
      Token::Kw(Kw::Loop) => Ok(Expr::Loop(self.assign_expr()?.into())),
      Token::Kw(Kw::Break) => {
        let e = if self.can_start_expr() { self.assign_expr()? } else { Expr::Lit(Lit::Unit) };
        Ok(Expr::Break(e.into()))
      }
      Token::Kw(Kw::Return) => {
        let e = if self.can_start_expr() { self.assign_expr()? } else { Expr::Lit(Lit::Unit) };
        Ok(Expr::Return(e.into()))
      }
      Token::Kw(Kw::Assert) => Ok(Expr::Assert(self.assign_expr()?.into())),
      Token::Kw(Kw::Sizeof) => {
        self.expect(&Token::LParen, "`(`")?;
        let t = self.type_expr()?;
        self.expect(&Token::RParen, "`)`")?;
        Ok(Expr::Sizeof(t))
      }
      Token::Kw(Kw::Fun) => {
        let mut args = vec![];
        loop {
          match self.peek() {
            &Token::Ident(a) => { self.bump(); args.push((a, None)) }
            Token::LParen => {
              self.bump();
              let a = self.ident("argument name")?;
              self.expect(&Token::Colon, "`:`")?;
              let t = self.type_expr()?;
              self.expect(&Token::RParen, "`)`")?;
              args.push((a, Some(t)))
            }
            _ => break,
          }
        }
        if args.is_empty() {
          return Err(self.err("`fun` needs at least one argument"))
        }
        self.expect(&Token::Arrow, "`->`")?;
        Ok(Expr::Lambda(args.into(), self.assign_expr()?.into()))
      }
      Token::Ident(first) => {
        let mut path = vec![];
        let mut name = first;
        while is_module_name(name) && *self.peek() == Token::Dot
          && matches!(self.peek2(), Token::Ident(_))
        {
          self.bump();
          path.push(name);
          name = self.ident("name")?;
        }
        if *self.peek() == Token::LBrace && path.is_empty() {
          self.bump();
          let mut fields = vec![];
          while !self.eat(&Token::RBrace) {
            let f = self.ident("field name")?;
            let e = if self.eat(&Token::Colon) {
              self.assign_expr()?
            } else {
              Expr::Var { path: Box::new([]), name: f }
            };
            fields.push((f, e));
            if !self.eat(&Token::Comma) {
              self.expect(&Token::RBrace, "`}`")?;
              break
            }
          }
          return Ok(Expr::Struct(name, fields.into()))
        }
        Ok(Expr::Var { path: path.into(), name })
      }
      t => Err(self.err(format!("expected an expression, found {t:?}"))),
    }
  }

  // ----------------------------------------------------------------- patterns

  fn pattern(&mut self) -> Result<Pattern> {
    match self.bump() {
      Token::Ident(name) => {
        if *self.peek() == Token::LBrace {
          self.bump();
          let mut fields = vec![];
          while !self.eat(&Token::RBrace) {
            let f = self.ident("field name")?;
            let p = if self.eat(&Token::Colon) { Some(self.pattern()?) } else { None };
            fields.push((f, p));
            if !self.eat(&Token::Comma) {
              self.expect(&Token::RBrace, "`}`")?;
              break
            }
          }
          Ok(Pattern::Struct(name, fields.into()))
        } else if is_module_name(name) {
          let payload = if self.eat(&Token::LParen) {
            let p = self.pattern()?;
            self.expect(&Token::RParen, "`)`")?;
            Some(Box::new(p))
          } else { None };
          Ok(Pattern::Enum(name, payload))
        } else {
          Ok(Pattern::Var(name))
        }
      }
      Token::LParen => {
        if self.eat(&Token::RParen) { return Ok(Pattern::Unit) }
        let p = self.pattern()?;
        if self.eat(&Token::Comma) {
          let mut elems = vec![p];
          loop {
            elems.push(self.pattern()?);
            if !self.eat(&Token::Comma) { break }
          }
          self.expect(&Token::RParen, "`)`")?;
          Ok(Pattern::Tuple(elems.into()))
        } else if self.eat(&Token::Colon) {
          let t = self.type_expr()?;
          self.expect(&Token::RParen, "`)`")?;
          Ok(Pattern::Typed(p.into(), t))
        } else {
          self.expect(&Token::RParen, "`)`")?;
          Ok(p)
        }
      }
      Token::Amp => Ok(Pattern::Ref(self.pattern()?.into())),
      Token::Int(n) => Ok(Pattern::Lit(Lit::I64(n))),
      Token::CInt(n) => Ok(Pattern::Lit(Lit::CInt(n))),
      Token::Float(x) => Ok(Pattern::Lit(Lit::F64(x))),
      Token::Char(c) => Ok(Pattern::Lit(Lit::Char(c))),
      Token::Kw(Kw::True) => Ok(Pattern::Lit(Lit::Bool(true))),
      Token::Kw(Kw::False) => Ok(Pattern::Lit(Lit::Bool(false))),
      Token::Minus => match self.bump() {
        Token::Int(n) => Ok(Pattern::Lit(Lit::I64(-n))),
        Token::CInt(n) => Ok(Pattern::Lit(Lit::CInt(-n))),
        Token::Float(x) => Ok(Pattern::Lit(Lit::F64(-x))),
        t => Err(self.err(format!("expected a numeric literal, found {t:?}"))),
      },
      t => Err(self.err(format!("expected a pattern, found {t:?}"))),
    }
  }

  // --------------------------------------------------------- type expressions

  fn type_expr(&mut self) -> Result<TypeExpr> {
    let t = self.type_atom()?;
    if self.eat(&Token::Arrow) {
      Ok(TypeExpr::Func(t.into(), self.type_expr()?.into()))
    } else {
      Ok(t)
    }
  }

  fn type_atom(&mut self) -> Result<TypeExpr> {
    match self.bump() {
      Token::Amp => Ok(TypeExpr::Pointer(self.type_atom()?.into())),
      Token::Kw(Kw::Opaque) => {
        self.expect(&Token::LParen, "`(`")?;
        let t = self.type_expr()?;
        self.expect(&Token::RParen, "`)`")?;
        Ok(TypeExpr::Opaque(t.into()))
      }
      Token::LParen => {
        if self.eat(&Token::RParen) { return Ok(TypeExpr::Unit) }
        let t = self.type_expr()?;
        if self.eat(&Token::Comma) {
          let mut elems = vec![t];
          loop {
            elems.push(self.type_expr()?);
            if !self.eat(&Token::Comma) { break }
          }
          self.expect(&Token::RParen, "`)`")?;
          Ok(TypeExpr::Tuple(elems.into()))
        } else {
          self.expect(&Token::RParen, "`)`")?;
          Ok(t)
        }
      }
      Token::Ident(first) => {
        let mut path = vec![];
        let mut name = first;
        while is_module_name(name) && *self.peek() == Token::Dot
          && matches!(self.peek2(), Token::Ident(_))
        {
          self.bump();
          path.push(name);
          name = self.ident("type name")?;
        }
        if name.as_str() == "unit" {
          return Ok(TypeExpr::Unit)
        }
        let mut args = vec![];
        if self.eat(&Token::LParen) {
          loop {
            args.push(self.type_expr()?);
            if !self.eat(&Token::Comma) { break }
          }
          self.expect(&Token::RParen, "`)`")?;
        }
        Ok(TypeExpr::Name { path: path.into(), name, args: args.into() })
      }
      t => Err(self.err(format!("expected a type, found {t:?}"))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_function_binding() {
    let tops = parse("let main() : i64 = id(0)").expect("parse");
    match &tops[0] {
      TopLevel::LetFn { name, args, ret, body } => {
        assert_eq!(name.as_str(), "main");
        assert!(args.is_empty());
        assert!(ret.is_some());
        assert!(matches!(body, Expr::Call(..)));
      }
      t => panic!("expected LetFn, got {t:?}"),
    }
  }

  #[test]
  fn parses_qualified_vs_field() {
    let tops = parse("let a = M.x  let b = y.f").expect("parse");
    match &tops[0] {
      TopLevel::Let { expr: Expr::Var { path, name }, .. } => {
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].as_str(), "M");
        assert_eq!(name.as_str(), "x");
      }
      t => panic!("{t:?}"),
    }
    match &tops[1] {
      TopLevel::Let { expr: Expr::Field(e, f), .. } => {
        assert!(matches!(&**e, Expr::Var { .. }));
        assert_eq!(f.as_str(), "f");
      }
      t => panic!("{t:?}"),
    }
  }

  #[test]
  fn parses_enum_type_and_match() {
    let src = "type option(a) := | Some(a) | None\n\
               let main() = match Some(1) with | Some(x) -> x | None -> 0";
    let tops = parse(src).expect("parse");
    match &tops[0] {
      TopLevel::LetType { name, ty_vars, decl: TypeDecl::Enum(vs) } => {
        assert_eq!(name.as_str(), "option");
        assert_eq!(ty_vars.len(), 1);
        assert_eq!(vs.len(), 2);
        assert!(vs[0].1.is_some());
        assert!(vs[1].1.is_none());
      }
      t => panic!("{t:?}"),
    }
    match &tops[1] {
      TopLevel::LetFn { body: Expr::Match(_, arms), .. } => assert_eq!(arms.len(), 2),
      t => panic!("{t:?}"),
    }
  }

  #[test]
  fn precedence() {
    let tops = parse("let x = 1 + 2 * 3 = 7").expect("parse");
    // (=) binds looser than (+), which binds looser than (*)
    match &tops[0] {
      TopLevel::Let { expr: Expr::Binop(Binop::Eq, lhs, _), .. } =>
        match &**lhs {
          Expr::Binop(Binop::Add, _, rhs) =>
            assert!(matches!(&**rhs, Expr::Binop(Binop::Mul, ..))),
          e => panic!("{e:?}"),
        },
      t => panic!("{t:?}"),
    }
  }

  #[test]
  fn expression_let_and_seq() {
    let tops = parse("let f(p) = let x = 1; *p <- x; x").expect("parse");
    match &tops[0] {
      TopLevel::LetFn { body: Expr::Let(_, _, body), .. } =>
        assert!(matches!(&**body, Expr::Seq(..))),
      t => panic!("{t:?}"),
    }
  }

  #[test]
  fn struct_literal_and_pattern() {
    let src = "let p = point { x: 1, y: 2 }\nlet q = match p with | point { x, y: b } -> x + b";
    let tops = parse(src).expect("parse");
    assert!(matches!(&tops[0], TopLevel::Let { expr: Expr::Struct(..), .. }));
    match &tops[1] {
      TopLevel::Let { expr: Expr::Match(_, arms), .. } =>
        assert!(matches!(arms[0].0, Pattern::Struct(..))),
      t => panic!("{t:?}"),
    }
  }
}
