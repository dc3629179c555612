// ABOUTME: IR builder lowering the expanded AST into JavaScript-shaped statements and expressions

use crate::ast::{Literal, Sexp, SexpKind};
use crate::error::CompileError;
use crate::ir::*;
use crate::span::Span;
use log::debug;
use std::collections::HashMap;

/// JavaScript reserved words; sanitised identifiers colliding with these
/// get a trailing underscore.
const JS_RESERVED: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "import", "in", "instanceof", "let", "new", "null", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// Canonical symbol-to-identifier rewrite: illegal characters become `_`,
/// runs collapse to one, a leading digit gets a `_` prefix, and reserved
/// words get a `_` suffix. Deterministic and idempotent.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for c in name.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '_' {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        out.push(mapped);
    }
    if out.is_empty() {
        out.push('_');
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if JS_RESERVED.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

fn is_valid_js_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return false;
    }
    !JS_RESERVED.contains(&s)
}

/// Module-wide symbol-to-identifier table. The same symbol always maps to
/// the same identifier; two symbols mapping to one identifier is a
/// CodeGenError.
#[derive(Default)]
struct NameTable {
    chosen: HashMap<String, String>,
    taken: HashMap<String, String>,
}

impl NameTable {
    fn resolve(&mut self, original: &str, span: &Span) -> Result<String, CompileError> {
        if let Some(existing) = self.chosen.get(original) {
            return Ok(existing.clone());
        }
        let sanitized = sanitize(original);
        if let Some(prev) = self.taken.get(&sanitized) {
            if prev != original {
                return Err(CompileError::codegen(
                    format!(
                        "identifiers `{}` and `{}` both sanitise to `{}`",
                        prev, original, sanitized
                    ),
                    span.clone(),
                ));
            }
        }
        self.taken.insert(sanitized.clone(), original.to_string());
        self.chosen.insert(original.to_string(), sanitized.clone());
        Ok(sanitized)
    }
}

struct LoopCtx {
    binders: Vec<String>,
}

/// Result of lowering a module.
#[derive(Debug)]
pub struct Lowered {
    pub program: Program,
    pub uses_get_helper: bool,
}

pub struct Lowerer {
    names: NameTable,
    helper_enabled: bool,
    uses_get_helper: bool,
    loops: Vec<LoopCtx>,
    temp_counter: usize,
}

/// Lower every expanded top-level form into the module body.
pub fn lower_program(forms: &[Sexp], helper_enabled: bool) -> Result<Lowered, CompileError> {
    let mut lowerer = Lowerer {
        names: NameTable::default(),
        helper_enabled,
        uses_get_helper: false,
        loops: Vec::new(),
        temp_counter: 0,
    };
    let mut body = Vec::new();
    for form in forms {
        body.extend(lowerer.lower_stmt(form)?);
    }
    debug!(
        "lowered {} top-level forms ({} statements)",
        forms.len(),
        body.len()
    );
    Ok(Lowered {
        program: Program { body },
        uses_get_helper: lowerer.uses_get_helper,
    })
}

/// Forms that only exist as statements.
fn statement_head(head: &str) -> bool {
    matches!(
        head,
        "def" | "var" | "defn" | "import" | "export" | "class" | "while" | "for-of" | "throw"
            | "break" | "continue"
    )
}

impl Lowerer {
    fn fresh_temp(&mut self) -> String {
        let n = self.temp_counter;
        self.temp_counter += 1;
        format!("__t{}", n)
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn lower_stmt(&mut self, node: &Sexp) -> Result<Vec<Stmt>, CompileError> {
        let span = node.span.clone();
        let Some(items) = node.list_items() else {
            let expr = self.lower_expr(node)?;
            return Ok(vec![Stmt::Expr { expr, span }]);
        };
        if items.is_empty() {
            let expr = self.lower_expr(node)?;
            return Ok(vec![Stmt::Expr { expr, span }]);
        }

        match items[0].plain_symbol() {
            Some("def") | Some("var") => {
                let kind = if items[0].is_symbol("def") {
                    DeclKind::Const
                } else {
                    DeclKind::Let
                };
                self.expect_len(items, 3, "expects a name and a value", &span)?;
                let pattern = self.lower_pattern(&items[1])?;
                let init = self.lower_expr(&items[2])?;
                Ok(vec![Stmt::Decl {
                    kind,
                    pattern,
                    init: Some(init),
                    span,
                }])
            }
            Some("defn") => {
                if items.len() < 4 {
                    return Err(CompileError::transform(
                        "`defn` expects a name, parameters, and a body",
                        span,
                    ));
                }
                let name_sym = items[1].plain_symbol().ok_or_else(|| {
                    CompileError::transform("`defn` name must be a symbol", items[1].span.clone())
                })?;
                let name = self.names.resolve(name_sym, &items[1].span)?;
                let func = self.lower_function(Some(name.clone()), &items[2], &items[3..], false)?;
                Ok(vec![Stmt::FuncDecl { name, func, span }])
            }
            Some("import") => Ok(vec![self.lower_import(items, span)?]),
            Some("export") => Ok(vec![self.lower_export(items, span)?]),
            Some("class") => Ok(vec![self.lower_class(items, span)?]),
            Some("if") => {
                if items.len() < 3 || items.len() > 4 {
                    return Err(CompileError::transform("`if` expects 2-3 arguments", span));
                }
                let test = self.lower_expr(&items[1])?;
                let cons = self.lower_stmt(&items[2])?;
                let alt = match items.get(3) {
                    Some(alt) => Some(self.lower_stmt(alt)?),
                    None => None,
                };
                Ok(vec![Stmt::If {
                    test,
                    cons,
                    alt,
                    span,
                }])
            }
            Some("do") => {
                let mut body = Vec::new();
                for form in &items[1..] {
                    body.extend(self.lower_stmt(form)?);
                }
                Ok(vec![Stmt::Block { body, span }])
            }
            Some("let") => {
                let mut body = self.lower_let_decls(&items[1])?;
                for form in &items[2..] {
                    body.extend(self.lower_stmt(form)?);
                }
                Ok(vec![Stmt::Block { body, span }])
            }
            Some("while") => {
                if items.len() < 2 {
                    return Err(CompileError::transform("`while` expects a condition", span));
                }
                let test = self.lower_expr(&items[1])?;
                let mut body = Vec::new();
                for form in &items[2..] {
                    body.extend(self.lower_stmt(form)?);
                }
                Ok(vec![Stmt::While { test, body, span }])
            }
            Some("for-of") => {
                let pair = items
                    .get(1)
                    .and_then(crate::interp::seq_children)
                    .filter(|p| p.len() == 2)
                    .ok_or_else(|| {
                        CompileError::transform("`for-of` binding must be [item coll]", span.clone())
                    })?;
                let pattern = self.lower_pattern(&pair[0])?;
                let iter = self.lower_expr(&pair[1])?;
                let mut body = Vec::new();
                for form in &items[2..] {
                    body.extend(self.lower_stmt(form)?);
                }
                Ok(vec![Stmt::ForOf {
                    pattern,
                    iter,
                    body,
                    span,
                }])
            }
            Some("throw") => {
                self.expect_len(items, 2, "expects one argument", &span)?;
                let arg = self.lower_expr(&items[1])?;
                Ok(vec![Stmt::Throw { arg, span }])
            }
            Some("try") => Ok(vec![self.lower_try(items, span, false)?]),
            Some("label") => {
                let label_sym = items
                    .get(1)
                    .and_then(|l| l.plain_symbol())
                    .ok_or_else(|| {
                        CompileError::transform("`label` expects a label symbol", span.clone())
                    })?;
                let label = sanitize(label_sym);
                let mut body = Vec::new();
                for form in &items[2..] {
                    body.extend(self.lower_stmt(form)?);
                }
                Ok(vec![Stmt::Labeled { label, body, span }])
            }
            Some("break") => Ok(vec![Stmt::Break {
                label: items.get(1).and_then(|l| l.plain_symbol()).map(sanitize),
                span,
            }]),
            Some("continue") => Ok(vec![Stmt::Continue {
                label: items.get(1).and_then(|l| l.plain_symbol()).map(sanitize),
                span,
            }]),
            _ => {
                let expr = self.lower_expr(node)?;
                Ok(vec![Stmt::Expr { expr, span }])
            }
        }
    }

    /// One `const` declaration per binding pair.
    fn lower_let_decls(&mut self, bindings: &Sexp) -> Result<Vec<Stmt>, CompileError> {
        let pairs = crate::interp::seq_children(bindings).ok_or_else(|| {
            CompileError::transform("`let` bindings must be a list", bindings.span.clone())
        })?;
        if pairs.len() % 2 != 0 {
            return Err(CompileError::transform(
                "`let` bindings must come in name/value pairs",
                bindings.span.clone(),
            ));
        }
        let mut decls = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks(2) {
            let pattern = self.lower_pattern(&pair[0])?;
            let init = self.lower_expr(&pair[1])?;
            decls.push(Stmt::Decl {
                kind: DeclKind::Const,
                pattern,
                init: Some(init),
                span: pair[0].span.merge(&pair[1].span),
            });
        }
        Ok(decls)
    }

    fn lower_try(
        &mut self,
        items: &[Sexp],
        span: Span,
        value_position: bool,
    ) -> Result<Stmt, CompileError> {
        let mut body_forms: Vec<&Sexp> = Vec::new();
        let mut catch = None;
        let mut finally = None;
        for form in &items[1..] {
            match form.head_symbol() {
                Some("catch") => {
                    let clause = form.list_items().unwrap_or_default();
                    if clause.len() < 2 {
                        return Err(CompileError::transform(
                            "`catch` expects a binding and a body",
                            form.span.clone(),
                        ));
                    }
                    let binding = Some(self.lower_pattern(&clause[1])?);
                    let body = if value_position {
                        self.lower_body_value(&clause[2..], &form.span)?
                    } else {
                        self.lower_stmts(&clause[2..])?
                    };
                    catch = Some(CatchClause { binding, body });
                }
                Some("finally") => {
                    let clause = form.list_items().unwrap_or_default();
                    finally = Some(self.lower_stmts(&clause[1..])?);
                }
                _ => body_forms.push(form),
            }
        }
        let owned: Vec<Sexp> = body_forms.into_iter().cloned().collect();
        let body = if value_position {
            self.lower_body_value(&owned, &span)?
        } else {
            self.lower_stmts(&owned)?
        };
        Ok(Stmt::Try {
            body,
            catch,
            finally,
            span,
        })
    }

    fn lower_stmts(&mut self, forms: &[Sexp]) -> Result<Vec<Stmt>, CompileError> {
        let mut out = Vec::new();
        for form in forms {
            out.extend(self.lower_stmt(form)?);
        }
        Ok(out)
    }

    /// Lower a body whose last expression is the value: the tail becomes a
    /// `return`, statement-only tails stay statements.
    fn lower_body_value(&mut self, forms: &[Sexp], span: &Span) -> Result<Vec<Stmt>, CompileError> {
        let Some((last, init)) = forms.split_last() else {
            return Ok(Vec::new());
        };
        let mut out = self.lower_stmts(init)?;
        match last.head_symbol() {
            Some(head) if statement_head(head) => {
                out.extend(self.lower_stmt(last)?);
            }
            _ => {
                let arg = self.lower_expr(last)?;
                out.push(Stmt::Return {
                    arg: Some(arg),
                    span: span.clone(),
                });
            }
        }
        Ok(out)
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn lower_expr(&mut self, node: &Sexp) -> Result<Expr, CompileError> {
        let span = node.span.clone();
        match &node.kind {
            SexpKind::Literal(lit) => Ok(Expr::Literal {
                value: lower_literal(lit),
                span,
            }),
            SexpKind::Keyword(name) => Ok(Expr::Literal {
                value: Lit::Str(name.clone()),
                span,
            }),
            SexpKind::Symbol { name, namespace } => self.lower_symbol_ref(name, namespace, &span),
            SexpKind::List(items) if items.is_empty() => Ok(Expr::Array {
                items: Vec::new(),
                span,
            }),
            SexpKind::List(items) => self.lower_list_expr(items, span),
            _ => Err(CompileError::transform(
                "unnormalised container reached the IR builder",
                span,
            )),
        }
    }

    /// Symbol references: `a.b.c` and `ns/name` become member chains.
    fn lower_symbol_ref(
        &mut self,
        name: &str,
        namespace: &Option<String>,
        span: &Span,
    ) -> Result<Expr, CompileError> {
        if name.starts_with("...") {
            return Err(CompileError::transform(
                "rest marker is only valid in a parameter list",
                span.clone(),
            ));
        }
        let mut segments: Vec<&str> = Vec::new();
        if let Some(ns) = namespace {
            segments.push(ns);
        }
        segments.extend(name.split('.').filter(|s| !s.is_empty()));
        if segments.is_empty() {
            return Err(CompileError::transform(
                format!("cannot lower symbol `{}`", name),
                span.clone(),
            ));
        }

        let root = self.names.resolve(segments[0], span)?;
        let mut expr = Expr::Ident {
            name: root,
            span: span.clone(),
        };
        for prop in &segments[1..] {
            expr = Expr::Member {
                obj: Box::new(expr),
                prop: (*prop).to_string(),
                span: span.clone(),
            };
        }
        Ok(expr)
    }

    fn lower_list_expr(&mut self, items: &[Sexp], span: Span) -> Result<Expr, CompileError> {
        // Keyword in head position is collection access through the helper
        if let SexpKind::Keyword(key) = &items[0].kind {
            self.expect_len(items, 2, "keyword access expects one argument", &span)?;
            let target = self.lower_expr(&items[1])?;
            let key_expr = Expr::Literal {
                value: Lit::Str(key.clone()),
                span: items[0].span.clone(),
            };
            return Ok(self.dynamic_get(target, key_expr, span));
        }

        let Some(head) = items[0].plain_symbol() else {
            // Computed head: ((f x) y)
            let callee = self.lower_expr(&items[0])?;
            let args = self.lower_exprs(&items[1..])?;
            return Ok(Expr::Call {
                callee: Box::new(callee),
                args,
                span,
            });
        };

        match head {
            "vector" => {
                let items = self
                    .lower_exprs(&items[1..])?
                    .into_iter()
                    .map(ArrayItem::Item)
                    .collect();
                Ok(Expr::Array { items, span })
            }
            "hash-map" => self.lower_map(&items[1..], span),
            "hash-set" => Ok(Expr::SetLit {
                items: self.lower_exprs(&items[1..])?,
                span,
            }),
            "quote" => {
                self.expect_len(items, 2, "expects one form", &span)?;
                Ok(self.lower_quoted(&items[1]))
            }
            "quasiquote" => {
                self.expect_len(items, 2, "expects one form", &span)?;
                self.lower_quasi(&items[1], 1)
            }
            "unquote" | "unquote-splice" => Err(CompileError::transform(
                format!("`{}` outside quasiquote", head),
                span,
            )),
            "if" => {
                if items.len() < 3 || items.len() > 4 {
                    return Err(CompileError::transform("`if` expects 2-3 arguments", span));
                }
                let test = self.lower_expr(&items[1])?;
                let cons = self.lower_expr(&items[2])?;
                let alt = match items.get(3) {
                    Some(alt) => self.lower_expr(alt)?,
                    None => Expr::Literal {
                        value: Lit::Null,
                        span: span.clone(),
                    },
                };
                Ok(Expr::Cond {
                    test: Box::new(test),
                    cons: Box::new(cons),
                    alt: Box::new(alt),
                    span,
                })
            }
            // Expression-position do/let wrap in an IIFE uniformly
            "do" => {
                let body = self.lower_body_value(&items[1..], &span)?;
                Ok(Expr::Iife {
                    body,
                    is_async: false,
                    span,
                })
            }
            "let" => {
                let mut body = self.lower_let_decls(&items[1])?;
                body.extend(self.lower_body_value(&items[2..], &span)?);
                Ok(Expr::Iife {
                    body,
                    is_async: false,
                    span,
                })
            }
            "loop" => self.lower_loop(items, span),
            "recur" => Err(CompileError::transform(
                "`recur` is only valid in the tail of a loop",
                span,
            )),
            "fn" => {
                let func = self.lower_fn_form(items, &span, false)?;
                Ok(Expr::Function {
                    func: Box::new(func),
                    span,
                })
            }
            "async" => {
                self.expect_len(items, 2, "expects a function form", &span)?;
                let inner = items[1].list_items().unwrap_or_default();
                if items[1].head_symbol() != Some("fn") {
                    return Err(CompileError::transform(
                        "`async` expects a `fn` form",
                        items[1].span.clone(),
                    ));
                }
                let func = self.lower_fn_form(inner, &items[1].span, true)?;
                Ok(Expr::Function {
                    func: Box::new(func),
                    span,
                })
            }
            "await" => {
                self.expect_len(items, 2, "expects one argument", &span)?;
                let arg = self.lower_expr(&items[1])?;
                Ok(Expr::Await {
                    arg: Box::new(arg),
                    span,
                })
            }
            "set!" => {
                self.expect_len(items, 3, "expects a target and a value", &span)?;
                let target = self.lower_assign_target(&items[1])?;
                let value = self.lower_expr(&items[2])?;
                Ok(Expr::Assign {
                    target: Box::new(target),
                    value: Box::new(value),
                    span,
                })
            }
            "new" => {
                if items.len() < 2 {
                    return Err(CompileError::transform("`new` expects a constructor", span));
                }
                let callee = self.lower_expr(&items[1])?;
                let args = self.lower_exprs(&items[2..])?;
                Ok(Expr::New {
                    callee: Box::new(callee),
                    args,
                    span,
                })
            }
            "js-get" => {
                self.expect_len(items, 3, "expects an object and a key", &span)?;
                let obj = self.lower_expr(&items[1])?;
                if let Some(prop) = static_key(&items[2]) {
                    return Ok(Expr::Member {
                        obj: Box::new(obj),
                        prop,
                        span,
                    });
                }
                let key = self.lower_expr(&items[2])?;
                // A literal key is a plain subscript; only computed keys go
                // through the null-tolerant helper
                if matches!(
                    items[2].kind,
                    SexpKind::Literal(_) | SexpKind::Keyword(_)
                ) {
                    return Ok(Expr::Index {
                        obj: Box::new(obj),
                        index: Box::new(key),
                        span,
                    });
                }
                Ok(self.dynamic_get(obj, key, span))
            }
            "js-set" => {
                self.expect_len(items, 4, "expects an object, a key, and a value", &span)?;
                let obj = self.lower_expr(&items[1])?;
                let target = if let Some(prop) = static_key(&items[2]) {
                    Expr::Member {
                        obj: Box::new(obj),
                        prop,
                        span: span.clone(),
                    }
                } else {
                    let key = self.lower_expr(&items[2])?;
                    Expr::Index {
                        obj: Box::new(obj),
                        index: Box::new(key),
                        span: span.clone(),
                    }
                };
                let value = self.lower_expr(&items[3])?;
                Ok(Expr::Assign {
                    target: Box::new(target),
                    value: Box::new(value),
                    span,
                })
            }
            "js-call" => {
                if items.len() < 3 {
                    return Err(CompileError::transform(
                        "`js-call` expects an object and a method",
                        span,
                    ));
                }
                let obj = self.lower_expr(&items[1])?;
                let callee = if let Some(prop) = static_key(&items[2]) {
                    Expr::Member {
                        obj: Box::new(obj),
                        prop,
                        span: items[2].span.clone(),
                    }
                } else {
                    let key = self.lower_expr(&items[2])?;
                    Expr::Index {
                        obj: Box::new(obj),
                        index: Box::new(key),
                        span: items[2].span.clone(),
                    }
                };
                let args = self.lower_exprs(&items[3..])?;
                Ok(Expr::Call {
                    callee: Box::new(callee),
                    args,
                    span,
                })
            }
            "typeof" => {
                self.expect_len(items, 2, "expects one argument", &span)?;
                let arg = self.lower_expr(&items[1])?;
                Ok(Expr::Unary {
                    op: UnaryOp::TypeOf,
                    arg: Box::new(arg),
                    span,
                })
            }
            "not" => {
                self.expect_len(items, 2, "expects one argument", &span)?;
                let arg = self.lower_expr(&items[1])?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    arg: Box::new(arg),
                    span,
                })
            }
            "and" | "or" => {
                let op = if head == "and" {
                    LogicalOp::And
                } else {
                    LogicalOp::Or
                };
                let args = self.lower_exprs(&items[1..])?;
                let mut iter = args.into_iter();
                let first = iter.next().ok_or_else(|| {
                    CompileError::transform(format!("`{}` expects arguments", head), span.clone())
                })?;
                Ok(iter.fold(first, |left, right| Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                    span: span.clone(),
                }))
            }
            "+" | "-" | "*" | "/" | "mod" | "=" | "!=" | "<" | ">" | "<=" | ">=" => {
                self.lower_operator(head, &items[1..], span)
            }
            // Statement forms in expression position become IIFEs
            "throw" | "try" | "while" | "for-of" | "label" => {
                let body = match head {
                    "try" => vec![self.lower_try(items, span.clone(), true)?],
                    _ => self.lower_stmt(&Sexp::list(items.to_vec(), span.clone()))?,
                };
                Ok(Expr::Iife {
                    body,
                    is_async: false,
                    span,
                })
            }
            "def" | "var" | "defn" | "class" | "import" | "export" => Err(
                CompileError::transform(
                    format!("`{}` is not allowed in expression position", head),
                    span,
                ),
            ),
            "break" | "continue" => Err(CompileError::transform(
                format!("`{}` is not allowed in expression position", head),
                span,
            )),
            _ => {
                // Plain application
                let callee = self.lower_expr(&items[0])?;
                let args = self.lower_exprs(&items[1..])?;
                Ok(Expr::Call {
                    callee: Box::new(callee),
                    args,
                    span,
                })
            }
        }
    }

    fn lower_exprs(&mut self, forms: &[Sexp]) -> Result<Vec<Expr>, CompileError> {
        forms.iter().map(|f| self.lower_expr(f)).collect()
    }

    fn dynamic_get(&mut self, obj: Expr, key: Expr, span: Span) -> Expr {
        if self.helper_enabled {
            self.uses_get_helper = true;
            Expr::Call {
                callee: Box::new(Expr::Ident {
                    name: "get".to_string(),
                    span: span.clone(),
                }),
                args: vec![obj, key],
                span,
            }
        } else {
            Expr::Index {
                obj: Box::new(obj),
                index: Box::new(key),
                span,
            }
        }
    }

    fn lower_map(&mut self, pairs: &[Sexp], span: Span) -> Result<Expr, CompileError> {
        if pairs.len() % 2 != 0 {
            return Err(CompileError::transform(
                "map literal must have an even number of forms",
                span,
            ));
        }
        let mut props = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks(2) {
            let key = match &pair[0].kind {
                SexpKind::Keyword(name) | SexpKind::Literal(Literal::Str(name)) => {
                    if is_valid_js_ident(name) {
                        PropKey::Ident(name.clone())
                    } else {
                        PropKey::Str(name.clone())
                    }
                }
                SexpKind::Literal(Literal::Int(n)) => PropKey::Str(n.to_string()),
                _ => PropKey::Computed(self.lower_expr(&pair[0])?),
            };
            let value = self.lower_expr(&pair[1])?;
            props.push((key, value));
        }
        Ok(Expr::Object { props, span })
    }

    /// Quoted forms become plain JavaScript data: symbols and keywords to
    /// strings, sequences to arrays, maps to objects.
    fn lower_quoted(&mut self, node: &Sexp) -> Expr {
        let span = node.span.clone();
        match &node.kind {
            SexpKind::Symbol { name, namespace } => {
                let full = match namespace {
                    Some(ns) => format!("{}/{}", ns, name),
                    None => name.clone(),
                };
                Expr::Literal {
                    value: Lit::Str(full),
                    span,
                }
            }
            SexpKind::Keyword(name) => Expr::Literal {
                value: Lit::Str(name.clone()),
                span,
            },
            SexpKind::Literal(lit) => Expr::Literal {
                value: lower_literal(lit),
                span,
            },
            SexpKind::List(items) => {
                let data: &[Sexp] = match items.first().and_then(|h| h.plain_symbol()) {
                    Some("vector") | Some("hash-set") => &items[1..],
                    _ => items,
                };
                Expr::Array {
                    items: data
                        .iter()
                        .map(|i| ArrayItem::Item(self.lower_quoted(i)))
                        .collect(),
                    span,
                }
            }
            // Unnormalised shapes cannot appear after the reader
            _ => Expr::Literal {
                value: Lit::Null,
                span,
            },
        }
    }

    /// Quasiquoted data with unquote holes; splices become array spreads.
    fn lower_quasi(&mut self, node: &Sexp, depth: u32) -> Result<Expr, CompileError> {
        let span = node.span.clone();
        let Some(items) = node.list_items() else {
            return Ok(self.lower_quoted(node));
        };
        match items.first().and_then(|h| h.plain_symbol()) {
            Some("unquote") if items.len() == 2 => {
                if depth == 1 {
                    self.lower_expr(&items[1])
                } else {
                    self.lower_quasi(&items[1], depth - 1)
                }
            }
            Some("quasiquote") if items.len() == 2 => self.lower_quasi(&items[1], depth + 1),
            head => {
                let data: &[Sexp] = match head {
                    Some("vector") | Some("hash-set") => &items[1..],
                    _ => items,
                };
                let mut out = Vec::with_capacity(data.len());
                for item in data {
                    let splice = item
                        .list_items()
                        .filter(|c| c.len() == 2 && c[0].is_symbol("unquote-splice"));
                    match splice {
                        Some(children) if depth == 1 => {
                            out.push(ArrayItem::Spread(self.lower_expr(&children[1])?));
                        }
                        _ => out.push(ArrayItem::Item(self.lower_quasi(item, depth)?)),
                    }
                }
                Ok(Expr::Array { items: out, span })
            }
        }
    }

    fn lower_assign_target(&mut self, node: &Sexp) -> Result<Expr, CompileError> {
        let target = self.lower_expr(node)?;
        match &target {
            Expr::Ident { .. } | Expr::Member { .. } | Expr::Index { .. } => Ok(target),
            _ => Err(CompileError::transform(
                "assignment target must be an identifier or member access",
                node.span.clone(),
            )),
        }
    }

    /// Operator applications fold left; literal operands fold at compile
    /// time.
    fn lower_operator(
        &mut self,
        op: &str,
        args: &[Sexp],
        span: Span,
    ) -> Result<Expr, CompileError> {
        let exprs = self.lower_exprs(args)?;
        if exprs.is_empty() {
            return Err(CompileError::transform(
                format!("`{}` expects at least one argument", op),
                span,
            ));
        }
        let bin_op = match op {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "mod" => BinOp::Mod,
            "=" => BinOp::StrictEq,
            "!=" => BinOp::StrictNe,
            "<" => BinOp::Lt,
            ">" => BinOp::Gt,
            "<=" => BinOp::Le,
            _ => BinOp::Ge,
        };

        let mut iter = exprs.into_iter();
        let first = iter.next().expect("non-empty operand list");

        // Unary minus
        if op == "-" && args.len() == 1 {
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                arg: Box::new(first),
                span,
            });
        }
        if args.len() == 1 && matches!(op, "=" | "!=" | "<" | ">" | "<=" | ">=") {
            return Err(CompileError::transform(
                format!("`{}` expects two arguments", op),
                span,
            ));
        }

        Ok(iter.fold(first, |left, right| {
            fold_literals(bin_op, &left, &right, &span).unwrap_or_else(|| Expr::Binary {
                op: bin_op,
                left: Box::new(left),
                right: Box::new(right),
                span: span.clone(),
            })
        }))
    }

    // ========================================================================
    // Functions, loops, patterns
    // ========================================================================

    /// `(fn name? params body...)` into a function value.
    fn lower_fn_form(
        &mut self,
        items: &[Sexp],
        span: &Span,
        is_async: bool,
    ) -> Result<Function, CompileError> {
        let named = items.len() > 2 && items[1].plain_symbol().is_some();
        let params_index = if named { 2 } else { 1 };
        if items.len() <= params_index {
            return Err(CompileError::transform(
                "`fn` expects a parameter list",
                span.clone(),
            ));
        }
        let name = if named {
            let sym = items[1].plain_symbol().expect("checked symbol");
            Some(self.names.resolve(sym, &items[1].span)?)
        } else {
            None
        };
        self.lower_function(name, &items[params_index], &items[params_index + 1..], is_async)
    }

    fn lower_function(
        &mut self,
        name: Option<String>,
        params_node: &Sexp,
        body_forms: &[Sexp],
        is_async: bool,
    ) -> Result<Function, CompileError> {
        let params = self.lower_params(params_node)?;
        // A function body is its own loop universe
        let saved = std::mem::take(&mut self.loops);
        let body = self.lower_body_value(body_forms, &params_node.span)?;
        self.loops = saved;
        Ok(Function {
            name,
            params,
            body,
            is_async,
            is_arrow: false,
        })
    }

    /// Parameter list items: symbols, `&`/`...name` rest, `=` defaults,
    /// destructuring patterns.
    fn lower_params(&mut self, params_node: &Sexp) -> Result<Vec<Param>, CompileError> {
        let items = crate::interp::seq_children(params_node).ok_or_else(|| {
            CompileError::transform(
                "parameter list must be a list or vector",
                params_node.span.clone(),
            )
        })?;

        let mut params: Vec<Param> = Vec::new();
        let mut i = 0;
        while i < items.len() {
            let item = &items[i];
            if item.is_symbol("&") {
                let rest_node = items.get(i + 1).ok_or_else(|| {
                    CompileError::transform(
                        "`&` must be followed by a rest parameter",
                        item.span.clone(),
                    )
                })?;
                params.push(Param {
                    pattern: self.lower_pattern(rest_node)?,
                    default: None,
                    rest: true,
                });
                i += 2;
                continue;
            }
            if item.is_symbol("=") {
                let default_node = items.get(i + 1).ok_or_else(|| {
                    CompileError::transform(
                        "`=` must be followed by a default value",
                        item.span.clone(),
                    )
                })?;
                let last = params.last_mut().ok_or_else(|| {
                    CompileError::transform(
                        "`=` needs a preceding parameter",
                        item.span.clone(),
                    )
                })?;
                last.default = Some(self.lower_expr(default_node)?);
                i += 2;
                continue;
            }
            if let Some(name) = item.plain_symbol() {
                if let Some(rest_name) = name.strip_prefix("...") {
                    let resolved = self.names.resolve(rest_name, &item.span)?;
                    params.push(Param {
                        pattern: Pattern::Ident {
                            name: resolved,
                            span: item.span.clone(),
                        },
                        default: None,
                        rest: true,
                    });
                    i += 1;
                    continue;
                }
            }
            params.push(Param {
                pattern: self.lower_pattern(item)?,
                default: None,
                rest: false,
            });
            i += 1;
        }
        Ok(params)
    }

    fn lower_pattern(&mut self, node: &Sexp) -> Result<Pattern, CompileError> {
        let span = node.span.clone();
        match &node.kind {
            SexpKind::Symbol {
                name,
                namespace: None,
            } => {
                let resolved = self.names.resolve(name, &span)?;
                Ok(Pattern::Ident {
                    name: resolved,
                    span,
                })
            }
            SexpKind::List(items) => match items.first().and_then(|h| h.plain_symbol()) {
                Some("vector") => {
                    let mut patterns = Vec::new();
                    let mut rest = None;
                    let mut iter = items[1..].iter().peekable();
                    while let Some(item) = iter.next() {
                        if item.is_symbol("&") {
                            let rest_node = iter.next().ok_or_else(|| {
                                CompileError::transform(
                                    "`&` must be followed by a rest pattern",
                                    item.span.clone(),
                                )
                            })?;
                            rest = Some(Box::new(self.lower_pattern(rest_node)?));
                            break;
                        }
                        if let Some(name) = item.plain_symbol() {
                            if let Some(rest_name) = name.strip_prefix("...") {
                                let resolved = self.names.resolve(rest_name, &item.span)?;
                                rest = Some(Box::new(Pattern::Ident {
                                    name: resolved,
                                    span: item.span.clone(),
                                }));
                                break;
                            }
                        }
                        patterns.push(self.lower_pattern(item)?);
                    }
                    Ok(Pattern::Array {
                        items: patterns,
                        rest,
                        span,
                    })
                }
                Some("hash-map") => {
                    let pairs = &items[1..];
                    if pairs.len() % 2 != 0 {
                        return Err(CompileError::transform(
                            "map pattern must have key/pattern pairs",
                            span,
                        ));
                    }
                    let mut props = Vec::new();
                    for pair in pairs.chunks(2) {
                        let key = match &pair[0].kind {
                            SexpKind::Keyword(name)
                            | SexpKind::Literal(Literal::Str(name)) => name.clone(),
                            _ => {
                                return Err(CompileError::transform(
                                    "map pattern keys must be keywords or strings",
                                    pair[0].span.clone(),
                                ))
                            }
                        };
                        props.push((key, self.lower_pattern(&pair[1])?));
                    }
                    Ok(Pattern::Object { props, span })
                }
                _ => Err(CompileError::transform(
                    "unsupported binding pattern",
                    span,
                )),
            },
            _ => Err(CompileError::transform("unsupported binding pattern", span)),
        }
    }

    /// `(loop (bindings) body)` lowers to an IIFE with mutable bindings
    /// and `while (true)`; `recur` in tail position reassigns and
    /// continues.
    fn lower_loop(&mut self, items: &[Sexp], span: Span) -> Result<Expr, CompileError> {
        if items.len() < 2 {
            return Err(CompileError::transform(
                "`loop` expects a binding list",
                span,
            ));
        }
        let pairs = crate::interp::seq_children(&items[1]).ok_or_else(|| {
            CompileError::transform("`loop` bindings must be a list", items[1].span.clone())
        })?;
        if pairs.len() % 2 != 0 {
            return Err(CompileError::transform(
                "`loop` bindings must come in name/value pairs",
                items[1].span.clone(),
            ));
        }

        let mut body = Vec::new();
        let mut binders = Vec::new();
        for pair in pairs.chunks(2) {
            let name = pair[0].plain_symbol().ok_or_else(|| {
                CompileError::transform(
                    "`loop` binding names must be symbols",
                    pair[0].span.clone(),
                )
            })?;
            let resolved = self.names.resolve(name, &pair[0].span)?;
            let init = self.lower_expr(&pair[1])?;
            body.push(Stmt::Decl {
                kind: DeclKind::Let,
                pattern: Pattern::Ident {
                    name: resolved.clone(),
                    span: pair[0].span.clone(),
                },
                init: Some(init),
                span: pair[0].span.merge(&pair[1].span),
            });
            binders.push(resolved);
        }

        self.loops.push(LoopCtx { binders });
        let loop_body = self.lower_loop_body(&items[2..]);
        self.loops.pop();
        body.push(Stmt::While {
            test: Expr::Literal {
                value: Lit::Bool(true),
                span: span.clone(),
            },
            body: loop_body?,
            span: span.clone(),
        });
        Ok(Expr::Iife {
            body,
            is_async: false,
            span,
        })
    }

    fn lower_loop_body(&mut self, forms: &[Sexp]) -> Result<Vec<Stmt>, CompileError> {
        let Some((last, init)) = forms.split_last() else {
            return Ok(Vec::new());
        };
        let mut out = self.lower_stmts(init)?;
        out.extend(self.lower_loop_tail(last)?);
        Ok(out)
    }

    /// Tail of a loop body: `recur` reassigns the binders and continues;
    /// branching tails thread the treatment down; anything else returns.
    fn lower_loop_tail(&mut self, node: &Sexp) -> Result<Vec<Stmt>, CompileError> {
        let span = node.span.clone();
        let items = node.list_items().unwrap_or_default();
        match node.head_symbol() {
            Some("recur") => {
                let binders = self
                    .loops
                    .last()
                    .map(|c| c.binders.clone())
                    .unwrap_or_default();
                let args = &items[1..];
                if args.len() != binders.len() {
                    return Err(CompileError::transform(
                        format!(
                            "`recur` expects {} argument(s), got {}",
                            binders.len(),
                            args.len()
                        ),
                        span,
                    ));
                }
                let mut out = Vec::new();
                // Bind new values to temporaries first so reassignment is
                // effectively simultaneous
                let mut temps = Vec::new();
                for arg in args {
                    let temp = self.fresh_temp();
                    let init = self.lower_expr(arg)?;
                    out.push(Stmt::Decl {
                        kind: DeclKind::Const,
                        pattern: Pattern::Ident {
                            name: temp.clone(),
                            span: arg.span.clone(),
                        },
                        init: Some(init),
                        span: arg.span.clone(),
                    });
                    temps.push((temp, arg.span.clone()));
                }
                for (binder, (temp, arg_span)) in binders.iter().zip(temps) {
                    out.push(Stmt::Expr {
                        expr: Expr::Assign {
                            target: Box::new(Expr::Ident {
                                name: binder.clone(),
                                span: arg_span.clone(),
                            }),
                            value: Box::new(Expr::Ident {
                                name: temp,
                                span: arg_span.clone(),
                            }),
                            span: arg_span.clone(),
                        },
                        span: arg_span,
                    });
                }
                out.push(Stmt::Continue { label: None, span });
                Ok(out)
            }
            Some("if") if items.len() >= 3 => {
                let test = self.lower_expr(&items[1])?;
                let cons = self.lower_loop_tail(&items[2])?;
                let alt = match items.get(3) {
                    Some(alt) => Some(self.lower_loop_tail(alt)?),
                    None => None,
                };
                Ok(vec![Stmt::If {
                    test,
                    cons,
                    alt,
                    span,
                }])
            }
            Some("do") => self.lower_loop_body(&items[1..]),
            Some("let") if items.len() >= 2 => {
                let mut body = self.lower_let_decls(&items[1])?;
                body.extend(self.lower_loop_body(&items[2..])?);
                Ok(vec![Stmt::Block { body, span }])
            }
            _ => {
                let arg = self.lower_expr(node)?;
                Ok(vec![Stmt::Return {
                    arg: Some(arg),
                    span,
                }])
            }
        }
    }

    // ========================================================================
    // Modules and classes
    // ========================================================================

    fn lower_import(&mut self, items: &[Sexp], span: Span) -> Result<Stmt, CompileError> {
        let malformed = || {
            CompileError::import("malformed import form", span.clone()).with_suggestion(
                "use (import name from \"path\"), (import [a b as c] from \"path\"), \
                 or (import * as ns from \"path\")",
            )
        };

        // (import * as name from "path")
        if items.len() == 6 && items[1].is_symbol("*") && items[2].is_symbol("as") {
            if !items[4].is_symbol("from") {
                return Err(malformed());
            }
            let name = items[3].plain_symbol().ok_or_else(|| malformed())?;
            let local = self.names.resolve(name, &items[3].span)?;
            let specifier = string_value(&items[5]).ok_or_else(|| malformed())?;
            return Ok(Stmt::Import {
                specifier,
                kind: ImportKind::Namespace(local),
                span,
            });
        }

        if items.len() != 4 || !items[2].is_symbol("from") {
            return Err(malformed());
        }
        let specifier = string_value(&items[3]).ok_or_else(|| malformed())?;

        // (import [a b as c] from "path")
        if items[1].head_symbol() == Some("vector") {
            let entries = &items[1].list_items().unwrap_or_default()[1..];
            let mut names = Vec::new();
            let mut i = 0;
            while i < entries.len() {
                let imported = entries[i].plain_symbol().ok_or_else(|| malformed())?;
                if imported == "as" {
                    return Err(malformed());
                }
                let mut binding = ImportBinding {
                    imported: imported.to_string(),
                    local: None,
                };
                if entries.get(i + 1).is_some_and(|e| e.is_symbol("as")) {
                    let alias_node = entries.get(i + 2).ok_or_else(|| malformed())?;
                    let alias = alias_node.plain_symbol().ok_or_else(|| malformed())?;
                    binding.local = Some(self.names.resolve(alias, &alias_node.span)?);
                    i += 3;
                } else {
                    self.names.resolve(imported, &entries[i].span)?;
                    i += 1;
                }
                names.push(binding);
            }
            return Ok(Stmt::Import {
                specifier,
                kind: ImportKind::Named(names),
                span,
            });
        }

        // (import name from "path")
        let name = items[1].plain_symbol().ok_or_else(|| malformed())?;
        let local = self.names.resolve(name, &items[1].span)?;
        Ok(Stmt::Import {
            specifier,
            kind: ImportKind::Default(local),
            span,
        })
    }

    fn lower_export(&mut self, items: &[Sexp], span: Span) -> Result<Stmt, CompileError> {
        if items.len() == 3 && items[1].is_symbol("default") {
            let expr = self.lower_expr(&items[2])?;
            return Ok(Stmt::ExportDefault { expr, span });
        }
        if items.len() == 2 && items[1].head_symbol() == Some("vector") {
            let entries = &items[1].list_items().unwrap_or_default()[1..];
            let mut names = Vec::new();
            for entry in entries {
                let name = entry.plain_symbol().ok_or_else(|| {
                    CompileError::transform("export names must be symbols", entry.span.clone())
                })?;
                names.push(ImportBinding {
                    imported: self.names.resolve(name, &entry.span)?,
                    local: None,
                });
            }
            return Ok(Stmt::ExportNamed { names, span });
        }
        Err(CompileError::transform(
            "malformed export form",
            span,
        )
        .with_suggestion("use (export default expr) or (export [a b])"))
    }

    fn lower_class(&mut self, items: &[Sexp], span: Span) -> Result<Stmt, CompileError> {
        if items.len() < 2 {
            return Err(CompileError::transform("`class` expects a name", span));
        }
        let name_sym = items[1].plain_symbol().ok_or_else(|| {
            CompileError::transform("class name must be a symbol", items[1].span.clone())
        })?;
        let name = self.names.resolve(name_sym, &items[1].span)?;

        let mut superclass = None;
        let mut members = Vec::new();
        for form in &items[2..] {
            match form.head_symbol() {
                Some("extends") => {
                    let clause = form.list_items().unwrap_or_default();
                    if clause.len() != 2 {
                        return Err(CompileError::transform(
                            "`extends` expects one superclass",
                            form.span.clone(),
                        ));
                    }
                    superclass = Some(self.lower_expr(&clause[1])?);
                }
                Some("constructor") => {
                    let clause = form.list_items().unwrap_or_default();
                    if clause.len() < 2 {
                        return Err(CompileError::transform(
                            "`constructor` expects a parameter list",
                            form.span.clone(),
                        ));
                    }
                    // Constructors have no return value; the body stays
                    // a statement sequence
                    let params = self.lower_params(&clause[1])?;
                    let body = self.lower_stmts(&clause[2..])?;
                    let func = Function {
                        name: None,
                        params,
                        body,
                        is_async: false,
                        is_arrow: false,
                    };
                    members.push(ClassMember {
                        is_constructor: true,
                        name: "constructor".to_string(),
                        func,
                        span: form.span.clone(),
                    });
                }
                Some("method") => {
                    let clause = form.list_items().unwrap_or_default();
                    if clause.len() < 3 {
                        return Err(CompileError::transform(
                            "`method` expects a name and a parameter list",
                            form.span.clone(),
                        ));
                    }
                    let method_name = clause[1].plain_symbol().ok_or_else(|| {
                        CompileError::transform(
                            "method name must be a symbol",
                            clause[1].span.clone(),
                        )
                    })?;
                    let func = self.lower_function(None, &clause[2], &clause[3..], false)?;
                    members.push(ClassMember {
                        is_constructor: false,
                        name: sanitize(method_name),
                        func,
                        span: form.span.clone(),
                    });
                }
                _ => {
                    return Err(CompileError::transform(
                        "class body may contain only constructor and method forms",
                        form.span.clone(),
                    ))
                }
            }
        }
        Ok(Stmt::ClassDecl {
            name,
            superclass,
            members,
            span,
        })
    }

    fn expect_len(
        &self,
        items: &[Sexp],
        len: usize,
        message: &str,
        span: &Span,
    ) -> Result<(), CompileError> {
        if items.len() != len {
            let head = items[0]
                .plain_symbol()
                .map(|s| format!("`{}` ", s))
                .unwrap_or_default();
            return Err(CompileError::transform(
                format!("{}{}", head, message),
                span.clone(),
            ));
        }
        Ok(())
    }
}

fn lower_literal(lit: &Literal) -> Lit {
    match lit {
        Literal::Int(n) => Lit::Int(*n),
        Literal::Float(n) => Lit::Float(*n),
        Literal::Str(s) => Lit::Str(s.clone()),
        Literal::Bool(b) => Lit::Bool(*b),
        Literal::Null => Lit::Null,
    }
}

fn string_value(node: &Sexp) -> Option<String> {
    match &node.kind {
        SexpKind::Literal(Literal::Str(s)) => Some(s.clone()),
        _ => None,
    }
}

/// A string-literal key that can be emitted as `.prop`.
fn static_key(node: &Sexp) -> Option<String> {
    match &node.kind {
        SexpKind::Literal(Literal::Str(s)) if is_valid_js_ident(s) => Some(s.clone()),
        _ => None,
    }
}

/// Constant folding of literal operands, the only optimisation performed.
fn fold_literals(op: BinOp, left: &Expr, right: &Expr, span: &Span) -> Option<Expr> {
    let (Expr::Literal { value: l, .. }, Expr::Literal { value: r, .. }) = (left, right) else {
        return None;
    };
    let value = match (op, l, r) {
        (BinOp::Add, Lit::Int(a), Lit::Int(b)) => Lit::Int(a.checked_add(*b)?),
        (BinOp::Sub, Lit::Int(a), Lit::Int(b)) => Lit::Int(a.checked_sub(*b)?),
        (BinOp::Mul, Lit::Int(a), Lit::Int(b)) => Lit::Int(a.checked_mul(*b)?),
        (BinOp::Add, Lit::Float(a), Lit::Float(b)) => Lit::Float(a + b),
        (BinOp::Add, Lit::Str(a), Lit::Str(b)) => Lit::Str(format!("{}{}", a, b)),
        _ => return None,
    };
    Some(Expr::Literal {
        value,
        span: span.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::{expand, seed_environment};
    use crate::lexer::lex;
    use crate::reader::read_all;

    fn lower_source(source: &str) -> Result<Lowered, CompileError> {
        let lexed = lex(source, "t.hql").unwrap();
        let forms = read_all(&lexed.tokens, "t.hql").unwrap();
        let env = seed_environment().unwrap();
        let expanded: Result<Vec<Sexp>, CompileError> = forms
            .into_iter()
            .map(|f| expand(f.normalize(), &env))
            .collect();
        lower_program(&expanded?, true)
    }

    fn first_stmt(source: &str) -> Stmt {
        lower_source(source).unwrap().program.body.remove(0)
    }

    #[test]
    fn test_sanitize_rules() {
        assert_eq!(sanitize("foo-bar"), "foo_bar");
        assert_eq!(sanitize("nil?"), "nil_");
        assert_eq!(sanitize("set!"), "set_");
        assert_eq!(sanitize("a--b"), "a_b");
        assert_eq!(sanitize("1two"), "_1two");
        assert_eq!(sanitize("class"), "class_");
        assert_eq!(sanitize("plain"), "plain");
    }

    #[test]
    fn test_sanitize_idempotent() {
        for name in ["foo-bar", "nil?", "1two", "class", "a__b", "x*y"] {
            let once = sanitize(name);
            assert_eq!(sanitize(&once), once);
        }
    }

    #[test]
    fn test_sanitize_collision_is_codegen_error() {
        let err = lower_source("(def foo-bar 1) (def foo_bar 2)").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::CodeGen);
        assert!(err.message.contains("foo_bar"));
    }

    #[test]
    fn test_def_lowers_to_const() {
        match first_stmt("(def answer 42)") {
            Stmt::Decl { kind, pattern, init, .. } => {
                assert_eq!(kind, DeclKind::Const);
                assert!(matches!(pattern, Pattern::Ident { name, .. } if name == "answer"));
                assert!(matches!(
                    init,
                    Some(Expr::Literal { value: Lit::Int(42), .. })
                ));
            }
            other => panic!("Expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_var_lowers_to_let() {
        assert!(matches!(
            first_stmt("(var counter 0)"),
            Stmt::Decl { kind: DeclKind::Let, .. }
        ));
    }

    #[test]
    fn test_if_expression_is_ternary() {
        match first_stmt("(def x (if c 1 2))") {
            Stmt::Decl { init: Some(Expr::Cond { .. }), .. } => {}
            other => panic!("Expected ternary initialiser, got {:?}", other),
        }
    }

    #[test]
    fn test_do_in_expression_position_is_iife() {
        match first_stmt("(def x (do (f) 2))") {
            Stmt::Decl { init: Some(Expr::Iife { body, .. }), .. } => {
                assert!(matches!(body.last(), Some(Stmt::Return { .. })));
            }
            other => panic!("Expected IIFE initialiser, got {:?}", other),
        }
    }

    #[test]
    fn test_fn_params_rest_and_defaults() {
        let stmt = first_stmt("(defn f [a b = 5 ...rest] a)");
        match stmt {
            Stmt::FuncDecl { func, .. } => {
                assert_eq!(func.params.len(), 3);
                assert!(func.params[1].default.is_some());
                assert!(func.params[2].rest);
                assert!(matches!(func.body.last(), Some(Stmt::Return { .. })));
            }
            other => panic!("Expected function declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_dotted_symbol_is_member_chain() {
        match first_stmt("(def v a.b.c)") {
            Stmt::Decl { init: Some(Expr::Member { obj, prop, .. }), .. } => {
                assert_eq!(prop, "c");
                assert!(matches!(*obj, Expr::Member { .. }));
            }
            other => panic!("Expected member chain, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_folding() {
        // Literals fold; mixed operands do not
        match first_stmt("(def x (+ 1 2))") {
            Stmt::Decl { init: Some(Expr::Literal { value: Lit::Int(3), .. }), .. } => {}
            other => panic!("Expected folded literal, got {:?}", other),
        }
        match first_stmt("(def x (+ 1 y))") {
            Stmt::Decl { init: Some(Expr::Binary { op: BinOp::Add, .. }), .. } => {}
            other => panic!("Expected binary add, got {:?}", other),
        }
    }

    #[test]
    fn test_equals_is_strict() {
        match first_stmt("(def x (= a b))") {
            Stmt::Decl { init: Some(Expr::Binary { op, .. }), .. } => {
                assert_eq!(op, BinOp::StrictEq);
            }
            other => panic!("Expected strict equality, got {:?}", other),
        }
    }

    #[test]
    fn test_js_get_static_and_dynamic() {
        match first_stmt("(def x (js-get o \"length\"))") {
            Stmt::Decl { init: Some(Expr::Member { prop, .. }), .. } => {
                assert_eq!(prop, "length");
            }
            other => panic!("Expected static member, got {:?}", other),
        }
        // Computed keys route through the helper
        let lowered = lower_source("(def x (js-get o k))").unwrap();
        assert!(lowered.uses_get_helper);
        match &lowered.program.body[0] {
            Stmt::Decl { init: Some(Expr::Call { callee, .. }), .. } => {
                assert!(matches!(&**callee, Expr::Ident { name, .. } if name == "get"));
            }
            other => panic!("Expected helper call, got {:?}", other),
        }
    }

    #[test]
    fn test_keyword_access_uses_helper() {
        let lowered = lower_source("(def x (:title book))").unwrap();
        assert!(lowered.uses_get_helper);
    }

    #[test]
    fn test_helper_disabled_uses_index() {
        let lexed = lex("(def x (js-get o k))", "t.hql").unwrap();
        let forms = read_all(&lexed.tokens, "t.hql").unwrap();
        let env = seed_environment().unwrap();
        let expanded: Vec<Sexp> = forms
            .into_iter()
            .map(|f| expand(f.normalize(), &env).unwrap())
            .collect();
        let lowered = lower_program(&expanded, false).unwrap();
        assert!(!lowered.uses_get_helper);
        assert!(matches!(
            &lowered.program.body[0],
            Stmt::Decl { init: Some(Expr::Index { .. }), .. }
        ));
    }

    #[test]
    fn test_import_forms() {
        match first_stmt("(import path from \"node:path\")") {
            Stmt::Import { specifier, kind: ImportKind::Default(name), .. } => {
                assert_eq!(specifier, "node:path");
                assert_eq!(name, "path");
            }
            other => panic!("Expected default import, got {:?}", other),
        }
        match first_stmt("(import [join resolve as res] from \"node:path\")") {
            Stmt::Import { kind: ImportKind::Named(names), .. } => {
                assert_eq!(names.len(), 2);
                assert_eq!(names[0].imported, "join");
                assert_eq!(names[1].local.as_deref(), Some("res"));
            }
            other => panic!("Expected named import, got {:?}", other),
        }
        match first_stmt("(import * as fs from \"node:fs\")") {
            Stmt::Import { kind: ImportKind::Namespace(name), .. } => assert_eq!(name, "fs"),
            other => panic!("Expected namespace import, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_import_is_import_error() {
        let err = lower_source("(import a b)").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Import);
    }

    #[test]
    fn test_declaration_in_expression_position() {
        let err = lower_source("(f (def x 1))").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Transform);
    }

    #[test]
    fn test_loop_recur() {
        match first_stmt("(def x (loop (i 0) (if (< i 10) (recur (+ i 1)) i)))") {
            Stmt::Decl { init: Some(Expr::Iife { body, .. }), .. } => {
                assert!(matches!(body[0], Stmt::Decl { kind: DeclKind::Let, .. }));
                match body.last() {
                    Some(Stmt::While { test, body, .. }) => {
                        assert!(matches!(test, Expr::Literal { value: Lit::Bool(true), .. }));
                        // Tail if: recur arm ends in continue, other in return
                        match &body[0] {
                            Stmt::If { cons, alt, .. } => {
                                assert!(matches!(cons.last(), Some(Stmt::Continue { .. })));
                                assert!(matches!(
                                    alt.as_ref().unwrap().last(),
                                    Some(Stmt::Return { .. })
                                ));
                            }
                            other => panic!("Expected if in loop body, got {:?}", other),
                        }
                    }
                    other => panic!("Expected while, got {:?}", other),
                }
            }
            other => panic!("Expected loop IIFE, got {:?}", other),
        }
    }

    #[test]
    fn test_recur_outside_loop_fails() {
        let err = lower_source("(def x (recur 1))").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Transform);
    }

    #[test]
    fn test_destructuring_let() {
        match first_stmt("(def f (fn [p] (let ([a b & more] p) a)))") {
            Stmt::Decl { init: Some(Expr::Function { func, .. }), .. } => {
                match &func.body[0] {
                    Stmt::Decl { pattern: Pattern::Array { items, rest, .. }, .. } => {
                        assert_eq!(items.len(), 2);
                        assert!(rest.is_some());
                    }
                    other => panic!("Expected array pattern, got {:?}", other),
                }
            }
            other => panic!("Expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_class_lowering() {
        let stmt = first_stmt(
            "(class Point (constructor [x y] (set! this.x x) (set! this.y y)) \
             (method norm [] (+ this.x this.y)))",
        );
        match stmt {
            Stmt::ClassDecl { name, members, superclass, .. } => {
                assert_eq!(name, "Point");
                assert!(superclass.is_none());
                assert_eq!(members.len(), 2);
                assert!(members[0].is_constructor);
                assert_eq!(members[1].name, "norm");
            }
            other => panic!("Expected class declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_quote_becomes_data() {
        match first_stmt("(def x '(a 1 [2 3]))") {
            Stmt::Decl { init: Some(Expr::Array { items, .. }), .. } => {
                assert_eq!(items.len(), 3);
                assert!(matches!(
                    &items[0],
                    ArrayItem::Item(Expr::Literal { value: Lit::Str(s), .. }) if s == "a"
                ));
            }
            other => panic!("Expected array literal, got {:?}", other),
        }
    }

    #[test]
    fn test_quasiquote_splice_becomes_spread() {
        match first_stmt("(def x `(1 ~@xs))") {
            Stmt::Decl { init: Some(Expr::Array { items, .. }), .. } => {
                assert!(matches!(items[1], ArrayItem::Spread(_)));
            }
            other => panic!("Expected spread array, got {:?}", other),
        }
    }

    #[test]
    fn test_same_symbol_same_identifier() {
        let lowered = lower_source("(def my-var 1) (def other my-var)").unwrap();
        match &lowered.program.body[1] {
            Stmt::Decl { init: Some(Expr::Ident { name, .. }), .. } => {
                assert_eq!(name, "my_var");
            }
            other => panic!("Expected identifier reference, got {:?}", other),
        }
    }
}
