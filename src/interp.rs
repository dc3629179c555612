// ABOUTME: Tree-walking interpreter evaluating macro transformer bodies at compile time

use crate::ast::{Literal, Sexp, SexpKind};
use crate::env::{Binding, Environment};
use crate::error::CompileError;
use crate::span::Span;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter backing auto-gensym. Shared, atomic, never reset: expansions
/// across a process must not collide.
static GENSYM_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Values produced while evaluating a macro body: AST fragments, or
/// closures created by `fn` inside the body.
#[derive(Debug, Clone)]
pub enum Value {
    Node(Sexp),
    Closure(Rc<Closure>),
}

#[derive(Debug)]
pub struct Closure {
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Vec<Sexp>,
    pub env: Rc<Environment>,
}

/// One macro-expansion evaluation. Auto-gensym names are scoped to a
/// single expansion: each distinct `name#` maps to one fresh identifier.
pub struct Interp {
    gensyms: HashMap<String, String>,
}

/// JS-flavoured truthiness: `false` and `null` are falsey.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Node(node) => !matches!(
            node.kind,
            SexpKind::Literal(Literal::Bool(false)) | SexpKind::Literal(Literal::Null)
        ),
        Value::Closure(_) => true,
    }
}

/// The elements a list denotes as a sequence: a `vector`-headed
/// normalised list counts its payload, a plain list all its children.
pub fn seq_children(node: &Sexp) -> Option<&[Sexp]> {
    let items = node.list_items()?;
    match items.first() {
        Some(head) if head.is_symbol("vector") || head.is_symbol("hash-set") => Some(&items[1..]),
        _ => Some(items),
    }
}

/// Parse a parameter list (plain or vector form): symbols, with `&` or a
/// `...name` spelling introducing the rest parameter.
pub fn parse_params(list: &Sexp) -> Result<(Vec<String>, Option<String>), CompileError> {
    let items = seq_children(list).ok_or_else(|| {
        CompileError::macro_error("parameter list must be a list or vector", list.span.clone())
    })?;

    let mut params = Vec::new();
    let mut rest = None;
    let mut iter = items.iter().peekable();
    while let Some(item) = iter.next() {
        let name = item.plain_symbol().ok_or_else(|| {
            CompileError::macro_error("parameter must be a symbol", item.span.clone())
        })?;
        if name == "&" {
            let rest_item = iter.next().ok_or_else(|| {
                CompileError::macro_error("`&` must be followed by a rest name", item.span.clone())
            })?;
            let rest_name = rest_item.plain_symbol().ok_or_else(|| {
                CompileError::macro_error("rest parameter must be a symbol", rest_item.span.clone())
            })?;
            rest = Some(rest_name.to_string());
            break;
        }
        if let Some(stripped) = name.strip_prefix("...") {
            rest = Some(stripped.to_string());
            break;
        }
        params.push(name.to_string());
    }
    Ok((params, rest))
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

impl Interp {
    pub fn new() -> Self {
        Interp {
            gensyms: HashMap::new(),
        }
    }

    /// Evaluate one form against the compile-time environment.
    pub fn eval(&mut self, node: &Sexp, env: &Rc<Environment>) -> Result<Value, CompileError> {
        match &node.kind {
            SexpKind::Literal(_) | SexpKind::Keyword(_) => Ok(Value::Node(node.clone())),
            SexpKind::Symbol {
                name,
                namespace: None,
            } => match env.lookup(name) {
                Some(Binding::Value(value)) => Ok(value),
                _ => Err(CompileError::macro_error(
                    format!("undefined symbol `{}` in macro body", name),
                    node.span.clone(),
                )),
            },
            SexpKind::Symbol { name, .. } => Err(CompileError::macro_error(
                format!("undefined symbol `{}` in macro body", name),
                node.span.clone(),
            )),
            SexpKind::List(items) if items.is_empty() => Ok(Value::Node(node.clone())),
            SexpKind::List(items) => self.eval_list(node, items, env),
            // The interpreter runs on normalised ASTs only
            _ => Err(CompileError::macro_error(
                "unnormalised form in macro body",
                node.span.clone(),
            )),
        }
    }

    fn eval_list(
        &mut self,
        node: &Sexp,
        items: &[Sexp],
        env: &Rc<Environment>,
    ) -> Result<Value, CompileError> {
        let args = &items[1..];
        if let Some(head) = items[0].plain_symbol() {
            match head {
                "quote" => {
                    self.expect_arity(head, args, 1, &node.span)?;
                    return Ok(Value::Node(args[0].clone()));
                }
                "quasiquote" => {
                    self.expect_arity(head, args, 1, &node.span)?;
                    return Ok(Value::Node(self.eval_quasiquote(&args[0], 1, env)?));
                }
                "unquote" | "unquote-splice" => {
                    return Err(CompileError::macro_error(
                        format!("`{}` outside quasiquote", head),
                        node.span.clone(),
                    ));
                }
                "if" => {
                    if args.len() < 2 || args.len() > 3 {
                        return Err(CompileError::macro_error(
                            format!("`if` expects 2-3 arguments, got {}", args.len()),
                            node.span.clone(),
                        ));
                    }
                    let test = self.eval(&args[0], env)?;
                    return if truthy(&test) {
                        self.eval(&args[1], env)
                    } else if let Some(alt) = args.get(2) {
                        self.eval(alt, env)
                    } else {
                        Ok(Value::Node(Sexp::null(node.span.clone())))
                    };
                }
                "cond" => return self.eval_cond(node, args, env),
                "do" => {
                    let mut last = Value::Node(Sexp::null(node.span.clone()));
                    for form in args {
                        last = self.eval(form, env)?;
                    }
                    return Ok(last);
                }
                "let" => return self.eval_let(node, args, env),
                "fn" => return self.eval_fn(node, args, env),
                "throw" => {
                    self.expect_arity(head, args, 1, &node.span)?;
                    let value = self.eval(&args[0], env)?;
                    return Err(CompileError::macro_error(
                        format!("macro raised: {}", render(&value)),
                        node.span.clone(),
                    ));
                }
                "and" => {
                    let mut last = Value::Node(Sexp::literal(
                        Literal::Bool(true),
                        node.span.clone(),
                    ));
                    for form in args {
                        last = self.eval(form, env)?;
                        if !truthy(&last) {
                            return Ok(last);
                        }
                    }
                    return Ok(last);
                }
                "or" => {
                    let mut last = Value::Node(Sexp::null(node.span.clone()));
                    for form in args {
                        last = self.eval(form, env)?;
                        if truthy(&last) {
                            return Ok(last);
                        }
                    }
                    return Ok(last);
                }
                "not" => {
                    self.expect_arity(head, args, 1, &node.span)?;
                    let value = self.eval(&args[0], env)?;
                    return Ok(Value::Node(Sexp::literal(
                        Literal::Bool(!truthy(&value)),
                        node.span.clone(),
                    )));
                }
                _ if BUILTINS.contains(&head) => {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.eval(arg, env)?);
                    }
                    return apply_builtin(head, &values, &node.span);
                }
                _ => {}
            }
        }

        // Application of a closure value
        let callee = self.eval(&items[0], env)?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, env)?);
        }
        self.apply(callee, values, &node.span)
    }

    fn eval_cond(
        &mut self,
        node: &Sexp,
        args: &[Sexp],
        env: &Rc<Environment>,
    ) -> Result<Value, CompileError> {
        let mut i = 0;
        while i < args.len() {
            // An odd trailing form is the default arm
            if i + 1 == args.len() {
                return self.eval(&args[i], env);
            }
            let test = self.eval(&args[i], env)?;
            if truthy(&test) {
                return self.eval(&args[i + 1], env);
            }
            i += 2;
        }
        Ok(Value::Node(Sexp::null(node.span.clone())))
    }

    fn eval_let(
        &mut self,
        node: &Sexp,
        args: &[Sexp],
        env: &Rc<Environment>,
    ) -> Result<Value, CompileError> {
        let bindings = args.first().ok_or_else(|| {
            CompileError::macro_error("`let` expects a binding list", node.span.clone())
        })?;
        let pairs = seq_children(bindings).ok_or_else(|| {
            CompileError::macro_error("`let` bindings must be a list", bindings.span.clone())
        })?;
        if pairs.len() % 2 != 0 {
            return Err(CompileError::macro_error(
                "`let` bindings must come in name/value pairs",
                bindings.span.clone(),
            ));
        }

        let child = Environment::with_parent(env.clone());
        for pair in pairs.chunks(2) {
            let name = pair[0].plain_symbol().ok_or_else(|| {
                CompileError::macro_error("`let` binding name must be a symbol", pair[0].span.clone())
            })?;
            let value = self.eval(&pair[1], &child)?;
            child.define_local(name, Binding::Value(value));
        }

        let mut last = Value::Node(Sexp::null(node.span.clone()));
        for form in &args[1..] {
            last = self.eval(form, &child)?;
        }
        Ok(last)
    }

    fn eval_fn(
        &mut self,
        node: &Sexp,
        args: &[Sexp],
        env: &Rc<Environment>,
    ) -> Result<Value, CompileError> {
        let params_list = args.first().ok_or_else(|| {
            CompileError::macro_error("`fn` expects a parameter list", node.span.clone())
        })?;
        let (params, rest) = parse_params(params_list)?;
        Ok(Value::Closure(Rc::new(Closure {
            params,
            rest,
            body: args[1..].to_vec(),
            env: env.clone(),
        })))
    }

    fn apply(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        span: &Span,
    ) -> Result<Value, CompileError> {
        let closure = match callee {
            Value::Closure(c) => c,
            Value::Node(node) => {
                return Err(CompileError::macro_error(
                    format!("`{}` is not callable in a macro body", node),
                    span.clone(),
                ))
            }
        };

        let enough = if closure.rest.is_some() {
            args.len() >= closure.params.len()
        } else {
            args.len() == closure.params.len()
        };
        if !enough {
            return Err(CompileError::macro_error(
                format!(
                    "function expects {} argument(s), got {}",
                    closure.params.len(),
                    args.len()
                ),
                span.clone(),
            ));
        }

        let child = Environment::with_parent(closure.env.clone());
        for (param, arg) in closure.params.iter().zip(&args) {
            child.define_local(param, Binding::Value(arg.clone()));
        }
        if let Some(rest_name) = &closure.rest {
            let rest_nodes = nodes_from(&args[closure.params.len()..], span)?;
            child.define_local(
                rest_name,
                Binding::Value(Value::Node(Sexp::list(rest_nodes, span.clone()))),
            );
        }

        let mut last = Value::Node(Sexp::null(span.clone()));
        for form in &closure.body {
            last = self.eval(form, &child)?;
        }
        Ok(last)
    }

    /// Quasiquote templating. Depth tracks nesting; unquotes fire at depth
    /// one. `name#` symbols are replaced with per-expansion gensyms.
    fn eval_quasiquote(
        &mut self,
        node: &Sexp,
        depth: u32,
        env: &Rc<Environment>,
    ) -> Result<Sexp, CompileError> {
        match &node.kind {
            SexpKind::Symbol {
                name,
                namespace: None,
            } if name.len() > 1 && name.ends_with('#') => {
                let base = &name[..name.len() - 1];
                Ok(Sexp::symbol(&self.gensym_for(base), node.span.clone()))
            }
            SexpKind::List(items) if !items.is_empty() => {
                match items[0].plain_symbol() {
                    Some("unquote") => {
                        self.expect_arity("unquote", &items[1..], 1, &node.span)?;
                        if depth == 1 {
                            let value = self.eval(&items[1], env)?;
                            return node_value(value, &node.span);
                        }
                        let inner = self.eval_quasiquote(&items[1], depth - 1, env)?;
                        Ok(rewrap(node, "unquote", inner))
                    }
                    Some("quasiquote") => {
                        self.expect_arity("quasiquote", &items[1..], 1, &node.span)?;
                        let inner = self.eval_quasiquote(&items[1], depth + 1, env)?;
                        Ok(rewrap(node, "quasiquote", inner))
                    }
                    Some("unquote-splice") => Err(CompileError::macro_error(
                        "`unquote-splice` must appear inside a list",
                        node.span.clone(),
                    )),
                    _ => {
                        let mut out = Vec::with_capacity(items.len());
                        for item in items {
                            if let Some(splice_arg) = splice_arg(item) {
                                if depth == 1 {
                                    let value = self.eval(splice_arg, env)?;
                                    let spliced = node_value(value, &item.span)?;
                                    let children =
                                        seq_children(&spliced).ok_or_else(|| {
                                            CompileError::macro_error(
                                                "`unquote-splice` expects a list",
                                                item.span.clone(),
                                            )
                                        })?;
                                    out.extend(children.iter().cloned());
                                } else {
                                    let inner =
                                        self.eval_quasiquote(splice_arg, depth - 1, env)?;
                                    out.push(rewrap(item, "unquote-splice", inner));
                                }
                            } else {
                                out.push(self.eval_quasiquote(item, depth, env)?);
                            }
                        }
                        Ok(Sexp::list(out, node.span.clone()))
                    }
                }
            }
            _ => Ok(node.clone()),
        }
    }

    fn gensym_for(&mut self, base: &str) -> String {
        self.gensyms
            .entry(base.to_string())
            .or_insert_with(|| {
                let n = GENSYM_COUNTER.fetch_add(1, Ordering::Relaxed);
                format!("{}__G{}", base, n)
            })
            .clone()
    }

    fn expect_arity(
        &self,
        form: &str,
        args: &[Sexp],
        expected: usize,
        span: &Span,
    ) -> Result<(), CompileError> {
        if args.len() != expected {
            return Err(CompileError::macro_error(
                format!(
                    "`{}` expects {} argument(s), got {}",
                    form,
                    expected,
                    args.len()
                ),
                span.clone(),
            ));
        }
        Ok(())
    }
}

fn splice_arg(item: &Sexp) -> Option<&Sexp> {
    let items = item.list_items()?;
    if items.len() == 2 && items[0].is_symbol("unquote-splice") {
        Some(&items[1])
    } else {
        None
    }
}

fn rewrap(original: &Sexp, head: &str, inner: Sexp) -> Sexp {
    Sexp::list(
        vec![Sexp::symbol(head, original.span.clone()), inner],
        original.span.clone(),
    )
}

fn node_value(value: Value, span: &Span) -> Result<Sexp, CompileError> {
    match value {
        Value::Node(node) => Ok(node),
        Value::Closure(_) => Err(CompileError::macro_error(
            "cannot splice a function value into a template",
            span.clone(),
        )),
    }
}

fn nodes_from(values: &[Value], span: &Span) -> Result<Vec<Sexp>, CompileError> {
    values
        .iter()
        .map(|v| node_value(v.clone(), span))
        .collect()
}

fn render(value: &Value) -> String {
    match value {
        Value::Node(node) => match &node.kind {
            SexpKind::Literal(Literal::Str(s)) => s.clone(),
            _ => node.to_string(),
        },
        Value::Closure(_) => "#<fn>".to_string(),
    }
}

// ============================================================================
// Builtin operations available to macro bodies
// ============================================================================

const BUILTINS: &[&str] = &[
    "count", "first", "rest", "nth", "second", "last", "empty?", "list?", "vector?", "symbol?",
    "name", "str", "+", "-", "*", "/", "mod", "=", "!=", "<", ">", "<=", ">=",
];

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(n) => n,
        }
    }
}

fn as_node<'a>(value: &'a Value, span: &Span) -> Result<&'a Sexp, CompileError> {
    match value {
        Value::Node(node) => Ok(node),
        Value::Closure(_) => Err(CompileError::macro_error(
            "expected an AST value, got a function",
            span.clone(),
        )),
    }
}

fn as_num(value: &Value, span: &Span) -> Result<Num, CompileError> {
    let node = as_node(value, span)?;
    match &node.kind {
        SexpKind::Literal(Literal::Int(n)) => Ok(Num::Int(*n)),
        SexpKind::Literal(Literal::Float(n)) => Ok(Num::Float(*n)),
        _ => Err(CompileError::macro_error(
            format!("expected a number, got `{}`", node),
            span.clone(),
        )),
    }
}

fn seq_of<'a>(value: &'a Value, span: &Span) -> Result<&'a [Sexp], CompileError> {
    let node = as_node(value, span)?;
    seq_children(node).ok_or_else(|| {
        CompileError::macro_error(format!("expected a list, got `{}`", node), span.clone())
    })
}

fn bool_node(b: bool, span: &Span) -> Result<Value, CompileError> {
    Ok(Value::Node(Sexp::literal(Literal::Bool(b), span.clone())))
}

fn int_node(n: i64, span: &Span) -> Result<Value, CompileError> {
    Ok(Value::Node(Sexp::literal(Literal::Int(n), span.clone())))
}

fn num_node(n: Num, span: &Span) -> Result<Value, CompileError> {
    let literal = match n {
        Num::Int(v) => Literal::Int(v),
        Num::Float(v) => Literal::Float(v),
    };
    Ok(Value::Node(Sexp::literal(literal, span.clone())))
}

fn element(seq: &[Sexp], index: usize, span: &Span) -> Result<Value, CompileError> {
    match seq.get(index) {
        Some(node) => Ok(Value::Node(node.clone())),
        None => Ok(Value::Node(Sexp::null(span.clone()))),
    }
}

fn expect_args(op: &str, args: &[Value], expected: usize, span: &Span) -> Result<(), CompileError> {
    if args.len() != expected {
        return Err(CompileError::macro_error(
            format!("`{}` expects {} argument(s), got {}", op, expected, args.len()),
            span.clone(),
        ));
    }
    Ok(())
}

fn apply_builtin(op: &str, args: &[Value], span: &Span) -> Result<Value, CompileError> {
    match op {
        "count" => {
            expect_args(op, args, 1, span)?;
            let node = as_node(&args[0], span)?;
            match &node.kind {
                SexpKind::Literal(Literal::Str(s)) => int_node(s.chars().count() as i64, span),
                _ => int_node(seq_of(&args[0], span)?.len() as i64, span),
            }
        }
        "first" => {
            expect_args(op, args, 1, span)?;
            element(seq_of(&args[0], span)?, 0, span)
        }
        "second" => {
            expect_args(op, args, 1, span)?;
            element(seq_of(&args[0], span)?, 1, span)
        }
        "last" => {
            expect_args(op, args, 1, span)?;
            let seq = seq_of(&args[0], span)?;
            if seq.is_empty() {
                Ok(Value::Node(Sexp::null(span.clone())))
            } else {
                element(seq, seq.len() - 1, span)
            }
        }
        "rest" => {
            expect_args(op, args, 1, span)?;
            let seq = seq_of(&args[0], span)?;
            let rest: Vec<Sexp> = seq.iter().skip(1).cloned().collect();
            Ok(Value::Node(Sexp::list(rest, span.clone())))
        }
        "nth" => {
            expect_args(op, args, 2, span)?;
            let seq = seq_of(&args[0], span)?;
            match as_num(&args[1], span)? {
                Num::Int(i) if i >= 0 => element(seq, i as usize, span),
                _ => Ok(Value::Node(Sexp::null(span.clone()))),
            }
        }
        "empty?" => {
            expect_args(op, args, 1, span)?;
            let node = as_node(&args[0], span)?;
            let empty = match &node.kind {
                SexpKind::Literal(Literal::Null) => true,
                SexpKind::Literal(Literal::Str(s)) => s.is_empty(),
                _ => seq_children(node).map(|s| s.is_empty()).unwrap_or(false),
            };
            bool_node(empty, span)
        }
        "list?" => {
            expect_args(op, args, 1, span)?;
            bool_node(as_node(&args[0], span)?.list_items().is_some(), span)
        }
        "vector?" => {
            expect_args(op, args, 1, span)?;
            bool_node(as_node(&args[0], span)?.head_symbol() == Some("vector"), span)
        }
        "symbol?" => {
            expect_args(op, args, 1, span)?;
            bool_node(
                matches!(as_node(&args[0], span)?.kind, SexpKind::Symbol { .. }),
                span,
            )
        }
        "name" => {
            expect_args(op, args, 1, span)?;
            let node = as_node(&args[0], span)?;
            let text = match &node.kind {
                SexpKind::Symbol { name, .. } => name.clone(),
                SexpKind::Keyword(name) => name.clone(),
                SexpKind::Literal(Literal::Str(s)) => s.clone(),
                _ => {
                    return Err(CompileError::macro_error(
                        format!("`name` expects a symbol, keyword, or string, got `{}`", node),
                        span.clone(),
                    ))
                }
            };
            Ok(Value::Node(Sexp::literal(Literal::Str(text), span.clone())))
        }
        "str" => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&render(arg));
            }
            Ok(Value::Node(Sexp::literal(Literal::Str(out), span.clone())))
        }
        "+" | "-" | "*" | "/" | "mod" => arith(op, args, span),
        "=" | "!=" => {
            expect_args(op, args, 2, span)?;
            let equal = match (&args[0], &args[1]) {
                (Value::Node(a), Value::Node(b)) => a.eq_ignoring_span(b),
                _ => false,
            };
            bool_node(if op == "=" { equal } else { !equal }, span)
        }
        "<" | ">" | "<=" | ">=" => {
            expect_args(op, args, 2, span)?;
            let a = as_num(&args[0], span)?.as_f64();
            let b = as_num(&args[1], span)?.as_f64();
            let result = match op {
                "<" => a < b,
                ">" => a > b,
                "<=" => a <= b,
                _ => a >= b,
            };
            bool_node(result, span)
        }
        _ => Err(CompileError::macro_error(
            format!("unknown builtin `{}`", op),
            span.clone(),
        )),
    }
}

fn arith(op: &str, args: &[Value], span: &Span) -> Result<Value, CompileError> {
    if args.is_empty() {
        return Err(CompileError::macro_error(
            format!("`{}` expects at least 1 argument", op),
            span.clone(),
        ));
    }
    let nums: Vec<Num> = args
        .iter()
        .map(|a| as_num(a, span))
        .collect::<Result<_, _>>()?;

    // Unary minus negates
    if op == "-" && nums.len() == 1 {
        return num_node(
            match nums[0] {
                Num::Int(n) => Num::Int(-n),
                Num::Float(n) => Num::Float(-n),
            },
            span,
        );
    }

    let mut acc = nums[0];
    for num in &nums[1..] {
        acc = match (op, acc, *num) {
            ("+", Num::Int(a), Num::Int(b)) => Num::Int(a + b),
            ("-", Num::Int(a), Num::Int(b)) => Num::Int(a - b),
            ("*", Num::Int(a), Num::Int(b)) => Num::Int(a * b),
            ("/", Num::Int(a), Num::Int(b)) if b != 0 && a % b == 0 => Num::Int(a / b),
            ("mod", Num::Int(a), Num::Int(b)) if b != 0 => Num::Int(a % b),
            ("mod", _, _) => {
                return Err(CompileError::macro_error(
                    "`mod` expects non-zero integer operands",
                    span.clone(),
                ))
            }
            ("/", _, b) if b.as_f64() == 0.0 => {
                return Err(CompileError::macro_error(
                    "division by zero in macro body",
                    span.clone(),
                ));
            }
            ("+", a, b) => Num::Float(a.as_f64() + b.as_f64()),
            ("-", a, b) => Num::Float(a.as_f64() - b.as_f64()),
            ("*", a, b) => Num::Float(a.as_f64() * b.as_f64()),
            ("/", a, b) => Num::Float(a.as_f64() / b.as_f64()),
            _ => unreachable!("operator set is closed"),
        };
    }
    num_node(acc, span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::reader::read_one;

    fn parse(source: &str) -> Sexp {
        let out = lex(source, "t.hql").unwrap();
        read_one(&out.tokens, "t.hql").unwrap().normalize()
    }

    fn eval_str(source: &str) -> Result<Value, CompileError> {
        let env = Environment::new();
        Interp::new().eval(&parse(source), &env)
    }

    fn eval_node(source: &str) -> Sexp {
        match eval_str(source).unwrap() {
            Value::Node(node) => node,
            Value::Closure(_) => panic!("Expected node"),
        }
    }

    #[test]
    fn test_arithmetic_and_comparison() {
        assert_eq!(eval_node("(+ 1 2 3)").to_string(), "6");
        assert_eq!(eval_node("(- 10 4)").to_string(), "6");
        assert_eq!(eval_node("(- 3)").to_string(), "-3");
        assert_eq!(eval_node("(* 2 2.5)").to_string(), "5.0");
        assert_eq!(eval_node("(/ 10 2)").to_string(), "5");
        assert_eq!(eval_node("(/ 5 2)").to_string(), "2.5");
        assert_eq!(eval_node("(mod 7 3)").to_string(), "1");
        assert_eq!(eval_node("(< 1 2)").to_string(), "true");
        assert_eq!(eval_node("(>= 1 2)").to_string(), "false");
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(eval_node("(= '(1 2) '(1 2))").to_string(), "true");
        assert_eq!(eval_node("(!= 'a 'b)").to_string(), "true");
    }

    #[test]
    fn test_list_builtins() {
        assert_eq!(eval_node("(count '(a b c))").to_string(), "3");
        assert_eq!(eval_node("(first '(a b))").to_string(), "a");
        assert_eq!(eval_node("(rest '(a b c))").to_string(), "(b c)");
        assert_eq!(eval_node("(nth '(a b c) 2)").to_string(), "c");
        assert_eq!(eval_node("(second '(a b))").to_string(), "b");
        assert_eq!(eval_node("(last '(a b c))").to_string(), "c");
        assert_eq!(eval_node("(empty? '())").to_string(), "true");
        assert_eq!(eval_node("(symbol? 'a)").to_string(), "true");
        assert_eq!(eval_node("(name 'foo)").to_string(), "\"foo\"");
    }

    #[test]
    fn test_vector_headed_lists_read_as_sequences() {
        assert_eq!(eval_node("(count '[a b])").to_string(), "2");
        assert_eq!(eval_node("(first '[a b])").to_string(), "a");
        assert_eq!(eval_node("(vector? '[a b])").to_string(), "true");
        assert_eq!(eval_node("(vector? '(a b))").to_string(), "false");
    }

    #[test]
    fn test_let_fn_application() {
        assert_eq!(eval_node("(let (x 2 y 3) (* x y))").to_string(), "6");
        assert_eq!(eval_node("((fn (a b) (+ a b)) 1 2)").to_string(), "3");
        assert_eq!(
            eval_node("((fn (a & more) (count more)) 1 2 3)").to_string(),
            "2"
        );
    }

    #[test]
    fn test_if_cond_truthiness() {
        assert_eq!(eval_node("(if false 1 2)").to_string(), "2");
        assert_eq!(eval_node("(if null 1 2)").to_string(), "2");
        assert_eq!(eval_node("(if 0 1 2)").to_string(), "1");
        assert_eq!(eval_node("(cond false 1 true 2)").to_string(), "2");
        assert_eq!(eval_node("(cond false 1 99)").to_string(), "99");
    }

    #[test]
    fn test_quasiquote_unquote() {
        assert_eq!(
            eval_node("(let (x 5) `(inc ~x))").to_string(),
            "(inc 5)"
        );
        assert_eq!(
            eval_node("(let (xs '(1 2)) `(+ ~@xs 3))").to_string(),
            "(+ 1 2 3)"
        );
    }

    #[test]
    fn test_nested_quasiquote_depth() {
        // Inner quasiquote shields its unquote
        let printed = eval_node("(let (x 1) `(a `(b ~~x)))").to_string();
        assert_eq!(printed, "(a (quasiquote (b (unquote 1))))");
    }

    #[test]
    fn test_auto_gensym_consistent_within_expansion() {
        let node = eval_node("`(let (t# 1) (+ t# t#))");
        let items = node.list_items().unwrap();
        let binding = items[1].list_items().unwrap();
        let bound = binding[0].plain_symbol().unwrap().to_string();
        assert!(bound.starts_with("t__G"));
        let body = items[2].list_items().unwrap();
        assert_eq!(body[1].plain_symbol().unwrap(), bound);
        assert_eq!(body[2].plain_symbol().unwrap(), bound);

        // A second expansion gets a fresh name
        let again = eval_node("`(let (t# 1) (+ t# t#))");
        let binding2 = again.list_items().unwrap()[1].list_items().unwrap()[0]
            .plain_symbol()
            .unwrap()
            .to_string();
        assert_ne!(bound, binding2);
    }

    #[test]
    fn test_undefined_symbol_errors() {
        let err = eval_str("missing").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Macro);
        assert!(err.message.contains("undefined symbol"));
    }

    #[test]
    fn test_throw_raises_macro_error() {
        let err = eval_str("(throw \"bad pattern\")").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Macro);
        assert!(err.message.contains("bad pattern"));
    }

    #[test]
    fn test_str_concat() {
        assert_eq!(
            eval_node("(str \"a\" 1 'b)").to_string(),
            "\"a1b\""
        );
    }
}
