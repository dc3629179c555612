// ABOUTME: Macro expander rewriting macro calls to a fixed point over the normalised AST

use crate::ast::{Sexp, SexpKind};
use crate::classify::{classify, seed_specials, FormKind};
use crate::env::{Binding, Environment, MacroDef};
use crate::error::CompileError;
use crate::interp::{parse_params, seq_children, Interp, Value};
use crate::lexer::lex;
use crate::reader::read_all;
use log::debug;
use std::rc::Rc;

/// Hard per-node expansion budget guarding against divergent macros.
pub const EXPANSION_LIMIT: usize = 256;

/// File identifier for spans inside the shipped macro library.
pub const BUILTIN_MACROS_FILE: &str = "macros.hql";

const BUILTIN_MACROS_SOURCE: &str = include_str!("macros.hql");

/// Build a root environment seeded with the kernel markers and the
/// built-in macro library.
pub fn seed_environment() -> Result<Rc<Environment>, CompileError> {
    let env = Environment::new();
    seed_specials(&env);

    let lexed = lex(BUILTIN_MACROS_SOURCE, BUILTIN_MACROS_FILE)?;
    let forms = read_all(&lexed.tokens, BUILTIN_MACROS_FILE)?;
    let mut count = 0;
    for form in forms {
        let form = form.normalize();
        if form.head_symbol() != Some("macro") {
            return Err(CompileError::macro_error(
                "macro library may contain only (macro ...) forms",
                form.span.clone(),
            ));
        }
        define_macro(&form, &env, true)?;
        count += 1;
    }
    debug!("seeded environment with {} built-in macros", count);
    Ok(env)
}

/// Expand every top-level form. `(macro ...)` definitions are added to
/// the global frame and elided from the output.
pub fn expand_program(
    forms: Vec<Sexp>,
    env: &Rc<Environment>,
) -> Result<Vec<Sexp>, CompileError> {
    let mut out = Vec::with_capacity(forms.len());
    for form in forms {
        if form.head_symbol() == Some("macro") {
            define_macro(&form, env, true)?;
            continue;
        }
        out.push(expand(form, env)?);
    }
    Ok(out)
}

/// Register a `(macro NAME PARAMS BODY...)` definition.
fn define_macro(
    form: &Sexp,
    env: &Rc<Environment>,
    global: bool,
) -> Result<(), CompileError> {
    let items = form.list_items().unwrap_or_default();
    if items.len() < 4 {
        return Err(CompileError::macro_error(
            "macro definition needs a name, a parameter list, and a body",
            form.span.clone(),
        )
        .with_suggestion("write (macro name (params) body)"));
    }
    let name = items[1].plain_symbol().ok_or_else(|| {
        CompileError::macro_error("macro name must be a symbol", items[1].span.clone())
    })?;
    let (params, rest) = parse_params(&items[2])?;

    let def = MacroDef {
        name: name.to_string(),
        params,
        rest,
        body: items[3..].to_vec(),
        span: form.span.clone(),
        scope: Rc::downgrade(env),
    };
    if global {
        env.define_global(name, Binding::Macro(Rc::new(def)));
    } else {
        env.define_local(name, Binding::Macro(Rc::new(def)));
    }
    Ok(())
}

/// Expand one node to a fixed point: rewrite macro heads until the head
/// is a kernel primitive, constructor, or application, then recurse.
pub fn expand(mut node: Sexp, env: &Rc<Environment>) -> Result<Sexp, CompileError> {
    let mut budget = EXPANSION_LIMIT;
    loop {
        let head_kind = match &node.kind {
            SexpKind::List(items) if !items.is_empty() => classify(&items[0], env),
            _ => return Ok(node),
        };
        match head_kind {
            FormKind::Macro(def) => {
                if budget == 0 {
                    return Err(CompileError::macro_error(
                        format!(
                            "macro `{}` exceeded the expansion limit of {}",
                            def.name, EXPANSION_LIMIT
                        ),
                        node.span.clone(),
                    )
                    .with_suggestion("a macro is expanding to itself without making progress"));
                }
                budget -= 1;
                node = apply_macro(&def, &node)?;
            }
            FormKind::Special => return expand_special(node, env),
            FormKind::Constructor | FormKind::Application => {
                return expand_children(node, env)
            }
        }
    }
}

/// Invoke a macro transformer on the raw argument ASTs.
fn apply_macro(def: &MacroDef, call: &Sexp) -> Result<Sexp, CompileError> {
    let items = call.list_items().unwrap_or_default();
    let args = &items[1..];

    let enough = if def.rest.is_some() {
        args.len() >= def.params.len()
    } else {
        args.len() == def.params.len()
    };
    if !enough {
        return Err(CompileError::macro_error(
            format!(
                "macro `{}` expects {}{} argument(s), got {}",
                def.name,
                if def.rest.is_some() { "at least " } else { "" },
                def.params.len(),
                args.len()
            ),
            call.span.clone(),
        ));
    }

    let scope = def.scope.upgrade().ok_or_else(|| {
        CompileError::macro_error(
            format!("defining scope of macro `{}` no longer exists", def.name),
            call.span.clone(),
        )
    })?;
    let macro_env = Environment::with_parent(scope);
    for (param, arg) in def.params.iter().zip(args) {
        macro_env.define_local(param, Binding::Value(Value::Node(arg.clone())));
    }
    if let Some(rest_name) = &def.rest {
        let rest_args: Vec<Sexp> = args[def.params.len()..].to_vec();
        macro_env.define_local(
            rest_name,
            Binding::Value(Value::Node(Sexp::list(rest_args, call.span.clone()))),
        );
    }

    let mut interp = Interp::new();
    let mut result = Value::Node(Sexp::null(call.span.clone()));
    for form in &def.body {
        result = interp
            .eval(form, &macro_env)
            .map_err(|e| e.in_macro_expansion(&def.name, &call.span))?;
    }

    let mut expanded = match result {
        Value::Node(node) => node,
        Value::Closure(_) => {
            return Err(CompileError::macro_error(
                format!("macro `{}` produced a function, not a form", def.name),
                call.span.clone(),
            ))
        }
    };
    // Template-built nodes point at the macro call that produced them
    expanded.retag_foreign_spans(&call.span);
    Ok(expanded)
}

fn expand_all(forms: &[Sexp], env: &Rc<Environment>) -> Result<Vec<Sexp>, CompileError> {
    forms.iter().map(|f| expand(f.clone(), env)).collect()
}

/// Expand every child of an application or constructor form.
fn expand_children(node: Sexp, env: &Rc<Environment>) -> Result<Sexp, CompileError> {
    let span = node.span.clone();
    match node.kind {
        SexpKind::List(items) => Ok(Sexp::list(expand_all(&items, env)?, span)),
        _ => Ok(Sexp { kind: node.kind, span }),
    }
}

/// Collect every symbol a binding pattern introduces.
fn pattern_symbols(pattern: &Sexp, out: &mut Vec<String>) {
    match &pattern.kind {
        SexpKind::Symbol {
            name,
            namespace: None,
        } => {
            if name == "&" || name == "=" {
                return;
            }
            let name = name.strip_prefix("...").unwrap_or(name);
            out.push(name.to_string());
        }
        SexpKind::List(items) => {
            // Skip the builder head of normalised container patterns;
            // plain lists (fn parameter lists) have no head to skip.
            let skip = matches!(
                items.first().and_then(|h| h.plain_symbol()),
                Some("vector" | "hash-map" | "hash-set")
            ) as usize;
            for item in items.iter().skip(skip) {
                pattern_symbols(item, out);
            }
        }
        _ => {}
    }
}

fn push_shadows(env: &Rc<Environment>, pattern: &Sexp) {
    let mut names = Vec::new();
    pattern_symbols(pattern, &mut names);
    for name in names {
        env.define_local(name, Binding::Shadow);
    }
}

/// Recurse into a special form along its grammatical positions, pushing
/// shadow scopes for binders.
fn expand_special(node: Sexp, env: &Rc<Environment>) -> Result<Sexp, CompileError> {
    let span = node.span.clone();
    let items = match node.kind {
        SexpKind::List(items) => items,
        _ => unreachable!("special forms are lists"),
    };
    let head = items[0].plain_symbol().unwrap_or_default().to_string();
    let rebuilt = Sexp::list;

    match head.as_str() {
        // Nothing inside a quote is macro territory
        "quote" => Ok(Sexp::list(items, span)),
        "quasiquote" => {
            if items.len() != 2 {
                return Err(CompileError::validation(
                    "`quasiquote` expects exactly one form",
                    span,
                ));
            }
            let template = expand_quasi(&items[1], env, 1)?;
            Ok(rebuilt(vec![items[0].clone(), template], span))
        }
        "unquote" | "unquote-splice" => Err(CompileError::validation(
            format!("`{}` outside quasiquote", head),
            span,
        )),
        // A nested macro definition binds locally and leaves no output
        "macro" => {
            let form = Sexp::list(items, span.clone());
            define_macro(&form, env, false)?;
            Ok(Sexp::null(span))
        }
        "let" | "loop" => {
            if items.len() < 2 {
                return Err(CompileError::validation(
                    format!("`{}` expects a binding list", head),
                    span,
                ));
            }
            let child = Environment::with_parent(env.clone());
            let bindings = expand_binding_pairs(&items[1], &child)?;
            let mut out = vec![items[0].clone(), bindings];
            for form in &items[2..] {
                out.push(expand(form.clone(), &child)?);
            }
            Ok(rebuilt(out, span))
        }
        "fn" => expand_fn(items, span, env),
        "defn" => {
            if items.len() < 3 {
                return Err(CompileError::validation(
                    "`defn` expects a name, a parameter list, and a body",
                    span,
                ));
            }
            let name = items[1].plain_symbol().ok_or_else(|| {
                CompileError::validation("`defn` name must be a symbol", items[1].span.clone())
            })?;
            env.define_local(name.to_string(), Binding::Shadow);
            let child = Environment::with_parent(env.clone());
            push_shadows(&child, &items[2]);
            let mut out = vec![items[0].clone(), items[1].clone(), items[2].clone()];
            for form in &items[3..] {
                out.push(expand(form.clone(), &child)?);
            }
            Ok(rebuilt(out, span))
        }
        "def" | "var" => {
            if items.len() != 3 {
                return Err(CompileError::validation(
                    format!("`{}` expects a name and a value", head),
                    span,
                ));
            }
            let value = expand(items[2].clone(), env)?;
            push_shadows(env, &items[1]);
            Ok(rebuilt(vec![items[0].clone(), items[1].clone(), value], span))
        }
        "for-of" => {
            if items.len() < 2 {
                return Err(CompileError::validation(
                    "`for-of` expects a [item coll] binding",
                    span,
                ));
            }
            let pair = seq_children(&items[1]).unwrap_or_default();
            if pair.len() != 2 {
                return Err(CompileError::validation(
                    "`for-of` binding must be [item coll]",
                    items[1].span.clone(),
                ));
            }
            let coll = expand(pair[1].clone(), env)?;
            let child = Environment::with_parent(env.clone());
            push_shadows(&child, &pair[0]);
            let binding = Sexp::list(
                vec![
                    Sexp::symbol("vector", items[1].span.clone()),
                    pair[0].clone(),
                    coll,
                ],
                items[1].span.clone(),
            );
            let mut out = vec![items[0].clone(), binding];
            for form in &items[2..] {
                out.push(expand(form.clone(), &child)?);
            }
            Ok(rebuilt(out, span))
        }
        "try" => {
            let mut out = vec![items[0].clone()];
            for form in &items[1..] {
                match form.head_symbol() {
                    Some("catch") => {
                        let clause = form.list_items().unwrap_or_default();
                        if clause.len() < 2 {
                            return Err(CompileError::validation(
                                "`catch` expects a binding and a body",
                                form.span.clone(),
                            ));
                        }
                        let child = Environment::with_parent(env.clone());
                        push_shadows(&child, &clause[1]);
                        let mut rebuilt_clause = vec![clause[0].clone(), clause[1].clone()];
                        for handler in &clause[2..] {
                            rebuilt_clause.push(expand(handler.clone(), &child)?);
                        }
                        out.push(Sexp::list(rebuilt_clause, form.span.clone()));
                    }
                    Some("finally") => {
                        let clause = form.list_items().unwrap_or_default();
                        let mut rebuilt_clause = vec![clause[0].clone()];
                        for f in &clause[1..] {
                            rebuilt_clause.push(expand(f.clone(), env)?);
                        }
                        out.push(Sexp::list(rebuilt_clause, form.span.clone()));
                    }
                    _ => out.push(expand(form.clone(), env)?),
                }
            }
            Ok(rebuilt(out, span))
        }
        "label" => {
            if items.len() < 3 {
                return Err(CompileError::validation(
                    "`label` expects a name and a body",
                    span,
                ));
            }
            let mut out = vec![items[0].clone(), items[1].clone()];
            for form in &items[2..] {
                out.push(expand(form.clone(), env)?);
            }
            Ok(rebuilt(out, span))
        }
        // Import forms pass through untouched; the IR builder validates them
        "import" => Ok(Sexp::list(items, span)),
        "export" => {
            if items.len() == 3 && items[1].is_symbol("default") {
                let value = expand(items[2].clone(), env)?;
                Ok(rebuilt(vec![items[0].clone(), items[1].clone(), value], span))
            } else {
                Ok(Sexp::list(items, span))
            }
        }
        "class" => expand_class(items, span, env),
        "method" | "constructor" => Err(CompileError::validation(
            format!("`{}` is only valid inside a class body", head),
            span,
        )),
        // Remaining kernel forms expand every argument position
        _ => {
            let mut out = vec![items[0].clone()];
            for form in &items[1..] {
                out.push(expand(form.clone(), env)?);
            }
            Ok(rebuilt(out, span))
        }
    }
}

/// Expand a `(fn name? params body...)` form with a fresh binder scope.
fn expand_fn(
    items: Vec<Sexp>,
    span: crate::span::Span,
    env: &Rc<Environment>,
) -> Result<Sexp, CompileError> {
    let named = items.len() > 2 && items[1].plain_symbol().is_some();
    let params_index = if named { 2 } else { 1 };
    if items.len() <= params_index {
        return Err(CompileError::validation(
            "`fn` expects a parameter list",
            span,
        ));
    }

    let child = Environment::with_parent(env.clone());
    if named {
        if let Some(name) = items[1].plain_symbol() {
            child.define_local(name.to_string(), Binding::Shadow);
        }
    }
    push_shadows(&child, &items[params_index]);

    // Default initialisers inside the parameter list are expressions
    let params = expand_param_defaults(&items[params_index], &child)?;

    let mut out: Vec<Sexp> = items[..params_index].to_vec();
    out.push(params);
    for form in &items[params_index + 1..] {
        out.push(expand(form.clone(), &child)?);
    }
    Ok(Sexp::list(out, span))
}

/// Expand the value after each `=` marker in a parameter list.
fn expand_param_defaults(
    params: &Sexp,
    env: &Rc<Environment>,
) -> Result<Sexp, CompileError> {
    let Some(items) = params.list_items() else {
        return Ok(params.clone());
    };
    let mut out = Vec::with_capacity(items.len());
    let mut was_eq = false;
    for item in items {
        if was_eq {
            out.push(expand(item.clone(), env)?);
            was_eq = false;
            continue;
        }
        was_eq = item.is_symbol("=");
        out.push(item.clone());
    }
    Ok(Sexp::list(out, params.span.clone()))
}

fn expand_class(
    items: Vec<Sexp>,
    span: crate::span::Span,
    env: &Rc<Environment>,
) -> Result<Sexp, CompileError> {
    let mut out = Vec::with_capacity(items.len());
    out.push(items[0].clone());
    for form in &items[1..] {
        match form.head_symbol() {
            Some("constructor") | Some("method") => {
                let member = form.list_items().unwrap_or_default();
                let is_method = form.head_symbol() == Some("method");
                let params_index = if is_method { 2 } else { 1 };
                if member.len() <= params_index {
                    return Err(CompileError::validation(
                        "class member needs a parameter list",
                        form.span.clone(),
                    ));
                }
                let child = Environment::with_parent(env.clone());
                push_shadows(&child, &member[params_index]);
                let mut rebuilt: Vec<Sexp> = member[..params_index + 1].to_vec();
                for body_form in &member[params_index + 1..] {
                    rebuilt.push(expand(body_form.clone(), &child)?);
                }
                out.push(Sexp::list(rebuilt, form.span.clone()));
            }
            _ => out.push(form.clone()),
        }
    }
    Ok(Sexp::list(out, span))
}

/// Expand binding pairs `(n1 v1 n2 v2 ...)`, registering each name before
/// the next init so later inits see earlier bindings.
fn expand_binding_pairs(
    bindings: &Sexp,
    env: &Rc<Environment>,
) -> Result<Sexp, CompileError> {
    let pairs = seq_children(bindings).ok_or_else(|| {
        CompileError::validation("binding list must be a list", bindings.span.clone())
    })?;
    if pairs.len() % 2 != 0 {
        return Err(CompileError::validation(
            "bindings must come in name/value pairs",
            bindings.span.clone(),
        ));
    }

    let vector_headed = bindings.head_symbol() == Some("vector");
    let mut out: Vec<Sexp> = Vec::with_capacity(pairs.len() + 1);
    if vector_headed {
        out.push(bindings.list_items().unwrap_or_default()[0].clone());
    }
    for pair in pairs.chunks(2) {
        let init = expand(pair[1].clone(), env)?;
        push_shadows(env, &pair[0]);
        out.push(pair[0].clone());
        out.push(init);
    }
    Ok(Sexp::list(out, bindings.span.clone()))
}

/// Expand macro calls only inside unquoted positions of a template.
fn expand_quasi(
    node: &Sexp,
    env: &Rc<Environment>,
    depth: u32,
) -> Result<Sexp, CompileError> {
    let Some(items) = node.list_items() else {
        return Ok(node.clone());
    };
    if items.is_empty() {
        return Ok(node.clone());
    }
    match items[0].plain_symbol() {
        Some(q @ ("unquote" | "unquote-splice")) if items.len() == 2 => {
            let inner = if depth == 1 {
                expand(items[1].clone(), env)?
            } else {
                expand_quasi(&items[1], env, depth - 1)?
            };
            Ok(Sexp::list(
                vec![Sexp::symbol(q, items[0].span.clone()), inner],
                node.span.clone(),
            ))
        }
        Some("quasiquote") if items.len() == 2 => {
            let inner = expand_quasi(&items[1], env, depth + 1)?;
            Ok(Sexp::list(
                vec![items[0].clone(), inner],
                node.span.clone(),
            ))
        }
        _ => {
            let children: Result<Vec<Sexp>, CompileError> = items
                .iter()
                .map(|item| expand_quasi(item, env, depth))
                .collect();
            Ok(Sexp::list(children?, node.span.clone()))
        }
    }
}
