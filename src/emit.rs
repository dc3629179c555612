// ABOUTME: Code emitter printing the IR as JavaScript text while recording source mappings

use crate::error::CompileError;
use crate::ir::*;
use crate::sourcemap::{prepend_lines, to_data_uri, MappingsBuilder, SourceMapJson};
use crate::span::Span;
use log::debug;
use std::path::Path;

/// How the source map accompanies the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceMapMode {
    #[default]
    Inline,
    External,
    None,
}

/// Runtime helper prepended when dynamic accessor calls were lowered.
pub const GET_HELPER: &str = "const get = (obj, key) => (obj == null ? undefined : obj[key]);";

pub struct EmitOptions<'a> {
    /// Source file identifier recorded in the map.
    pub file: &'a str,
    /// Original source text embedded as sourcesContent.
    pub source: &'a str,
    pub mode: SourceMapMode,
    /// Whether to prepend the `get` helper.
    pub helper: bool,
}

pub struct EmitResult {
    pub code: String,
    pub map: Option<String>,
}

/// Print a module and assemble its source map.
pub fn emit_module(program: &Program, opts: &EmitOptions) -> Result<EmitResult, CompileError> {
    let mut emitter = Emitter::new();
    for stmt in &program.body {
        emitter.emit_stmt(stmt);
    }
    let Emitter { out: body, map, .. } = emitter;

    let header_lines = if opts.helper { 1 } else { 0 };
    let mut mappings = map.encode();
    if header_lines > 0 {
        mappings = prepend_lines(&mappings, header_lines);
    }

    let js_name = output_name(opts.file);
    let map_doc = SourceMapJson {
        version: 3,
        file: Some(js_name.clone()),
        sources: vec![opts.file.to_string()],
        sources_content: Some(vec![opts.source.to_string()]),
        names: map.names().to_vec(),
        mappings,
    };

    let mut code = String::new();
    if opts.helper {
        code.push_str(GET_HELPER);
        code.push('\n');
    }
    code.push_str(&body);

    debug!(
        "emitted {} bytes of JavaScript for {} ({} mappings)",
        code.len(),
        opts.file,
        map.mappings().len()
    );

    let map_json = serde_json::to_string(&map_doc).map_err(|e| {
        CompileError::codegen(
            format!("failed to serialise source map: {}", e),
            Span::point(opts.file, 1, 0),
        )
    })?;

    match opts.mode {
        SourceMapMode::Inline => {
            code.push_str("\n//# sourceMappingURL=");
            code.push_str(&to_data_uri(&map_json));
            code.push('\n');
            Ok(EmitResult { code, map: None })
        }
        SourceMapMode::External => {
            code.push_str(&format!("\n//# sourceMappingURL={}.map\n", js_name));
            Ok(EmitResult {
                code,
                map: Some(map_json),
            })
        }
        SourceMapMode::None => Ok(EmitResult { code, map: None }),
    }
}

/// The generated file name recorded in the map.
fn output_name(file: &str) -> String {
    let stem = Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("out");
    format!("{}.js", stem)
}

struct Emitter {
    out: String,
    line: u32,
    col: u32,
    indent: usize,
    map: MappingsBuilder,
}

impl Emitter {
    fn new() -> Self {
        Emitter {
            out: String::new(),
            line: 1,
            col: 0,
            indent: 0,
            map: MappingsBuilder::new(),
        }
    }

    /// Append text, tracking the generated line and column.
    fn write(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += 1;
            }
        }
        self.out.push_str(text);
    }

    /// Record a mapping from the current generated position to `span`.
    fn mark(&mut self, span: &Span, name: Option<&str>) {
        self.map.add(self.line, self.col, span, name);
    }

    fn newline(&mut self) {
        self.write("\n");
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.write("  ");
        }
    }

    fn block(&mut self, body: &[Stmt]) {
        self.write("{");
        self.newline();
        self.indent += 1;
        for stmt in body {
            self.emit_stmt(stmt);
        }
        self.indent -= 1;
        self.write_indent();
        self.write("}");
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn emit_stmt(&mut self, stmt: &Stmt) {
        self.write_indent();
        match stmt {
            Stmt::Expr { expr, span } => {
                self.mark(span, None);
                // An expression statement may not begin with `function` or `{`
                let hazard = matches!(expr, Expr::Function { .. } | Expr::Object { .. });
                if hazard {
                    self.write("(");
                }
                self.emit_expr(expr, 0);
                if hazard {
                    self.write(")");
                }
                self.write(";");
            }
            Stmt::Decl {
                kind,
                pattern,
                init,
                span,
            } => {
                self.mark(span, None);
                self.write(kind.text());
                self.write(" ");
                self.emit_pattern(pattern);
                if let Some(init) = init {
                    self.write(" = ");
                    self.emit_expr(init, 2);
                }
                self.write(";");
            }
            Stmt::FuncDecl { name, func, span } => {
                self.mark(span, Some(name));
                self.emit_function_text(func, Some(name));
            }
            Stmt::Return { arg, span } => {
                self.mark(span, None);
                match arg {
                    Some(arg) => {
                        self.write("return ");
                        self.emit_expr(arg, 0);
                        self.write(";");
                    }
                    None => self.write("return;"),
                }
            }
            Stmt::If {
                test,
                cons,
                alt,
                span,
            } => {
                self.mark(span, None);
                self.write("if (");
                self.emit_expr(test, 0);
                self.write(") ");
                self.block(cons);
                if let Some(alt) = alt {
                    self.write(" else ");
                    self.block(alt);
                }
            }
            Stmt::Block { body, span } => {
                self.mark(span, None);
                self.block(body);
            }
            Stmt::Throw { arg, span } => {
                self.mark(span, None);
                self.write("throw ");
                self.emit_expr(arg, 0);
                self.write(";");
            }
            Stmt::Try {
                body,
                catch,
                finally,
                span,
            } => {
                self.mark(span, None);
                self.write("try ");
                self.block(body);
                if let Some(catch) = catch {
                    self.write(" catch ");
                    if let Some(binding) = &catch.binding {
                        self.write("(");
                        self.emit_pattern(binding);
                        self.write(") ");
                    }
                    self.block(&catch.body);
                }
                if let Some(finally) = finally {
                    self.write(" finally ");
                    self.block(finally);
                }
            }
            Stmt::ForOf {
                pattern,
                iter,
                body,
                span,
            } => {
                self.mark(span, None);
                self.write("for (const ");
                self.emit_pattern(pattern);
                self.write(" of ");
                self.emit_expr(iter, 0);
                self.write(") ");
                self.block(body);
            }
            Stmt::While { test, body, span } => {
                self.mark(span, None);
                self.write("while (");
                self.emit_expr(test, 0);
                self.write(") ");
                self.block(body);
            }
            Stmt::Break { label, span } => {
                self.mark(span, None);
                match label {
                    Some(label) => self.write(&format!("break {};", label)),
                    None => self.write("break;"),
                }
            }
            Stmt::Continue { label, span } => {
                self.mark(span, None);
                match label {
                    Some(label) => self.write(&format!("continue {};", label)),
                    None => self.write("continue;"),
                }
            }
            Stmt::Labeled { label, body, span } => {
                self.mark(span, None);
                self.write(label);
                self.write(": ");
                self.block(body);
            }
            Stmt::Import {
                specifier,
                kind,
                span,
            } => {
                self.mark(span, None);
                self.write("import ");
                match kind {
                    ImportKind::Default(name) => self.write(name),
                    ImportKind::Namespace(name) => {
                        self.write("* as ");
                        self.write(name);
                    }
                    ImportKind::Named(names) => {
                        self.write("{ ");
                        for (i, binding) in names.iter().enumerate() {
                            if i > 0 {
                                self.write(", ");
                            }
                            self.write(&binding.imported);
                            if let Some(local) = &binding.local {
                                self.write(" as ");
                                self.write(local);
                            }
                        }
                        self.write(" }");
                    }
                }
                self.write(&format!(" from {};", quote_str(specifier)));
            }
            Stmt::ExportNamed { names, span } => {
                self.mark(span, None);
                self.write("export { ");
                for (i, binding) in names.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.write(&binding.imported);
                    if let Some(local) = &binding.local {
                        self.write(" as ");
                        self.write(local);
                    }
                }
                self.write(" };");
            }
            Stmt::ExportDefault { expr, span } => {
                self.mark(span, None);
                self.write("export default ");
                self.emit_expr(expr, 2);
                self.write(";");
            }
            Stmt::ClassDecl {
                name,
                superclass,
                members,
                span,
            } => {
                self.mark(span, Some(name));
                self.write("class ");
                self.write(name);
                if let Some(superclass) = superclass {
                    self.write(" extends ");
                    self.emit_expr(superclass, 18);
                }
                self.write(" {");
                self.newline();
                self.indent += 1;
                for member in members {
                    self.write_indent();
                    self.mark(&member.span, Some(&member.name));
                    self.write(&member.name);
                    self.emit_params(&member.func.params);
                    self.write(" ");
                    self.block(&member.func.body);
                    self.newline();
                }
                self.indent -= 1;
                self.write_indent();
                self.write("}");
            }
        }
        self.newline();
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn emit_expr(&mut self, expr: &Expr, parent_prec: u8) {
        let prec = expr.precedence();
        let parens = prec < parent_prec;
        if parens {
            self.write("(");
        }
        match expr {
            Expr::Ident { name, span } => {
                self.mark(span, Some(name));
                self.write(name);
            }
            Expr::Literal { value, span } => {
                self.mark(span, None);
                self.emit_lit(value);
            }
            Expr::Array { items, span } => {
                self.mark(span, None);
                self.write("[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    match item {
                        ArrayItem::Item(expr) => self.emit_expr(expr, 2),
                        ArrayItem::Spread(expr) => {
                            self.write("...");
                            self.emit_expr(expr, 2);
                        }
                    }
                }
                self.write("]");
            }
            Expr::Object { props, span } => {
                self.mark(span, None);
                if props.is_empty() {
                    self.write("{}");
                } else {
                    self.write("{ ");
                    for (i, (key, value)) in props.iter().enumerate() {
                        if i > 0 {
                            self.write(", ");
                        }
                        match key {
                            PropKey::Ident(name) => self.write(name),
                            PropKey::Str(name) => self.write(&quote_str(name)),
                            PropKey::Computed(expr) => {
                                self.write("[");
                                self.emit_expr(expr, 0);
                                self.write("]");
                            }
                        }
                        self.write(": ");
                        self.emit_expr(value, 2);
                    }
                    self.write(" }");
                }
            }
            Expr::SetLit { items, span } => {
                self.mark(span, None);
                self.write("new Set([");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.emit_expr(item, 2);
                }
                self.write("])");
            }
            Expr::Template {
                quasis,
                exprs,
                span,
            } => {
                self.mark(span, None);
                self.write("`");
                for (i, quasi) in quasis.iter().enumerate() {
                    self.write(&escape_template(quasi));
                    if let Some(expr) = exprs.get(i) {
                        self.write("${");
                        self.emit_expr(expr, 0);
                        self.write("}");
                    }
                }
                self.write("`");
            }
            Expr::Call { callee, args, span } => {
                self.mark(span, None);
                self.emit_expr(callee, 18);
                self.emit_args(args);
            }
            Expr::New { callee, args, span } => {
                self.mark(span, None);
                self.write("new ");
                self.emit_expr(callee, 18);
                self.emit_args(args);
            }
            Expr::Member { obj, prop, span } => {
                self.emit_expr(obj, 18);
                self.write(".");
                self.mark(span, Some(prop));
                self.write(prop);
            }
            Expr::Index { obj, index, span } => {
                self.mark(span, None);
                self.emit_expr(obj, 18);
                self.write("[");
                self.emit_expr(index, 0);
                self.write("]");
            }
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => {
                self.mark(span, None);
                self.emit_expr(left, op.precedence());
                self.write(&format!(" {} ", op.text()));
                self.emit_expr(right, op.precedence() + 1);
            }
            Expr::Logical {
                op,
                left,
                right,
                span,
            } => {
                self.mark(span, None);
                self.emit_expr(left, op.precedence());
                self.write(&format!(" {} ", op.text()));
                self.emit_expr(right, op.precedence() + 1);
            }
            Expr::Unary { op, arg, span } => {
                self.mark(span, None);
                self.write(op.text());
                // `--x` would parse as a decrement
                let minus_hazard = *op == UnaryOp::Neg
                    && match &**arg {
                        Expr::Unary { op: UnaryOp::Neg, .. } => true,
                        Expr::Literal { value: Lit::Int(n), .. } => *n < 0,
                        Expr::Literal { value: Lit::Float(n), .. } => *n < 0.0,
                        _ => false,
                    };
                if minus_hazard {
                    self.write("(");
                    self.emit_expr(arg, 0);
                    self.write(")");
                } else {
                    self.emit_expr(arg, 15);
                }
            }
            Expr::Assign {
                target,
                value,
                span,
            } => {
                self.mark(span, None);
                self.emit_expr(target, 18);
                self.write(" = ");
                self.emit_expr(value, 2);
            }
            Expr::Cond {
                test,
                cons,
                alt,
                span,
            } => {
                self.mark(span, None);
                self.emit_expr(test, 4);
                self.write(" ? ");
                self.emit_expr(cons, 3);
                self.write(" : ");
                self.emit_expr(alt, 3);
            }
            Expr::Function { func, span } => {
                self.mark(span, None);
                self.emit_function_text(func, func.name.as_deref());
            }
            Expr::Iife {
                body,
                is_async,
                span,
            } => {
                self.mark(span, None);
                if *is_async {
                    self.write("(async () => ");
                } else {
                    self.write("(() => ");
                }
                self.block(body);
                self.write(")()");
            }
            Expr::Await { arg, span } => {
                self.mark(span, None);
                self.write("await ");
                self.emit_expr(arg, 15);
            }
        }
        if parens {
            self.write(")");
        }
    }

    fn emit_args(&mut self, args: &[Expr]) {
        self.write("(");
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.emit_expr(arg, 2);
        }
        self.write(")");
    }

    fn emit_function_text(&mut self, func: &Function, name: Option<&str>) {
        if func.is_async {
            self.write("async ");
        }
        if func.is_arrow {
            self.emit_params(&func.params);
            self.write(" => ");
        } else {
            self.write("function ");
            if let Some(name) = name {
                self.write(name);
            }
            self.emit_params(&func.params);
            self.write(" ");
        }
        self.block(&func.body);
    }

    fn emit_params(&mut self, params: &[Param]) {
        self.write("(");
        for (i, param) in params.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            if param.rest {
                self.write("...");
            }
            self.emit_pattern(&param.pattern);
            if let Some(default) = &param.default {
                self.write(" = ");
                self.emit_expr(default, 2);
            }
        }
        self.write(")");
    }

    fn emit_pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Ident { name, span } => {
                self.mark(span, Some(name));
                self.write(name);
            }
            Pattern::Array { items, rest, span } => {
                self.mark(span, None);
                self.write("[");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.emit_pattern(item);
                }
                if let Some(rest) = rest {
                    if !items.is_empty() {
                        self.write(", ");
                    }
                    self.write("...");
                    self.emit_pattern(rest);
                }
                self.write("]");
            }
            Pattern::Object { props, span } => {
                self.mark(span, None);
                self.write("{ ");
                for (i, (key, pattern)) in props.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    let shorthand = matches!(
                        pattern,
                        Pattern::Ident { name, .. } if name == key
                    );
                    if shorthand {
                        self.emit_pattern(pattern);
                    } else {
                        self.write(key);
                        self.write(": ");
                        self.emit_pattern(pattern);
                    }
                }
                self.write(" }");
            }
        }
    }

    fn emit_lit(&mut self, value: &Lit) {
        match value {
            Lit::Int(n) => self.write(&n.to_string()),
            Lit::Float(n) => self.write(&format!("{:?}", n)),
            Lit::Str(s) => self.write(&quote_str(s)),
            Lit::Bool(b) => self.write(if *b { "true" } else { "false" }),
            Lit::Null => self.write("null"),
        }
    }
}

fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn escape_template(s: &str) -> String {
    s.replace('\\', "\\\\").replace('`', "\\`").replace("${", "\\${")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::{expand, seed_environment};
    use crate::lexer::lex;
    use crate::lower::lower_program;
    use crate::reader::read_all;

    fn compile_body(source: &str) -> String {
        emit_source(source, SourceMapMode::None).code
    }

    fn emit_source(source: &str, mode: SourceMapMode) -> EmitResult {
        let lexed = lex(source, "demo.hql").unwrap();
        let forms = read_all(&lexed.tokens, "demo.hql").unwrap();
        let env = seed_environment().unwrap();
        let expanded: Vec<_> = forms
            .into_iter()
            .map(|f| expand(f.normalize(), &env).unwrap())
            .collect();
        let lowered = lower_program(&expanded, true).unwrap();
        emit_module(
            &lowered.program,
            &EmitOptions {
                file: "demo.hql",
                source,
                mode,
                helper: lowered.uses_get_helper,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_emit_simple_const() {
        assert_eq!(compile_body("(def answer 42)"), "const answer = 42;\n");
    }

    #[test]
    fn test_emit_operator_precedence() {
        let code = compile_body("(def x (* (+ a b) c))");
        assert_eq!(code, "const x = (a + b) * c;\n");

        let flat = compile_body("(def y (+ (* a b) c))");
        assert_eq!(flat, "const y = a * b + c;\n");
    }

    #[test]
    fn test_emit_function_declaration() {
        let code = compile_body("(defn add [a b] (+ a b))");
        assert!(code.starts_with("function add(a, b) {\n"));
        assert!(code.contains("  return a + b;\n"));
    }

    #[test]
    fn test_emit_rest_params() {
        let code = compile_body("(defn sum [x y ...rest] x)");
        assert!(code.contains("function sum(x, y, ...rest)"));
    }

    #[test]
    fn test_emit_iife_for_do() {
        let code = compile_body("(def x (do (f) 2))");
        assert!(code.contains("const x = (() => {"));
        assert!(code.contains("return 2;"));
        assert!(code.contains("})();"));
    }

    #[test]
    fn test_emit_helper_prefix_and_mapping_shift() {
        let result = emit_source("(def t (:title book))", SourceMapMode::External);
        assert!(result.code.starts_with(GET_HELPER));
        assert!(result.code.contains("get(book, \"title\")"));

        let map: SourceMapJson = serde_json::from_str(&result.map.unwrap()).unwrap();
        // One prepended header line, one leading semicolon
        assert!(map.mappings.starts_with(';'));
        assert!(!map.mappings.starts_with(";;"));
    }

    #[test]
    fn test_no_helper_when_unused() {
        let result = emit_source("(def x 1)", SourceMapMode::External);
        assert!(!result.code.contains("const get"));
        let map: SourceMapJson = serde_json::from_str(&result.map.unwrap()).unwrap();
        assert!(!map.mappings.starts_with(';'));
    }

    #[test]
    fn test_inline_map_data_uri() {
        let result = emit_source("(def x 1)", SourceMapMode::Inline);
        assert!(result.map.is_none());
        assert!(result
            .code
            .contains("//# sourceMappingURL=data:application/json;base64,"));
    }

    #[test]
    fn test_external_map_reference() {
        let result = emit_source("(def x 1)", SourceMapMode::External);
        assert!(result.code.contains("//# sourceMappingURL=demo.js.map"));
        let map: SourceMapJson = serde_json::from_str(&result.map.unwrap()).unwrap();
        assert_eq!(map.sources, vec!["demo.hql"]);
        assert_eq!(
            map.sources_content.unwrap(),
            vec!["(def x 1)".to_string()]
        );
    }

    #[test]
    fn test_sources_content_round_trip() {
        let source = "(defn f [x]\n  (* x 2))";
        let result = emit_source(source, SourceMapMode::External);
        let map: SourceMapJson = serde_json::from_str(&result.map.unwrap()).unwrap();
        assert_eq!(map.sources_content.unwrap()[0], source);
        assert!(map.names.contains(&"f".to_string()));
        assert!(map.names.contains(&"x".to_string()));
    }

    #[test]
    fn test_emit_class() {
        let code = compile_body(
            "(class Point (constructor [x] (set! this.x x)) (method norm [] this.x))",
        );
        assert!(code.contains("class Point {"));
        assert!(code.contains("constructor(x) {"));
        assert!(code.contains("norm() {"));
        assert!(code.contains("this.x = x;"));
    }

    #[test]
    fn test_emit_import_export() {
        let code = compile_body(
            "(import [join as j] from \"node:path\") (export [main]) (defn main [] 1)",
        );
        assert!(code.contains("import { join as j } from \"node:path\";"));
        assert!(code.contains("export { main };"));
    }

    #[test]
    fn test_emit_template_literal() {
        // The IR and emitter carry template literals even though the
        // surface language folds `str` through `+`
        let program = Program {
            body: vec![Stmt::Expr {
                expr: Expr::Template {
                    quasis: vec!["a`".into(), "-${x}".into()],
                    exprs: vec![Expr::Ident {
                        name: "n".into(),
                        span: Span::point("demo.hql", 1, 0),
                    }],
                    span: Span::point("demo.hql", 1, 0),
                },
                span: Span::point("demo.hql", 1, 0),
            }],
        };
        let result = emit_module(
            &program,
            &EmitOptions {
                file: "demo.hql",
                source: "",
                mode: SourceMapMode::None,
                helper: false,
            },
        )
        .unwrap();
        assert_eq!(result.code, "`a\\`${n}-\\${x}`;\n");
    }

    #[test]
    fn test_mapping_for_operand_column() {
        // `x` sits at column 5 of the source; its mapping points there
        let result = emit_source("(inc x)", SourceMapMode::External);
        let map: SourceMapJson = serde_json::from_str(&result.map.unwrap()).unwrap();

        use source_map_mappings::{parse_mappings, Bias};
        let mut parsed = parse_mappings::<()>(map.mappings.as_bytes()).unwrap();
        // Generated: `x + 1;` with the x at generated column 0
        let hit = parsed
            .original_location_for(0, 0, Bias::GreatestLowerBound)
            .expect("mapping for operand");
        let original = hit.original.as_ref().expect("original position");
        assert_eq!(original.original_line, 0);
        assert_eq!(original.original_column, 5);
        assert!(map.names.contains(&"x".to_string()));
    }

    #[test]
    fn test_string_escaping() {
        let code = compile_body("(def s \"a\\\"b\\n\")");
        assert!(code.contains("const s = \"a\\\"b\\n\";"));
    }
}
