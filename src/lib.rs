// ABOUTME: Library module exposing the compiler pipeline and the compilation entry point

pub mod ast;
pub mod classify;
pub mod emit;
pub mod env;
pub mod error;
pub mod expand;
pub mod interp;
pub mod ir;
pub mod lexer;
pub mod lower;
pub mod reader;
pub mod sourcemap;
pub mod span;
pub mod stack_trace;

pub use emit::SourceMapMode;
pub use error::{CompileError, ErrorKind};

use crate::ast::Sexp;
use log::{debug, info};
use std::path::PathBuf;

/// Options for one compilation unit.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Log compile phases at info level.
    pub verbose: bool,
    pub source_map: SourceMapMode,
    /// Prepend the `get(obj, key)` helper when dynamic accessor calls are
    /// detected.
    pub emit_helper_prefix: bool,
    /// JavaScript dialect; recorded for drivers, the emitter targets it.
    pub target: String,
    /// Directory import paths are resolved against in error reports.
    pub base_dir: Option<PathBuf>,
    /// Overrides the span file identifier.
    pub current_file: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            verbose: false,
            source_map: SourceMapMode::Inline,
            emit_helper_prefix: true,
            target: "es2020".to_string(),
            base_dir: None,
            current_file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub code: String,
    /// Map text in external mode; inline mode embeds it in `code`.
    pub map: Option<String>,
}

/// Compile one HQL source text to JavaScript.
///
/// The pipeline is a straight-line transformation: lex, read, normalise,
/// expand, lower, emit. Errors surface with source context attached.
pub fn compile(
    source: &str,
    file: &str,
    options: &CompileOptions,
) -> Result<CompileOutput, CompileError> {
    let file_id = options.current_file.as_deref().unwrap_or(file).to_string();

    let result = compile_phases(source, &file_id, options);
    result.map_err(|mut err| {
        if err.kind == ErrorKind::Import {
            if let Some(dir) = &options.base_dir {
                let note = format!("import paths resolve against {}", dir.display());
                err.suggestion = Some(match err.suggestion.take() {
                    Some(existing) => format!("{} ({})", existing, note),
                    None => note,
                });
            }
        }
        err.with_source(&file_id, source)
    })
}

fn compile_phases(
    source: &str,
    file_id: &str,
    options: &CompileOptions,
) -> Result<CompileOutput, CompileError> {
    let phase = |name: &str| {
        if options.verbose {
            info!("{}: {}", file_id, name);
        } else {
            debug!("{}: {}", file_id, name);
        }
    };

    phase("lex");
    let lexed = lexer::lex(source, file_id)?;

    phase("read");
    let forms = reader::read_all(&lexed.tokens, file_id)?;
    let forms: Vec<Sexp> = forms.into_iter().map(Sexp::normalize).collect();

    phase("expand");
    let env = expand::seed_environment()?;
    let expanded = expand::expand_program(forms, &env)?;

    phase("lower");
    let lowered = lower::lower_program(&expanded, options.emit_helper_prefix)?;

    phase("emit");
    debug!("target dialect: {}", options.target);
    let result = emit::emit_module(
        &lowered.program,
        &emit::EmitOptions {
            file: file_id,
            source,
            mode: options.source_map,
            helper: lowered.uses_get_helper,
        },
    )?;

    Ok(CompileOutput {
        code: result.code,
        map: result.map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_simple_program() {
        let out = compile("(def x (+ 1 2))", "demo.hql", &CompileOptions::default()).unwrap();
        assert!(out.code.starts_with("const x = 3;"));
        assert!(out.code.contains("sourceMappingURL=data:application/json;base64,"));
        assert!(out.map.is_none());
    }

    #[test]
    fn test_compile_external_map() {
        let options = CompileOptions {
            source_map: SourceMapMode::External,
            ..CompileOptions::default()
        };
        let out = compile("(def x 1)", "demo.hql", &options).unwrap();
        assert!(out.map.is_some());
        assert!(out.code.contains("sourceMappingURL=demo.js.map"));
    }

    #[test]
    fn test_compile_error_carries_context() {
        let err = compile("(def x\n  {:a 1 :a 2})", "demo.hql", &CompileOptions::default())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.context.is_empty());
        assert!(err.report().contains("duplicate map key"));
    }

    #[test]
    fn test_current_file_overrides_span_file() {
        let options = CompileOptions {
            current_file: Some("src/app.hql".to_string()),
            source_map: SourceMapMode::External,
            ..CompileOptions::default()
        };
        let out = compile("(def x 1)", "ignored.hql", &options).unwrap();
        let map: sourcemap::SourceMapJson =
            serde_json::from_str(out.map.as_deref().unwrap()).unwrap();
        assert_eq!(map.sources, vec!["src/app.hql"]);
    }

    #[test]
    fn test_import_error_mentions_base_dir() {
        let options = CompileOptions {
            base_dir: Some(PathBuf::from("/proj/src")),
            ..CompileOptions::default()
        };
        let err = compile("(import a b)", "demo.hql", &options).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Import);
        assert!(err.suggestion.unwrap().contains("/proj/src"));
    }
}
