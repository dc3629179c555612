// ABOUTME: Error kinds carried through the compile pipeline and sourced report rendering

use crate::span::Span;
use std::fmt;
use thiserror::Error;

/// The disjoint error kinds of the pipeline. Each has a fixed meaning;
/// no component converts one kind into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid token or unbalanced delimiter.
    Parse,
    /// Well-formedness violation (duplicate map key, odd map literal, ...).
    Validation,
    /// Macro-level failure: arity, undefined symbol in a body, depth limit,
    /// or a compile-time `throw`.
    Macro,
    /// Post-expansion AST shape the IR builder does not recognise.
    Transform,
    /// Identifier collision or invariant breach during emission.
    CodeGen,
    /// Malformed import form.
    Import,
    /// Runtime mapping failure; never raised by the compile pipeline itself.
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Parse => "ParseError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Macro => "MacroError",
            ErrorKind::Transform => "TransformError",
            ErrorKind::CodeGen => "CodeGenError",
            ErrorKind::Import => "ImportError",
            ErrorKind::Runtime => "RuntimeError",
        };
        write!(f, "{}", name)
    }
}

/// One line of source context captured around an error span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLine {
    /// 1-based line number in the source file.
    pub number: u32,
    pub text: String,
    /// Whether this is the line the error points at.
    pub is_error_line: bool,
}

/// A sourced compile error: kind, message, span, optional suggestion and
/// up to five lines of surrounding context.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message} at {span}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub suggestion: Option<String>,
    pub context: Vec<ContextLine>,
}

/// Maximum number of context lines captured around an error.
const CONTEXT_WINDOW: u32 = 5;

impl CompileError {
    fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        CompileError {
            kind,
            message: message.into(),
            span,
            suggestion: None,
            context: Vec::new(),
        }
    }

    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Parse, message, span)
    }

    pub fn validation(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Validation, message, span)
    }

    pub fn macro_error(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Macro, message, span)
    }

    pub fn transform(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Transform, message, span)
    }

    pub fn codegen(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::CodeGen, message, span)
    }

    pub fn import(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Import, message, span)
    }

    pub fn runtime(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Runtime, message, span)
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Wrap a macro error raised while evaluating a transformer so the
    /// report names the macro call it occurred in. Only outer components
    /// attach context; the kind never changes.
    pub fn in_macro_expansion(mut self, name: &str, call_span: &Span) -> Self {
        self.message = format!("{} (in expansion of `{}`)", self.message, name);
        // Errors pointing into the shipped macros file are re-anchored at
        // the call site, which is the position the user can act on.
        if self.span.file != call_span.file {
            self.span = call_span.clone();
        }
        self
    }

    /// Capture up to five context lines around the span. Does nothing when
    /// the span belongs to a different file than the given source.
    pub fn with_source(mut self, file: &str, source: &str) -> Self {
        if &*self.span.file != file || !self.context.is_empty() {
            return self;
        }
        let error_line = self.span.start_line;
        let first = error_line.saturating_sub(CONTEXT_WINDOW / 2).max(1);
        for (i, text) in source.lines().enumerate() {
            let number = i as u32 + 1;
            if number < first {
                continue;
            }
            if number >= first + CONTEXT_WINDOW {
                break;
            }
            self.context.push(ContextLine {
                number,
                text: text.to_string(),
                is_error_line: number == error_line,
            });
        }
        self
    }

    /// Render the user-visible report: header, context window with a caret
    /// under the error column, and a trailing `hint:` when present.
    pub fn report(&self) -> String {
        let mut out = format!("{}: {} at {}", self.kind, self.message, self.span);
        let width = self
            .context
            .iter()
            .map(|l| l.number.to_string().len())
            .max()
            .unwrap_or(0);
        for line in &self.context {
            let marker = if line.is_error_line { ">" } else { " " };
            out.push_str(&format!(
                "\n{} {:>w$} | {}",
                marker,
                line.number,
                line.text,
                w = width
            ));
            if line.is_error_line {
                let caret_count = if self.span.end_line == self.span.start_line {
                    (self.span.end_col.saturating_sub(self.span.start_col)).max(1)
                } else {
                    1
                };
                out.push_str(&format!(
                    "\n  {:>w$} | {}{}",
                    "",
                    " ".repeat(self.span.start_col as usize),
                    "^".repeat(caret_count as usize),
                    w = width
                ));
            }
        }
        if let Some(hint) = &self.suggestion {
            out.push_str(&format!("\nhint: {}", hint));
        }
        out
    }
}
