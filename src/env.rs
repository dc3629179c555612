// ABOUTME: Compile-time environment managing macro definitions, reserved forms, and scopes

use crate::ast::Sexp;
use crate::interp::Value;
use crate::span::Span;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// A user (or built-in) macro definition. `scope` points at the defining
/// frame so transformer bodies see definition-site bindings.
#[derive(Debug)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<String>,
    pub rest: Option<String>,
    pub body: Vec<Sexp>,
    pub span: Span,
    pub scope: Weak<Environment>,
}

/// What a symbol means to the compile-time environment.
#[derive(Debug, Clone)]
pub enum Binding {
    /// A macro the expander rewrites.
    Macro(Rc<MacroDef>),
    /// A kernel primitive; never rewritten.
    Special,
    /// A value binding, used only by the macro interpreter.
    Value(Value),
    /// Declares the symbol bound without an expansion (binder shadows).
    Shadow,
}

/// A stack of scope frames represented as a parent chain. Lookup walks
/// outward; `define_local` writes the innermost frame, `define_global`
/// the outermost.
#[derive(Debug)]
pub struct Environment {
    bindings: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Environment>>,
}

impl Environment {
    /// Creates the root (global) frame.
    pub fn new() -> Rc<Self> {
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
        })
    }

    /// Pushes a child frame onto `parent`.
    pub fn with_parent(parent: Rc<Environment>) -> Rc<Self> {
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent),
        })
    }

    /// Defines a binding in this frame only.
    pub fn define_local(&self, name: impl Into<String>, binding: Binding) {
        self.bindings.borrow_mut().insert(name.into(), binding);
    }

    /// Defines a binding in the outermost frame.
    pub fn define_global(self: &Rc<Self>, name: impl Into<String>, binding: Binding) {
        let mut frame = self.clone();
        while let Some(parent) = frame.parent.clone() {
            frame = parent;
        }
        frame.define_local(name, binding);
    }

    /// Innermost binding for `name`, walking parent frames.
    pub fn lookup(&self, name: &str) -> Option<Binding> {
        if let Some(binding) = self.bindings.borrow().get(name) {
            return Some(binding.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Whether `name` is bound in this frame (not a parent).
    pub fn defined_here(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name)
    }
}
