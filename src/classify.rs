// ABOUTME: Read-only classification of list heads into special, macro, constructor, or application

use crate::ast::Sexp;
use crate::env::{Binding, Environment};
use std::rc::Rc;

/// The irreducible kernel forms the expander must never rewrite.
/// `macro` is included because the expander consumes macro definitions
/// itself; it is not a rewritable head either.
pub const KERNEL_PRIMITIVES: &[&str] = &[
    "quote",
    "quasiquote",
    "unquote",
    "unquote-splice",
    "if",
    "do",
    "let",
    "var",
    "fn",
    "defn",
    "def",
    "set!",
    "new",
    "throw",
    "try",
    "loop",
    "recur",
    "for-of",
    "while",
    "break",
    "continue",
    "label",
    "js-get",
    "js-set",
    "js-call",
    "import",
    "export",
    "class",
    "method",
    "constructor",
    "async",
    "await",
    "macro",
];

/// Reserved heads that build container literals.
pub const CONSTRUCTORS: &[&str] = &["vector", "hash-map", "hash-set"];

pub fn is_kernel(name: &str) -> bool {
    KERNEL_PRIMITIVES.contains(&name)
}

pub fn is_constructor(name: &str) -> bool {
    CONSTRUCTORS.contains(&name)
}

/// Classification of a list form by its head.
#[derive(Debug, Clone)]
pub enum FormKind {
    Special,
    Macro(Rc<crate::env::MacroDef>),
    Constructor,
    Application,
}

/// Label a form by its head symbol against an environment snapshot.
/// Stateless and idempotent: the same head and environment always
/// produce the same label.
pub fn classify(head: &Sexp, env: &Environment) -> FormKind {
    let name = match head.plain_symbol() {
        Some(name) => name,
        // Computed heads ((f x) y), namespaced symbols, literals
        None => return FormKind::Application,
    };

    // Constructors are resolved before macros so the reserved builders
    // can never be redefined.
    if is_constructor(name) {
        return FormKind::Constructor;
    }

    match env.lookup(name) {
        Some(Binding::Special) => FormKind::Special,
        Some(Binding::Macro(def)) => FormKind::Macro(def),
        // A shadow or value binding hides any outer macro
        Some(Binding::Shadow) | Some(Binding::Value(_)) => FormKind::Application,
        None => {
            if is_kernel(name) {
                FormKind::Special
            } else {
                FormKind::Application
            }
        }
    }
}

/// Seed a root environment with the kernel markers.
pub fn seed_specials(env: &Rc<Environment>) {
    for name in KERNEL_PRIMITIVES {
        env.define_local(*name, Binding::Special);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    fn sym(name: &str) -> Sexp {
        Sexp::symbol(name, Span::point("t.hql", 1, 0))
    }

    #[test]
    fn test_kernel_heads_are_special() {
        let env = Environment::new();
        seed_specials(&env);
        assert!(matches!(classify(&sym("if"), &env), FormKind::Special));
        assert!(matches!(classify(&sym("js-call"), &env), FormKind::Special));
    }

    #[test]
    fn test_constructors_win_over_bindings() {
        let env = Environment::new();
        seed_specials(&env);
        env.define_local("vector", Binding::Shadow);
        assert!(matches!(
            classify(&sym("vector"), &env),
            FormKind::Constructor
        ));
        assert!(matches!(
            classify(&sym("hash-map"), &env),
            FormKind::Constructor
        ));
    }

    #[test]
    fn test_unknown_heads_are_applications() {
        let env = Environment::new();
        seed_specials(&env);
        assert!(matches!(
            classify(&sym("frobnicate"), &env),
            FormKind::Application
        ));
        // Namespaced symbols never match kernel names
        assert!(matches!(classify(&sym("m/if"), &env), FormKind::Application));
    }

    #[test]
    fn test_shadow_hides_macro() {
        use crate::env::MacroDef;
        use std::rc::Weak;

        let env = Environment::new();
        seed_specials(&env);
        env.define_local(
            "twice",
            Binding::Macro(Rc::new(MacroDef {
                name: "twice".into(),
                params: vec!["x".into()],
                rest: None,
                body: vec![],
                span: Span::point("t.hql", 1, 0),
                scope: Weak::new(),
            })),
        );
        assert!(matches!(classify(&sym("twice"), &env), FormKind::Macro(_)));

        let inner = Environment::with_parent(env);
        inner.define_local("twice", Binding::Shadow);
        assert!(matches!(
            classify(&sym("twice"), &inner),
            FormKind::Application
        ));
    }
}
