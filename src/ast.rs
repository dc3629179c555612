// ABOUTME: S-expression AST nodes, normalisation, and readable re-emission

use crate::span::Span;
use std::fmt;

/// Atomic literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

/// The four reader quote forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    Quote,
    Quasiquote,
    Unquote,
    UnquoteSplice,
}

impl QuoteKind {
    /// The symbol the form normalises to.
    pub fn form_name(&self) -> &'static str {
        match self {
            QuoteKind::Quote => "quote",
            QuoteKind::Quasiquote => "quasiquote",
            QuoteKind::Unquote => "unquote",
            QuoteKind::UnquoteSplice => "unquote-splice",
        }
    }

    pub fn sugar(&self) -> &'static str {
        match self {
            QuoteKind::Quote => "'",
            QuoteKind::Quasiquote => "`",
            QuoteKind::Unquote => "~",
            QuoteKind::UnquoteSplice => "~@",
        }
    }
}

/// One S-expression node. The span covers the node's full source extent.
#[derive(Debug, Clone)]
pub struct Sexp {
    pub kind: SexpKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum SexpKind {
    Symbol {
        name: String,
        namespace: Option<String>,
    },
    Keyword(String),
    Literal(Literal),
    List(Vec<Sexp>),
    Vector(Vec<Sexp>),
    MapLit(Vec<Sexp>),
    SetLit(Vec<Sexp>),
    Quoted {
        quote: QuoteKind,
        inner: Box<Sexp>,
    },
}

impl Sexp {
    /// Build a symbol, splitting an interior `/` into a namespace
    /// qualifier. A bare `/` (division) stays a plain symbol.
    pub fn symbol(text: &str, span: Span) -> Sexp {
        let kind = match text.find('/') {
            Some(idx) if idx > 0 && idx + 1 < text.len() => SexpKind::Symbol {
                name: text[idx + 1..].to_string(),
                namespace: Some(text[..idx].to_string()),
            },
            _ => SexpKind::Symbol {
                name: text.to_string(),
                namespace: None,
            },
        };
        Sexp { kind, span }
    }

    pub fn keyword(name: &str, span: Span) -> Sexp {
        Sexp {
            kind: SexpKind::Keyword(name.to_string()),
            span,
        }
    }

    pub fn literal(value: Literal, span: Span) -> Sexp {
        Sexp {
            kind: SexpKind::Literal(value),
            span,
        }
    }

    pub fn list(items: Vec<Sexp>, span: Span) -> Sexp {
        Sexp {
            kind: SexpKind::List(items),
            span,
        }
    }

    pub fn null(span: Span) -> Sexp {
        Sexp::literal(Literal::Null, span)
    }

    /// The symbol's name when this is an unqualified symbol.
    pub fn plain_symbol(&self) -> Option<&str> {
        match &self.kind {
            SexpKind::Symbol {
                name,
                namespace: None,
            } => Some(name),
            _ => None,
        }
    }

    pub fn is_symbol(&self, expected: &str) -> bool {
        self.plain_symbol() == Some(expected)
    }

    pub fn list_items(&self) -> Option<&[Sexp]> {
        match &self.kind {
            SexpKind::List(items) => Some(items),
            _ => None,
        }
    }

    /// Head symbol of a non-empty list form.
    pub fn head_symbol(&self) -> Option<&str> {
        self.list_items()?.first()?.plain_symbol()
    }

    /// Structural equality ignoring spans. Used by set dedup, the macro
    /// interpreter's `=`, and the fixed-point tests.
    pub fn eq_ignoring_span(&self, other: &Sexp) -> bool {
        match (&self.kind, &other.kind) {
            (
                SexpKind::Symbol {
                    name: a,
                    namespace: an,
                },
                SexpKind::Symbol {
                    name: b,
                    namespace: bn,
                },
            ) => a == b && an == bn,
            (SexpKind::Keyword(a), SexpKind::Keyword(b)) => a == b,
            (SexpKind::Literal(a), SexpKind::Literal(b)) => a == b,
            (SexpKind::List(a), SexpKind::List(b))
            | (SexpKind::Vector(a), SexpKind::Vector(b))
            | (SexpKind::MapLit(a), SexpKind::MapLit(b))
            | (SexpKind::SetLit(a), SexpKind::SetLit(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignoring_span(y))
            }
            (
                SexpKind::Quoted { quote: qa, inner: ia },
                SexpKind::Quoted { quote: qb, inner: ib },
            ) => qa == qb && ia.eq_ignoring_span(ib),
            _ => false,
        }
    }

    /// Rewrite every container and quote form into a list headed by its
    /// builder symbol. The expander and IR builder traverse only this
    /// shape. Head symbols carry the container's span.
    pub fn normalize(self) -> Sexp {
        let span = self.span.clone();
        let headed = |head: &str, items: Vec<Sexp>, span: Span| {
            let mut children = Vec::with_capacity(items.len() + 1);
            children.push(Sexp::symbol(head, span.clone()));
            children.extend(items.into_iter().map(Sexp::normalize));
            Sexp::list(children, span)
        };
        match self.kind {
            SexpKind::List(items) => {
                Sexp::list(items.into_iter().map(Sexp::normalize).collect(), span)
            }
            SexpKind::Vector(items) => headed("vector", items, span),
            SexpKind::MapLit(items) => headed("hash-map", items, span),
            SexpKind::SetLit(items) => headed("hash-set", items, span),
            SexpKind::Quoted { quote, inner } => {
                let mut children = Vec::with_capacity(2);
                children.push(Sexp::symbol(quote.form_name(), span.clone()));
                children.push(inner.normalize());
                Sexp::list(children, span)
            }
            kind => Sexp { kind, span },
        }
    }

    /// Retag spans originating in a different file than `call` (macro
    /// template material) with the macro call's span, so synthetic nodes
    /// always point at the call that produced them.
    pub fn retag_foreign_spans(&mut self, call: &Span) {
        if self.span.file != call.file {
            self.span = call.clone();
        }
        match &mut self.kind {
            SexpKind::List(items)
            | SexpKind::Vector(items)
            | SexpKind::MapLit(items)
            | SexpKind::SetLit(items) => {
                for item in items {
                    item.retag_foreign_spans(call);
                }
            }
            SexpKind::Quoted { inner, .. } => inner.retag_foreign_spans(call),
            _ => {}
        }
    }

    /// Walk the node and all descendants.
    pub fn walk(&self, visit: &mut dyn FnMut(&Sexp)) {
        visit(self);
        match &self.kind {
            SexpKind::List(items)
            | SexpKind::Vector(items)
            | SexpKind::MapLit(items)
            | SexpKind::SetLit(items) => {
                for item in items {
                    item.walk(visit);
                }
            }
            SexpKind::Quoted { inner, .. } => inner.walk(visit),
            _ => {}
        }
    }
}

fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Sexp]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SexpKind::Symbol { name, namespace } => match namespace {
                Some(ns) => write!(f, "{}/{}", ns, name),
                None => write!(f, "{}", name),
            },
            SexpKind::Keyword(name) => write!(f, ":{}", name),
            SexpKind::Literal(Literal::Int(n)) => write!(f, "{}", n),
            // Debug formatting keeps a decimal point, so floats re-read as floats
            SexpKind::Literal(Literal::Float(n)) => write!(f, "{:?}", n),
            SexpKind::Literal(Literal::Str(s)) => write!(f, "\"{}\"", escape_str(s)),
            SexpKind::Literal(Literal::Bool(b)) => write!(f, "{}", b),
            SexpKind::Literal(Literal::Null) => write!(f, "null"),
            SexpKind::List(items) => {
                write!(f, "(")?;
                write_seq(f, items)?;
                write!(f, ")")
            }
            SexpKind::Vector(items) => {
                write!(f, "[")?;
                write_seq(f, items)?;
                write!(f, "]")
            }
            SexpKind::MapLit(items) => {
                write!(f, "{{")?;
                write_seq(f, items)?;
                write!(f, "}}")
            }
            SexpKind::SetLit(items) => {
                write!(f, "#{{")?;
                write_seq(f, items)?;
                write!(f, "}}")
            }
            SexpKind::Quoted { quote, inner } => write!(f, "{}{}", quote.sugar(), inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp() -> Span {
        Span::point("t.hql", 1, 0)
    }

    #[test]
    fn test_symbol_namespace_split() {
        let plain = Sexp::symbol("foo", sp());
        assert_eq!(plain.plain_symbol(), Some("foo"));

        let qualified = Sexp::symbol("str/join", sp());
        match &qualified.kind {
            SexpKind::Symbol { name, namespace } => {
                assert_eq!(name, "join");
                assert_eq!(namespace.as_deref(), Some("str"));
            }
            _ => panic!("Expected symbol"),
        }

        // Bare division operator is not namespaced
        let div = Sexp::symbol("/", sp());
        assert_eq!(div.plain_symbol(), Some("/"));
    }

    #[test]
    fn test_normalize_vector() {
        let vec = Sexp {
            kind: SexpKind::Vector(vec![
                Sexp::literal(Literal::Int(1), sp()),
                Sexp::literal(Literal::Int(2), sp()),
            ]),
            span: sp(),
        };
        let normal = vec.normalize();
        assert_eq!(normal.head_symbol(), Some("vector"));
        assert_eq!(normal.list_items().unwrap().len(), 3);
    }

    #[test]
    fn test_normalize_quote() {
        let quoted = Sexp {
            kind: SexpKind::Quoted {
                quote: QuoteKind::Quasiquote,
                inner: Box::new(Sexp::symbol("x", sp())),
            },
            span: sp(),
        };
        let normal = quoted.normalize();
        assert_eq!(normal.head_symbol(), Some("quasiquote"));
    }

    #[test]
    fn test_eq_ignoring_span() {
        let a = Sexp::list(
            vec![Sexp::symbol("+", sp()), Sexp::literal(Literal::Int(1), sp())],
            sp(),
        );
        let b = Sexp::list(
            vec![
                Sexp::symbol("+", Span::point("t.hql", 9, 9)),
                Sexp::literal(Literal::Int(1), Span::point("t.hql", 9, 12)),
            ],
            Span::point("t.hql", 9, 8),
        );
        assert!(a.eq_ignoring_span(&b));

        let c = Sexp::list(vec![Sexp::symbol("-", sp())], sp());
        assert!(!a.eq_ignoring_span(&c));
    }

    #[test]
    fn test_display_round_trip_shapes() {
        let form = Sexp::list(
            vec![
                Sexp::symbol("f", sp()),
                Sexp {
                    kind: SexpKind::Vector(vec![Sexp::literal(Literal::Int(1), sp())]),
                    span: sp(),
                },
                Sexp::keyword("k", sp()),
                Sexp::literal(Literal::Str("a\"b".into()), sp()),
                Sexp::literal(Literal::Float(2.0), sp()),
            ],
            sp(),
        );
        assert_eq!(format!("{}", form), "(f [1] :k \"a\\\"b\" 2.0)");
    }

    #[test]
    fn test_retag_foreign_spans() {
        let call = Span::new("user.hql", 4, 2, 4, 9);
        let mut tree = Sexp::list(
            vec![
                Sexp::symbol("if", Span::point("macros.hql", 10, 0)),
                Sexp::symbol("x", Span::point("user.hql", 4, 5)),
            ],
            Span::point("macros.hql", 10, 0),
        );
        tree.retag_foreign_spans(&call);
        assert_eq!(tree.span, call);
        let items = tree.list_items().unwrap();
        assert_eq!(items[0].span, call);
        // User-file spans survive
        assert_eq!(items[1].span.start_col, 5);
    }
}
