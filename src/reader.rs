// ABOUTME: Reader folding tokens into S-expression AST nodes with source spans

use crate::ast::{Literal, QuoteKind, Sexp, SexpKind};
use crate::error::CompileError;
use crate::lexer::{Token, TokenKind};
use crate::span::Span;

pub struct Reader<'a> {
    tokens: &'a [Token],
    pos: usize,
    file: &'a str,
}

/// Read every top-level form in the token stream.
pub fn read_all(tokens: &[Token], file: &str) -> Result<Vec<Sexp>, CompileError> {
    let mut reader = Reader {
        tokens,
        pos: 0,
        file,
    };
    let mut forms = Vec::new();
    while reader.peek().is_some() {
        forms.push(reader.read_form()?);
    }
    Ok(forms)
}

/// Read exactly one form; trailing tokens are a ParseError.
pub fn read_one(tokens: &[Token], file: &str) -> Result<Sexp, CompileError> {
    let mut reader = Reader {
        tokens,
        pos: 0,
        file,
    };
    let form = match reader.peek() {
        Some(_) => reader.read_form()?,
        None => {
            return Err(CompileError::parse(
                "expected an expression",
                Span::point(file, 1, 0),
            ))
        }
    };
    if let Some(extra) = reader.peek() {
        return Err(CompileError::parse(
            "unexpected trailing input",
            extra.span.clone(),
        ));
    }
    Ok(form)
}

impl<'a> Reader<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eof_span(&self) -> Span {
        self.tokens
            .last()
            .map(|t| t.span.clone())
            .unwrap_or_else(|| Span::point(self.file, 1, 0))
    }

    fn read_form(&mut self) -> Result<Sexp, CompileError> {
        let token = self
            .next()
            .ok_or_else(|| CompileError::parse("unexpected end of input", self.eof_span()))?;

        match &token.kind {
            TokenKind::OpenParen => {
                let (items, span) = self.read_until(token, TokenKind::CloseParen, "(")?;
                Ok(Sexp {
                    kind: SexpKind::List(items),
                    span,
                })
            }
            TokenKind::OpenBracket => {
                let (items, span) = self.read_until(token, TokenKind::CloseBracket, "[")?;
                Ok(Sexp {
                    kind: SexpKind::Vector(items),
                    span,
                })
            }
            TokenKind::OpenBrace => {
                let (items, span) = self.read_until(token, TokenKind::CloseBrace, "{")?;
                validate_map_literal(&items, &span)?;
                Ok(Sexp {
                    kind: SexpKind::MapLit(items),
                    span,
                })
            }
            TokenKind::SetOpen => {
                let (items, span) = self.read_until(token, TokenKind::CloseBrace, "#{")?;
                Ok(Sexp {
                    kind: SexpKind::SetLit(dedupe_set_items(items)),
                    span,
                })
            }
            TokenKind::Quote => self.read_quoted(QuoteKind::Quote, token),
            TokenKind::Quasiquote => self.read_quoted(QuoteKind::Quasiquote, token),
            TokenKind::Unquote => self.read_quoted(QuoteKind::Unquote, token),
            TokenKind::UnquoteSplice => self.read_quoted(QuoteKind::UnquoteSplice, token),
            TokenKind::CloseParen | TokenKind::CloseBracket | TokenKind::CloseBrace => Err(
                CompileError::parse("unmatched closing delimiter", token.span.clone()),
            ),
            TokenKind::Str(s) => Ok(Sexp::literal(Literal::Str(s.clone()), token.span.clone())),
            TokenKind::Int(n) => Ok(Sexp::literal(Literal::Int(*n), token.span.clone())),
            TokenKind::Float(n) => Ok(Sexp::literal(Literal::Float(*n), token.span.clone())),
            TokenKind::Bool(b) => Ok(Sexp::literal(Literal::Bool(*b), token.span.clone())),
            TokenKind::Null => Ok(Sexp::literal(Literal::Null, token.span.clone())),
            TokenKind::Symbol => Ok(Sexp::symbol(&token.text, token.span.clone())),
            TokenKind::Keyword => Ok(Sexp::keyword(&token.text[1..], token.span.clone())),
        }
    }

    fn read_until(
        &mut self,
        open: &Token,
        close: TokenKind,
        open_text: &str,
    ) -> Result<(Vec<Sexp>, Span), CompileError> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(token) if token.kind == close => {
                    let close_token = self.next().expect("peeked close delimiter");
                    return Ok((items, open.span.merge(&close_token.span)));
                }
                Some(_) => items.push(self.read_form()?),
                None => {
                    return Err(CompileError::parse(
                        format!("unclosed `{}`", open_text),
                        open.span.clone(),
                    ))
                }
            }
        }
    }

    fn read_quoted(&mut self, quote: QuoteKind, mark: &Token) -> Result<Sexp, CompileError> {
        if self.peek().is_none() {
            return Err(CompileError::parse(
                format!("`{}` must be followed by a form", mark.text),
                mark.span.clone(),
            ));
        }
        let inner = self.read_form()?;
        let span = mark.span.merge(&inner.span);
        Ok(Sexp {
            kind: SexpKind::Quoted {
                quote,
                inner: Box::new(inner),
            },
            span,
        })
    }
}

/// Map literals need an even child count, and literal keys must be unique.
fn validate_map_literal(items: &[Sexp], span: &Span) -> Result<(), CompileError> {
    if items.len() % 2 != 0 {
        return Err(CompileError::validation(
            "map literal must have an even number of forms",
            span.clone(),
        )
        .with_suggestion("map literals alternate keys and values: {:a 1 :b 2}"));
    }
    let keys: Vec<&Sexp> = items.iter().step_by(2).collect();
    for (i, key) in keys.iter().enumerate() {
        let comparable = matches!(
            key.kind,
            SexpKind::Literal(_) | SexpKind::Keyword(_)
        );
        if !comparable {
            continue;
        }
        if keys[..i].iter().any(|prev| prev.eq_ignoring_span(key)) {
            return Err(CompileError::validation(
                format!("duplicate map key `{}`", key),
                key.span.clone(),
            ));
        }
    }
    Ok(())
}

/// Sets deduplicate structurally but keep first-occurrence order so
/// emission stays deterministic.
fn dedupe_set_items(items: Vec<Sexp>) -> Vec<Sexp> {
    let mut unique: Vec<Sexp> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.iter().any(|seen| seen.eq_ignoring_span(&item)) {
            unique.push(item);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn read(source: &str) -> Result<Vec<Sexp>, CompileError> {
        let out = lex(source, "t.hql")?;
        read_all(&out.tokens, "t.hql")
    }

    fn read1(source: &str) -> Sexp {
        read(source).unwrap().remove(0)
    }

    #[test]
    fn test_read_nested_list() {
        let form = read1("(+ 1 (inc 2))");
        let items = form.list_items().unwrap();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_symbol("+"));
        assert_eq!(items[2].head_symbol(), Some("inc"));
    }

    #[test]
    fn test_read_vector_and_map() {
        let vector = read1("[1 2 3]");
        assert!(matches!(&vector.kind, SexpKind::Vector(items) if items.len() == 3));

        let map = read1("{:a 1 :b 2}");
        assert!(matches!(&map.kind, SexpKind::MapLit(items) if items.len() == 4));
    }

    #[test]
    fn test_map_odd_count_is_validation_error() {
        let err = read("{:a 1 :b}").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_map_duplicate_literal_key() {
        let err = read("{:a 1 :a 2}").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
        assert!(err.message.contains("duplicate map key"));

        // Symbol keys cannot be compared at compile time
        assert!(read("{x 1 x 2}").is_ok());
    }

    #[test]
    fn test_set_dedupe_keeps_order() {
        let set = read1("#{1 2 1 3 2}");
        match &set.kind {
            SexpKind::SetLit(items) => {
                let printed: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                assert_eq!(printed, vec!["1", "2", "3"]);
            }
            _ => panic!("Expected set literal"),
        }
    }

    #[test]
    fn test_quote_sugar_wraps() {
        let form = read1("'(1 2)");
        match &form.kind {
            SexpKind::Quoted { quote, inner } => {
                assert_eq!(*quote, QuoteKind::Quote);
                assert!(matches!(inner.kind, SexpKind::List(_)));
            }
            _ => panic!("Expected quoted form"),
        }

        let spliced = read1("`(a ~@xs)");
        assert!(matches!(
            &spliced.kind,
            SexpKind::Quoted {
                quote: QuoteKind::Quasiquote,
                ..
            }
        ));
    }

    #[test]
    fn test_span_covers_delimiters() {
        let form = read1("(+ 1\n   2)");
        assert_eq!(form.span.start_line, 1);
        assert_eq!(form.span.start_col, 0);
        assert_eq!(form.span.end_line, 2);
        assert_eq!(form.span.end_col, 5);
    }

    #[test]
    fn test_unmatched_delimiters() {
        assert!(read("(1 2").is_err());
        assert!(read(")").is_err());
        assert!(read("[1 2)").is_err());
    }

    #[test]
    fn test_read_round_trip() {
        let source = "(defn f [x & rest] {:a 1} #{2} '(3 ~x))";
        let first = read1(source);
        let reprinted = first.to_string();
        let second = read1(&reprinted);
        assert!(first.eq_ignoring_span(&second));
    }

    #[test]
    fn test_read_one_rejects_trailing() {
        let out = lex("1 2", "t.hql").unwrap();
        assert!(read_one(&out.tokens, "t.hql").is_err());
    }
}
