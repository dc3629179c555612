// ABOUTME: Tokeniser producing spanned tokens and comment trivia from HQL source text

use crate::error::CompileError;
use crate::span::{LineIndex, Span};
use nom::{
    bytes::complete::take_while1,
    character::complete::{char, digit1, one_of},
    combinator::{opt, recognize},
    IResult, Parser,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,
    /// `#{`
    SetOpen,
    Quote,
    Quasiquote,
    Unquote,
    UnquoteSplice,
    /// String literal with escapes already decoded.
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    Symbol,
    Keyword,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text of the token.
    pub text: String,
    pub span: Span,
}

/// A skipped comment, kept for trivia-aware tooling.
#[derive(Debug, Clone)]
pub struct Trivia {
    pub text: String,
    pub span: Span,
}

#[derive(Debug)]
pub struct LexOutput {
    pub tokens: Vec<Token>,
    pub trivia: Vec<Trivia>,
}

fn is_symbol_start(c: char) -> bool {
    c.is_alphabetic() || "+-*/%<>=!?_&.$".contains(c)
}

fn is_symbol_continue(c: char) -> bool {
    c.is_alphanumeric() || "+-*/%<>=!?_&.$#/".contains(c)
}

/// Integer or float text: `-?\d+` or `-?\d+\.\d+` with optional exponent.
fn number(input: &str) -> IResult<&str, &str> {
    recognize((
        opt(char('-')),
        digit1,
        opt((
            char('.'),
            digit1,
            opt((one_of("eE"), opt(one_of("+-")), digit1)),
        )),
    ))
    .parse(input)
}

fn symbol(input: &str) -> IResult<&str, &str> {
    recognize((
        take_while1(is_symbol_start),
        nom::bytes::complete::take_while(is_symbol_continue),
    ))
    .parse(input)
}

/// Tokenise one file. Comments are skipped but collected as trivia.
pub fn lex(source: &str, file: &str) -> Result<LexOutput, CompileError> {
    let index = LineIndex::new(source);
    let span_for = |start: usize, end: usize| {
        let (sl, sc) = index.line_col(source, start);
        let (el, ec) = index.line_col(source, end);
        Span::new(file, sl, sc, el, ec)
    };

    let mut tokens = Vec::new();
    let mut trivia = Vec::new();
    let mut pos = 0;

    while pos < source.len() {
        let rest = &source[pos..];
        let c = rest.chars().next().expect("in-bounds offset");

        // Whitespace; commas read as whitespace so trailing commas in
        // import lists are tolerated.
        if c.is_whitespace() || c == ',' {
            pos += c.len_utf8();
            continue;
        }

        // Line comment
        if c == ';' {
            let end = rest.find('\n').unwrap_or(rest.len());
            trivia.push(Trivia {
                text: rest[..end].to_string(),
                span: span_for(pos, pos + end),
            });
            pos += end;
            continue;
        }

        // Block comment
        if rest.starts_with("#|") {
            match rest.find("|#") {
                Some(i) => {
                    trivia.push(Trivia {
                        text: rest[..i + 2].to_string(),
                        span: span_for(pos, pos + i + 2),
                    });
                    pos += i + 2;
                }
                None => {
                    return Err(CompileError::parse(
                        "unterminated block comment",
                        span_for(pos, pos + 2),
                    ))
                }
            }
            continue;
        }

        let (kind, len) = next_token(rest, || span_for(pos, pos + 1))?;
        let span = span_for(pos, pos + len);
        tokens.push(Token {
            kind,
            text: rest[..len].to_string(),
            span,
        });
        pos += len;
    }

    Ok(LexOutput { tokens, trivia })
}

/// Match a single token at the start of `rest`. `start_span` produces a
/// span for the first character, used for error reporting.
fn next_token(
    rest: &str,
    start_span: impl Fn() -> Span,
) -> Result<(TokenKind, usize), CompileError> {
    let c = rest.chars().next().expect("non-empty input");

    let simple = match c {
        '(' => Some(TokenKind::OpenParen),
        ')' => Some(TokenKind::CloseParen),
        '[' => Some(TokenKind::OpenBracket),
        ']' => Some(TokenKind::CloseBracket),
        '{' => Some(TokenKind::OpenBrace),
        '}' => Some(TokenKind::CloseBrace),
        '\'' => Some(TokenKind::Quote),
        '`' => Some(TokenKind::Quasiquote),
        _ => None,
    };
    if let Some(kind) = simple {
        return Ok((kind, 1));
    }

    if rest.starts_with("#{") {
        return Ok((TokenKind::SetOpen, 2));
    }
    if rest.starts_with("~@") {
        return Ok((TokenKind::UnquoteSplice, 2));
    }
    if c == '~' {
        return Ok((TokenKind::Unquote, 1));
    }

    if c == '"' {
        let (decoded, len) = lex_string(rest, &start_span)?;
        return Ok((TokenKind::Str(decoded), len));
    }

    if let Ok((remaining, text)) = number(rest) {
        let len = rest.len() - remaining.len();
        let kind = if text.contains('.') {
            let value: f64 = text
                .parse()
                .map_err(|_| CompileError::parse("malformed float literal", start_span()))?;
            TokenKind::Float(value)
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| CompileError::parse("integer literal out of range", start_span()))?;
            TokenKind::Int(value)
        };
        return Ok((kind, len));
    }

    if c == ':' {
        let name = &rest[1..];
        if let Ok((remaining, _)) = symbol(name) {
            let len = 1 + (name.len() - remaining.len());
            return Ok((TokenKind::Keyword, len));
        }
        return Err(CompileError::parse("malformed keyword", start_span()));
    }

    if let Ok((remaining, text)) = symbol(rest) {
        let len = rest.len() - remaining.len();
        let kind = match text {
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            "null" => TokenKind::Null,
            _ => TokenKind::Symbol,
        };
        return Ok((kind, len));
    }

    Err(
        CompileError::parse(format!("unexpected character `{}`", c), start_span())
            .with_suggestion("HQL symbols may contain letters, digits, and +-*/%<>=!?_&.$"),
    )
}

/// Decode a string literal. Returns the decoded text and the consumed
/// length including both quotes. An unterminated string is a ParseError
/// whose span points at the opening quote.
fn lex_string(
    rest: &str,
    start_span: &impl Fn() -> Span,
) -> Result<(String, usize), CompileError> {
    let mut decoded = String::new();
    let mut chars = rest.char_indices().skip(1).peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((decoded, i + 1)),
            '\\' => {
                let (_, esc) = chars.next().ok_or_else(|| {
                    CompileError::parse("unterminated string literal", start_span())
                })?;
                match esc {
                    'n' => decoded.push('\n'),
                    'r' => decoded.push('\r'),
                    't' => decoded.push('\t'),
                    '\\' => decoded.push('\\'),
                    '"' => decoded.push('"'),
                    'x' => decoded.push(read_hex_escape(&mut chars, 2, start_span)?),
                    'u' => decoded.push(read_hex_escape(&mut chars, 4, start_span)?),
                    other => {
                        return Err(CompileError::parse(
                            format!("unknown escape sequence `\\{}`", other),
                            start_span(),
                        ))
                    }
                }
            }
            c => decoded.push(c),
        }
    }

    Err(CompileError::parse(
        "unterminated string literal",
        start_span(),
    ))
}

fn read_hex_escape(
    chars: &mut impl Iterator<Item = (usize, char)>,
    digits: usize,
    start_span: &impl Fn() -> Span,
) -> Result<char, CompileError> {
    let mut value = 0u32;
    for _ in 0..digits {
        let (_, c) = chars
            .next()
            .ok_or_else(|| CompileError::parse("unterminated string literal", start_span()))?;
        let digit = c
            .to_digit(16)
            .ok_or_else(|| CompileError::parse("invalid hex escape", start_span()))?;
        value = value * 16 + digit;
    }
    std::char::from_u32(value)
        .ok_or_else(|| CompileError::parse("invalid hex escape", start_span()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source, "t.hql")
            .unwrap()
            .tokens
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_lex_delimiters() {
        assert_eq!(
            kinds("()[]{}#{"),
            vec![
                TokenKind::OpenParen,
                TokenKind::CloseParen,
                TokenKind::OpenBracket,
                TokenKind::CloseBracket,
                TokenKind::OpenBrace,
                TokenKind::CloseBrace,
                TokenKind::SetOpen,
            ]
        );
    }

    #[test]
    fn test_lex_numbers() {
        assert_eq!(kinds("42"), vec![TokenKind::Int(42)]);
        assert_eq!(kinds("-42"), vec![TokenKind::Int(-42)]);
        assert_eq!(kinds("3.25"), vec![TokenKind::Float(3.25)]);
        assert_eq!(kinds("-0.5"), vec![TokenKind::Float(-0.5)]);
        assert_eq!(kinds("1.5e3"), vec![TokenKind::Float(1500.0)]);
    }

    #[test]
    fn test_lex_symbols_and_operators() {
        let out = lex("foo-bar ->> x.y ...rest & tmp#", "t.hql").unwrap();
        let texts: Vec<&str> = out.tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["foo-bar", "->>", "x.y", "...rest", "&", "tmp#"]);
        assert!(out.tokens.iter().all(|t| t.kind == TokenKind::Symbol));
    }

    #[test]
    fn test_lex_bool_null_keyword() {
        assert_eq!(
            kinds("true false null :key"),
            vec![
                TokenKind::Bool(true),
                TokenKind::Bool(false),
                TokenKind::Null,
                TokenKind::Keyword,
            ]
        );
    }

    #[test]
    fn test_lex_string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\t\"\\""#),
            vec![TokenKind::Str("a\nb\t\"\\".to_string())]
        );
        assert_eq!(kinds(r#""\x41B""#), vec![TokenKind::Str("AB".into())]);
    }

    #[test]
    fn test_unterminated_string_points_at_quote() {
        let err = lex("  \"abc", "t.hql").unwrap_err();
        assert!(err.message.contains("unterminated string"));
        assert_eq!(err.span.start_line, 1);
        assert_eq!(err.span.start_col, 2);
    }

    #[test]
    fn test_quote_marks() {
        assert_eq!(
            kinds("'x `x ~x ~@x"),
            vec![
                TokenKind::Quote,
                TokenKind::Symbol,
                TokenKind::Quasiquote,
                TokenKind::Symbol,
                TokenKind::Unquote,
                TokenKind::Symbol,
                TokenKind::UnquoteSplice,
                TokenKind::Symbol,
            ]
        );
    }

    #[test]
    fn test_comments_become_trivia() {
        let out = lex("; line\n(+ 1 2) #| block |# 3", "t.hql").unwrap();
        assert_eq!(out.trivia.len(), 2);
        assert_eq!(out.trivia[0].text, "; line");
        assert_eq!(out.trivia[1].text, "#| block |#");
        assert_eq!(out.tokens.len(), 6);
    }

    #[test]
    fn test_unterminated_block_comment() {
        assert!(lex("#| never closed", "t.hql").is_err());
    }

    #[test]
    fn test_token_spans() {
        let out = lex("(inc\n  5)", "t.hql").unwrap();
        let five = &out.tokens[2];
        assert_eq!(five.kind, TokenKind::Int(5));
        assert_eq!(five.span.start_line, 2);
        assert_eq!(five.span.start_col, 2);
        assert_eq!(five.span.end_col, 3);
    }

    #[test]
    fn test_commas_are_whitespace() {
        assert_eq!(
            kinds("[a, b,]"),
            vec![
                TokenKind::OpenBracket,
                TokenKind::Symbol,
                TokenKind::Symbol,
                TokenKind::CloseBracket,
            ]
        );
    }
}
