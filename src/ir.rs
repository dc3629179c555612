// ABOUTME: JavaScript-shaped IR: a closed sum of statements, expressions, and patterns

use crate::span::Span;

/// A whole module: ordered statements.
#[derive(Debug, Clone)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lit {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Const,
    Let,
}

impl DeclKind {
    pub fn text(&self) -> &'static str {
        match self {
            DeclKind::Const => "const",
            DeclKind::Let => "let",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    StrictEq,
    StrictNe,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinOp {
    pub fn text(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::StrictEq => "===",
            BinOp::StrictNe => "!==",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
        }
    }

    pub fn precedence(&self) -> u8 {
        match self {
            BinOp::StrictEq | BinOp::StrictNe => 9,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => 10,
            BinOp::Add | BinOp::Sub => 12,
            BinOp::Mul | BinOp::Div | BinOp::Mod => 13,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn text(&self) -> &'static str {
        match self {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
        }
    }

    pub fn precedence(&self) -> u8 {
        match self {
            LogicalOp::And => 5,
            LogicalOp::Or => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    TypeOf,
}

impl UnaryOp {
    pub fn text(&self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
            UnaryOp::TypeOf => "typeof ",
        }
    }
}

/// Destructuring target on the left of a declaration or parameter.
#[derive(Debug, Clone)]
pub enum Pattern {
    Ident {
        name: String,
        span: Span,
    },
    Array {
        items: Vec<Pattern>,
        rest: Option<Box<Pattern>>,
        span: Span,
    },
    Object {
        /// (property name, binding pattern) pairs
        props: Vec<(String, Pattern)>,
        span: Span,
    },
}

impl Pattern {
    pub fn span(&self) -> &Span {
        match self {
            Pattern::Ident { span, .. }
            | Pattern::Array { span, .. }
            | Pattern::Object { span, .. } => span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Param {
    pub pattern: Pattern,
    pub default: Option<Expr>,
    pub rest: bool,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<String>,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
    pub is_arrow: bool,
}

#[derive(Debug, Clone)]
pub enum PropKey {
    Ident(String),
    Str(String),
    Computed(Expr),
}

#[derive(Debug, Clone)]
pub enum ArrayItem {
    Item(Expr),
    Spread(Expr),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Ident {
        name: String,
        span: Span,
    },
    Literal {
        value: Lit,
        span: Span,
    },
    Array {
        items: Vec<ArrayItem>,
        span: Span,
    },
    Object {
        props: Vec<(PropKey, Expr)>,
        span: Span,
    },
    /// `new Set([...])`
    SetLit {
        items: Vec<Expr>,
        span: Span,
    },
    Template {
        /// Text chunks; always one longer than `exprs`.
        quasis: Vec<String>,
        exprs: Vec<Expr>,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    /// Static member access `obj.prop`
    Member {
        obj: Box<Expr>,
        prop: String,
        span: Span,
    },
    /// Computed member access `obj[index]`
    Index {
        obj: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
        span: Span,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        span: Span,
    },
    /// Ternary conditional
    Cond {
        test: Box<Expr>,
        cons: Box<Expr>,
        alt: Box<Expr>,
        span: Span,
    },
    Function {
        func: Box<Function>,
        span: Span,
    },
    /// A function expression immediately invoked, used to turn statement
    /// sequences into expressions.
    Iife {
        body: Vec<Stmt>,
        is_async: bool,
        span: Span,
    },
    Await {
        arg: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> &Span {
        match self {
            Expr::Ident { span, .. }
            | Expr::Literal { span, .. }
            | Expr::Array { span, .. }
            | Expr::Object { span, .. }
            | Expr::SetLit { span, .. }
            | Expr::Template { span, .. }
            | Expr::Call { span, .. }
            | Expr::New { span, .. }
            | Expr::Member { span, .. }
            | Expr::Index { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Assign { span, .. }
            | Expr::Cond { span, .. }
            | Expr::Function { span, .. }
            | Expr::Iife { span, .. }
            | Expr::Await { span, .. } => span,
        }
    }

    /// Precedence for parenthesisation during emission; higher binds
    /// tighter.
    pub fn precedence(&self) -> u8 {
        match self {
            Expr::Assign { .. } => 2,
            Expr::Cond { .. } => 3,
            Expr::Logical { op, .. } => op.precedence(),
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { .. } | Expr::Await { .. } => 15,
            Expr::Call { .. } | Expr::New { .. } | Expr::Member { .. } | Expr::Index { .. } => 18,
            Expr::Function { .. } => 3,
            _ => 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub binding: Option<Pattern>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct ImportBinding {
    pub imported: String,
    /// Local alias introduced by `as`.
    pub local: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ImportKind {
    Default(String),
    Named(Vec<ImportBinding>),
    Namespace(String),
}

#[derive(Debug, Clone)]
pub struct ClassMember {
    pub is_constructor: bool,
    pub name: String,
    pub func: Function,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr {
        expr: Expr,
        span: Span,
    },
    Decl {
        kind: DeclKind,
        pattern: Pattern,
        init: Option<Expr>,
        span: Span,
    },
    /// Hoistable `function name(...) {}`
    FuncDecl {
        name: String,
        func: Function,
        span: Span,
    },
    Return {
        arg: Option<Expr>,
        span: Span,
    },
    If {
        test: Expr,
        cons: Vec<Stmt>,
        alt: Option<Vec<Stmt>>,
        span: Span,
    },
    Block {
        body: Vec<Stmt>,
        span: Span,
    },
    Throw {
        arg: Expr,
        span: Span,
    },
    Try {
        body: Vec<Stmt>,
        catch: Option<CatchClause>,
        finally: Option<Vec<Stmt>>,
        span: Span,
    },
    ForOf {
        pattern: Pattern,
        iter: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    Break {
        label: Option<String>,
        span: Span,
    },
    Continue {
        label: Option<String>,
        span: Span,
    },
    Labeled {
        label: String,
        body: Vec<Stmt>,
        span: Span,
    },
    Import {
        specifier: String,
        kind: ImportKind,
        span: Span,
    },
    ExportNamed {
        names: Vec<ImportBinding>,
        span: Span,
    },
    ExportDefault {
        expr: Expr,
        span: Span,
    },
    ClassDecl {
        name: String,
        superclass: Option<Expr>,
        members: Vec<ClassMember>,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> &Span {
        match self {
            Stmt::Expr { span, .. }
            | Stmt::Decl { span, .. }
            | Stmt::FuncDecl { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::If { span, .. }
            | Stmt::Block { span, .. }
            | Stmt::Throw { span, .. }
            | Stmt::Try { span, .. }
            | Stmt::ForOf { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Break { span, .. }
            | Stmt::Continue { span, .. }
            | Stmt::Labeled { span, .. }
            | Stmt::Import { span, .. }
            | Stmt::ExportNamed { span, .. }
            | Stmt::ExportDefault { span, .. }
            | Stmt::ClassDecl { span, .. } => span,
        }
    }
}
