//! Syntax tree produced by the parser.
//!
//! Every node carries the byte offset of its first token so later stages can
//! point back into the source.

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Bool(bool),
    Str(String),
    Na,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOperator {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOperator::Add
                | BinaryOperator::Sub
                | BinaryOperator::Mul
                | BinaryOperator::Div
                | BinaryOperator::Mod
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOperator::And | BinaryOperator::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Mod => "%",
            BinaryOperator::Eq => "==",
            BinaryOperator::NotEq => "!=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    /// Set for `name=value` arguments.
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal {
        value: Literal,
        position: usize,
    },
    Identifier {
        name: String,
        position: usize,
    },
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
        position: usize,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expr>,
        position: usize,
    },
    Call {
        name: String,
        args: Vec<Argument>,
        position: usize,
    },
    /// `target[offset]`: the value of `target` `offset` bars ago.
    Index {
        target: Box<Expr>,
        offset: Box<Expr>,
        position: usize,
    },
}

impl Expr {
    pub fn position(&self) -> usize {
        match self {
            Expr::Literal { position, .. }
            | Expr::Identifier { position, .. }
            | Expr::BinaryOp { position, .. }
            | Expr::UnaryOp { position, .. }
            | Expr::Call { position, .. }
            | Expr::Index { position, .. } => *position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignMode {
    /// `x = expr`, evaluated every bar.
    Declare,
    /// `var x = expr`, initialised once and carried across bars.
    Persistent,
    /// `x := expr`
    Reassign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeHint {
    Int,
    Float,
    Bool,
    Str,
}

impl TypeHint {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(TypeHint::Int),
            "float" => Some(TypeHint::Float),
            "bool" => Some(TypeHint::Bool),
            "string" => Some(TypeHint::Str),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Entry,
    Exit,
    Close,
    CloseAll,
}

impl StrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Entry => "strategy.entry",
            StrategyKind::Exit => "strategy.exit",
            StrategyKind::Close => "strategy.close",
            StrategyKind::CloseAll => "strategy.close_all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Strategy,
    Indicator,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assignment {
        target: String,
        mode: AssignMode,
        type_hint: Option<TypeHint>,
        value: Expr,
        position: usize,
    },
    IfBlock {
        condition: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        position: usize,
    },
    StrategyStatement {
        kind: StrategyKind,
        args: Vec<Argument>,
        position: usize,
    },
    /// `strategy(...)` or `indicator(...)` script header.
    Declaration {
        kind: DeclarationKind,
        args: Vec<Argument>,
        position: usize,
    },
    Expr(Expr),
}

impl Stmt {
    pub fn position(&self) -> usize {
        match self {
            Stmt::Assignment { position, .. }
            | Stmt::IfBlock { position, .. }
            | Stmt::StrategyStatement { position, .. }
            | Stmt::Declaration { position, .. } => *position,
            Stmt::Expr(e) => e.position(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    pub statements: Vec<Stmt>,
}
