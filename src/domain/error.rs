//! Domain error types.
//!
//! Each pipeline stage has its own error: [`LexError`], [`ParseError`],
//! [`SemanticError`] and [`RuntimeError`]. [`PineError`] aggregates them
//! together with the configuration, data and I/O failures of the adapters.

use chrono::NaiveDateTime;

use crate::domain::ir::ValueType;

/// Render the source line containing `offset` with a caret under the column.
pub fn caret_context(source: &str, offset: usize) -> String {
    let offset = offset.min(source.len());
    let line_start = source[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = source[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(source.len());
    let line_no = source[..line_start].matches('\n').count() + 1;
    let column = source[line_start..offset].chars().count();
    let gutter = format!("{line_no} | ");
    format!(
        "{gutter}{line}\n{pad}^",
        line = &source[line_start..line_end],
        pad = " ".repeat(gutter.len() + column)
    )
}

/// An unrecognized character, unterminated string or broken indentation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("lex error at offset {offset}: {message} ('{}')", .character.escape_default())]
pub struct LexError {
    pub character: char,
    pub offset: usize,
    pub message: String,
}

impl LexError {
    pub fn display_with_context(&self, source: &str) -> String {
        format!("{}\n{}", caret_context(source, self.offset), self)
    }
}

/// A grammar violation: the parser wanted `expected` but saw `found`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: expected {expected}, found {found}")]
pub struct ParseError {
    pub expected: String,
    pub found: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, source: &str) -> String {
        format!("{}\n{}", caret_context(source, self.position), self)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SemanticError {
    #[error("unknown function '{name}' at position {position}")]
    UnknownFunction { name: String, position: usize },

    #[error("type mismatch in {context} at position {position}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: ValueType,
        found: ValueType,
        position: usize,
    },

    #[error("unresolved identifier '{name}' at position {position}")]
    UnresolvedIdentifier { name: String, position: usize },

    #[error("invalid argument to {function} at position {position}: {reason}")]
    InvalidArgument {
        function: String,
        reason: String,
        position: usize,
    },

    #[error("'{name}' is already declared (position {position})")]
    DuplicateDeclaration { name: String, position: usize },

    #[error("script is not a strategy: {reason} (position {position})")]
    NotAStrategy { reason: String, position: usize },
}

impl SemanticError {
    pub fn position(&self) -> usize {
        match self {
            SemanticError::UnknownFunction { position, .. }
            | SemanticError::TypeMismatch { position, .. }
            | SemanticError::UnresolvedIdentifier { position, .. }
            | SemanticError::InvalidArgument { position, .. }
            | SemanticError::DuplicateDeclaration { position, .. }
            | SemanticError::NotAStrategy { position, .. } => *position,
        }
    }

    pub fn display_with_context(&self, source: &str) -> String {
        format!("{}\n{}", caret_context(source, self.position()), self)
    }
}

/// Failures raised while a backtest is running.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("division by zero on bar {bar_index}")]
    DivisionByZero { bar_index: usize },

    #[error("invalid window length {length} for {indicator}")]
    InvalidWindow { indicator: String, length: i64 },

    #[error("bar {bar_index} at {timestamp} does not follow {previous}")]
    OutOfOrderBar {
        bar_index: usize,
        previous: NaiveDateTime,
        timestamp: NaiveDateTime,
    },

    #[error("invalid bar {bar_index}: {reason}")]
    InvalidBar { bar_index: usize, reason: String },

    #[error("backtest already finished")]
    RunFinished,
}

/// Top-level error type for pinetrader.
#[derive(Debug, thiserror::Error)]
pub enum PineError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Semantic(#[from] SemanticError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("no data for {symbol} ({timeframe})")]
    NoData { symbol: String, timeframe: String },

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PineError {
    /// Source offset for errors raised while compiling a script.
    pub fn position(&self) -> Option<usize> {
        match self {
            PineError::Lex(e) => Some(e.offset),
            PineError::Parse(e) => Some(e.position),
            PineError::Semantic(e) => Some(e.position()),
            _ => None,
        }
    }

    pub fn display_with_context(&self, source: &str) -> String {
        match self.position() {
            Some(offset) => format!("{}\n{}", caret_context(source, offset), self),
            None => self.to_string(),
        }
    }

    /// Process exit status for this error category.
    pub fn exit_status(&self) -> u8 {
        match self {
            PineError::Io(_) | PineError::Report { .. } => 1,
            PineError::ConfigParse { .. }
            | PineError::ConfigMissing { .. }
            | PineError::ConfigInvalid { .. } => 2,
            PineError::DataSource { .. }
            | PineError::Database { .. }
            | PineError::DatabaseQuery { .. } => 3,
            PineError::Lex(_) | PineError::Parse(_) | PineError::Semantic(_) => 4,
            PineError::NoData { .. } => 5,
            PineError::Runtime(_) => 6,
        }
    }
}

impl From<&PineError> for std::process::ExitCode {
    fn from(err: &PineError) -> Self {
        std::process::ExitCode::from(err.exit_status())
    }
}
