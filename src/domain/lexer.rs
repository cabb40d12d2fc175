//! Script lexer.
//!
//! [`Lexer`] is a lazy iterator over [`Token`]s. Layout is significant: the
//! lexer emits `Newline` at the end of each logical line and `Indent`/`Dedent`
//! when the indentation of a line changes. Newlines inside `(...)` or `[...]`
//! are ignored, as are blank and comment-only lines. Lexing is all-or-nothing:
//! after the first [`LexError`] the iterator is exhausted.

use std::collections::VecDeque;
use std::fmt;

use crate::domain::error::LexError;

const TAB_WIDTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    Var,
    And,
    Or,
    Not,
    True,
    False,
    Na,
    StrategyEntry,
    StrategyExit,
    StrategyClose,
    StrategyCloseAll,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        let kw = match word {
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "var" => Keyword::Var,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "not" => Keyword::Not,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "na" => Keyword::Na,
            "strategy.entry" => Keyword::StrategyEntry,
            "strategy.exit" => Keyword::StrategyExit,
            "strategy.close" => Keyword::StrategyClose,
            "strategy.close_all" => Keyword::StrategyCloseAll,
            _ => return None,
        };
        Some(kw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::Var => "var",
            Keyword::And => "and",
            Keyword::Or => "or",
            Keyword::Not => "not",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::Na => "na",
            Keyword::StrategyEntry => "strategy.entry",
            Keyword::StrategyExit => "strategy.exit",
            Keyword::StrategyClose => "strategy.close",
            Keyword::StrategyCloseAll => "strategy.close_all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    Reassign,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Star => "*",
            Operator::Slash => "/",
            Operator::Percent => "%",
            Operator::EqEq => "==",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Assign => "=",
            Operator::Reassign => ":=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

impl Punct {
    pub fn as_char(self) -> char {
        match self {
            Punct::LParen => '(',
            Punct::RParen => ')',
            Punct::LBracket => '[',
            Punct::RBracket => ']',
            Punct::Comma => ',',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Number,
    /// String literal; the token lexeme holds the unescaped contents.
    Str,
    Keyword(Keyword),
    Operator(Operator),
    Punct(Punct),
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier => f.write_str("identifier"),
            TokenKind::Number => f.write_str("number"),
            TokenKind::Str => f.write_str("string"),
            TokenKind::Keyword(k) => write!(f, "'{}'", k.as_str()),
            TokenKind::Operator(op) => write!(f, "'{}'", op.as_str()),
            TokenKind::Punct(p) => write!(f, "'{}'", p.as_char()),
            TokenKind::Newline => f.write_str("end of line"),
            TokenKind::Indent => f.write_str("indent"),
            TokenKind::Dedent => f.write_str("dedent"),
            TokenKind::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub offset: usize,
}

impl Token {
    fn new(kind: TokenKind, lexeme: impl Into<String>, offset: usize) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            offset,
        }
    }

    /// How the token reads in an error message.
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Identifier => format!("identifier '{}'", self.lexeme),
            TokenKind::Number => format!("number {}", self.lexeme),
            TokenKind::Str => format!("string \"{}\"", self.lexeme),
            other => other.to_string(),
        }
    }
}

/// Lazy token iterator. Cloning a lexer restarts from the clone point.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    indents: Vec<usize>,
    depth: usize,
    at_line_start: bool,
    last_was_newline: bool,
    pending: VecDeque<Token>,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            indents: vec![0],
            depth: 0,
            at_line_start: true,
            last_was_newline: true,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.remaining().chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn error(&mut self, character: char, offset: usize, message: &str) -> LexError {
        self.finished = true;
        self.pending.clear();
        LexError {
            character,
            offset,
            message: message.to_string(),
        }
    }

    fn emit(&mut self, token: Token) {
        self.last_was_newline = token.kind == TokenKind::Newline;
        self.pending.push_back(token);
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    /// Measure the indentation of the current line, skipping lines that hold
    /// nothing but whitespace or a comment. Returns `None` at end of input.
    fn line_indent(&mut self) -> Option<usize> {
        loop {
            let mut column = 0;
            while let Some(ch) = self.peek() {
                match ch {
                    ' ' => column += 1,
                    '\t' => column += TAB_WIDTH,
                    '\r' => {}
                    _ => break,
                }
                self.advance();
            }
            match self.peek() {
                None => return None,
                Some('\n') => {
                    self.advance();
                }
                Some('/') if self.peek_second() == Some('/') => {
                    self.skip_comment();
                }
                Some(_) => return Some(column),
            }
        }
    }

    fn layout(&mut self) -> Result<(), LexError> {
        self.at_line_start = false;
        let Some(column) = self.line_indent() else {
            return Ok(());
        };
        let top = self.indents.last().copied().unwrap_or(0);
        if column > top {
            self.indents.push(column);
            self.emit(Token::new(TokenKind::Indent, "", self.pos));
        } else if column < top {
            while self.indents.last().is_some_and(|&level| level > column) {
                self.indents.pop();
                self.emit(Token::new(TokenKind::Dedent, "", self.pos));
            }
            if self.indents.last().copied() != Some(column) {
                let ch = self.peek().unwrap_or(' ');
                return Err(self.error(ch, self.pos, "inconsistent indentation"));
            }
        }
        Ok(())
    }

    fn finish(&mut self) {
        if !self.last_was_newline {
            self.emit(Token::new(TokenKind::Newline, "", self.pos));
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.emit(Token::new(TokenKind::Dedent, "", self.pos));
        }
        self.emit(Token::new(TokenKind::Eof, "", self.pos));
        self.finished = true;
    }

    fn lex_number(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.')
            && self
                .peek_second()
                .is_none_or(|c| !(c.is_ascii_alphabetic() || c == '_'))
        {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mark = self.pos;
            self.advance();
            if matches!(self.peek(), Some('+' | '-')) {
                self.advance();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.pos = mark;
            }
        }
        Token::new(TokenKind::Number, &self.source[start..self.pos], start)
    }

    fn lex_string(&mut self, quote: char) -> Result<Token, LexError> {
        let start = self.pos;
        self.advance();
        let mut value = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(self.error(quote, start, "unterminated string literal"));
                }
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(other) => value.push(other),
                    None => {
                        return Err(self.error(quote, start, "unterminated string literal"));
                    }
                },
                Some(ch) if ch == quote => break,
                Some(ch) => value.push(ch),
            }
        }
        Ok(Token::new(TokenKind::Str, value, start))
    }

    fn lex_word(&mut self) -> Token {
        let start = self.pos;
        loop {
            while self
                .peek()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                self.advance();
            }
            let continues = self.peek() == Some('.')
                && self
                    .peek_second()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
            if !continues {
                break;
            }
            self.advance();
        }
        let word = &self.source[start..self.pos];
        let kind = Keyword::from_word(word)
            .map(TokenKind::Keyword)
            .unwrap_or(TokenKind::Identifier);
        Token::new(kind, word, start)
    }

    fn lex_symbol(&mut self, ch: char) -> Result<Token, LexError> {
        let start = self.pos;
        self.advance();
        let next = self.peek();
        let (kind, len) = match (ch, next) {
            ('=', Some('=')) => (TokenKind::Operator(Operator::EqEq), 2),
            ('!', Some('=')) => (TokenKind::Operator(Operator::NotEq), 2),
            ('<', Some('=')) => (TokenKind::Operator(Operator::Le), 2),
            ('>', Some('=')) => (TokenKind::Operator(Operator::Ge), 2),
            (':', Some('=')) => (TokenKind::Operator(Operator::Reassign), 2),
            ('=', _) => (TokenKind::Operator(Operator::Assign), 1),
            ('<', _) => (TokenKind::Operator(Operator::Lt), 1),
            ('>', _) => (TokenKind::Operator(Operator::Gt), 1),
            ('+', _) => (TokenKind::Operator(Operator::Plus), 1),
            ('-', _) => (TokenKind::Operator(Operator::Minus), 1),
            ('*', _) => (TokenKind::Operator(Operator::Star), 1),
            ('/', _) => (TokenKind::Operator(Operator::Slash), 1),
            ('%', _) => (TokenKind::Operator(Operator::Percent), 1),
            ('(', _) => (TokenKind::Punct(Punct::LParen), 1),
            (')', _) => (TokenKind::Punct(Punct::RParen), 1),
            ('[', _) => (TokenKind::Punct(Punct::LBracket), 1),
            (']', _) => (TokenKind::Punct(Punct::RBracket), 1),
            (',', _) => (TokenKind::Punct(Punct::Comma), 1),
            _ => return Err(self.error(ch, start, "unrecognized character")),
        };
        if len == 2 {
            self.advance();
        }
        match kind {
            TokenKind::Punct(Punct::LParen | Punct::LBracket) => self.depth += 1,
            TokenKind::Punct(Punct::RParen | Punct::RBracket) => {
                self.depth = self.depth.saturating_sub(1)
            }
            _ => {}
        }
        Ok(Token::new(kind, &self.source[start..self.pos], start))
    }

    fn fill(&mut self) -> Result<(), LexError> {
        while self.pending.is_empty() && !self.finished {
            if self.at_line_start && self.depth == 0 {
                self.layout()?;
                if !self.pending.is_empty() {
                    break;
                }
            }

            while matches!(self.peek(), Some(' ' | '\t' | '\r')) {
                self.advance();
            }

            let Some(ch) = self.peek() else {
                self.finish();
                break;
            };

            match ch {
                '\n' => {
                    let offset = self.pos;
                    self.advance();
                    if self.depth == 0 {
                        self.at_line_start = true;
                        if !self.last_was_newline {
                            self.emit(Token::new(TokenKind::Newline, "\n", offset));
                        }
                    }
                }
                '/' if self.peek_second() == Some('/') => self.skip_comment(),
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek_second().is_some_and(|d| d.is_ascii_digit())) =>
                {
                    let token = self.lex_number();
                    self.emit(token);
                }
                '"' | '\'' => {
                    let token = self.lex_string(ch)?;
                    self.emit(token);
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let token = self.lex_word();
                    self.emit(token);
                }
                _ => {
                    let token = self.lex_symbol(ch)?;
                    self.emit(token);
                }
            }
        }
        Ok(())
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pending.is_empty() && !self.finished {
            if let Err(e) = self.fill() {
                return Some(Err(e));
            }
        }
        self.pending.pop_front().map(Ok)
    }
}

/// Lex the whole source, failing on the first error.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn simple_assignment() {
        let tokens = tokenize("fast = ta.sma(close, 10)").unwrap();
        let lexemes: Vec<&str> = tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert_eq!(
            lexemes,
            vec!["fast", "=", "ta.sma", "(", "close", ",", "10", ")", "", ""]
        );
        assert_eq!(tokens[0].offset, 0);
        assert_eq!(tokens[2].offset, 7);
        assert_eq!(tokens[8].kind, TokenKind::Newline);
        assert_eq!(tokens[9].kind, TokenKind::Eof);
    }

    #[test]
    fn strategy_keywords_are_dotted() {
        let tokens = tokenize("strategy.entry(\"L\", strategy.long)").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::StrategyEntry));
        assert_eq!(tokens[2].kind, TokenKind::Str);
        assert_eq!(tokens[2].lexeme, "L");
        assert_eq!(tokens[4].kind, TokenKind::Identifier);
        assert_eq!(tokens[4].lexeme, "strategy.long");
    }

    #[test]
    fn numbers() {
        let tokens = tokenize("1 2.5 .75 1e3 3.").unwrap();
        let nums: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Number)
            .map(|t| t.lexeme.as_str())
            .collect();
        assert_eq!(nums, vec!["1", "2.5", ".75", "1e3", "3."]);
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(
            kinds("a := b <= c >= d == e != f"),
            vec![
                TokenKind::Identifier,
                TokenKind::Operator(Operator::Reassign),
                TokenKind::Identifier,
                TokenKind::Operator(Operator::Le),
                TokenKind::Identifier,
                TokenKind::Operator(Operator::Ge),
                TokenKind::Identifier,
                TokenKind::Operator(Operator::EqEq),
                TokenKind::Identifier,
                TokenKind::Operator(Operator::NotEq),
                TokenKind::Identifier,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn indentation_produces_layout_tokens() {
        let source = "if a\n    b = 1\nc = 2\n";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::Keyword(Keyword::If),
                TokenKind::Identifier,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Identifier,
                TokenKind::Operator(Operator::Assign),
                TokenKind::Number,
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Identifier,
                TokenKind::Operator(Operator::Assign),
                TokenKind::Number,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn dedents_closed_at_end_of_input() {
        let ks = kinds("if a\n    if b\n        c = 1");
        let dedents = ks.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(ks.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let source = "//@version=5\n\n   // indented comment\na = 1 // trailing\n\n";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::Identifier,
                TokenKind::Operator(Operator::Assign),
                TokenKind::Number,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_parens_are_ignored() {
        let source = "x = f(1,\n      2)\n";
        let ks = kinds(source);
        assert_eq!(ks.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
        assert!(!ks.contains(&TokenKind::Indent));
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r#"'it\'s' "a\"b""#).unwrap();
        assert_eq!(tokens[0].lexeme, "it's");
        assert_eq!(tokens[1].lexeme, "a\"b");
    }

    #[test]
    fn unrecognized_character() {
        let err = tokenize("a = 1 $ 2").unwrap_err();
        assert_eq!(err.character, '$');
        assert_eq!(err.offset, 6);
    }

    #[test]
    fn unterminated_string() {
        let err = tokenize("title = \"abc").unwrap_err();
        assert_eq!(err.offset, 8);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn inconsistent_dedent() {
        let err = tokenize("if a\n    b = 1\n  c = 2\n").unwrap_err();
        assert!(err.message.contains("indentation"));
    }

    #[test]
    fn lexer_is_lazy_and_stops_after_error() {
        let mut lexer = Lexer::new("a ? b");
        assert!(matches!(lexer.next(), Some(Ok(_))));
        assert!(matches!(lexer.next(), Some(Err(_))));
        assert!(lexer.next().is_none());
    }

    #[test]
    fn lexer_restarts_from_clone() {
        let mut lexer = Lexer::new("a = 1");
        let first = lexer.next().unwrap().unwrap();
        let snapshot = lexer.clone();
        let rest: Vec<Token> = lexer.map(|t| t.unwrap()).collect();
        let replay: Vec<Token> = snapshot.map(|t| t.unwrap()).collect();
        assert_eq!(first.lexeme, "a");
        assert_eq!(rest, replay);
    }

    #[test]
    fn empty_source_is_just_eof() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
        assert_eq!(kinds("\n\n  \n"), vec![TokenKind::Eof]);
    }
}
