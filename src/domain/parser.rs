//! Script parser.
//!
//! Recursive descent over the token stream with precedence climbing for
//! binary operators. The parser checks grammar only; names and types are
//! resolved by the translator.

use crate::domain::ast::{
    Argument, AssignMode, BinaryOperator, DeclarationKind, Expr, Literal, Script, Stmt,
    StrategyKind, TypeHint, UnaryOperator,
};
use crate::domain::error::{ParseError, PineError};
use crate::domain::lexer::{Keyword, Operator, Punct, Token, TokenKind, tokenize};

/// Deepest expression or block nesting accepted before giving up.
const MAX_NESTING: usize = 256;

/// Binding power of a binary operator; higher binds tighter.
fn precedence(kind: TokenKind) -> Option<(u8, BinaryOperator)> {
    let entry = match kind {
        TokenKind::Keyword(Keyword::Or) => (1, BinaryOperator::Or),
        TokenKind::Keyword(Keyword::And) => (2, BinaryOperator::And),
        TokenKind::Operator(Operator::EqEq) => (3, BinaryOperator::Eq),
        TokenKind::Operator(Operator::NotEq) => (3, BinaryOperator::NotEq),
        TokenKind::Operator(Operator::Lt) => (3, BinaryOperator::Lt),
        TokenKind::Operator(Operator::Le) => (3, BinaryOperator::Le),
        TokenKind::Operator(Operator::Gt) => (3, BinaryOperator::Gt),
        TokenKind::Operator(Operator::Ge) => (3, BinaryOperator::Ge),
        TokenKind::Operator(Operator::Plus) => (4, BinaryOperator::Add),
        TokenKind::Operator(Operator::Minus) => (4, BinaryOperator::Sub),
        TokenKind::Operator(Operator::Star) => (5, BinaryOperator::Mul),
        TokenKind::Operator(Operator::Slash) => (5, BinaryOperator::Div),
        TokenKind::Operator(Operator::Percent) => (5, BinaryOperator::Mod),
        _ => return None,
    };
    Some(entry)
}

fn strategy_kind(keyword: Keyword) -> Option<StrategyKind> {
    match keyword {
        Keyword::StrategyEntry => Some(StrategyKind::Entry),
        Keyword::StrategyExit => Some(StrategyKind::Exit),
        Keyword::StrategyClose => Some(StrategyKind::Close),
        Keyword::StrategyCloseAll => Some(StrategyKind::CloseAll),
        _ => None,
    }
}

fn declaration_kind(name: &str) -> Option<DeclarationKind> {
    match name {
        "strategy" => Some(DeclarationKind::Strategy),
        "indicator" | "study" => Some(DeclarationKind::Indicator),
        _ => None,
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let offset = tokens.last().map(|t| t.offset + t.lexeme.len()).unwrap_or(0);
            tokens.push(Token {
                kind: TokenKind::Eof,
                lexeme: String::new(),
                offset,
            });
        }
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_kind_at(&self, ahead: usize) -> TokenKind {
        let last = self.tokens.len() - 1;
        self.tokens[(self.pos + ahead).min(last)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn error(&self, expected: &str) -> ParseError {
        let token = self.peek();
        ParseError {
            expected: expected.to_string(),
            found: token.describe(),
            position: token.offset,
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(&kind.to_string()))
        }
    }

    /// Run `f` one nesting level deeper, failing past [`MAX_NESTING`].
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("shallower nesting"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn expect_identifier(&mut self) -> Result<Token, ParseError> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance())
        } else {
            Err(self.error("identifier"))
        }
    }

    fn end_statement(&mut self) -> Result<(), ParseError> {
        match self.peek_kind() {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::Eof => Ok(()),
            _ => Err(self.error("end of line")),
        }
    }

    fn parse_script(&mut self) -> Result<Script, ParseError> {
        let mut statements = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.advance();
                }
                _ => statements.push(self.parse_statement()?),
            }
        }
        Ok(Script { statements })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(TokenKind::Newline)?;
        if !self.check(TokenKind::Indent) {
            return Err(self.error("indented block"));
        }
        self.advance();
        let mut body = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => return Err(self.error("dedent")),
                TokenKind::Newline => {
                    self.advance();
                }
                _ => body.push(self.parse_statement()?),
            }
        }
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::Var) => self.parse_var(),
            TokenKind::Keyword(kw) if strategy_kind(kw).is_some() => self.parse_strategy_call(),
            TokenKind::Identifier => self.parse_identifier_statement(),
            _ => {
                let expr = self.parse_expression()?;
                self.end_statement()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        self.nested(Self::parse_if_block)
    }

    fn parse_if_block(&mut self) -> Result<Stmt, ParseError> {
        let position = self.advance().offset;
        let condition = self.parse_expression()?;
        let then_body = self.parse_block()?;
        let else_body = if self.check(TokenKind::Keyword(Keyword::Else)) {
            self.advance();
            if self.check(TokenKind::Keyword(Keyword::If)) {
                vec![self.parse_if()?]
            } else {
                self.parse_block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::IfBlock {
            condition,
            then_body,
            else_body,
            position,
        })
    }

    fn parse_type_hint(&mut self) -> Option<TypeHint> {
        let token = self.peek();
        if token.kind != TokenKind::Identifier || self.peek_kind_at(1) != TokenKind::Identifier {
            return None;
        }
        let hint = TypeHint::from_name(&token.lexeme)?;
        self.advance();
        Some(hint)
    }

    fn parse_var(&mut self) -> Result<Stmt, ParseError> {
        let position = self.advance().offset;
        let type_hint = self.parse_type_hint();
        let target = self.expect_identifier()?.lexeme;
        self.expect(TokenKind::Operator(Operator::Assign))?;
        let value = self.parse_expression()?;
        self.end_statement()?;
        Ok(Stmt::Assignment {
            target,
            mode: AssignMode::Persistent,
            type_hint,
            value,
            position,
        })
    }

    fn parse_strategy_call(&mut self) -> Result<Stmt, ParseError> {
        let token = self.advance();
        let kind = match token.kind {
            TokenKind::Keyword(kw) => strategy_kind(kw),
            _ => None,
        }
        .ok_or_else(|| ParseError {
            expected: "strategy command".to_string(),
            found: token.describe(),
            position: token.offset,
        })?;
        let args = self.parse_arguments()?;
        self.end_statement()?;
        Ok(Stmt::StrategyStatement {
            kind,
            args,
            position: token.offset,
        })
    }

    fn parse_identifier_statement(&mut self) -> Result<Stmt, ParseError> {
        let position = self.peek().offset;

        if let Some(type_hint) = self.parse_type_hint() {
            let target = self.expect_identifier()?.lexeme;
            self.expect(TokenKind::Operator(Operator::Assign))?;
            let value = self.parse_expression()?;
            self.end_statement()?;
            return Ok(Stmt::Assignment {
                target,
                mode: AssignMode::Declare,
                type_hint: Some(type_hint),
                value,
                position,
            });
        }

        let mode = match self.peek_kind_at(1) {
            TokenKind::Operator(Operator::Assign) => Some(AssignMode::Declare),
            TokenKind::Operator(Operator::Reassign) => Some(AssignMode::Reassign),
            _ => None,
        };
        if let Some(mode) = mode {
            let target = self.advance().lexeme;
            self.advance();
            let value = self.parse_expression()?;
            self.end_statement()?;
            return Ok(Stmt::Assignment {
                target,
                mode,
                type_hint: None,
                value,
                position,
            });
        }

        let header = declaration_kind(&self.peek().lexeme)
            .filter(|_| self.peek_kind_at(1) == TokenKind::Punct(Punct::LParen));
        if let Some(kind) = header {
            self.advance();
            let args = self.parse_arguments()?;
            self.end_statement()?;
            return Ok(Stmt::Declaration {
                kind,
                args,
                position,
            });
        }

        let expr = self.parse_expression()?;
        self.end_statement()?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_arguments(&mut self) -> Result<Vec<Argument>, ParseError> {
        self.expect(TokenKind::Punct(Punct::LParen))?;
        let mut args = Vec::new();
        while !self.check(TokenKind::Punct(Punct::RParen)) {
            let name = if self.check(TokenKind::Identifier)
                && self.peek_kind_at(1) == TokenKind::Operator(Operator::Assign)
            {
                let name = self.advance().lexeme;
                self.advance();
                Some(name)
            } else {
                None
            };
            let value = self.parse_expression()?;
            args.push(Argument { name, value });
            if self.check(TokenKind::Punct(Punct::Comma)) {
                self.advance();
            } else if !self.check(TokenKind::Punct(Punct::RParen)) {
                return Err(self.error("',' or ')'"));
            }
        }
        self.advance();
        Ok(args)
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(1)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        let mut chained = 0;
        while let Some((prec, op)) = precedence(self.peek_kind()) {
            if prec < min_prec {
                break;
            }
            chained += 1;
            if self.depth + chained > MAX_NESTING {
                return Err(self.error("shallower nesting"));
            }
            let position = self.advance().offset;
            let right = self.parse_binary(prec + 1)?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
                position,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_prefixed)
    }

    fn parse_prefixed(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            TokenKind::Operator(Operator::Minus) => Some(UnaryOperator::Neg),
            TokenKind::Keyword(Keyword::Not) => Some(UnaryOperator::Not),
            _ => None,
        };
        match op {
            Some(op) => {
                let position = self.advance().offset;
                let operand = self.parse_unary()?;
                Ok(Expr::UnaryOp {
                    op,
                    operand: Box::new(operand),
                    position,
                })
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        while self.check(TokenKind::Punct(Punct::LBracket)) {
            let position = self.advance().offset;
            let offset = self.parse_expression()?;
            self.expect(TokenKind::Punct(Punct::RBracket))?;
            expr = Expr::Index {
                target: Box::new(expr),
                offset: Box::new(offset),
                position,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        let position = token.offset;
        let literal = |value| Ok(Expr::Literal { value, position });
        match token.kind {
            TokenKind::Number => {
                self.advance();
                let value = token.lexeme.parse::<f64>().map_err(|_| ParseError {
                    expected: "number".to_string(),
                    found: token.describe(),
                    position,
                })?;
                literal(Literal::Number(value))
            }
            TokenKind::Str => {
                self.advance();
                literal(Literal::Str(token.lexeme))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                literal(Literal::Bool(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                literal(Literal::Bool(false))
            }
            TokenKind::Keyword(Keyword::Na) => {
                self.advance();
                if self.check(TokenKind::Punct(Punct::LParen)) {
                    let args = self.parse_arguments()?;
                    return Ok(Expr::Call {
                        name: token.lexeme,
                        args,
                        position,
                    });
                }
                literal(Literal::Na)
            }
            TokenKind::Identifier => {
                self.advance();
                if self.check(TokenKind::Punct(Punct::LParen)) {
                    let args = self.parse_arguments()?;
                    Ok(Expr::Call {
                        name: token.lexeme,
                        args,
                        position,
                    })
                } else {
                    Ok(Expr::Identifier {
                        name: token.lexeme,
                        position,
                    })
                }
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::Punct(Punct::RParen))?;
                Ok(expr)
            }
            _ => Err(self.error("expression")),
        }
    }
}

/// Parse a complete token stream into a [`Script`].
pub fn parse_tokens(tokens: Vec<Token>) -> Result<Script, ParseError> {
    Parser::new(tokens).parse_script()
}

/// Lex and parse script source.
pub fn parse(source: &str) -> Result<Script, PineError> {
    let tokens = tokenize(source)?;
    Ok(parse_tokens(tokens)?)
}
