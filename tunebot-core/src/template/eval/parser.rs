//! Recursive-descent parser for the sandboxed expression grammar.
//!
//! The grammar is deliberately closed: the only things that can appear in
//! an expression are literals, arithmetic/comparison/boolean operators,
//! and calls whose callee is a dotted name. There is no attribute access
//! on values, no subscripting, and no way to name anything that is not a
//! literal or a call target, so the interpreter's allow-list is the full
//! reachable surface.

use super::EvalError;
use super::lexer::Token;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Call to a dotted name such as `random.randint`; validity of the
    /// name is the interpreter's concern, shape is ours.
    Call { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

/// Parser recursion cap; deeper nesting is rejected. Each precedence level
/// costs one unit, so this allows roughly seven levels of parentheses.
const MAX_DEPTH: usize = 64;

pub fn parse(tokens: &[Token]) -> Result<Expr, EvalError> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr(0)?;
    if parser.pos != tokens.len() {
        return Err(EvalError::Syntax(format!(
            "unexpected trailing token {:?}",
            tokens[parser.pos]
        )));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<(), EvalError> {
        match self.advance() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(EvalError::Syntax(format!(
                "expected {expected:?}, found {tok:?}"
            ))),
            None => Err(EvalError::Syntax(format!(
                "expected {expected:?}, found end of input"
            ))),
        }
    }

    fn check_depth(depth: usize) -> Result<usize, EvalError> {
        if depth >= MAX_DEPTH {
            Err(EvalError::TooDeep)
        } else {
            Ok(depth + 1)
        }
    }

    fn or_expr(&mut self, depth: usize) -> Result<Expr, EvalError> {
        let depth = Self::check_depth(depth)?;
        let mut left = self.and_expr(depth)?;
        while matches!(self.peek(), Some(Token::Ident(k)) if k == "or") {
            self.advance();
            let right = self.and_expr(depth)?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self, depth: usize) -> Result<Expr, EvalError> {
        let depth = Self::check_depth(depth)?;
        let mut left = self.not_expr(depth)?;
        while matches!(self.peek(), Some(Token::Ident(k)) if k == "and") {
            self.advance();
            let right = self.not_expr(depth)?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self, depth: usize) -> Result<Expr, EvalError> {
        let depth = Self::check_depth(depth)?;
        if matches!(self.peek(), Some(Token::Ident(k)) if k == "not") {
            self.advance();
            let inner = self.not_expr(depth)?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.comparison(depth)
    }

    fn comparison(&mut self, depth: usize) -> Result<Expr, EvalError> {
        let depth = Self::check_depth(depth)?;
        let left = self.arith(depth)?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::NotEq,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::LtEq) => BinaryOp::LtEq,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::GtEq) => BinaryOp::GtEq,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.arith(depth)?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn arith(&mut self, depth: usize) -> Result<Expr, EvalError> {
        let depth = Self::check_depth(depth)?;
        let mut left = self.term(depth)?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term(depth)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self, depth: usize) -> Result<Expr, EvalError> {
        let depth = Self::check_depth(depth)?;
        let mut left = self.factor(depth)?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.factor(depth)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self, depth: usize) -> Result<Expr, EvalError> {
        let depth = Self::check_depth(depth)?;
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let inner = self.factor(depth)?;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)))
            }
            Some(Token::Plus) => {
                self.advance();
                self.factor(depth)
            }
            _ => self.atom(depth),
        }
    }

    fn atom(&mut self, depth: usize) -> Result<Expr, EvalError> {
        let depth = Self::check_depth(depth)?;
        match self.advance().cloned() {
            Some(Token::Int(n)) => Ok(Expr::Int(n)),
            Some(Token::Float(f)) => Ok(Expr::Float(f)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                let inner = self.or_expr(depth)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(first)) => self.name_or_call(first, depth),
            Some(tok) => Err(EvalError::Syntax(format!("unexpected token {tok:?}"))),
            None => Err(EvalError::Syntax("unexpected end of expression".into())),
        }
    }

    /// A bare identifier is only legal when it is a boolean literal or the
    /// head of a call. Anything else fails closed: there is no variable
    /// environment to resolve names against, by construction.
    fn name_or_call(&mut self, first: String, depth: usize) -> Result<Expr, EvalError> {
        match first.as_str() {
            "True" | "true" => return Ok(Expr::Bool(true)),
            "False" | "false" => return Ok(Expr::Bool(false)),
            _ => {}
        }

        let mut name = first;
        while matches!(self.peek(), Some(Token::Dot)) {
            self.advance();
            match self.advance().cloned() {
                Some(Token::Ident(part)) => {
                    name.push('.');
                    name.push_str(&part);
                }
                _ => return Err(EvalError::Syntax("expected name after '.'".into())),
            }
        }

        if !matches!(self.peek(), Some(Token::LParen)) {
            return Err(EvalError::Forbidden(name));
        }
        self.advance();

        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token::RParen)) {
            loop {
                args.push(self.or_expr(depth)?);
                match self.peek() {
                    Some(Token::Comma) => {
                        self.advance();
                    }
                    _ => break,
                }
            }
        }
        self.expect(&Token::RParen)?;
        Ok(Expr::Call { name, args })
    }
}
