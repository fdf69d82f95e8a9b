//! Tokenizer for the sandboxed expression grammar.

use super::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    /// Identifier or dotted path segment start; dots are separate tokens.
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
    Dot,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// Upper bound on expression text; anything longer is rejected before
/// tokenizing.
pub const MAX_INPUT_LEN: usize = 512;

pub fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    if input.len() > MAX_INPUT_LEN {
        return Err(EvalError::InputTooLong(input.len()));
    }

    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' if i + 1 < chars.len() && chars[i + 1].is_ascii_digit() => {
                // Leading-dot float like `.5`.
                let (tok, next) = lex_number(&chars, i)?;
                tokens.push(tok);
                i = next;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '=' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(EvalError::Syntax("assignment is not allowed".into()));
                }
            }
            '!' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    return Err(EvalError::Syntax("unexpected '!'".into()));
                }
            }
            '<' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    tokens.push(Token::LtEq);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    tokens.push(Token::GtEq);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    if i >= chars.len() {
                        return Err(EvalError::Syntax("unterminated string literal".into()));
                    }
                    if chars[i] == quote {
                        i += 1;
                        break;
                    }
                    value.push(chars[i]);
                    i += 1;
                }
                tokens.push(Token::Str(value));
            }
            _ if c.is_ascii_digit() => {
                let (tok, next) = lex_number(&chars, i)?;
                tokens.push(tok);
                i = next;
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    ident.push(chars[i]);
                    i += 1;
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(EvalError::Syntax(format!("unexpected character '{other}'")));
            }
        }
    }

    Ok(tokens)
}

fn lex_number(chars: &[char], start: usize) -> Result<(Token, usize), EvalError> {
    let mut i = start;
    let mut text = String::new();
    let mut is_float = false;

    while i < chars.len() && chars[i].is_ascii_digit() {
        text.push(chars[i]);
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' && !(i + 1 < chars.len() && chars[i + 1] == '.') {
        // Only treat the dot as a decimal point when followed by a digit
        // or at the end (`3.`); `ident.field` never reaches here.
        if i + 1 >= chars.len() || chars[i + 1].is_ascii_digit() {
            is_float = true;
            text.push('.');
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                text.push(chars[i]);
                i += 1;
            }
        }
    }

    if is_float {
        text.parse::<f64>()
            .map(|f| (Token::Float(f), i))
            .map_err(|_| EvalError::Syntax(format!("bad number '{text}'")))
    } else {
        text.parse::<i64>()
            .map(|n| (Token::Int(n), i))
            .map_err(|_| EvalError::Syntax(format!("number out of range '{text}'")))
    }
}
