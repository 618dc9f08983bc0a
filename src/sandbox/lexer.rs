//! 词法分析：源代码 → Token 序列

use crate::sandbox::{SandboxError, SandboxErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Let,
    If,
    Else,
    While,
    Return,
    True,
    False,
    Null,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Eof,
}

/// Token 及其在源码中的字符偏移
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

fn syntax(pos: usize, msg: impl std::fmt::Display) -> SandboxError {
    SandboxError::new(SandboxErrorKind::Syntax, format!("{} at offset {}", msg, pos))
}

fn keyword(word: &str) -> Option<Token> {
    Some(match word {
        "let" | "var" | "const" => Token::Let,
        "if" => Token::If,
        "else" => Token::Else,
        "while" => Token::While,
        "return" => Token::Return,
        "true" => Token::True,
        "false" => Token::False,
        "null" | "undefined" => Token::Null,
        _ => return None,
    })
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, SandboxError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        // 行注释
        if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if c.is_ascii_digit() {
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let is_float = i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit();
            if is_float {
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let token = if is_float {
                Token::Float(text.parse().map_err(|_| syntax(start, "invalid number"))?)
            } else {
                Token::Int(text.parse().map_err(|_| syntax(start, "integer literal too large"))?)
            };
            tokens.push(Spanned { token, pos: start });
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let token = keyword(&word).unwrap_or(Token::Ident(word));
            tokens.push(Spanned { token, pos: start });
            continue;
        }

        if c == '"' || c == '\'' {
            i += 1;
            let mut s = String::new();
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(syntax(start, "unterminated string"));
                };
                i += 1;
                match ch {
                    _ if ch == c => break,
                    '\\' => {
                        let esc = chars.get(i).copied().ok_or_else(|| syntax(start, "unterminated string"))?;
                        i += 1;
                        s.push(match esc {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                    _ => s.push(ch),
                }
            }
            tokens.push(Spanned { token: Token::Str(s), pos: start });
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, len) = match (c, next) {
            ('=', Some('=')) => (Token::Eq, if chars.get(i + 2) == Some(&'=') { 3 } else { 2 }),
            ('!', Some('=')) => (Token::Ne, if chars.get(i + 2) == Some(&'=') { 3 } else { 2 }),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('=', _) => (Token::Assign, 1),
            ('!', _) => (Token::Bang, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            (',', _) => (Token::Comma, 1),
            (';', _) => (Token::Semi, 1),
            _ => return Err(syntax(start, format!("unexpected character '{}'", c))),
        };
        tokens.push(Spanned { token, pos: start });
        i += len;
    }

    tokens.push(Spanned { token: Token::Eof, pos: chars.len() });
    Ok(tokens)
}
