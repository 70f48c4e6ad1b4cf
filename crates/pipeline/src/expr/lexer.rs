//! 표현식 토크나이저

use std::fmt;

use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Dollar,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Plus,
    Minus,
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Dollar => f.write_str("'$'"),
            Token::Dot => f.write_str("'.'"),
            Token::Comma => f.write_str("','"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::Eq => f.write_str("'=='"),
            Token::Ne => f.write_str("'!='"),
            Token::Lt => f.write_str("'<'"),
            Token::Le => f.write_str("'<='"),
            Token::Gt => f.write_str("'>'"),
            Token::Ge => f.write_str("'>='"),
            Token::AndAnd => f.write_str("'&&'"),
            Token::OrOr => f.write_str("'||'"),
            Token::Bang => f.write_str("'!'"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Ident(name) => write!(f, "'{name}'"),
            Token::Str(s) => write!(f, "string {s:?}"),
            Token::Int(i) => write!(f, "number {i}"),
            Token::Float(x) => write!(f, "number {x}"),
        }
    }
}

/// 위치가 붙은 토큰
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    /// 원문 내 바이트 오프셋
    pub pos: usize,
}

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let token = match c {
            '$' => single(&mut chars, Token::Dollar),
            '.' => single(&mut chars, Token::Dot),
            ',' => single(&mut chars, Token::Comma),
            '(' => single(&mut chars, Token::LParen),
            ')' => single(&mut chars, Token::RParen),
            '[' => single(&mut chars, Token::LBracket),
            ']' => single(&mut chars, Token::RBracket),
            '+' => single(&mut chars, Token::Plus),
            '-' => single(&mut chars, Token::Minus),
            '=' | '!' | '<' | '>' | '&' | '|' => {
                chars.next();
                let next = chars.peek().map(|&(_, n)| n);
                let (token, two) = match (c, next) {
                    ('=', Some('=')) => (Token::Eq, true),
                    ('!', Some('=')) => (Token::Ne, true),
                    ('<', Some('=')) => (Token::Le, true),
                    ('>', Some('=')) => (Token::Ge, true),
                    ('&', Some('&')) => (Token::AndAnd, true),
                    ('|', Some('|')) => (Token::OrOr, true),
                    ('!', _) => (Token::Bang, false),
                    ('<', _) => (Token::Lt, false),
                    ('>', _) => (Token::Gt, false),
                    _ => return Err(ExprError::UnexpectedChar { ch: c, pos }),
                };
                if two {
                    chars.next();
                }
                token
            }
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, 'r')) => text.push('\r'),
                            Some((_, other)) => text.push(other),
                            None => break,
                        },
                        q if q == c => {
                            closed = true;
                            break;
                        }
                        other => text.push(other),
                    }
                }
                if !closed {
                    return Err(ExprError::UnterminatedString { pos });
                }
                Token::Str(text)
            }
            '0'..='9' => {
                let mut end = pos;
                let mut is_float = false;
                while let Some(&(i, ch)) = chars.peek() {
                    if ch.is_ascii_digit() {
                        end = i + 1;
                        chars.next();
                    } else if ch == '.' && !is_float && digit_follows(src, i) {
                        is_float = true;
                        end = i + 1;
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &src[pos..end];
                if is_float {
                    Token::Float(text.parse().map_err(|_| ExprError::InvalidNumber {
                        text: text.to_owned(),
                        pos,
                    })?)
                } else {
                    Token::Int(text.parse().map_err(|_| ExprError::InvalidNumber {
                        text: text.to_owned(),
                        pos,
                    })?)
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = pos;
                while let Some(&(i, ch)) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        end = i + ch.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                Token::Ident(src[pos..end].to_owned())
            }
            other => return Err(ExprError::UnexpectedChar { ch: other, pos }),
        };
        tokens.push(Spanned { token, pos });
    }
    Ok(tokens)
}

fn single(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>, token: Token) -> Token {
    chars.next();
    token
}

fn digit_follows(src: &str, dot: usize) -> bool {
    src[dot + 1..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit())
}
