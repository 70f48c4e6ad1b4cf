//! 재귀 하강 표현식 파서
//!
//! 우선순위 (낮은 것부터):
//! `or`/`||` → `and`/`&&` → `not`/`!` → 비교 (`==`, `matches`, `in` ...) → `+` → 단항 `-`

use regex::Regex;

use logweave_core::field::Field;
use logweave_core::value::Value;

use super::lexer::{Spanned, Token, tokenize};
use super::{BinaryOp, Expr, ExprError, Function};

/// 표현식 문자열을 AST로 파싱합니다.
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    if let Some(extra) = parser.peek() {
        return Err(ExprError::Unexpected {
            found: extra.token.to_string(),
            pos: extra.pos,
            expected: "end of expression",
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|s| &s.token)
    }

    fn next(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek_token() == Some(token) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek_token(), Some(Token::Ident(name)) if name == keyword) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<(), ExprError> {
        match self.next() {
            Some(s) if s.token == token => Ok(()),
            Some(s) => Err(ExprError::Unexpected {
                found: s.token.to_string(),
                pos: s.pos,
                expected,
            }),
            None => Err(ExprError::UnexpectedEnd { expected }),
        }
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.and()?;
        while self.eat(&Token::OrOr) || self.eat_keyword("or") {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.not()?;
        while self.eat(&Token::AndAnd) || self.eat_keyword("and") {
            let rhs = self.not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Bang) || self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.additive()?;

        let op = match self.peek_token() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Ident(kw)) if kw == "contains" => BinaryOp::Contains,
            Some(Token::Ident(kw)) if kw == "in" => BinaryOp::In,
            Some(Token::Ident(kw)) if kw == "matches" => {
                self.pos += 1;
                return self.matches(lhs);
            }
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.additive()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    /// 패턴은 문자열 리터럴이어야 하며 파싱 시점에 컴파일됩니다.
    fn matches(&mut self, lhs: Expr) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Spanned {
                token: Token::Str(pattern),
                ..
            }) => {
                let regex = Regex::new(&pattern)?;
                Ok(Expr::Matches(Box::new(lhs), regex))
            }
            Some(s) => Err(ExprError::Unexpected {
                found: s.token.to_string(),
                pos: s.pos,
                expected: "a string literal pattern after 'matches'",
            }),
            None => Err(ExprError::UnexpectedEnd {
                expected: "a string literal pattern after 'matches'",
            }),
        }
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        while self.eat(&Token::Plus) {
            let rhs = self.unary()?;
            lhs = Expr::Binary(BinaryOp::Add, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let Some(Spanned { token, pos }) = self.next() else {
            return Err(ExprError::UnexpectedEnd {
                expected: "a value",
            });
        };

        match token {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Dollar => self.variable(pos),
            Token::LParen => {
                let inner = self.or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.or()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(Token::Comma, "',' or ']'")?;
                    }
                }
                Ok(Expr::List(items))
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "nil" => Ok(Expr::Literal(Value::Null)),
                _ if self.peek_token() == Some(&Token::LParen) => self.call(name, pos),
                _ => Err(ExprError::Unexpected {
                    found: format!("'{name}'"),
                    pos,
                    expected: "a value (fields start with '$')",
                }),
            },
            other => Err(ExprError::Unexpected {
                found: other.to_string(),
                pos,
                expected: "a value",
            }),
        }
    }

    fn call(&mut self, name: String, pos: usize) -> Result<Expr, ExprError> {
        let function = Function::from_name(&name).ok_or(ExprError::UnknownFunction {
            name: name.clone(),
            pos,
        })?;
        self.expect(Token::LParen, "'('")?;

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.or()?);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(Token::Comma, "',' or ')'")?;
            }
        }
        if args.len() != function.arity() {
            return Err(ExprError::Arity {
                name,
                expected: function.arity(),
                found: args.len(),
            });
        }
        Ok(Expr::Call(function, args))
    }

    /// `$` 뒤의 변수와 경로를 파싱합니다.
    fn variable(&mut self, dollar: usize) -> Result<Expr, ExprError> {
        // `$` 바로 뒤에 붙은 식별자만 변수 이름입니다.
        let head = match self.peek() {
            Some(Spanned {
                token: Token::Ident(name),
                pos,
            }) if *pos == dollar + 1 => Some(name.clone()),
            _ => None,
        };

        let is_label = match head.as_deref() {
            None => false,
            Some(name) => {
                self.pos += 1;
                match name {
                    "record" => false,
                    "labels" => true,
                    "timestamp" => return Ok(Expr::Timestamp),
                    "severity" => return Ok(Expr::Severity),
                    "tags" => return Ok(Expr::Tags),
                    other => {
                        return Err(ExprError::UnknownVariable {
                            name: other.to_owned(),
                            pos: dollar,
                        });
                    }
                }
            }
        };

        let path = self.path()?;
        if is_label {
            return match <[String; 1]>::try_from(path) {
                Ok([key]) => Ok(Expr::Field(Field::label(key))),
                Err(_) => Err(ExprError::LabelPath { pos: dollar }),
            };
        }
        Ok(Expr::Field(Field::record(path)))
    }

    fn path(&mut self) -> Result<Vec<String>, ExprError> {
        let mut keys = Vec::new();
        loop {
            if self.eat(&Token::Dot) {
                match self.next() {
                    Some(Spanned {
                        token: Token::Ident(key),
                        ..
                    }) => keys.push(key),
                    Some(Spanned {
                        token: Token::Int(i),
                        ..
                    }) => keys.push(i.to_string()),
                    Some(s) => {
                        return Err(ExprError::Unexpected {
                            found: s.token.to_string(),
                            pos: s.pos,
                            expected: "a field name after '.'",
                        });
                    }
                    None => {
                        return Err(ExprError::UnexpectedEnd {
                            expected: "a field name after '.'",
                        });
                    }
                }
            } else if self.eat(&Token::LBracket) {
                match self.next() {
                    Some(Spanned {
                        token: Token::Str(key),
                        ..
                    }) => keys.push(key),
                    Some(s) => {
                        return Err(ExprError::Unexpected {
                            found: s.token.to_string(),
                            pos: s.pos,
                            expected: "a quoted field name inside '[]'",
                        });
                    }
                    None => {
                        return Err(ExprError::UnexpectedEnd {
                            expected: "a quoted field name inside '[]'",
                        });
                    }
                }
                self.expect(Token::RBracket, "']'")?;
            } else {
                return Ok(keys);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_paths() {
        assert_eq!(parse("$").unwrap(), Expr::Field(Field::root()));
        assert_eq!(parse("$record").unwrap(), Expr::Field(Field::root()));
        assert_eq!(
            parse("$.a.b").unwrap(),
            Expr::Field(Field::record(["a", "b"]))
        );
        assert_eq!(
            parse(r#"$record["a b"].c"#).unwrap(),
            Expr::Field(Field::record(["a b", "c"]))
        );
    }

    #[test]
    fn label_paths() {
        assert_eq!(
            parse("$labels.host").unwrap(),
            Expr::Field(Field::label("host"))
        );
        assert_eq!(
            parse(r#"$labels["k8s.pod"]"#).unwrap(),
            Expr::Field(Field::label("k8s.pod"))
        );
        assert!(matches!(
            parse("$labels.a.b"),
            Err(ExprError::LabelPath { .. })
        ));
    }

    #[test]
    fn precedence() {
        // not은 비교보다 약하고 and보다 강합니다.
        let expr = parse("not $.a == 1 and $.b or $.c").unwrap();
        let Expr::Or(lhs, _) = expr else {
            panic!("expected or at the top");
        };
        let Expr::And(not, _) = *lhs else {
            panic!("expected and");
        };
        assert!(matches!(*not, Expr::Not(ref inner) if matches!(**inner, Expr::Binary(BinaryOp::Eq, _, _))));
    }

    #[test]
    fn matches_requires_literal() {
        assert!(matches!(
            parse("$.a matches '^x'").unwrap(),
            Expr::Matches(_, _)
        ));
        assert!(parse("$.a matches $.b").is_err());
        assert!(matches!(
            parse("$.a matches '('"),
            Err(ExprError::Regex(_))
        ));
    }

    #[test]
    fn calls_are_checked() {
        assert!(parse("env('HOME')").is_ok());
        assert!(matches!(
            parse("env()"),
            Err(ExprError::Arity { .. })
        ));
        assert!(matches!(
            parse("shout('x')"),
            Err(ExprError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn errors() {
        assert!(matches!(
            parse("$nope"),
            Err(ExprError::UnknownVariable { .. })
        ));
        assert!(matches!(parse("level"), Err(ExprError::Unexpected { .. })));
        assert!(matches!(parse("(1"), Err(ExprError::UnexpectedEnd { .. })));
        assert!(matches!(parse("1 2"), Err(ExprError::Unexpected { .. })));
    }
}
