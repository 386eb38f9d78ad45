//! A small, deliberately unpowerful boolean-expression interpreter for
//! FlowEdge `condition_expr` (spec §4.7, §9 "Expression evaluation in
//! BRANCH"). Replaces the source system's `eval()` with a hand-rolled
//! tokenizer + recursive-descent parser restricted to `==`, `!=`, `in`,
//! `and`, `or`, `not`, string/boolean literals, and identifier lookups
//! against the caller-supplied context. There is no way to reach outside
//! that context: no function calls, no attribute access, no arithmetic.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

#[derive(Debug)]
pub struct ExprError(pub String);

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "condition expression error: {}", self.0)
    }
}

impl std::error::Error for ExprError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    True,
    False,
    Eq,
    NotEq,
    In,
    And,
    Or,
    Not,
    LParen,
    RParen,
    Comma,
    LBracket,
    RBracket,
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ExprError("unterminated string literal".into()));
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "true" | "True" => Token::True,
                    "false" | "False" => Token::False,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(ExprError(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

/// `Ctx` is the sandboxed evaluation context: `collected_values ∪
/// {intent: current_intent}` (spec §4.7 / I5). No other name resolves.
pub struct Ctx<'a> {
    pub collected_values: &'a HashMap<String, Value>,
    pub intent: Option<&'a str>,
}

impl Ctx<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        if name == "intent" {
            return self.intent.map(|s| Value::String(s.to_string()));
        }
        self.collected_values.get(name).cloned()
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn expect(&mut self, t: &Token) -> Result<(), ExprError> {
        if self.peek() == Some(t) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ExprError(format!("expected {t:?}, found {:?}", self.peek())))
        }
    }

    // or_expr := and_expr ("or" and_expr)*
    fn parse_or(&mut self, ctx: &Ctx) -> Result<bool, ExprError> {
        let mut acc = self.parse_and(ctx)?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.parse_and(ctx)?;
            acc = acc || rhs;
        }
        Ok(acc)
    }

    // and_expr := not_expr ("and" not_expr)*
    fn parse_and(&mut self, ctx: &Ctx) -> Result<bool, ExprError> {
        let mut acc = self.parse_not(ctx)?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.parse_not(ctx)?;
            acc = acc && rhs;
        }
        Ok(acc)
    }

    // not_expr := "not" not_expr | comparison
    fn parse_not(&mut self, ctx: &Ctx) -> Result<bool, ExprError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(!self.parse_not(ctx)?);
        }
        self.parse_comparison(ctx)
    }

    // comparison := atom (("==" | "!=" | "in") atom)? | "(" or_expr ")"
    fn parse_comparison(&mut self, ctx: &Ctx) -> Result<bool, ExprError> {
        if self.peek() == Some(&Token::LParen) {
            self.advance();
            let v = self.parse_or(ctx)?;
            self.expect(&Token::RParen)?;
            return Ok(v);
        }
        if self.peek() == Some(&Token::True) {
            self.advance();
            return Ok(true);
        }
        if self.peek() == Some(&Token::False) {
            self.advance();
            return Ok(false);
        }

        let lhs = self.parse_value(ctx)?;
        match self.peek() {
            Some(Token::Eq) => {
                self.advance();
                let rhs = self.parse_value(ctx)?;
                Ok(value_eq(&lhs, &rhs))
            }
            Some(Token::NotEq) => {
                self.advance();
                let rhs = self.parse_value(ctx)?;
                Ok(!value_eq(&lhs, &rhs))
            }
            Some(Token::In) => {
                self.advance();
                let list = self.parse_list(ctx)?;
                Ok(list.iter().any(|v| value_eq(v, &lhs)))
            }
            _ => Ok(truthy(&lhs)),
        }
    }

    fn parse_value(&mut self, ctx: &Ctx) -> Result<Value, ExprError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Value::String(s.clone())),
            Some(Token::True) => Ok(Value::Bool(true)),
            Some(Token::False) => Ok(Value::Bool(false)),
            Some(Token::Ident(name)) => Ok(ctx.lookup(name).unwrap_or(Value::Null)),
            other => Err(ExprError(format!("expected a value, found {other:?}"))),
        }
    }

    fn parse_list(&mut self, ctx: &Ctx) -> Result<Vec<Value>, ExprError> {
        self.expect(&Token::LBracket)?;
        let mut items = Vec::new();
        if self.peek() != Some(&Token::RBracket) {
            loop {
                items.push(self.parse_value(ctx)?);
                if self.peek() == Some(&Token::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(&Token::RBracket)?;
        Ok(items)
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Null => false,
        _ => true,
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => a == b,
    }
}

/// Evaluates `expr` against `ctx`. I5: pure, no side effects, booleans only.
pub fn evaluate(expr: &str, ctx: &Ctx) -> Result<bool, ExprError> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser::new(&tokens);
    let result = parser.parse_or(ctx)?;
    if parser.pos != tokens.len() {
        return Err(ExprError(format!("unexpected trailing tokens at position {}", parser.pos)));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn evaluates_simple_equality() {
        let values = ctx(&[("product_type", json!("auto"))]);
        let c = Ctx { collected_values: &values, intent: None };
        assert!(evaluate("product_type == 'auto'", &c).unwrap());
        assert!(!evaluate("product_type == 'home'", &c).unwrap());
    }

    #[test]
    fn evaluates_and_or_not() {
        let values = ctx(&[("a", json!(true)), ("b", json!(false))]);
        let c = Ctx { collected_values: &values, intent: None };
        assert!(evaluate("a and not b", &c).unwrap());
        assert!(evaluate("a or b", &c).unwrap());
        assert!(!evaluate("not a", &c).unwrap());
    }

    #[test]
    fn evaluates_in_membership_and_intent() {
        let values = HashMap::new();
        let c = Ctx { collected_values: &values, intent: Some("claim") };
        assert!(evaluate("intent in ['claim', 'quote']", &c).unwrap());
        assert!(!evaluate("intent in ['quote']", &c).unwrap());
    }

    #[test]
    fn missing_identifier_is_null_and_falsy() {
        let values = HashMap::new();
        let c = Ctx { collected_values: &values, intent: None };
        assert!(!evaluate("missing_slot", &c).unwrap());
        assert!(evaluate("missing_slot != 'x'", &c).unwrap());
    }

    #[test]
    fn rejects_malformed_expressions() {
        let values = HashMap::new();
        let c = Ctx { collected_values: &values, intent: None };
        assert!(evaluate("a ==", &c).is_err());
        assert!(evaluate("1 + 1", &c).is_err());
    }
}
