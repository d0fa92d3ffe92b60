use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
  #[error("Unexpected character: {0:?}")]
  UnexpectedCharacter(char),
  #[error("Unterminated string literal")]
  UnterminatedString,
  #[error("Invalid number literal: {0}")]
  InvalidNumber(String),
  #[error("Unexpected token: {0}")]
  UnexpectedToken(String),
  #[error("Unexpected end of rule")]
  UnexpectedEnd,
  #[error("Unknown request atom: {0}")]
  UnknownAtom(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
  Equal,
  NotEqual,
  LessThan,
  LessThanEqual,
  GreaterThan,
  GreaterThanEqual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthAtom {
  Id,
  Email,
  Verified,
  CollectionId,
  CollectionName,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
  String(String),
  Number(f64),
  Bool(bool),
  /// `@request.auth.<field>`
  Auth(AuthAtom),
  /// `@request.body.<field>`
  Body(String),
  /// Bare identifier, resolved against the current record.
  Record(String),
}

/// Rule AST. `&&` binds tighter than `||`; both are left-associative and
/// parentheses group as usual.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
  Or(Box<Expr>, Box<Expr>),
  And(Box<Expr>, Box<Expr>),
  Compare(Operand, CmpOp, Operand),
  Literal(bool),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
  LParen,
  RParen,
  AndAnd,
  OrOr,
  Op(CmpOp),
  String(String),
  Number(f64),
  Ident(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, RuleError> {
  let mut tokens = vec![];
  let mut chars = input.chars().peekable();

  while let Some(&c) = chars.peek() {
    match c {
      ' ' | '\t' | '\n' | '\r' => {
        chars.next();
      }
      '(' => {
        chars.next();
        tokens.push(Token::LParen);
      }
      ')' => {
        chars.next();
        tokens.push(Token::RParen);
      }
      '&' => {
        chars.next();
        if chars.next() != Some('&') {
          return Err(RuleError::UnexpectedCharacter('&'));
        }
        tokens.push(Token::AndAnd);
      }
      '|' => {
        chars.next();
        if chars.next() != Some('|') {
          return Err(RuleError::UnexpectedCharacter('|'));
        }
        tokens.push(Token::OrOr);
      }
      '=' => {
        chars.next();
        tokens.push(Token::Op(CmpOp::Equal));
      }
      '!' => {
        chars.next();
        if chars.next() != Some('=') {
          return Err(RuleError::UnexpectedCharacter('!'));
        }
        tokens.push(Token::Op(CmpOp::NotEqual));
      }
      '<' => {
        chars.next();
        if chars.peek() == Some(&'=') {
          chars.next();
          tokens.push(Token::Op(CmpOp::LessThanEqual));
        } else {
          tokens.push(Token::Op(CmpOp::LessThan));
        }
      }
      '>' => {
        chars.next();
        if chars.peek() == Some(&'=') {
          chars.next();
          tokens.push(Token::Op(CmpOp::GreaterThanEqual));
        } else {
          tokens.push(Token::Op(CmpOp::GreaterThan));
        }
      }
      '\'' | '"' => {
        let quote = c;
        chars.next();
        let mut value = String::new();
        loop {
          match chars.next() {
            Some(c) if c == quote => break,
            Some('\\') => match chars.next() {
              Some(escaped) => value.push(escaped),
              None => return Err(RuleError::UnterminatedString),
            },
            Some(c) => value.push(c),
            None => return Err(RuleError::UnterminatedString),
          }
        }
        tokens.push(Token::String(value));
      }
      '0'..='9' | '-' => {
        let mut literal = String::new();
        literal.push(c);
        chars.next();
        while let Some(&c) = chars.peek() {
          if c.is_ascii_digit() || c == '.' {
            literal.push(c);
            chars.next();
          } else {
            break;
          }
        }
        tokens.push(Token::Number(
          literal
            .parse::<f64>()
            .map_err(|_| RuleError::InvalidNumber(literal.clone()))?,
        ));
      }
      c if c.is_ascii_alphabetic() || c == '_' || c == '@' => {
        let mut ident = String::new();
        while let Some(&c) = chars.peek() {
          if c.is_ascii_alphanumeric() || c == '_' || c == '@' || c == '.' {
            ident.push(c);
            chars.next();
          } else {
            break;
          }
        }
        tokens.push(Token::Ident(ident));
      }
      c => {
        return Err(RuleError::UnexpectedCharacter(c));
      }
    }
  }

  return Ok(tokens);
}

struct Parser {
  tokens: Vec<Token>,
  pos: usize,
}

impl Parser {
  fn peek(&self) -> Option<&Token> {
    return self.tokens.get(self.pos);
  }

  fn next(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    if token.is_some() {
      self.pos += 1;
    }
    return token;
  }

  // or_expr := and_expr ('||' and_expr)*
  fn parse_or(&mut self) -> Result<Expr, RuleError> {
    let mut lhs = self.parse_and()?;
    while self.peek() == Some(&Token::OrOr) {
      self.next();
      let rhs = self.parse_and()?;
      lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
    }
    return Ok(lhs);
  }

  // and_expr := primary ('&&' primary)*
  fn parse_and(&mut self) -> Result<Expr, RuleError> {
    let mut lhs = self.parse_primary()?;
    while self.peek() == Some(&Token::AndAnd) {
      self.next();
      let rhs = self.parse_primary()?;
      lhs = Expr::And(Box::new(lhs), Box::new(rhs));
    }
    return Ok(lhs);
  }

  // primary := '(' or_expr ')' | operand cmp_op operand | 'true' | 'false'
  fn parse_primary(&mut self) -> Result<Expr, RuleError> {
    if self.peek() == Some(&Token::LParen) {
      self.next();
      let expr = self.parse_or()?;
      match self.next() {
        Some(Token::RParen) => return Ok(expr),
        Some(token) => return Err(RuleError::UnexpectedToken(format!("{token:?}"))),
        None => return Err(RuleError::UnexpectedEnd),
      }
    }

    let lhs = self.parse_operand()?;

    let Some(Token::Op(op)) = self.peek().cloned() else {
      // The only stand-alone atoms forming a boolean expression are the
      // boolean literals.
      if let Operand::Bool(value) = lhs {
        return Ok(Expr::Literal(value));
      }
      return match self.next() {
        Some(token) => Err(RuleError::UnexpectedToken(format!("{token:?}"))),
        None => Err(RuleError::UnexpectedEnd),
      };
    };

    self.next();
    let rhs = self.parse_operand()?;
    return Ok(Expr::Compare(lhs, op, rhs));
  }

  fn parse_operand(&mut self) -> Result<Operand, RuleError> {
    return match self.next() {
      Some(Token::String(value)) => Ok(Operand::String(value)),
      Some(Token::Number(value)) => Ok(Operand::Number(value)),
      Some(Token::Ident(ident)) => match ident.as_str() {
        "true" => Ok(Operand::Bool(true)),
        "false" => Ok(Operand::Bool(false)),
        "@request.auth.id" => Ok(Operand::Auth(AuthAtom::Id)),
        "@request.auth.email" => Ok(Operand::Auth(AuthAtom::Email)),
        "@request.auth.verified" => Ok(Operand::Auth(AuthAtom::Verified)),
        "@request.auth.collectionId" => Ok(Operand::Auth(AuthAtom::CollectionId)),
        "@request.auth.collectionName" => Ok(Operand::Auth(AuthAtom::CollectionName)),
        _ => {
          if let Some(field) = ident.strip_prefix("@request.body.") {
            if field.is_empty() || field.contains('.') {
              return Err(RuleError::UnknownAtom(ident.clone()));
            }
            return Ok(Operand::Body(field.to_string()));
          }
          if ident.starts_with('@') || ident.contains('.') {
            return Err(RuleError::UnknownAtom(ident.clone()));
          }
          Ok(Operand::Record(ident))
        }
      },
      Some(token) => Err(RuleError::UnexpectedToken(format!("{token:?}"))),
      None => Err(RuleError::UnexpectedEnd),
    };
  }
}

pub(crate) fn parse(input: &str) -> Result<Expr, RuleError> {
  let tokens = tokenize(input)?;
  let mut parser = Parser { tokens, pos: 0 };
  let expr = parser.parse_or()?;

  if let Some(trailing) = parser.next() {
    return Err(RuleError::UnexpectedToken(format!("{trailing:?}")));
  }
  return Ok(expr);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_comparison() {
    let expr = parse(r#"status = "published""#).unwrap();
    assert_eq!(
      expr,
      Expr::Compare(
        Operand::Record("status".to_string()),
        CmpOp::Equal,
        Operand::String("published".to_string()),
      )
    );
  }

  #[test]
  fn test_and_binds_tighter_than_or() {
    // a || b && c parses as a || (b && c).
    let expr = parse("true || false && true").unwrap();
    let Expr::Or(lhs, rhs) = expr else {
      panic!("expected Or at the root");
    };
    assert_eq!(*lhs, Expr::Literal(true));
    assert!(matches!(*rhs, Expr::And(_, _)));
  }

  #[test]
  fn test_parenthesized_groups() {
    let expr = parse("(true || false) && true").unwrap();
    assert!(matches!(expr, Expr::And(_, _)));
  }

  #[test]
  fn test_auth_and_body_atoms() {
    assert_eq!(
      parse(r#"@request.auth.id != """#).unwrap(),
      Expr::Compare(
        Operand::Auth(AuthAtom::Id),
        CmpOp::NotEqual,
        Operand::String(String::new()),
      )
    );

    assert_eq!(
      parse("@request.body.owner = @request.auth.id").unwrap(),
      Expr::Compare(
        Operand::Body("owner".to_string()),
        CmpOp::Equal,
        Operand::Auth(AuthAtom::Id),
      )
    );
  }

  #[test]
  fn test_rejects_unknown_atoms_and_garbage() {
    assert!(parse("@request.cookie.x = 1").is_err());
    assert!(parse("a.b = 1").is_err());
    assert!(parse("status ~ 'x'").is_err());
    assert!(parse("status = ").is_err());
    assert!(parse("= 1").is_err());
    assert!(parse("(true").is_err());
    assert!(parse("true)").is_err());
    assert!(parse("").is_err());
  }

  #[test]
  fn test_string_escapes_and_quotes() {
    assert_eq!(
      parse(r#"title = 'it\'s'"#).unwrap(),
      Expr::Compare(
        Operand::Record("title".to_string()),
        CmpOp::Equal,
        Operand::String("it's".to_string()),
      )
    );
    assert!(matches!(
      parse(r#"title = "double""#).unwrap(),
      Expr::Compare(_, _, _)
    ));
  }

  #[test]
  fn test_numbers() {
    assert_eq!(
      parse("score >= -1.5").unwrap(),
      Expr::Compare(
        Operand::Record("score".to_string()),
        CmpOp::GreaterThanEqual,
        Operand::Number(-1.5),
      )
    );
  }
}
