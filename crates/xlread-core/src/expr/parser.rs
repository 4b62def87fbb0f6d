use super::error::ExprError;
use crate::Value;

/// Deepest bracket/unary nesting accepted by the parser.
pub const MAX_NESTING: usize = 64;
/// Longest expression, in tokens.
pub const MAX_TOKENS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        }
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `a < b <= c`: every adjacent pair must hold.
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Parse expression source text.
    ///
    /// # Errors
    /// `Parse` with the column of the offending token, or `TooDeep`.
    pub fn parse(source: &str) -> Result<Expr, ExprError> {
        let tokens = tokenize(source)?;
        if tokens.len() > MAX_TOKENS {
            return Err(ExprError::parse(0, "expression too long"));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            end: source.len(),
        };
        let expr = parser.expression()?;
        if let Some(token) = parser.peek() {
            let message = format!("unexpected {}", token.describe());
            return Err(ExprError::parse(parser.position(), message));
        }
        Ok(expr)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Sym(&'static str),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Int(value) => format!("number {value}"),
            Token::Float(value) => format!("number {value}"),
            Token::Str(text) => format!("string {text:?}"),
            Token::Name(name) => format!("name '{name}'"),
            Token::Sym(sym) => format!("'{sym}'"),
        }
    }
}

const SYMBOLS: [&str; 18] = [
    "**", "//", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "(", ")", "[", "]", ",",
];

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let byte = bytes[pos];
        if byte.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;
        let starts_number = byte.is_ascii_digit()
            || (byte == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit));
        if starts_number {
            let (token, end) = lex_number(source, pos)?;
            tokens.push((start, token));
            pos = end;
        } else if byte == b'"' || byte == b'\'' {
            let (text, end) = lex_string(source, pos)?;
            tokens.push((start, Token::Str(text)));
            pos = end;
        } else if byte.is_ascii_alphabetic() || byte == b'_' {
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                pos += 1;
            }
            tokens.push((start, Token::Name(source[start..pos].to_string())));
        } else if let Some(sym) = SYMBOLS
            .iter()
            .copied()
            .find(|sym| bytes[pos..].starts_with(sym.as_bytes()))
        {
            tokens.push((start, Token::Sym(sym)));
            pos += sym.len();
        } else {
            let found = source[pos..].chars().next().unwrap_or('?');
            return Err(ExprError::parse(pos, format!("unexpected character '{found}'")));
        }
    }
    Ok(tokens)
}

fn lex_number(source: &str, start: usize) -> Result<(Token, usize), ExprError> {
    let bytes = source.as_bytes();
    let digits = |mut pos: usize| {
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        pos
    };
    let mut pos = digits(start);
    let mut is_float = false;
    if bytes.get(pos) == Some(&b'.') {
        is_float = true;
        pos = digits(pos + 1);
    }
    if matches!(bytes.get(pos), Some(b'e' | b'E')) {
        let mut exp = pos + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        if bytes.get(exp).is_some_and(u8::is_ascii_digit) {
            is_float = true;
            pos = digits(exp);
        }
    }
    let text = &source[start..pos];
    if !is_float {
        if let Ok(value) = text.parse::<i64>() {
            return Ok((Token::Int(value), pos));
        }
    }
    text.parse::<f64>()
        .map(|value| (Token::Float(value), pos))
        .map_err(|_| ExprError::parse(start, format!("invalid number '{text}'")))
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize), ExprError> {
    let mut chars = source[start..].char_indices();
    let quote = match chars.next() {
        Some((_, quote)) => quote,
        None => return Err(ExprError::parse(start, "unterminated string")),
    };
    let mut text = String::new();
    while let Some((offset, c)) = chars.next() {
        if c == quote {
            return Ok((text, start + offset + c.len_utf8()));
        }
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some((_, 'n')) => text.push('\n'),
            Some((_, 't')) => text.push('\t'),
            Some((_, escaped)) => text.push(escaped),
            None => break,
        }
    }
    Err(ExprError::parse(start, "unterminated string"))
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead).map(|(_, token)| token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.end, |(position, _)| *position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, token)| token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_sym(&self, sym: &str) -> bool {
        matches!(self.peek(), Some(Token::Sym(found)) if *found == sym)
    }

    fn at_name(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(found)) if found == name)
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        let found = self.at_sym(sym);
        if found {
            self.pos += 1;
        }
        found
    }

    fn eat_name(&mut self, name: &str) -> bool {
        let found = self.at_name(name);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), ExprError> {
        if self.eat_sym(sym) {
            return Ok(());
        }
        let found = self
            .peek()
            .map_or_else(|| "end of input".to_string(), Token::describe);
        Err(ExprError::parse(
            self.position(),
            format!("expected '{sym}', found {found}"),
        ))
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ExprError>,
    ) -> Result<T, ExprError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ExprError::TooDeep { limit: MAX_NESTING });
        }
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        self.nested(Self::or_expr)
    }

    fn or_expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and_expr()?;
        while self.eat_name("or") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.not_expr()?;
        while self.eat_name("and") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ExprError> {
        if self.eat_name("not") {
            let operand = self.nested(Self::not_expr)?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let first = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let (op, width) = match self.peek() {
                Some(Token::Sym("==")) => (CompareOp::Eq, 1),
                Some(Token::Sym("!=")) => (CompareOp::Ne, 1),
                Some(Token::Sym("<")) => (CompareOp::Lt, 1),
                Some(Token::Sym("<=")) => (CompareOp::Le, 1),
                Some(Token::Sym(">")) => (CompareOp::Gt, 1),
                Some(Token::Sym(">=")) => (CompareOp::Ge, 1),
                Some(Token::Name(name)) if name == "in" => (CompareOp::In, 1),
                Some(Token::Name(name))
                    if name == "not"
                        && matches!(self.peek_at(1), Some(Token::Name(next)) if next == "in") =>
                {
                    (CompareOp::NotIn, 2)
                }
                _ => break,
            };
            self.pos += width;
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn arith(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_sym("+") {
                BinaryOp::Add
            } else if self.eat_sym("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_sym("*") {
                BinaryOp::Mul
            } else if self.eat_sym("//") {
                BinaryOp::FloorDiv
            } else if self.eat_sym("/") {
                BinaryOp::Div
            } else if self.eat_sym("%") {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = if self.eat_sym("-") {
            UnaryOp::Neg
        } else if self.eat_sym("+") {
            UnaryOp::Pos
        } else {
            return self.power();
        };
        let operand = self.nested(Self::unary)?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    /// `**` binds tighter than unary minus on its left, looser on its right.
    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.postfix()?;
        if self.eat_sym("**") {
            let exponent = self.nested(Self::unary)?;
            return Ok(Expr::Binary(
                BinaryOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.atom()?;
        while self.eat_sym("[") {
            let index = self.expression()?;
            self.expect_sym("]")?;
            expr = Expr::Index(Box::new(expr), Box::new(index));
        }
        Ok(expr)
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        let position = self.position();
        match self.advance() {
            Some(Token::Int(value)) => Ok(Expr::Literal(Value::Int(value))),
            Some(Token::Float(value)) => Ok(Expr::Literal(Value::Float(value))),
            Some(Token::Str(text)) => Ok(Expr::Literal(Value::Text(text))),
            Some(Token::Name(name)) => match name.as_str() {
                "True" => Ok(Expr::Literal(Value::Bool(true))),
                "False" => Ok(Expr::Literal(Value::Bool(false))),
                "None" => Ok(Expr::Literal(Value::Null)),
                "and" | "or" | "not" | "in" => Err(ExprError::parse(
                    position,
                    format!("unexpected keyword '{name}'"),
                )),
                _ if self.at_sym("(") => {
                    self.pos += 1;
                    let args = self.sequence(")")?;
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Var(name)),
            },
            Some(Token::Sym("(")) => {
                let inner = self.expression()?;
                self.expect_sym(")")?;
                Ok(inner)
            }
            Some(Token::Sym("[")) => Ok(Expr::List(self.sequence("]")?)),
            Some(token) => Err(ExprError::parse(
                position,
                format!("unexpected {}", token.describe()),
            )),
            None => Err(ExprError::parse(position, "unexpected end of input")),
        }
    }

    /// Comma-separated expressions up to `close`; a trailing comma is allowed.
    fn sequence(&mut self, close: &str) -> Result<Vec<Expr>, ExprError> {
        let mut items = Vec::new();
        while !self.eat_sym(close) {
            items.push(self.expression()?);
            if !self.eat_sym(",") {
                self.expect_sym(close)?;
                break;
            }
        }
        Ok(items)
    }
}
