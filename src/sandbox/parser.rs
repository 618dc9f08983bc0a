//! 语法分析：Token → AST（递归下降，嵌套深度受策略限制）

use crate::sandbox::lexer::{tokenize, Spanned, Token};
use crate::sandbox::value::Value;
use crate::sandbox::{SandboxError, SandboxErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let(String, Expr),
    Assign(String, Expr),
    Expr(Expr),
    If(Expr, Vec<Stmt>, Option<Vec<Stmt>>),
    While(Expr, Vec<Stmt>),
    Return(Option<Expr>),
    Block(Vec<Stmt>),
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

/// 解析整段源码
pub fn parse(source: &str, max_depth: usize) -> Result<Vec<Stmt>, SandboxError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
        depth: 0,
        max_depth,
    };
    let mut program = Vec::new();
    while !parser.check(&Token::Eof) {
        if parser.eat(&Token::Semi) {
            continue;
        }
        program.push(parser.statement()?);
    }
    Ok(program)
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].pos
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, msg: impl std::fmt::Display) -> SandboxError {
        SandboxError::new(
            SandboxErrorKind::Syntax,
            format!("{} at offset {}", msg, self.offset()),
        )
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), SandboxError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {:?}", what, self.peek())))
        }
    }

    fn enter(&mut self) -> Result<(), SandboxError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(SandboxError::new(
                SandboxErrorKind::ResourceLimit,
                format!("nesting deeper than {}", self.max_depth),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn ident(&mut self) -> Result<String, SandboxError> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(self.error(format!("expected identifier, found {:?}", other))),
        }
    }

    fn end_statement(&mut self) -> Result<(), SandboxError> {
        if self.eat(&Token::Semi) || self.check(&Token::RBrace) || self.check(&Token::Eof) {
            Ok(())
        } else {
            Err(self.error(format!("expected ';', found {:?}", self.peek())))
        }
    }

    fn statement(&mut self) -> Result<Stmt, SandboxError> {
        self.enter()?;
        let stmt = self.statement_inner();
        self.leave();
        stmt
    }

    fn statement_inner(&mut self) -> Result<Stmt, SandboxError> {
        match self.peek() {
            Token::Let => {
                self.advance();
                let name = self.ident()?;
                self.expect(&Token::Assign, "'='")?;
                let value = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::Let(name, value))
            }
            Token::If => {
                self.advance();
                self.if_rest()
            }
            Token::While => {
                self.advance();
                let cond = self.expression()?;
                let body = self.block()?;
                Ok(Stmt::While(cond, body))
            }
            Token::Return => {
                self.advance();
                let value = if self.check(&Token::Semi) || self.check(&Token::RBrace) || self.check(&Token::Eof) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement()?;
                Ok(Stmt::Return(value))
            }
            Token::LBrace => Ok(Stmt::Block(self.block()?)),
            Token::Ident(_) if self.tokens.get(self.pos + 1).map(|t| &t.token) == Some(&Token::Assign) => {
                let name = self.ident()?;
                self.advance();
                let value = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::Assign(name, value))
            }
            _ => {
                let expr = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn if_rest(&mut self) -> Result<Stmt, SandboxError> {
        let cond = self.expression()?;
        let then = self.block()?;
        let otherwise = if self.eat(&Token::Else) {
            if self.eat(&Token::If) {
                self.enter()?;
                let nested = self.if_rest();
                self.leave();
                Some(vec![nested?])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If(cond, then, otherwise))
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        self.expect(&Token::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.check(&Token::Eof) {
                return Err(self.error("unclosed block"));
            }
            if self.eat(&Token::Semi) {
                continue;
            }
            stmts.push(self.statement()?);
        }
        self.advance();
        Ok(stmts)
    }

    fn expression(&mut self) -> Result<Expr, SandboxError> {
        self.enter()?;
        let expr = self.or();
        self.leave();
        expr
    }

    // 左结合链每多一个运算符，AST 就深一层，同样计入嵌套深度

    fn or(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.and()?;
        let mut nested = 0;
        while self.eat(&Token::OrOr) {
            self.enter()?;
            nested += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth -= nested;
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.equality()?;
        let mut nested = 0;
        while self.eat(&Token::AndAnd) {
            self.enter()?;
            nested += 1;
            let right = self.equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth -= nested;
        Ok(left)
    }

    fn binary_level(
        &mut self,
        ops: &[(Token, BinOp)],
        next: fn(&mut Self) -> Result<Expr, SandboxError>,
    ) -> Result<Expr, SandboxError> {
        let mut left = next(self)?;
        let mut nested = 0;
        'outer: loop {
            for (token, op) in ops {
                if self.eat(token) {
                    self.enter()?;
                    nested += 1;
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            self.depth -= nested;
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr, SandboxError> {
        self.binary_level(&[(Token::Eq, BinOp::Eq), (Token::Ne, BinOp::Ne)], Self::comparison)
    }

    fn comparison(&mut self) -> Result<Expr, SandboxError> {
        self.binary_level(
            &[
                (Token::Le, BinOp::Le),
                (Token::Ge, BinOp::Ge),
                (Token::Lt, BinOp::Lt),
                (Token::Gt, BinOp::Gt),
            ],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr, SandboxError> {
        self.binary_level(&[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)], Self::factor)
    }

    fn factor(&mut self) -> Result<Expr, SandboxError> {
        self.binary_level(
            &[
                (Token::Star, BinOp::Mul),
                (Token::Slash, BinOp::Div),
                (Token::Percent, BinOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, SandboxError> {
        let op = if self.eat(&Token::Minus) {
            UnaryOp::Neg
        } else if self.eat(&Token::Bang) {
            UnaryOp::Not
        } else {
            return self.primary();
        };
        self.enter()?;
        let operand = self.unary();
        self.leave();
        Ok(Expr::Unary(op, Box::new(operand?)))
    }

    fn primary(&mut self) -> Result<Expr, SandboxError> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if !self.eat(&Token::LParen) {
                    return Ok(Expr::Var(name));
                }
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma, "',' or ')'")?;
                    }
                }
                Ok(Expr::Call(name, args))
            }
            other => Err(self.error(format!("unexpected token {:?}", other))),
        }
    }
}
