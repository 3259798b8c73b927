//! Recursive-descent parser turning the token stream into a statement tree.
//!
//! Look-ahead is at most one token. The first error aborts the parse; gflow
//! sources are small and batch-compiled, so there is no recovery.

use crate::CompileError;
use crate::ast::{
    ArgPair, CallKind, ConstAssign, FuncCall, FuncDef, IfStmt, NodeAssign, NodeExp, Statement,
    StrVal,
};
use crate::lexer::{Lexer, Token};
use crate::span::{Span, Spanned};

/// A parser for keeping track of the parsing state.
pub struct Parser<'src> {
    /// The token source
    lexer: Lexer<'src>,
}

impl<'src> Parser<'src> {
    /// Create a parser over the given source text.
    pub fn new(code: &'src str) -> Self {
        Self {
            lexer: Lexer::new(code),
        }
    }

    /// Parse a complete program: constants, function definitions and
    /// comments, in source order.
    pub fn parse(mut self) -> Result<Vec<Statement<'src>>, CompileError> {
        let mut statements = Vec::new();
        loop {
            let token = self.lexer.next();
            match *token {
                Token::Eof => return Ok(statements),
                Token::At => statements.push(self.parse_const()?),
                Token::Comment(text) => statements.push(Statement::Comment(text)),
                Token::Ident("inline") => {
                    self.expect_keyword("func")?;
                    statements.push(self.parse_func()?);
                }
                Token::Ident("func") => statements.push(self.parse_func()?),
                _ => return Err(self.unexpected("`@`, `func` or a comment", &token)),
            }
        }
    }

    /// Parse a constant declaration; the leading `@` has been consumed.
    fn parse_const(&mut self) -> Result<Statement<'src>, CompileError> {
        let name = self.expect_ident()?.take();
        self.expect(Token::Assign)?;
        let value = self.parse_str_val()?;
        self.expect(Token::Semicolon)?;
        Ok(Statement::Const(ConstAssign { name, value }))
    }

    /// Parse a string-valued expression: a literal or an `@name` constant
    /// reference.
    fn parse_str_val(&mut self) -> Result<StrVal<'src>, CompileError> {
        let token = self.lexer.next();
        match *token {
            Token::Str(value) => Ok(StrVal::Literal(value)),
            Token::At => Ok(StrVal::ConstRef(self.expect_ident()?.take())),
            _ => Err(self.unexpected("a string or `@` constant reference", &token)),
        }
    }

    /// Parse a function definition; the `func` keyword has been consumed.
    fn parse_func(&mut self) -> Result<Statement<'src>, CompileError> {
        let name = self.expect_ident()?.take();
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        loop {
            let mut token = self.lexer.next();
            if *token == Token::RParen {
                break;
            }
            if !params.is_empty() {
                if *token != Token::Comma {
                    return Err(self.unexpected("`,`", &token));
                }
                token = self.lexer.next();
            }
            match *token {
                Token::Ident(param) => params.push(param),
                _ => return Err(self.unexpected("a parameter name", &token)),
            }
        }
        self.expect(Token::LBrace)?;
        let body = self.parse_body()?;
        Ok(Statement::FuncDef(FuncDef { name, params, body }))
    }

    /// Parse statements until the `}` closing the enclosing block.
    fn parse_body(&mut self) -> Result<Vec<Statement<'src>>, CompileError> {
        let mut statements = Vec::new();
        loop {
            let token = self.lexer.next();
            match *token {
                Token::RBrace => return Ok(statements),
                Token::Eof => {
                    return Err(CompileError::UnexpectedEof {
                        location: token.span(),
                    });
                }
                Token::At => {
                    self.expect_keyword("call")?;
                    statements.push(Statement::Call(self.parse_func_call(CallKind::Inline)?));
                }
                Token::Comment(text) => statements.push(Statement::Comment(text)),
                Token::Ident("builtin") => {
                    statements.push(Statement::Call(self.parse_func_call(CallKind::Builtin)?));
                }
                Token::Ident("model") => {
                    statements.push(Statement::Call(self.parse_func_call(CallKind::Model)?));
                }
                Token::Ident("if") => statements.push(self.parse_if()?),
                Token::Ident(name) => {
                    // `name=` starts a node assignment, a bare `name;` is a
                    // node value.
                    if *self.lexer.peek() == Token::Assign {
                        self.lexer.push_back(token);
                        statements.push(self.parse_node_assign()?);
                    } else {
                        self.expect(Token::Semicolon)?;
                        statements.push(Statement::NodeVal { name });
                    }
                }
                _ => return Err(self.unexpected("a statement", &token)),
            }
        }
    }

    /// Parse a call; the `builtin` / `model` / `@call` introducer has been
    /// consumed. Consumes the trailing `;`.
    fn parse_func_call(&mut self, kind: CallKind) -> Result<FuncCall<'src>, CompileError> {
        self.expect(Token::LParen)?;
        let name = self.parse_callee_name()?;
        self.expect(Token::Comma)?;
        let inputs = self.parse_inputs()?;
        let args = if *self.lexer.peek() == Token::Comma {
            self.lexer.next();
            self.parse_arg_pairs()?
        } else {
            self.expect(Token::RParen)?;
            Vec::new()
        };
        self.expect(Token::Semicolon)?;
        Ok(FuncCall {
            kind,
            name,
            inputs,
            args,
        })
    }

    /// The callee may be written as a string (`"jq"`) or a bare identifier.
    fn parse_callee_name(&mut self) -> Result<&'src str, CompileError> {
        let token = self.lexer.next();
        match *token {
            Token::Str(name) | Token::Ident(name) => Ok(name),
            _ => Err(self.unexpected("an operator name", &token)),
        }
    }

    /// Parse a call's inputs: a bracketed identifier list or a single bare
    /// identifier.
    fn parse_inputs(&mut self) -> Result<Vec<NodeExp<'src>>, CompileError> {
        if *self.lexer.peek() != Token::LBracket {
            let name = self.expect_ident()?.take();
            return Ok(vec![NodeExp::Var(name)]);
        }
        self.lexer.next();
        let mut inputs = Vec::new();
        loop {
            let mut token = self.lexer.next();
            if *token == Token::RBracket {
                return Ok(inputs);
            }
            if !inputs.is_empty() {
                if *token != Token::Comma {
                    return Err(self.unexpected("`,`", &token));
                }
                token = self.lexer.next();
            }
            match *token {
                Token::Ident(name) => inputs.push(NodeExp::Var(name)),
                _ => return Err(self.unexpected("an input name", &token)),
            }
        }
    }

    /// Parse `name=value` argument pairs up to and including the closing
    /// `)` of the call.
    fn parse_arg_pairs(&mut self) -> Result<Vec<ArgPair<'src>>, CompileError> {
        let mut args = Vec::new();
        loop {
            let mut token = self.lexer.next();
            if *token == Token::RParen {
                return Ok(args);
            }
            if !args.is_empty() {
                if *token != Token::Comma {
                    return Err(self.unexpected("`,`", &token));
                }
                token = self.lexer.next();
            }
            let name = match *token {
                Token::Ident(name) => name,
                _ => return Err(self.unexpected("an argument name", &token)),
            };
            self.expect(Token::Assign)?;
            let value = self.parse_str_val()?;
            args.push(ArgPair { name, value });
        }
    }

    /// Parse `name=<call>`; the name token has been pushed back and is
    /// re-read here.
    fn parse_node_assign(&mut self) -> Result<Statement<'src>, CompileError> {
        let name = self.expect_ident()?.take();
        self.expect(Token::Assign)?;
        let token = self.lexer.next();
        let call = match *token {
            Token::Ident("builtin") => self.parse_func_call(CallKind::Builtin)?,
            Token::Ident("model") => self.parse_func_call(CallKind::Model)?,
            Token::At => {
                self.expect_keyword("call")?;
                self.parse_func_call(CallKind::Inline)?
            }
            _ => return Err(self.unexpected("`builtin`, `model` or `@call`", &token)),
        };
        Ok(Statement::NodeAssign(NodeAssign { name, call }))
    }

    /// Parse an `if` statement; the `if` keyword has been consumed. The
    /// condition is a node variable or a call (a call condition carries its
    /// own terminating `;`).
    fn parse_if(&mut self) -> Result<Statement<'src>, CompileError> {
        self.expect(Token::LParen)?;
        let token = self.lexer.next();
        let cond = match *token {
            Token::Ident("builtin") => {
                NodeExp::Call(Box::new(self.parse_func_call(CallKind::Builtin)?))
            }
            Token::Ident("model") => {
                NodeExp::Call(Box::new(self.parse_func_call(CallKind::Model)?))
            }
            Token::Ident(name) => NodeExp::Var(name),
            Token::At => {
                self.expect_keyword("call")?;
                NodeExp::Call(Box::new(self.parse_func_call(CallKind::Inline)?))
            }
            _ => return Err(self.unexpected("a condition", &token)),
        };
        self.expect(Token::RParen)?;
        self.expect(Token::LBrace)?;
        let then_body = self.parse_body()?;
        let else_body = if *self.lexer.peek() == Token::Ident("else") {
            self.lexer.next();
            self.expect(Token::LBrace)?;
            self.parse_body()?
        } else {
            Vec::new()
        };
        Ok(Statement::If(IfStmt {
            cond,
            then_body,
            else_body,
        }))
    }

    /// If the next token is the given token return its span, otherwise
    /// return an error.
    fn expect(&mut self, expected: Token<'static>) -> Result<Span, CompileError> {
        let token = self.lexer.next();
        if *token == expected {
            Ok(token.span())
        } else {
            Err(self.unexpected(&expected.describe(), &token))
        }
    }

    /// If the next token is an identifier return it, otherwise return an
    /// error.
    fn expect_ident(&mut self) -> Result<Spanned<&'src str>, CompileError> {
        let token = self.lexer.next();
        if let Token::Ident(name) = *token {
            Ok(token.span().with(name))
        } else {
            Err(self.unexpected("an identifier", &token))
        }
    }

    /// If the next token is the given contextual keyword return its span,
    /// otherwise return an error.
    fn expect_keyword(&mut self, keyword: &'static str) -> Result<Span, CompileError> {
        let token = self.lexer.next();
        if *token == Token::Ident(keyword) {
            Ok(token.span())
        } else {
            Err(self.unexpected(&format!("`{keyword}`"), &token))
        }
    }

    /// Build the error for an unexpected token. Illegal scanner output
    /// keeps its own message.
    fn unexpected(&self, expected: &str, token: &Spanned<Token<'_>>) -> CompileError {
        if let Token::Illegal(message) = **token {
            return CompileError::IllegalToken {
                message,
                location: token.span(),
            };
        }
        CompileError::UnexpectedToken {
            expected: expected.to_owned(),
            got: token.describe(),
            location: token.span(),
        }
    }
}
