use crate::builtins::{ArithOp, CmpOp, Expr};
use crate::diagnostics::{Diagnostic, DiagnosticCode, Span};
use crate::query_ast::{
    AggFunc, Element, GroupPattern, Predicate, Projection, Query, QueryForm, SelectItem, Term,
    TriplePattern,
};

#[derive(Debug, Clone, PartialEq)]
enum TokKind {
    Ident(String),
    Var(String),
    Str(String),
    Num(String),
    LBrace,
    RBrace,
    LParen,
    RParen,
    Dot,
    Comma,
    Star,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Bang,
    AndAnd,
    OrOr,
    Plus,
    Minus,
    Slash,
}

#[derive(Debug, Clone)]
struct Tok {
    kind: TokKind,
    start: usize,
    end: usize,
}

pub fn parse_query(src: &str) -> Result<Query, Vec<Diagnostic>> {
    let tokens = lex(src)?;
    let mut parser = Parser {
        src,
        tokens,
        pos: 0,
    };
    let query = parser.query()?;
    if parser.pos < parser.tokens.len() {
        return Err(vec![parser.error_here("unexpected trailing input")]);
    }
    Ok(query)
}

fn lex(src: &str) -> Result<Vec<Tok>, Vec<Diagnostic>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let ch = bytes[i] as char;
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        if ch == '#' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        let start = i;
        let single = |kind: TokKind| Tok {
            kind,
            start,
            end: start + 1,
        };
        match ch {
            '{' => {
                tokens.push(single(TokKind::LBrace));
                i += 1;
            }
            '}' => {
                tokens.push(single(TokKind::RBrace));
                i += 1;
            }
            '(' => {
                tokens.push(single(TokKind::LParen));
                i += 1;
            }
            ')' => {
                tokens.push(single(TokKind::RParen));
                i += 1;
            }
            '.' => {
                tokens.push(single(TokKind::Dot));
                i += 1;
            }
            ',' => {
                tokens.push(single(TokKind::Comma));
                i += 1;
            }
            '*' => {
                tokens.push(single(TokKind::Star));
                i += 1;
            }
            '+' => {
                tokens.push(single(TokKind::Plus));
                i += 1;
            }
            '-' => {
                tokens.push(single(TokKind::Minus));
                i += 1;
            }
            '/' => {
                tokens.push(single(TokKind::Slash));
                i += 1;
            }
            '=' => {
                tokens.push(single(TokKind::Eq));
                i += 1;
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Tok {
                        kind: TokKind::Ne,
                        start,
                        end: start + 2,
                    });
                    i += 2;
                } else {
                    tokens.push(single(TokKind::Bang));
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Tok {
                        kind: TokKind::Le,
                        start,
                        end: start + 2,
                    });
                    i += 2;
                } else {
                    tokens.push(single(TokKind::Lt));
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Tok {
                        kind: TokKind::Ge,
                        start,
                        end: start + 2,
                    });
                    i += 2;
                } else {
                    tokens.push(single(TokKind::Gt));
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Tok {
                        kind: TokKind::AndAnd,
                        start,
                        end: start + 2,
                    });
                    i += 2;
                } else {
                    return Err(vec![lex_error(src, start, 1, "stray '&', expected '&&'")]);
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Tok {
                        kind: TokKind::OrOr,
                        start,
                        end: start + 2,
                    });
                    i += 2;
                } else {
                    return Err(vec![lex_error(src, start, 1, "stray '|', expected '||'")]);
                }
            }
            '"' | '\'' => {
                let quote = ch;
                i += 1;
                let text_start = i;
                while i < bytes.len() && bytes[i] as char != quote {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(vec![lex_error(
                        src,
                        start,
                        bytes.len() - start,
                        "unterminated string literal",
                    )]);
                }
                tokens.push(Tok {
                    kind: TokKind::Str(src[text_start..i].to_string()),
                    start,
                    end: i + 1,
                });
                i += 1;
            }
            '?' => {
                i += 1;
                let name_start = i;
                while i < bytes.len() && is_ident_char(bytes[i] as char) {
                    i += 1;
                }
                if i == name_start {
                    return Err(vec![lex_error(
                        src,
                        start,
                        i - start,
                        "'?' must be followed by a variable name",
                    )]);
                }
                tokens.push(Tok {
                    kind: TokKind::Var(format!("?{}", &src[name_start..i])),
                    start,
                    end: i,
                });
            }
            c if c.is_ascii_digit() => {
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.')
                {
                    // A '.' ending a number is the triple terminator.
                    if bytes[i] == b'.'
                        && !bytes
                            .get(i + 1)
                            .is_some_and(|b| (*b as char).is_ascii_digit())
                    {
                        break;
                    }
                    i += 1;
                }
                tokens.push(Tok {
                    kind: TokKind::Num(src[start..i].to_string()),
                    start,
                    end: i,
                });
            }
            c if is_ident_start(c) => {
                while i < bytes.len() && is_ident_char(bytes[i] as char) {
                    i += 1;
                }
                tokens.push(Tok {
                    kind: TokKind::Ident(src[start..i].to_string()),
                    start,
                    end: i,
                });
            }
            _ => {
                return Err(vec![lex_error(
                    src,
                    start,
                    1,
                    format!("unexpected character '{ch}'"),
                )]);
            }
        }
    }
    Ok(tokens)
}

fn lex_error(src: &str, start: usize, len: usize, message: impl Into<String>) -> Diagnostic {
    Diagnostic::new(DiagnosticCode::Query, message).at(Span::locate(src, start, len))
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Tok>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&TokKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&TokKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<TokKind> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok.map(|t| t.kind)
    }

    fn error_here(&self, message: impl Into<String>) -> Diagnostic {
        let diag = Diagnostic::new(DiagnosticCode::Query, message);
        match self
            .tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
        {
            Some(tok) => diag.at(Span::locate(self.src, tok.start, tok.end - tok.start)),
            None => diag,
        }
    }

    fn keyword_is(&self, offset: usize, word: &str) -> bool {
        matches!(
            self.peek_at(offset),
            Some(TokKind::Ident(id)) if id.eq_ignore_ascii_case(word)
        )
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.keyword_is(0, word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), Vec<Diagnostic>> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(vec![self.error_here(format!("expected '{word}'"))])
        }
    }

    fn expect(&mut self, kind: TokKind, what: &str) -> Result<(), Vec<Diagnostic>> {
        if self.peek() == Some(&kind) {
            self.pos += 1;
            Ok(())
        } else {
            Err(vec![self.error_here(format!("expected {what}"))])
        }
    }

    fn query(&mut self) -> Result<Query, Vec<Diagnostic>> {
        if self.eat_keyword("ASK") {
            self.eat_keyword("WHERE");
            self.expect(TokKind::LBrace, "'{'")?;
            let pattern = self.group()?;
            return Ok(Query {
                form: QueryForm::Ask,
                projection: Projection::Star,
                pattern,
                group_by: Vec::new(),
                having: None,
                order_by: Vec::new(),
                limit: None,
                offset: 0,
            });
        }

        self.expect_keyword("SELECT")?;
        self.eat_keyword("DISTINCT"); // results are implicitly distinct
        let projection = self.projection()?;
        self.expect_keyword("WHERE")?;
        self.expect(TokKind::LBrace, "'{'")?;
        let pattern = self.group()?;

        let mut query = Query::select(pattern, projection);
        loop {
            if self.keyword_is(0, "GROUP") {
                self.pos += 1;
                self.expect_keyword("BY")?;
                while let Some(TokKind::Var(v)) = self.peek() {
                    query.group_by.push(v.clone());
                    self.pos += 1;
                }
                if query.group_by.is_empty() {
                    return Err(vec![self.error_here("GROUP BY requires variables")]);
                }
            } else if self.keyword_is(0, "HAVING") {
                self.pos += 1;
                self.expect(TokKind::LParen, "'('")?;
                let expr = self.expr()?;
                self.expect(TokKind::RParen, "')'")?;
                query.having = Some(expr);
            } else if self.keyword_is(0, "ORDER") {
                self.pos += 1;
                self.expect_keyword("BY")?;
                let mut any = false;
                loop {
                    if let Some(TokKind::Var(v)) = self.peek() {
                        query.order_by.push((v.clone(), true));
                        self.pos += 1;
                        any = true;
                    } else if self.keyword_is(0, "ASC") || self.keyword_is(0, "DESC") {
                        let ascending = self.keyword_is(0, "ASC");
                        self.pos += 1;
                        self.expect(TokKind::LParen, "'('")?;
                        let Some(TokKind::Var(v)) = self.advance() else {
                            return Err(vec![self.error_here("expected variable")]);
                        };
                        query.order_by.push((v, ascending));
                        self.expect(TokKind::RParen, "')'")?;
                        any = true;
                    } else {
                        break;
                    }
                }
                if !any {
                    return Err(vec![self.error_here("ORDER BY requires sort keys")]);
                }
            } else if self.keyword_is(0, "LIMIT") {
                self.pos += 1;
                query.limit = Some(self.number()?);
            } else if self.keyword_is(0, "OFFSET") {
                self.pos += 1;
                query.offset = self.number()?;
            } else {
                break;
            }
        }
        Ok(query)
    }

    fn number(&mut self) -> Result<usize, Vec<Diagnostic>> {
        match self.advance() {
            Some(TokKind::Num(n)) => n
                .parse::<usize>()
                .map_err(|_| vec![self.error_here("expected a non-negative integer")]),
            _ => Err(vec![self.error_here("expected a number")]),
        }
    }

    fn projection(&mut self) -> Result<Projection, Vec<Diagnostic>> {
        if self.peek() == Some(&TokKind::Star) {
            self.pos += 1;
            return Ok(Projection::Star);
        }
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(TokKind::Var(v)) => {
                    items.push(SelectItem::Var(v.clone()));
                    self.pos += 1;
                }
                Some(TokKind::LParen) => {
                    items.push(self.parenthesized_select_item()?);
                }
                Some(TokKind::Ident(id)) if agg_func(id).is_some() => {
                    // Bare aggregate: legal only as a scalar subquery head.
                    items.push(self.aggregate_item(false)?);
                }
                _ => break,
            }
        }
        if items.is_empty() {
            return Err(vec![self.error_here("SELECT requires variables or '*'")]);
        }
        Ok(Projection::Items(items))
    }

    fn parenthesized_select_item(&mut self) -> Result<SelectItem, Vec<Diagnostic>> {
        self.expect(TokKind::LParen, "'('")?;
        if self.keyword_is(0, "SELECT") {
            let sub = self.query()?;
            self.expect(TokKind::RParen, "')'")?;
            if !self.eat_keyword("AS") {
                return Err(vec![
                    self.error_here("scalar subquery requires an 'AS ?alias'"),
                ]);
            }
            let Some(TokKind::Var(alias)) = self.advance() else {
                return Err(vec![self.error_here("expected alias variable")]);
            };
            return Ok(SelectItem::Subquery {
                query: Box::new(sub),
                alias,
            });
        }
        let item = self.aggregate_item(true)?;
        self.expect(TokKind::RParen, "')'")?;
        Ok(item)
    }

    /// `COUNT(?x) [AS ?alias]`. When `alias_required` (the parenthesized
    /// projection form) a missing alias is an error; a bare aggregate
    /// heading a scalar subquery gets a synthetic alias.
    fn aggregate_item(&mut self, alias_required: bool) -> Result<SelectItem, Vec<Diagnostic>> {
        let Some(TokKind::Ident(id)) = self.advance() else {
            return Err(vec![self.error_here("expected aggregate function")]);
        };
        let Some(func) = agg_func(&id) else {
            return Err(vec![self.error_here(format!("unknown aggregate '{id}'"))]);
        };
        self.expect(TokKind::LParen, "'('")?;
        let arg = match self.advance() {
            Some(TokKind::Var(v)) => Some(v),
            Some(TokKind::Star) => None,
            _ => return Err(vec![self.error_here("expected variable or '*'")]),
        };
        self.expect(TokKind::RParen, "')'")?;
        let alias = if self.eat_keyword("AS") {
            match self.advance() {
                Some(TokKind::Var(v)) => v,
                _ => return Err(vec![self.error_here("expected alias variable")]),
            }
        } else if alias_required {
            return Err(vec![self.error_here("aggregate requires an 'AS ?alias'")]);
        } else {
            "?scalar".to_string()
        };
        Ok(SelectItem::Aggregate { func, arg, alias })
    }

    /// Body of a `{ ... }` group; consumes the closing brace.
    fn group(&mut self) -> Result<GroupPattern, Vec<Diagnostic>> {
        let mut elements = Vec::new();
        loop {
            match self.peek() {
                None => return Err(vec![self.error_here("unterminated group, expected '}'")]),
                Some(TokKind::RBrace) => {
                    self.pos += 1;
                    return Ok(GroupPattern { elements });
                }
                Some(TokKind::LBrace) => {
                    self.pos += 1;
                    let first = self.group()?;
                    let mut branches = vec![first];
                    while self.eat_keyword("UNION") {
                        self.expect(TokKind::LBrace, "'{'")?;
                        branches.push(self.group()?);
                    }
                    elements.push(Element::Union(branches));
                }
                Some(TokKind::Ident(id)) if id.eq_ignore_ascii_case("OPTIONAL") => {
                    self.pos += 1;
                    self.expect(TokKind::LBrace, "'{'")?;
                    elements.push(Element::Optional(self.group()?));
                }
                Some(TokKind::Ident(id)) if id.eq_ignore_ascii_case("MINUS") => {
                    self.pos += 1;
                    self.expect(TokKind::LBrace, "'{'")?;
                    elements.push(Element::Minus(self.group()?));
                }
                Some(TokKind::Ident(id)) if id.eq_ignore_ascii_case("NOT") => {
                    self.pos += 1;
                    self.expect_keyword("EXISTS")?;
                    self.expect(TokKind::LBrace, "'{'")?;
                    elements.push(Element::NotExists(self.group()?));
                }
                Some(TokKind::Ident(id)) if id.eq_ignore_ascii_case("FILTER") => {
                    self.pos += 1;
                    if self.keyword_is(0, "NOT") {
                        self.pos += 1;
                        self.expect_keyword("EXISTS")?;
                        self.expect(TokKind::LBrace, "'{'")?;
                        elements.push(Element::NotExists(self.group()?));
                    } else {
                        self.expect(TokKind::LParen, "'('")?;
                        let expr = self.expr()?;
                        self.expect(TokKind::RParen, "')'")?;
                        elements.push(Element::Filter(expr));
                    }
                }
                Some(TokKind::Ident(id)) if id.eq_ignore_ascii_case("VALUES") => {
                    self.pos += 1;
                    let Some(TokKind::Var(var)) = self.advance() else {
                        return Err(vec![self.error_here("expected variable after VALUES")]);
                    };
                    self.expect(TokKind::LBrace, "'{'")?;
                    let mut values = Vec::new();
                    loop {
                        match self.advance() {
                            Some(TokKind::RBrace) => break,
                            Some(TokKind::Ident(v)) | Some(TokKind::Str(v))
                            | Some(TokKind::Num(v)) => values.push(v),
                            _ => {
                                return Err(vec![
                                    self.error_here("expected value or '}' in VALUES"),
                                ]);
                            }
                        }
                    }
                    elements.push(Element::Values { var, values });
                }
                _ => elements.push(Element::Triple(self.triple()?)),
            }
        }
    }

    fn triple(&mut self) -> Result<TriplePattern, Vec<Diagnostic>> {
        let subject = self.term()?;
        let Some(TokKind::Ident(property)) = self.advance() else {
            return Err(vec![self.error_here("expected predicate identifier")]);
        };
        let predicate = if self.peek() == Some(&TokKind::Star) {
            self.pos += 1;
            let max_depth = match self.peek() {
                Some(TokKind::Num(n)) => {
                    let depth = n
                        .parse::<usize>()
                        .map_err(|_| vec![self.error_here("expected depth bound")])?;
                    self.pos += 1;
                    Some(depth)
                }
                _ => None,
            };
            Predicate::Path {
                property,
                max_depth,
            }
        } else {
            Predicate::Iri(property)
        };
        let object = self.term()?;
        if self.peek() == Some(&TokKind::Dot) {
            self.pos += 1;
        }
        Ok(TriplePattern {
            subject,
            predicate,
            object,
        })
    }

    fn term(&mut self) -> Result<Term, Vec<Diagnostic>> {
        match self.advance() {
            Some(TokKind::Var(v)) => Ok(Term::Var(v)),
            Some(TokKind::Ident(v)) | Some(TokKind::Str(v)) | Some(TokKind::Num(v)) => {
                Ok(Term::Literal(v))
            }
            _ => Err(vec![self.error_here("expected term")]),
        }
    }

    // ---- FILTER / HAVING expressions ---------------------------------

    fn expr(&mut self) -> Result<Expr, Vec<Diagnostic>> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, Vec<Diagnostic>> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&TokKind::OrOr) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, Vec<Diagnostic>> {
        let mut lhs = self.cmp_expr()?;
        while self.peek() == Some(&TokKind::AndAnd) {
            self.pos += 1;
            let rhs = self.cmp_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn cmp_expr(&mut self) -> Result<Expr, Vec<Diagnostic>> {
        let lhs = self.add_expr()?;
        let op = match self.peek() {
            Some(TokKind::Eq) => Some(CmpOp::Eq),
            Some(TokKind::Ne) => Some(CmpOp::Ne),
            Some(TokKind::Lt) => Some(CmpOp::Lt),
            Some(TokKind::Le) => Some(CmpOp::Le),
            Some(TokKind::Gt) => Some(CmpOp::Gt),
            Some(TokKind::Ge) => Some(CmpOp::Ge),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let rhs = self.add_expr()?;
                Ok(Expr::Cmp(op, Box::new(lhs), Box::new(rhs)))
            }
            None => Ok(lhs),
        }
    }

    fn add_expr(&mut self) -> Result<Expr, Vec<Diagnostic>> {
        let mut lhs = self.mul_expr()?;
        loop {
            let op = match self.peek() {
                Some(TokKind::Plus) => ArithOp::Add,
                Some(TokKind::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.mul_expr()?;
            lhs = Expr::Arith(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn mul_expr(&mut self) -> Result<Expr, Vec<Diagnostic>> {
        let mut lhs = self.unary_expr()?;
        loop {
            let op = match self.peek() {
                Some(TokKind::Star) => ArithOp::Mul,
                Some(TokKind::Slash) => ArithOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary_expr()?;
            lhs = Expr::Arith(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary_expr(&mut self) -> Result<Expr, Vec<Diagnostic>> {
        if self.peek() == Some(&TokKind::Bang) {
            self.pos += 1;
            let inner = self.unary_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary_expr()
    }

    fn primary_expr(&mut self) -> Result<Expr, Vec<Diagnostic>> {
        match self.peek().cloned() {
            Some(TokKind::Var(v)) => {
                self.pos += 1;
                Ok(Expr::Var(v))
            }
            Some(TokKind::Str(s)) => {
                self.pos += 1;
                Ok(Expr::StrLit(s))
            }
            Some(TokKind::Num(n)) => {
                self.pos += 1;
                let value = n
                    .parse::<f64>()
                    .map_err(|_| vec![self.error_here("invalid number")])?;
                Ok(Expr::NumLit(value))
            }
            Some(TokKind::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(TokKind::RParen, "')'")?;
                Ok(inner)
            }
            Some(TokKind::Ident(id)) => {
                self.pos += 1;
                self.builtin_call(&id)
            }
            _ => Err(vec![self.error_here("expected expression")]),
        }
    }

    fn builtin_call(&mut self, name: &str) -> Result<Expr, Vec<Diagnostic>> {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "TRUE" => return Ok(Expr::NumLit(1.0)),
            "FALSE" => return Ok(Expr::NumLit(0.0)),
            _ => {}
        }
        self.expect(TokKind::LParen, "'('")?;
        let expr = match upper.as_str() {
            "BOUND" => {
                let Some(TokKind::Var(v)) = self.advance() else {
                    return Err(vec![self.error_here("BOUND takes a variable")]);
                };
                Expr::Bound(v)
            }
            "STR" => Expr::Str(Box::new(self.expr()?)),
            "CONTAINS" | "STRSTARTS" | "STRENDS" | "REGEX" | "LEVENSHTEIN" => {
                let a = self.expr()?;
                self.expect(TokKind::Comma, "','")?;
                let b = self.expr()?;
                match upper.as_str() {
                    "CONTAINS" => Expr::Contains(Box::new(a), Box::new(b)),
                    "STRSTARTS" => Expr::StrStarts(Box::new(a), Box::new(b)),
                    "STRENDS" => Expr::StrEnds(Box::new(a), Box::new(b)),
                    "REGEX" => Expr::Regex(Box::new(a), Box::new(b)),
                    _ => Expr::Levenshtein(Box::new(a), Box::new(b)),
                }
            }
            _ => {
                return Err(vec![self.error_here(format!("unknown builtin '{name}'"))]);
            }
        };
        self.expect(TokKind::RParen, "')'")?;
        Ok(expr)
    }
}

fn agg_func(name: &str) -> Option<AggFunc> {
    match name.to_ascii_uppercase().as_str() {
        "COUNT" => Some(AggFunc::Count),
        "SUM" => Some(AggFunc::Sum),
        "AVG" => Some(AggFunc::Avg),
        "MIN" => Some(AggFunc::Min),
        "MAX" => Some(AggFunc::Max),
        _ => None,
    }
}
