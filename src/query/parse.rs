//! Parser for query strings and the textual expression grammar.
//!
//! ```text
//! expr      := binary
//! binary    := unary (op binary)*          precedence: or < and < cmp < add/sub < mul/div/mod
//! unary     := 'not' unary | '-' unary | postfix
//! postfix   := primary ('.' ident | '.' method '(' [ident ':' expr] ')')*
//! primary   := literal | 'this' | ident | function '(' expr (',' expr)* ')' | '(' expr ')'
//! selection := expr ['as' ident] (',' expr ['as' ident])*
//! ```
//!
//! Bare identifiers name members of the root element unless they match a
//! parameter of an enclosing method lambda (case-insensitively).

use std::fmt;

use percent_encoding::percent_decode_str;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::Config;
use crate::error::{MappingError, Result};
use crate::query::ast::{Projection, SortDirection};
use crate::query::expr::{BinaryOp, Expr, Function, Lambda, Literal, Method};
use crate::query::normalize::SortKey;
use crate::query::render::{is_identifier, render_lambda, render_selection, RESERVED};

/// Parsed `$`-parameters of a request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedQuery {
    /// `$oftype` type name, resolved by the interpreter.
    pub of_type: Option<String>,
    /// `$filter`.
    pub filter: Option<Lambda>,
    /// `$orderby`.
    pub order_by: Option<SortKey>,
    /// `$groupby`.
    pub group_by: Option<Lambda>,
    /// `$select`.
    pub select: Option<Lambda>,
    /// `$skip`.
    pub skip: Option<u64>,
    /// `$top`.
    pub top: Option<u64>,
    /// `$expand` paths.
    pub expand: Vec<String>,
    /// `$totalcount=true`.
    pub include_total_count: bool,
    /// `$projection`, [`Projection::Enumerable`] when absent.
    pub projection: Projection,
}

impl fmt::Display for ParsedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = |l: &Lambda| render_lambda(l).unwrap_or_else(|err| format!("<{err}>"));
        let mut steps: Vec<(&str, String)> = Vec::new();
        if let Some(name) = &self.of_type {
            steps.push(("oftype", name.clone()));
        }
        if let Some(filter) = &self.filter {
            steps.push(("filter", shown(filter)));
        }
        if let Some(key) = &self.group_by {
            steps.push(("groupby", shown(key)));
        }
        if self.include_total_count {
            steps.push(("totalcount", String::new()));
        }
        if let Some(sort) = &self.order_by {
            let direction = match sort.direction {
                SortDirection::Ascending => "asc",
                SortDirection::Descending => "desc",
            };
            steps.push(("orderby", format!("{} {direction}", shown(&sort.key))));
        }
        if let Some(skip) = self.skip {
            steps.push(("skip", skip.to_string()));
        }
        if let Some(top) = self.top {
            steps.push(("top", top.to_string()));
        }
        if let Some(select) = &self.select {
            let text = render_selection(select).unwrap_or_else(|err| format!("<{err}>"));
            steps.push(("select", text));
        }
        if !self.expand.is_empty() {
            steps.push(("expand", self.expand.join(",")));
        }
        steps.push(("projection", self.projection.to_string()));
        for (idx, (name, detail)) in steps.iter().enumerate() {
            writeln!(f, "{:>2}. {name:<11} {detail}", idx + 1)?;
        }
        Ok(())
    }
}

/// Parses a raw query string (with or without the leading `?`).
pub fn parse_query_string(raw: &str, config: &Config) -> Result<ParsedQuery> {
    if raw.len() > config.max_query_length {
        return Err(MappingError::invalid_query(format!(
            "query string of {} bytes exceeds the limit of {}",
            raw.len(),
            config.max_query_length
        )));
    }
    let raw = raw.strip_prefix('?').unwrap_or(raw);
    let depth = config.max_expression_depth;
    let mut query = ParsedQuery::default();
    let mut seen: Vec<String> = Vec::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode(key)?.to_ascii_lowercase();
        if !key.starts_with('$') {
            continue;
        }
        if seen.contains(&key) {
            return Err(MappingError::invalid_query(format!("duplicate parameter {key}")));
        }
        let value = decode(value)?;
        match key.as_str() {
            "$oftype" => query.of_type = Some(value.trim().to_owned()),
            "$filter" => query.filter = Some(parse_lambda(&value, depth)?),
            "$orderby" => query.order_by = Some(parse_order(&value, depth)?),
            "$groupby" => query.group_by = Some(parse_lambda(&value, depth)?),
            "$select" => query.select = Some(parse_selection(&value, depth)?),
            "$skip" => query.skip = Some(parse_count(&key, &value)?),
            "$top" => query.top = Some(parse_count(&key, &value)?),
            "$expand" => query.expand = parse_expand(&value)?,
            "$totalcount" => {
                query.include_total_count = match value.trim().to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(MappingError::invalid_query(format!(
                            "$totalcount must be true or false, found '{other}'"
                        )))
                    }
                }
            }
            "$projection" => {
                query.projection = Projection::from_wire_name(value.trim()).ok_or_else(|| {
                    MappingError::invalid_query(format!("unknown projection '{value}'"))
                })?
            }
            _ => {
                return Err(MappingError::invalid_query(format!("unknown parameter {key}")));
            }
        }
        seen.push(key);
    }
    Ok(query)
}

fn decode(text: &str) -> Result<String> {
    let spaced = text.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|err| MappingError::invalid_query(format!("malformed encoding: {err}")))
}

fn parse_count(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| MappingError::invalid_query(format!("{key} must be a non-negative integer, found '{value}'")))
}

fn parse_expand(value: &str) -> Result<Vec<String>> {
    let mut paths: Vec<String> = Vec::new();
    for path in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if !path.split('.').all(is_identifier) {
            return Err(MappingError::invalid_query(format!("malformed expand path '{path}'")));
        }
        if !paths.iter().any(|p| p.eq_ignore_ascii_case(path)) {
            paths.push(path.to_owned());
        }
    }
    Ok(paths)
}

/// Parses an expression over an implicit root element.
pub fn parse_lambda(text: &str, max_depth: usize) -> Result<Lambda> {
    let mut parser = Parser::new(text, max_depth)?;
    let body = parser.expr()?;
    parser.expect_end()?;
    Ok(parser.finish(body))
}

/// Parses a `$select` value.
pub fn parse_selection(text: &str, max_depth: usize) -> Result<Lambda> {
    let mut parser = Parser::new(text, max_depth)?;
    let mut fields: Vec<(String, Expr)> = Vec::new();
    let mut aliased = false;
    loop {
        let value = parser.expr()?;
        let alias = if parser.eat_word("as") {
            aliased = true;
            Some(parser.identifier()?)
        } else {
            None
        };
        let alias = match alias {
            Some(alias) => alias,
            None => match &value {
                Expr::Member { name, .. } => name.clone(),
                _ => format!("Item{}", fields.len() + 1),
            },
        };
        if fields.iter().any(|(n, _)| n.eq_ignore_ascii_case(&alias)) {
            return Err(MappingError::invalid_query(format!(
                "duplicate projection alias '{alias}'"
            )));
        }
        fields.push((alias, value));
        if !parser.eat(&Token::Comma) {
            break;
        }
    }
    parser.expect_end()?;
    let body = if fields.len() == 1 && !aliased {
        fields.swap_remove(0).1
    } else {
        Expr::New(fields)
    };
    Ok(parser.finish(body))
}

/// Parses an `$orderby` value: one key with an optional `asc`/`desc`.
pub fn parse_order(text: &str, max_depth: usize) -> Result<SortKey> {
    let mut parser = Parser::new(text, max_depth)?;
    let body = parser.expr()?;
    let direction = if parser.eat_word("desc") {
        SortDirection::Descending
    } else {
        parser.eat_word("asc");
        SortDirection::Ascending
    };
    if parser.peek() == &Token::Comma {
        return Err(MappingError::not_supported("ordering by more than one key"));
    }
    parser.expect_end()?;
    Ok(SortKey {
        key: parser.finish(body),
        direction,
    })
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Int(u64),
    Float(f64),
    Str(String),
    DateTime(OffsetDateTime),
    LParen,
    RParen,
    Comma,
    Dot,
    Colon,
    Minus,
    End,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{s}'"),
            Token::Int(i) => write!(f, "{i}"),
            Token::Float(x) => write!(f, "{x}"),
            Token::Str(s) => write!(f, "string '{s}'"),
            Token::DateTime(dt) => write!(f, "datetime {dt}"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
            Token::Dot => f.write_str("'.'"),
            Token::Colon => f.write_str("':'"),
            Token::Minus => f.write_str("'-'"),
            Token::End => f.write_str("end of input"),
        }
    }
}

static END: Token = Token::End;

fn syntax(message: impl fmt::Display, offset: usize) -> MappingError {
    MappingError::invalid_query(format!("{message} at offset {offset}"))
}

fn lex(text: &str) -> Result<Vec<(Token, usize)>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'(' => tokens.push((Token::LParen, start)),
            b')' => tokens.push((Token::RParen, start)),
            b',' => tokens.push((Token::Comma, start)),
            b'.' => tokens.push((Token::Dot, start)),
            b':' => tokens.push((Token::Colon, start)),
            b'-' => tokens.push((Token::Minus, start)),
            b'\'' => {
                let (s, end) = lex_string(text, i)?;
                tokens.push((Token::Str(s), start));
                i = end;
                continue;
            }
            b'0'..=b'9' => {
                let (token, end) = lex_number(text, i)?;
                tokens.push((token, start));
                i = end;
                continue;
            }
            _ => {
                let ch = text[i..].chars().next().unwrap_or('\0');
                if !(ch.is_alphabetic() || ch == '_') {
                    return Err(syntax(format!("unexpected character '{ch}'"), start));
                }
                let end = text[i..]
                    .char_indices()
                    .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
                    .map_or(text.len(), |(idx, _)| i + idx);
                let word = &text[i..end];
                if word.eq_ignore_ascii_case("datetime") && bytes.get(end) == Some(&b'\'') {
                    let (s, after) = lex_string(text, end)?;
                    let dt = OffsetDateTime::parse(&s, &Rfc3339)
                        .map_err(|err| syntax(format!("invalid datetime '{s}': {err}"), start))?;
                    tokens.push((Token::DateTime(dt), start));
                    i = after;
                } else {
                    tokens.push((Token::Ident(word.to_owned()), start));
                    i = end;
                }
                continue;
            }
        }
        i += 1;
    }
    tokens.push((Token::End, text.len()));
    Ok(tokens)
}

/// Lexes a quoted string starting at the opening quote; `''` is an escaped quote.
fn lex_string(text: &str, open: usize) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut chars = text[open + 1..].char_indices();
    while let Some((idx, c)) = chars.next() {
        if c == '\'' {
            let next = text[open + 1 + idx + 1..].chars().next();
            if next == Some('\'') {
                out.push('\'');
                chars.next();
            } else {
                return Ok((out, open + 1 + idx + 1));
            }
        } else {
            out.push(c);
        }
    }
    Err(syntax("unterminated string", open))
}

fn lex_number(text: &str, start: usize) -> Result<(Token, usize)> {
    let bytes = text.as_bytes();
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut real = false;
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        real = true;
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            real = true;
            end = exp;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
    }
    let literal = &text[start..end];
    let token = if real {
        Token::Float(
            literal
                .parse()
                .map_err(|_| syntax(format!("invalid number '{literal}'"), start))?,
        )
    } else {
        Token::Int(
            literal
                .parse()
                .map_err(|_| syntax(format!("integer '{literal}' is out of range"), start))?,
        )
    };
    Ok((token, end))
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    root: String,
    /// Enclosing lambda parameters: (written name, internal name).
    scopes: Vec<(String, String)>,
    depth: usize,
    max_depth: usize,
    next_parameter: usize,
}

impl Parser {
    fn new(text: &str, max_depth: usize) -> Result<Self> {
        Ok(Self {
            tokens: lex(text)?,
            pos: 0,
            root: "_p0".to_owned(),
            scopes: Vec::new(),
            depth: 0,
            max_depth,
            next_parameter: 1,
        })
    }

    /// Internal name for the next lambda; written names never reach the tree.
    fn fresh_parameter(&mut self) -> String {
        let name = format!("_p{}", self.next_parameter);
        self.next_parameter += 1;
        name
    }

    fn finish(self, body: Expr) -> Lambda {
        Lambda::new(self.root, body)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&END, |(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |(_, o)| *o)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        match self.peek() {
            Token::Ident(w) if w.eq_ignore_ascii_case(word) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(syntax(format!("expected {token}, found {}", self.peek()), self.offset()))
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        match self.peek() {
            Token::End => Ok(()),
            other => Err(syntax(format!("unexpected {other}"), self.offset())),
        }
    }

    fn identifier(&mut self) -> Result<String> {
        let offset = self.offset();
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(syntax(format!("expected identifier, found {other}"), offset)),
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(MappingError::invalid_query(format!(
                "expression nesting exceeds {} levels",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr> {
        self.binary(0)
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        match self.peek() {
            Token::Ident(word) => BinaryOp::from_keyword(word),
            _ => None,
        }
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr> {
        self.enter()?;
        let mut left = self.unary()?;
        while let Some(op) = self.binary_op() {
            if op.precedence() < min_prec {
                break;
            }
            self.pos += 1;
            let right = self.binary(op.precedence() + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth -= 1;
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        self.enter()?;
        let expr = if self.eat_word("not") {
            self.unary()?.not()
        } else if self.eat(&Token::Minus) {
            let offset = self.offset();
            match self.peek().clone() {
                Token::Int(magnitude) => {
                    self.pos += 1;
                    let value = 0i64.checked_sub_unsigned(magnitude).ok_or_else(|| {
                        syntax(format!("integer -{magnitude} is out of range"), offset)
                    })?;
                    self.postfix(Expr::Constant(Literal::Int(value)))?
                }
                Token::Float(magnitude) => {
                    self.pos += 1;
                    self.postfix(Expr::Constant(Literal::Float(-magnitude)))?
                }
                _ => self.unary()?.negate(),
            }
        } else {
            let primary = self.primary()?;
            self.postfix(primary)?
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn postfix(&mut self, mut expr: Expr) -> Result<Expr> {
        while self.eat(&Token::Dot) {
            let offset = self.offset();
            let name = self.identifier()?;
            if self.peek() != &Token::LParen {
                expr = expr.member(name);
                continue;
            }
            let method = Method::from_name(&name)
                .ok_or_else(|| syntax(format!("unknown method '{name}'"), offset))?;
            self.expect(&Token::LParen)?;
            let lambda = if self.eat(&Token::RParen) {
                None
            } else {
                let shown = self.identifier()?;
                self.expect(&Token::Colon)?;
                let parameter = self.fresh_parameter();
                self.scopes.push((shown, parameter.clone()));
                let body = self.expr();
                self.scopes.pop();
                self.expect(&Token::RParen)?;
                Some(Box::new(Lambda::new(parameter, body?)))
            };
            expr = Expr::Method {
                target: Box::new(expr),
                method,
                lambda,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr> {
        let offset = self.offset();
        match self.advance() {
            Token::Int(magnitude) => {
                let value = i64::try_from(magnitude)
                    .map_err(|_| syntax(format!("integer {magnitude} is out of range"), offset))?;
                Ok(Expr::Constant(Literal::Int(value)))
            }
            Token::Float(value) => Ok(Expr::Constant(Literal::Float(value))),
            Token::Str(s) => Ok(Expr::Constant(Literal::String(s))),
            Token::DateTime(dt) => Ok(Expr::Constant(Literal::DateTime(dt))),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(word) => self.word(word, offset),
            other => Err(syntax(format!("unexpected {other}"), offset)),
        }
    }

    fn word(&mut self, word: String, offset: usize) -> Result<Expr> {
        if self.peek() == &Token::LParen {
            let function = Function::from_name(&word)
                .ok_or_else(|| syntax(format!("unknown function '{word}'"), offset))?;
            self.pos += 1;
            let mut args = vec![self.expr()?];
            while self.eat(&Token::Comma) {
                args.push(self.expr()?);
            }
            self.expect(&Token::RParen)?;
            if !function.arity().contains(&args.len()) {
                return Err(syntax(
                    format!("{} does not take {} argument(s)", function.name(), args.len()),
                    offset,
                ));
            }
            return Ok(Expr::Call { function, args });
        }
        if let Some((_, parameter)) = self
            .scopes
            .iter()
            .rev()
            .find(|(shown, _)| shown.eq_ignore_ascii_case(&word))
        {
            return Ok(Expr::Parameter(parameter.clone()));
        }
        match word.to_ascii_lowercase().as_str() {
            "this" => Ok(Expr::Parameter(self.root.clone())),
            "null" => Ok(Expr::Constant(Literal::Null)),
            "true" => Ok(Expr::Constant(Literal::Bool(true))),
            "false" => Ok(Expr::Constant(Literal::Bool(false))),
            lower if RESERVED.contains(&lower) => {
                Err(syntax(format!("unexpected keyword '{word}'"), offset))
            }
            _ => Ok(Expr::Parameter(self.root.clone()).member(word)),
        }
    }
}
