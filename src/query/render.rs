//! Textual form of expressions, as used in `$filter`, `$orderby`, `$groupby`
//! and `$select`.
//!
//! Members of the root parameter are written bare (`Farm.Name`); the root itself
//! is `this`. Parameters of nested lambdas are renamed by depth to `x`, `y`, `z`,
//! `w`, `v`, `u` and then `p6`, `p7`, and so on.

use std::fmt::Write as _;

use time::format_description::well_known::Rfc3339;

use crate::error::{MappingError, Result};
use crate::query::expr::{Expr, Lambda, Literal, UnaryOp};

const NESTED_NAMES: [&str; 6] = ["x", "y", "z", "w", "v", "u"];

/// Words with a fixed meaning in the grammar; root members spelled like one are
/// written as `this.<name>`.
pub(crate) const RESERVED: [&str; 20] = [
    "this", "null", "true", "false", "datetime", "not", "as", "eq", "ne", "lt", "le", "gt",
    "ge", "and", "or", "add", "sub", "mul", "div", "mod",
];

/// Renders a lambda body relative to its parameter.
pub fn render_lambda(lambda: &Lambda) -> Result<String> {
    let mut renderer = Renderer::new(&lambda.parameter);
    renderer.expr(&lambda.body)?;
    Ok(renderer.out)
}

/// Renders a projection: `expr as Alias, ...` for anonymous projections, a plain
/// expression otherwise.
pub fn render_selection(lambda: &Lambda) -> Result<String> {
    let Expr::New(fields) = &lambda.body else {
        return render_lambda(lambda);
    };
    if fields.is_empty() {
        return Err(MappingError::not_supported("empty projection"));
    }
    let mut renderer = Renderer::new(&lambda.parameter);
    for (idx, (alias, value)) in fields.iter().enumerate() {
        if !is_identifier(alias) {
            return Err(MappingError::not_supported(format!(
                "projection alias '{alias}' is not an identifier"
            )));
        }
        if idx > 0 {
            renderer.out.push_str(", ");
        }
        renderer.expr(value)?;
        let _ = write!(renderer.out, " as {alias}");
    }
    Ok(renderer.out)
}

/// Renders a literal.
pub fn render_literal(literal: &Literal) -> Result<String> {
    let mut out = String::new();
    write_literal(&mut out, literal)?;
    Ok(out)
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn is_reserved(name: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}

struct Renderer<'a> {
    root: &'a str,
    scopes: Vec<(&'a str, String)>,
    out: String,
}

impl<'a> Renderer<'a> {
    fn new(root: &'a str) -> Self {
        Self {
            root,
            scopes: Vec::new(),
            out: String::new(),
        }
    }

    fn bound(&self, parameter: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find(|(p, _)| *p == parameter)
            .map(|(_, shown)| shown.as_str())
    }

    fn shadows(&self, member: &str) -> bool {
        is_reserved(member)
            || self
                .scopes
                .iter()
                .any(|(_, shown)| shown.eq_ignore_ascii_case(member))
    }

    fn expr(&mut self, expr: &'a Expr) -> Result<()> {
        match expr {
            Expr::Parameter(p) => self.parameter(p),
            Expr::Constant(literal) => write_literal(&mut self.out, literal),
            Expr::Member { target, name } => {
                if !is_identifier(name) {
                    return Err(MappingError::not_supported(format!(
                        "member name '{name}' cannot be written in a query"
                    )));
                }
                match target.as_ref() {
                    Expr::Parameter(p) if p == self.root && self.bound(p).is_none() => {
                        if self.shadows(name) {
                            self.out.push_str("this.");
                        }
                    }
                    other => {
                        self.operand(other)?;
                        self.out.push('.');
                    }
                }
                self.out.push_str(name);
                Ok(())
            }
            Expr::Unary { op, operand } => {
                self.out.push_str(match op {
                    UnaryOp::Not => "not ",
                    UnaryOp::Negate => "-",
                });
                let wrap = match op {
                    UnaryOp::Not => matches!(operand.as_ref(), Expr::Binary { .. }),
                    UnaryOp::Negate => {
                        matches!(operand.as_ref(), Expr::Binary { .. } | Expr::Constant(_))
                    }
                };
                self.wrapped(operand, wrap)
            }
            Expr::Binary { op, left, right } => {
                let prec = op.precedence();
                let left_wrap = binary_precedence(left).is_some_and(|p| p < prec);
                let right_wrap = binary_precedence(right).is_some_and(|p| p <= prec);
                self.wrapped(left, left_wrap)?;
                let _ = write!(self.out, " {} ", op.keyword());
                self.wrapped(right, right_wrap)
            }
            Expr::Call { function, args } => {
                if !function.arity().contains(&args.len()) {
                    return Err(MappingError::not_supported(format!(
                        "{} takes {:?} argument(s), got {}",
                        function.name(),
                        function.arity(),
                        args.len()
                    )));
                }
                self.out.push_str(function.name());
                self.out.push('(');
                for (idx, arg) in args.iter().enumerate() {
                    if idx > 0 {
                        self.out.push(',');
                    }
                    self.expr(arg)?;
                }
                self.out.push(')');
                Ok(())
            }
            Expr::Method {
                target,
                method,
                lambda,
            } => {
                self.operand(target)?;
                let _ = write!(self.out, ".{}(", method.name());
                if let Some(lambda) = lambda {
                    let depth = self.scopes.len();
                    let shown = NESTED_NAMES
                        .get(depth)
                        .map_or_else(|| format!("p{depth}"), |n| (*n).to_owned());
                    let _ = write!(self.out, "{shown}:");
                    self.scopes.push((&lambda.parameter, shown));
                    let result = self.expr(&lambda.body);
                    self.scopes.pop();
                    result?;
                }
                self.out.push(')');
                Ok(())
            }
            Expr::New(_) => Err(MappingError::not_supported(
                "anonymous projections are only supported at the top of $select",
            )),
        }
    }

    fn parameter(&mut self, name: &str) -> Result<()> {
        if let Some(shown) = self.bound(name) {
            let shown = shown.to_owned();
            self.out.push_str(&shown);
            return Ok(());
        }
        if name == self.root {
            self.out.push_str("this");
            return Ok(());
        }
        Err(MappingError::not_supported(format!(
            "parameter '{name}' is not bound in this expression"
        )))
    }

    /// Target of a member access or method call.
    fn operand(&mut self, expr: &'a Expr) -> Result<()> {
        let wrap = matches!(expr, Expr::Binary { .. } | Expr::Unary { .. });
        self.wrapped(expr, wrap)
    }

    fn wrapped(&mut self, expr: &'a Expr, wrap: bool) -> Result<()> {
        if wrap {
            self.out.push('(');
            self.expr(expr)?;
            self.out.push(')');
            Ok(())
        } else {
            self.expr(expr)
        }
    }
}

fn binary_precedence(expr: &Expr) -> Option<u8> {
    match expr {
        Expr::Binary { op, .. } => Some(op.precedence()),
        _ => None,
    }
}

fn write_literal(out: &mut String, literal: &Literal) -> Result<()> {
    match literal {
        Literal::Null => out.push_str("null"),
        Literal::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Literal::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Literal::Float(f) if f.is_finite() => {
            let text = f.to_string();
            out.push_str(&text);
            if !text.contains('.') {
                out.push_str(".0");
            }
        }
        Literal::Float(_) => out.push_str("null"),
        Literal::String(s) => {
            out.push('\'');
            out.push_str(&s.replace('\'', "''"));
            out.push('\'');
        }
        Literal::DateTime(dt) => {
            let text = dt
                .format(&Rfc3339)
                .map_err(|err| MappingError::not_supported(format!("timestamp {dt}: {err}")))?;
            let _ = write!(out, "datetime'{text}'");
        }
    }
    Ok(())
}

/// Renders an expression whose free parameter is `root`; convenience for
/// diagnostics.
pub fn render_expr(root: &str, expr: &Expr) -> Result<String> {
    render_lambda(&Lambda::new(root, expr.clone()))
}
