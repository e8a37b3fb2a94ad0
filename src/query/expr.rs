//! Expression trees for predicates, keys and projections.
//!
//! Expressions are built either with the fluent helpers on [`Expr`] together with
//! [`lambda`], or by parsing the textual grammar (see [`crate::query::parse`]).
//! Equality is alpha-equivalence: lambdas that differ only in parameter names
//! compare equal.

use std::collections::BTreeSet;

use time::OffsetDateTime;

/// Constant operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    /// `null`.
    Null,
    /// `true` / `false`.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Real number.
    Float(f64),
    /// String.
    String(String),
    /// Timestamp.
    DateTime(OffsetDateTime),
}

/// Prefix operators.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    /// Boolean negation.
    Not,
    /// Arithmetic negation.
    Negate,
}

/// Infix operators.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BinaryOp {
    /// `eq`
    Eq,
    /// `ne`
    Ne,
    /// `lt`
    Lt,
    /// `le`
    Le,
    /// `gt`
    Gt,
    /// `ge`
    Ge,
    /// `and`
    And,
    /// `or`
    Or,
    /// `add`
    Add,
    /// `sub`
    Sub,
    /// `mul`
    Mul,
    /// `div`
    Div,
    /// `mod`
    Mod,
}

impl BinaryOp {
    /// Keyword used by the textual grammar.
    pub fn keyword(self) -> &'static str {
        match self {
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
        }
    }

    /// Parses a keyword (case-insensitive).
    pub fn from_keyword(word: &str) -> Option<BinaryOp> {
        let op = match word.to_ascii_lowercase().as_str() {
            "eq" => BinaryOp::Eq,
            "ne" => BinaryOp::Ne,
            "lt" => BinaryOp::Lt,
            "le" => BinaryOp::Le,
            "gt" => BinaryOp::Gt,
            "ge" => BinaryOp::Ge,
            "and" => BinaryOp::And,
            "or" => BinaryOp::Or,
            "add" => BinaryOp::Add,
            "sub" => BinaryOp::Sub,
            "mul" => BinaryOp::Mul,
            "div" => BinaryOp::Div,
            "mod" => BinaryOp::Mod,
            _ => return None,
        };
        Some(op)
    }

    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
        }
    }
}

/// Prefix-form scalar functions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Function {
    /// `startswith(s, prefix)`
    StartsWith,
    /// `endswith(s, suffix)`
    EndsWith,
    /// `contains(s, needle)`
    Contains,
    /// `toupper(s)`
    ToUpper,
    /// `tolower(s)`
    ToLower,
    /// `length(s)`
    Length,
    /// `substring(s, start[, length])`
    Substring,
    /// `trim(s)`
    Trim,
    /// `indexof(s, needle)`
    IndexOf,
}

impl Function {
    /// Name used by the textual grammar.
    pub fn name(self) -> &'static str {
        match self {
            Function::StartsWith => "startswith",
            Function::EndsWith => "endswith",
            Function::Contains => "contains",
            Function::ToUpper => "toupper",
            Function::ToLower => "tolower",
            Function::Length => "length",
            Function::Substring => "substring",
            Function::Trim => "trim",
            Function::IndexOf => "indexof",
        }
    }

    /// Parses a function name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Function> {
        let f = match name.to_ascii_lowercase().as_str() {
            "startswith" => Function::StartsWith,
            "endswith" => Function::EndsWith,
            "contains" => Function::Contains,
            "toupper" => Function::ToUpper,
            "tolower" => Function::ToLower,
            "length" => Function::Length,
            "substring" => Function::Substring,
            "trim" => Function::Trim,
            "indexof" => Function::IndexOf,
            _ => return None,
        };
        Some(f)
    }

    /// Accepted argument counts.
    pub fn arity(self) -> std::ops::RangeInclusive<usize> {
        match self {
            Function::ToUpper | Function::ToLower | Function::Length | Function::Trim => 1..=1,
            Function::Substring => 2..=3,
            _ => 2..=2,
        }
    }
}

/// Collection and group methods written in postfix form (`Hats.any(x:...)`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Method {
    /// Any element (matching).
    Any,
    /// All elements match.
    All,
    /// Number of elements (matching).
    Count,
    /// Sum of elements or of a selector.
    Sum,
    /// Smallest element or selector value.
    Min,
    /// Largest element or selector value.
    Max,
}

impl Method {
    /// Name used by the textual grammar.
    pub fn name(self) -> &'static str {
        match self {
            Method::Any => "any",
            Method::All => "all",
            Method::Count => "count",
            Method::Sum => "sum",
            Method::Min => "min",
            Method::Max => "max",
        }
    }

    /// Parses a method name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Method> {
        let m = match name.to_ascii_lowercase().as_str() {
            "any" => Method::Any,
            "all" => Method::All,
            "count" => Method::Count,
            "sum" => Method::Sum,
            "min" => Method::Min,
            "max" => Method::Max,
            _ => return None,
        };
        Some(m)
    }
}

/// Expression node.
#[derive(Clone, Debug)]
pub enum Expr {
    /// Lambda parameter reference.
    Parameter(String),
    /// Constant.
    Constant(Literal),
    /// Property access.
    Member {
        /// Object being accessed.
        target: Box<Expr>,
        /// Property name.
        name: String,
    },
    /// Prefix operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Infix operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Scalar function call.
    Call {
        /// Function.
        function: Function,
        /// Arguments; the subject string comes first.
        args: Vec<Expr>,
    },
    /// Collection or group method.
    Method {
        /// Collection being aggregated.
        target: Box<Expr>,
        /// Method.
        method: Method,
        /// Predicate or selector applied to each element.
        lambda: Option<Box<Lambda>>,
    },
    /// Anonymous projection with named fields.
    New(Vec<(String, Expr)>),
}

/// Single-parameter function.
#[derive(Clone, Debug)]
pub struct Lambda {
    /// Parameter name.
    pub parameter: String,
    /// Body.
    pub body: Expr,
}

/// First parameter name of the form `_pN` for which `taken` is false.
pub fn fresh_parameter(taken: impl Fn(&str) -> bool) -> String {
    let mut n = 0usize;
    loop {
        let candidate = format!("_p{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Builds a lambda whose parameter name does not clash with any name used in
/// its body.
pub fn lambda(body: impl FnOnce(Expr) -> Expr) -> Lambda {
    // The anchor stays allocated while `body` runs, so builders nested inside
    // it get different placeholders.
    let anchor = Box::new(0u8);
    let placeholder = format!("_build{:p}", &*anchor);
    let body = body(Expr::Parameter(placeholder.clone()));
    let parameter = fresh_parameter(|name| body.uses_name(name));
    Lambda {
        body: body.substitute(&placeholder, &Expr::Parameter(parameter.clone())),
        parameter,
    }
}

/// Shorthand for a constant expression.
pub fn lit(value: impl Into<Literal>) -> Expr {
    Expr::Constant(value.into())
}

impl Lambda {
    /// Lambda with an explicit parameter name.
    pub fn new(parameter: impl Into<String>, body: Expr) -> Self {
        Self {
            parameter: parameter.into(),
            body,
        }
    }

    /// Identity function.
    pub fn identity() -> Self {
        lambda(|x| x)
    }

    /// Applies the lambda to `argument`: substitutes it for the parameter and
    /// simplifies.
    pub fn apply(&self, argument: &Expr) -> Expr {
        self.body.substitute(&self.parameter, argument).simplify()
    }

    /// `self ∘ inner`: a lambda over `inner`'s parameter computing `self(inner(x))`.
    pub fn compose(&self, inner: &Lambda) -> Lambda {
        Lambda {
            parameter: inner.parameter.clone(),
            body: self.apply(&inner.body),
        }
    }

    /// Conjunction of two predicates over the same element.
    pub fn and_also(&self, other: &Lambda) -> Lambda {
        let right = other.apply(&Expr::Parameter(self.parameter.clone()));
        Lambda {
            parameter: self.parameter.clone(),
            body: self.body.clone().and(right),
        }
    }

    /// Dotted member path when the body is a chain of member accesses on the
    /// parameter (`x.Farm.Critters` → `Farm.Critters`).
    pub fn member_path(&self) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = &self.body;
        loop {
            match current {
                Expr::Member { target, name } => {
                    segments.push(name.as_str());
                    current = target;
                }
                Expr::Parameter(p) if *p == self.parameter && !segments.is_empty() => break,
                _ => return None,
            }
        }
        segments.reverse();
        Some(segments.join("."))
    }

    /// Builds `x => x.A.B` from `A.B`.
    pub fn from_member_path(path: &str) -> Lambda {
        lambda(|x| path.split('.').fold(x, Expr::member))
    }
}

impl PartialEq for Lambda {
    fn eq(&self, other: &Self) -> bool {
        let mut env = vec![(self.parameter.as_str(), other.parameter.as_str())];
        alpha_eq(&self.body, &other.body, &mut env)
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        alpha_eq(self, other, &mut Vec::new())
    }
}

fn alpha_eq<'a>(a: &'a Expr, b: &'a Expr, env: &mut Vec<(&'a str, &'a str)>) -> bool {
    match (a, b) {
        (Expr::Parameter(x), Expr::Parameter(y)) => {
            let bound_x = env.iter().rev().find(|(l, _)| *l == x.as_str());
            let bound_y = env.iter().rev().find(|(_, r)| *r == y.as_str());
            match (bound_x, bound_y) {
                (Some(px), Some(py)) => std::ptr::eq(px, py),
                (None, None) => x == y,
                _ => false,
            }
        }
        (Expr::Constant(x), Expr::Constant(y)) => x == y,
        (Expr::Member { target: t1, name: n1 }, Expr::Member { target: t2, name: n2 }) => {
            n1 == n2 && alpha_eq(t1, t2, env)
        }
        (
            Expr::Unary { op: o1, operand: e1 },
            Expr::Unary { op: o2, operand: e2 },
        ) => o1 == o2 && alpha_eq(e1, e2, env),
        (
            Expr::Binary { op: o1, left: l1, right: r1 },
            Expr::Binary { op: o2, left: l2, right: r2 },
        ) => o1 == o2 && alpha_eq(l1, l2, env) && alpha_eq(r1, r2, env),
        (Expr::Call { function: f1, args: a1 }, Expr::Call { function: f2, args: a2 }) => {
            f1 == f2 && a1.len() == a2.len() && a1.iter().zip(a2).all(|(x, y)| alpha_eq(x, y, env))
        }
        (
            Expr::Method { target: t1, method: m1, lambda: l1 },
            Expr::Method { target: t2, method: m2, lambda: l2 },
        ) => {
            if m1 != m2 || !alpha_eq(t1, t2, env) {
                return false;
            }
            match (l1, l2) {
                (None, None) => true,
                (Some(l1), Some(l2)) => {
                    env.push((l1.parameter.as_str(), l2.parameter.as_str()));
                    let equal = alpha_eq(&l1.body, &l2.body, env);
                    env.pop();
                    equal
                }
                _ => false,
            }
        }
        (Expr::New(f1), Expr::New(f2)) => {
            f1.len() == f2.len()
                && f1
                    .iter()
                    .zip(f2)
                    .all(|((n1, e1), (n2, e2))| n1 == n2 && alpha_eq(e1, e2, env))
        }
        _ => false,
    }
}

impl Expr {
    /// Parameter reference.
    pub fn param(name: impl Into<String>) -> Expr {
        Expr::Parameter(name.into())
    }

    /// `self.name`
    pub fn member(self, name: impl Into<String>) -> Expr {
        Expr::Member {
            target: Box::new(self),
            name: name.into(),
        }
    }

    fn binary(self, op: BinaryOp, right: impl Into<Expr>) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right.into()),
        }
    }

    /// `self eq other`
    pub fn equals(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    /// `self ne other`
    pub fn not_equals(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ne, other)
    }

    /// `self lt other`
    pub fn less_than(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    /// `self le other`
    pub fn at_most(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Le, other)
    }

    /// `self gt other`
    pub fn greater_than(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    /// `self ge other`
    pub fn at_least(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ge, other)
    }

    /// `self and other`
    pub fn and(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    /// `self or other`
    pub fn or(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    /// `self add other`
    pub fn plus(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Add, other)
    }

    /// `self sub other`
    pub fn minus(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Sub, other)
    }

    /// `self mul other`
    pub fn times(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Mul, other)
    }

    /// `self div other`
    pub fn divided_by(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Div, other)
    }

    /// `self mod other`
    pub fn modulo(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Mod, other)
    }

    /// `not self`
    pub fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    /// `-self`
    pub fn negate(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(self),
        }
    }

    fn call(self, function: Function, rest: Vec<Expr>) -> Expr {
        let mut args = Vec::with_capacity(rest.len() + 1);
        args.push(self);
        args.extend(rest);
        Expr::Call { function, args }
    }

    /// `startswith(self, prefix)`
    pub fn starts_with(self, prefix: impl Into<Expr>) -> Expr {
        self.call(Function::StartsWith, vec![prefix.into()])
    }

    /// `endswith(self, suffix)`
    pub fn ends_with(self, suffix: impl Into<Expr>) -> Expr {
        self.call(Function::EndsWith, vec![suffix.into()])
    }

    /// `contains(self, needle)`
    pub fn contains(self, needle: impl Into<Expr>) -> Expr {
        self.call(Function::Contains, vec![needle.into()])
    }

    /// `toupper(self)`
    pub fn to_upper(self) -> Expr {
        self.call(Function::ToUpper, Vec::new())
    }

    /// `tolower(self)`
    pub fn to_lower(self) -> Expr {
        self.call(Function::ToLower, Vec::new())
    }

    /// `length(self)`
    pub fn length(self) -> Expr {
        self.call(Function::Length, Vec::new())
    }

    /// `trim(self)`
    pub fn trim(self) -> Expr {
        self.call(Function::Trim, Vec::new())
    }

    /// `substring(self, start[, length])`
    pub fn substring(self, start: impl Into<Expr>, length: Option<Expr>) -> Expr {
        let mut rest = vec![start.into()];
        rest.extend(length);
        self.call(Function::Substring, rest)
    }

    /// `indexof(self, needle)`
    pub fn index_of(self, needle: impl Into<Expr>) -> Expr {
        self.call(Function::IndexOf, vec![needle.into()])
    }

    fn method(self, method: Method, lambda: Option<Lambda>) -> Expr {
        Expr::Method {
            target: Box::new(self),
            method,
            lambda: lambda.map(Box::new),
        }
    }

    /// `self.any(x: predicate(x))`
    pub fn any(self, predicate: impl FnOnce(Expr) -> Expr) -> Expr {
        self.method(Method::Any, Some(lambda(predicate)))
    }

    /// `self.any()`
    pub fn non_empty(self) -> Expr {
        self.method(Method::Any, None)
    }

    /// `self.all(x: predicate(x))`
    pub fn all(self, predicate: impl FnOnce(Expr) -> Expr) -> Expr {
        self.method(Method::All, Some(lambda(predicate)))
    }

    /// `self.count()`
    pub fn count(self) -> Expr {
        self.method(Method::Count, None)
    }

    /// `self.count(x: predicate(x))`
    pub fn count_where(self, predicate: impl FnOnce(Expr) -> Expr) -> Expr {
        self.method(Method::Count, Some(lambda(predicate)))
    }

    /// `self.sum(x: selector(x))`
    pub fn sum(self, selector: impl FnOnce(Expr) -> Expr) -> Expr {
        self.method(Method::Sum, Some(lambda(selector)))
    }

    /// `self.min(x: selector(x))`
    pub fn min(self, selector: impl FnOnce(Expr) -> Expr) -> Expr {
        self.method(Method::Min, Some(lambda(selector)))
    }

    /// `self.max(x: selector(x))`
    pub fn max(self, selector: impl FnOnce(Expr) -> Expr) -> Expr {
        self.method(Method::Max, Some(lambda(selector)))
    }

    /// Anonymous projection.
    pub fn new_object<I, S>(fields: I) -> Expr
    where
        I: IntoIterator<Item = (S, Expr)>,
        S: Into<String>,
    {
        Expr::New(fields.into_iter().map(|(n, e)| (n.into(), e)).collect())
    }

    /// Returns `true` when `name` occurs anywhere, free or as a lambda parameter.
    pub fn uses_name(&self, name: &str) -> bool {
        match self {
            Expr::Parameter(p) => p == name,
            Expr::Constant(_) => false,
            Expr::Member { target, .. } => target.uses_name(name),
            Expr::Unary { operand, .. } => operand.uses_name(name),
            Expr::Binary { left, right, .. } => left.uses_name(name) || right.uses_name(name),
            Expr::Call { args, .. } => args.iter().any(|a| a.uses_name(name)),
            Expr::Method { target, lambda, .. } => {
                target.uses_name(name)
                    || lambda
                        .as_ref()
                        .is_some_and(|l| l.parameter == name || l.body.uses_name(name))
            }
            Expr::New(fields) => fields.iter().any(|(_, e)| e.uses_name(name)),
        }
    }

    /// Returns `true` when `name` occurs free in the expression.
    pub fn has_free(&self, name: &str) -> bool {
        match self {
            Expr::Parameter(p) => p == name,
            Expr::Constant(_) => false,
            Expr::Member { target, .. } => target.has_free(name),
            Expr::Unary { operand, .. } => operand.has_free(name),
            Expr::Binary { left, right, .. } => left.has_free(name) || right.has_free(name),
            Expr::Call { args, .. } => args.iter().any(|a| a.has_free(name)),
            Expr::Method { target, lambda, .. } => {
                target.has_free(name)
                    || lambda
                        .as_ref()
                        .is_some_and(|l| l.parameter != name && l.body.has_free(name))
            }
            Expr::New(fields) => fields.iter().any(|(_, e)| e.has_free(name)),
        }
    }

    /// Free parameter names.
    pub fn free_parameters(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_free(&mut Vec::new(), &mut out);
        out
    }

    fn collect_free(&self, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
        match self {
            Expr::Parameter(p) => {
                if !bound.contains(p) {
                    out.insert(p.clone());
                }
            }
            Expr::Constant(_) => {}
            Expr::Member { target, .. } => target.collect_free(bound, out),
            Expr::Unary { operand, .. } => operand.collect_free(bound, out),
            Expr::Binary { left, right, .. } => {
                left.collect_free(bound, out);
                right.collect_free(bound, out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_free(bound, out)),
            Expr::Method { target, lambda, .. } => {
                target.collect_free(bound, out);
                if let Some(l) = lambda {
                    bound.push(l.parameter.clone());
                    l.body.collect_free(bound, out);
                    bound.pop();
                }
            }
            Expr::New(fields) => fields.iter().for_each(|(_, e)| e.collect_free(bound, out)),
        }
    }

    /// Capture-avoiding substitution of `replacement` for free occurrences of `name`.
    pub fn substitute(&self, name: &str, replacement: &Expr) -> Expr {
        match self {
            Expr::Parameter(p) if p == name => replacement.clone(),
            Expr::Parameter(_) | Expr::Constant(_) => self.clone(),
            Expr::Member { target, name: member } => Expr::Member {
                target: Box::new(target.substitute(name, replacement)),
                name: member.clone(),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: Box::new(operand.substitute(name, replacement)),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: Box::new(left.substitute(name, replacement)),
                right: Box::new(right.substitute(name, replacement)),
            },
            Expr::Call { function, args } => Expr::Call {
                function: *function,
                args: args.iter().map(|a| a.substitute(name, replacement)).collect(),
            },
            Expr::Method {
                target,
                method,
                lambda,
            } => {
                let lambda = lambda.as_ref().map(|l| {
                    if l.parameter == name {
                        return l.clone();
                    }
                    if replacement.has_free(&l.parameter) {
                        let renamed = fresh_parameter(|n| {
                            n == name || replacement.uses_name(n) || l.body.uses_name(n)
                        });
                        let body = l.body.substitute(&l.parameter, &Expr::Parameter(renamed.clone()));
                        return Box::new(Lambda {
                            parameter: renamed,
                            body: body.substitute(name, replacement),
                        });
                    }
                    Box::new(Lambda {
                        parameter: l.parameter.clone(),
                        body: l.body.substitute(name, replacement),
                    })
                });
                Expr::Method {
                    target: Box::new(target.substitute(name, replacement)),
                    method: *method,
                    lambda,
                }
            }
            Expr::New(fields) => Expr::New(
                fields
                    .iter()
                    .map(|(n, e)| (n.clone(), e.substitute(name, replacement)))
                    .collect(),
            ),
        }
    }

    /// Folds member accesses on anonymous projections (`new { A = e }.A` → `e`).
    pub fn simplify(self) -> Expr {
        match self {
            Expr::Member { target, name } => match target.simplify() {
                Expr::New(mut fields) => {
                    match fields.iter().position(|(n, _)| n.eq_ignore_ascii_case(&name)) {
                        Some(idx) => fields.swap_remove(idx).1,
                        None => Expr::Member {
                            target: Box::new(Expr::New(fields)),
                            name,
                        },
                    }
                }
                target => Expr::Member {
                    target: Box::new(target),
                    name,
                },
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: Box::new(operand.simplify()),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(left.simplify()),
                right: Box::new(right.simplify()),
            },
            Expr::Call { function, args } => Expr::Call {
                function,
                args: args.into_iter().map(Expr::simplify).collect(),
            },
            Expr::Method {
                target,
                method,
                lambda,
            } => Expr::Method {
                target: Box::new(target.simplify()),
                method,
                lambda: lambda.map(|l| {
                    Box::new(Lambda {
                        parameter: l.parameter,
                        body: l.body.simplify(),
                    })
                }),
            },
            Expr::New(fields) => {
                Expr::New(fields.into_iter().map(|(n, e)| (n, e.simplify())).collect())
            }
            other => other,
        }
    }
}

impl From<Literal> for Expr {
    fn from(value: Literal) -> Self {
        Expr::Constant(value)
    }
}

macro_rules! literal_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Literal {
                fn from(value: $ty) -> Self {
                    Literal::$variant(value.into())
                }
            }

            impl From<$ty> for Expr {
                fn from(value: $ty) -> Self {
                    Expr::Constant(Literal::from(value))
                }
            }
        )*
    };
}

literal_from!(
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f64 => Float,
    &str => String,
    String => String,
    OffsetDateTime => DateTime,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lambdas_compare_up_to_parameter_names() {
        let a = Lambda::new("a", Expr::param("a").member("Id").equals(5));
        let b = Lambda::new("b", Expr::param("b").member("Id").equals(5));
        assert_eq!(a, b);
        let c = Lambda::new("c", Expr::param("other").member("Id").equals(5));
        assert_ne!(a, c);
    }

    #[test]
    fn nested_lambdas_compare_with_bindings() {
        let a = lambda(|x| x.clone().member("Weapons").any(|w| w.member("Owner").equals(x)));
        let b = lambda(|y| y.clone().member("Weapons").any(|v| v.member("Owner").equals(y)));
        assert_eq!(a, b);
    }

    #[test]
    fn builder_names_avoid_names_in_the_body() {
        let simple = lambda(|c| c.member("Id").equals(5));
        assert_eq!(simple.parameter, "_p0");
        assert_eq!(lambda(|c| c.member("Id").equals(5)).parameter, "_p0");

        let nested = lambda(|c| c.clone().member("Weapons").any(|w| w.member("Owner").equals(c)));
        assert_eq!(nested.parameter, "_p1");
        let Expr::Method { lambda: Some(inner), .. } = &nested.body else {
            panic!("expected a method call, got {:?}", nested.body);
        };
        assert_eq!(inner.parameter, "_p0");
        assert!(inner.body.has_free("_p1"));
    }

    #[test]
    fn substitution_renames_to_avoid_capture() {
        // x => x.Weapons.any(_p0: _p0.Owner eq x), with `_p0` substituted for x.
        let inner = Lambda::new("_p0", Expr::param("_p0").member("Owner").equals(Expr::param("x")));
        let body = Expr::Method {
            target: Box::new(Expr::param("x").member("Weapons")),
            method: Method::Any,
            lambda: Some(Box::new(inner)),
        };
        let replaced = body.substitute("x", &Expr::param("_p0"));
        let Expr::Method { lambda: Some(inner), .. } = &replaced else {
            panic!("expected a method call");
        };
        assert_ne!(inner.parameter, "_p0");
        assert!(inner.body.has_free("_p0"));
        assert!(inner.body.has_free(&inner.parameter));
    }

    #[test]
    fn composition_folds_anonymous_projections() {
        let select = lambda(|c| {
            Expr::new_object([("N", c.clone().member("Name")), ("W", c.member("Weight"))])
        });
        let predicate = lambda(|r| r.member("N").equals("Bob"));
        let rebased = predicate.compose(&select);
        let expected = lambda(|c| c.member("Name").equals("Bob"));
        assert_eq!(rebased, expected);
    }

    #[test]
    fn substitution_avoids_capture() {
        // (y => x.Hats.any(x => x eq y))[y := x] must not capture the outer x.
        let body = Expr::param("y")
            .member("Hats")
            .method(Method::Any, Some(Lambda::new("x", Expr::param("x").equals(Expr::param("y")))));
        let out = body.substitute("y", &Expr::param("x"));
        assert!(out.has_free("x"));
        let Expr::Method { lambda: Some(inner), .. } = &out else {
            panic!("expected method");
        };
        assert_ne!(inner.parameter, "x");
    }

    #[test]
    fn member_paths() {
        let l = lambda(|x| x.member("Farm").member("Critters"));
        assert_eq!(l.member_path().as_deref(), Some("Farm.Critters"));
        assert_eq!(Lambda::from_member_path("Farm.Critters"), l);
        assert_eq!(Lambda::identity().member_path(), None);
    }
}
