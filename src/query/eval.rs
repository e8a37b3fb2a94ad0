//! Compilation and evaluation of expressions over the dynamic object model.
//!
//! [`Compiler`] checks member accesses against the type graph once per query,
//! replacing spellings with canonical property names; [`Evaluator`] then runs the
//! compiled lambda per element through the property descriptor table. Member
//! access on `null` yields `null`, comparisons involving `null` are false except
//! equality, and arithmetic faults surface as [`MappingError::InvalidQuery`].

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{MappingError, Result};
use crate::model::{RefState, Value};
use crate::query::expr::{BinaryOp, Expr, Function, Lambda, Literal, Method, UnaryOp};
use crate::types::{MappedTypeId, TypeGraph, TypeKind};

/// Static type of a sub-expression, as far as the compiler tracks it.
#[derive(Clone, Debug, PartialEq)]
pub enum StaticType {
    /// A mapped type.
    Mapped(MappedTypeId),
    /// A `$groupby` bucket.
    Group {
        /// Type of `Key`.
        key: Box<StaticType>,
        /// Type of the grouped elements.
        element: MappedTypeId,
    },
    /// Not tracked; members are looked up at run time.
    Unknown,
}

/// Type-checks lambdas against the graph.
pub struct Compiler<'g> {
    graph: &'g TypeGraph,
}

impl<'g> Compiler<'g> {
    /// Compiler over `graph`.
    pub fn new(graph: &'g TypeGraph) -> Self {
        Self { graph }
    }

    /// Compiles `lambda` for arguments of type `input`, returning the
    /// canonicalized lambda and the type of its body.
    pub fn compile(&self, lambda: &Lambda, input: StaticType) -> Result<(Lambda, StaticType)> {
        let mut scope = vec![(lambda.parameter.clone(), input)];
        let (body, ty) = self.expr(&lambda.body, &mut scope)?;
        Ok((Lambda::new(lambda.parameter.clone(), body), ty))
    }

    fn expr(&self, expr: &Expr, scope: &mut Vec<(String, StaticType)>) -> Result<(Expr, StaticType)> {
        match expr {
            Expr::Parameter(p) => {
                let ty = scope
                    .iter()
                    .rev()
                    .find(|(name, _)| name == p)
                    .map(|(_, ty)| ty.clone())
                    .ok_or_else(|| MappingError::filter(format!("unbound parameter '{p}'")))?;
                Ok((expr.clone(), ty))
            }
            Expr::Constant(_) => Ok((expr.clone(), StaticType::Unknown)),
            Expr::Member { target, name } => {
                let (target, target_ty) = self.expr(target, scope)?;
                let (name, ty) = self.member(&target_ty, name)?;
                Ok((target.member(name), ty))
            }
            Expr::Unary { op, operand } => {
                let (operand, _) = self.expr(operand, scope)?;
                Ok((
                    Expr::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    StaticType::Unknown,
                ))
            }
            Expr::Binary { op, left, right } => {
                let (left, _) = self.expr(left, scope)?;
                let (right, _) = self.expr(right, scope)?;
                Ok((
                    Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    StaticType::Unknown,
                ))
            }
            Expr::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|a| self.expr(a, scope).map(|(e, _)| e))
                    .collect::<Result<Vec<_>>>()?;
                Ok((
                    Expr::Call {
                        function: *function,
                        args,
                    },
                    StaticType::Unknown,
                ))
            }
            Expr::Method {
                target,
                method,
                lambda,
            } => {
                let (target, target_ty) = self.expr(target, scope)?;
                let element = self.element_of(&target_ty, *method)?;
                let lambda = match lambda {
                    Some(l) => {
                        scope.push((l.parameter.clone(), element.clone()));
                        let body = self.expr(&l.body, scope);
                        scope.pop();
                        Some(Box::new(Lambda::new(l.parameter.clone(), body?.0)))
                    }
                    None => None,
                };
                let ty = match method {
                    Method::Min | Method::Max if lambda.is_none() => element,
                    _ => StaticType::Unknown,
                };
                Ok((
                    Expr::Method {
                        target: Box::new(target),
                        method: *method,
                        lambda,
                    },
                    ty,
                ))
            }
            Expr::New(fields) => {
                let fields = fields
                    .iter()
                    .map(|(n, e)| self.expr(e, scope).map(|(e, _)| (n.clone(), e)))
                    .collect::<Result<Vec<_>>>()?;
                Ok((Expr::New(fields), StaticType::Unknown))
            }
        }
    }

    fn member(&self, target: &StaticType, name: &str) -> Result<(String, StaticType)> {
        match target {
            StaticType::Unknown => Ok((name.to_owned(), StaticType::Unknown)),
            StaticType::Group { key, .. } => {
                if name.eq_ignore_ascii_case("key") {
                    Ok(("Key".to_owned(), (**key).clone()))
                } else {
                    Err(MappingError::filter(format!(
                        "groups have no member '{name}' (only Key)"
                    )))
                }
            }
            StaticType::Mapped(id) => {
                let ty = self.graph.get(*id)?;
                if ty.is_any() || matches!(ty.kind, TypeKind::Dictionary { .. }) {
                    return Ok((name.to_owned(), StaticType::Unknown));
                }
                let prop = ty.property(name).ok_or_else(|| {
                    MappingError::filter(format!("'{}' has no member '{name}'", ty.name))
                })?;
                if !prop.is_readable() {
                    return Err(MappingError::filter(format!(
                        "member '{}.{}' is not readable",
                        ty.name, prop.name
                    )));
                }
                Ok((prop.name.clone(), StaticType::Mapped(prop.property_type)))
            }
        }
    }

    fn element_of(&self, target: &StaticType, method: Method) -> Result<StaticType> {
        match target {
            StaticType::Unknown => Ok(StaticType::Unknown),
            StaticType::Group { element, .. } => Ok(StaticType::Mapped(*element)),
            StaticType::Mapped(id) => {
                let ty = self.graph.get(*id)?;
                if ty.is_any() {
                    return Ok(StaticType::Unknown);
                }
                ty.element_type().map(StaticType::Mapped).ok_or_else(|| {
                    MappingError::filter(format!(
                        "{}() needs a collection, '{}' is not one",
                        method.name(),
                        ty.name
                    ))
                })
            }
        }
    }
}

/// Evaluates compiled lambdas.
pub struct Evaluator<'g> {
    graph: &'g TypeGraph,
}

impl<'g> Evaluator<'g> {
    /// Evaluator over `graph`.
    pub fn new(graph: &'g TypeGraph) -> Self {
        Self { graph }
    }

    /// Applies `lambda` to `argument`.
    pub fn apply(&self, lambda: &Lambda, argument: &Value) -> Result<Value> {
        let mut env = vec![(lambda.parameter.as_str(), argument.clone())];
        self.eval(&lambda.body, &mut env)
    }

    /// Applies a predicate; anything but `true` counts as a rejection.
    pub fn test(&self, lambda: &Lambda, argument: &Value) -> Result<bool> {
        Ok(matches!(self.apply(lambda, argument)?, Value::Bool(true)))
    }

    fn eval<'e>(&self, expr: &'e Expr, env: &mut Vec<(&'e str, Value)>) -> Result<Value> {
        match expr {
            Expr::Parameter(p) => env
                .iter()
                .rev()
                .find(|(name, _)| *name == p.as_str())
                .map(|(_, v)| v.clone())
                .ok_or_else(|| MappingError::invalid_query(format!("unbound parameter '{p}'"))),
            Expr::Constant(literal) => Ok(literal_value(literal)),
            Expr::Member { target, name } => {
                let target = self.eval(target, env)?;
                self.member(&target, name)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, env)?;
                unary(*op, value)
            }
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    if !truthy(&self.eval(left, env)?) {
                        return Ok(Value::Bool(false));
                    }
                    Ok(Value::Bool(truthy(&self.eval(right, env)?)))
                }
                BinaryOp::Or => {
                    if truthy(&self.eval(left, env)?) {
                        return Ok(Value::Bool(true));
                    }
                    Ok(Value::Bool(truthy(&self.eval(right, env)?)))
                }
                _ => {
                    let l = self.eval(left, env)?;
                    let r = self.eval(right, env)?;
                    binary(*op, &l, &r)
                }
            },
            Expr::Call { function, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a, env))
                    .collect::<Result<Vec<_>>>()?;
                call(*function, &values)
            }
            Expr::Method {
                target,
                method,
                lambda,
            } => {
                let items = match self.eval(target, env)? {
                    Value::List(items) => items,
                    Value::Group(group) => group.items,
                    Value::Null => Vec::new(),
                    other => {
                        return Err(MappingError::invalid_query(format!(
                            "{}() applied to {}",
                            method.name(),
                            other.kind_name()
                        )))
                    }
                };
                self.method(*method, lambda.as_deref(), &items, env)
            }
            Expr::New(fields) => {
                let mut row = BTreeMap::new();
                for (name, value) in fields {
                    row.insert(name.clone(), self.eval(value, env)?);
                }
                Ok(Value::Map(row))
            }
        }
    }

    fn member(&self, target: &Value, name: &str) -> Result<Value> {
        match target {
            Value::Null => Ok(Value::Null),
            Value::Object(entity) => {
                let ty = self.graph.get(entity.type_id())?;
                Ok(match ty.property(name) {
                    Some(prop) => prop.get_from(entity),
                    None => entity.get(name),
                })
            }
            Value::Map(row) => Ok(row
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map_or(Value::Null, |(_, v)| v.clone())),
            Value::Group(group) if name.eq_ignore_ascii_case("key") => Ok((*group.key).clone()),
            Value::Reference(reference) => match reference.state() {
                RefState::Resolved(value) => self.member(&value, name),
                _ => Err(MappingError::invalid_query(format!(
                    "member '{name}' of unresolved reference '{}'",
                    reference.uri()
                ))),
            },
            other => Err(MappingError::invalid_query(format!(
                "member '{name}' of {}",
                other.kind_name()
            ))),
        }
    }

    fn method<'e>(
        &self,
        method: Method,
        lambda: Option<&'e Lambda>,
        items: &[Value],
        env: &mut Vec<(&'e str, Value)>,
    ) -> Result<Value> {
        let mut mapped = |item: &Value| -> Result<Value> {
            match lambda {
                Some(l) => {
                    env.push((l.parameter.as_str(), item.clone()));
                    let out = self.eval(&l.body, env);
                    env.pop();
                    out
                }
                None => Ok(item.clone()),
            }
        };
        match method {
            Method::Any => {
                if lambda.is_none() {
                    return Ok(Value::Bool(!items.is_empty()));
                }
                for item in items {
                    if truthy(&mapped(item)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Method::All => {
                for item in items {
                    if !truthy(&mapped(item)?) {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Method::Count => {
                let mut count = 0i64;
                for item in items {
                    if lambda.is_none() || truthy(&mapped(item)?) {
                        count += 1;
                    }
                }
                Ok(Value::Int(count))
            }
            Method::Sum => {
                let values = items.iter().map(&mut mapped).collect::<Result<Vec<_>>>()?;
                sum(&values)
            }
            Method::Min | Method::Max => {
                let values = items.iter().map(&mut mapped).collect::<Result<Vec<_>>>()?;
                let wanted = if method == Method::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                extreme(&values, wanted)
            }
        }
    }
}

/// Converts a literal to a value.
pub fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
        Literal::DateTime(dt) => Value::DateTime(*dt),
    }
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

fn unary(op: UnaryOp, value: Value) -> Result<Value> {
    match (op, value) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Negate, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| MappingError::invalid_query("integer overflow in negation")),
        (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
        (op, other) => Err(MappingError::invalid_query(format!(
            "cannot apply {op:?} to {}",
            other.kind_name()
        ))),
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let ordering = |accept: fn(Ordering) -> bool| -> Result<Value> {
        if l.is_null() || r.is_null() {
            return Ok(Value::Bool(false));
        }
        let ord = l.compare(r).ok_or_else(|| {
            MappingError::invalid_query(format!(
                "cannot compare {} with {}",
                l.kind_name(),
                r.kind_name()
            ))
        })?;
        Ok(Value::Bool(accept(ord)))
    };
    match op {
        BinaryOp::Eq => Ok(Value::Bool(l.loosely_equals(r))),
        BinaryOp::Ne => Ok(Value::Bool(!l.loosely_equals(r))),
        BinaryOp::Lt => ordering(|o| o == Ordering::Less),
        BinaryOp::Le => ordering(|o| o != Ordering::Greater),
        BinaryOp::Gt => ordering(|o| o == Ordering::Greater),
        BinaryOp::Ge => ordering(|o| o != Ordering::Less),
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(match op {
            BinaryOp::And => truthy(l) && truthy(r),
            _ => truthy(l) || truthy(r),
        })),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, l, r)
        }
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let overflow = || MappingError::invalid_query(format!("integer overflow in {}", op.keyword()));
    match (l, r) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let out = match op {
                BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
                BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
                BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
                BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                    return Err(MappingError::invalid_query("division by zero"))
                }
                BinaryOp::Div => a.checked_div(b).ok_or_else(overflow)?,
                _ => a.checked_rem(b).ok_or_else(overflow)?,
            };
            Ok(Value::Int(out))
        }
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            })),
            _ => Err(MappingError::invalid_query(format!(
                "cannot apply {} to {} and {}",
                op.keyword(),
                l.kind_name(),
                r.kind_name()
            ))),
        },
    }
}

fn text_arg<'v>(function: Function, args: &'v [Value], idx: usize) -> Result<Option<&'v str>> {
    match args.get(idx) {
        Some(Value::Null) | None => Ok(None),
        Some(Value::String(s)) | Some(Value::Enum(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(MappingError::invalid_query(format!(
            "{}() expects a string, found {}",
            function.name(),
            other.kind_name()
        ))),
    }
}

fn int_arg(function: Function, args: &[Value], idx: usize) -> Result<Option<usize>> {
    match args.get(idx) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Int(i)) => usize::try_from(*i).map(Some).map_err(|_| {
            MappingError::invalid_query(format!("{}() index {i} is negative", function.name()))
        }),
        Some(other) => Err(MappingError::invalid_query(format!(
            "{}() expects an integer, found {}",
            function.name(),
            other.kind_name()
        ))),
    }
}

fn call(function: Function, args: &[Value]) -> Result<Value> {
    let Some(subject) = text_arg(function, args, 0)? else {
        return Ok(Value::Null);
    };
    let value = match function {
        Function::StartsWith | Function::EndsWith | Function::Contains | Function::IndexOf => {
            let Some(needle) = text_arg(function, args, 1)? else {
                return Ok(Value::Null);
            };
            match function {
                Function::StartsWith => Value::Bool(subject.starts_with(needle)),
                Function::EndsWith => Value::Bool(subject.ends_with(needle)),
                Function::Contains => Value::Bool(subject.contains(needle)),
                _ => Value::Int(
                    subject
                        .find(needle)
                        .map_or(-1, |byte| subject[..byte].chars().count() as i64),
                ),
            }
        }
        Function::ToUpper => Value::String(subject.to_uppercase()),
        Function::ToLower => Value::String(subject.to_lowercase()),
        Function::Trim => Value::String(subject.trim().to_owned()),
        Function::Length => Value::Int(subject.chars().count() as i64),
        Function::Substring => {
            let start = int_arg(function, args, 1)?.unwrap_or(0);
            let chars = subject.chars().skip(start);
            Value::String(match int_arg(function, args, 2)? {
                Some(len) => chars.take(len).collect(),
                None => chars.collect(),
            })
        }
    };
    Ok(value)
}

/// Sum of numeric values; nulls are skipped and the empty sum is `0`.
pub fn sum(values: &[Value]) -> Result<Value> {
    let mut int_total: i64 = 0;
    let mut float_total: Option<f64> = None;
    for value in values {
        match value {
            Value::Null => {}
            Value::Int(i) => match &mut float_total {
                Some(f) => *f += *i as f64,
                None => {
                    int_total = int_total
                        .checked_add(*i)
                        .ok_or_else(|| MappingError::invalid_query("integer overflow in sum"))?
                }
            },
            Value::Float(x) => {
                let f = float_total.get_or_insert(int_total as f64);
                *f += x;
            }
            other => {
                return Err(MappingError::invalid_query(format!(
                    "cannot sum {}",
                    other.kind_name()
                )))
            }
        }
    }
    Ok(float_total.map_or(Value::Int(int_total), Value::Float))
}

/// Smallest (`Less`) or largest (`Greater`) non-null value; `Null` when there is none.
pub fn extreme(values: &[Value], wanted: Ordering) -> Result<Value> {
    let mut best: Option<&Value> = None;
    for value in values.iter().filter(|v| !v.is_null()) {
        best = match best {
            None => Some(value),
            Some(current) => {
                let ord = value.compare(current).ok_or_else(|| {
                    MappingError::invalid_query(format!(
                        "cannot compare {} with {}",
                        value.kind_name(),
                        current.kind_name()
                    ))
                })?;
                Some(if ord == wanted { value } else { current })
            }
        };
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}
