//! Query operator chains and the fluent builder that produces them.

use std::fmt;

use crate::error::{MappingError, Result};
use crate::query::expr::{lambda, Expr, Lambda};
use crate::types::{MappedTypeId, TypeGraph};

/// Sort direction of an `OrderBy`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// Terminal projection of a query chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum Projection {
    /// Plain listing.
    #[default]
    Enumerable,
    /// First element; fails on an empty result.
    First,
    /// First element, fetched on first dereference.
    FirstLazy,
    /// First element or null.
    FirstOrDefault,
    /// Whether any element exists.
    Any,
    /// Number of elements.
    Count,
    /// Sum of elements.
    Sum,
    /// Smallest element.
    Min,
    /// Largest element.
    Max,
    /// The request URI itself; nothing is fetched.
    ToUri,
}

impl Projection {
    /// Value of the `$projection` parameter, if the projection has one.
    pub fn wire_name(self) -> Option<&'static str> {
        match self {
            Projection::Enumerable | Projection::ToUri => None,
            Projection::First | Projection::FirstLazy => Some("first"),
            Projection::FirstOrDefault => Some("firstordefault"),
            Projection::Any => Some("any"),
            Projection::Count => Some("count"),
            Projection::Sum => Some("sum"),
            Projection::Min => Some("min"),
            Projection::Max => Some("max"),
        }
    }

    /// Parses a `$projection` value (case-insensitive).
    pub fn from_wire_name(name: &str) -> Option<Projection> {
        let p = match name.to_ascii_lowercase().as_str() {
            "first" => Projection::First,
            "firstordefault" => Projection::FirstOrDefault,
            "any" => Projection::Any,
            "count" => Projection::Count,
            "sum" => Projection::Sum,
            "min" => Projection::Min,
            "max" => Projection::Max,
            _ => return None,
        };
        Some(p)
    }

    /// First-element projections, which imply `$top=1`.
    pub fn is_first(self) -> bool {
        matches!(
            self,
            Projection::First | Projection::FirstLazy | Projection::FirstOrDefault
        )
    }

    /// Projections producing a single value rather than a listing.
    pub fn is_scalar(self) -> bool {
        !matches!(self, Projection::Enumerable | Projection::ToUri)
    }

    /// Whether the projection's optional argument is a predicate (`First(p)`)
    /// rather than a selector (`Sum(s)`).
    pub fn takes_predicate(self) -> bool {
        matches!(
            self,
            Projection::First
                | Projection::FirstLazy
                | Projection::FirstOrDefault
                | Projection::Any
                | Projection::Count
        )
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Projection::Enumerable => "enumerable",
            Projection::ToUri => "touri",
            Projection::FirstLazy => "firstlazy",
            other => other.wire_name().unwrap_or("enumerable"),
        };
        f.write_str(name)
    }
}

/// One operator in a query chain. Every non-source node owns its source.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryExpr {
    /// Root sequence: all instances served by a resource endpoint.
    Source {
        /// Static element type.
        element_type: MappedTypeId,
        /// Endpoint path, e.g. `critters`.
        uri: String,
    },
    /// Filter.
    Where {
        /// Upstream operator.
        source: Box<QueryExpr>,
        /// Element predicate.
        predicate: Lambda,
    },
    /// Projection.
    Select {
        /// Upstream operator.
        source: Box<QueryExpr>,
        /// Element selector.
        selector: Lambda,
    },
    /// Sort.
    OrderBy {
        /// Upstream operator.
        source: Box<QueryExpr>,
        /// Sort key.
        key: Lambda,
        /// Direction.
        direction: SortDirection,
    },
    /// Grouping.
    GroupBy {
        /// Upstream operator.
        source: Box<QueryExpr>,
        /// Grouping key.
        key: Lambda,
    },
    /// Offset.
    Skip {
        /// Upstream operator.
        source: Box<QueryExpr>,
        /// Elements to skip.
        count: u64,
    },
    /// Limit.
    Take {
        /// Upstream operator.
        source: Box<QueryExpr>,
        /// Elements to keep.
        count: u64,
    },
    /// Restriction to a subtype.
    OfType {
        /// Upstream operator.
        source: Box<QueryExpr>,
        /// Subtype.
        element_type: MappedTypeId,
    },
    /// Inline a referenced property.
    Expand {
        /// Upstream operator.
        source: Box<QueryExpr>,
        /// Member path to expand.
        path: Lambda,
    },
    /// Request the total count alongside a listing.
    IncludeTotalCount {
        /// Upstream operator.
        source: Box<QueryExpr>,
    },
    /// Terminal projection.
    Terminal {
        /// Upstream operator.
        source: Box<QueryExpr>,
        /// Projection.
        projection: Projection,
        /// Optional predicate or selector.
        argument: Option<Lambda>,
    },
}

impl QueryExpr {
    /// Upstream operator, `None` for the source.
    pub fn source(&self) -> Option<&QueryExpr> {
        match self {
            QueryExpr::Source { .. } => None,
            QueryExpr::Where { source, .. }
            | QueryExpr::Select { source, .. }
            | QueryExpr::OrderBy { source, .. }
            | QueryExpr::GroupBy { source, .. }
            | QueryExpr::Skip { source, .. }
            | QueryExpr::Take { source, .. }
            | QueryExpr::OfType { source, .. }
            | QueryExpr::Expand { source, .. }
            | QueryExpr::IncludeTotalCount { source }
            | QueryExpr::Terminal { source, .. } => Some(source),
        }
    }

    /// Operator name, used in diagnostics.
    pub fn operator(&self) -> &'static str {
        match self {
            QueryExpr::Source { .. } => "Source",
            QueryExpr::Where { .. } => "Where",
            QueryExpr::Select { .. } => "Select",
            QueryExpr::OrderBy { .. } => "OrderBy",
            QueryExpr::GroupBy { .. } => "GroupBy",
            QueryExpr::Skip { .. } => "Skip",
            QueryExpr::Take { .. } => "Take",
            QueryExpr::OfType { .. } => "OfType",
            QueryExpr::Expand { .. } => "Expand",
            QueryExpr::IncludeTotalCount { .. } => "IncludeTotalCount",
            QueryExpr::Terminal { .. } => "Terminal",
        }
    }

    /// Operators from the source outward.
    pub fn chain(&self) -> Vec<&QueryExpr> {
        let mut nodes = Vec::new();
        let mut current = Some(self);
        while let Some(node) = current {
            nodes.push(node);
            current = node.source();
        }
        nodes.reverse();
        nodes
    }

    /// Element type of the sequence, `None` after a projection.
    pub fn element_type(&self) -> Option<MappedTypeId> {
        match self {
            QueryExpr::Source { element_type, .. } | QueryExpr::OfType { element_type, .. } => {
                Some(*element_type)
            }
            QueryExpr::Select { .. } | QueryExpr::GroupBy { .. } | QueryExpr::Terminal { .. } => {
                None
            }
            other => other.source().and_then(QueryExpr::element_type),
        }
    }
}

/// Fluent builder for queries against one resource endpoint.
///
/// Errors raised while building (for example an unknown `OfType` name) are held
/// and surfaced by [`RestQuery::expression`], so chains read straight through.
#[derive(Clone, Debug)]
pub struct RestQuery {
    expr: QueryExpr,
    error: Option<MappingError>,
}

impl RestQuery {
    /// Starts a query over all instances of `type_name`, served by the endpoint of
    /// its URI base type.
    pub fn over(graph: &TypeGraph, type_name: &str) -> Result<Self> {
        let ty = graph.by_name(type_name)?;
        let resource = ty.resource().ok_or_else(|| {
            MappingError::not_supported(format!("'{}' is not a resource type", ty.name))
        })?;
        let base = graph.get(resource.uri_base_type)?;
        let uri = base
            .resource()
            .map_or_else(|| resource.relative_path.clone(), |r| r.relative_path.clone());
        Ok(Self::from_source(ty.id, uri))
    }

    /// Starts a query from an explicit source node.
    pub fn from_source(element_type: MappedTypeId, uri: impl Into<String>) -> Self {
        Self::from_expr(QueryExpr::Source {
            element_type,
            uri: uri.into(),
        })
    }

    /// Wraps an existing chain.
    pub fn from_expr(expr: QueryExpr) -> Self {
        Self { expr, error: None }
    }

    /// The chain built so far, or the first builder error.
    pub fn expression(&self) -> Result<&QueryExpr> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(&self.expr),
        }
    }

    fn push(self, wrap: impl FnOnce(Box<QueryExpr>) -> QueryExpr) -> Self {
        if self.error.is_some() {
            return self;
        }
        Self {
            expr: wrap(Box::new(self.expr)),
            error: None,
        }
    }

    /// Appends a filter.
    pub fn r#where(self, predicate: impl FnOnce(Expr) -> Expr) -> Self {
        self.where_lambda(lambda(predicate))
    }

    /// Appends a filter given as a lambda.
    pub fn where_lambda(self, predicate: Lambda) -> Self {
        self.push(|source| QueryExpr::Where { source, predicate })
    }

    /// Appends a projection.
    pub fn select(self, selector: impl FnOnce(Expr) -> Expr) -> Self {
        let selector = lambda(selector);
        self.push(|source| QueryExpr::Select { source, selector })
    }

    /// Appends an ascending sort.
    pub fn order_by(self, key: impl FnOnce(Expr) -> Expr) -> Self {
        self.sort(key, SortDirection::Ascending)
    }

    /// Appends a descending sort.
    pub fn order_by_descending(self, key: impl FnOnce(Expr) -> Expr) -> Self {
        self.sort(key, SortDirection::Descending)
    }

    fn sort(self, key: impl FnOnce(Expr) -> Expr, direction: SortDirection) -> Self {
        let key = lambda(key);
        self.push(|source| QueryExpr::OrderBy {
            source,
            key,
            direction,
        })
    }

    /// Appends a grouping.
    pub fn group_by(self, key: impl FnOnce(Expr) -> Expr) -> Self {
        let key = lambda(key);
        self.push(|source| QueryExpr::GroupBy { source, key })
    }

    /// Appends an offset.
    pub fn skip(self, count: u64) -> Self {
        self.push(|source| QueryExpr::Skip { source, count })
    }

    /// Appends a limit.
    pub fn take(self, count: u64) -> Self {
        self.push(|source| QueryExpr::Take { source, count })
    }

    /// Restricts the sequence to a subtype, by name.
    pub fn of_type(mut self, graph: &TypeGraph, type_name: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match graph.by_name(type_name) {
            Ok(ty) => {
                let element_type = ty.id;
                self.push(|source| QueryExpr::OfType {
                    source,
                    element_type,
                })
            }
            Err(err) => {
                self.error = Some(err);
                self
            }
        }
    }

    /// Requests inlining of a referenced property.
    pub fn expand(self, path: impl FnOnce(Expr) -> Expr) -> Self {
        let path = lambda(path);
        self.push(|source| QueryExpr::Expand { source, path })
    }

    /// Requests the total count alongside the listing.
    pub fn include_total_count(self) -> Self {
        self.push(|source| QueryExpr::IncludeTotalCount { source })
    }

    fn terminal(self, projection: Projection, argument: Option<Lambda>) -> Self {
        self.push(|source| QueryExpr::Terminal {
            source,
            projection,
            argument,
        })
    }

    /// Terminates with `First`.
    pub fn first(self) -> Self {
        self.terminal(Projection::First, None)
    }

    /// Terminates with `First(predicate)`.
    pub fn first_where(self, predicate: impl FnOnce(Expr) -> Expr) -> Self {
        self.terminal(Projection::First, Some(lambda(predicate)))
    }

    /// Terminates with a lazily fetched `First`.
    pub fn first_lazy(self) -> Self {
        self.terminal(Projection::FirstLazy, None)
    }

    /// Terminates with `FirstOrDefault`.
    pub fn first_or_default(self) -> Self {
        self.terminal(Projection::FirstOrDefault, None)
    }

    /// Terminates with `FirstOrDefault(predicate)`.
    pub fn first_or_default_where(self, predicate: impl FnOnce(Expr) -> Expr) -> Self {
        self.terminal(Projection::FirstOrDefault, Some(lambda(predicate)))
    }

    /// Terminates with `Any`.
    pub fn any(self) -> Self {
        self.terminal(Projection::Any, None)
    }

    /// Terminates with `Any(predicate)`.
    pub fn any_where(self, predicate: impl FnOnce(Expr) -> Expr) -> Self {
        self.terminal(Projection::Any, Some(lambda(predicate)))
    }

    /// Terminates with `Count`.
    pub fn count(self) -> Self {
        self.terminal(Projection::Count, None)
    }

    /// Terminates with `Count(predicate)`.
    pub fn count_where(self, predicate: impl FnOnce(Expr) -> Expr) -> Self {
        self.terminal(Projection::Count, Some(lambda(predicate)))
    }

    /// Terminates with `Sum(selector)`.
    pub fn sum(self, selector: impl FnOnce(Expr) -> Expr) -> Self {
        self.terminal(Projection::Sum, Some(lambda(selector)))
    }

    /// Terminates with `Min(selector)`.
    pub fn min(self, selector: impl FnOnce(Expr) -> Expr) -> Self {
        self.terminal(Projection::Min, Some(lambda(selector)))
    }

    /// Terminates with `Max(selector)`.
    pub fn max(self, selector: impl FnOnce(Expr) -> Expr) -> Self {
        self.terminal(Projection::Max, Some(lambda(selector)))
    }

    /// Terminates with `ToList`; identical to not terminating.
    pub fn to_list(self) -> Self {
        self
    }

    /// Terminates with `ToUri`: the client returns the request URI unsent.
    pub fn to_uri(self) -> Self {
        self.terminal(Projection::ToUri, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_lists_operators_from_the_source() {
        let q = RestQuery::from_source(MappedTypeId(7), "critters")
            .r#where(|c| c.member("Id").equals(5))
            .order_by(|c| c.member("Name"))
            .take(3)
            .first();
        let names: Vec<_> = q
            .expression()
            .unwrap()
            .chain()
            .into_iter()
            .map(QueryExpr::operator)
            .collect();
        assert_eq!(names, ["Source", "Where", "OrderBy", "Take", "Terminal"]);
    }

    #[test]
    fn element_type_is_lost_after_projection() {
        let q = RestQuery::from_source(MappedTypeId(7), "critters").take(1);
        assert_eq!(q.expression().unwrap().element_type(), Some(MappedTypeId(7)));
        let q = q.select(|c| c.member("Name"));
        assert_eq!(q.expression().unwrap().element_type(), None);
    }

    #[test]
    fn projection_wire_names_round_trip() {
        for p in [
            Projection::First,
            Projection::FirstOrDefault,
            Projection::Any,
            Projection::Count,
            Projection::Sum,
            Projection::Min,
            Projection::Max,
        ] {
            assert_eq!(Projection::from_wire_name(p.wire_name().unwrap()), Some(p));
        }
        assert_eq!(Projection::FirstLazy.wire_name(), Some("first"));
        assert_eq!(Projection::ToUri.wire_name(), None);
    }
}
