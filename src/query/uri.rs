//! Rendering of query plans as request URIs.

use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;

use crate::error::Result;
use crate::query::ast::{QueryExpr, SortDirection};
use crate::query::normalize::{normalize, QueryPlan};
use crate::query::render::{render_lambda, render_selection};
use crate::types::TypeGraph;

/// Characters left unescaped in query parameter values.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'$')
    .remove(b',')
    .remove(b':')
    .remove(b'(')
    .remove(b')')
    .remove(b'\'')
    .remove(b'/');

/// Query parameter keys in emission order.
pub const PARAMETER_ORDER: [&str; 10] = [
    "$oftype",
    "$filter",
    "$orderby",
    "$groupby",
    "$select",
    "$skip",
    "$top",
    "$expand",
    "$totalcount",
    "$projection",
];

/// A rendered request: endpoint path plus unencoded query parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UriQuery {
    /// Endpoint path, e.g. `critters`.
    pub path: String,
    /// Parameters in canonical order, values not yet percent-encoded.
    pub parameters: Vec<(&'static str, String)>,
}

impl UriQuery {
    /// Value of one parameter.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Encoded query string without the leading `?`.
    pub fn query_string(&self) -> String {
        self.parameters
            .iter()
            .map(|(key, value)| format!("{key}={}", utf8_percent_encode(value, QUERY_VALUE)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl fmt::Display for UriQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if !self.parameters.is_empty() {
            write!(f, "?{}", self.query_string())?;
        }
        Ok(())
    }
}

/// Renders normalized plans against a type graph.
pub struct UriQueryBuilder<'g> {
    graph: &'g TypeGraph,
}

impl<'g> UriQueryBuilder<'g> {
    /// Builder over `graph`.
    pub fn new(graph: &'g TypeGraph) -> Self {
        Self { graph }
    }

    /// Normalizes `expr` and renders it.
    pub fn render(&self, expr: &QueryExpr) -> Result<UriQuery> {
        self.build(&normalize(expr)?)
    }

    /// Renders a normalized plan.
    pub fn build(&self, plan: &QueryPlan) -> Result<UriQuery> {
        let mut parameters = Vec::new();

        let declared = self.graph.get(plan.source_type)?;
        let endpoint_type = declared
            .resource()
            .map_or(plan.source_type, |r| r.uri_base_type);
        if plan.element_type() != endpoint_type {
            let concrete = self.graph.get(plan.element_type())?;
            parameters.push(("$oftype", concrete.name.clone()));
        }
        if let Some(filter) = &plan.filter {
            parameters.push(("$filter", render_lambda(filter)?));
        }
        if let Some(sort) = &plan.order_by {
            let mut key = render_lambda(&sort.key)?;
            if sort.direction == SortDirection::Descending {
                key.push_str(" desc");
            }
            parameters.push(("$orderby", key));
        }
        if let Some(key) = &plan.group_by {
            parameters.push(("$groupby", render_lambda(key)?));
        }
        if let Some(selector) = &plan.select {
            parameters.push(("$select", render_selection(selector)?));
        }
        if let Some(skip) = plan.skip {
            parameters.push(("$skip", skip.to_string()));
        }
        let top = plan
            .take
            .or_else(|| plan.projection.is_first().then_some(1));
        if let Some(top) = top {
            parameters.push(("$top", top.to_string()));
        }
        if !plan.expand.is_empty() {
            let paths: Vec<String> = plan.expand.iter().map(|p| p.to_ascii_lowercase()).collect();
            parameters.push(("$expand", paths.join(",")));
        }
        if plan.include_total_count {
            parameters.push(("$totalcount", "true".to_owned()));
        }
        if let Some(name) = plan.projection.wire_name() {
            parameters.push(("$projection", name.to_owned()));
        }

        let query = UriQuery {
            path: plan.source_uri.clone(),
            parameters,
        };
        debug!(uri = %query, "query.uri.rendered");
        Ok(query)
    }
}
