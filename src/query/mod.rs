//! Query pipeline.
//!
//! A [`RestQuery`] chain is reduced by [`normalize`] to a canonical
//! [`QueryPlan`], rendered by [`UriQueryBuilder`] as a request URI, parsed back
//! on the server by [`parse_query_string`] and executed by [`Interpreter`]
//! against a [`crate::store::DataSource`].

/// Operator chains and the fluent builder.
pub mod ast;
/// Type-checking compiler and evaluator for expressions.
pub mod eval;
/// Expression trees.
pub mod expr;
/// Server-side execution of query strings.
pub mod interpreter;
/// Chain reduction to canonical plans.
pub mod normalize;
/// Query string and expression grammar parser.
pub mod parse;
/// Textual rendering of expressions.
pub mod render;
/// Listings and projected values.
pub mod result;
/// Request URI rendering.
pub mod uri;

pub use ast::{Projection, QueryExpr, RestQuery, SortDirection};
pub use expr::{lambda, Expr, Lambda, Literal};
pub use interpreter::{Interpreter, QueryResponse};
pub use normalize::{normalize, QueryPlan, SortKey};
pub use parse::{parse_query_string, ParsedQuery};
pub use result::{QueryOutput, QueryResult};
pub use uri::{UriQuery, UriQueryBuilder};
