//! Client side of the mapping: renders queries as request URIs, sends them
//! through a [`Transport`] and materializes the JSON responses.
//!
//! [`LocalTransport`] answers requests in process with an [`Interpreter`] and
//! a [`DataSource`], which is what the integration tests and the CLI use.

use std::sync::Arc;

use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value as Json;
use tracing::debug;

use crate::config::Config;
use crate::error::{ErrorBody, MappingError, Result};
use crate::model::{LazyRef, ResourceLoader, Value};
use crate::query::ast::{Projection, RestQuery};
use crate::query::normalize::normalize;
use crate::query::uri::UriQueryBuilder;
use crate::query::{Interpreter, QueryOutput, QueryResult};
use crate::store::DataSource;
use crate::types::{HttpMethod, MappedType, MappedTypeId, TypeGraph, ValueKind};
use crate::wire::{ExpandSet, JsonDeserializer, JsonSerializer, UncheckedContext};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Outgoing HTTP request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Verb.
    pub method: HttpMethod,
    /// Target URI including the query string.
    pub uri: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Body, if any.
    pub body: Option<String>,
}

impl Request {
    /// `GET uri` accepting JSON.
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            uri: uri.into(),
            headers: vec![("Accept".to_owned(), JSON_CONTENT_TYPE.to_owned())],
            body: None,
        }
    }
}

/// Incoming HTTP response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Status code.
    pub status: u16,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Body text.
    pub body: String,
}

impl Response {
    fn json(status: u16, body: String) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".to_owned(), JSON_CONTENT_TYPE.to_owned())],
            body,
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests somewhere and returns what came back.
///
/// Timeouts, retries and cancellation belong to implementations.
pub trait Transport: Send + Sync {
    /// Performs one exchange.
    fn send(&self, request: &Request) -> Result<Response>;
}

/// What [`Client::execute`] produced.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientResult {
    /// A page of a listing.
    Items(QueryResult),
    /// A projected value, a single item or a lazy reference to one.
    Value(Value),
    /// The request URI of a `ToUri` query; nothing was sent.
    Uri(String),
}

impl ClientResult {
    /// The listing, if this is one.
    pub fn into_items(self) -> Option<QueryResult> {
        match self {
            ClientResult::Items(items) => Some(items),
            _ => None,
        }
    }

    /// The value, if this is one.
    pub fn into_value(self) -> Option<Value> {
        match self {
            ClientResult::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// Executes queries against a remote endpoint.
#[derive(Clone)]
pub struct Client {
    graph: Arc<TypeGraph>,
    transport: Arc<dyn Transport>,
    config: Config,
}

impl Client {
    /// Client sending through `transport`; URIs are prefixed with
    /// `config.base_uri`.
    pub fn new(graph: Arc<TypeGraph>, transport: Arc<dyn Transport>, config: Config) -> Self {
        Self {
            graph,
            transport,
            config,
        }
    }

    /// Type graph shared with the transport.
    pub fn graph(&self) -> &Arc<TypeGraph> {
        &self.graph
    }

    /// Starts a query over the resource type `type_name`.
    pub fn query(&self, type_name: &str) -> Result<RestQuery> {
        RestQuery::over(&self.graph, type_name)
    }

    /// Absolute request URI of `query`.
    pub fn uri_for(&self, query: &RestQuery) -> Result<String> {
        let rendered = UriQueryBuilder::new(&self.graph).render(query.expression()?)?;
        Ok(self.absolute(&rendered.to_string()))
    }

    /// Normalizes, renders and sends `query`, then decodes the response
    /// according to its terminal projection.
    pub fn execute(&self, query: &RestQuery) -> Result<ClientResult> {
        let plan = normalize(query.expression()?)?;
        let uri = self.absolute(&UriQueryBuilder::new(&self.graph).build(&plan)?.to_string());
        let any = self.graph.value_type(ValueKind::Any)?;
        let item_type = if plan.select.is_some() || plan.group_by.is_some() {
            any
        } else {
            plan.element_type()
        };

        let expected = match plan.projection {
            Projection::ToUri => return Ok(ClientResult::Uri(uri)),
            Projection::FirstLazy => {
                return Ok(ClientResult::Value(Value::Reference(LazyRef::new(uri, item_type))))
            }
            Projection::Enumerable => {
                let json = self.fetch(&uri)?;
                let result = JsonDeserializer::new(&self.graph).deserialize_result(
                    &json,
                    item_type,
                    &UncheckedContext,
                )?;
                return Ok(ClientResult::Items(result));
            }
            Projection::First | Projection::FirstOrDefault => item_type,
            Projection::Count => self.graph.value_type(ValueKind::Int64)?,
            Projection::Any => self.graph.value_type(ValueKind::Boolean)?,
            Projection::Sum | Projection::Min | Projection::Max => any,
        };
        let json = self.fetch(&uri)?;
        if json.is_null() && plan.projection == Projection::FirstOrDefault {
            return Ok(ClientResult::Value(Value::Null));
        }
        let value = JsonDeserializer::new(&self.graph).deserialize(&json, expected, &UncheckedContext, None)?;
        Ok(ClientResult::Value(value))
    }

    /// Fetches the resource at `uri` as a value of `expected`.
    pub fn get(&self, uri: &str, expected: MappedTypeId) -> Result<Value> {
        let json = self.fetch(uri)?;
        JsonDeserializer::new(&self.graph).deserialize(&json, expected, &UncheckedContext, None)
    }

    fn absolute(&self, relative: &str) -> String {
        format!("{}/{}", self.config.base_uri.trim_end_matches('/'), relative)
    }

    fn fetch(&self, uri: &str) -> Result<Json> {
        let request = Request::get(uri);
        let response = self.transport.send(&request)?;
        debug!(uri, status = response.status, bytes = response.body.len(), "client.request");
        if !response.is_success() {
            return Err(error_from_response(&response));
        }
        serde_json::from_str(&response.body)
            .map_err(|err| MappingError::format(format!("malformed response from '{uri}': {err}")))
    }
}

impl ResourceLoader for Client {
    fn load(&self, uri: &str, expected: MappedTypeId) -> Result<Value> {
        self.get(uri, expected)
    }
}

fn error_from_response(response: &Response) -> MappingError {
    match serde_json::from_str::<ErrorBody>(&response.body) {
        Ok(body) => MappingError::from_code(&body.code, &body.message, response.status),
        Err(_) => MappingError::Transport {
            status: response.status,
            message: response.body.clone(),
        },
    }
}

/// Transport answering `GET` requests in process.
///
/// `collection?query` runs the query string against the collection;
/// `collection/id` returns the member whose primary id matches. Below parent
/// segments (`farms/1/critters`) only the members of that parent are seen.
pub struct LocalTransport {
    interpreter: Interpreter,
    source: Arc<dyn DataSource + Send + Sync>,
}

impl LocalTransport {
    /// Transport serving `source` with an interpreter built from `config`.
    pub fn new(graph: Arc<TypeGraph>, source: Arc<dyn DataSource + Send + Sync>, config: Config) -> Self {
        Self {
            interpreter: Interpreter::new(graph, config),
            source,
        }
    }

    /// The interpreter answering requests.
    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    fn answer(&self, request: &Request) -> Result<Json> {
        if request.method != HttpMethod::Get {
            return Err(MappingError::not_supported(format!(
                "{} is not served by the local transport",
                request.method.as_str()
            )));
        }
        let base = self.interpreter.config().base_uri.trim_end_matches('/');
        let target = request.uri.strip_prefix(base).unwrap_or(&request.uri);
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let (collection_path, id) = match segments.as_slice() {
            [] => return Err(MappingError::unknown_type("no resource at ''")),
            [parents @ .., id] if segments.len() % 2 == 0 => (parents, Some(*id)),
            all => (all, None),
        };
        let Some(collection) = collection_path.last() else {
            return Err(MappingError::unknown_type("no resource at ''"));
        };
        let endpoint = self.interpreter.endpoint_for(collection)?;
        let query = match id {
            Some(id) => self.member_query(endpoint, id)?,
            None => query.to_owned(),
        };

        let response = if collection_path.len() > 1 {
            self.check_nesting(endpoint, collection_path)?;
            let scoped = ScopedSource {
                inner: self.source.as_ref(),
                graph: self.interpreter.graph(),
                prefix: format!("{}/", collection_path.join("/")),
            };
            self.interpreter.interpret(endpoint, &query, &scoped)?
        } else {
            self.interpreter.interpret(endpoint, &query, self.source.as_ref())?
        };
        let graph = self.interpreter.graph();
        JsonSerializer::from_config(graph, self.interpreter.config()).serialize_output(
            &response.output,
            response.item_type,
            &ExpandSet::from_paths(&response.expand),
        )
    }

    /// Parent segments must follow the resource's URI template.
    fn check_nesting(&self, endpoint: MappedTypeId, collection_path: &[&str]) -> Result<()> {
        let template = self.interpreter.graph().uri_template(endpoint)?;
        let expected: Vec<&str> = template.split('/').collect();
        let literal = &expected[..expected.len().saturating_sub(1)];
        let fits = literal.len() == collection_path.len()
            && literal
                .iter()
                .zip(collection_path)
                .all(|(part, segment)| part.starts_with('{') || part.eq_ignore_ascii_case(segment));
        if fits {
            Ok(())
        } else {
            Err(MappingError::invalid_query(format!(
                "'{}' does not match '{template}'",
                collection_path.join("/")
            )))
        }
    }

    fn member_query(&self, endpoint: MappedTypeId, id: &str) -> Result<String> {
        let ty = self.interpreter.graph().get(endpoint)?;
        let primary = ty
            .primary_id()
            .ok_or_else(|| MappingError::not_supported(format!("'{}' has no primary id", ty.name)))?;
        let id = percent_decode_str(id)
            .decode_utf8()
            .map_err(|err| MappingError::invalid_query(format!("id segment is not UTF-8: {err}")))?;
        let literal = if id.parse::<i64>().is_ok() {
            id.into_owned()
        } else {
            format!("'{}'", id.replace('\'', "''"))
        };
        let filter = format!("{} eq {literal}", primary.name);
        Ok(format!(
            "$filter={}&$projection=first",
            utf8_percent_encode(&filter, NON_ALPHANUMERIC)
        ))
    }
}

/// Members of a nested collection: items whose URI lies below `prefix`.
struct ScopedSource<'a> {
    inner: &'a (dyn DataSource + Send + Sync),
    graph: &'a TypeGraph,
    prefix: String,
}

impl ScopedSource<'_> {
    fn contains(&self, item: &Value) -> bool {
        item.as_entity()
            .and_then(|entity| self.graph.uri_of(entity).ok())
            .is_some_and(|uri| uri.starts_with(&self.prefix))
    }
}

impl DataSource for ScopedSource<'_> {
    fn query(
        &self,
        endpoint: &MappedType,
        visit: &mut dyn FnMut(&[Value]) -> Result<QueryOutput>,
    ) -> Result<QueryOutput> {
        self.inner.query(endpoint, &mut |items| {
            let scoped: Vec<Value> = items.iter().filter(|item| self.contains(item)).cloned().collect();
            visit(&scoped)
        })
    }
}

impl Transport for LocalTransport {
    fn send(&self, request: &Request) -> Result<Response> {
        match self.answer(request) {
            Ok(json) => {
                let body = serde_json::to_string(&json)
                    .map_err(|err| MappingError::format(format!("cannot encode response: {err}")))?;
                Ok(Response::json(200, body))
            }
            Err(err) => {
                debug!(uri = %request.uri, code = err.code(), "client.local.error");
                let body = serde_json::to_string(&ErrorBody::from(&err))
                    .map_err(|err| MappingError::format(format!("cannot encode error: {err}")))?;
                Ok(Response::json(err.status_hint(), body))
            }
        }
    }
}
