//! Server-side execution of parsed query strings.
//!
//! Steps run in a fixed order: `$oftype`, `$filter`, `$groupby`, total count,
//! `$orderby`, `$skip`, `$top`, `$select`, `$projection`. All expressions are
//! compiled against the type graph before the data source is touched, so an
//! unknown member fails without taking the store lock.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use tracing::{debug, trace};
use xxhash_rust::xxh64::xxh64;

use crate::config::Config;
use crate::error::{MappingError, Result};
use crate::model::{Grouping, Value};
use crate::query::ast::{Projection, SortDirection};
use crate::query::eval::{self, Compiler, Evaluator, StaticType};
use crate::query::expr::Lambda;
use crate::query::normalize::SortKey;
use crate::query::parse::{parse_query_string, ParsedQuery};
use crate::query::result::{QueryOutput, QueryResult};
use crate::store::DataSource;
use crate::types::{MappedType, MappedTypeId, TypeGraph, ValueKind};

type ParseCache = Mutex<LruCache<u64, (String, Arc<ParsedQuery>)>>;

/// Outcome of interpreting one request.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResponse {
    /// Listing or projected value.
    pub output: QueryOutput,
    /// Canonical expand paths, relative to the element type.
    pub expand: Vec<String>,
    /// Static type of the produced items; `Any` after `$select` or `$groupby`.
    pub item_type: MappedTypeId,
}

/// Lambdas checked against the graph, ready to run per element.
#[derive(Debug)]
struct CompiledQuery {
    element: MappedTypeId,
    narrow: bool,
    filter: Option<Lambda>,
    group_by: Option<Lambda>,
    order_by: Option<SortKey>,
    select: Option<Lambda>,
    expand: Vec<String>,
    item_type: MappedTypeId,
}

/// Executes query strings against a [`DataSource`].
pub struct Interpreter {
    graph: Arc<TypeGraph>,
    config: Config,
    cache: Option<ParseCache>,
}

impl Interpreter {
    /// Interpreter over `graph`; the parse cache holds
    /// `config.query_cache_capacity` entries.
    pub fn new(graph: Arc<TypeGraph>, config: Config) -> Self {
        let cache = NonZeroUsize::new(config.query_cache_capacity)
            .map(LruCache::new)
            .map(Mutex::new);
        Self {
            graph,
            config,
            cache,
        }
    }

    /// Type graph the interpreter compiles against.
    pub fn graph(&self) -> &Arc<TypeGraph> {
        &self.graph
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resource type served at the collection path `path` (leading and
    /// trailing slashes ignored, case-insensitive).
    pub fn endpoint_for(&self, path: &str) -> Result<MappedTypeId> {
        let wanted = path.trim_matches('/');
        self.graph
            .resources()
            .into_iter()
            .find(|ty| {
                ty.resource().is_some_and(|r| {
                    r.uri_base_type == ty.id && r.relative_path.eq_ignore_ascii_case(wanted)
                })
            })
            .map(|ty| ty.id)
            .ok_or_else(|| MappingError::unknown_type(format!("no resource at '{wanted}'")))
    }

    /// Parses a query string, consulting the LRU cache first.
    pub fn parse(&self, query_string: &str) -> Result<Arc<ParsedQuery>> {
        let Some(cache) = &self.cache else {
            return parse_query_string(query_string, &self.config).map(Arc::new);
        };
        let key = xxh64(query_string.as_bytes(), 0);
        {
            let mut guard = cache.lock();
            if let Some((text, parsed)) = guard.get(&key) {
                if text == query_string {
                    trace!(key, "query.interpret.cache_hit");
                    return Ok(Arc::clone(parsed));
                }
            }
        }
        let parsed = Arc::new(parse_query_string(query_string, &self.config)?);
        cache
            .lock()
            .put(key, (query_string.to_owned(), Arc::clone(&parsed)));
        Ok(parsed)
    }

    /// Parses and executes `query_string` against the collection served by
    /// `endpoint`. Listings carry the request URL.
    pub fn interpret(
        &self,
        endpoint: MappedTypeId,
        query_string: &str,
        source: &dyn DataSource,
    ) -> Result<QueryResponse> {
        let parsed = self.parse(query_string)?;
        let mut response = self.execute(endpoint, &parsed, source)?;
        if let QueryOutput::Items(result) = &mut response.output {
            let ty = self.graph.get(endpoint)?;
            let path = ty.resource().map(|r| r.relative_path.as_str()).unwrap_or("");
            let raw = query_string.trim_start_matches('?');
            result.url = Some(if raw.is_empty() {
                path.to_owned()
            } else {
                format!("{path}?{raw}")
            });
        }
        Ok(response)
    }

    /// Executes an already parsed query.
    pub fn execute(
        &self,
        endpoint: MappedTypeId,
        parsed: &ParsedQuery,
        source: &dyn DataSource,
    ) -> Result<QueryResponse> {
        let endpoint = self.graph.get(endpoint)?;
        let compiled = self.compile(&endpoint, parsed)?;
        let mut visit = |items: &[Value]| self.run(&compiled, parsed, items);
        let output = source.query(&endpoint, &mut visit)?;
        Ok(QueryResponse {
            output,
            expand: compiled.expand,
            item_type: compiled.item_type,
        })
    }

    fn compile(&self, endpoint: &MappedType, parsed: &ParsedQuery) -> Result<CompiledQuery> {
        let resource = endpoint.resource().ok_or_else(|| {
            MappingError::not_supported(format!("'{}' is not a resource type", endpoint.name))
        })?;
        let element = match &parsed.of_type {
            Some(name) => {
                let narrowed = self.graph.by_name(name)?;
                if !self.graph.is_assignable(endpoint.id, narrowed.id) {
                    return Err(MappingError::invalid_query(format!(
                        "$oftype '{}' is not a subtype of '{}'",
                        narrowed.name, endpoint.name
                    )));
                }
                narrowed.id
            }
            None => endpoint.id,
        };

        let compiler = Compiler::new(&self.graph);
        let element_ty = StaticType::Mapped(element);
        let filter = parsed
            .filter
            .as_ref()
            .map(|f| compiler.compile(f, element_ty.clone()).map(|(l, _)| l))
            .transpose()?;
        let (group_by, row_ty) = match &parsed.group_by {
            Some(key) => {
                let (key, key_ty) = compiler.compile(key, element_ty.clone())?;
                let row_ty = StaticType::Group {
                    key: Box::new(key_ty),
                    element,
                };
                (Some(key), row_ty)
            }
            None => (None, element_ty.clone()),
        };
        let order_by = parsed
            .order_by
            .as_ref()
            .map(|sort| {
                compiler
                    .compile(&sort.key, row_ty.clone())
                    .map(|(key, _)| SortKey {
                        key,
                        direction: sort.direction,
                    })
            })
            .transpose()?;
        let select = parsed
            .select
            .as_ref()
            .map(|s| compiler.compile(s, row_ty.clone()).map(|(l, _)| l))
            .transpose()?;

        let mut expand = Vec::with_capacity(parsed.expand.len());
        for path in &parsed.expand {
            let (canonical, _) = compiler.compile(&Lambda::from_member_path(path), element_ty.clone())?;
            expand.push(canonical.member_path().unwrap_or_else(|| path.clone()));
        }

        let item_type = if select.is_some() || group_by.is_some() {
            self.graph.value_type(ValueKind::Any)?
        } else {
            element
        };
        Ok(CompiledQuery {
            element,
            narrow: element != resource.uri_base_type,
            filter,
            group_by,
            order_by,
            select,
            expand,
            item_type,
        })
    }

    fn run(&self, query: &CompiledQuery, parsed: &ParsedQuery, items: &[Value]) -> Result<QueryOutput> {
        let evaluator = Evaluator::new(&self.graph);
        let started = Instant::now();
        let step = |name: &str, rows: usize| {
            debug!(
                step = name,
                rows,
                elapsed_us = started.elapsed().as_micros() as u64,
                "query.interpret.step"
            );
        };

        let mut rows: Vec<Value> = items
            .iter()
            .filter(|item| !query.narrow || self.is_instance(item, query.element))
            .cloned()
            .collect();
        step("oftype", rows.len());

        if let Some(filter) = &query.filter {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if evaluator.test(filter, &row)? {
                    kept.push(row);
                }
            }
            rows = kept;
            step("filter", rows.len());
        }

        if let Some(key) = &query.group_by {
            let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
            let mut buckets: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
            for row in rows {
                let k = evaluator.apply(key, &row)?;
                let slots = buckets.entry(group_hash(&k)).or_default();
                match slots.iter().copied().find(|&slot| groups[slot].0 == k) {
                    Some(slot) => groups[slot].1.push(row),
                    None => {
                        slots.push(groups.len());
                        groups.push((k, vec![row]));
                    }
                }
            }
            rows = groups
                .into_iter()
                .map(|(k, members)| Value::Group(Grouping::new(k, members)))
                .collect();
            step("groupby", rows.len());
        }

        let total_count = parsed.include_total_count.then_some(rows.len() as u64);

        if let Some(sort) = &query.order_by {
            rows = sort_rows(&evaluator, sort, rows)?;
            step("orderby", rows.len());
        }

        if let Some(skip) = parsed.skip {
            let skip = usize::try_from(skip).unwrap_or(usize::MAX);
            rows = rows.into_iter().skip(skip).collect();
            step("skip", rows.len());
        }

        let top = match parsed.projection {
            Projection::Enumerable => self.config.effective_top(parsed.top),
            _ => parsed.top,
        };
        if let Some(top) = top {
            rows.truncate(usize::try_from(top).unwrap_or(usize::MAX));
            step("top", rows.len());
        }

        if let Some(selector) = &query.select {
            rows = rows
                .iter()
                .map(|row| evaluator.apply(selector, row))
                .collect::<Result<Vec<_>>>()?;
            step("select", rows.len());
        }

        let output = match parsed.projection {
            Projection::Enumerable | Projection::ToUri => QueryOutput::Items(QueryResult {
                items: rows,
                skip: parsed.skip,
                total_count,
                url: None,
            }),
            Projection::First | Projection::FirstLazy => {
                QueryOutput::Value(rows.into_iter().next().ok_or(MappingError::EmptyResult)?)
            }
            Projection::FirstOrDefault => {
                QueryOutput::Value(rows.into_iter().next().unwrap_or(Value::Null))
            }
            Projection::Any => QueryOutput::Value(Value::Bool(!rows.is_empty())),
            Projection::Count => QueryOutput::Value(Value::Int(rows.len() as i64)),
            Projection::Sum => QueryOutput::Value(eval::sum(&rows)?),
            Projection::Min | Projection::Max => {
                if rows.is_empty() {
                    return Err(MappingError::EmptyResult);
                }
                let wanted = if parsed.projection == Projection::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                QueryOutput::Value(eval::extreme(&rows, wanted)?)
            }
        };
        step("projection", 1);
        Ok(output)
    }

    fn is_instance(&self, item: &Value, element: MappedTypeId) -> bool {
        item.as_entity()
            .is_some_and(|entity| self.graph.is_assignable(element, entity.type_id()))
    }
}

fn compare_keys(a: &Value, b: &Value) -> Option<Ordering> {
    match (a.is_null(), b.is_null()) {
        (true, true) => Some(Ordering::Equal),
        (true, false) => Some(Ordering::Less),
        (false, true) => Some(Ordering::Greater),
        (false, false) => a.compare(b),
    }
}

/// Hash agreeing with `Value` equality. Objects only contribute their type,
/// so equal keys always share a bucket and cycles are never walked.
fn group_hash(value: &Value) -> u64 {
    let mut hasher = FxHasher::default();
    hash_group_key(value, &mut hasher);
    hasher.finish()
}

fn hash_group_key(value: &Value, state: &mut FxHasher) {
    std::mem::discriminant(value).hash(state);
    match value {
        Value::Null | Value::Reference(_) => {}
        Value::Bool(b) => b.hash(state),
        Value::Int(i) => i.hash(state),
        // 0.0 and -0.0 compare equal.
        Value::Float(f) => (if *f == 0.0 { 0.0f64 } else { *f }).to_bits().hash(state),
        Value::String(s) | Value::Enum(s) => s.hash(state),
        Value::DateTime(dt) => dt.hash(state),
        Value::List(items) => {
            items.len().hash(state);
            for item in items {
                hash_group_key(item, state);
            }
        }
        Value::Map(fields) => {
            for (name, field) in fields {
                name.hash(state);
                hash_group_key(field, state);
            }
        }
        Value::Object(entity) => entity.type_id().hash(state),
        Value::Group(group) => hash_group_key(&group.key, state),
    }
}

/// Stable sort by `sort.key`; nulls order first ascending.
fn sort_rows(evaluator: &Evaluator<'_>, sort: &SortKey, rows: Vec<Value>) -> Result<Vec<Value>> {
    let mut keyed = rows
        .into_iter()
        .map(|row| Ok((evaluator.apply(&sort.key, &row)?, row)))
        .collect::<Result<Vec<_>>>()?;
    let mut failure: Option<MappingError> = None;
    keyed.sort_by(|(a, _), (b, _)| {
        let ord = compare_keys(a, b).unwrap_or_else(|| {
            failure.get_or_insert_with(|| {
                MappingError::invalid_query(format!(
                    "cannot order {} against {}",
                    a.kind_name(),
                    b.kind_name()
                ))
            });
            Ordering::Equal
        });
        match sort.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(keyed.into_iter().map(|(_, row)| row).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;
    use crate::store::Repository;
    use crate::types::{NativeType, PropertyDef, SourceType, TypeRegistry};

    struct Fixture {
        interpreter: Interpreter,
        repo: Repository,
        critter: MappedTypeId,
    }

    fn fixture(config: Config) -> Fixture {
        let graph = Arc::new(
            TypeGraph::new(
                TypeRegistry::new()
                    .with_type(
                        SourceType::resource("Critter")
                            .property(PropertyDef::id("Id", NativeType::Value(ValueKind::Int32)))
                            .property(PropertyDef::new("Name", NativeType::Value(ValueKind::String)))
                            .property(PropertyDef::new("Color", NativeType::Value(ValueKind::String)))
                            .property(
                                PropertyDef::new("Secret", NativeType::Value(ValueKind::String))
                                    .access(crate::types::HttpMethods::POST),
                            ),
                    )
                    .with_type(SourceType::resource("MusicalCritter").extends("Critter")),
            )
            .unwrap(),
        );
        let repo = Repository::new(graph.clone());
        let colors = ["red", "green", "blue"];
        for id in 1..=10 {
            let ty = if id % 4 == 0 { "MusicalCritter" } else { "Critter" };
            let entity = Entity::new(graph.by_name(ty).unwrap().id);
            entity.set("Id", Value::Int(id));
            entity.set("Name", Value::String(format!("critter {id:02}")));
            entity.set("Color", colors[(id % 3) as usize].into());
            repo.insert(entity).unwrap();
        }
        let critter = graph.by_name("Critter").unwrap().id;
        Fixture {
            interpreter: Interpreter::new(graph, config),
            repo,
            critter,
        }
    }

    fn ids(response: &QueryResponse) -> Vec<i64> {
        response
            .output
            .items()
            .unwrap()
            .items
            .iter()
            .map(|v| v.as_entity().unwrap().get("Id").as_i64().unwrap())
            .collect()
    }

    #[test]
    fn filter_selects_single_critter() {
        let f = fixture(Config::default());
        let response = f
            .interpreter
            .interpret(f.critter, "$filter=Id%20eq%205", &f.repo)
            .unwrap();
        assert_eq!(ids(&response), vec![5]);
        let result = response.output.items().unwrap();
        assert_eq!(result.url.as_deref(), Some("critters?$filter=Id%20eq%205"));
    }

    #[test]
    fn first_on_empty_result_fails() {
        let f = fixture(Config::default());
        let err = f
            .interpreter
            .interpret(f.critter, "$filter=Id eq 42&$top=1&$projection=first", &f.repo)
            .unwrap_err();
        assert_eq!(err, MappingError::EmptyResult);
        let response = f
            .interpreter
            .interpret(f.critter, "$filter=Id eq 42&$projection=firstordefault", &f.repo)
            .unwrap();
        assert_eq!(response.output.value(), Some(&Value::Null));
    }

    #[test]
    fn paging_follows_ordering() {
        let f = fixture(Config::default());
        let response = f
            .interpreter
            .interpret(f.critter, "$orderby=Id desc&$skip=2&$top=3&$totalcount=true", &f.repo)
            .unwrap();
        assert_eq!(ids(&response), vec![8, 7, 6]);
        let result = response.output.items().unwrap();
        assert_eq!(result.skip, Some(2));
        assert_eq!(result.total_count, Some(10));
    }

    #[test]
    fn oftype_narrows_to_subtype() {
        let f = fixture(Config::default());
        let response = f
            .interpreter
            .interpret(f.critter, "$oftype=musicalcritter&$orderby=Id", &f.repo)
            .unwrap();
        assert_eq!(ids(&response), vec![4, 8]);
    }

    #[test]
    fn groupby_then_select_aggregates() {
        let f = fixture(Config::default());
        let response = f
            .interpreter
            .interpret(
                f.critter,
                "$groupby=Color&$orderby=Key&$select=Key as Color,this.count() as Total",
                &f.repo,
            )
            .unwrap();
        let rows = &response.output.items().unwrap().items;
        assert_eq!(rows.len(), 3);
        let Value::Map(first) = &rows[0] else {
            panic!("expected a projected row, got {:?}", rows[0]);
        };
        assert_eq!(first.get("Color"), Some(&Value::from("blue")));
        assert_eq!(first.get("Total"), Some(&Value::Int(3)));
        assert_eq!(response.item_type, f.interpreter.graph().value_type(ValueKind::Any).unwrap());
    }

    #[test]
    fn groups_keep_first_seen_order() {
        let f = fixture(Config::default());
        let response = f.interpreter.interpret(f.critter, "$groupby=Color", &f.repo).unwrap();
        let groups: Vec<(Value, Vec<i64>)> = response
            .output
            .items()
            .unwrap()
            .items
            .iter()
            .map(|row| {
                let Value::Group(group) = row else {
                    panic!("expected a group, got {row:?}");
                };
                let members = group
                    .items
                    .iter()
                    .map(|v| v.as_entity().unwrap().get("Id").as_i64().unwrap())
                    .collect();
                ((*group.key).clone(), members)
            })
            .collect();
        assert_eq!(
            groups,
            [
                (Value::from("green"), vec![1, 4, 7, 10]),
                (Value::from("blue"), vec![2, 5, 8]),
                (Value::from("red"), vec![3, 6, 9]),
            ]
        );
    }

    #[test]
    fn equal_keys_share_a_hash() {
        assert_eq!(group_hash(&Value::Float(0.0)), group_hash(&Value::Float(-0.0)));
        let a = Entity::new(MappedTypeId(1));
        a.set("Id", Value::Int(1));
        let b = Entity::new(MappedTypeId(1));
        b.set("Id", Value::Int(1));
        assert_eq!(Value::Object(a.clone()), Value::Object(b.clone()));
        assert_eq!(group_hash(&Value::Object(a)), group_hash(&Value::Object(b)));
    }

    #[test]
    fn scalar_projections() {
        let f = fixture(Config::default());
        let value = |qs: &str| {
            f.interpreter
                .interpret(f.critter, qs, &f.repo)
                .unwrap()
                .output
                .value()
                .cloned()
                .unwrap()
        };
        assert_eq!(value("$filter=Id gt 7&$projection=count"), Value::Int(3));
        assert_eq!(value("$filter=Id gt 70&$projection=any"), Value::Bool(false));
        assert_eq!(value("$select=Id&$projection=sum"), Value::Int(55));
        assert_eq!(value("$select=Id&$projection=max"), Value::Int(10));
        let err = f
            .interpreter
            .interpret(f.critter, "$filter=Id gt 70&$select=Id&$projection=min", &f.repo)
            .unwrap_err();
        assert_eq!(err, MappingError::EmptyResult);
    }

    #[test]
    fn unknown_or_unreadable_members_fail_compilation() {
        let f = fixture(Config::default());
        for qs in ["$filter=Weight gt 2", "$orderby=Secret"] {
            let err = f.interpreter.interpret(f.critter, qs, &f.repo).unwrap_err();
            assert_eq!(err.code(), "FilterCompilation", "{qs}");
        }
    }

    #[test]
    fn page_size_limits_apply_to_listings_only() {
        let config = Config {
            default_page_size: Some(4),
            max_page_size: Some(6),
            ..Config::default()
        };
        let f = fixture(config);
        let listing = f.interpreter.interpret(f.critter, "", &f.repo).unwrap();
        assert_eq!(listing.output.items().unwrap().len(), 4);
        let clamped = f.interpreter.interpret(f.critter, "$top=50", &f.repo).unwrap();
        assert_eq!(clamped.output.items().unwrap().len(), 6);
        let count = f
            .interpreter
            .interpret(f.critter, "$projection=count", &f.repo)
            .unwrap();
        assert_eq!(count.output.value(), Some(&Value::Int(10)));
    }

    #[test]
    fn parse_cache_returns_shared_plans() {
        let f = fixture(Config::default());
        let a = f.interpreter.parse("$filter=Id eq 1").unwrap();
        let b = f.interpreter.parse("$filter=Id eq 1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let uncached = fixture(Config::permissive());
        let a = uncached.interpreter.parse("$filter=Id eq 1").unwrap();
        let b = uncached.interpreter.parse("$filter=Id eq 1").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a, b);
    }

    #[test]
    fn expand_paths_are_canonicalized() {
        let f = fixture(Config::default());
        let response = f
            .interpreter
            .interpret(f.critter, "$expand=name", &f.repo)
            .unwrap();
        assert_eq!(response.expand, vec!["Name".to_owned()]);
        assert_eq!(f.interpreter.endpoint_for("/critters/").unwrap(), f.critter);
    }
}
