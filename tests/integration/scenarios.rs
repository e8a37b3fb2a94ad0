#![allow(missing_docs)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use restmap::{
    model::{ResourceLoader, Value},
    query::{lambda, normalize, Expr, Interpreter, RestQuery, UriQueryBuilder},
    types::{MappedTypeId, NativeType, PropertyDef, SourceType, TypeGraph, TypeRegistry},
    wire::{DefaultContext, JsonDeserializer},
    Config, MappingError, Result,
};
use serde_json::json;

#[test]
fn filter_on_id_round_trips_through_the_interpreter() {
    let graph = common::graph();
    let repo = common::repository(&graph, 10, 7);
    let interpreter = Interpreter::new(graph.clone(), Config::default());
    let builder = UriQueryBuilder::new(&graph);

    let query = RestQuery::over(&graph, "ICritter")
        .unwrap()
        .r#where(|c| c.member("Id").equals(5));
    let uri = builder.render(query.expression().unwrap()).unwrap();
    assert_eq!(uri.path, "critters");
    assert_eq!(uri.parameter("$filter"), Some("Id eq 5"));

    let endpoint = interpreter.endpoint_for(&uri.path).unwrap();
    let response = interpreter
        .interpret(endpoint, &uri.query_string(), repo.as_ref())
        .unwrap();
    assert_eq!(common::ids(&response.output.items().unwrap().items), [5]);

    let missing = RestQuery::over(&graph, "ICritter")
        .unwrap()
        .first_where(|c| c.member("Id").equals(42));
    let uri = builder.render(missing.expression().unwrap()).unwrap();
    let err = interpreter
        .interpret(endpoint, &uri.query_string(), repo.as_ref())
        .unwrap_err();
    assert_eq!(err, MappingError::EmptyResult);
}

#[test]
fn chained_wheres_and_select_collapse_to_one_filter_and_one_projection() {
    let graph = common::graph();
    let query = RestQuery::over(&graph, "Critter")
        .unwrap()
        .r#where(|c| c.member("Id").greater_than(1))
        .r#where(|c| c.member("Legs").less_than(8))
        .select(|c| Expr::new_object([("N", c.clone().member("Name")), ("L", c.member("Legs"))]))
        .r#where(|r| r.member("L").greater_than(2));
    let plan = normalize(query.expression().unwrap()).unwrap();

    let expected_filter = lambda(|c| {
        c.clone()
            .member("Id")
            .greater_than(1)
            .and(c.clone().member("Legs").less_than(8))
            .and(c.member("Legs").greater_than(2))
    });
    let expected_select =
        lambda(|c| Expr::new_object([("N", c.clone().member("Name")), ("L", c.member("Legs"))]));
    assert_eq!(plan.filter, Some(expected_filter));
    assert_eq!(plan.select, Some(expected_select));
}

#[test]
fn paging_needs_an_order() {
    let graph = common::graph();
    let unordered = RestQuery::over(&graph, "Critter").unwrap().skip(10).take(10);
    let err = normalize(unordered.expression().unwrap()).unwrap_err();
    assert!(matches!(err, MappingError::NotSupported(_)));

    let ordered = RestQuery::over(&graph, "Critter")
        .unwrap()
        .order_by(|c| c.member("Name"))
        .skip(10)
        .take(10);
    let uri = UriQueryBuilder::new(&graph)
        .render(ordered.expression().unwrap())
        .unwrap();
    assert_eq!(uri.query_string(), "$orderby=Name&$skip=10&$top=10");
}

struct CountingLoader {
    graph: std::sync::Arc<TypeGraph>,
    calls: AtomicUsize,
}

impl ResourceLoader for CountingLoader {
    fn load(&self, uri: &str, _expected: MappedTypeId) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(uri, "/hats/3");
        Ok(Value::Object(common::hat(&self.graph, 3, "Fedora")))
    }
}

#[test]
fn uri_only_payload_becomes_a_lazy_reference() {
    let graph = common::graph();
    let ihat = graph.resolve(&NativeType::named("IHat")).unwrap();
    let value = JsonDeserializer::new(&graph)
        .deserialize(&json!({"_type": "Hat", "_uri": "/hats/3"}), ihat, &DefaultContext, None)
        .unwrap();
    let Value::Reference(reference) = value else {
        panic!("expected a lazy reference, got {value:?}");
    };
    assert_eq!(reference.uri(), "/hats/3");
    assert!(!reference.is_resolved());

    let loader = CountingLoader {
        graph: graph.clone(),
        calls: AtomicUsize::new(0),
    };
    assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    let hat = reference.resolve(&loader).unwrap();
    assert_eq!(hat.as_entity().unwrap().get("HatType"), Value::from("Fedora"));
    reference.resolve(&loader).unwrap();
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn self_referencing_generic_resolves_once() {
    let graph = TypeGraph::new(
        TypeRegistry::new().with_type(
            SourceType::value_object("Tree")
                .generic_arguments(vec![NativeType::named("Tree")])
                .property(PropertyDef::new("Label", common::string()))
                .property(PropertyDef::new("Children", NativeType::list(NativeType::named("Tree")))),
        ),
    )
    .unwrap();
    let tree = graph.by_name("Tree").unwrap();
    assert_eq!(tree.generic_arguments, vec![tree.id]);
    assert_eq!(graph.resolve(&NativeType::named("Tree")).unwrap(), tree.id);

    let children = tree.property("Children").unwrap();
    let list = graph.get(children.property_type).unwrap();
    assert_eq!(list.element_type(), Some(tree.id));
}
