#![allow(missing_docs)]

mod common;

use std::sync::Arc;
use std::thread;

use restmap::{
    client::{Client, ClientResult},
    model::Value,
    query::Expr,
    store::Repository,
    types::TypeGraph,
    Config, MappingError,
};

const SEED: u64 = 0x5eed;

fn setup() -> (Arc<TypeGraph>, Client) {
    let graph = common::graph();
    let repo = Arc::new(Repository::new(Arc::clone(&graph)));
    let fedora = common::hat(&graph, 1, "Fedora");
    repo.insert(fedora.clone()).unwrap();
    for critter in common::critters(&graph, 10, SEED) {
        if critter.get("Id") == Value::Int(1) {
            critter.set("Hat", Value::Object(fedora.clone()));
        }
        repo.insert(critter).unwrap();
    }
    let client = common::loopback(&graph, &repo, Config::default());
    (graph, client)
}

#[test]
fn paged_listing_carries_metadata() {
    let (_graph, client) = setup();
    let query = client
        .query("Critter")
        .unwrap()
        .r#where(|c| c.member("Legs").at_least(0))
        .order_by_descending(|c| c.member("Id"))
        .skip(2)
        .take(3)
        .include_total_count();
    let page = client.execute(&query).unwrap().into_items().unwrap();
    assert_eq!(common::ids(&page.items), [8, 7, 6]);
    assert_eq!(page.skip, Some(2));
    assert_eq!(page.total_count, Some(10));
    assert!(page.url.unwrap().starts_with("critters?$filter="));
}

#[test]
fn subtype_restriction_returns_concrete_instances() {
    let (graph, client) = setup();
    let query = client
        .query("Critter")
        .unwrap()
        .of_type(&graph, "MusicalCritter")
        .order_by(|c| c.member("Id"));
    let page = client.execute(&query).unwrap().into_items().unwrap();
    assert_eq!(common::ids(&page.items), [4, 8]);
    let first = page.items[0].as_entity().unwrap();
    assert_eq!(first.type_id(), common::type_id(&graph, "MusicalCritter"));
    assert_eq!(first.get("Instrument"), Value::from("banjo"));
}

#[test]
fn grouped_projection_counts_every_critter() {
    let (_graph, client) = setup();
    let query = client
        .query("Critter")
        .unwrap()
        .group_by(|c| c.member("Color"))
        .select(|g| Expr::new_object([("Color", g.clone().member("Key")), ("Total", g.count())]));
    let page = client.execute(&query).unwrap().into_items().unwrap();
    let total: i64 = page
        .items
        .iter()
        .map(|row| match row {
            Value::Map(fields) => fields["Total"].as_i64().unwrap(),
            other => panic!("expected a map row, got {other:?}"),
        })
        .sum();
    assert_eq!(total, 10);
}

#[test]
fn scalar_projections_match_the_fixture() {
    let (graph, client) = setup();
    let expected = common::critters(&graph, 10, SEED)
        .iter()
        .filter(|c| c.get("Legs").as_i64().unwrap() > 4)
        .count() as i64;
    let query = client
        .query("Critter")
        .unwrap()
        .count_where(|c| c.member("Legs").greater_than(4));
    assert_eq!(client.execute(&query).unwrap(), ClientResult::Value(Value::Int(expected)));

    let sum = client.query("Critter").unwrap().sum(|c| c.member("Id"));
    assert_eq!(client.execute(&sum).unwrap(), ClientResult::Value(Value::Int(55)));
}

#[test]
fn references_resolve_through_the_client_unless_expanded() {
    let (_graph, client) = setup();
    let plain = client
        .query("Critter")
        .unwrap()
        .first_where(|c| c.member("Id").equals(1));
    let critter = client.execute(&plain).unwrap().into_value().unwrap();
    let Value::Reference(hat) = critter.as_entity().unwrap().get("Hat") else {
        panic!("hat should arrive as a reference");
    };
    assert_eq!(hat.uri(), "/hats/1");
    let resolved = hat.resolve(&client).unwrap();
    assert_eq!(resolved.as_entity().unwrap().get("HatType"), Value::from("Fedora"));

    let expanded = client
        .query("Critter")
        .unwrap()
        .expand(|c| c.member("Hat"))
        .first_where(|c| c.member("Id").equals(1));
    let critter = client.execute(&expanded).unwrap().into_value().unwrap();
    let hat = critter.as_entity().unwrap().get("Hat");
    assert_eq!(hat.as_entity().unwrap().get("HatType"), Value::from("Fedora"));
}

#[test]
fn server_errors_keep_their_kind() {
    let (_graph, client) = setup();
    let unknown = client
        .query("Critter")
        .unwrap()
        .r#where(|c| c.member("Wings").equals(2));
    assert!(matches!(
        client.execute(&unknown),
        Err(MappingError::FilterCompilation { .. })
    ));

    let hidden = client
        .query("Critter")
        .unwrap()
        .r#where(|c| c.member("Secret").equals("x"));
    assert!(matches!(
        client.execute(&hidden),
        Err(MappingError::FilterCompilation { .. })
    ));

    let unordered = client.query("Critter").unwrap().take(3);
    assert!(matches!(
        client.execute(&unordered),
        Err(MappingError::NotSupported(_))
    ));
}

#[test]
fn concurrent_queries_see_a_consistent_store() {
    let (_graph, client) = setup();
    thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                scope.spawn(move || {
                    (0..25)
                        .map(|_| {
                            let count = client.query("Critter").unwrap().count();
                            client.execute(&count).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for handle in handles {
            for result in handle.join().unwrap() {
                assert_eq!(result, ClientResult::Value(Value::Int(10)));
            }
        }
    });
}
