//! Normalize, render and interpret a query over a synthetic critter collection.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use restmap::{
    model::{Entity, Value},
    query::{normalize, Interpreter, RestQuery, UriQueryBuilder},
    store::Repository,
    types::{NativeType, PropertyDef, SourceType, TypeGraph, TypeRegistry, ValueKind},
    wire::{ExpandSet, JsonSerializer},
    Config,
};

const CRITTERS: i64 = 10_000;

fn graph() -> Arc<TypeGraph> {
    let registry = TypeRegistry::new().with_type(
        SourceType::resource("Critter")
            .property(PropertyDef::id("Id", NativeType::Value(ValueKind::Int32)))
            .property(PropertyDef::new("Name", NativeType::Value(ValueKind::String)))
            .property(PropertyDef::new("Legs", NativeType::Value(ValueKind::Int32))),
    );
    Arc::new(TypeGraph::new(registry).expect("bench graph"))
}

fn repository(graph: &Arc<TypeGraph>) -> Repository {
    let repo = Repository::new(Arc::clone(graph));
    let critter = graph.by_name("Critter").expect("critter").id;
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    for id in 0..CRITTERS {
        let entity = Entity::new(critter);
        entity.set("Id", Value::Int(id));
        entity.set("Name", Value::String(format!("critter {id:05}")));
        entity.set("Legs", Value::Int(rng.gen_range(0..=8)));
        repo.insert(entity).expect("insert");
    }
    repo
}

fn query_pipeline(c: &mut Criterion) {
    let graph = graph();
    let repo = repository(&graph);
    let interpreter = Interpreter::new(Arc::clone(&graph), Config::default());
    let endpoint = interpreter.endpoint_for("critters").expect("endpoint");
    let query = RestQuery::over(&graph, "Critter")
        .expect("query")
        .r#where(|c| c.member("Legs").greater_than(4))
        .r#where(|c| c.member("Name").starts_with("critter 0"))
        .order_by_descending(|c| c.member("Id"))
        .skip(10)
        .take(50);

    let mut group = c.benchmark_group("pipeline");
    group.bench_function("normalize_render", |b| {
        b.iter(|| {
            let plan = normalize(black_box(query.expression().expect("chain"))).expect("plan");
            black_box(UriQueryBuilder::new(&graph).build(&plan).expect("uri"))
        })
    });

    let uri = UriQueryBuilder::new(&graph)
        .render(query.expression().expect("chain"))
        .expect("uri");
    let query_string = uri.query_string();
    group.throughput(Throughput::Elements(CRITTERS as u64));
    group.bench_function("interpret_serialize", |b| {
        let serializer = JsonSerializer::new(&graph, "/");
        b.iter(|| {
            let response = interpreter
                .interpret(endpoint, black_box(&query_string), &repo)
                .expect("interpret");
            black_box(
                serializer
                    .serialize_output(&response.output, response.item_type, &ExpandSet::none())
                    .expect("serialize"),
            )
        })
    });
    group.finish();
}

criterion_group!(benches, query_pipeline);
criterion_main!(benches);
