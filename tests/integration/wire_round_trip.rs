#![allow(missing_docs)]

mod common;

use parking_lot::Mutex;
use proptest::prelude::*;
use restmap::{
    model::{Entity, Value},
    types::{HttpMethod, PropertySpec},
    wire::{
        Access, DefaultContext, DeserializationContext, ExpandSet, JsonDeserializer, JsonSerializer,
        PolicyContext,
    },
    Result,
};
use serde_json::json;
use time::OffsetDateTime;

#[derive(Clone, Debug)]
struct CritterSpec {
    id: i64,
    name: String,
    color: usize,
    legs: i64,
    weapons: Vec<(i64, i64)>,
    born: Option<i64>,
    instrument: Option<String>,
}

fn critter_spec() -> impl Strategy<Value = CritterSpec> {
    (
        1i64..10_000,
        "[a-zA-Z ^*!-]{0,12}",
        0usize..3,
        0i64..9,
        proptest::collection::vec((0i64..100, -50i64..50), 0..4),
        proptest::option::of(0i64..4_000_000_000),
        proptest::option::of("[a-z]{1,8}"),
    )
        .prop_map(|(id, name, color, legs, weapons, born, instrument)| CritterSpec {
            id,
            name,
            color,
            legs,
            weapons,
            born,
            instrument,
        })
}

fn materialize(graph: &restmap::types::TypeGraph, spec: &CritterSpec) -> Entity {
    let ty = if spec.instrument.is_some() { "MusicalCritter" } else { "Critter" };
    let critter = Entity::new(common::type_id(graph, ty));
    critter.set("Id", Value::Int(spec.id));
    critter.set("Name", spec.name.as_str().into());
    critter.set("Color", Value::Enum(common::COLORS[spec.color].to_owned()));
    critter.set("Legs", Value::Int(spec.legs));
    critter.set(
        "Weapons",
        Value::List(
            spec.weapons
                .iter()
                .map(|(id, strength)| common::weapon(graph, *id, *strength))
                .collect(),
        ),
    );
    if let Some(secs) = spec.born {
        let born = OffsetDateTime::from_unix_timestamp(secs).expect("timestamp in range");
        critter.set("Born", Value::DateTime(born));
    }
    if let Some(instrument) = &spec.instrument {
        critter.set("Instrument", instrument.as_str().into());
    }
    critter
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn serialized_critters_deserialize_to_equal_values(spec in critter_spec()) {
        let graph = common::graph();
        let expected = common::type_id(&graph, "Critter");
        let original = Value::Object(materialize(&graph, &spec));

        let json = JsonSerializer::new(&graph, "/")
            .serialize(&original, expected, &ExpandSet::all())
            .unwrap();
        let back = JsonDeserializer::new(&graph)
            .deserialize(&json, expected, &DefaultContext, None)
            .unwrap();
        prop_assert_eq!(back, original);
    }
}

/// Records every property write.
#[derive(Default)]
struct RecordingContext {
    writes: Mutex<Vec<String>>,
}

impl DeserializationContext for RecordingContext {
    fn set_property(&self, target: &Entity, property: &PropertySpec, value: Value) -> Result<()> {
        self.writes.lock().push(property.name.clone());
        property.set_on(target, value);
        Ok(())
    }
}

#[test]
fn patches_touch_only_changed_properties() {
    let graph = common::graph();
    let critter = common::critters(&graph, 1, 3).remove(0);
    let before_color = critter.get("Color");
    let ctx = RecordingContext::default();

    JsonDeserializer::new(&graph)
        .deserialize(
            &json!({"name": "critter 01", "legs": 99}),
            common::type_id(&graph, "Critter"),
            &ctx,
            Some(Value::Object(critter.clone())),
        )
        .unwrap();

    assert_eq!(*ctx.writes.lock(), ["Legs"]);
    assert_eq!(critter.get("Legs"), Value::Int(99));
    assert_eq!(critter.get("Name"), Value::from("critter 01"));
    assert_eq!(critter.get("Color"), before_color);
}

#[test]
fn collection_items_are_patched_removed_and_appended() {
    let graph = common::graph();
    let critter = common::critters(&graph, 1, 3).remove(0);
    critter.set(
        "Weapons",
        Value::List(vec![
            common::weapon(&graph, 1, 1),
            common::weapon(&graph, 2, 2),
            common::weapon(&graph, 3, 3),
        ]),
    );

    JsonDeserializer::new(&graph)
        .deserialize(
            &json!({"weapons": [
                {"*@Id": 1, "strength": 50},
                {"-@Id": 2},
                {"id": 4, "strength": 4}
            ]}),
            common::type_id(&graph, "Critter"),
            &DefaultContext,
            Some(Value::Object(critter.clone())),
        )
        .unwrap();

    let Value::List(weapons) = critter.get("Weapons") else {
        panic!("weapons must stay a list");
    };
    assert_eq!(common::ids(&weapons), [1, 3, 4]);
    assert_eq!(weapons[0].as_entity().unwrap().get("Strength"), Value::Int(50));
}

#[test]
fn denied_item_operation_rejects_the_whole_patch() {
    let graph = common::graph();
    let critter = common::critters(&graph, 1, 3).remove(0);
    critter.set(
        "Weapons",
        Value::List(vec![common::weapon(&graph, 1, 1), common::weapon(&graph, 2, 2)]),
    );
    let Value::List(before) = critter.get("Weapons") else {
        panic!("weapons must be a list");
    };
    let first = before[0].as_entity().unwrap().clone();
    let no_deletes = PolicyContext::new(|_: &PropertySpec, method| {
        if method == HttpMethod::Delete {
            Access::Deny
        } else {
            Access::Allow
        }
    });

    let err = JsonDeserializer::new(&graph)
        .deserialize(
            &json!({"legs": 12, "weapons": [{"*@id": 1, "strength": 99}, {"-@id": 2}]}),
            common::type_id(&graph, "Critter"),
            &no_deletes,
            Some(Value::Object(critter.clone())),
        )
        .unwrap_err();

    assert!(matches!(err, restmap::MappingError::AccessDenied { method: HttpMethod::Delete, .. }));
    assert_eq!(first.get("Strength"), Value::Int(1));
    assert_ne!(critter.get("Legs"), Value::Int(12));
    let Value::List(after) = critter.get("Weapons") else {
        panic!("weapons must stay a list");
    };
    assert_eq!(common::ids(&after), [1, 2]);
    assert!(after[0].as_entity().unwrap().ptr_eq(&first));
}
