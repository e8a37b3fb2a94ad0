#![allow(missing_docs)]

mod common;

use proptest::prelude::*;
use restmap::{
    query::{lambda, normalize, Expr, RestQuery},
    MappingError,
};

#[derive(Clone, Debug)]
struct Predicate {
    member: &'static str,
    op: u8,
    constant: i64,
}

impl Predicate {
    fn build(&self, c: Expr) -> Expr {
        let member = c.member(self.member);
        match self.op {
            0 => member.equals(self.constant),
            1 => member.greater_than(self.constant),
            2 => member.less_than(self.constant),
            _ => member.not_equals(self.constant),
        }
    }
}

fn predicate() -> impl Strategy<Value = Predicate> {
    (prop_oneof![Just("Id"), Just("Legs")], 0u8..4, -5i64..20).prop_map(|(member, op, constant)| {
        Predicate {
            member,
            op,
            constant,
        }
    })
}

#[derive(Clone, Debug)]
enum Op {
    Where(Predicate),
    OrderBy(&'static str, bool),
    Skip(u64),
    Take(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        predicate().prop_map(Op::Where),
        (prop_oneof![Just("Id"), Just("Name")], any::<bool>()).prop_map(|(m, d)| Op::OrderBy(m, d)),
        (0u64..50).prop_map(Op::Skip),
        (0u64..50).prop_map(Op::Take),
    ]
}

fn paging_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::OrderBy("Name", false)),
        (0u64..50).prop_map(Op::Skip),
        (0u64..50).prop_map(Op::Take),
    ]
}

fn build(query: RestQuery, ops: &[Op]) -> RestQuery {
    ops.iter().fold(query, |q, op| match op.clone() {
        Op::Where(p) => q.r#where(move |c| p.build(c)),
        Op::OrderBy(member, false) => q.order_by(move |c| c.member(member)),
        Op::OrderBy(member, true) => q.order_by_descending(move |c| c.member(member)),
        Op::Skip(n) => q.skip(n),
        Op::Take(n) => q.take(n),
    })
}

/// Whether a chain of `OrderBy`/`Skip`/`Take` must be rejected: paging before
/// any order, an order after paging, or a repeated Skip or Take.
fn must_reject(ops: &[Op]) -> bool {
    let (mut ordered, mut paged, mut skips, mut takes) = (false, false, 0, 0);
    for op in ops {
        match op {
            Op::OrderBy(..) if paged => return true,
            Op::OrderBy(..) => ordered = true,
            Op::Skip(_) | Op::Take(_) if !ordered => return true,
            Op::Skip(_) => {
                skips += 1;
                paged = true;
            }
            Op::Take(_) => {
                takes += 1;
                paged = true;
            }
            Op::Where(_) => {}
        }
        if skips > 1 || takes > 1 {
            return true;
        }
    }
    false
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn normalization_is_idempotent(ops in proptest::collection::vec(op(), 0..8), terminal in 0u8..4) {
        let graph = common::graph();
        let mut query = build(RestQuery::over(&graph, "Critter").unwrap(), &ops);
        query = match terminal {
            0 => query,
            1 => query.first(),
            2 => query.count(),
            _ => query.include_total_count(),
        };
        if let Ok(plan) = normalize(query.expression().unwrap()) {
            let again = normalize(&plan.to_expression()).unwrap();
            prop_assert_eq!(again, plan);
        }
    }

    #[test]
    fn consecutive_filters_merge(p1 in predicate(), p2 in predicate()) {
        let graph = common::graph();
        let source = RestQuery::over(&graph, "Critter").unwrap();
        let (a, b) = (p1.clone(), p2.clone());
        let chained = source.clone().r#where(move |c| a.build(c)).r#where(move |c| b.build(c));
        let merged = source.where_lambda(lambda(|c| p1.build(c.clone()).and(p2.build(c))));
        prop_assert_eq!(
            normalize(chained.expression().unwrap()).unwrap(),
            normalize(merged.expression().unwrap()).unwrap()
        );
    }

    #[test]
    fn paging_order_is_enforced(ops in proptest::collection::vec(paging_op(), 0..6)) {
        let graph = common::graph();
        let query = build(RestQuery::over(&graph, "Critter").unwrap(), &ops);
        match normalize(query.expression().unwrap()) {
            Ok(_) => prop_assert!(!must_reject(&ops), "accepted {:?}", ops),
            Err(MappingError::NotSupported(_)) => prop_assert!(must_reject(&ops), "rejected {:?}", ops),
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
        }
    }
}
