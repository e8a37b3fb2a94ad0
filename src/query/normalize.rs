//! Reduction of operator chains to a canonical [`QueryPlan`].
//!
//! The chain is walked from the source outward. Consecutive filters merge into
//! one conjunction, consecutive projections compose, and filters, sort keys and
//! expansions that follow a projection are rebased onto the projection's input
//! so the plan only ever refers to members of the source element type. Shapes
//! that cannot be expressed in the server's fixed step order are rejected here,
//! before anything is sent.

use tracing::debug;

use crate::error::{MappingError, Result};
use crate::query::ast::{Projection, QueryExpr, SortDirection};
use crate::query::expr::Lambda;
use crate::types::MappedTypeId;

/// Primary sort key.
#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    /// Key selector over the (grouped) element.
    pub key: Lambda,
    /// Direction.
    pub direction: SortDirection,
}

/// Canonical, order-validated form of a query chain.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryPlan {
    /// Endpoint path of the source.
    pub source_uri: String,
    /// Declared element type of the source.
    pub source_type: MappedTypeId,
    /// Subtype restriction.
    pub of_type: Option<MappedTypeId>,
    /// Merged filter.
    pub filter: Option<Lambda>,
    /// Grouping key.
    pub group_by: Option<Lambda>,
    /// Sort key.
    pub order_by: Option<SortKey>,
    /// Offset.
    pub skip: Option<u64>,
    /// Limit.
    pub take: Option<u64>,
    /// Composed projection.
    pub select: Option<Lambda>,
    /// Expanded member paths, de-duplicated case-insensitively.
    pub expand: Vec<String>,
    /// Whether the total count was requested.
    pub include_total_count: bool,
    /// Terminal projection.
    pub projection: Projection,
}

impl QueryPlan {
    fn new(source_type: MappedTypeId, source_uri: String) -> Self {
        Self {
            source_uri,
            source_type,
            of_type: None,
            filter: None,
            group_by: None,
            order_by: None,
            skip: None,
            take: None,
            select: None,
            expand: Vec::new(),
            include_total_count: false,
            projection: Projection::Enumerable,
        }
    }

    /// Element type the filter and sort key are evaluated against.
    pub fn element_type(&self) -> MappedTypeId {
        self.of_type.unwrap_or(self.source_type)
    }

    /// Whether any paging operator is present.
    pub fn is_paged(&self) -> bool {
        self.skip.is_some() || self.take.is_some()
    }

    /// Rebuilds the operator chain in canonical order. Normalizing the result
    /// yields this plan again.
    pub fn to_expression(&self) -> QueryExpr {
        let mut expr = QueryExpr::Source {
            element_type: self.source_type,
            uri: self.source_uri.clone(),
        };
        if let Some(element_type) = self.of_type {
            expr = QueryExpr::OfType {
                source: Box::new(expr),
                element_type,
            };
        }
        for path in &self.expand {
            expr = QueryExpr::Expand {
                source: Box::new(expr),
                path: Lambda::from_member_path(path),
            };
        }
        if let Some(predicate) = &self.filter {
            expr = QueryExpr::Where {
                source: Box::new(expr),
                predicate: predicate.clone(),
            };
        }
        if let Some(key) = &self.group_by {
            expr = QueryExpr::GroupBy {
                source: Box::new(expr),
                key: key.clone(),
            };
        }
        if let Some(sort) = &self.order_by {
            expr = QueryExpr::OrderBy {
                source: Box::new(expr),
                key: sort.key.clone(),
                direction: sort.direction,
            };
        }
        if let Some(count) = self.skip {
            expr = QueryExpr::Skip {
                source: Box::new(expr),
                count,
            };
        }
        if let Some(count) = self.take {
            expr = QueryExpr::Take {
                source: Box::new(expr),
                count,
            };
        }
        if let Some(selector) = &self.select {
            expr = QueryExpr::Select {
                source: Box::new(expr),
                selector: selector.clone(),
            };
        }
        if self.include_total_count {
            expr = QueryExpr::IncludeTotalCount {
                source: Box::new(expr),
            };
        }
        if self.projection != Projection::Enumerable {
            expr = QueryExpr::Terminal {
                source: Box::new(expr),
                projection: self.projection,
                argument: None,
            };
        }
        expr
    }
}

/// Normalizes a chain into its canonical plan.
pub fn normalize(expr: &QueryExpr) -> Result<QueryPlan> {
    let chain = desugar(expr.chain());
    let mut nodes = chain.iter();
    let mut plan = match nodes.next() {
        Some(Step::Node(QueryExpr::Source { element_type, uri })) => {
            QueryPlan::new(*element_type, uri.clone())
        }
        _ => return Err(MappingError::not_supported("query chain has no source")),
    };
    let mut state = Walk::default();
    for step in nodes {
        state.apply(&mut plan, step)?;
    }
    debug!(
        uri = %plan.source_uri,
        filter = plan.filter.is_some(),
        select = plan.select.is_some(),
        projection = %plan.projection,
        "query.normalize.planned"
    );
    Ok(plan)
}

/// Pure tree-to-tree rewrite: the canonical chain of `expr`.
pub fn rewrite(expr: &QueryExpr) -> Result<QueryExpr> {
    Ok(normalize(expr)?.to_expression())
}

/// Chain element after terminal arguments have been split off.
enum Step<'a> {
    Node(&'a QueryExpr),
    Where(Lambda),
    Select(Lambda),
}

fn desugar(chain: Vec<&QueryExpr>) -> Vec<Step<'_>> {
    let mut steps = Vec::with_capacity(chain.len() + 1);
    for node in chain {
        if let QueryExpr::Terminal {
            projection,
            argument: Some(argument),
            ..
        } = node
        {
            if projection.takes_predicate() {
                steps.push(Step::Where(argument.clone()));
            } else {
                steps.push(Step::Select(argument.clone()));
            }
        }
        steps.push(Step::Node(node));
    }
    steps
}

#[derive(Default)]
struct Walk {
    paged: bool,
    grouped: bool,
    terminated: bool,
}

fn reject(operator: &str, reason: &str) -> MappingError {
    debug!(operator, reason, "query.normalize.rejected");
    MappingError::not_supported(format!("{operator}: {reason}"))
}

fn simplified(lambda: &Lambda) -> Lambda {
    Lambda::new(lambda.parameter.clone(), lambda.body.clone().simplify())
}

impl Walk {
    /// Rebases `lambda` onto the projection's input, if a projection is pending.
    fn rebase(plan: &QueryPlan, lambda: &Lambda) -> Lambda {
        match &plan.select {
            Some(selector) => lambda.compose(selector),
            None => simplified(lambda),
        }
    }

    fn apply(&mut self, plan: &mut QueryPlan, step: &Step<'_>) -> Result<()> {
        let operator = match step {
            Step::Node(node) => node.operator(),
            Step::Where(_) => "Where",
            Step::Select(_) => "Select",
        };
        if self.terminated {
            return Err(reject(operator, "no operator may follow a terminal projection"));
        }
        match step {
            Step::Where(predicate) => self.filter(plan, predicate),
            Step::Select(selector) => {
                self.project(plan, selector);
                Ok(())
            }
            Step::Node(node) => self.node(plan, node),
        }
    }

    fn filter(&mut self, plan: &mut QueryPlan, predicate: &Lambda) -> Result<()> {
        if self.paged {
            return Err(reject("Where", "filtering after Skip/Take is not supported"));
        }
        if self.grouped {
            return Err(reject("Where", "filtering after GroupBy is not supported"));
        }
        let predicate = Self::rebase(plan, predicate);
        plan.filter = Some(match plan.filter.take() {
            Some(existing) => {
                debug!("query.normalize.merged_where");
                existing.and_also(&predicate)
            }
            None => predicate,
        });
        Ok(())
    }

    fn project(&mut self, plan: &mut QueryPlan, selector: &Lambda) {
        let composed = Self::rebase(plan, selector);
        if plan.select.is_some() {
            debug!("query.normalize.composed_select");
        }
        plan.select = Some(composed);
    }

    fn node(&mut self, plan: &mut QueryPlan, node: &QueryExpr) -> Result<()> {
        match node {
            QueryExpr::Source { .. } => Err(reject("Source", "a chain has exactly one source")),
            QueryExpr::Where { predicate, .. } => self.filter(plan, predicate),
            QueryExpr::Select { selector, .. } => {
                self.project(plan, selector);
                Ok(())
            }
            QueryExpr::OrderBy { key, direction, .. } => {
                if self.paged {
                    return Err(reject("OrderBy", "requires OrderBy before paging"));
                }
                if plan.order_by.is_some() {
                    debug!("query.normalize.replaced_order");
                }
                plan.order_by = Some(SortKey {
                    key: Self::rebase(plan, key),
                    direction: *direction,
                });
                Ok(())
            }
            QueryExpr::GroupBy { key, .. } => {
                if self.grouped {
                    return Err(reject("GroupBy", "only one GroupBy allowed"));
                }
                if self.paged {
                    return Err(reject("GroupBy", "grouping after Skip/Take is not supported"));
                }
                if plan.select.is_some() {
                    return Err(reject("GroupBy", "grouping after Select is not supported"));
                }
                if plan.order_by.is_some() {
                    return Err(reject("GroupBy", "grouping after OrderBy is not supported"));
                }
                self.grouped = true;
                plan.group_by = Some(simplified(key));
                Ok(())
            }
            QueryExpr::Skip { count, .. } => {
                self.page(plan, "Skip")?;
                if plan.skip.is_some() {
                    return Err(reject("Skip", "only one Skip/Take allowed"));
                }
                if let Some(take) = plan.take {
                    plan.take = Some(take.saturating_sub(*count));
                }
                plan.skip = Some(*count);
                Ok(())
            }
            QueryExpr::Take { count, .. } => {
                self.page(plan, "Take")?;
                if plan.take.is_some() {
                    return Err(reject("Take", "only one Skip/Take allowed"));
                }
                plan.take = Some(*count);
                Ok(())
            }
            QueryExpr::OfType { element_type, .. } => {
                if self.paged || self.grouped || plan.select.is_some() {
                    return Err(reject(
                        "OfType",
                        "type restriction must precede Skip, Take, GroupBy and Select",
                    ));
                }
                plan.of_type = Some(*element_type);
                Ok(())
            }
            QueryExpr::Expand { path, .. } => {
                if self.grouped {
                    return Err(reject("Expand", "expansion after GroupBy is not supported"));
                }
                let rebased = Self::rebase(plan, path);
                let path = rebased
                    .member_path()
                    .ok_or_else(|| reject("Expand", "expansion must be a member path"))?;
                if !plan.expand.iter().any(|p| p.eq_ignore_ascii_case(&path)) {
                    plan.expand.push(path);
                }
                Ok(())
            }
            QueryExpr::IncludeTotalCount { .. } => {
                plan.include_total_count = true;
                Ok(())
            }
            QueryExpr::Terminal { projection, .. } => {
                self.terminated = true;
                plan.projection = *projection;
                Ok(())
            }
        }
    }

    fn page(&mut self, plan: &QueryPlan, operator: &str) -> Result<()> {
        if plan.order_by.is_none() {
            return Err(reject(operator, "requires OrderBy before paging"));
        }
        self.paged = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::RestQuery;
    use crate::query::expr::{lambda, Expr};

    fn critters() -> RestQuery {
        RestQuery::from_source(MappedTypeId(10), "critters")
    }

    fn plan(q: RestQuery) -> Result<QueryPlan> {
        normalize(q.expression()?)
    }

    #[test]
    fn consecutive_wheres_merge() {
        let merged = plan(
            critters()
                .r#where(|c| c.member("Id").greater_than(1))
                .r#where(|c| c.member("Name").equals("Bob")),
        )
        .unwrap();
        let expected = lambda(|c| {
            c.clone()
                .member("Id")
                .greater_than(1)
                .and(c.member("Name").equals("Bob"))
        });
        assert_eq!(merged.filter, Some(expected));
    }

    #[test]
    fn where_after_select_is_rebased() {
        let p = plan(
            critters()
                .r#where(|c| c.member("Id").greater_than(1))
                .select(|c| Expr::new_object([("N", c.member("Name"))]))
                .r#where(|r| r.member("N").starts_with("B")),
        )
        .unwrap();
        let expected = lambda(|c| {
            c.clone()
                .member("Id")
                .greater_than(1)
                .and(c.member("Name").starts_with("B"))
        });
        assert_eq!(p.filter, Some(expected));
        assert_eq!(
            p.select,
            Some(lambda(|c| Expr::new_object([("N", c.member("Name"))])))
        );
    }

    #[test]
    fn selects_compose() {
        let p = plan(
            critters()
                .select(|c| c.member("Hat"))
                .select(|h| h.member("Name")),
        )
        .unwrap();
        assert_eq!(p.select, Some(lambda(|c| c.member("Hat").member("Name"))));
    }

    #[test]
    fn paging_requires_prior_order() {
        let err = plan(critters().skip(10).take(10)).unwrap_err();
        assert_eq!(err.code(), "NotSupported");
        assert!(err.to_string().contains("requires OrderBy before paging"));

        let p = plan(critters().order_by(|c| c.member("Name")).skip(10).take(10)).unwrap();
        assert_eq!((p.skip, p.take), (Some(10), Some(10)));
    }

    #[test]
    fn second_skip_or_take_is_rejected() {
        let q = critters().order_by(|c| c.member("Id")).skip(1).skip(2);
        assert!(plan(q)
            .unwrap_err()
            .to_string()
            .contains("only one Skip/Take allowed"));
        let q = critters().order_by(|c| c.member("Id")).take(1).take(2);
        assert_eq!(plan(q).unwrap_err().code(), "NotSupported");
    }

    #[test]
    fn skip_after_take_folds() {
        let p = plan(critters().order_by(|c| c.member("Id")).take(10).skip(3)).unwrap();
        assert_eq!((p.skip, p.take), (Some(3), Some(7)));
        let p = plan(critters().order_by(|c| c.member("Id")).take(2).skip(5)).unwrap();
        assert_eq!(p.take, Some(0));
    }

    #[test]
    fn terminal_arguments_desugar() {
        let p = plan(critters().first_where(|c| c.member("Id").equals(5))).unwrap();
        assert_eq!(p.filter, Some(lambda(|c| c.member("Id").equals(5))));
        assert_eq!(p.projection, Projection::First);

        let p = plan(critters().sum(|c| c.member("Weight"))).unwrap();
        assert_eq!(p.select, Some(lambda(|c| c.member("Weight"))));
        assert_eq!(p.projection, Projection::Sum);
    }

    #[test]
    fn nothing_follows_a_terminal() {
        let q = RestQuery::from_expr(QueryExpr::Take {
            source: Box::new(critters().count().expression().unwrap().clone()),
            count: 1,
        });
        assert_eq!(plan(q).unwrap_err().code(), "NotSupported");
    }

    #[test]
    fn grouping_rules() {
        let grouped = critters()
            .group_by(|c| c.member("Name"))
            .select(|g| g.count());
        assert!(plan(grouped.clone()).is_ok());
        assert!(plan(grouped.r#where(|n| n.greater_than(1))).is_err());
        assert!(plan(critters().select(|c| c.member("Hat")).group_by(|h| h.member("Name"))).is_err());
        assert!(plan(
            critters()
                .group_by(|c| c.member("Name"))
                .group_by(|g| g.member("Key"))
        )
        .is_err());
    }

    #[test]
    fn expansion_paths_are_rebased_and_deduplicated() {
        let p = plan(
            critters()
                .expand(|c| c.member("Hat"))
                .expand(|c| c.member("hat"))
                .expand(|c| c.member("Farm").member("Critters")),
        )
        .unwrap();
        assert_eq!(p.expand, ["Hat", "Farm.Critters"]);
        assert!(plan(critters().expand(|c| c.member("Name").to_upper())).is_err());
    }

    #[test]
    fn later_order_replaces_earlier() {
        let p = plan(
            critters()
                .order_by(|c| c.member("Name"))
                .order_by_descending(|c| c.member("Id")),
        )
        .unwrap();
        let sort = p.order_by.unwrap();
        assert_eq!(sort.key, lambda(|c| c.member("Id")));
        assert_eq!(sort.direction, SortDirection::Descending);
    }

    #[test]
    fn canonical_chain_is_a_fixed_point() {
        let p = plan(
            critters()
                .r#where(|c| c.member("Id").greater_than(2))
                .order_by(|c| c.member("Name"))
                .take(5)
                .skip(1)
                .select(|c| c.member("Name"))
                .include_total_count()
                .first(),
        )
        .unwrap();
        let again = normalize(&p.to_expression()).unwrap();
        assert_eq!(again, p);
        assert_eq!(rewrite(&p.to_expression()).unwrap(), p.to_expression());
    }
}
