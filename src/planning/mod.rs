//! Request planning: decide which remote operations a selector needs.
//!
//! Each backend describes what it can return as a list of capability groups.
//! A group is one kind of remote operation (search, fetch, link, fetch of
//! linked records) together with the fields it supplies. Planning happens
//! before any network call: the requested selector is checked against the
//! union of all groups, the groups it touches are collected, prerequisites
//! are added and the number of requests is estimated.

use serde::Serialize;

use crate::engine::QueryError;
use crate::models::Shape;
use crate::selector::{Selector, SelectorError};
use crate::sources::Backend;

bitflags::bitflags! {
    /// A set of remote operations
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Operations: u8 {
        const SEARCH = 1 << 0;
        const FETCH = 1 << 1;
        const LINK = 1 << 2;
        const LINK_FETCH = 1 << 3;
    }
}

/// One kind of remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Find matching records
    Search,
    /// Retrieve details of found records
    Fetch,
    /// Resolve references and citations
    Link,
    /// Retrieve details of linked records
    LinkFetch,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Search,
        Operation::Fetch,
        Operation::Link,
        Operation::LinkFetch,
    ];

    pub fn flag(self) -> Operations {
        match self {
            Operation::Search => Operations::SEARCH,
            Operation::Fetch => Operations::FETCH,
            Operation::Link => Operations::LINK,
            Operation::LinkFetch => Operations::LINK_FETCH,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operation::Search => "search",
            Operation::Fetch => "fetch",
            Operation::Link => "link",
            Operation::LinkFetch => "link_fetch",
        }
    }
}

impl Operations {
    /// The operations in this set, in pipeline order
    pub fn list(self) -> Vec<Operation> {
        Operation::ALL
            .into_iter()
            .filter(|op| self.contains(op.flag()))
            .collect()
    }
}

/// Estimated request count of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationCost {
    /// A fixed number of requests per query
    PerQuery(u64),
    /// One request per expected record
    PerRecord,
    /// One request per page of expected records, at least one
    PerPage(u64),
}

impl OperationCost {
    fn estimate(self, expected_records: u64) -> u64 {
        match self {
            OperationCost::PerQuery(n) => n,
            OperationCost::PerRecord => expected_records,
            OperationCost::PerPage(size) => expected_records.div_ceil(size.max(1)).max(1),
        }
    }
}

/// Fields one remote operation can supply
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityGroup {
    pub operation: Operation,
    pub fields: Selector,
    /// Operations that must run first
    pub requires: Operations,
    pub cost: OperationCost,
    /// Runs regardless of the selected fields
    pub mandatory: bool,
}

impl CapabilityGroup {
    /// Group with no prerequisites costing one request per query
    pub fn new(operation: Operation, fields: Selector) -> Self {
        Self {
            operation,
            fields,
            requires: Operations::empty(),
            cost: OperationCost::PerQuery(1),
            mandatory: false,
        }
    }

    pub fn requires(mut self, operations: Operations) -> Self {
        self.requires = operations;
        self
    }

    pub fn cost(mut self, cost: OperationCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }
}

/// Plans requests for one backend and record shape
#[derive(Debug, Clone)]
pub struct Planner {
    backend: Backend,
    groups: Vec<CapabilityGroup>,
    available: Selector,
}

impl Planner {
    /// Build a planner; every group must describe `shape`
    pub fn new(
        backend: Backend,
        shape: Shape,
        groups: Vec<CapabilityGroup>,
    ) -> Result<Self, SelectorError> {
        let available = groups
            .iter()
            .try_fold(Selector::none(shape), |acc, group| acc.union(&group.fields))?;

        Ok(Self {
            backend,
            groups,
            available,
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn groups(&self) -> &[CapabilityGroup] {
        &self.groups
    }

    /// Everything the backend can return
    pub fn available(&self) -> &Selector {
        &self.available
    }

    /// Work out the operations `selector` needs and what they cost
    pub fn plan(&self, selector: &Selector, expected_records: u64) -> Result<ExecutionPlan, QueryError> {
        let missing = self.available.overselected(selector)?;
        if !missing.is_empty() {
            return Err(QueryError::NotSupported {
                backend: self.backend,
                fields: missing,
            });
        }

        let mut operations = Operations::empty();
        for group in &self.groups {
            if group.mandatory || selector.any_of_fields(&group.fields)? {
                operations |= group.operation.flag();
            }
        }

        loop {
            let closed = self
                .groups
                .iter()
                .filter(|g| operations.contains(g.operation.flag()))
                .fold(operations, |acc, g| acc | g.requires);
            if closed == operations {
                break;
            }
            operations = closed;
        }

        let estimated_requests = self
            .groups
            .iter()
            .filter(|g| operations.contains(g.operation.flag()))
            .map(|g| g.cost.estimate(expected_records))
            .sum();

        tracing::debug!(
            backend = %self.backend,
            operations = ?operations.list(),
            estimated_requests,
            "Planned query"
        );

        Ok(ExecutionPlan {
            backend: self.backend,
            operations,
            estimated_requests,
        })
    }
}

/// The outcome of planning a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub backend: Backend,
    pub operations: Operations,
    pub estimated_requests: u64,
}

impl ExecutionPlan {
    pub fn includes(&self, operation: Operation) -> bool {
        self.operations.contains(operation.flag())
    }

    /// Fail unless `remaining` requests cover the estimate
    pub fn ensure_quota(&self, remaining: u64) -> Result<(), QueryError> {
        self.ensure_requests(self.estimated_requests, remaining)
    }

    /// Fail unless `remaining` requests cover `needed` more.
    ///
    /// Engines call this once the record count is known, before fanning out
    /// per-record requests.
    pub fn ensure_requests(&self, needed: u64, remaining: u64) -> Result<(), QueryError> {
        if remaining < needed {
            return Err(QueryError::NotEnoughRequests {
                service: self.backend.service().to_string(),
                needed,
                remaining,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::FieldPath;
    use serde_json::json;

    fn paper(value: serde_json::Value) -> Selector {
        Selector::from_json(Shape::Paper, &value).unwrap()
    }

    fn planner() -> Planner {
        Planner::new(
            Backend::Scopus,
            Shape::Paper,
            vec![
                CapabilityGroup::new(Operation::Search, paper(json!({"paper_id": true})))
                    .mandatory(),
                CapabilityGroup::new(
                    Operation::Fetch,
                    paper(json!({"title": true, "abstract": true})),
                )
                .requires(Operations::SEARCH)
                .cost(OperationCost::PerRecord),
                CapabilityGroup::new(Operation::Link, paper(json!({"references": {"paper_id": true}})))
                    .requires(Operations::SEARCH),
                CapabilityGroup::new(Operation::LinkFetch, paper(json!({"references": {"title": true}})))
                    .requires(Operations::LINK)
                    .cost(OperationCost::PerQuery(2)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_search_only_costs_one_request() {
        let plan = planner()
            .plan(&paper(json!({"paper_id": {"doi": true}})), 10)
            .unwrap();
        assert_eq!(plan.operations, Operations::SEARCH);
        assert_eq!(plan.estimated_requests, 1);
        assert!(plan.includes(Operation::Search));
        assert!(!plan.includes(Operation::Fetch));
    }

    #[test]
    fn test_per_record_groups_scale_with_results() {
        let plan = planner().plan(&paper(json!({"title": true})), 10).unwrap();
        assert_eq!(plan.operations, Operations::SEARCH | Operations::FETCH);
        assert_eq!(plan.estimated_requests, 11);
    }

    #[test]
    fn test_prerequisites_are_closed_over() {
        let plan = planner()
            .plan(&paper(json!({"references": {"title": true}})), 3)
            .unwrap();
        assert_eq!(
            plan.operations.list(),
            vec![Operation::Search, Operation::Link, Operation::LinkFetch]
        );
        assert_eq!(plan.estimated_requests, 1 + 1 + 2);
    }

    #[test]
    fn test_unavailable_fields_are_reported() {
        let planner = Planner::new(
            Backend::PubMed,
            Shape::Paper,
            vec![CapabilityGroup::new(
                Operation::Search,
                paper(json!({"paper_id": true, "title": true})),
            )],
        )
        .unwrap();

        let err = planner
            .plan(&paper(json!({"title": true, "topics": true})), 5)
            .unwrap_err();
        match err {
            QueryError::NotSupported { backend, fields } => {
                assert_eq!(backend, Backend::PubMed);
                assert_eq!(fields, vec![FieldPath::new(&["topics"])]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_available_is_union_of_groups() {
        let planner = planner();
        assert!(planner.available().contains(&paper(json!({
            "paper_id": true,
            "title": true,
            "references": {"paper_id": true, "title": true},
        }))).unwrap());
        assert!(!planner.available().is_selected("cited_by"));
    }

    #[test]
    fn test_quota_preflight() {
        let plan = planner().plan(&paper(json!({"abstract": true})), 20).unwrap();
        assert_eq!(plan.estimated_requests, 21);
        assert!(plan.ensure_quota(21).is_ok());

        match plan.ensure_quota(5).unwrap_err() {
            QueryError::NotEnoughRequests {
                service,
                needed,
                remaining,
            } => {
                assert_eq!(service, "scopus");
                assert_eq!(needed, 21);
                assert_eq!(remaining, 5);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_paged_search_costs_one_request_per_page() {
        let planner = Planner::new(
            Backend::Scopus,
            Shape::Paper,
            vec![CapabilityGroup::new(Operation::Search, paper(json!({"title": true})))
                .mandatory()
                .cost(OperationCost::PerPage(200))],
        )
        .unwrap();
        let selector = paper(json!({"title": true}));

        assert_eq!(planner.plan(&selector, 0).unwrap().estimated_requests, 1);
        assert_eq!(planner.plan(&selector, 200).unwrap().estimated_requests, 1);
        assert_eq!(planner.plan(&selector, 201).unwrap().estimated_requests, 2);
        assert_eq!(planner.plan(&selector, 450).unwrap().estimated_requests, 3);
    }

    #[test]
    fn test_fan_out_check_reports_needed_requests() {
        let plan = planner().plan(&paper(json!({"abstract": true})), 1).unwrap();
        assert!(plan.ensure_requests(2, 2).is_ok());
        assert!(matches!(
            plan.ensure_requests(3, 1),
            Err(QueryError::NotEnoughRequests {
                needed: 3,
                remaining: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_mismatched_group_shape_is_rejected() {
        let result = Planner::new(
            Backend::Scopus,
            Shape::Author,
            vec![CapabilityGroup::new(Operation::Search, Selector::all(Shape::Paper))],
        );
        assert!(result.is_err());
    }
}
