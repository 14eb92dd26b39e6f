//! Normalized query description used to key the plan cache

use std::fmt;

use super::ast::{Predicate, SortSpec};

/// The parts of a query that determine which plan is best, ignoring
/// constant values. Two queries with equal shapes share cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryShape {
    key: String,
}

impl QueryShape {
    /// Canonical string form of the shape
    pub fn key(&self) -> &str {
        &self.key
    }

    /// CRC32 of the shape key, logged alongside plan selection events
    pub fn hash(&self) -> u32 {
        crc32fast::hash(self.key.as_bytes())
    }

    /// Shape key hash formatted the way log lines carry it
    pub fn hash_hex(&self) -> String {
        format!("{:08X}", self.hash())
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// A query as seen by the execution layer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CanonicalQuery {
    /// Filter predicates (all combined with AND)
    pub predicates: Vec<Predicate>,
    /// Clauses of a disjunction ANDed with `predicates`; each clause is
    /// itself a conjunction
    pub or_clauses: Vec<Vec<Predicate>>,
    /// Compound sort pattern, empty if unsorted
    pub sort: Vec<SortSpec>,
    /// Requested number of results
    pub limit: Option<u64>,
    /// Whether plans for this query may be cached
    pub cacheable: bool,
}

impl CanonicalQuery {
    pub fn new() -> Self {
        Self {
            cacheable: true,
            ..Default::default()
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Adds one clause to the query's disjunction
    pub fn with_or_clause(mut self, clause: Vec<Predicate>) -> Self {
        self.or_clauses.push(clause);
        self
    }

    /// True if the whole filter is a disjunction of two or more clauses
    pub fn is_rooted_or(&self) -> bool {
        self.predicates.is_empty() && self.or_clauses.len() > 1
    }

    /// One query per disjunction clause, keeping sort and limit
    pub fn branch_queries(&self) -> Vec<CanonicalQuery> {
        self.or_clauses
            .iter()
            .map(|clause| CanonicalQuery {
                predicates: self.predicates.iter().chain(clause).cloned().collect(),
                or_clauses: Vec::new(),
                sort: self.sort.clone(),
                limit: self.limit,
                cacheable: self.cacheable,
            })
            .collect()
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Marks the query as never cacheable
    pub fn uncacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Shape of the query: predicate fields and operators, sorted, then
    /// any disjunction clauses shaped the same way, plus the sort pattern
    /// in order
    pub fn shape(&self) -> QueryShape {
        let mut key = format!("q[{}]", predicate_shape(&self.predicates));
        if !self.or_clauses.is_empty() {
            let clauses: Vec<String> = self
                .or_clauses
                .iter()
                .map(|clause| format!("[{}]", predicate_shape(clause)))
                .collect();
            key.push_str(&format!("or[{}]", clauses.join(",")));
        }
        let sort: Vec<String> = self.sort.iter().map(|s| s.to_string()).collect();
        key.push_str(&format!("s[{}]", sort.join(",")));
        QueryShape { key }
    }
}

fn predicate_shape(predicates: &[Predicate]) -> String {
    let mut preds: Vec<String> = predicates
        .iter()
        .map(|p| format!("{}:{}", p.field, p.op.op_name()))
        .collect();
    preds.sort();
    preds.join(",")
}
