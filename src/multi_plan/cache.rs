//! Plan cache collaborator

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use super::ranker::RankingDecision;
use crate::query::{QueryShape, QuerySolution};

/// A cached plan choice for one query shape.
#[derive(Debug, Clone)]
pub struct CachedSolution {
    /// Ranked solutions, winner first
    pub solutions: Vec<QuerySolution>,
    /// The ranking that produced the choice
    pub decision: RankingDecision,
    pub cached_at: DateTime<Utc>,
}

impl CachedSolution {
    /// The winning solution
    pub fn winner(&self) -> Option<&QuerySolution> {
        self.solutions.first()
    }
}

/// Stores plan choices keyed by query shape.
///
/// Implementations must tolerate concurrent use: entries are written by
/// whichever execution finishes plan selection and removed by whichever
/// execution sees a cached winner fail.
pub trait PlanCache {
    fn lookup(&self, shape: &QueryShape) -> Option<CachedSolution>;

    /// Records `solutions` (winner first) as the choice for `shape`
    fn insert(&self, shape: QueryShape, solutions: Vec<QuerySolution>, decision: RankingDecision);

    /// Evicts the entry for `shape`. Returns true if there was one.
    fn remove(&self, shape: &QueryShape) -> bool;
}

/// Plan cache shared between executions
pub type SharedPlanCache = Arc<dyn PlanCache + Send + Sync>;

/// Unbounded in-process plan cache.
#[derive(Debug, Default)]
pub struct InMemoryPlanCache {
    entries: RwLock<HashMap<QueryShape, CachedSolution>>,
}

impl InMemoryPlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PlanCache for InMemoryPlanCache {
    fn lookup(&self, shape: &QueryShape) -> Option<CachedSolution> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(shape)
            .cloned()
    }

    fn insert(&self, shape: QueryShape, solutions: Vec<QuerySolution>, decision: RankingDecision) {
        let entry = CachedSolution {
            solutions,
            decision,
            cached_at: Utc::now(),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(shape, entry);
    }

    fn remove(&self, shape: &QueryShape) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(shape)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{CanonicalQuery, Predicate};
    use serde_json::json;

    fn decision() -> RankingDecision {
        RankingDecision {
            candidate_order: vec![1, 0],
            scores: vec![2.5, 1.2],
            stats: Vec::new(),
            tie_for_best: false,
        }
    }

    #[test]
    fn test_insert_lookup_remove() {
        let cache = InMemoryPlanCache::new();
        let shape = CanonicalQuery::new()
            .with_predicate(Predicate::eq("a", json!(1)))
            .shape();
        assert!(cache.lookup(&shape).is_none());

        cache.insert(
            shape.clone(),
            vec![QuerySolution::new("IXSCAN a_1"), QuerySolution::new("COLLSCAN")],
            decision(),
        );
        let cached = cache.lookup(&shape).unwrap();
        assert_eq!(cached.winner().unwrap().summary, "IXSCAN a_1");
        assert_eq!(cached.decision.candidate_order, vec![1, 0]);
        assert_eq!(cache.len(), 1);

        assert!(cache.remove(&shape));
        assert!(!cache.remove(&shape));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_equal_shapes_share_an_entry() {
        let cache = InMemoryPlanCache::new();
        let a = CanonicalQuery::new().with_predicate(Predicate::eq("a", json!(1)));
        let b = CanonicalQuery::new().with_predicate(Predicate::eq("a", json!(99)));

        cache.insert(a.shape(), vec![QuerySolution::new("IXSCAN a_1")], decision());
        assert!(cache.lookup(&b.shape()).is_some());
    }
}
