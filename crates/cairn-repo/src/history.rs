//! Ancestor search over the commit DAG.
//!
//! Both searches are breadth-first from a branch's heads and examine every
//! commit ref at most once. Commit refs are produced by a loader callback so
//! the traversal itself knows nothing about residency or decoding.

use std::collections::{HashSet, VecDeque};

use cairn_types::ObjectId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RepoResult;

/// How a commit relates to one of its parents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relationship {
    /// The commit this one was built on.
    Parent,
    /// A head folded in by a merge.
    MergedFrom,
}

impl Relationship {
    pub fn code(self) -> i64 {
        match self {
            Self::Parent => 0,
            Self::MergedFrom => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Parent),
            1 => Some(Self::MergedFrom),
            _ => None,
        }
    }
}

/// What the searches need to know about one commit ref.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitNode {
    pub date: i64,
    pub parents: Vec<(ObjectId, Relationship)>,
}

/// Outcome of a history search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchOutcome {
    pub found: Option<ObjectId>,
    /// Number of distinct commit refs examined.
    pub visited: usize,
}

/// Should a ref dated `date` replace the current best candidate for `bound`?
///
/// Only refs at or before the bound qualify, and a later qualifying date
/// beats an earlier one. Ties keep the candidate found first.
pub fn is_better_candidate(date: i64, bound: i64, best: Option<i64>) -> bool {
    date <= bound && best.map_or(true, |b| date > b)
}

/// Should the search continue into the parents of a ref dated `date`?
///
/// Ancestors are never newer than their descendants, so once a ref is at or
/// before the bound nothing further down that path can beat it.
pub fn should_descend(date: i64, bound: i64) -> bool {
    date > bound
}

/// Index of the newest of a set of divergent head dates. Ties go to the
/// earliest head. `None` for an empty slice.
pub fn newest_head(dates: &[i64]) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (i, date) in dates.iter().copied().enumerate() {
        if best.map_or(true, |(_, b)| date > b) {
            best = Some((i, date));
        }
    }
    best.map(|(i, _)| i)
}

/// Find `target` among the heads and their ancestors.
pub fn find_by_key<F>(heads: &[ObjectId], target: &ObjectId, mut load: F) -> RepoResult<SearchOutcome>
where
    F: FnMut(&ObjectId) -> RepoResult<CommitNode>,
{
    let mut queue: VecDeque<ObjectId> = heads.iter().copied().collect();
    let mut touched: HashSet<ObjectId> = HashSet::new();
    let mut visited = 0;

    while let Some(id) = queue.pop_front() {
        if !touched.insert(id) {
            continue;
        }
        visited += 1;
        if id == *target {
            debug!(target = %target.short_hex(), visited, "commit found");
            return Ok(SearchOutcome {
                found: Some(id),
                visited,
            });
        }
        for (parent, _) in load(&id)?.parents {
            if !touched.contains(&parent) {
                queue.push_back(parent);
            }
        }
    }

    debug!(target = %target.short_hex(), visited, "commit not found");
    Ok(SearchOutcome {
        found: None,
        visited,
    })
}

/// Find the newest commit dated at or before `bound`.
pub fn find_older_than<F>(heads: &[ObjectId], bound: i64, mut load: F) -> RepoResult<SearchOutcome>
where
    F: FnMut(&ObjectId) -> RepoResult<CommitNode>,
{
    let mut queue: VecDeque<ObjectId> = heads.iter().copied().collect();
    let mut touched: HashSet<ObjectId> = HashSet::new();
    let mut best: Option<(ObjectId, i64)> = None;
    let mut visited = 0;

    while let Some(id) = queue.pop_front() {
        if !touched.insert(id) {
            continue;
        }
        visited += 1;
        let node = load(&id)?;
        if is_better_candidate(node.date, bound, best.map(|(_, d)| d)) {
            best = Some((id, node.date));
        }
        if should_descend(node.date, bound) {
            for (parent, _) in node.parents {
                if !touched.contains(&parent) {
                    queue.push_back(parent);
                }
            }
        }
    }

    debug!(bound, visited, found = best.is_some(), "date search finished");
    Ok(SearchOutcome {
        found: best.map(|(id, _)| id),
        visited,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::RepoError;

    fn id(n: u8) -> ObjectId {
        ObjectId::from_hash([n; 32])
    }

    /// `(commit, date, parents)` triples.
    fn graph(edges: &[(u8, i64, &[u8])]) -> HashMap<ObjectId, CommitNode> {
        edges
            .iter()
            .map(|(c, date, parents)| {
                (
                    id(*c),
                    CommitNode {
                        date: *date,
                        parents: parents.iter().map(|p| (id(*p), Relationship::Parent)).collect(),
                    },
                )
            })
            .collect()
    }

    fn loader(
        g: &HashMap<ObjectId, CommitNode>,
    ) -> impl FnMut(&ObjectId) -> RepoResult<CommitNode> + '_ {
        move |key| {
            g.get(key)
                .cloned()
                .ok_or_else(|| RepoError::ObjectNotResident(key.to_hex()))
        }
    }

    #[test]
    fn better_candidate_predicate() {
        assert!(is_better_candidate(10, 10, None));
        assert!(!is_better_candidate(11, 10, None));
        assert!(is_better_candidate(8, 10, Some(5)));
        assert!(!is_better_candidate(5, 10, Some(5)), "ties keep the first candidate");
        assert!(!is_better_candidate(4, 10, Some(5)));
        assert!(!is_better_candidate(11, 10, Some(5)));
    }

    #[test]
    fn descend_predicate() {
        assert!(should_descend(11, 10));
        assert!(!should_descend(10, 10));
        assert!(!should_descend(3, 10));
    }

    #[test]
    fn newest_head_prefers_the_first_of_equal_dates() {
        assert_eq!(newest_head(&[]), None);
        assert_eq!(newest_head(&[10, 20]), Some(1));
        assert_eq!(newest_head(&[20, 10]), Some(0));
        assert_eq!(newest_head(&[20, 20, 5]), Some(0));
    }

    #[test]
    fn relationship_codes() {
        assert_eq!(Relationship::from_code(Relationship::Parent.code()), Some(Relationship::Parent));
        assert_eq!(Relationship::from_code(1), Some(Relationship::MergedFrom));
        assert_eq!(Relationship::from_code(7), None);
    }

    #[test]
    fn key_search_on_linear_history_visits_each_ref_once() {
        let g = graph(&[(3, 30, &[2]), (2, 20, &[1]), (1, 10, &[])]);
        let hit = find_by_key(&[id(3)], &id(1), loader(&g)).unwrap();
        assert_eq!(hit.found, Some(id(1)));
        assert_eq!(hit.visited, 3);

        let miss = find_by_key(&[id(3)], &id(9), loader(&g)).unwrap();
        assert_eq!(miss.found, None);
        assert_eq!(miss.visited, 3);
    }

    #[test]
    fn key_search_skips_shared_ancestors() {
        // diamond: 4 -> {2, 3} -> 1
        let g = graph(&[(4, 40, &[2, 3]), (2, 20, &[1]), (3, 30, &[1]), (1, 10, &[])]);
        let miss = find_by_key(&[id(4)], &id(9), loader(&g)).unwrap();
        assert_eq!(miss.visited, 4);
    }

    #[test]
    fn key_search_starts_from_every_head() {
        let g = graph(&[(2, 20, &[1]), (3, 30, &[1]), (1, 10, &[])]);
        let hit = find_by_key(&[id(2), id(3)], &id(3), loader(&g)).unwrap();
        assert_eq!(hit.found, Some(id(3)));
    }

    #[test]
    fn date_search_picks_latest_at_or_before_bound() {
        let g = graph(&[(3, 30, &[2]), (2, 20, &[1]), (1, 10, &[])]);
        assert_eq!(find_older_than(&[id(3)], 25, loader(&g)).unwrap().found, Some(id(2)));
        assert_eq!(find_older_than(&[id(3)], 20, loader(&g)).unwrap().found, Some(id(2)));
        assert_eq!(find_older_than(&[id(3)], 99, loader(&g)).unwrap().found, Some(id(3)));
        assert_eq!(find_older_than(&[id(3)], 5, loader(&g)).unwrap().found, None);
    }

    #[test]
    fn date_search_stops_below_the_bound() {
        let g = graph(&[(3, 30, &[2]), (2, 20, &[1]), (1, 10, &[])]);
        let out = find_older_than(&[id(3)], 25, loader(&g)).unwrap();
        // 1 is never examined: 2 already satisfies the bound.
        assert_eq!(out.visited, 2);
    }

    #[test]
    fn date_search_compares_across_diverged_heads() {
        // heads 4 (date 15) and 5 (date 40 -> parent 2 at 18)
        let g = graph(&[(4, 15, &[1]), (5, 40, &[2]), (2, 18, &[1]), (1, 10, &[])]);
        let out = find_older_than(&[id(4), id(5)], 20, loader(&g)).unwrap();
        assert_eq!(out.found, Some(id(2)));
    }

    #[test]
    fn loader_errors_propagate() {
        let g = graph(&[(3, 30, &[2])]);
        assert!(find_by_key(&[id(3)], &id(9), loader(&g)).is_err());
    }
}
