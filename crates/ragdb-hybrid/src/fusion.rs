//! Weighted reciprocal rank fusion: score = Σ w_i / (c + rank_i)
//!
//! Rank-based, so lexical and vector scores never need to be made
//! comparable. A chunk absent from a list gets nothing from it.

use std::cmp::Ordering;
use std::collections::HashMap;

use ragdb_core::types::{ChunkId, FusedResult, ScoredResult, SourceKind};

/// One retriever's ranking plus the weight it carries in the fusion.
#[derive(Debug, Clone, Copy)]
pub struct RankedList<'a> {
    pub source: SourceKind,
    pub weight: f64,
    pub results: &'a [ScoredResult],
}

impl<'a> RankedList<'a> {
    pub fn new(source: SourceKind, weight: f64, results: &'a [ScoredResult]) -> Self {
        Self { source, weight, results }
    }
}

#[derive(Default)]
struct Acc {
    score: f64,
    lexical_rank: Option<usize>,
    vector_rank: Option<usize>,
}

fn best_rank(r: &FusedResult) -> usize {
    r.lexical_rank.into_iter().chain(r.vector_rank).min().unwrap_or(usize::MAX)
}

fn rank_sum(r: &FusedResult) -> usize { r.lexical_rank.unwrap_or(0) + r.vector_rank.unwrap_or(0) }

/// Ordering of the fused list: score, then best single-source rank, then
/// rank sum, then chunk id.
fn fused_order(a: &FusedResult, b: &FusedResult) -> Ordering {
    b.fused_score
        .total_cmp(&a.fused_score)
        .then_with(|| best_rank(a).cmp(&best_rank(b)))
        .then_with(|| rank_sum(a).cmp(&rank_sum(b)))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Fuse ranked lists into at most `k` results. Lists with weight 0 are
/// ignored entirely.
pub fn fuse(lists: &[RankedList<'_>], rank_constant: f64, k: usize) -> Vec<FusedResult> {
    let mut acc: HashMap<&ChunkId, Acc> = HashMap::new();
    for list in lists.iter().filter(|l| l.weight > 0.0) {
        for hit in list.results {
            let entry = acc.entry(&hit.chunk_id).or_default();
            entry.score += list.weight / (rank_constant + hit.rank as f64);
            let slot = match list.source {
                SourceKind::Lexical => &mut entry.lexical_rank,
                SourceKind::Vector => &mut entry.vector_rank,
            };
            *slot = Some(slot.map_or(hit.rank, |r| r.min(hit.rank)));
        }
    }

    let mut fused: Vec<FusedResult> = acc
        .into_iter()
        .map(|(id, a)| FusedResult {
            chunk_id: id.clone(),
            fused_score: a.score,
            lexical_rank: a.lexical_rank,
            vector_rank: a.vector_rank,
        })
        .collect();
    fused.sort_by(fused_order);
    fused.truncate(k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranking(ids: &[&str]) -> Vec<ScoredResult> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| ScoredResult { chunk_id: id.to_string(), score: 1.0 / (i + 1) as f32, rank: i + 1 })
            .collect()
    }

    fn ids(fused: &[FusedResult]) -> Vec<&str> { fused.iter().map(|f| f.chunk_id.as_str()).collect() }

    #[test]
    fn single_weight_reproduces_that_ranking() {
        let lex = ranking(&["a", "b", "c", "d"]);
        let vec = ranking(&["d", "c", "x"]);
        let lexical_only = fuse(
            &[RankedList::new(SourceKind::Lexical, 1.0, &lex), RankedList::new(SourceKind::Vector, 0.0, &vec)],
            60.0,
            10,
        );
        assert_eq!(ids(&lexical_only), vec!["a", "b", "c", "d"]);
        assert!(lexical_only.iter().all(|f| f.vector_rank.is_none()));

        let vector_only = fuse(
            &[RankedList::new(SourceKind::Lexical, 0.0, &lex), RankedList::new(SourceKind::Vector, 1.0, &vec)],
            60.0,
            10,
        );
        assert_eq!(ids(&vector_only), vec!["d", "c", "x"]);
    }

    #[test]
    fn list_order_does_not_change_scores() {
        let lex = ranking(&["a", "b", "c"]);
        let vec = ranking(&["c", "a", "z"]);
        let l = RankedList::new(SourceKind::Lexical, 0.3, &lex);
        let v = RankedList::new(SourceKind::Vector, 0.7, &vec);
        assert_eq!(fuse(&[l, v], 60.0, 10), fuse(&[v, l], 60.0, 10));
    }

    #[test]
    fn swapping_weights_changes_outcome() {
        let lex = ranking(&["a", "b"]);
        let vec = ranking(&["b", "a"]);
        let fused = |wl, wv| {
            fuse(&[RankedList::new(SourceKind::Lexical, wl, &lex), RankedList::new(SourceKind::Vector, wv, &vec)], 60.0, 2)
        };
        assert_eq!(ids(&fused(0.8, 0.2))[0], "a");
        assert_eq!(ids(&fused(0.2, 0.8))[0], "b");
    }

    #[test]
    fn doubly_confirmed_chunk_beats_single_source_at_same_or_worse_rank() {
        let lex = ranking(&["only_lex", "both"]);
        let vec = ranking(&["only_vec", "both"]);
        let fused = fuse(
            &[RankedList::new(SourceKind::Lexical, 0.5, &lex), RankedList::new(SourceKind::Vector, 0.5, &vec)],
            60.0,
            10,
        );
        assert_eq!(fused[0].chunk_id, "both");
        assert_eq!((fused[0].lexical_rank, fused[0].vector_rank), (Some(2), Some(2)));
    }

    #[test]
    fn exact_ties_fall_back_to_chunk_id() {
        let lex = ranking(&["m"]);
        let vec = ranking(&["b"]);
        let fused = fuse(
            &[RankedList::new(SourceKind::Lexical, 0.5, &lex), RankedList::new(SourceKind::Vector, 0.5, &vec)],
            60.0,
            10,
        );
        assert_eq!(ids(&fused), vec!["b", "m"]);
    }

    #[test]
    fn truncates_and_handles_empty_lists() {
        let lex = ranking(&["a", "b", "c"]);
        assert_eq!(fuse(&[RankedList::new(SourceKind::Lexical, 0.5, &lex)], 60.0, 2).len(), 2);
        assert!(fuse(&[RankedList::new(SourceKind::Vector, 0.5, &[])], 60.0, 5).is_empty());
    }
}
