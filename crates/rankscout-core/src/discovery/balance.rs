//! Deduplication and rank-balanced selection.

use std::collections::HashSet;

use crate::domain::{ItemId, Segment};
use crate::scoring::Candidate;

/// An id together with the segment query that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedId {
    pub item_id: ItemId,
    pub segment: Option<usize>,
}

/// Drops repeated ids, keeping the first occurrence and its tag.
pub fn dedupe(ids: Vec<TaggedId>) -> Vec<TaggedId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter()
        .filter(|tagged| seen.insert(tagged.item_id.clone()))
        .collect()
}

/// Takes up to `ceiling` ids, alternating between segments.
///
/// Ids from the same segment keep their first-seen order, so a long low
/// segment cannot use up the whole detail allowance. Untagged ids form
/// their own group.
pub fn interleave_segments(ids: &[TaggedId], ceiling: usize) -> Vec<TaggedId> {
    let mut groups: Vec<(Option<usize>, Vec<&TaggedId>)> = Vec::new();
    for tagged in ids {
        match groups.iter_mut().find(|(segment, _)| *segment == tagged.segment) {
            Some((_, group)) => group.push(tagged),
            None => groups.push((tagged.segment, vec![tagged])),
        }
    }

    let limit = ceiling.min(ids.len());
    let mut picked = Vec::with_capacity(limit);
    let mut round = 0;
    while picked.len() < limit {
        for (_, group) in &groups {
            if picked.len() == limit {
                break;
            }
            if let Some(tagged) = group.get(round) {
                picked.push((*tagged).clone());
            }
        }
        round += 1;
    }
    picked
}

/// Stable sort by weighted score, best first.
pub fn sort_by_score(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.weighted_score().total_cmp(&a.weighted_score()));
}

/// Score-descending truncation.
pub fn top_by_score(mut candidates: Vec<Candidate>, max: usize) -> Vec<Candidate> {
    sort_by_score(&mut candidates);
    candidates.truncate(max);
    candidates
}

/// Picks `max` candidates spread across rank segments.
///
/// Each segment contributes up to `max / segments.len()` of its best
/// candidates; the remaining slots go to the best leftovers from any segment,
/// including unranked candidates. The result is sorted by score.
pub fn balance_select(candidates: Vec<Candidate>, segments: &[Segment], max: usize) -> Vec<Candidate> {
    if candidates.len() <= max || segments.is_empty() {
        return top_by_score(candidates, max);
    }

    let mut buckets: Vec<Vec<Candidate>> = vec![Vec::new(); segments.len()];
    let mut leftovers = Vec::new();
    for candidate in candidates {
        let bucket = candidate
            .rank
            .and_then(|rank| segments.iter().position(|segment| segment.contains(rank)));
        match bucket {
            Some(index) => buckets[index].push(candidate),
            None => leftovers.push(candidate),
        }
    }

    let share = max / segments.len();
    let mut selected = Vec::with_capacity(max);
    for mut bucket in buckets {
        sort_by_score(&mut bucket);
        let rest = bucket.split_off(share.min(bucket.len()));
        selected.extend(bucket);
        leftovers.extend(rest);
    }

    sort_by_score(&mut leftovers);
    let open_slots = max.saturating_sub(selected.len());
    selected.extend(leftovers.into_iter().take(open_slots));

    sort_by_score(&mut selected);
    selected
}
