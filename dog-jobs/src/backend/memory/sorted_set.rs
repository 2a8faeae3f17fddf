use std::collections::{BTreeSet, HashMap};

/// Minimal sorted set with the subset of Redis ZSET semantics the queues need
///
/// Members are unique; ties on score are broken by member.
#[derive(Debug, Default, Clone)]
pub(crate) struct SortedSet {
    scores: HashMap<u64, i64>,
    ordered: BTreeSet<(i64, u64)>,
}

impl SortedSet {
    /// ZADD: insert or re-score a member
    pub fn insert(&mut self, member: u64, score: i64) {
        if let Some(previous) = self.scores.insert(member, score) {
            self.ordered.remove(&(previous, member));
        }
        self.ordered.insert((score, member));
    }

    /// ZREM: returns whether the member was present
    pub fn remove(&mut self, member: u64) -> bool {
        match self.scores.remove(&member) {
            Some(score) => {
                self.ordered.remove(&(score, member));
                true
            }
            None => false,
        }
    }

    /// ZRANGEBYSCORE -inf max LIMIT 0 1
    pub fn first_at_or_below(&self, max: i64) -> Option<u64> {
        self.ordered
            .iter()
            .next()
            .filter(|(score, _)| *score <= max)
            .map(|(_, member)| *member)
    }

    /// ZPOPMIN
    pub fn pop_min(&mut self) -> Option<u64> {
        let (_, member) = self.ordered.pop_first()?;
        self.scores.remove(&member);
        Some(member)
    }

    pub fn min_score(&self) -> Option<i64> {
        self.ordered.first().map(|(score, _)| *score)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }
}
