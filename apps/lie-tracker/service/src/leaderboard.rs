use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub count: u64,
}

/// Ranks users by count (descending), breaking ties by name (ascending, case-sensitive),
/// then keeps the first `limit` rows.
pub fn rank(users: &BTreeMap<String, u64>, limit: usize) -> Vec<LeaderboardEntry> {
    let mut rows: Vec<LeaderboardEntry> = users
        .iter()
        .map(|(name, count)| LeaderboardEntry {
            name: name.clone(),
            count: *count,
        })
        .collect();
    rows.sort_by(|left, right| {
        right
            .count
            .cmp(&left.count)
            .then_with(|| left.name.cmp(&right.name))
    });
    rows.truncate(limit);
    rows
}
