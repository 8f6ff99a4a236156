//! Bidirectional subscription index.
//!
//! `by_submission` and `by_connection` always mirror each other: a pair is
//! present in one iff it is present in the other, and neither map ever
//! holds an empty set.

use std::collections::{HashMap, HashSet};

use codearena_core::{ConnectionId, SubmissionId};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Submissions with at least one subscriber.
    pub total_submissions: usize,
    /// Connections with at least one subscription.
    pub total_connections: usize,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_submission: HashMap<SubmissionId, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, HashSet<SubmissionId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record interest of `conn` in `submission`. Returns `false` if the
    /// pair was already present.
    pub fn subscribe(&mut self, conn: &str, submission: &SubmissionId) -> bool {
        let added = self
            .by_submission
            .entry(submission.clone())
            .or_default()
            .insert(conn.to_string());
        self.by_connection
            .entry(conn.to_string())
            .or_default()
            .insert(submission.clone());
        added
    }

    /// Drop one pair. Returns `false` if it was not present.
    pub fn unsubscribe(&mut self, conn: &str, submission: &SubmissionId) -> bool {
        let removed = remove_pair(&mut self.by_submission, submission, conn);
        remove_pair(&mut self.by_connection, conn, submission);
        removed
    }

    /// Drop every pair involving `conn`, returning the submissions it
    /// watched. A connection with no subscriptions is a no-op.
    pub fn disconnect(&mut self, conn: &str) -> Vec<SubmissionId> {
        let Some(submissions) = self.by_connection.remove(conn) else {
            return Vec::new();
        };
        for submission in &submissions {
            remove_pair(&mut self.by_submission, submission, conn);
        }
        submissions.into_iter().collect()
    }

    /// Connections currently watching `submission`.
    pub fn subscribers<'a>(
        &'a self,
        submission: &SubmissionId,
    ) -> impl Iterator<Item = &'a ConnectionId> + 'a {
        self.by_submission
            .get(submission)
            .into_iter()
            .flat_map(|conns| conns.iter())
    }

    pub fn subscriptions_of(&self, conn: &str) -> Vec<SubmissionId> {
        self.by_connection
            .get(conn)
            .map(|subs| subs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_submissions: self.by_submission.len(),
            total_connections: self.by_connection.len(),
        }
    }

    pub fn clear(&mut self) {
        self.by_submission.clear();
        self.by_connection.clear();
    }

    /// Whether both indices mirror each other with no empty sets.
    pub fn is_consistent(&self) -> bool {
        let no_empty = self.by_submission.values().all(|s| !s.is_empty())
            && self.by_connection.values().all(|s| !s.is_empty());

        let forward = self.by_connection.iter().all(|(conn, subs)| {
            subs.iter().all(|sub| {
                self.by_submission
                    .get(sub)
                    .is_some_and(|conns| conns.contains(conn))
            })
        });
        let backward = self.by_submission.iter().all(|(sub, conns)| {
            conns.iter().all(|conn| {
                self.by_connection
                    .get(conn)
                    .is_some_and(|subs| subs.contains(sub))
            })
        });

        no_empty && forward && backward
    }
}

/// Remove `value` from the set at `key`, dropping the set once empty.
fn remove_pair<K, V, Q, R>(map: &mut HashMap<K, HashSet<V>>, key: &Q, value: &R) -> bool
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    V: std::borrow::Borrow<R> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
    R: std::hash::Hash + Eq + ?Sized,
{
    let Some(set) = map.get_mut(key) else {
        return false;
    };
    let removed = set.remove(value);
    if set.is_empty() {
        map.remove(key);
    }
    removed
}
