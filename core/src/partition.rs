use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Tenant-scoping identifier carried by the fact table (a service team id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(pub i64);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The partitions a user may read during one turn.
///
/// An empty set means "no access". Lookup failures also collapse to the empty set,
/// so the set can never be mistaken for "all access".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionSet(BTreeSet<PartitionId>);

impl PartitionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, id: PartitionId) -> bool {
        self.0.contains(&id)
    }

    /// Ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<i64> for PartitionSet {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        Self(iter.into_iter().map(PartitionId).collect())
    }
}

impl FromIterator<PartitionId> for PartitionSet {
    fn from_iter<I: IntoIterator<Item = PartitionId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The mandatory row filter every fact-table query must carry, rendered for one
/// non-empty partition set.
///
/// The fragment is the exact text the query guard looks for, e.g.
/// `ServiceTeamId IN (101,205)`. Ids are emitted in ascending order without spaces
/// so the instruction given to the model and the guard always agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFilter {
    column: String,
    fragment: String,
}

impl PartitionFilter {
    /// Returns `None` for an empty set: there is no filter that grants nothing.
    pub fn new(column: &str, partitions: &PartitionSet) -> Option<Self> {
        if partitions.is_empty() {
            return None;
        }
        let ids = partitions
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Some(Self {
            column: column.to_string(),
            fragment: format!("{column} IN ({ids})"),
        })
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }
}

impl fmt::Display for PartitionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fragment)
    }
}
