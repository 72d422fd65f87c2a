mod point;
mod statistic;

pub use point::{FieldValue, Point, PointError, Tags};
pub use statistic::{Statistic, StatisticTags};

/// ConsistencyLevel is the number of shard owners which must acknowledge a
/// write before it's reported as successful.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    /// Any one node, including a hinted-handoff queue.
    Any,
    /// One assigned owner.
    One,
    /// A majority of assigned owners.
    Quorum,
    /// Every assigned owner.
    All,
}

impl std::str::FromStr for ConsistencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(Self::Any),
            "one" => Ok(Self::One),
            "quorum" => Ok(Self::Quorum),
            "all" => Ok(Self::All),
            other => Err(format!("invalid consistency level: {other:?}")),
        }
    }
}
