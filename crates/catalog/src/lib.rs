//! The in-memory cluster catalog: nodes, databases, retention policies,
//! shard groups and shards, continuous queries, subscriptions, and users.
//!
//! [`Data`] is a plain owned value. Cloning it yields a structurally
//! independent copy, which is what the state machine's copy-on-write apply
//! path relies on: mutate a clone, then swap it in only on success.
//! Every mutator is deterministic — anything time- or randomness-shaped is a
//! parameter, provided by the command being applied.

mod data;
mod proto;

pub use data::{
    ContinuousQueryInfo, Data, DatabaseInfo, NodeInfo, Privilege, RetentionPolicyInfo,
    RetentionPolicyUpdate, ShardGroupInfo, ShardInfo, ShardOwner, SubscriptionInfo,
    SubscriptionMode, UserInfo,
};
pub use proto::{privilege_from_code, subscription_mode_from_code};

use std::time::Duration;

/// Name of the retention policy auto-created alongside a database.
pub const DEFAULT_RETENTION_POLICY_NAME: &str = "autogen";

/// Duration of the auto-created retention policy: zero keeps data forever.
pub const DEFAULT_RETENTION_POLICY_DURATION: Duration = Duration::ZERO;

/// Smallest non-infinite retention duration a policy may carry.
pub const MIN_RETENTION_POLICY_DURATION: Duration = Duration::from_secs(60 * 60);

/// Replication ceiling for auto-created retention policies.
pub const MAX_AUTO_CREATED_RETENTION_POLICY_REPLICA_N: usize = 3;

/// Largest representable point timestamp, in unix nanoseconds. Shard group
/// end times are clamped here rather than overflowing.
pub const MAX_NANO_TIME: i64 = i64::MAX - 1;

/// Derive a shard group duration from a retention duration: long retention
/// gets wide groups, short retention narrow ones.
pub fn shard_group_duration_for(duration: Duration) -> Duration {
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);
    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    if duration >= Duration::from_secs(180 * 24 * 60 * 60) {
        WEEK
    } else if duration >= Duration::from_secs(2 * 24 * 60 * 60) {
        DAY
    } else if duration > Duration::ZERO {
        Duration::from_secs(60 * 60)
    } else {
        // Infinite retention shards by the week.
        WEEK
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    // Not-found.
    #[error("database {0:?} not found")]
    DatabaseNotFound(String),
    #[error("retention policy {0:?} not found")]
    RetentionPolicyNotFound(String),
    #[error("shard group {0} not found")]
    ShardGroupNotFound(u64),
    #[error("continuous query {0:?} not found")]
    ContinuousQueryNotFound(String),
    #[error("subscription {0:?} not found")]
    SubscriptionNotFound(String),
    #[error("user {0:?} not found")]
    UserNotFound(String),
    #[error("node {0} not found")]
    NodeNotFound(u64),

    // Already-exists.
    #[error("database {0:?} already exists")]
    DatabaseExists(String),
    #[error("retention policy {0:?} already exists")]
    RetentionPolicyExists(String),
    #[error("continuous query {0:?} already exists")]
    ContinuousQueryExists(String),
    #[error("subscription {0:?} already exists")]
    SubscriptionExists(String),
    #[error("user {0:?} already exists")]
    UserExists(String),
    #[error("node with address {0:?} already exists")]
    NodeExists(String),
    #[error("node id {0} already exists")]
    NodeIdExists(u64),

    // Conflicts with an existing entity's parameters.
    #[error("retention policy {0:?} conflicts with an existing policy")]
    RetentionPolicyConflict(String),

    // Invariant violations.
    #[error("database name required")]
    DatabaseNameRequired,
    #[error("retention policy name required")]
    RetentionPolicyNameRequired,
    #[error("replication factor must be at least 1")]
    ReplicationFactorTooLow,
    #[error("retention policy duration must be at least one hour")]
    RetentionPolicyDurationTooLow,
    #[error("retention policy duration must be no less than the shard group duration")]
    IncompatibleDurations,
    #[error("at least one data node is required to create a shard group")]
    DataNodesRequired,

    // Referential restrictions.
    #[error("retention policy {0:?} is the database default and cannot be dropped")]
    RetentionPolicyIsDefault(String),
}

pub type Result<Ok> = std::result::Result<Ok, Error>;
