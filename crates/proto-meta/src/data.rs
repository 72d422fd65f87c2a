//! Snapshot schema: the full catalog, serialized verbatim.
//!
//! Field encodings are chosen for determinism: every collection is a sorted
//! `Vec` (never a map), so that structurally equal catalogs encode to
//! byte-identical blobs on every node.

/// The complete catalog snapshot.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Data {
    /// Snapshot layout version; see [`crate::SNAPSHOT_VERSION`].
    #[prost(uint32, tag = "1")]
    pub version: u32,
    #[prost(uint64, tag = "2")]
    pub term: u64,
    #[prost(uint64, tag = "3")]
    pub index: u64,
    #[prost(uint64, tag = "4")]
    pub cluster_id: u64,
    #[prost(message, repeated, tag = "5")]
    pub meta_nodes: Vec<NodeInfo>,
    #[prost(message, repeated, tag = "6")]
    pub data_nodes: Vec<NodeInfo>,
    #[prost(message, repeated, tag = "7")]
    pub databases: Vec<DatabaseInfo>,
    #[prost(message, repeated, tag = "8")]
    pub users: Vec<UserInfo>,
    #[prost(uint64, tag = "9")]
    pub max_node_id: u64,
    #[prost(uint64, tag = "10")]
    pub max_shard_group_id: u64,
    #[prost(uint64, tag = "11")]
    pub max_shard_id: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NodeInfo {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// HTTP service address.
    #[prost(string, tag = "2")]
    pub host: String,
    /// TCP (RPC) service address.
    #[prost(string, tag = "3")]
    pub tcp_host: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DatabaseInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub default_retention_policy: String,
    #[prost(message, repeated, tag = "3")]
    pub retention_policies: Vec<RetentionPolicyInfo>,
    #[prost(message, repeated, tag = "4")]
    pub continuous_queries: Vec<ContinuousQueryInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RetentionPolicyInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    /// Retention duration in nanoseconds; zero keeps data forever.
    #[prost(int64, tag = "2")]
    pub duration: i64,
    /// Width of each shard group interval, in nanoseconds.
    #[prost(int64, tag = "3")]
    pub shard_group_duration: i64,
    #[prost(uint32, tag = "4")]
    pub replica_n: u32,
    #[prost(message, repeated, tag = "5")]
    pub shard_groups: Vec<ShardGroupInfo>,
    #[prost(message, repeated, tag = "6")]
    pub subscriptions: Vec<SubscriptionInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ShardGroupInfo {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// Unix nanoseconds, inclusive.
    #[prost(int64, tag = "2")]
    pub start_time: i64,
    /// Unix nanoseconds, exclusive.
    #[prost(int64, tag = "3")]
    pub end_time: i64,
    /// Set when the group is marked deleted (unix nanoseconds).
    #[prost(int64, optional, tag = "4")]
    pub deleted_at: Option<i64>,
    /// Set when the group stops accepting writes (unix nanoseconds).
    #[prost(int64, optional, tag = "5")]
    pub truncated_at: Option<i64>,
    #[prost(message, repeated, tag = "6")]
    pub shards: Vec<ShardInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ShardInfo {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(message, repeated, tag = "2")]
    pub owners: Vec<ShardOwner>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ShardOwner {
    #[prost(uint64, tag = "1")]
    pub node_id: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ContinuousQueryInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub query: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SubscriptionInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "SubscriptionMode", tag = "2")]
    pub mode: i32,
    #[prost(string, repeated, tag = "3")]
    pub destinations: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum SubscriptionMode {
    /// Deliver each point to any one destination.
    Any = 0,
    /// Deliver each point to every destination.
    All = 1,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UserInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub hash: String,
    #[prost(bool, tag = "3")]
    pub admin: bool,
    /// Sorted by database name for deterministic encoding.
    #[prost(message, repeated, tag = "4")]
    pub privileges: Vec<UserPrivilege>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UserPrivilege {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(enumeration = "Privilege", tag = "2")]
    pub privilege: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Privilege {
    NoPrivileges = 0,
    Read = 1,
    Write = 2,
    All = 3,
}

impl Data {
    /// Encode this snapshot, stamping the current layout version.
    pub fn encode_snapshot(mut self) -> Vec<u8> {
        self.version = crate::SNAPSHOT_VERSION;
        prost::Message::encode_to_vec(&self)
    }

    /// Decode a snapshot blob, rejecting layouts we don't understand.
    pub fn decode_snapshot(buf: &[u8]) -> crate::Result<Self> {
        let data: Self = prost::Message::decode(buf).map_err(crate::Error::Snapshot)?;
        if data.version != crate::SNAPSHOT_VERSION {
            return Err(crate::Error::SnapshotVersion(data.version));
        }
        Ok(data)
    }
}
