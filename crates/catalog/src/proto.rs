//! Conversions between the in-memory catalog and its snapshot wire schema.
//!
//! Decoding is total: unknown enum codes and negative durations collapse to
//! their zero values rather than failing, so a snapshot written by a newer
//! peer still restores (envelope versioning rejects truly incompatible
//! layouts before we get here).

use crate::data::{duration_nanos, from_nanos, to_nanos};
use crate::{
    ContinuousQueryInfo, Data, DatabaseInfo, NodeInfo, Privilege, RetentionPolicyInfo,
    ShardGroupInfo, ShardInfo, ShardOwner, SubscriptionInfo, SubscriptionMode, UserInfo,
};
use std::time::Duration;

fn duration_from_nanos(nanos: i64) -> Duration {
    Duration::from_nanos(nanos.max(0) as u64)
}

impl From<proto_meta::Privilege> for Privilege {
    fn from(p: proto_meta::Privilege) -> Self {
        match p {
            proto_meta::Privilege::NoPrivileges => Privilege::NoPrivileges,
            proto_meta::Privilege::Read => Privilege::Read,
            proto_meta::Privilege::Write => Privilege::Write,
            proto_meta::Privilege::All => Privilege::All,
        }
    }
}

impl From<Privilege> for proto_meta::Privilege {
    fn from(p: Privilege) -> Self {
        match p {
            Privilege::NoPrivileges => proto_meta::Privilege::NoPrivileges,
            Privilege::Read => proto_meta::Privilege::Read,
            Privilege::Write => proto_meta::Privilege::Write,
            Privilege::All => proto_meta::Privilege::All,
        }
    }
}

/// Decode a raw privilege code, defaulting unknown codes to no privileges.
pub fn privilege_from_code(code: i32) -> Privilege {
    proto_meta::Privilege::try_from(code)
        .map(Privilege::from)
        .unwrap_or(Privilege::NoPrivileges)
}

impl From<proto_meta::SubscriptionMode> for SubscriptionMode {
    fn from(m: proto_meta::SubscriptionMode) -> Self {
        match m {
            proto_meta::SubscriptionMode::Any => SubscriptionMode::Any,
            proto_meta::SubscriptionMode::All => SubscriptionMode::All,
        }
    }
}

impl From<SubscriptionMode> for proto_meta::SubscriptionMode {
    fn from(m: SubscriptionMode) -> Self {
        match m {
            SubscriptionMode::Any => proto_meta::SubscriptionMode::Any,
            SubscriptionMode::All => proto_meta::SubscriptionMode::All,
        }
    }
}

/// Decode a raw subscription mode code, defaulting unknown codes to ANY.
pub fn subscription_mode_from_code(code: i32) -> SubscriptionMode {
    proto_meta::SubscriptionMode::try_from(code)
        .map(SubscriptionMode::from)
        .unwrap_or(SubscriptionMode::Any)
}

impl From<&NodeInfo> for proto_meta::NodeInfo {
    fn from(n: &NodeInfo) -> Self {
        Self {
            id: n.id,
            host: n.host.clone(),
            tcp_host: n.tcp_host.clone(),
        }
    }
}

impl From<proto_meta::NodeInfo> for NodeInfo {
    fn from(n: proto_meta::NodeInfo) -> Self {
        Self {
            id: n.id,
            host: n.host,
            tcp_host: n.tcp_host,
        }
    }
}

impl From<&ShardGroupInfo> for proto_meta::ShardGroupInfo {
    fn from(g: &ShardGroupInfo) -> Self {
        Self {
            id: g.id,
            start_time: to_nanos(g.start_time),
            end_time: to_nanos(g.end_time),
            deleted_at: g.deleted_at.map(to_nanos),
            truncated_at: g.truncated_at.map(to_nanos),
            shards: g
                .shards
                .iter()
                .map(|s| proto_meta::ShardInfo {
                    id: s.id,
                    owners: s
                        .owners
                        .iter()
                        .map(|o| proto_meta::ShardOwner { node_id: o.node_id })
                        .collect(),
                })
                .collect(),
        }
    }
}

impl From<proto_meta::ShardGroupInfo> for ShardGroupInfo {
    fn from(g: proto_meta::ShardGroupInfo) -> Self {
        Self {
            id: g.id,
            start_time: from_nanos(g.start_time),
            end_time: from_nanos(g.end_time),
            deleted_at: g.deleted_at.map(from_nanos),
            truncated_at: g.truncated_at.map(from_nanos),
            shards: g
                .shards
                .into_iter()
                .map(|s| ShardInfo {
                    id: s.id,
                    owners: s
                        .owners
                        .into_iter()
                        .map(|o| ShardOwner { node_id: o.node_id })
                        .collect(),
                })
                .collect(),
        }
    }
}

impl From<&RetentionPolicyInfo> for proto_meta::RetentionPolicyInfo {
    fn from(rp: &RetentionPolicyInfo) -> Self {
        Self {
            name: rp.name.clone(),
            duration: duration_nanos(rp.duration),
            shard_group_duration: duration_nanos(rp.shard_group_duration),
            replica_n: rp.replica_n as u32,
            shard_groups: rp.shard_groups.iter().map(Into::into).collect(),
            subscriptions: rp
                .subscriptions
                .iter()
                .map(|s| proto_meta::SubscriptionInfo {
                    name: s.name.clone(),
                    mode: proto_meta::SubscriptionMode::from(s.mode) as i32,
                    destinations: s.destinations.clone(),
                })
                .collect(),
        }
    }
}

impl From<proto_meta::RetentionPolicyInfo> for RetentionPolicyInfo {
    fn from(rp: proto_meta::RetentionPolicyInfo) -> Self {
        Self {
            name: rp.name,
            replica_n: rp.replica_n as usize,
            duration: duration_from_nanos(rp.duration),
            shard_group_duration: duration_from_nanos(rp.shard_group_duration),
            shard_groups: rp.shard_groups.into_iter().map(Into::into).collect(),
            subscriptions: rp
                .subscriptions
                .into_iter()
                .map(|s| SubscriptionInfo {
                    name: s.name,
                    mode: subscription_mode_from_code(s.mode),
                    destinations: s.destinations,
                })
                .collect(),
        }
    }
}

impl From<&DatabaseInfo> for proto_meta::DatabaseInfo {
    fn from(db: &DatabaseInfo) -> Self {
        Self {
            name: db.name.clone(),
            default_retention_policy: db.default_retention_policy.clone(),
            retention_policies: db.retention_policies.iter().map(Into::into).collect(),
            continuous_queries: db
                .continuous_queries
                .iter()
                .map(|cq| proto_meta::ContinuousQueryInfo {
                    name: cq.name.clone(),
                    query: cq.query.clone(),
                })
                .collect(),
        }
    }
}

impl From<proto_meta::DatabaseInfo> for DatabaseInfo {
    fn from(db: proto_meta::DatabaseInfo) -> Self {
        Self {
            name: db.name,
            default_retention_policy: db.default_retention_policy,
            retention_policies: db.retention_policies.into_iter().map(Into::into).collect(),
            continuous_queries: db
                .continuous_queries
                .into_iter()
                .map(|cq| ContinuousQueryInfo {
                    name: cq.name,
                    query: cq.query,
                })
                .collect(),
        }
    }
}

impl From<&UserInfo> for proto_meta::UserInfo {
    fn from(u: &UserInfo) -> Self {
        Self {
            name: u.name.clone(),
            hash: u.hash.clone(),
            admin: u.admin,
            // BTreeMap iteration keeps this sorted by database name.
            privileges: u
                .privileges
                .iter()
                .map(|(database, p)| proto_meta::UserPrivilege {
                    database: database.clone(),
                    privilege: proto_meta::Privilege::from(*p) as i32,
                })
                .collect(),
        }
    }
}

impl From<proto_meta::UserInfo> for UserInfo {
    fn from(u: proto_meta::UserInfo) -> Self {
        Self {
            name: u.name,
            hash: u.hash,
            admin: u.admin,
            privileges: u
                .privileges
                .into_iter()
                .map(|p| (p.database, privilege_from_code(p.privilege)))
                .collect(),
        }
    }
}

impl From<&Data> for proto_meta::Data {
    fn from(data: &Data) -> Self {
        Self {
            version: proto_meta::SNAPSHOT_VERSION,
            term: data.term,
            index: data.index,
            cluster_id: data.cluster_id,
            meta_nodes: data.meta_nodes.iter().map(Into::into).collect(),
            data_nodes: data.data_nodes.iter().map(Into::into).collect(),
            databases: data.databases.iter().map(Into::into).collect(),
            users: data.users.iter().map(Into::into).collect(),
            max_node_id: data.max_node_id,
            max_shard_group_id: data.max_shard_group_id,
            max_shard_id: data.max_shard_id,
        }
    }
}

impl From<proto_meta::Data> for Data {
    fn from(data: proto_meta::Data) -> Self {
        Self {
            term: data.term,
            index: data.index,
            cluster_id: data.cluster_id,
            meta_nodes: data.meta_nodes.into_iter().map(Into::into).collect(),
            data_nodes: data.data_nodes.into_iter().map(Into::into).collect(),
            databases: data.databases.into_iter().map(Into::into).collect(),
            users: data.users.into_iter().map(Into::into).collect(),
            max_node_id: data.max_node_id,
            max_shard_group_id: data.max_shard_group_id,
            max_shard_id: data.max_shard_id,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::from_nanos;

    #[test]
    fn test_catalog_proto_round_trip() {
        let mut data = Data::default();
        data.cluster_id = 42;
        data.term = 3;
        data.index = 17;

        data.create_meta_node("m1:8091", "m1:8089").unwrap();
        for i in 1..=3 {
            data.create_data_node(&format!("d{i}:8086"), &format!("d{i}:8088"))
                .unwrap();
        }
        data.create_database("db0").unwrap();
        data.create_retention_policy(
            "db0",
            &RetentionPolicyInfo {
                name: "rp0".to_string(),
                replica_n: 2,
                duration: Duration::from_secs(7200),
                shard_group_duration: Duration::from_secs(3600),
                ..Default::default()
            },
            true,
        )
        .unwrap();
        data.create_shard_group("db0", "rp0", from_nanos(1_000_000_000))
            .unwrap();
        data.truncate_shard_groups(from_nanos(1_800_000_000_000));
        data.create_continuous_query("db0", "cq0", "SELECT 1").unwrap();
        data.create_subscription(
            "db0",
            "rp0",
            "sub0",
            SubscriptionMode::All,
            vec!["udp://h1:9000".to_string()],
        )
        .unwrap();
        data.create_user("root", "hash", true).unwrap();
        data.set_privilege("root", "db0", Privilege::All).unwrap();

        let encoded = proto_meta::Data::from(&data).encode_snapshot();
        let decoded = Data::from(proto_meta::Data::decode_snapshot(&encoded).unwrap());
        assert_eq!(data, decoded);
    }

    #[test]
    fn test_snapshot_encoding_is_deterministic() {
        let build = || {
            let mut data = Data::default();
            data.create_data_node("d1:8086", "d1:8088").unwrap();
            data.create_database("db0").unwrap();
            data.create_user("u", "h", false).unwrap();
            data.set_privilege("u", "db0", Privilege::Write).unwrap();
            proto_meta::Data::from(&data).encode_snapshot()
        };
        assert_eq!(build(), build());
    }
}
