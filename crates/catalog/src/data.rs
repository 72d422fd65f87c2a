use crate::{Error, Result, MAX_NANO_TIME, MIN_RETENTION_POLICY_DURATION};
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// The complete, owned catalog value.
///
/// `term` and `index` are the consensus coordinates of the last applied log
/// entry. `max_*` counters only ever grow, so IDs are never reused even after
/// their entity is deleted.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct Data {
    pub term: u64,
    pub index: u64,
    pub cluster_id: u64,

    pub meta_nodes: Vec<NodeInfo>,
    pub data_nodes: Vec<NodeInfo>,
    pub databases: Vec<DatabaseInfo>,
    pub users: Vec<UserInfo>,

    pub max_node_id: u64,
    pub max_shard_group_id: u64,
    pub max_shard_id: u64,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct NodeInfo {
    pub id: u64,
    /// HTTP service address.
    pub host: String,
    /// TCP (RPC) service address.
    pub tcp_host: String,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    /// Empty until a default retention policy is designated.
    pub default_retention_policy: String,
    pub retention_policies: Vec<RetentionPolicyInfo>,
    pub continuous_queries: Vec<ContinuousQueryInfo>,
}

impl DatabaseInfo {
    pub fn retention_policy(&self, name: &str) -> Option<&RetentionPolicyInfo> {
        self.retention_policies.iter().find(|rp| rp.name == name)
    }

    fn retention_policy_mut(&mut self, name: &str) -> Option<&mut RetentionPolicyInfo> {
        self.retention_policies
            .iter_mut()
            .find(|rp| rp.name == name)
    }

    pub fn continuous_query(&self, name: &str) -> Option<&ContinuousQueryInfo> {
        self.continuous_queries.iter().find(|cq| cq.name == name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct RetentionPolicyInfo {
    pub name: String,
    pub replica_n: usize,
    /// How long data is kept; zero keeps it forever.
    pub duration: Duration,
    /// Width of each shard group's time interval.
    pub shard_group_duration: Duration,
    pub shard_groups: Vec<ShardGroupInfo>,
    pub subscriptions: Vec<SubscriptionInfo>,
}

impl RetentionPolicyInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replica_n: 1,
            ..Default::default()
        }
    }

    /// The group that accepts writes at `t`, if one exists: it contains `t`,
    /// isn't deleted, and hasn't been truncated at or before `t`.
    pub fn shard_group_covering(&self, t: DateTime<Utc>) -> Option<&ShardGroupInfo> {
        self.shard_groups.iter().find(|g| g.covers(t))
    }

    pub fn shard_group(&self, id: u64) -> Option<&ShardGroupInfo> {
        self.shard_groups.iter().find(|g| g.id == id)
    }

    pub fn subscription(&self, name: &str) -> Option<&SubscriptionInfo> {
        self.subscriptions.iter().find(|s| s.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ShardGroupInfo {
    pub id: u64,
    /// Inclusive.
    pub start_time: DateTime<Utc>,
    /// Exclusive.
    pub end_time: DateTime<Utc>,
    /// Marked rather than removed, so readers drain before the prune pass.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Once set, no further writes route to this group.
    pub truncated_at: Option<DateTime<Utc>>,
    pub shards: Vec<ShardInfo>,
}

impl ShardGroupInfo {
    pub fn deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn truncated(&self) -> bool {
        self.truncated_at.is_some()
    }

    /// Whether `t` falls within `[start_time, end_time)`.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start_time <= t && t < self.end_time
    }

    /// Whether a write at `t` routes to this group.
    pub fn covers(&self, t: DateTime<Utc>) -> bool {
        self.contains(t)
            && !self.deleted()
            && match self.truncated_at {
                Some(truncated_at) => t < truncated_at,
                None => true,
            }
    }

    /// End of the interval this group effectively owns, accounting for
    /// truncation.
    pub fn effective_end(&self) -> DateTime<Utc> {
        match self.truncated_at {
            Some(truncated_at) if truncated_at < self.end_time => truncated_at,
            _ => self.end_time,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct ShardInfo {
    pub id: u64,
    pub owners: Vec<ShardOwner>,
}

impl ShardInfo {
    pub fn owned_by(&self, node_id: u64) -> bool {
        self.owners.iter().any(|o| o.node_id == node_id)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ShardOwner {
    pub node_id: u64,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct ContinuousQueryInfo {
    pub name: String,
    pub query: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionMode {
    /// Deliver each point to any one destination.
    #[default]
    Any,
    /// Deliver each point to every destination.
    All,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct SubscriptionInfo {
    pub name: String,
    pub mode: SubscriptionMode,
    pub destinations: Vec<String>,
}

/// Database-scoped capability of a user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub enum Privilege {
    #[default]
    NoPrivileges,
    Read,
    Write,
    All,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct UserInfo {
    pub name: String,
    pub hash: String,
    pub admin: bool,
    /// Database name → granted privilege.
    pub privileges: std::collections::BTreeMap<String, Privilege>,
}

/// A partial update of a retention policy; unset fields are left alone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetentionPolicyUpdate {
    pub name: Option<String>,
    pub duration: Option<Duration>,
    pub replica_n: Option<usize>,
    pub shard_group_duration: Option<Duration>,
}

impl Data {
    // ---- node lifecycle ----

    /// Add a meta node, assigning it a fresh ID.
    pub fn create_meta_node(&mut self, http_addr: &str, tcp_addr: &str) -> Result<u64> {
        if self.meta_nodes.iter().any(|n| n.host == http_addr) {
            return Err(Error::NodeExists(http_addr.to_string()));
        }

        self.max_node_id += 1;
        self.meta_nodes.push(NodeInfo {
            id: self.max_node_id,
            host: http_addr.to_string(),
            tcp_host: tcp_addr.to_string(),
        });
        Ok(self.max_node_id)
    }

    /// Install or re-address the sole meta node of a single-meta deployment.
    pub fn set_meta_node(&mut self, http_addr: &str, tcp_addr: &str) -> Result<u64> {
        match self.meta_nodes.first_mut() {
            None => self.create_meta_node(http_addr, tcp_addr),
            Some(node) => {
                node.host = http_addr.to_string();
                node.tcp_host = tcp_addr.to_string();
                Ok(node.id)
            }
        }
    }

    pub fn delete_meta_node(&mut self, id: u64) -> Result<()> {
        let index = self
            .meta_nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or(Error::NodeNotFound(id))?;
        self.meta_nodes.remove(index);
        Ok(())
    }

    /// Add a data node, assigning it a fresh ID.
    pub fn create_data_node(&mut self, http_addr: &str, tcp_addr: &str) -> Result<u64> {
        if self.data_nodes.iter().any(|n| n.host == http_addr) {
            return Err(Error::NodeExists(http_addr.to_string()));
        }

        self.max_node_id += 1;
        self.data_nodes.push(NodeInfo {
            id: self.max_node_id,
            host: http_addr.to_string(),
            tcp_host: tcp_addr.to_string(),
        });
        Ok(self.max_node_id)
    }

    /// Add a data node under an externally assigned ID. Used only when
    /// replaying pre-split logs, where the node ID was minted for the
    /// combined node.
    pub fn set_data_node(&mut self, id: u64, http_addr: &str, tcp_addr: &str) -> Result<()> {
        if self.data_nodes.iter().any(|n| n.id == id) {
            return Err(Error::NodeIdExists(id));
        }

        self.data_nodes.push(NodeInfo {
            id,
            host: http_addr.to_string(),
            tcp_host: tcp_addr.to_string(),
        });
        self.max_node_id = self.max_node_id.max(id);
        Ok(())
    }

    pub fn update_data_node(&mut self, id: u64, http_addr: &str, tcp_addr: &str) -> Result<()> {
        let node = self
            .data_nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(Error::NodeNotFound(id))?;
        node.host = http_addr.to_string();
        node.tcp_host = tcp_addr.to_string();
        Ok(())
    }

    pub fn delete_data_node(&mut self, id: u64) -> Result<()> {
        let index = self
            .data_nodes
            .iter()
            .position(|n| n.id == id)
            .ok_or(Error::NodeNotFound(id))?;
        self.data_nodes.remove(index);
        Ok(())
    }

    pub fn meta_node(&self, id: u64) -> Option<&NodeInfo> {
        self.meta_nodes.iter().find(|n| n.id == id)
    }

    pub fn data_node(&self, id: u64) -> Option<&NodeInfo> {
        self.data_nodes.iter().find(|n| n.id == id)
    }

    // ---- database lifecycle ----

    pub fn create_database(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::DatabaseNameRequired);
        }
        if self.database(name).is_some() {
            return Err(Error::DatabaseExists(name.to_string()));
        }

        self.databases.push(DatabaseInfo {
            name: name.to_string(),
            ..Default::default()
        });
        Ok(())
    }

    pub fn drop_database(&mut self, name: &str) -> Result<()> {
        let index = self
            .databases
            .iter()
            .position(|db| db.name == name)
            .ok_or_else(|| Error::DatabaseNotFound(name.to_string()))?;
        self.databases.remove(index);
        Ok(())
    }

    pub fn database(&self, name: &str) -> Option<&DatabaseInfo> {
        self.databases.iter().find(|db| db.name == name)
    }

    fn database_mut(&mut self, name: &str) -> Result<&mut DatabaseInfo> {
        self.databases
            .iter_mut()
            .find(|db| db.name == name)
            .ok_or_else(|| Error::DatabaseNotFound(name.to_string()))
    }

    // ---- retention policy lifecycle ----

    /// Create a retention policy. `spec.shard_groups` is ignored. Creating a
    /// policy that exactly matches an existing one is a no-op; a same-name
    /// policy with different parameters is an error.
    pub fn create_retention_policy(
        &mut self,
        database: &str,
        spec: &RetentionPolicyInfo,
        make_default: bool,
    ) -> Result<()> {
        if spec.name.is_empty() {
            return Err(Error::RetentionPolicyNameRequired);
        }
        if spec.replica_n < 1 {
            return Err(Error::ReplicationFactorTooLow);
        }
        if spec.duration != Duration::ZERO && spec.duration < MIN_RETENTION_POLICY_DURATION {
            return Err(Error::RetentionPolicyDurationTooLow);
        }

        let shard_group_duration = if spec.shard_group_duration == Duration::ZERO {
            crate::shard_group_duration_for(spec.duration)
        } else {
            spec.shard_group_duration
        };
        if spec.duration != Duration::ZERO && shard_group_duration > spec.duration {
            return Err(Error::IncompatibleDurations);
        }

        let db = self.database_mut(database)?;
        if let Some(existing) = db.retention_policy(&spec.name) {
            if existing.replica_n != spec.replica_n
                || existing.duration != spec.duration
                || existing.shard_group_duration != shard_group_duration
            {
                return Err(Error::RetentionPolicyExists(spec.name.clone()));
            }
            if make_default && db.default_retention_policy != spec.name {
                return Err(Error::RetentionPolicyConflict(spec.name.clone()));
            }
            return Ok(());
        }

        db.retention_policies.push(RetentionPolicyInfo {
            name: spec.name.clone(),
            replica_n: spec.replica_n,
            duration: spec.duration,
            shard_group_duration,
            shard_groups: Vec::new(),
            subscriptions: Vec::new(),
        });
        if make_default {
            db.default_retention_policy = spec.name.clone();
        }
        Ok(())
    }

    /// Drop a retention policy and all of its shard groups. The database
    /// default cannot be dropped without designating a replacement first.
    pub fn drop_retention_policy(&mut self, database: &str, name: &str) -> Result<()> {
        let db = self.database_mut(database)?;

        let index = db
            .retention_policies
            .iter()
            .position(|rp| rp.name == name)
            .ok_or_else(|| Error::RetentionPolicyNotFound(name.to_string()))?;
        if db.default_retention_policy == name {
            return Err(Error::RetentionPolicyIsDefault(name.to_string()));
        }
        db.retention_policies.remove(index);
        Ok(())
    }

    pub fn set_default_retention_policy(&mut self, database: &str, name: &str) -> Result<()> {
        let db = self.database_mut(database)?;
        if db.retention_policy(name).is_none() {
            return Err(Error::RetentionPolicyNotFound(name.to_string()));
        }
        db.default_retention_policy = name.to_string();
        Ok(())
    }

    pub fn update_retention_policy(
        &mut self,
        database: &str,
        name: &str,
        update: &RetentionPolicyUpdate,
        make_default: bool,
    ) -> Result<()> {
        if let Some(replica_n) = update.replica_n {
            if replica_n < 1 {
                return Err(Error::ReplicationFactorTooLow);
            }
        }
        if let Some(duration) = update.duration {
            if duration != Duration::ZERO && duration < MIN_RETENTION_POLICY_DURATION {
                return Err(Error::RetentionPolicyDurationTooLow);
            }
        }

        let db = self.database_mut(database)?;
        if db.retention_policy(name).is_none() {
            return Err(Error::RetentionPolicyNotFound(name.to_string()));
        }

        // A rename must not collide with a sibling policy.
        if let Some(new_name) = &update.name {
            if new_name.is_empty() {
                return Err(Error::RetentionPolicyNameRequired);
            }
            if new_name != name && db.retention_policy(new_name).is_some() {
                return Err(Error::RetentionPolicyExists(new_name.clone()));
            }
        }

        let was_default = db.default_retention_policy == name;
        let rp = match db.retention_policy_mut(name) {
            Some(rp) => rp,
            None => return Err(Error::RetentionPolicyNotFound(name.to_string())),
        };

        let duration = update.duration.unwrap_or(rp.duration);
        let shard_group_duration = match update.shard_group_duration {
            Some(sgd) if sgd != Duration::ZERO => sgd,
            Some(_) => crate::shard_group_duration_for(duration),
            None => rp.shard_group_duration,
        };
        if duration != Duration::ZERO && shard_group_duration > duration {
            return Err(Error::IncompatibleDurations);
        }

        if let Some(new_name) = &update.name {
            rp.name = new_name.clone();
        }
        if let Some(replica_n) = update.replica_n {
            rp.replica_n = replica_n;
        }
        rp.duration = duration;
        rp.shard_group_duration = shard_group_duration;

        let final_name = rp.name.clone();
        if make_default || was_default {
            db.default_retention_policy = final_name;
        }
        Ok(())
    }

    pub fn retention_policy(&self, database: &str, name: &str) -> Result<&RetentionPolicyInfo> {
        let db = self
            .database(database)
            .ok_or_else(|| Error::DatabaseNotFound(database.to_string()))?;
        db.retention_policy(name)
            .ok_or_else(|| Error::RetentionPolicyNotFound(name.to_string()))
    }

    fn retention_policy_mut(
        &mut self,
        database: &str,
        name: &str,
    ) -> Result<&mut RetentionPolicyInfo> {
        let db = self.database_mut(database)?;
        db.retention_policy_mut(name)
            .ok_or_else(|| Error::RetentionPolicyNotFound(name.to_string()))
    }

    // ---- shard group lifecycle ----

    /// Create the shard group covering `timestamp`, or succeed silently if
    /// one already does.
    ///
    /// The group's interval is aligned down to a multiple of the policy's
    /// shard group duration from the unix epoch, then narrowed so it doesn't
    /// overlap the effective interval of any sibling (a truncated group owns
    /// only `[start, truncated_at)`). Shards and owners are assigned by
    /// round-robin over data nodes in ascending ID order, rotated by the
    /// group ID so consecutive groups spread load.
    pub fn create_shard_group(
        &mut self,
        database: &str,
        policy: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let rp = self.retention_policy(database, policy)?;
        if rp.shard_group_covering(timestamp).is_some() {
            return Ok(());
        }
        if self.data_nodes.is_empty() {
            return Err(Error::DataNodesRequired);
        }

        let replica_n = rp.replica_n.min(self.data_nodes.len()).max(1);
        let width = duration_nanos(rp.shard_group_duration).max(1);
        let t = to_nanos(timestamp);

        let mut start = t - t.rem_euclid(width);
        let mut end = start.saturating_add(width).min(MAX_NANO_TIME);

        // Narrow [start, end) around siblings' effective intervals.
        for g in &rp.shard_groups {
            if g.deleted() {
                continue;
            }
            let g_start = to_nanos(g.start_time);
            let g_end = to_nanos(g.effective_end());
            if g_end <= start || g_start >= end {
                continue;
            }
            if g_end <= t {
                start = start.max(g_end);
            } else if g_start > t {
                end = end.min(g_start);
            }
        }

        let mut nodes: Vec<u64> = self.data_nodes.iter().map(|n| n.id).collect();
        nodes.sort_unstable();
        let node_n = nodes.len();
        let shard_n = (node_n / replica_n).max(1);

        self.max_shard_group_id += 1;
        let mut group = ShardGroupInfo {
            id: self.max_shard_group_id,
            start_time: from_nanos(start),
            end_time: from_nanos(end),
            deleted_at: None,
            truncated_at: None,
            shards: Vec::with_capacity(shard_n),
        };

        let mut node_index = group.id as usize % node_n;
        for _ in 0..shard_n {
            self.max_shard_id += 1;
            let mut owners = Vec::with_capacity(replica_n);
            for _ in 0..replica_n {
                owners.push(ShardOwner {
                    node_id: nodes[node_index % node_n],
                });
                node_index += 1;
            }
            owners.sort_unstable_by_key(|o| o.node_id);
            group.shards.push(ShardInfo {
                id: self.max_shard_id,
                owners,
            });
        }

        let rp = self.retention_policy_mut(database, policy)?;
        rp.shard_groups.push(group);
        rp.shard_groups
            .sort_by_key(|g| (to_nanos(g.start_time), g.id));
        Ok(())
    }

    /// Mark a shard group deleted as of `at`. The group remains visible to
    /// readers until pruned.
    pub fn delete_shard_group(
        &mut self,
        database: &str,
        policy: &str,
        id: u64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let rp = self.retention_policy_mut(database, policy)?;
        let group = rp
            .shard_groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or(Error::ShardGroupNotFound(id))?;
        group.deleted_at = Some(at);
        Ok(())
    }

    /// Remove deleted shard groups whose data has aged out: the group ended
    /// more than one retention period before `now`.
    pub fn prune_shard_groups(&mut self, now: DateTime<Utc>) {
        for db in &mut self.databases {
            for rp in &mut db.retention_policies {
                let horizon = duration_nanos(rp.duration);
                rp.shard_groups.retain(|g| {
                    !(g.deleted() && to_nanos(g.end_time).saturating_add(horizon) < to_nanos(now))
                });
            }
        }
    }

    /// Stop writes at `t`: every group currently covering `t` is truncated
    /// there, and a later `create_shard_group` fills the remainder of the
    /// interval with a fresh group.
    pub fn truncate_shard_groups(&mut self, t: DateTime<Utc>) {
        for db in &mut self.databases {
            for rp in &mut db.retention_policies {
                for g in &mut rp.shard_groups {
                    if !g.deleted() && !g.truncated() && g.contains(t) {
                        g.truncated_at = Some(t);
                    }
                }
            }
        }
    }

    // ---- shard lifecycle ----

    /// Remove a shard from whichever group holds it. Unknown IDs are a no-op.
    pub fn drop_shard(&mut self, id: u64) {
        for db in &mut self.databases {
            for rp in &mut db.retention_policies {
                for g in &mut rp.shard_groups {
                    g.shards.retain(|s| s.id != id);
                }
            }
        }
    }

    /// Add `node_id` to a shard's owner set. Owner sets are duplicate-free;
    /// re-adding an owner or naming an unknown shard is a no-op.
    pub fn copy_shard_owner(&mut self, shard_id: u64, node_id: u64) {
        self.with_shard_mut(shard_id, |shard| {
            if !shard.owned_by(node_id) {
                shard.owners.push(ShardOwner { node_id });
                shard.owners.sort_unstable_by_key(|o| o.node_id);
            }
        });
    }

    /// Remove `node_id` from a shard's owner set. No-op if absent.
    pub fn remove_shard_owner(&mut self, shard_id: u64, node_id: u64) {
        self.with_shard_mut(shard_id, |shard| {
            shard.owners.retain(|o| o.node_id != node_id);
        });
    }

    fn with_shard_mut(&mut self, shard_id: u64, f: impl FnOnce(&mut ShardInfo)) {
        for db in &mut self.databases {
            for rp in &mut db.retention_policies {
                for g in &mut rp.shard_groups {
                    if let Some(shard) = g.shards.iter_mut().find(|s| s.id == shard_id) {
                        f(shard);
                        return;
                    }
                }
            }
        }
    }

    // ---- continuous query lifecycle ----

    /// Create a continuous query. Re-creating an identical query is a no-op;
    /// a same-name query with different text is an error.
    pub fn create_continuous_query(
        &mut self,
        database: &str,
        name: &str,
        query: &str,
    ) -> Result<()> {
        let db = self.database_mut(database)?;
        if let Some(existing) = db.continuous_query(name) {
            if existing.query == query {
                return Ok(());
            }
            return Err(Error::ContinuousQueryExists(name.to_string()));
        }

        db.continuous_queries.push(ContinuousQueryInfo {
            name: name.to_string(),
            query: query.to_string(),
        });
        Ok(())
    }

    pub fn drop_continuous_query(&mut self, database: &str, name: &str) -> Result<()> {
        let db = self.database_mut(database)?;
        let index = db
            .continuous_queries
            .iter()
            .position(|cq| cq.name == name)
            .ok_or_else(|| Error::ContinuousQueryNotFound(name.to_string()))?;
        db.continuous_queries.remove(index);
        Ok(())
    }

    // ---- subscription lifecycle ----

    pub fn create_subscription(
        &mut self,
        database: &str,
        policy: &str,
        name: &str,
        mode: SubscriptionMode,
        destinations: Vec<String>,
    ) -> Result<()> {
        let rp = self.retention_policy_mut(database, policy)?;
        if rp.subscription(name).is_some() {
            return Err(Error::SubscriptionExists(name.to_string()));
        }

        rp.subscriptions.push(SubscriptionInfo {
            name: name.to_string(),
            mode,
            destinations,
        });
        Ok(())
    }

    pub fn drop_subscription(&mut self, database: &str, policy: &str, name: &str) -> Result<()> {
        let rp = self.retention_policy_mut(database, policy)?;
        let index = rp
            .subscriptions
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::SubscriptionNotFound(name.to_string()))?;
        rp.subscriptions.remove(index);
        Ok(())
    }

    // ---- user & privilege lifecycle ----

    pub fn create_user(&mut self, name: &str, hash: &str, admin: bool) -> Result<()> {
        if self.user(name).is_some() {
            return Err(Error::UserExists(name.to_string()));
        }

        self.users.push(UserInfo {
            name: name.to_string(),
            hash: hash.to_string(),
            admin,
            privileges: Default::default(),
        });
        Ok(())
    }

    pub fn drop_user(&mut self, name: &str) -> Result<()> {
        let index = self
            .users
            .iter()
            .position(|u| u.name == name)
            .ok_or_else(|| Error::UserNotFound(name.to_string()))?;
        self.users.remove(index);
        Ok(())
    }

    pub fn update_user(&mut self, name: &str, hash: &str) -> Result<()> {
        let user = self.user_mut(name)?;
        user.hash = hash.to_string();
        Ok(())
    }

    pub fn set_privilege(&mut self, username: &str, database: &str, p: Privilege) -> Result<()> {
        if self.database(database).is_none() {
            return Err(Error::DatabaseNotFound(database.to_string()));
        }
        let user = self.user_mut(username)?;
        user.privileges.insert(database.to_string(), p);
        Ok(())
    }

    pub fn set_admin_privilege(&mut self, username: &str, admin: bool) -> Result<()> {
        let user = self.user_mut(username)?;
        user.admin = admin;
        Ok(())
    }

    pub fn user(&self, name: &str) -> Option<&UserInfo> {
        self.users.iter().find(|u| u.name == name)
    }

    fn user_mut(&mut self, name: &str) -> Result<&mut UserInfo> {
        self.users
            .iter_mut()
            .find(|u| u.name == name)
            .ok_or_else(|| Error::UserNotFound(name.to_string()))
    }
}

pub(crate) fn to_nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(MAX_NANO_TIME)
}

pub(crate) fn from_nanos(n: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(n)
}

pub(crate) fn duration_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod test {
    use super::*;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn ts(nanos: i64) -> DateTime<Utc> {
        from_nanos(nanos)
    }

    /// A catalog with four data nodes and one database carrying an
    /// hour-sharded policy.
    fn fixture() -> Data {
        let mut data = Data::default();
        for i in 1..=4 {
            data.create_data_node(&format!("d{i}:8086"), &format!("d{i}:8088"))
                .unwrap();
        }
        data.create_database("db0").unwrap();
        data.create_retention_policy(
            "db0",
            &RetentionPolicyInfo {
                name: "rp0".to_string(),
                replica_n: 2,
                duration: HOUR,
                shard_group_duration: HOUR,
                ..Default::default()
            },
            true,
        )
        .unwrap();
        data
    }

    #[test]
    fn test_clones_share_no_structure() {
        let original = fixture();
        let mut clone = original.clone();

        clone.create_database("db1").unwrap();
        clone.copy_shard_owner(1, 9);
        clone.data_nodes[0].host = "mutated".to_string();

        let pristine = fixture();
        assert_eq!(original, pristine);
    }

    #[test]
    fn test_duplicate_creates_fail() {
        let mut data = fixture();

        assert_eq!(
            data.create_database("db0"),
            Err(Error::DatabaseExists("db0".to_string())),
        );
        assert_eq!(
            data.create_data_node("d1:8086", "d1:8088"),
            Err(Error::NodeExists("d1:8086".to_string())),
        );
        data.create_user("u", "h", false).unwrap();
        assert_eq!(
            data.create_user("u", "h", false),
            Err(Error::UserExists("u".to_string())),
        );
    }

    #[test]
    fn test_create_retention_policy_idempotence_and_conflict() {
        let mut data = fixture();
        let spec = RetentionPolicyInfo {
            name: "rp0".to_string(),
            replica_n: 2,
            duration: HOUR,
            shard_group_duration: HOUR,
            ..Default::default()
        };

        // Identical re-create is a no-op.
        assert_eq!(data.create_retention_policy("db0", &spec, true), Ok(()));

        // Different parameters are an error.
        let changed = RetentionPolicyInfo {
            replica_n: 3,
            ..spec.clone()
        };
        assert_eq!(
            data.create_retention_policy("db0", &changed, false),
            Err(Error::RetentionPolicyExists("rp0".to_string())),
        );
    }

    #[test]
    fn test_retention_policy_validation() {
        let mut data = fixture();

        let bad_replica = RetentionPolicyInfo {
            name: "bad".to_string(),
            replica_n: 0,
            ..Default::default()
        };
        assert_eq!(
            data.create_retention_policy("db0", &bad_replica, false),
            Err(Error::ReplicationFactorTooLow),
        );

        let bad_duration = RetentionPolicyInfo {
            name: "bad".to_string(),
            replica_n: 1,
            duration: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(
            data.create_retention_policy("db0", &bad_duration, false),
            Err(Error::RetentionPolicyDurationTooLow),
        );

        // A zero shard group duration derives from the retention duration.
        let derived = RetentionPolicyInfo {
            name: "derived".to_string(),
            replica_n: 1,
            duration: Duration::from_secs(90 * 24 * 60 * 60),
            ..Default::default()
        };
        data.create_retention_policy("db0", &derived, false).unwrap();
        assert_eq!(
            data.retention_policy("db0", "derived")
                .unwrap()
                .shard_group_duration,
            Duration::from_secs(24 * 60 * 60),
        );
    }

    #[test]
    fn test_default_retention_policy_cannot_be_dropped() {
        let mut data = fixture();
        assert_eq!(
            data.drop_retention_policy("db0", "rp0"),
            Err(Error::RetentionPolicyIsDefault("rp0".to_string())),
        );

        // Designating a replacement unblocks the drop.
        data.create_retention_policy("db0", &RetentionPolicyInfo::new("rp1"), true)
            .unwrap();
        data.drop_retention_policy("db0", "rp0").unwrap();
        assert!(data.retention_policy("db0", "rp0").is_err());
    }

    #[test]
    fn test_shard_group_assignment() {
        let mut data = fixture();
        data.create_shard_group("db0", "rp0", ts(1_000_000_000)).unwrap();

        let rp = data.retention_policy("db0", "rp0").unwrap();
        let group = &rp.shard_groups[0];

        // Aligned down to the hour boundary containing t=1s.
        assert_eq!(group.start_time, ts(0));
        assert_eq!(group.end_time, ts(3_600_000_000_000));

        // Four nodes at replication two: two shards of two owners each, all
        // four nodes used exactly once.
        assert_eq!(group.shards.len(), 2);
        let mut owners: Vec<u64> = group
            .shards
            .iter()
            .flat_map(|s| s.owners.iter().map(|o| o.node_id))
            .collect();
        owners.sort_unstable();
        assert_eq!(owners, vec![1, 2, 3, 4]);

        // A covered timestamp is a silent no-op.
        data.create_shard_group("db0", "rp0", ts(2_000_000_000)).unwrap();
        assert_eq!(
            data.retention_policy("db0", "rp0").unwrap().shard_groups.len(),
            1,
        );
    }

    #[test]
    fn test_shard_group_determinism() {
        let build = || {
            let mut data = fixture();
            data.create_shard_group("db0", "rp0", ts(1_000_000_000)).unwrap();
            data.create_shard_group("db0", "rp0", ts(4_000_000_000_000)).unwrap();
            data
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_shard_groups_never_overlap() {
        let mut data = fixture();
        data.create_shard_group("db0", "rp0", ts(1_000_000_000)).unwrap();

        // Truncate mid-interval, then create a follow-on group there.
        let cut = ts(1_800_000_000_000);
        data.truncate_shard_groups(cut);
        data.create_shard_group("db0", "rp0", cut).unwrap();

        let rp = data.retention_policy("db0", "rp0").unwrap();
        assert_eq!(rp.shard_groups.len(), 2);

        let (first, second) = (&rp.shard_groups[0], &rp.shard_groups[1]);
        assert_eq!(first.truncated_at, Some(cut));
        assert_eq!(second.start_time, cut);
        assert_eq!(second.end_time, ts(3_600_000_000_000));

        // Effective intervals are disjoint.
        assert!(first.effective_end() <= second.start_time);

        // Writes before the cut route to the first group, after to the second.
        assert_eq!(rp.shard_group_covering(ts(1_000_000_000)).unwrap().id, first.id);
        assert_eq!(rp.shard_group_covering(cut).unwrap().id, second.id);
    }

    #[test]
    fn test_delete_and_prune_shard_groups() {
        let mut data = fixture();
        data.create_shard_group("db0", "rp0", ts(1_000_000_000)).unwrap();
        let id = data.retention_policy("db0", "rp0").unwrap().shard_groups[0].id;

        data.delete_shard_group("db0", "rp0", id, ts(5_000_000_000)).unwrap();
        assert!(data.retention_policy("db0", "rp0").unwrap().shard_groups[0].deleted());

        // Still within the retention horizon: kept.
        data.prune_shard_groups(ts(3_600_000_000_000));
        assert_eq!(data.retention_policy("db0", "rp0").unwrap().shard_groups.len(), 1);

        // One retention period past the group's end: pruned.
        data.prune_shard_groups(ts(2 * 3_600_000_000_000 + 1));
        assert!(data.retention_policy("db0", "rp0").unwrap().shard_groups.is_empty());

        assert_eq!(
            data.delete_shard_group("db0", "rp0", 999, ts(0)),
            Err(Error::ShardGroupNotFound(999)),
        );
    }

    #[test]
    fn test_shard_owner_sets_stay_duplicate_free() {
        let mut data = fixture();
        data.create_shard_group("db0", "rp0", ts(1_000_000_000)).unwrap();
        let shard_id = data.retention_policy("db0", "rp0").unwrap().shard_groups[0].shards[0].id;

        data.copy_shard_owner(shard_id, 9);
        data.copy_shard_owner(shard_id, 9);
        data.copy_shard_owner(shard_id, 9);

        let owners = |data: &Data| {
            data.retention_policy("db0", "rp0").unwrap().shard_groups[0].shards[0]
                .owners
                .clone()
        };
        let with_nine = owners(&data);
        assert_eq!(with_nine.iter().filter(|o| o.node_id == 9).count(), 1);

        data.remove_shard_owner(shard_id, 9);
        data.remove_shard_owner(shard_id, 9);
        assert!(!owners(&data).iter().any(|o| o.node_id == 9));
    }

    #[test]
    fn test_continuous_query_lifecycle() {
        let mut data = fixture();
        let q = "SELECT mean(value) INTO out FROM in GROUP BY time(1m)";

        data.create_continuous_query("db0", "cq0", q).unwrap();
        // Identical re-create is a no-op.
        data.create_continuous_query("db0", "cq0", q).unwrap();
        assert_eq!(
            data.create_continuous_query("db0", "cq0", "SELECT 1"),
            Err(Error::ContinuousQueryExists("cq0".to_string())),
        );

        data.drop_continuous_query("db0", "cq0").unwrap();
        assert_eq!(
            data.drop_continuous_query("db0", "cq0"),
            Err(Error::ContinuousQueryNotFound("cq0".to_string())),
        );
    }

    #[test]
    fn test_user_and_privilege_lifecycle() {
        let mut data = fixture();

        data.create_user("root", "hash0", true).unwrap();
        data.create_user("reader", "hash1", false).unwrap();

        data.set_privilege("reader", "db0", Privilege::Read).unwrap();
        assert_eq!(
            data.set_privilege("reader", "nope", Privilege::Read),
            Err(Error::DatabaseNotFound("nope".to_string())),
        );

        data.set_admin_privilege("reader", true).unwrap();
        data.update_user("reader", "hash2").unwrap();

        let reader = data.user("reader").unwrap();
        assert!(reader.admin);
        assert_eq!(reader.hash, "hash2");
        assert_eq!(reader.privileges["db0"], Privilege::Read);

        data.drop_user("root").unwrap();
        assert_eq!(
            data.drop_user("root"),
            Err(Error::UserNotFound("root".to_string())),
        );
    }

    #[test]
    fn test_subscription_lifecycle() {
        let mut data = fixture();

        data.create_subscription(
            "db0",
            "rp0",
            "sub0",
            SubscriptionMode::All,
            vec!["udp://h1:9000".to_string()],
        )
        .unwrap();
        assert_eq!(
            data.create_subscription("db0", "rp0", "sub0", SubscriptionMode::Any, Vec::new()),
            Err(Error::SubscriptionExists("sub0".to_string())),
        );

        data.drop_subscription("db0", "rp0", "sub0").unwrap();
        assert_eq!(
            data.drop_subscription("db0", "rp0", "sub0"),
            Err(Error::SubscriptionNotFound("sub0".to_string())),
        );
    }

    #[test]
    fn test_catalog_snapshot_shape() {
        let mut data = fixture();
        data.create_user("root", "xxhashxx", true).unwrap();

        insta::assert_json_snapshot!(serde_json::json!({
            "databases": data.databases,
            "users": data.users,
        }), @r###"
        {
          "databases": [
            {
              "continuous_queries": [],
              "default_retention_policy": "rp0",
              "name": "db0",
              "retention_policies": [
                {
                  "duration": {
                    "nanos": 0,
                    "secs": 3600
                  },
                  "name": "rp0",
                  "replica_n": 2,
                  "shard_group_duration": {
                    "nanos": 0,
                    "secs": 3600
                  },
                  "shard_groups": [],
                  "subscriptions": []
                }
              ]
            }
          ],
          "users": [
            {
              "admin": true,
              "hash": "xxhashxx",
              "name": "root",
              "privileges": {}
            }
          ]
        }
        "###);
    }
}
