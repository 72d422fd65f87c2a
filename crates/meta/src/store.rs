use crate::{Config, Error, LocalConsensus, PeerControl, RaftState, Result, StoreFsm};
use catalog::Data;
use chrono::{DateTime, Utc};
use proto_meta::*;
use std::sync::Arc;
use tokio::sync::watch;

/// The metadata store a meta node runs: the FSM plus its consensus binding,
/// behind a typed command surface.
///
/// Reads never touch consensus — they see whatever the local FSM has
/// applied. Writes are proposed through the binding and surface the FSM's
/// apply outcome.
#[derive(Clone)]
pub struct Store {
    fsm: Arc<StoreFsm>,
    raft: RaftState,
}

impl Store {
    /// Open a single-meta-node store backed by [`LocalConsensus`].
    pub fn open(config: Config) -> Self {
        let fsm = Arc::new(StoreFsm::new(config.clone()));
        let engine = LocalConsensus::new(
            fsm.clone(),
            config.http_bind_address.clone(),
            config.snapshot_threshold,
        );
        fsm.set_peer_control(Arc::downgrade(&(engine.clone() as Arc<dyn PeerControl>)));

        let raft = RaftState::new(engine.clone(), engine, config.apply_timeout);
        Self { fsm, raft }
    }

    /// Open against an externally provided consensus engine.
    pub fn open_with(fsm: Arc<StoreFsm>, raft: RaftState) -> Self {
        Self { fsm, raft }
    }

    /// The current catalog.
    pub fn data(&self) -> Arc<Data> {
        self.fsm.data()
    }

    /// Watch for catalog changes; see [`StoreFsm::data_changed`].
    pub fn data_changed(&self) -> watch::Receiver<u64> {
        self.fsm.data_changed()
    }

    pub fn is_leader(&self) -> bool {
        self.raft.is_leader()
    }

    pub fn leader_addr(&self) -> Option<String> {
        self.raft.leader_addr()
    }

    /// Block until the local catalog has applied through `index`.
    pub async fn wait_index(&self, index: u64) {
        let mut changed = self.fsm.data_changed();
        loop {
            if self.fsm.data().index >= index {
                return;
            }
            if changed.changed().await.is_err() {
                return;
            }
        }
    }

    /// Submit a command. Followers refuse with [`Error::NotLeader`] so the
    /// caller can forward to the leader.
    pub async fn submit(&self, command: Command) -> Result<()> {
        if !self.raft.is_leader() {
            return Err(Error::NotLeader {
                leader: self.raft.leader_addr(),
            });
        }
        self.raft.submit(&command).await
    }

    // Typed proposal helpers. Anything nondeterministic — timestamps, the
    // cluster-ID seed — is captured here, on the proposing node, never
    // inside apply.

    pub async fn create_database(&self, name: &str) -> Result<()> {
        self.submit(Command::CreateDatabase(CreateDatabaseCommand {
            name: name.to_string(),
            retention_policy: None,
        }))
        .await
    }

    pub async fn drop_database(&self, name: &str) -> Result<()> {
        self.submit(Command::DropDatabase(DropDatabaseCommand {
            name: name.to_string(),
        }))
        .await
    }

    pub async fn create_meta_node(&self, http_addr: &str, tcp_addr: &str) -> Result<()> {
        self.submit(Command::CreateMetaNode(CreateMetaNodeCommand {
            http_addr: http_addr.to_string(),
            tcp_addr: tcp_addr.to_string(),
            rand: rand::random(),
        }))
        .await
    }

    pub async fn create_data_node(&self, http_addr: &str, tcp_addr: &str) -> Result<()> {
        self.submit(Command::CreateDataNode(CreateDataNodeCommand {
            http_addr: http_addr.to_string(),
            tcp_addr: tcp_addr.to_string(),
        }))
        .await
    }

    pub async fn create_retention_policy(
        &self,
        database: &str,
        spec: &catalog::RetentionPolicyInfo,
        make_default: bool,
    ) -> Result<()> {
        self.submit(Command::CreateRetentionPolicy(CreateRetentionPolicyCommand {
            database: database.to_string(),
            retention_policy: Some(spec.into()),
            default: make_default,
        }))
        .await
    }

    pub async fn create_shard_group(
        &self,
        database: &str,
        policy: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.submit(Command::CreateShardGroup(CreateShardGroupCommand {
            database: database.to_string(),
            policy: policy.to_string(),
            timestamp: timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX - 1),
        }))
        .await
    }

    pub async fn delete_shard_group(
        &self,
        database: &str,
        policy: &str,
        shard_group_id: u64,
    ) -> Result<()> {
        self.submit(Command::DeleteShardGroup(DeleteShardGroupCommand {
            database: database.to_string(),
            policy: policy.to_string(),
            shard_group_id,
            timestamp: now_nanos(),
        }))
        .await
    }

    pub async fn truncate_shard_groups(&self, timestamp: DateTime<Utc>) -> Result<()> {
        self.submit(Command::TruncateShardGroups(TruncateShardGroupsCommand {
            timestamp: timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX - 1),
        }))
        .await
    }

    pub async fn prune_shard_groups(&self) -> Result<()> {
        self.submit(Command::PruneShardGroups(PruneShardGroupsCommand {
            timestamp: now_nanos(),
        }))
        .await
    }

    pub async fn create_user(&self, name: &str, hash: &str, admin: bool) -> Result<()> {
        self.submit(Command::CreateUser(CreateUserCommand {
            name: name.to_string(),
            hash: hash.to_string(),
            admin,
        }))
        .await
    }

    pub async fn set_privilege(
        &self,
        username: &str,
        database: &str,
        privilege: catalog::Privilege,
    ) -> Result<()> {
        self.submit(Command::SetPrivilege(SetPrivilegeCommand {
            username: username.to_string(),
            database: database.to_string(),
            privilege: proto_meta::Privilege::from(privilege) as i32,
        }))
        .await
    }

    pub async fn remove_peer(&self, id: u64, addr: &str) -> Result<()> {
        self.submit(Command::RemovePeer(RemovePeerCommand {
            id,
            addr: addr.to_string(),
        }))
        .await
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX - 1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_submit_and_read_back() {
        let store = Store::open(Config::default());

        store.create_data_node("d1:8086", "d1:8088").await.unwrap();
        store.create_database("db0").await.unwrap();

        let data = store.data();
        assert!(data.database("db0").is_some());
        assert_eq!(data.index, 2);

        // The apply outcome surfaces to the submitter.
        match store.create_database("db0").await {
            Err(Error::Catalog(catalog::Error::DatabaseExists(name))) => {
                assert_eq!(name, "db0");
            }
            other => panic!("expected DatabaseExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_index_observes_applies() {
        let store = Store::open(Config::default());

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store.wait_index(2).await;
                store.data().index
            })
        };

        store.create_database("a").await.unwrap();
        store.create_database("b").await.unwrap();

        assert!(waiter.await.unwrap() >= 2);
    }

    #[tokio::test]
    async fn test_remove_peer_applies_on_leader_only_path() {
        let store = Store::open(Config::default());
        let own_addr = store.leader_addr().unwrap();

        // A LocalConsensus node is always leader, so the peer set mutates.
        store.remove_peer(1, &own_addr).await.unwrap();
        assert!(store.is_leader());
        // The command consumed a log slot regardless.
        assert_eq!(store.data().index, 1);
    }
}
