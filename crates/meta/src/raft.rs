use crate::{Error, LogEntry, Result, StoreFsm};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// The consensus engine behind the store: proposals go in, committed entries
/// come back out through the FSM.
#[async_trait::async_trait]
pub trait Consensus: Send + Sync {
    /// Propose an encoded command and wait for it to commit and apply.
    /// Returns the apply outcome. Fails with [`Error::NotLeader`] on a
    /// follower — the caller forwards to the leader instead.
    async fn propose(&self, data: Vec<u8>) -> Result<()>;

    fn is_leader(&self) -> bool;
    fn leader_addr(&self) -> Option<String>;
}

/// Peer-set management, consulted by the FSM for its one externally visible
/// side effect (`RemovePeer`) and by legacy `CreateNode` replay.
pub trait PeerControl: Send + Sync {
    fn is_leader(&self) -> bool;
    fn peers(&self) -> Vec<String>;
    fn add_peer(&self, addr: &str) -> anyhow::Result<()>;
    fn remove_peer(&self, addr: &str) -> anyhow::Result<()>;
}

/// The thin binding between the store and its consensus engine: bounded
/// submission, leader introspection, and peer management.
#[derive(Clone)]
pub struct RaftState {
    engine: Arc<dyn Consensus>,
    control: Arc<dyn PeerControl>,
    apply_timeout: Duration,
}

impl RaftState {
    pub fn new(
        engine: Arc<dyn Consensus>,
        control: Arc<dyn PeerControl>,
        apply_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            control,
            apply_timeout,
        }
    }

    /// Submit a command, bounded by the configured apply timeout.
    ///
    /// A timeout surfaces as [`Error::RetryableConsensus`]: the proposal may
    /// still commit later, so callers must be idempotent or read the catalog
    /// back to check.
    pub async fn submit(&self, command: &proto_meta::Command) -> Result<()> {
        match tokio::time::timeout(self.apply_timeout, self.engine.propose(command.encode())).await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(Error::RetryableConsensus),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.engine.is_leader()
    }

    pub fn leader_addr(&self) -> Option<String> {
        self.engine.leader_addr()
    }

    pub fn peers(&self) -> Vec<String> {
        self.control.peers()
    }

    pub fn add_peer(&self, addr: &str) -> anyhow::Result<()> {
        self.control.add_peer(addr)
    }

    pub fn remove_peer(&self, addr: &str) -> anyhow::Result<()> {
        self.control.remove_peer(addr)
    }
}

/// A single-node, in-process consensus engine: every proposal commits
/// immediately in log order. This is the engine of single-meta-node
/// deployments, and the harness under the FSM in tests.
///
/// It still exercises the full store surface — term/index assignment,
/// snapshot triggering, peer bookkeeping — so code above it can't tell the
/// difference.
pub struct LocalConsensus {
    fsm: Arc<StoreFsm>,
    addr: String,
    snapshot_threshold: u64,
    state: Mutex<LocalState>,
    last_snapshot: Mutex<Option<Vec<u8>>>,
}

struct LocalState {
    term: u64,
    last_index: u64,
    applied_since_snapshot: u64,
    peers: Vec<String>,
}

impl LocalConsensus {
    pub fn new(fsm: Arc<StoreFsm>, addr: impl Into<String>, snapshot_threshold: u64) -> Arc<Self> {
        let addr = addr.into();

        Arc::new(Self {
            fsm,
            addr: addr.clone(),
            snapshot_threshold,
            state: Mutex::new(LocalState {
                term: 1,
                last_index: 0,
                applied_since_snapshot: 0,
                peers: vec![addr],
            }),
            last_snapshot: Mutex::new(None),
        })
    }

    /// The most recent snapshot blob, if the threshold has been crossed.
    pub fn last_snapshot(&self) -> Option<Vec<u8>> {
        self.last_snapshot.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Consensus for LocalConsensus {
    async fn propose(&self, data: Vec<u8>) -> Result<()> {
        // Serialize proposals: assign the next slot and apply in order.
        let mut state = self.state.lock().unwrap();
        state.last_index += 1;

        let entry = LogEntry {
            term: state.term,
            index: state.last_index,
            data,
        };
        let result = self.fsm.apply(&entry);

        state.applied_since_snapshot += 1;
        if state.applied_since_snapshot >= self.snapshot_threshold {
            state.applied_since_snapshot = 0;
            let blob = self.fsm.snapshot();
            tracing::debug!(bytes = blob.len(), index = entry.index, "took snapshot");
            *self.last_snapshot.lock().unwrap() = Some(blob);
        }

        result.map_err(Error::Catalog)
    }

    fn is_leader(&self) -> bool {
        true
    }

    fn leader_addr(&self) -> Option<String> {
        Some(self.addr.clone())
    }
}

impl PeerControl for LocalConsensus {
    fn is_leader(&self) -> bool {
        true
    }

    fn peers(&self) -> Vec<String> {
        self.state.lock().unwrap().peers.clone()
    }

    fn add_peer(&self, addr: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.peers.iter().any(|peer| peer == addr) {
            state.peers.push(addr.to_string());
        }
        Ok(())
    }

    fn remove_peer(&self, addr: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.peers.retain(|peer| peer != addr);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Config;
    use proto_meta::{Command, CreateDatabaseCommand};

    /// An engine whose proposals never complete.
    struct StalledConsensus;

    #[async_trait::async_trait]
    impl Consensus for StalledConsensus {
        async fn propose(&self, _data: Vec<u8>) -> crate::Result<()> {
            std::future::pending().await
        }

        fn is_leader(&self) -> bool {
            true
        }

        fn leader_addr(&self) -> Option<String> {
            None
        }
    }

    fn create_database(name: &str) -> Command {
        Command::CreateDatabase(CreateDatabaseCommand {
            name: name.to_string(),
            retention_policy: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_timeout_is_retryable() {
        let fsm = Arc::new(StoreFsm::new(Config::default()));
        let engine = LocalConsensus::new(fsm, "m1:8091", 1024);
        let raft = RaftState::new(
            Arc::new(StalledConsensus),
            engine,
            Duration::from_secs(5),
        );

        let result = raft.submit(&create_database("db0")).await;
        assert!(matches!(result, Err(Error::RetryableConsensus)), "{result:?}");
    }

    #[tokio::test]
    async fn test_snapshot_threshold_triggers_snapshots() {
        let fsm = Arc::new(StoreFsm::new(Config::default()));
        let engine = LocalConsensus::new(fsm.clone(), "m1:8091", 2);

        Consensus::propose(&*engine, create_database("a").encode())
            .await
            .unwrap();
        assert!(engine.last_snapshot().is_none());

        Consensus::propose(&*engine, create_database("b").encode())
            .await
            .unwrap();
        let blob = engine.last_snapshot().unwrap();

        // The snapshot round-trips into an identical catalog.
        let restored = StoreFsm::new(Config::default());
        restored.restore(&blob).unwrap();
        assert_eq!(*restored.data(), *fsm.data());
    }

    #[tokio::test]
    async fn test_peer_set_is_idempotent() {
        let fsm = Arc::new(StoreFsm::new(Config::default()));
        let engine = LocalConsensus::new(fsm, "m1:8091", 1024);

        engine.add_peer("m2:8091").unwrap();
        engine.add_peer("m2:8091").unwrap();
        assert_eq!(engine.peers(), vec!["m1:8091", "m2:8091"]);

        engine.remove_peer("m2:8091").unwrap();
        engine.remove_peer("m2:8091").unwrap();
        assert_eq!(engine.peers(), vec!["m1:8091"]);
    }
}
