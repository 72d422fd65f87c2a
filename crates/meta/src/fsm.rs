use crate::{Config, PeerControl};
use catalog::Data;
use chrono::{DateTime, TimeZone, Utc};
use proto_meta::Command;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::watch;

/// One entry of the replicated log, as handed to the state machine.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub data: Vec<u8>,
}

/// The deterministic state machine over the cluster catalog.
///
/// Apply is the catalog's single writer: it clones the live catalog, runs
/// the command's mutator against the clone, and swaps the clone in — so a
/// failed command never leaves a partial mutation behind, and readers always
/// observe a complete catalog.
#[derive(Clone)]
pub struct StoreFsm {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    data: RwLock<Arc<Data>>,
    /// Bumped after every apply; an edge-triggered broadcast to watchers.
    changed: watch::Sender<u64>,
    /// Weak so the consensus engine (which owns an `Arc<StoreFsm>`) and the
    /// FSM don't keep each other alive.
    peer_control: Mutex<Weak<dyn PeerControl>>,
}

impl StoreFsm {
    pub fn new(config: Config) -> Self {
        let (changed, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                config,
                data: RwLock::new(Arc::new(Data::default())),
                changed,
                peer_control: Mutex::new(Weak::<crate::LocalConsensus>::new()),
            }),
        }
    }

    /// Install the peer-set controller consulted by the `RemovePeer` and
    /// legacy `CreateNode` commands.
    pub fn set_peer_control(&self, control: Weak<dyn PeerControl>) {
        *self.inner.peer_control.lock().unwrap() = control;
    }

    fn peer_control(&self) -> Option<Arc<dyn PeerControl>> {
        self.inner.peer_control.lock().unwrap().upgrade()
    }

    /// The current catalog. Cheap: hands out a reference to the immutable
    /// value most recently swapped in by apply.
    pub fn data(&self) -> Arc<Data> {
        self.inner.data.read().unwrap().clone()
    }

    /// Watch for catalog changes. The receiver's value is a generation
    /// counter; every apply bumps it exactly once.
    pub fn data_changed(&self) -> watch::Receiver<u64> {
        self.inner.changed.subscribe()
    }

    /// Apply one log entry.
    ///
    /// Panics on undecodable bytes or an unknown command type: both mean the
    /// log is corrupt or written by a future version, and deterministically
    /// skipping entries is not an option.
    ///
    /// Whatever the command's outcome, the catalog's term and index advance
    /// to the entry's coordinates and watchers are notified.
    pub fn apply(&self, entry: &LogEntry) -> Result<(), catalog::Error> {
        let command = match Command::decode(&entry.data) {
            Ok(command) => command,
            Err(error) => panic!(
                "cannot decode command at term {} index {}: {error}",
                entry.term, entry.index
            ),
        };

        let mut guard = self.inner.data.write().unwrap();

        let mut next = (**guard).clone();
        let result = self.dispatch(command, &mut next);

        // A failed mutation is discarded wholesale, but term and index still
        // advance on the live catalog.
        let mut next = match &result {
            Ok(()) => next,
            Err(_) => (**guard).clone(),
        };
        next.term = entry.term;
        next.index = entry.index;
        *guard = Arc::new(next);
        drop(guard);

        self.inner.changed.send_modify(|generation| *generation += 1);
        result
    }

    fn dispatch(&self, command: Command, next: &mut Data) -> Result<(), catalog::Error> {
        match command {
            Command::RemovePeer(c) => {
                // Leader-only side effect; a follower's catalog is untouched.
                // The peer set tolerates a late remove from an ex-leader.
                if let Some(control) = self.peer_control() {
                    if control.is_leader() {
                        tracing::info!(addr = %c.addr, "removing peer");
                        if let Err(error) = control.remove_peer(&c.addr) {
                            tracing::info!(%error, "error removing peer");
                        }
                    }
                }
                Ok(())
            }
            Command::CreateNode(c) => {
                // Pre-split clusters: every node is a data node, and nodes in
                // the peer list are additionally meta nodes.
                let peers = self
                    .peer_control()
                    .map(|control| control.peers())
                    .unwrap_or_default();

                if peers.iter().any(|peer| *peer == c.host) {
                    next.create_meta_node(&c.host, &c.host)?;
                }
                if next.meta_nodes.len() == 1 {
                    let id = next.meta_nodes[0].id;
                    next.set_data_node(id, &c.host, &c.host)?;
                } else {
                    next.create_data_node(&c.host, &c.host)?;
                }
                if next.cluster_id == 0 {
                    next.cluster_id = c.rand;
                }
                Ok(())
            }
            // Pre-split commands with no modern counterpart: no-ops that
            // still consume their log slot.
            Command::UpdateNode(_) | Command::DeleteNode(_) => Ok(()),

            Command::CreateDatabase(c) => {
                next.create_database(&c.name)?;

                if let Some(spec) = c.retention_policy {
                    let spec = catalog::RetentionPolicyInfo::from(spec);
                    match next.create_retention_policy(&c.name, &spec, true) {
                        Err(catalog::Error::RetentionPolicyExists(name)) => {
                            Err(catalog::Error::RetentionPolicyConflict(name))
                        }
                        other => other,
                    }
                } else if self.inner.config.retention_auto_create {
                    // The default policy is fully replicated, up to a cap.
                    let mut spec =
                        catalog::RetentionPolicyInfo::new(catalog::DEFAULT_RETENTION_POLICY_NAME);
                    spec.replica_n = next
                        .data_nodes
                        .len()
                        .clamp(1, catalog::MAX_AUTO_CREATED_RETENTION_POLICY_REPLICA_N);
                    spec.duration = catalog::DEFAULT_RETENTION_POLICY_DURATION;
                    next.create_retention_policy(&c.name, &spec, true)
                } else {
                    Ok(())
                }
            }
            Command::DropDatabase(c) => next.drop_database(&c.name),

            Command::CreateRetentionPolicy(c) => {
                let spec = catalog::RetentionPolicyInfo::from(c.retention_policy.unwrap_or_default());
                next.create_retention_policy(&c.database, &spec, c.default)
            }
            Command::DropRetentionPolicy(c) => next.drop_retention_policy(&c.database, &c.name),
            Command::SetDefaultRetentionPolicy(c) => {
                next.set_default_retention_policy(&c.database, &c.name)
            }
            Command::UpdateRetentionPolicy(c) => {
                let update = catalog::RetentionPolicyUpdate {
                    name: c.new_name,
                    duration: c.duration.map(nanos_duration),
                    replica_n: c.replica_n.map(|n| n as usize),
                    shard_group_duration: c.shard_group_duration.map(nanos_duration),
                };
                next.update_retention_policy(&c.database, &c.name, &update, c.default)
            }

            Command::CreateShardGroup(c) => {
                next.create_shard_group(&c.database, &c.policy, nanos_time(c.timestamp))
            }
            Command::DeleteShardGroup(c) => next.delete_shard_group(
                &c.database,
                &c.policy,
                c.shard_group_id,
                nanos_time(c.timestamp),
            ),
            Command::TruncateShardGroups(c) => {
                next.truncate_shard_groups(nanos_time(c.timestamp));
                Ok(())
            }
            Command::PruneShardGroups(c) => {
                next.prune_shard_groups(nanos_time(c.timestamp));
                Ok(())
            }

            Command::DropShard(c) => {
                next.drop_shard(c.id);
                Ok(())
            }
            Command::CopyShardOwner(c) => {
                next.copy_shard_owner(c.id, c.node_id);
                Ok(())
            }
            Command::RemoveShardOwner(c) => {
                next.remove_shard_owner(c.id, c.node_id);
                Ok(())
            }

            Command::CreateContinuousQuery(c) => {
                next.create_continuous_query(&c.database, &c.name, &c.query)
            }
            Command::DropContinuousQuery(c) => next.drop_continuous_query(&c.database, &c.name),

            Command::CreateSubscription(c) => next.create_subscription(
                &c.database,
                &c.retention_policy,
                &c.name,
                catalog::subscription_mode_from_code(c.mode),
                c.destinations,
            ),
            Command::DropSubscription(c) => {
                next.drop_subscription(&c.database, &c.retention_policy, &c.name)
            }

            Command::CreateUser(c) => next.create_user(&c.name, &c.hash, c.admin),
            Command::DropUser(c) => next.drop_user(&c.name),
            Command::UpdateUser(c) => next.update_user(&c.name, &c.hash),
            Command::SetPrivilege(c) => next.set_privilege(
                &c.username,
                &c.database,
                catalog::privilege_from_code(c.privilege),
            ),
            Command::SetAdminPrivilege(c) => next.set_admin_privilege(&c.username, c.admin),

            Command::SetData(c) => {
                *next = c.data.map(Data::from).unwrap_or_default();
                Ok(())
            }

            Command::CreateMetaNode(c) => {
                next.create_meta_node(&c.http_addr, &c.tcp_addr)?;
                if next.cluster_id == 0 {
                    next.cluster_id = c.rand;
                }
                Ok(())
            }
            Command::SetMetaNode(c) => {
                next.set_meta_node(&c.http_addr, &c.tcp_addr)?;
                if next.cluster_id == 0 {
                    next.cluster_id = c.rand;
                }
                Ok(())
            }
            Command::DeleteMetaNode(c) => next.delete_meta_node(c.id),
            Command::CreateDataNode(c) => {
                next.create_data_node(&c.http_addr, &c.tcp_addr).map(|_| ())
            }
            Command::UpdateDataNode(c) => next.update_data_node(c.id, &c.http_addr, &c.tcp_addr),
            Command::DeleteDataNode(c) => next.delete_data_node(c.id),
        }
    }

    /// Serialize the entire catalog into a version-tagged snapshot blob.
    /// The lock covers only the in-memory clone, never the sink.
    pub fn snapshot(&self) -> Vec<u8> {
        let data = {
            let guard = self.inner.data.write().unwrap();
            guard.clone()
        };
        proto_meta::Data::from(&*data).encode_snapshot()
    }

    /// Replace the catalog with a decoded snapshot. The consensus layer
    /// calls this serially, never concurrently with apply.
    pub fn restore(&self, blob: &[u8]) -> crate::Result<()> {
        let data = Data::from(proto_meta::Data::decode_snapshot(blob)?);
        *self.inner.data.write().unwrap() = Arc::new(data);
        Ok(())
    }
}

fn nanos_time(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

fn nanos_duration(nanos: i64) -> std::time::Duration {
    std::time::Duration::from_nanos(nanos.max(0) as u64)
}
