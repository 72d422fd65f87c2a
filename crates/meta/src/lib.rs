//! The replicated metadata store: a deterministic state machine over the
//! cluster [`catalog`], driven by a consensus log.
//!
//! [`StoreFsm`] applies decoded log commands to the catalog and produces /
//! restores snapshots. [`RaftState`] is the thin binding through which
//! commands are submitted to a [`Consensus`] engine; [`LocalConsensus`] is
//! the single-node engine used by single-meta deployments and tests.
//! [`Store`] wires the three together behind a typed API.

mod config;
mod fsm;
mod raft;
mod store;

pub use config::Config;
pub use fsm::{LogEntry, StoreFsm};
pub use raft::{Consensus, LocalConsensus, PeerControl, RaftState};
pub use store::Store;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] catalog::Error),

    /// The proposal timed out. It may still commit later: callers must be
    /// idempotent, or read the catalog back to find out.
    #[error("consensus proposal timed out and should be retried")]
    RetryableConsensus,

    #[error("node is not the leader (leader is {leader:?})")]
    NotLeader { leader: Option<String> },

    #[error("snapshot is unreadable")]
    Snapshot(#[from] proto_meta::Error),
}

pub type Result<Ok> = std::result::Result<Ok, Error>;
