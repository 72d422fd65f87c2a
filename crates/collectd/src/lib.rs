//! UDP ingestion of collectd binary-protocol metrics.
//!
//! [`Service`] binds a UDP socket, parses each datagram into value-lists,
//! reshapes them into measurement [`models::Point`]s, batches them, and
//! writes batches through a [`PointsWriter`] — creating the target database
//! through a [`MetaClient`] on first use. Delivery is at-most-once by
//! design: read, parse, and write failures are counted and dropped, never
//! retried, so a slow writer can never back up into the kernel receive
//! queue further than the pending-batch bound allows.

mod auth;
mod config;
pub mod packet;
mod service;
pub mod typesdb;

pub use auth::AuthFile;
pub use config::{Config, MultiValueMode, SecurityLevel};
pub use service::Service;

use models::{ConsistencyLevel, Point};

/// Destination for batched points. Implemented by the cluster's write path.
#[async_trait::async_trait]
pub trait PointsWriter: Send + Sync {
    async fn write_points_privileged(
        &self,
        database: &str,
        retention_policy: &str,
        consistency: ConsistencyLevel,
        points: Vec<Point>,
    ) -> anyhow::Result<()>;
}

/// The slice of the meta client this service needs.
#[async_trait::async_trait]
pub trait MetaClient: Send + Sync {
    async fn create_database(&self, name: &str) -> anyhow::Result<()>;
}

/// Maps usernames to the shared secrets of signed/encrypted packets.
pub trait PasswordLookup: Send + Sync {
    fn password(&self, username: &str) -> Option<String>;
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("bind address is blank")]
    BindAddressRequired,
    #[error("database name is blank")]
    DatabaseRequired,
    #[error("an auth file is required when a security level is set")]
    AuthFileRequired,
    #[error("batch size, pending, and duration must all be positive")]
    BatchBoundsRequired,
    #[error("unable to resolve UDP address {address:?}")]
    ResolveAddress {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no usable address for {0:?}")]
    NoAddress(String),
    #[error("unable to listen on UDP")]
    Listen(#[source] std::io::Error),
    #[error("unable to set UDP read buffer to {size}")]
    ReadBuffer {
        size: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to read auth file")]
    AuthFile(#[source] std::io::Error),
}

pub type Result<Ok> = std::result::Result<Ok, Error>;
