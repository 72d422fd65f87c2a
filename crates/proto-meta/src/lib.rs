//! Wire schema of the cluster metadata subsystem.
//!
//! Two encodings live here, both hand-maintained prost messages:
//!
//! * [`Command`] — the envelope written into the replicated log. It carries a
//!   frozen numeric type code and the encoded per-kind payload message.
//!   Type codes are never reused or renumbered: a log written by any prior
//!   version of this schema must decode on the current one.
//! * [`Data`] — the catalog snapshot blob, version-tagged in its leading
//!   field so that restore can reject (or later migrate) unknown layouts.

mod command;
mod data;

pub use command::*;
pub use data::*;

/// Version written into the leading field of every snapshot [`Data`] blob.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to decode command envelope")]
    Envelope(#[source] prost::DecodeError),
    #[error("unknown command type code {0}")]
    UnknownCommandType(i32),
    #[error("failed to decode {kind} payload")]
    Payload {
        kind: &'static str,
        #[source]
        source: prost::DecodeError,
    },
    #[error("failed to decode snapshot")]
    Snapshot(#[source] prost::DecodeError),
    #[error("unsupported snapshot version {0}")]
    SnapshotVersion(u32),
}

pub type Result<Ok> = std::result::Result<Ok, Error>;
