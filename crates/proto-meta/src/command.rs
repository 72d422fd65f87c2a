//! The replicated-log command envelope and its per-kind payloads.
//!
//! `CommandType` codes are frozen. Codes 1, 2, and 19 belong to the era
//! before meta and data nodes were split apart; current proposers never emit
//! them but replayed logs still contain them, so they decode and apply
//! exactly as they always did. Code 20 was retired and must not be reused.

use crate::data;
use prost::Message as _;

/// The byte envelope written into the replicated log: a frozen numeric type
/// code plus the encoded payload message for that kind.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    #[prost(enumeration = "CommandType", tag = "1")]
    pub r#type: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CommandType {
    CreateNode = 1,
    DeleteNode = 2,
    CreateDatabase = 3,
    DropDatabase = 4,
    CreateRetentionPolicy = 5,
    DropRetentionPolicy = 6,
    SetDefaultRetentionPolicy = 7,
    UpdateRetentionPolicy = 8,
    CreateShardGroup = 9,
    DeleteShardGroup = 10,
    CreateContinuousQuery = 11,
    DropContinuousQuery = 12,
    CreateUser = 13,
    DropUser = 14,
    UpdateUser = 15,
    SetPrivilege = 16,
    SetData = 17,
    SetAdminPrivilege = 18,
    UpdateNode = 19,
    // 20 is retired.
    CreateSubscription = 21,
    DropSubscription = 22,
    RemovePeer = 23,
    CreateMetaNode = 24,
    CreateDataNode = 25,
    UpdateDataNode = 26,
    DeleteMetaNode = 27,
    DeleteDataNode = 28,
    SetMetaNode = 29,
    DropShard = 30,
    TruncateShardGroups = 31,
    PruneShardGroups = 32,
    CopyShardOwner = 33,
    RemoveShardOwner = 34,
}

// Pre-split command: every node was a data node, and nodes in the peer list
// were additionally meta nodes.
#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateNodeCommand {
    #[prost(string, tag = "1")]
    pub host: String,
    /// Random seed adopted as the cluster ID if one isn't set yet.
    #[prost(uint64, tag = "2")]
    pub rand: u64,
}

// Pre-split command; applies as a no-op.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteNodeCommand {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(bool, tag = "2")]
    pub force: bool,
}

// Pre-split command; applies as a no-op.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateNodeCommand {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(string, tag = "2")]
    pub host: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateDatabaseCommand {
    #[prost(string, tag = "1")]
    pub name: String,
    /// Initial retention policy; its `shard_groups` are ignored.
    #[prost(message, optional, tag = "2")]
    pub retention_policy: Option<data::RetentionPolicyInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DropDatabaseCommand {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateRetentionPolicyCommand {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(message, optional, tag = "2")]
    pub retention_policy: Option<data::RetentionPolicyInfo>,
    #[prost(bool, tag = "3")]
    pub default: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DropRetentionPolicyCommand {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(string, tag = "2")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetDefaultRetentionPolicyCommand {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(string, tag = "2")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateRetentionPolicyCommand {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, optional, tag = "3")]
    pub new_name: Option<String>,
    /// Nanoseconds.
    #[prost(int64, optional, tag = "4")]
    pub duration: Option<i64>,
    #[prost(uint32, optional, tag = "5")]
    pub replica_n: Option<u32>,
    /// Nanoseconds.
    #[prost(int64, optional, tag = "6")]
    pub shard_group_duration: Option<i64>,
    #[prost(bool, tag = "7")]
    pub default: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateShardGroupCommand {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(string, tag = "2")]
    pub policy: String,
    /// Unix nanoseconds of the write the group must cover.
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteShardGroupCommand {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(string, tag = "2")]
    pub policy: String,
    #[prost(uint64, tag = "3")]
    pub shard_group_id: u64,
    /// Proposer-observed deletion instant, unix nanoseconds. Embedded in the
    /// command so that apply never reads the wall clock.
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateContinuousQueryCommand {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub query: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DropContinuousQueryCommand {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(string, tag = "2")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateUserCommand {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub hash: String,
    #[prost(bool, tag = "3")]
    pub admin: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DropUserCommand {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateUserCommand {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub hash: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetPrivilegeCommand {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub database: String,
    #[prost(enumeration = "data::Privilege", tag = "3")]
    pub privilege: i32,
}

/// Overwrites the entire catalog. Used to seed a new cluster from an
/// existing catalog blob.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SetDataCommand {
    #[prost(message, optional, tag = "1")]
    pub data: Option<data::Data>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SetAdminPrivilegeCommand {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(bool, tag = "2")]
    pub admin: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateSubscriptionCommand {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(string, tag = "2")]
    pub retention_policy: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(enumeration = "data::SubscriptionMode", tag = "4")]
    pub mode: i32,
    #[prost(string, repeated, tag = "5")]
    pub destinations: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DropSubscriptionCommand {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(string, tag = "2")]
    pub retention_policy: String,
    #[prost(string, tag = "3")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RemovePeerCommand {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(string, tag = "2")]
    pub addr: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateMetaNodeCommand {
    #[prost(string, tag = "1")]
    pub http_addr: String,
    #[prost(string, tag = "2")]
    pub tcp_addr: String,
    /// Random seed adopted as the cluster ID if one isn't set yet.
    #[prost(uint64, tag = "3")]
    pub rand: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateDataNodeCommand {
    #[prost(string, tag = "1")]
    pub http_addr: String,
    #[prost(string, tag = "2")]
    pub tcp_addr: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpdateDataNodeCommand {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(string, tag = "2")]
    pub http_addr: String,
    #[prost(string, tag = "3")]
    pub tcp_addr: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteMetaNodeCommand {
    #[prost(uint64, tag = "1")]
    pub id: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteDataNodeCommand {
    #[prost(uint64, tag = "1")]
    pub id: u64,
}

/// Installs (or re-addresses) the sole meta node of a single-meta deployment.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SetMetaNodeCommand {
    #[prost(string, tag = "1")]
    pub http_addr: String,
    #[prost(string, tag = "2")]
    pub tcp_addr: String,
    /// Random seed adopted as the cluster ID if one isn't set yet.
    #[prost(uint64, tag = "3")]
    pub rand: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DropShardCommand {
    #[prost(uint64, tag = "1")]
    pub id: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TruncateShardGroupsCommand {
    /// Unix nanoseconds; groups covering this instant stop accepting writes.
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PruneShardGroupsCommand {
    /// Proposer-observed "now", unix nanoseconds. Embedded in the command so
    /// that apply never reads the wall clock.
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CopyShardOwnerCommand {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub node_id: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RemoveShardOwnerCommand {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub node_id: u64,
}

/// A fully decoded log command: the tagged union over every command kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateNode(CreateNodeCommand),
    DeleteNode(DeleteNodeCommand),
    CreateDatabase(CreateDatabaseCommand),
    DropDatabase(DropDatabaseCommand),
    CreateRetentionPolicy(CreateRetentionPolicyCommand),
    DropRetentionPolicy(DropRetentionPolicyCommand),
    SetDefaultRetentionPolicy(SetDefaultRetentionPolicyCommand),
    UpdateRetentionPolicy(UpdateRetentionPolicyCommand),
    CreateShardGroup(CreateShardGroupCommand),
    DeleteShardGroup(DeleteShardGroupCommand),
    CreateContinuousQuery(CreateContinuousQueryCommand),
    DropContinuousQuery(DropContinuousQueryCommand),
    CreateUser(CreateUserCommand),
    DropUser(DropUserCommand),
    UpdateUser(UpdateUserCommand),
    SetPrivilege(SetPrivilegeCommand),
    SetData(SetDataCommand),
    SetAdminPrivilege(SetAdminPrivilegeCommand),
    UpdateNode(UpdateNodeCommand),
    CreateSubscription(CreateSubscriptionCommand),
    DropSubscription(DropSubscriptionCommand),
    RemovePeer(RemovePeerCommand),
    CreateMetaNode(CreateMetaNodeCommand),
    CreateDataNode(CreateDataNodeCommand),
    UpdateDataNode(UpdateDataNodeCommand),
    DeleteMetaNode(DeleteMetaNodeCommand),
    DeleteDataNode(DeleteDataNodeCommand),
    SetMetaNode(SetMetaNodeCommand),
    DropShard(DropShardCommand),
    TruncateShardGroups(TruncateShardGroupsCommand),
    PruneShardGroups(PruneShardGroupsCommand),
    CopyShardOwner(CopyShardOwnerCommand),
    RemoveShardOwner(RemoveShardOwnerCommand),
}

impl Command {
    pub fn r#type(&self) -> CommandType {
        match self {
            Command::CreateNode(_) => CommandType::CreateNode,
            Command::DeleteNode(_) => CommandType::DeleteNode,
            Command::CreateDatabase(_) => CommandType::CreateDatabase,
            Command::DropDatabase(_) => CommandType::DropDatabase,
            Command::CreateRetentionPolicy(_) => CommandType::CreateRetentionPolicy,
            Command::DropRetentionPolicy(_) => CommandType::DropRetentionPolicy,
            Command::SetDefaultRetentionPolicy(_) => CommandType::SetDefaultRetentionPolicy,
            Command::UpdateRetentionPolicy(_) => CommandType::UpdateRetentionPolicy,
            Command::CreateShardGroup(_) => CommandType::CreateShardGroup,
            Command::DeleteShardGroup(_) => CommandType::DeleteShardGroup,
            Command::CreateContinuousQuery(_) => CommandType::CreateContinuousQuery,
            Command::DropContinuousQuery(_) => CommandType::DropContinuousQuery,
            Command::CreateUser(_) => CommandType::CreateUser,
            Command::DropUser(_) => CommandType::DropUser,
            Command::UpdateUser(_) => CommandType::UpdateUser,
            Command::SetPrivilege(_) => CommandType::SetPrivilege,
            Command::SetData(_) => CommandType::SetData,
            Command::SetAdminPrivilege(_) => CommandType::SetAdminPrivilege,
            Command::UpdateNode(_) => CommandType::UpdateNode,
            Command::CreateSubscription(_) => CommandType::CreateSubscription,
            Command::DropSubscription(_) => CommandType::DropSubscription,
            Command::RemovePeer(_) => CommandType::RemovePeer,
            Command::CreateMetaNode(_) => CommandType::CreateMetaNode,
            Command::CreateDataNode(_) => CommandType::CreateDataNode,
            Command::UpdateDataNode(_) => CommandType::UpdateDataNode,
            Command::DeleteMetaNode(_) => CommandType::DeleteMetaNode,
            Command::DeleteDataNode(_) => CommandType::DeleteDataNode,
            Command::SetMetaNode(_) => CommandType::SetMetaNode,
            Command::DropShard(_) => CommandType::DropShard,
            Command::TruncateShardGroups(_) => CommandType::TruncateShardGroups,
            Command::PruneShardGroups(_) => CommandType::PruneShardGroups,
            Command::CopyShardOwner(_) => CommandType::CopyShardOwner,
            Command::RemoveShardOwner(_) => CommandType::RemoveShardOwner,
        }
    }

    /// Encode into envelope bytes for the replicated log.
    pub fn encode(&self) -> Vec<u8> {
        let payload = match self {
            Command::CreateNode(c) => c.encode_to_vec(),
            Command::DeleteNode(c) => c.encode_to_vec(),
            Command::CreateDatabase(c) => c.encode_to_vec(),
            Command::DropDatabase(c) => c.encode_to_vec(),
            Command::CreateRetentionPolicy(c) => c.encode_to_vec(),
            Command::DropRetentionPolicy(c) => c.encode_to_vec(),
            Command::SetDefaultRetentionPolicy(c) => c.encode_to_vec(),
            Command::UpdateRetentionPolicy(c) => c.encode_to_vec(),
            Command::CreateShardGroup(c) => c.encode_to_vec(),
            Command::DeleteShardGroup(c) => c.encode_to_vec(),
            Command::CreateContinuousQuery(c) => c.encode_to_vec(),
            Command::DropContinuousQuery(c) => c.encode_to_vec(),
            Command::CreateUser(c) => c.encode_to_vec(),
            Command::DropUser(c) => c.encode_to_vec(),
            Command::UpdateUser(c) => c.encode_to_vec(),
            Command::SetPrivilege(c) => c.encode_to_vec(),
            Command::SetData(c) => c.encode_to_vec(),
            Command::SetAdminPrivilege(c) => c.encode_to_vec(),
            Command::UpdateNode(c) => c.encode_to_vec(),
            Command::CreateSubscription(c) => c.encode_to_vec(),
            Command::DropSubscription(c) => c.encode_to_vec(),
            Command::RemovePeer(c) => c.encode_to_vec(),
            Command::CreateMetaNode(c) => c.encode_to_vec(),
            Command::CreateDataNode(c) => c.encode_to_vec(),
            Command::UpdateDataNode(c) => c.encode_to_vec(),
            Command::DeleteMetaNode(c) => c.encode_to_vec(),
            Command::DeleteDataNode(c) => c.encode_to_vec(),
            Command::SetMetaNode(c) => c.encode_to_vec(),
            Command::DropShard(c) => c.encode_to_vec(),
            Command::TruncateShardGroups(c) => c.encode_to_vec(),
            Command::PruneShardGroups(c) => c.encode_to_vec(),
            Command::CopyShardOwner(c) => c.encode_to_vec(),
            Command::RemoveShardOwner(c) => c.encode_to_vec(),
        };

        Envelope {
            r#type: self.r#type() as i32,
            payload,
        }
        .encode_to_vec()
    }

    /// Decode envelope bytes back into the tagged union.
    pub fn decode(buf: &[u8]) -> crate::Result<Self> {
        let envelope = Envelope::decode(buf).map_err(crate::Error::Envelope)?;
        let r#type = CommandType::try_from(envelope.r#type)
            .map_err(|_| crate::Error::UnknownCommandType(envelope.r#type))?;

        fn payload<M: prost::Message + Default>(
            kind: &'static str,
            buf: &[u8],
        ) -> crate::Result<M> {
            M::decode(buf).map_err(|source| crate::Error::Payload { kind, source })
        }
        let buf = envelope.payload.as_slice();

        Ok(match r#type {
            CommandType::CreateNode => Command::CreateNode(payload("CreateNode", buf)?),
            CommandType::DeleteNode => Command::DeleteNode(payload("DeleteNode", buf)?),
            CommandType::CreateDatabase => Command::CreateDatabase(payload("CreateDatabase", buf)?),
            CommandType::DropDatabase => Command::DropDatabase(payload("DropDatabase", buf)?),
            CommandType::CreateRetentionPolicy => {
                Command::CreateRetentionPolicy(payload("CreateRetentionPolicy", buf)?)
            }
            CommandType::DropRetentionPolicy => {
                Command::DropRetentionPolicy(payload("DropRetentionPolicy", buf)?)
            }
            CommandType::SetDefaultRetentionPolicy => {
                Command::SetDefaultRetentionPolicy(payload("SetDefaultRetentionPolicy", buf)?)
            }
            CommandType::UpdateRetentionPolicy => {
                Command::UpdateRetentionPolicy(payload("UpdateRetentionPolicy", buf)?)
            }
            CommandType::CreateShardGroup => {
                Command::CreateShardGroup(payload("CreateShardGroup", buf)?)
            }
            CommandType::DeleteShardGroup => {
                Command::DeleteShardGroup(payload("DeleteShardGroup", buf)?)
            }
            CommandType::CreateContinuousQuery => {
                Command::CreateContinuousQuery(payload("CreateContinuousQuery", buf)?)
            }
            CommandType::DropContinuousQuery => {
                Command::DropContinuousQuery(payload("DropContinuousQuery", buf)?)
            }
            CommandType::CreateUser => Command::CreateUser(payload("CreateUser", buf)?),
            CommandType::DropUser => Command::DropUser(payload("DropUser", buf)?),
            CommandType::UpdateUser => Command::UpdateUser(payload("UpdateUser", buf)?),
            CommandType::SetPrivilege => Command::SetPrivilege(payload("SetPrivilege", buf)?),
            CommandType::SetData => Command::SetData(payload("SetData", buf)?),
            CommandType::SetAdminPrivilege => {
                Command::SetAdminPrivilege(payload("SetAdminPrivilege", buf)?)
            }
            CommandType::UpdateNode => Command::UpdateNode(payload("UpdateNode", buf)?),
            CommandType::CreateSubscription => {
                Command::CreateSubscription(payload("CreateSubscription", buf)?)
            }
            CommandType::DropSubscription => {
                Command::DropSubscription(payload("DropSubscription", buf)?)
            }
            CommandType::RemovePeer => Command::RemovePeer(payload("RemovePeer", buf)?),
            CommandType::CreateMetaNode => Command::CreateMetaNode(payload("CreateMetaNode", buf)?),
            CommandType::CreateDataNode => Command::CreateDataNode(payload("CreateDataNode", buf)?),
            CommandType::UpdateDataNode => Command::UpdateDataNode(payload("UpdateDataNode", buf)?),
            CommandType::DeleteMetaNode => Command::DeleteMetaNode(payload("DeleteMetaNode", buf)?),
            CommandType::DeleteDataNode => Command::DeleteDataNode(payload("DeleteDataNode", buf)?),
            CommandType::SetMetaNode => Command::SetMetaNode(payload("SetMetaNode", buf)?),
            CommandType::DropShard => Command::DropShard(payload("DropShard", buf)?),
            CommandType::TruncateShardGroups => {
                Command::TruncateShardGroups(payload("TruncateShardGroups", buf)?)
            }
            CommandType::PruneShardGroups => {
                Command::PruneShardGroups(payload("PruneShardGroups", buf)?)
            }
            CommandType::CopyShardOwner => Command::CopyShardOwner(payload("CopyShardOwner", buf)?),
            CommandType::RemoveShardOwner => {
                Command::RemoveShardOwner(payload("RemoveShardOwner", buf)?)
            }
        })
    }
}
