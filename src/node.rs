//! Node identity and lifecycle trait (spec §3, §4.3, §4.4).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, NodeError};

/// Per-node configuration loaded from YAML (spec §6). Loading a full
/// configuration pipeline (merging, env overlays, file watching) is a
/// non-goal; this is the minimal typed shape plus a `load` convenience.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_type: String,
    pub name: String,
    #[serde(default)]
    pub params: serde_yaml::Value,
    /// Operator-chosen subject for each logical inbound key (spec §6 `on:`).
    #[serde(default)]
    pub on: HashMap<String, String>,
    /// Operator-chosen subject for each logical outbound key (spec §6 `emit:`).
    #[serde(default)]
    pub emit: HashMap<String, String>,
    /// Operator-chosen subject for each logical RPC key (spec §6 `rpc:`).
    #[serde(default)]
    pub rpc: HashMap<String, String>,
}

impl NodeConfig {
    /// Parses a `NodeConfig` from a YAML string (spec §6).
    pub fn parse(yaml: &str) -> Result<Self, NodeError> {
        serde_yaml::from_str(yaml).map_err(|e| NodeError::InvalidConfig(e.to_string()))
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn lookup<'a>(table: &'a HashMap<String, String>, key: &str) -> Result<&'a str, NodeError> {
    table
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| NodeError::KeyNotFound(key.to_string()))
}

/// Identity, creation time, and routing tables every node embeds (spec §3,
/// component D). Routing tables are immutable once built; a lookup against
/// a missing logical key is `KeyNotFound`, never a default or a panic.
pub struct BaseNode {
    pub name: String,
    pub node_type: String,
    pub created_at: i64,
    pub on: HashMap<String, String>,
    pub emit: HashMap<String, String>,
    pub rpc: HashMap<String, String>,
}

impl BaseNode {
    pub fn new(
        name: impl Into<String>,
        node_type: impl Into<String>,
        on: HashMap<String, String>,
        emit: HashMap<String, String>,
        rpc: HashMap<String, String>,
    ) -> Self {
        BaseNode {
            name: name.into(),
            node_type: node_type.into(),
            created_at: unix_now(),
            on,
            emit,
            rpc,
        }
    }

    /// Builds a `BaseNode` from a node's YAML configuration, carrying its
    /// routing tables over verbatim.
    pub fn from_config(config: &NodeConfig) -> Self {
        BaseNode::new(
            config.name.clone(),
            config.node_type.clone(),
            config.on.clone(),
            config.emit.clone(),
            config.rpc.clone(),
        )
    }

    pub fn get_on(&self, key: &str) -> Result<&str, NodeError> {
        lookup(&self.on, key)
    }

    pub fn get_emit(&self, key: &str) -> Result<&str, NodeError> {
        lookup(&self.emit, key)
    }

    pub fn get_rpc(&self, key: &str) -> Result<&str, NodeError> {
        lookup(&self.rpc, key)
    }
}

/// A request carrying only a correlation id, the common shape for
/// `req_metadata`/`req_parameters`/`req_status` requests (spec §4.8, §4.9).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IdRequest {
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    pub id: i64,
    pub code: ErrorCode,
    pub created_at: i64,
    pub emit: HashMap<String, String>,
    pub on: HashMap<String, String>,
    pub rpc: HashMap<String, String>,
}

/// Builds a `req_metadata` reply from a node's identity and routing tables.
/// Shared by `Node::request_metadata`'s default body and by node types that
/// need to answer the RPC from a `'static` bus handler closure, where `self`
/// isn't available, and so capture these fields by value instead.
pub fn build_metadata_response(
    id: i64,
    created_at: i64,
    emit: HashMap<String, String>,
    on: HashMap<String, String>,
    rpc: HashMap<String, String>,
) -> MetadataResponse {
    MetadataResponse {
        id,
        code: ErrorCode::Ok,
        created_at,
        emit,
        on,
        rpc,
    }
}

/// A deployable unit of work (spec §4.3/§4.4). Implementors own whatever
/// tasks/connections they start in `start` and must release them in `stop`.
#[async_trait]
pub trait Node: Send + Sync {
    fn base(&self) -> &BaseNode;

    fn name(&self) -> &str {
        &self.base().name
    }

    fn node_type(&self) -> &str {
        &self.base().node_type
    }

    async fn start(&self) -> Result<(), NodeError>;

    async fn stop(&self) -> Result<(), NodeError>;

    /// Default `RequestMetadata` body: the node's identity and routing
    /// tables (spec §4.3 capability set; component D "provides default
    /// RequestMetadata").
    fn request_metadata(&self, req: IdRequest) -> MetadataResponse {
        let base = self.base();
        build_metadata_response(
            req.id,
            base.created_at,
            base.emit.clone(),
            base.on.clone(),
            base.rpc.clone(),
        )
    }
}
