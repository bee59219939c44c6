//! Mutable context captured in snapshots
//!
//! User and network information change during a session. The persistence
//! layer keeps only the latest value of each so that a crash report can be
//! enriched after the process died.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ContextError;

/// Identity of the current user, as set by the host application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub additional_properties: Map<String, Value>,
}

impl UserInfo {
    /// Create user info with only an id
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }
}

/// Kind of connectivity reported by the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Wifi,
    Wimax,
    Ethernet,
    Bluetooth,
    Cellular,
    Other,
    #[default]
    NotConnected,
}

/// Latest network state of the device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub connectivity: Connectivity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_kbps: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down_kbps: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cellular_technology: Option<String>,
}

/// Last view event reported by the UI instrumentation
///
/// The document is opaque to the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewEvent(pub Value);

/// A context value that can be written to and read from a snapshot file
pub trait ContextSnapshot: Sized {
    /// Name of the snapshot file
    const FILE_NAME: &'static str;

    /// Serialize to the snapshot payload
    fn to_snapshot_bytes(&self) -> Result<Vec<u8>, ContextError>;

    /// Deserialize from a snapshot payload
    fn from_snapshot_bytes(bytes: &[u8]) -> Result<Self, ContextError>;
}

impl ContextSnapshot for UserInfo {
    const FILE_NAME: &'static str = "user_information";

    fn to_snapshot_bytes(&self) -> Result<Vec<u8>, ContextError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_snapshot_bytes(bytes: &[u8]) -> Result<Self, ContextError> {
        if bytes.is_empty() {
            return Err(ContextError::Empty);
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl ContextSnapshot for NetworkInfo {
    const FILE_NAME: &'static str = "network_information";

    fn to_snapshot_bytes(&self) -> Result<Vec<u8>, ContextError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_snapshot_bytes(bytes: &[u8]) -> Result<Self, ContextError> {
        if bytes.is_empty() {
            return Err(ContextError::Empty);
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl ContextSnapshot for ViewEvent {
    const FILE_NAME: &'static str = "last_view_event";

    fn to_snapshot_bytes(&self) -> Result<Vec<u8>, ContextError> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    fn from_snapshot_bytes(bytes: &[u8]) -> Result<Self, ContextError> {
        if bytes.is_empty() {
            return Err(ContextError::Empty);
        }
        Ok(Self(serde_json::from_slice(bytes)?))
    }
}
