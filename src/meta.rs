//! The `meta.json` file at the root of every RSI.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const MINIMUM_RSI_VERSION: u64 = 1;
pub const MAXIMUM_RSI_VERSION: u64 = 1;

/// Free-form per-state flags, e.g. `{"rewind": true}`.
pub type Flags = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Meta {
    pub version: u64,
    pub size: Size,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    pub states: Vec<StateMeta>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct Size {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StateMeta {
    pub name: String,
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default)]
    pub flags: Flags,
    pub directions: u8,
    /// Seconds per frame, one list per direction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delays: Option<Vec<Vec<f32>>>,
}
