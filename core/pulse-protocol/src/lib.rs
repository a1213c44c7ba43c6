//! Heartbeat wire types for the pulse delivery API.
//!
//! This crate is shared by the agent library, the CLI and the integration
//! tests so the record shape cannot drift between what gets queued locally
//! and what gets posted to the bulk endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Path of the bulk submission endpoint, relative to the configured API URL.
pub const BULK_ENDPOINT_PATH: &str = "/users/current/heartbeats.bulk";
/// Maximum heartbeats posted in one bulk request.
pub const MAX_BATCH_SIZE: usize = 25;
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_ENTITY_LEN: usize = 4096;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorInfo {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    #[default]
    File,
    App,
    Domain,
}

impl FromStr for EntityType {
    type Err = ErrorInfo;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(EntityType::File),
            "app" => Ok(EntityType::App),
            "domain" => Ok(EntityType::Domain),
            other => Err(ErrorInfo::new(
                "invalid_entity_type",
                format!("unknown entity type '{}'", other),
            )),
        }
    }
}

/// Activity category reported with each heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    #[default]
    #[serde(rename = "coding")]
    Coding,
    #[serde(rename = "building")]
    Building,
    #[serde(rename = "code reviewing")]
    CodeReviewing,
    #[serde(rename = "debugging")]
    Debugging,
    #[serde(rename = "browsing")]
    Browsing,
    #[serde(rename = "running tests")]
    RunningTests,
    #[serde(rename = "writing tests")]
    WritingTests,
    #[serde(rename = "writing docs")]
    WritingDocs,
    #[serde(rename = "manual testing")]
    ManualTesting,
    #[serde(rename = "learning")]
    Learning,
    #[serde(rename = "meeting")]
    Meeting,
    #[serde(rename = "planning")]
    Planning,
    #[serde(rename = "researching")]
    Researching,
    #[serde(rename = "communicating")]
    Communicating,
}

impl FromStr for Category {
    type Err = ErrorInfo;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', '_'], " ");
        serde_json::from_value(Value::String(normalized.clone())).map_err(|_| {
            ErrorInfo::new(
                "invalid_category",
                format!("unknown category '{}'", normalized),
            )
        })
    }
}

/// One unit of coding-activity telemetry.
///
/// `enrichment` carries collaborator-owned fields (`lines`, `lineno`,
/// `cursorpos`, `dependencies`, ...) that are flattened into the wire record
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub entity: String,
    #[serde(rename = "type", default)]
    pub entity_type: EntityType,
    /// Unix time in fractional seconds.
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Root directory of the project the entity belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub is_write: bool,
    #[serde(flatten)]
    pub enrichment: Map<String, Value>,
}

impl Heartbeat {
    pub fn new(entity: impl Into<String>, time: f64) -> Self {
        Self {
            entity: entity.into(),
            entity_type: EntityType::File,
            time,
            project: None,
            branch: None,
            project_folder: None,
            language: None,
            category: Category::Coding,
            is_write: false,
            enrichment: Map::new(),
        }
    }

    pub fn key(&self) -> IdentityKey {
        IdentityKey::new(self.entity.clone(), self.time)
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.entity.trim().is_empty() {
            return Err(ErrorInfo::new("missing_field", "entity is required"));
        }
        if self.entity.len() > MAX_ENTITY_LEN {
            return Err(ErrorInfo::new(
                "invalid_entity",
                format!("entity must be {} bytes or fewer", MAX_ENTITY_LEN),
            ));
        }
        if !self.time.is_finite() || self.time <= 0.0 {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "time must be a positive number of seconds",
            ));
        }
        Ok(())
    }
}

/// Converts a wall-clock instant into heartbeat time (fractional seconds).
pub fn heartbeat_time(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Deduplication key for queued heartbeats: `(entity, time)`.
///
/// Time equality is bitwise so the key can live in hash sets. Callers assign
/// timestamps, so the same activity reported twice carries the same bits.
#[derive(Debug, Clone)]
pub struct IdentityKey {
    pub entity: String,
    pub time: f64,
}

impl IdentityKey {
    pub fn new(entity: impl Into<String>, time: f64) -> Self {
        Self {
            entity: entity.into(),
            time,
        }
    }
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity && self.time.to_bits() == other.time.to_bits()
    }
}

impl Eq for IdentityKey {}

impl Hash for IdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity.hash(state);
        self.time.to_bits().hash(state);
    }
}

/// Bulk endpoint reply: one `[body, status]` pair per submitted heartbeat.
#[derive(Debug, Deserialize, Serialize, Default)]
pub struct BulkResponse {
    #[serde(default)]
    pub responses: Vec<(Value, u16)>,
}

/// Extracts per-heartbeat statuses from a bulk response body.
///
/// Returns `None` when the body carries no usable per-item list; callers then
/// treat the batch-level status as applying to every heartbeat.
pub fn parse_bulk_statuses(body: &str) -> Option<Vec<u16>> {
    if body.trim().is_empty() || body.len() > MAX_RESPONSE_BYTES {
        return None;
    }
    let parsed: BulkResponse = serde_json::from_str(body).ok()?;
    if parsed.responses.is_empty() {
        return None;
    }
    Some(parsed.responses.into_iter().map(|(_, status)| status).collect())
}
