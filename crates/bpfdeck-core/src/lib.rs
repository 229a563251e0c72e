pub mod chart;
pub mod history;
pub mod lifecycle;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub use chart::{ChartSeries, Visualizer, DEFAULT_CHART_WINDOW, MAX_CHART_WINDOW};
pub use history::{merge, StreamHistory};
pub use lifecycle::{
    AttachInput, LifecycleAction, LifecycleRequest, UnloadTarget, ValidationError,
    DEFAULT_ATTACH_TYPE, DEFAULT_PIN_ROOT, DEFAULT_TRACEPOINT_TARGET, DEFAULT_XDP_TARGET,
};

/// Name of an instrumentation artifact the server can load.
pub type ProgramDescriptor = String;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgramInventory {
    #[serde(default)]
    pub programs: Vec<ProgramDescriptor>,
    #[serde(default)]
    pub loaded: Vec<LoadedProgram>,
}

impl ProgramInventory {
    /// Case-insensitive substring filter over the available artifacts.
    pub fn filter_programs<'a>(&'a self, query: &str) -> Vec<&'a str> {
        let needle = query.trim().to_lowercase();
        self.programs
            .iter()
            .filter(|name| needle.is_empty() || name.to_lowercase().contains(&needle))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LoadedProgram {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub prog_type: String,
    #[serde(default, deserialize_with = "deserialize_pinned")]
    pub pinned: Option<String>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub gpl_compatible: bool,
    #[serde(default)]
    pub loaded_at: i64,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub orphaned: bool,
    #[serde(default)]
    pub bytes_xlated: u64,
    #[serde(default)]
    pub jited: bool,
    #[serde(default)]
    pub bytes_jited: u64,
    #[serde(default)]
    pub bytes_memlock: u64,
    #[serde(default)]
    pub map_ids: Vec<u64>,
    #[serde(default)]
    pub btf_id: Option<u64>,
}

impl LoadedProgram {
    pub fn loaded_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.loaded_at, 0).single()
    }

    pub fn pinned_label(&self) -> &str {
        self.pinned.as_deref().unwrap_or("Not pinned")
    }

    pub fn map_ids_label(&self) -> String {
        if self.map_ids.is_empty() {
            return "None".to_string();
        }
        self.map_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Body of every action endpoint: `{message}` on success, `{error}` on failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionReply {
    /// Most specific failure text: the error field, then the message, then a generic note.
    pub fn failure_text(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| "Unknown error".to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserspaceStatus {
    #[serde(default)]
    pub running: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserspaceProgramList {
    #[serde(default)]
    pub programs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartUserspaceBody {
    pub program: String,
    pub args: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    Collector,
    Userspace,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Collector, StreamKind::Userspace];

    /// Key under which the stream history is persisted.
    pub fn storage_key(self) -> &'static str {
        match self {
            StreamKind::Collector => "collectorEvents",
            StreamKind::Userspace => "userspaceOutput",
        }
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            StreamKind::Collector => "/api/collector_events",
            StreamKind::Userspace => "/api/userspace_output",
        }
    }

    pub fn dump_endpoint(self) -> &'static str {
        match self {
            StreamKind::Collector => "/api/dump_logs",
            StreamKind::Userspace => "/api/dump_userspace_output",
        }
    }

    /// Field of the batch body holding the lines.
    pub fn batch_field(self) -> &'static str {
        match self {
            StreamKind::Collector => "events",
            StreamKind::Userspace => "output",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            StreamKind::Collector => "Collector Log",
            StreamKind::Userspace => "Userspace Output",
        }
    }

    /// Whether the rendered view lists the newest line first.
    pub fn newest_first(self) -> bool {
        matches!(self, StreamKind::Collector)
    }

    /// Pulls the batch out of a `{events: [...]}` / `{output: [...]}` body.
    pub fn parse_batch(self, body: &Value) -> Result<Vec<String>, String> {
        if let Some(err) = body.get("error").and_then(Value::as_str) {
            return Err(err.to_string());
        }
        match body.get(self.batch_field()) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items
                .iter()
                .map(|item| match item {
                    Value::String(line) => line.clone(),
                    other => other.to_string(),
                })
                .collect()),
            Some(other) => Err(format!(
                "expected array for '{}', got {other}",
                self.batch_field()
            )),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_key())
    }
}

impl FromStr for StreamKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "collector" | "collectorevents" | "collector_events" | "logs" => {
                Ok(StreamKind::Collector)
            }
            "userspace" | "userspaceoutput" | "userspace_output" | "output" => {
                Ok(StreamKind::Userspace)
            }
            other => Err(format!("Unknown stream: {other}")),
        }
    }
}

/// `pinned` is a single path in older inventory output and a list of paths in newer.
fn deserialize_pinned<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Array(items) => {
            let paths: Vec<String> = items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect();
            if paths.is_empty() {
                Ok(None)
            } else {
                Ok(Some(paths.join(", ")))
            }
        }
        _ => Err(serde::de::Error::custom(
            "expected string or list of strings for pinned",
        )),
    }
}
