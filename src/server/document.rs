//! JSON startup document
//!
//! ```json
//! {
//!   "engine":    { "queue_capacity": 1024, "failure_policy": "isolate" },
//!   "log":       { "level": "info", "format": "console" },
//!   "inbounds":  [ { "id": "cam", "type": "udp", "options": { "address": "0.0.0.0:5000" } } ],
//!   "outbounds": [ { "id": "viewers", "type": "tcp", "options": { "address": "0.0.0.0:6000" } } ],
//!   "processes": [ { "id": "ff", "type": "exec", "options": { "path": "cat" } } ],
//!   "pipes":     [ { "in": "cam", "outs": ["ff", { "id": "viewers", "queue_capacity": 64 }] } ]
//! }
//! ```
//!
//! Every section is optional. Unknown fields are rejected at every level
//! except inside `options`, which is decoded later by the adapter's factory.

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, Result};
use crate::pipe::{Destination, EngineConfig};

/// The whole startup document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayDocument {
    /// Scheduler settings
    pub engine: EngineConfig,
    /// Logging settings, applied by the binary
    pub log: LogConfig,
    /// Sources
    pub inbounds: Vec<ComponentSpec>,
    /// Sinks
    pub outbounds: Vec<ComponentSpec>,
    /// Duplex components
    pub processes: Vec<ComponentSpec>,
    /// Routing table
    pub pipes: Vec<PipeConfig>,
}

impl RelayDocument {
    /// Read and parse a document from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Document(format!("{}: {}", path.display(), e)))?;
        text.parse()
    }
}

impl FromStr for RelayDocument {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| ConfigError::Document(e.to_string()).into())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Console,
    /// One JSON object per line
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `relay_rs=debug`
    pub level: Option<String>,
    /// Output format
    pub format: LogFormat,
}

fn empty_options() -> Value {
    Value::Object(Default::default())
}

/// One component declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentSpec {
    /// Component id
    pub id: String,
    /// Type tag looked up in the registry
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Adapter options, decoded by the adapter
    #[serde(default = "empty_options")]
    pub options: Value,
}

/// One pipe declaration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipeConfig {
    /// Source id
    #[serde(rename = "in")]
    pub source: String,
    /// Destinations
    pub outs: Vec<OutSpec>,
}

/// A destination, either a bare sink id or an object with overrides
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OutSpec {
    /// `"viewers"`
    Id(String),
    /// `{ "id": "viewers", "queue_capacity": 64 }`
    Detailed(DetailedOut),
}

/// Object form of [`OutSpec`]
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetailedOut {
    /// Sink id
    pub id: String,
    /// Queue capacity for this destination
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

impl From<OutSpec> for Destination {
    fn from(out: OutSpec) -> Self {
        match out {
            OutSpec::Id(id) => Destination::new(id),
            OutSpec::Detailed(DetailedOut { id, queue_capacity }) => Destination {
                sink_id: id,
                queue_capacity,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipe::FailurePolicy;

    #[test]
    fn test_full_document() {
        let doc: RelayDocument = r#"{
            "engine": { "queue_capacity": 64, "failure_policy": "abort" },
            "log": { "level": "debug", "format": "json" },
            "inbounds": [ { "id": "cam", "type": "udp", "options": { "address": "0.0.0.0:5000" } } ],
            "outbounds": [ { "id": "viewers", "type": "tcp", "options": { "address": "0.0.0.0:6000" } } ],
            "processes": [ { "id": "ff", "type": "exec", "options": { "path": "cat" } } ],
            "pipes": [
                { "in": "cam", "outs": ["ff"] },
                { "in": "ff", "outs": [{ "id": "viewers", "queue_capacity": 8 }] }
            ]
        }"#
        .parse()
        .unwrap();

        assert_eq!(doc.engine.queue_capacity, 64);
        assert_eq!(doc.engine.failure_policy, FailurePolicy::Abort);
        assert_eq!(doc.log.level.as_deref(), Some("debug"));
        assert_eq!(doc.log.format, LogFormat::Json);
        assert_eq!(doc.inbounds[0].type_tag, "udp");
        assert_eq!(doc.processes[0].id, "ff");

        let outs: Vec<Destination> = doc.pipes[1].outs.iter().cloned().map(Into::into).collect();
        assert_eq!(outs, vec![Destination::with_capacity("viewers", 8)]);
        let outs: Vec<Destination> = doc.pipes[0].outs.iter().cloned().map(Into::into).collect();
        assert_eq!(outs, vec![Destination::new("ff")]);
    }

    #[test]
    fn test_empty_document() {
        let doc: RelayDocument = "{}".parse().unwrap();
        assert!(doc.inbounds.is_empty());
        assert!(doc.pipes.is_empty());
        assert_eq!(doc.log.format, LogFormat::Console);
    }

    #[test]
    fn test_options_default_to_empty_object() {
        let doc: RelayDocument = r#"{ "processes": [ { "id": "p", "type": "exec" } ] }"#
            .parse()
            .unwrap();
        assert!(doc.processes[0].options.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<RelayDocument> = r#"{ "pipez": [] }"#.parse();
        assert!(matches!(result, Err(Error::Config(ConfigError::Document(_)))));

        let result: Result<RelayDocument> =
            r#"{ "pipes": [ { "in": "a", "outs": ["b"], "extra": 1 } ] }"#.parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = RelayDocument::load("/nonexistent/relay.json");
        assert!(matches!(result, Err(Error::Config(ConfigError::Document(_)))));
    }
}
