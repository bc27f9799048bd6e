//! Publish orchestration
//!
//! A [`PublishTask`] publishes the requested layers, one at a time, to an
//! optional geodata server and an optional metadata server:
//!
//! 1. the geodata server is prepared once
//! 2. for every layer: metadata is validated, data (or only the style) is
//!    published according to the [`MetadataPolicy`], then the metadata record
//! 3. the layer group hierarchy is mirrored and the geodata server finalized
//!
//! Failures of a single layer are recorded in that layer's [`LayerReport`] and
//! never stop the batch. Anything failing outside the per-layer boundary fails
//! the whole run.
//!
//! - [`task`] - the cancellable task and its handle
//! - [`groups`] - layer group hierarchy derived from the project tree
//! - [`runner`] - foreground and background execution

pub mod groups;
pub mod runner;
pub mod task;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::layers::MapLayer;
use crate::servers::PublishLog;

pub use groups::{layer_groups, GroupMember, LayerGroup};
pub use task::{PublishOutcome, PublishTask, TaskHandle};

/// How invalid layer metadata gates publishing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataPolicy {
    /// Invalid metadata blocks both data and metadata publishing
    Deny,
    /// Invalid metadata blocks nothing
    #[default]
    Allow,
    /// Invalid metadata blocks the metadata record but not the data
    AllowOnlyData,
}

impl MetadataPolicy {
    /// Whether data may be published for a layer with the given validation result
    pub fn allows_data(&self, metadata_valid: bool) -> bool {
        metadata_valid || matches!(self, Self::Allow | Self::AllowOnlyData)
    }

    /// Whether the metadata record may be published
    pub fn allows_metadata(&self, metadata_valid: bool) -> bool {
        metadata_valid || *self == Self::Allow
    }
}

impl fmt::Display for MetadataPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deny => "deny",
            Self::Allow => "allow",
            Self::AllowOnlyData => "allow_only_data",
        };
        f.write_str(name)
    }
}

impl FromStr for MetadataPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "deny" | "donotallow" => Ok(Self::Deny),
            "allow" => Ok(Self::Allow),
            "allow_only_data" | "allowonlydata" => Ok(Self::AllowOnlyData),
            other => Err(format!(
                "unknown metadata policy '{other}' (expected deny, allow or allow_only_data)"
            )),
        }
    }
}

/// What to publish
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishRequest {
    /// Layer names, processed in this order
    pub layer_names: Vec<String>,
    /// Layer name -> field name -> publish flag; layers without an entry
    /// publish every field
    pub fields_per_layer: HashMap<String, HashMap<String, bool>>,
    /// Only upload styles, leave data untouched
    pub only_symbology: bool,
}

impl PublishRequest {
    pub fn new<I, S>(layer_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            layer_names: layer_names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_fields(mut self, layer: impl Into<String>, fields: HashMap<String, bool>) -> Self {
        self.fields_per_layer.insert(layer.into(), fields);
        self
    }

    pub fn only_symbology(mut self, only_symbology: bool) -> Self {
        self.only_symbology = only_symbology;
        self
    }

    /// Fields selected for a vector layer, in layer order
    ///
    /// `None` when the request does not restrict the layer. Selected names
    /// the layer does not have are kept at the end so the exporter can
    /// report them.
    pub fn selected_fields(&self, layer: &dyn MapLayer) -> Option<Vec<String>> {
        let flags = self.fields_per_layer.get(layer.name())?;

        let mut selected: Vec<String> = layer
            .fields()
            .iter()
            .filter(|field| flags.get(&field.name).copied().unwrap_or(false))
            .map(|field| field.name.clone())
            .collect();

        let mut unknown: Vec<String> = flags
            .iter()
            .filter(|(name, publish)| **publish && !selected.contains(*name))
            .map(|(name, _)| name.clone())
            .collect();
        unknown.sort();
        selected.extend(unknown);

        Some(selected)
    }
}

/// Warnings and errors recorded for one layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayerReport {
    /// Duplicates collapse
    pub warnings: BTreeSet<String>,
    /// Order and duplicates are kept
    pub errors: Vec<String>,
}

impl LayerReport {
    /// File an adapter log under this layer
    pub fn absorb(&mut self, log: PublishLog) {
        self.warnings.extend(log.warnings);
        self.errors.extend(log.errors);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Per-layer results of a publish run, keyed by layer name
pub type PublishResult = BTreeMap<String, LayerReport>;

/// Lifecycle of a publish task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Canceled,
    Failed,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
