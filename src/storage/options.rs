use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::metrics::IngressMetrics;
use crate::ingress::{PartitionKind, Partitioner};
use crate::types::{GraphError, Result};

/// Default number of records buffered per destination before a batch ships.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Serializable ingress settings, typically loaded from a TOML file.
///
/// ```toml
/// batch_size = 4096
/// edge_space_hint = 1000000
///
/// [partition]
/// kind = "hash"
/// seed = 17
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngressConfig {
    /// Records buffered per destination before a batch is shipped.
    pub batch_size: usize,
    /// Built-in placement policy. Every process must agree on it.
    pub partition: PartitionKind,
    /// Extra edge capacity reserved in the local graph before draining.
    pub edge_space_hint: usize,
    /// Whether rank 0 logs per-phase progress at `info` level.
    pub log_progress: bool,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            partition: PartitionKind::default(),
            edge_space_hint: 0,
            log_progress: true,
        }
    }
}

impl IngressConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: IngressConfig =
            toml::from_str(text).map_err(|err| GraphError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks field ranges.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(GraphError::Config("batch_size must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration supplied when constructing a
/// [`crate::ingress::DistributedIngress`].
#[derive(Clone)]
pub struct IngressOptions {
    /// Serializable settings.
    pub config: IngressConfig,
    /// Explicit placement policy; overrides `config.partition` when set.
    pub partitioner: Option<Arc<dyn Partitioner>>,
    /// Optional metrics collection implementation.
    pub metrics: Option<Arc<dyn IngressMetrics>>,
}

impl Default for IngressOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IngressOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngressOptions")
            .field("config", &self.config)
            .field("partitioner", &self.partitioner)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl IngressOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::from_config(IngressConfig::default())
    }

    /// Wraps already-parsed settings.
    pub fn from_config(config: IngressConfig) -> Self {
        Self {
            config,
            partitioner: None,
            metrics: None,
        }
    }

    /// Parses settings from a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        IngressConfig::from_toml_str(text).map(Self::from_config)
    }

    /// Loads settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Sets the per-destination batch size.
    pub fn batch_size(mut self, records: usize) -> Self {
        self.config.batch_size = records;
        self
    }

    /// Selects a built-in placement policy.
    pub fn partition(mut self, kind: PartitionKind) -> Self {
        self.config.partition = kind;
        self.partitioner = None;
        self
    }

    /// Installs a custom placement policy.
    pub fn partitioner(mut self, partitioner: Arc<dyn Partitioner>) -> Self {
        self.partitioner = Some(partitioner);
        self
    }

    /// Sets the extra edge capacity reserved before draining.
    pub fn edge_space_hint(mut self, edges: usize) -> Self {
        self.config.edge_space_hint = edges;
        self
    }

    /// Enables or disables rank-0 progress logging.
    pub fn log_progress(mut self, enabled: bool) -> Self {
        self.config.log_progress = enabled;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn IngressMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the effective placement policy.
    pub fn resolve_partitioner(&self) -> Arc<dyn Partitioner> {
        match &self.partitioner {
            Some(partitioner) => Arc::clone(partitioner),
            None => Arc::from(self.config.partition.build()),
        }
    }
}
