//! Run options and the TOML pipeline configuration file.
//!
//! ```toml
//! [device]
//! l1_bytes = 1507328
//! page_capacity_bytes = 4096
//!
//! [run]
//! elements = 256
//! chunk = 64
//! dtype = "f32"
//! op = "add"
//! queue_pages = 1
//! timeout_ms = 10000   # 0 disables the deadline
//!
//! [diagnostics]
//! compute = true
//! ```
//!
//! Every table and field is optional.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use wormflow_chip::format::DataFormat;

use crate::error::{PipelineError, Result};
use crate::op::EltwiseOp;
use crate::profile::DeviceProfile;
use crate::program::StageId;

/// Default deadline for one run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default chunk size in elements.
pub const DEFAULT_CHUNK: usize = 64;

/// Per-stage chunk tracing switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagnostics {
    /// Trace inbound chunk reads
    pub inbound: bool,
    /// Trace compute chunk steps
    pub compute: bool,
    /// Trace outbound chunk writes
    pub outbound: bool,
}

impl Diagnostics {
    /// Every stage traced
    pub const ALL: Self = Self {
        inbound: true,
        compute: true,
        outbound: true,
    };

    /// Whether chunk tracing is on for a stage
    pub const fn for_stage(&self, stage: StageId) -> bool {
        match stage {
            StageId::Inbound => self.inbound,
            StageId::Compute => self.compute,
            StageId::Outbound => self.outbound,
        }
    }
}

/// Options for one [`crate::Orchestrator::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Elements per chunk for [`crate::run_elementwise`]
    pub chunk: usize,
    /// Pages per handoff queue
    pub queue_pages: usize,
    /// Run deadline; `None` waits forever
    pub timeout: Option<Duration>,
    /// Chunk tracing
    pub diagnostics: Diagnostics,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            chunk: DEFAULT_CHUNK,
            queue_pages: 1,
            timeout: Some(DEFAULT_RUN_TIMEOUT),
            diagnostics: Diagnostics::default(),
        }
    }
}

impl RunOptions {
    /// Set chunk size
    #[must_use]
    pub const fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    /// Set pages per queue
    #[must_use]
    pub const fn with_queue_pages(mut self, pages: usize) -> Self {
        self.queue_pages = pages;
        self
    }

    /// Set or clear the run deadline
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set chunk tracing
    #[must_use]
    pub const fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }
}

/// The `[run]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Elements per array (N)
    pub elements: usize,
    /// Elements per chunk (K)
    pub chunk: usize,
    /// Element format
    #[serde(with = "dtype")]
    pub dtype: DataFormat,
    /// Operator
    pub op: EltwiseOp,
    /// Pages per handoff queue
    pub queue_pages: usize,
    /// Run deadline in milliseconds, 0 for none
    pub timeout_ms: u64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            elements: 256,
            chunk: DEFAULT_CHUNK,
            dtype: DataFormat::Float32,
            op: EltwiseOp::Add,
            queue_pages: 1,
            timeout_ms: 10_000,
        }
    }
}

impl RunSection {
    /// Deadline as a duration (`None` when disabled)
    pub const fn timeout(&self) -> Option<Duration> {
        if self.timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.timeout_ms))
        }
    }
}

/// A pipeline configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Device resources
    pub device: DeviceProfile,
    /// Workload and run options
    pub run: RunSection,
    /// Chunk tracing
    pub diagnostics: Diagnostics,
}

impl PipelineConfig {
    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// `ConfigNotFound` if the file does not exist, `Io` if it cannot be read,
    /// `ConfigParse` if it is not a valid configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PipelineError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        info!("Loading pipeline config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// `ConfigParse` on malformed TOML or unknown values.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Run options described by this configuration
    pub const fn run_options(&self) -> RunOptions {
        RunOptions {
            chunk: self.run.chunk,
            queue_pages: self.run.queue_pages,
            timeout: self.run.timeout(),
            diagnostics: self.diagnostics,
        }
    }
}

mod dtype {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use wormflow_chip::format::DataFormat;

    pub fn serialize<S: Serializer>(format: &DataFormat, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(format.name())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DataFormat, D::Error> {
        let name = String::deserialize(d)?;
        name.parse().map_err(D::Error::custom)
    }
}
