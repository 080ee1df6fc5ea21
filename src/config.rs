//! Stream configuration.
//!
//! ```rust
//! use objstream::{ProtocolVersion, StreamConfig};
//!
//! let config = StreamConfig::default()
//!     .with_protocol(ProtocolVersion::V1)
//!     .with_filter("maxdepth=64;demo.**;!*");
//! assert_eq!(config.protocol, ProtocolVersion::V1);
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constants::SERIAL_FILTER_ENV;
use crate::error::Result;
use crate::filter::{self, ObjectInputFilter, PatternFilter};
use crate::format::ProtocolVersion;
use crate::registry::{self, ClassResolver, TypeRegistry};

/// Settings applied when a stream is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Protocol version used by writers.
    pub protocol: ProtocolVersion,
    /// Filter pattern for readers; `None` falls back to the global filter.
    pub filter: Option<String>,
    /// Whether readers resolve through the global registry. When unset they only know the
    /// built-in classes unless given a resolver.
    pub use_global_registry: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::V2,
            filter: None,
            use_global_registry: true,
        }
    }
}

impl StreamConfig {
    /// Defaults, with the filter pattern taken from `OBJSTREAM_SERIAL_FILTER` if set.
    pub fn from_env() -> Self {
        Self {
            filter: std::env::var(SERIAL_FILTER_ENV)
                .ok()
                .filter(|p| !p.trim().is_empty()),
            ..Self::default()
        }
    }

    /// Sets the protocol version.
    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the filter pattern.
    pub fn with_filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter = Some(pattern.into());
        self
    }

    /// Sets whether the global registry is consulted.
    pub fn with_global_registry(mut self, enabled: bool) -> Self {
        self.use_global_registry = enabled;
        self
    }

    /// Filter for a new reader: the configured pattern, else the global filter.
    pub(crate) fn input_filter(&self) -> Result<Option<Arc<dyn ObjectInputFilter>>> {
        match &self.filter {
            Some(pattern) => Ok(Some(Arc::new(PatternFilter::parse(pattern)?))),
            None => Ok(filter::global_filter()),
        }
    }

    /// Resolver for a new reader.
    pub(crate) fn resolver(&self) -> Box<dyn ClassResolver> {
        if self.use_global_registry {
            Box::new(registry::global().clone())
        } else {
            Box::new(TypeRegistry::new())
        }
    }
}
