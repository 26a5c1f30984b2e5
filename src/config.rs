//! Off-heap Configuration
//!
//! Configuration is an explicit value handed to [`OffHeap::new`](crate::OffHeap::new).
//! It can be built programmatically or loaded from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `OFFHEAP_DEBUG_ACCESS` | Track and validate every allocation and access ("true"/"false") | false |
//! | `OFFHEAP_ALLOCATOR` | Allocator backend (`system` or `malloc`) | system |
//!
//! # Example
//!
//! ```rust
//! use offheap::config::{AllocatorKind, OffHeapConfig};
//!
//! let config = OffHeapConfig::builder()
//!     .debug_access(true)
//!     .allocator(AllocatorKind::Malloc)
//!     .build();
//! assert!(config.debug_access);
//! ```

use std::env;
use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::ConfigError;

/// Environment variable enabling the debug tracker.
pub const ENV_DEBUG_ACCESS: &str = "OFFHEAP_DEBUG_ACCESS";
/// Environment variable selecting the allocator backend.
pub const ENV_ALLOCATOR: &str = "OFFHEAP_ALLOCATOR";

/// Allocator backend strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocatorKind {
    /// Rust's global allocation functions (`std::alloc`).
    #[default]
    System,
    /// The C library's `malloc`/`realloc`/`free`.
    Malloc,
}

impl AllocatorKind {
    /// Convert to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocatorKind::System => "system",
            AllocatorKind::Malloc => "malloc",
        }
    }
}

impl FromStr for AllocatorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "system" | "std" | "unsafe" => Ok(AllocatorKind::System),
            "malloc" | "libc" | "native" | "jna" => Ok(AllocatorKind::Malloc),
            other => Err(ConfigError::UnknownAllocator(other.to_string())),
        }
    }
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete off-heap configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffHeapConfig {
    /// Track every allocation and validate every access and free.
    /// Default: false. Enabling it substantially degrades performance.
    pub debug_access: bool,

    /// Allocator backend.
    /// Default: [`AllocatorKind::System`].
    pub allocator: AllocatorKind,
}

impl OffHeapConfig {
    /// Create a new builder for OffHeapConfig.
    pub fn builder() -> OffHeapConfigBuilder {
        OffHeapConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Variables that are not set use default values. Invalid values are
    /// logged as warnings and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var(ENV_DEBUG_ACCESS) {
            match parse_bool(&val) {
                Some(enabled) => config.debug_access = enabled,
                None => warn!(variable = ENV_DEBUG_ACCESS, value = %val, "ignoring invalid boolean"),
            }
        }

        if let Ok(val) = env::var(ENV_ALLOCATOR) {
            match val.parse::<AllocatorKind>() {
                Ok(kind) => config.allocator = kind,
                Err(e) => warn!(variable = ENV_ALLOCATOR, error = %e, "ignoring allocator selection"),
            }
        }

        config
    }
}

/// Builder for OffHeapConfig.
#[derive(Debug, Clone, Default)]
pub struct OffHeapConfigBuilder {
    config: OffHeapConfig,
}

impl OffHeapConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the debug tracker.
    pub fn debug_access(mut self, enabled: bool) -> Self {
        self.config.debug_access = enabled;
        self
    }

    /// Set the allocator backend.
    pub fn allocator(mut self, kind: AllocatorKind) -> Self {
        self.config.allocator = kind;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> OffHeapConfig {
        self.config
    }
}

/// Parse a boolean the way environment variables spell them.
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OffHeapConfig::default();
        assert!(!config.debug_access);
        assert_eq!(config.allocator, AllocatorKind::System);
    }

    #[test]
    fn test_builder() {
        let config = OffHeapConfig::builder()
            .debug_access(true)
            .allocator(AllocatorKind::Malloc)
            .build();

        assert!(config.debug_access);
        assert_eq!(config.allocator, AllocatorKind::Malloc);
    }

    #[test]
    fn test_allocator_kind_from_str() {
        assert_eq!("system".parse::<AllocatorKind>(), Ok(AllocatorKind::System));
        assert_eq!("UNSAFE".parse::<AllocatorKind>(), Ok(AllocatorKind::System));
        assert_eq!("malloc".parse::<AllocatorKind>(), Ok(AllocatorKind::Malloc));
        assert_eq!(" jna ".parse::<AllocatorKind>(), Ok(AllocatorKind::Malloc));
        assert_eq!(
            "jemalloc".parse::<AllocatorKind>(),
            Err(ConfigError::UnknownAllocator("jemalloc".into()))
        );
    }

    #[test]
    fn test_allocator_kind_display() {
        assert_eq!(AllocatorKind::System.to_string(), "system");
        assert_eq!(AllocatorKind::Malloc.to_string(), "malloc");
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_from_env() {
        // Only this test touches these variables.
        env::set_var(ENV_DEBUG_ACCESS, "yes");
        env::set_var(ENV_ALLOCATOR, "malloc");
        let config = OffHeapConfig::from_env();
        assert!(config.debug_access);
        assert_eq!(config.allocator, AllocatorKind::Malloc);

        env::set_var(ENV_DEBUG_ACCESS, "sometimes");
        env::set_var(ENV_ALLOCATOR, "bogus");
        let config = OffHeapConfig::from_env();
        assert_eq!(config, OffHeapConfig::default());

        env::remove_var(ENV_DEBUG_ACCESS);
        env::remove_var(ENV_ALLOCATOR);
        assert_eq!(OffHeapConfig::from_env(), OffHeapConfig::default());
    }
}
