//! Provider configuration.

use super::capability::Capabilities;
use crate::memory::defaults::{DEFAULT_LIBRARY, LIBRARY_ENV};
use std::ffi::OsString;

/// Where the allocator entry points come from.
#[derive(Debug, Clone)]
pub enum CapabilitySource {
    /// Load a shared library (name or path) and resolve the symbols from it.
    Library(OsString),
    /// Use entry points already linked into the process.
    Linked(Capabilities),
}

/// Configuration for an [`AllocatorProvider`](super::AllocatorProvider).
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Capability source.
    pub source: CapabilitySource,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            source: CapabilitySource::Library(DEFAULT_LIBRARY.into()),
        }
    }
}

impl ProviderConfig {
    /// Load the allocator from the named library.
    pub fn library(name: impl Into<OsString>) -> Self {
        Self {
            source: CapabilitySource::Library(name.into()),
        }
    }

    /// Use linked-in entry points.
    pub fn linked(capabilities: Capabilities) -> Self {
        Self {
            source: CapabilitySource::Linked(capabilities),
        }
    }

    /// Default configuration, with the library overridden by
    /// `DMAHEAP_LIBRARY` when set and non-empty.
    pub fn from_env() -> Self {
        match std::env::var_os(LIBRARY_ENV) {
            Some(name) if !name.is_empty() => Self::library(name),
            _ => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_platform_library() {
        let config = ProviderConfig::default();
        match config.source {
            CapabilitySource::Library(name) => assert_eq!(name, "libdmabufheap.so"),
            CapabilitySource::Linked(_) => panic!("expected library source"),
        }
    }

    #[test]
    fn test_library_builder() {
        let config = ProviderConfig::library("/vendor/lib64/libdmabufheap.so");
        assert!(matches!(
            config.source,
            CapabilitySource::Library(ref name) if name == "/vendor/lib64/libdmabufheap.so"
        ));
    }

    #[test]
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn test_linked_builder() {
        let config = ProviderConfig::linked(crate::testing::emulated_capabilities());
        assert!(matches!(config.source, CapabilitySource::Linked(_)));
    }
}
