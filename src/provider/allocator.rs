//! The process-wide heap allocator provider.

use super::capability::{Binding, Capabilities};
use super::config::{CapabilitySource, ProviderConfig};
use crate::error::{Error, Result};
use crate::memory::record::{AllocationRecord, aligned_size};
use rustix::fd::{FromRawFd, OwnedFd};
use std::ffi::{CString, c_void};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Opaque allocator object returned by the create entry point.
struct AllocatorHandle(NonNull<c_void>);

// SAFETY: The handle is only passed back to the library that created it,
// whose alloc entry point is safe to call from any thread.
unsafe impl Send for AllocatorHandle {}
unsafe impl Sync for AllocatorHandle {}

/// A created allocator together with the table that created it.
struct LiveAllocator {
    handle: AllocatorHandle,
    capabilities: Capabilities,
}

#[derive(Default)]
struct ProviderState {
    /// Loaded library. Kept across failed setups so it is not reopened.
    binding: Option<Binding>,
    /// Present iff the binding is loaded, all symbols resolved, and the
    /// allocator was created.
    live: Option<LiveAllocator>,
}

impl ProviderState {
    /// Destroy the allocator, then unload the library that defines it.
    fn teardown(&mut self) {
        if let Some(live) = self.live.take() {
            tracing::debug!("destroying dma heap allocator");
            // SAFETY: The handle came from `capabilities.create` and the
            // binding is still loaded at this point.
            unsafe { (live.capabilities.destroy)(live.handle.0.as_ptr()) };
        }
        if let Some(binding) = self.binding.take() {
            tracing::debug!(?binding, "unloading allocator binding");
            drop(binding);
        }
    }
}

/// Resolves and owns the platform heap allocator.
///
/// One instance per process is reachable through [`get_instance`]; separate
/// instances can be built with [`with_config`] for embedding or tests.
///
/// # Thread Safety
///
/// `allocate` and `free` run concurrently with each other. `release` waits
/// for in-flight allocations and blocks new ones until it is done.
///
/// [`get_instance`]: AllocatorProvider::get_instance
/// [`with_config`]: AllocatorProvider::with_config
pub struct AllocatorProvider {
    config: ProviderConfig,
    state: RwLock<ProviderState>,
    /// Number of times a binding was established.
    loads: AtomicUsize,
}

struct GlobalSlot {
    config: Option<ProviderConfig>,
    instance: Option<Arc<AllocatorProvider>>,
}

/// Guards first-time initialization, configuration and shutdown of the
/// process-wide instance.
static GLOBAL: Mutex<GlobalSlot> = Mutex::new(GlobalSlot {
    config: None,
    instance: None,
});

/// Lock the process-wide slot. A poisoned lock still holds a consistent
/// slot, since every update to it is a single assignment.
fn global_slot() -> MutexGuard<'static, GlobalSlot> {
    GLOBAL.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AllocatorProvider {
    /// Get the process-wide provider, initializing it on first use.
    ///
    /// Returns `None` when the heap allocator is not available on this
    /// system. That is a supported configuration; callers fall back to
    /// ordinary memory. A failed initialization is retried on the next call.
    pub fn get_instance() -> Option<Arc<Self>> {
        match Self::try_get_instance() {
            Ok(provider) => Some(provider),
            Err(e) if e.is_unavailable() => {
                tracing::debug!("dma heap allocator unavailable: {}", e);
                None
            }
            Err(e) => {
                tracing::error!("failed to set up dma heap allocator: {}", e);
                None
            }
        }
    }

    /// Like [`get_instance`](Self::get_instance), reporting why the provider
    /// is absent.
    pub fn try_get_instance() -> Result<Arc<Self>> {
        // A ready instance is handed out without holding GLOBAL across its
        // state lock; only setup needs both.
        let existing = global_slot().instance.clone();
        if let Some(provider) = existing.filter(|p| p.is_ready()) {
            return Ok(provider);
        }

        let mut global = global_slot();
        if let Some(provider) = &global.instance {
            provider.setup()?;
            return Ok(Arc::clone(provider));
        }

        let config = global.config.clone().unwrap_or_else(ProviderConfig::from_env);
        let provider = Self::with_config(config)?;
        global.instance = Some(Arc::clone(&provider));
        Ok(provider)
    }

    /// The process-wide provider if it is already initialized, without
    /// attempting initialization.
    pub fn current() -> Option<Arc<Self>> {
        let global = global_slot();
        global
            .instance
            .as_ref()
            .filter(|p| p.is_ready())
            .map(Arc::clone)
    }

    /// Set the configuration used when the process-wide provider initializes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the provider is already initialized;
    /// call [`shutdown`](Self::shutdown) first to reconfigure.
    pub fn configure(config: ProviderConfig) -> Result<()> {
        let mut global = global_slot();
        if global.instance.as_ref().is_some_and(|p| p.is_ready()) {
            return Err(Error::InvalidState("allocator provider already initialized"));
        }
        global.instance = None;
        global.config = Some(config);
        Ok(())
    }

    /// Release the process-wide provider and forget it.
    ///
    /// Outstanding buffers stay valid; their descriptors are still closed on
    /// release. The next [`get_instance`](Self::get_instance) initializes a
    /// fresh provider.
    pub fn shutdown() {
        let instance = global_slot().instance.take();
        if let Some(provider) = instance {
            provider.release();
        }
    }

    /// Create a standalone provider and set it up.
    pub fn with_config(config: ProviderConfig) -> Result<Arc<Self>> {
        if !crate::sys::SUPPORTED {
            return Err(Error::FacilityUnavailable(
                "dma heaps are not supported on this platform".into(),
            ));
        }

        let provider = Arc::new(Self {
            config,
            state: RwLock::new(ProviderState::default()),
            loads: AtomicUsize::new(0),
        });
        provider.setup()?;
        Ok(provider)
    }

    /// Load the binding (if needed), resolve the capabilities and create the
    /// allocator. No-op if already set up.
    fn setup(&self) -> Result<()> {
        let mut state = self.write_state();
        if state.live.is_some() {
            return Ok(());
        }

        tracing::debug!("setting up dma heap allocator");
        if state.binding.is_none() {
            let binding = match &self.config.source {
                CapabilitySource::Library(name) => Binding::open(name)?,
                CapabilitySource::Linked(caps) => Binding::Linked(*caps),
            };
            self.loads.fetch_add(1, Ordering::Relaxed);
            state.binding = Some(binding);
        }

        let capabilities = match &state.binding {
            Some(binding) => binding.capabilities()?,
            None => return Err(Error::InvalidState("allocator binding missing")),
        };

        // SAFETY: The create entry point takes no arguments.
        let raw = unsafe { (capabilities.create)() };
        let handle = NonNull::new(raw).ok_or_else(|| {
            tracing::error!("CreateDmabufHeapBufferAllocator returned null");
            Error::FacilityUnavailable("allocator creation returned null".into())
        })?;

        state.live = Some(LiveAllocator {
            handle: AllocatorHandle(handle),
            capabilities,
        });
        tracing::debug!("dma heap allocator ready");
        Ok(())
    }

    // Provider state is only replaced whole (`live` set or taken), so a
    // panic elsewhere cannot leave it half-updated.
    fn read_state(&self) -> RwLockReadGuard<'_, ProviderState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ProviderState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate `size` bytes, rounded up to `alignment`, from `heap_name`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAlignment`] if `alignment` is zero or not a power of
    ///   two (checked before calling the allocator)
    /// - [`Error::AllocationFailed`] for a zero size, an unknown heap or an
    ///   exhausted one
    /// - [`Error::InvalidState`] if the provider has been released
    pub fn allocate(
        &self,
        size: usize,
        alignment: usize,
        heap_name: &str,
    ) -> Result<AllocationRecord> {
        let aligned = aligned_size(size, alignment)?;
        let heap = CString::new(heap_name).map_err(|_| {
            Error::AllocationFailed(format!("heap name {heap_name:?} contains a NUL byte"))
        })?;

        let state = self.read_state();
        let live = state
            .live
            .as_ref()
            .ok_or(Error::InvalidState("allocator provider released"))?;

        // SAFETY: The handle is live under the read lock, and `heap` outlives
        // the call.
        let fd = unsafe {
            (live.capabilities.alloc)(live.handle.0.as_ptr(), heap.as_ptr(), aligned, 0, 0)
        };
        if fd < 0 {
            let err = std::io::Error::from_raw_os_error(fd.saturating_neg());
            tracing::error!(heap = heap_name, size = aligned, "DmabufHeapAlloc failed: {}", err);
            return Err(Error::AllocationFailed(format!(
                "DmabufHeapAlloc(\"{heap_name}\", {aligned}, 0, 0) failed: {err}"
            )));
        }

        // SAFETY: On success the allocator hands us a new descriptor we own.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        let record = AllocationRecord::new(fd, aligned)
            .ok_or_else(|| Error::AllocationFailed("zero-sized allocation".into()))?;
        tracing::debug!(fd = record.raw_fd(), size = aligned, heap = heap_name, "allocated dma buffer");
        Ok(record)
    }

    /// Close the record's descriptor and reset it.
    ///
    /// Must only be called once every CPU mapping of the descriptor is gone.
    /// Freeing an already-freed record logs a warning and does nothing.
    pub fn free(&self, record: &mut AllocationRecord) {
        let fd = record.raw_fd();
        if record.close() {
            tracing::debug!(fd, "freed dma buffer");
        } else {
            tracing::warn!("free of an already-freed allocation record");
        }
    }

    /// Destroy the allocator and unload the library.
    ///
    /// Idempotent. Records allocated earlier remain valid and can still be
    /// freed.
    pub fn release(&self) {
        self.write_state().teardown();
    }

    /// Whether the allocator is created and usable.
    pub fn is_ready(&self) -> bool {
        self.read_state().live.is_some()
    }

    /// The live allocator object, for diagnostics.
    pub fn allocator_handle(&self) -> Option<NonNull<c_void>> {
        self.read_state().live.as_ref().map(|l| l.handle.0)
    }

    /// Number of times the library (or linked table) was bound.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// The configuration this provider was built with.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

impl Drop for AllocatorProvider {
    fn drop(&mut self) {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .teardown();
    }
}

impl std::fmt::Debug for AllocatorProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatorProvider")
            .field("source", &self.config.source)
            .field("ready", &self.is_ready())
            .field("loads", &self.load_count())
            .finish()
    }
}

#[cfg(all(test, any(target_os = "linux", target_os = "android")))]
mod tests {
    use super::*;
    use crate::testing::{emulated_config, null_create_config};

    #[test]
    fn test_standalone_provider_allocates() {
        let provider = AllocatorProvider::with_config(emulated_config()).unwrap();
        assert!(provider.is_ready());
        assert_eq!(provider.load_count(), 1);

        let mut record = provider.allocate(100, 0x1000, "system").unwrap();
        assert_eq!(record.size(), 0x1000);
        assert!(record.raw_fd() >= 0);

        provider.free(&mut record);
        assert!(!record.is_valid());
    }

    #[test]
    fn test_missing_library_is_unavailable() {
        let result =
            AllocatorProvider::with_config(ProviderConfig::library("libdmaheap_missing_xyz.so"));
        assert!(matches!(result, Err(Error::FacilityUnavailable(_))));
    }

    #[test]
    fn test_null_allocator_is_unavailable() {
        let result = AllocatorProvider::with_config(null_create_config());
        assert!(matches!(result, Err(Error::FacilityUnavailable(_))));
    }

    #[test]
    fn test_release_is_idempotent() {
        let provider = AllocatorProvider::with_config(emulated_config()).unwrap();
        provider.release();
        assert!(!provider.is_ready());
        assert!(provider.allocator_handle().is_none());
        provider.release();
        assert!(!provider.is_ready());
    }

    #[test]
    fn test_allocate_after_release_is_invalid_state() {
        let provider = AllocatorProvider::with_config(emulated_config()).unwrap();
        provider.release();
        let result = provider.allocate(4096, 0x1000, "system");
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_setup_after_release_rebinds() {
        let provider = AllocatorProvider::with_config(emulated_config()).unwrap();
        provider.release();
        provider.setup().unwrap();
        assert!(provider.is_ready());
        assert_eq!(provider.load_count(), 2);
    }

    #[test]
    fn test_bad_alignment_rejected() {
        let provider = AllocatorProvider::with_config(emulated_config()).unwrap();
        assert!(matches!(
            provider.allocate(4096, 3, "system"),
            Err(Error::InvalidAlignment(3))
        ));
        assert!(matches!(
            provider.allocate(4096, 0, "system"),
            Err(Error::InvalidAlignment(0))
        ));
    }

    #[test]
    fn test_poisoned_state_lock_is_recovered() {
        let provider = AllocatorProvider::with_config(emulated_config()).unwrap();
        let poisoner = Arc::clone(&provider);
        let result = std::thread::spawn(move || {
            let _state = poisoner.state.write().unwrap();
            panic!("poison the state lock");
        })
        .join();
        assert!(result.is_err());
        assert!(provider.state.is_poisoned());

        assert!(provider.is_ready());
        let mut record = provider.allocate(4096, 0x1000, "system").unwrap();
        provider.free(&mut record);
        provider.release();
        assert!(!provider.is_ready());
    }

    #[test]
    fn test_heap_name_with_nul_rejected() {
        let provider = AllocatorProvider::with_config(emulated_config()).unwrap();
        let result = provider.allocate(4096, 0x1000, "sys\0tem");
        assert!(matches!(result, Err(Error::AllocationFailed(_))));
    }
}
