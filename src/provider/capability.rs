//! Capability resolution for the platform heap allocator.

use crate::error::{Error, Result};
use crate::memory::defaults::{ALLOC_SYMBOL, CREATE_SYMBOL, DESTROY_SYMBOL};
use libloading::{Library, Symbol};
use std::ffi::{OsStr, c_char, c_int, c_uint, c_void};

/// `void *CreateDmabufHeapBufferAllocator()`
pub type CreateAllocatorFn = unsafe extern "C" fn() -> *mut c_void;

/// `int DmabufHeapAlloc(void *allocator, const char *heap_name, size_t len,
/// unsigned int heap_flags, size_t legacy_align)`
///
/// Returns a new descriptor, or a negative errno.
pub type HeapAllocFn =
    unsafe extern "C" fn(*mut c_void, *const c_char, usize, c_uint, usize) -> c_int;

/// `void FreeDmabufHeapBufferAllocator(void *allocator)`
pub type DestroyAllocatorFn = unsafe extern "C" fn(*mut c_void);

/// The three allocator entry points, resolved together.
///
/// A value of this type always carries all three functions; there is no
/// partially resolved table.
#[derive(Clone, Copy)]
pub struct Capabilities {
    /// Creates the allocator object.
    pub create: CreateAllocatorFn,
    /// Allocates a descriptor from a named heap.
    pub alloc: HeapAllocFn,
    /// Destroys the allocator object.
    pub destroy: DestroyAllocatorFn,
}

impl Capabilities {
    /// Bundle entry points linked into the process.
    pub const fn new(
        create: CreateAllocatorFn,
        alloc: HeapAllocFn,
        destroy: DestroyAllocatorFn,
    ) -> Self {
        Self {
            create,
            alloc,
            destroy,
        }
    }

    /// Resolve all three entry points from a loaded library.
    ///
    /// # Safety
    ///
    /// The symbols must have the signatures declared above, and the returned
    /// function pointers must not be called after `library` is unloaded.
    pub(crate) unsafe fn resolve(library: &Library) -> Result<Self> {
        // SAFETY: Caller guarantees the symbol signatures.
        unsafe {
            Ok(Self {
                create: *lookup::<CreateAllocatorFn>(library, CREATE_SYMBOL)?,
                alloc: *lookup::<HeapAllocFn>(library, ALLOC_SYMBOL)?,
                destroy: *lookup::<DestroyAllocatorFn>(library, DESTROY_SYMBOL)?,
            })
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("create", &(self.create as *const ()))
            .field("alloc", &(self.alloc as *const ()))
            .field("destroy", &(self.destroy as *const ()))
            .finish()
    }
}

unsafe fn lookup<'lib, T>(library: &'lib Library, name: &[u8]) -> Result<Symbol<'lib, T>> {
    // SAFETY: Caller guarantees `T` matches the symbol's type.
    unsafe { library.get::<T>(name) }.map_err(|e| {
        let printable = String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name));
        tracing::error!(symbol = %printable, "failed to resolve allocator symbol: {}", e);
        Error::FacilityUnavailable(format!("missing symbol {printable}"))
    })
}

/// What keeps the capability functions alive.
pub(crate) enum Binding {
    /// A dynamically loaded library. Unloaded on drop.
    Library(Library),
    /// Functions linked into the process.
    Linked(Capabilities),
}

impl Binding {
    /// Load a shared library by name or path.
    pub(crate) fn open(name: &OsStr) -> Result<Self> {
        // SAFETY: Loading the platform allocator runs its initializers; the
        // library is a system component we trust by configuration.
        let library = unsafe { Library::new(name) }.map_err(|e| {
            Error::FacilityUnavailable(format!("failed to open {}: {}", name.to_string_lossy(), e))
        })?;
        Ok(Binding::Library(library))
    }

    /// Resolve the capability set held by this binding.
    pub(crate) fn capabilities(&self) -> Result<Capabilities> {
        match self {
            // SAFETY: The capabilities are stored next to the binding and
            // dropped before it (see `AllocatorProvider::release`).
            Binding::Library(library) => unsafe { Capabilities::resolve(library) },
            Binding::Linked(caps) => Ok(*caps),
        }
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Library(_) => f.write_str("Binding::Library"),
            Binding::Linked(caps) => f.debug_tuple("Binding::Linked").field(caps).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_library() {
        let result = Binding::open(OsStr::new("libdmaheap_nonexistent_xyz.so"));
        assert!(matches!(result, Err(Error::FacilityUnavailable(_))));
    }

    #[test]
    fn test_resolve_fails_on_library_without_symbols() {
        // libc is always loadable and never exports the allocator symbols.
        let Ok(binding) = Binding::open(OsStr::new("libc.so.6")) else {
            return;
        };
        let err = binding.capabilities().unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("CreateDmabufHeapBufferAllocator"));
    }

    #[test]
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn test_linked_binding_returns_same_table() {
        let caps = crate::testing::emulated_capabilities();
        let binding = Binding::Linked(caps);
        let resolved = binding.capabilities().unwrap();
        assert_eq!(resolved.create as *const (), caps.create as *const ());
        assert_eq!(resolved.alloc as *const (), caps.alloc as *const ());
        assert_eq!(resolved.destroy as *const (), caps.destroy as *const ());
    }
}
