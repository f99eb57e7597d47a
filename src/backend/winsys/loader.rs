//! Dynamic symbol resolution for driver entry points

use std::{
    collections::HashMap,
    ffi::{c_void, CString},
    fmt, mem,
    ptr::NonNull,
};

use tracing::trace;

/// Error loading a driver library or one of its mandatory entry points
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The library could not be opened
    #[error("Failed to open {name}: {reason}")]
    Open {
        /// Library that was attempted
        name: &'static str,
        /// Why it failed
        reason: String,
    },
    /// A mandatory symbol is missing
    #[error("Required symbol {0} is missing")]
    MissingSymbol(String),
}

/// Resolves symbols by name
pub trait SymbolLoader {
    /// Address of `name`, if it can be resolved
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>>;
}

impl<A: SymbolLoader, B: SymbolLoader> SymbolLoader for (A, B) {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        self.0.resolve(name).or_else(|| self.1.resolve(name))
    }
}

impl<T: SymbolLoader + ?Sized> SymbolLoader for &T {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        (**self).resolve(name)
    }
}

/// A shared library opened with `dlopen`
#[cfg(feature = "libloading")]
pub struct DynamicLibrary {
    name: &'static str,
    library: libloading::Library,
}

#[cfg(feature = "libloading")]
impl fmt::Debug for DynamicLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicLibrary").field("name", &self.name).finish()
    }
}

#[cfg(feature = "libloading")]
impl DynamicLibrary {
    /// Open the first library of `names` that can be loaded
    pub fn open_first(names: &[&'static str]) -> Result<DynamicLibrary, LoaderError> {
        let mut reason = String::from("no candidate");
        for &name in names {
            match unsafe { libloading::Library::new(name) } {
                Ok(library) => {
                    trace!(name, "Loaded library");
                    return Ok(DynamicLibrary { name, library });
                }
                Err(err) => reason = err.to_string(),
            }
        }
        Err(LoaderError::Open {
            name: names.first().copied().unwrap_or_default(),
            reason,
        })
    }
}

#[cfg(feature = "libloading")]
impl SymbolLoader for DynamicLibrary {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        let symbol = CString::new(name).ok()?;
        let address = unsafe {
            self.library
                .get::<*mut c_void>(symbol.as_bytes_with_nul())
                .ok()
                .map(|symbol| *symbol)?
        };
        NonNull::new(address)
    }
}

/// Resolves through a `GetProcAddress` style entry point of the driver
pub struct ProcAddressLoader {
    get_proc_address: unsafe extern "C" fn(*const std::ffi::c_char) -> *mut c_void,
}

impl fmt::Debug for ProcAddressLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcAddressLoader").finish_non_exhaustive()
    }
}

impl ProcAddressLoader {
    /// Wrap a driver's `GetProcAddress`
    pub fn new(get_proc_address: unsafe extern "C" fn(*const std::ffi::c_char) -> *mut c_void) -> Self {
        ProcAddressLoader { get_proc_address }
    }
}

impl SymbolLoader for ProcAddressLoader {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        let symbol = CString::new(name).ok()?;
        NonNull::new(unsafe { (self.get_proc_address)(symbol.as_ptr()) })
    }
}

/// Resolved entry points, by name
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    symbols: HashMap<String, NonNull<c_void>>,
}

impl SymbolTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resolved symbol
    pub fn insert(&mut self, name: impl Into<String>, address: NonNull<c_void>) {
        self.symbols.insert(name.into(), address);
    }

    /// Whether `name` was resolved
    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Number of resolved symbols
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether nothing was resolved
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Resolve every name of `names`, failing on the first one that is missing
    pub fn load_required(&mut self, loader: &dyn SymbolLoader, names: &[&str]) -> Result<(), LoaderError> {
        for &name in names {
            let address = loader
                .resolve(name)
                .ok_or_else(|| LoaderError::MissingSymbol(name.to_owned()))?;
            self.insert(name, address);
        }
        Ok(())
    }

    /// Typed access to a resolved symbol
    ///
    /// # Safety
    ///
    /// `F` must be the function pointer type matching the symbol's C signature.
    pub unsafe fn get<F: Copy>(&self, name: &str) -> Option<F> {
        assert_eq!(mem::size_of::<F>(), mem::size_of::<*mut c_void>());
        self.symbols
            .get(name)
            .map(|address| mem::transmute_copy::<*mut c_void, F>(&address.as_ptr()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;

    use super::*;

    /// Resolves a fixed set of names to dummy addresses
    #[derive(Debug, Default)]
    pub(crate) struct FakeLoader {
        pub names: HashSet<String>,
    }

    impl FakeLoader {
        pub fn with(names: &[&str]) -> Self {
            FakeLoader {
                names: names.iter().map(|name| name.to_string()).collect(),
            }
        }
    }

    impl SymbolLoader for FakeLoader {
        fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
            self.names
                .contains(name)
                .then(|| NonNull::dangling())
        }
    }

    #[test]
    fn required_symbols_fail_fast() {
        let loader = FakeLoader::with(&["a", "b"]);
        let mut table = SymbolTable::new();
        assert!(table.load_required(&loader, &["a", "b"]).is_ok());
        assert_eq!(table.len(), 2);

        let err = table.load_required(&loader, &["a", "missing"]).unwrap_err();
        assert!(matches!(err, LoaderError::MissingSymbol(name) if name == "missing"));
    }

    #[test]
    fn chained_loaders_fall_back() {
        let loader = (FakeLoader::with(&["first"]), FakeLoader::with(&["second"]));
        assert!(loader.resolve("first").is_some());
        assert!(loader.resolve("second").is_some());
        assert!(loader.resolve("third").is_none());
    }
}
