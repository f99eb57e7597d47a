//! Extension feature probing
//!
//! Each backend describes the optional driver extensions it can use with a static table of
//! [`FeatureDescriptor`]s. Probing walks the table once per context: a feature is enabled when its
//! extension is advertised (or the driver's core version already includes it) and every one of
//! its entry points resolves. Features are detected independently, a missing one only clears its
//! own bits.

use bitflags::bitflags;
use tracing::{debug, trace};

use super::loader::{SymbolLoader, SymbolTable};

bitflags! {
    /// Capabilities of a window system backend
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WinsysFeatures: u32 {
        /// More than one onscreen surface may exist at a time
        const MULTIPLE_ONSCREEN = 1 << 0;
        /// Swaps can be throttled to the vertical refresh
        const SWAP_THROTTLE = 1 << 1;
        /// A counter of elapsed vertical refreshes can be read
        const VBLANK_COUNTER = 1 << 2;
        /// The caller can block until the next vertical refresh
        const VBLANK_WAIT = 1 << 3;
        /// Pixmaps can be bound as textures without copying
        const TEXTURE_FROM_PIXMAP = 1 << 4;
        /// Swap completion is reported through events
        const SWAP_BUFFERS_EVENT = 1 << 5;
        /// Parts of the back buffer can be presented
        const SWAP_REGION = 1 << 6;
        /// Partial presentation can be throttled
        const SWAP_REGION_THROTTLE = 1 << 7;
        /// Partial presentation does not tear
        const SWAP_REGION_SYNCHRONIZED = 1 << 8;
        /// The age of the back buffer can be queried
        const BUFFER_AGE = 1 << 9;

        /// The driver accepts damage rectangles with a full swap
        const SWAP_BUFFERS_WITH_DAMAGE = 1 << 16;
        /// Contexts can be created with explicit version and profile attributes
        const CREATE_CONTEXT = 1 << 17;
        /// The driver exposes a swap interval control
        const SWAP_CONTROL = 1 << 18;
        /// Sub-rectangles of the back buffer can be copied to the front
        const COPY_SUB_BUFFER = 1 << 19;
        /// Vblank counter wait based on media stream counters
        const SYNC_CONTROL = 1 << 20;
        /// EGL images can be created
        const EGL_IMAGE = 1 << 21;
        /// Fence sync objects are available
        const FENCE_SYNC = 1 << 22;
        /// Contexts can be made current without a surface
        const SURFACELESS_CONTEXT = 1 << 23;
    }
}

/// An optional driver feature and how to detect it
#[derive(Debug, Clone, Copy)]
pub struct FeatureDescriptor {
    /// Core version from which the feature needs no extension, if any
    pub min_version: Option<(u32, u32)>,
    /// Extension namespaces to try, in order of preference (`"SGI"`, `"MESA"`, ...)
    pub namespaces: &'static [&'static str],
    /// Extension names without prefix and namespace (`"swap_control"`)
    pub extension_names: &'static [&'static str],
    /// Entry points without namespace suffix
    pub functions: &'static [&'static str],
    /// Bits enabled when the feature is found
    pub features: WinsysFeatures,
}

/// Space separated extension string as reported by a driver
#[derive(Debug, Clone, Default)]
pub struct ExtensionSet {
    names: Vec<String>,
}

impl ExtensionSet {
    /// Parse an extension string
    pub fn parse(extensions: &str) -> Self {
        ExtensionSet {
            names: extensions.split_whitespace().map(str::to_owned).collect(),
        }
    }

    /// Whether `name` is advertised
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|ext| ext == name)
    }

    /// Advertised extensions
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Result of probing a descriptor table
#[derive(Debug, Default, Clone)]
pub struct DetectedFeatures {
    /// Enabled features
    pub features: WinsysFeatures,
    /// Entry points of the enabled features, by unsuffixed name
    pub symbols: SymbolTable,
}

/// Detect every feature of `table`.
///
/// `prefix` is the extension prefix of the API (`"GLX"`, `"EGL"`), `version` the core version
/// reported by the driver.
pub fn detect_features(
    prefix: &str,
    table: &[FeatureDescriptor],
    version: (u32, u32),
    extensions: &ExtensionSet,
    loader: &dyn SymbolLoader,
) -> DetectedFeatures {
    let mut detected = DetectedFeatures::default();
    for descriptor in table {
        if let Some(symbols) = check_feature(prefix, descriptor, version, extensions, loader) {
            trace!(features = ?descriptor.features, "Feature available");
            detected.features |= descriptor.features;
            for (name, address) in symbols {
                detected.symbols.insert(name, address);
            }
        }
    }
    debug!(prefix, features = ?detected.features, "Detected window system features");
    detected
}

fn check_feature(
    prefix: &str,
    descriptor: &FeatureDescriptor,
    version: (u32, u32),
    extensions: &ExtensionSet,
    loader: &dyn SymbolLoader,
) -> Option<Vec<(&'static str, std::ptr::NonNull<std::ffi::c_void>)>> {
    let in_core = descriptor.min_version.map_or(false, |min| version >= min);
    let suffix = if in_core {
        ""
    } else {
        descriptor.namespaces.iter().copied().find(|namespace| {
            descriptor
                .extension_names
                .iter()
                .any(|name| extensions.contains(&format!("{prefix}_{namespace}_{name}")))
        })?
    };

    descriptor
        .functions
        .iter()
        .map(|&function| {
            loader
                .resolve(&format!("{function}{suffix}"))
                .map(|address| (function, address))
        })
        .collect()
}
