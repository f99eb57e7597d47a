use tracing::{info, warn};

use super::X11Error;

/// Version and event base of an extension present on the server.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    /// Version negotiated with the server
    pub version: (u32, u32),
    /// First event code allocated to the extension
    pub first_event: u8,
}

/// The extension macro.
///
/// Generates a struct recording which optional X11 extensions are present together with their
/// negotiated version and event base. A missing extension is not an error, it is recorded as
/// `None` and the features built on top of it are disabled.
///
/// ```rust,ignore
/// extensions! {
///     // Module name inside `x11rb::protocol`
///     damage {
///         // Version query with the arguments to send
///         damage_query_version(1, 1),
///     },
/// }
/// ```
macro_rules! extensions {
    (
        $(
            $extension:ident {
                $extension_fn:ident ( $($arg:expr),* ),
            },
        )*
    ) => {
        /// Optional extensions available on the X server.
        #[derive(Debug, Copy, Clone, Default)]
        pub struct Extensions {
            $(
                #[doc = concat!(" The `", stringify!($extension), "` extension, if present.")]
                pub $extension: Option<ExtensionInfo>,
            )*
        }

        impl Extensions {
            /// Query the server for every known extension.
            pub fn check_extensions<C: x11rb::connection::Connection>(connection: &C) -> Result<Extensions, X11Error> {
                $(
                    let $extension = {
                        use x11rb::protocol::$extension::{ConnectionExt as _, X11_EXTENSION_NAME};

                        match connection.extension_information(X11_EXTENSION_NAME)? {
                            Some(information) => {
                                let version = connection.$extension_fn($($arg),*)?.reply()?;
                                let version = (
                                    u32::from(version.major_version),
                                    u32::from(version.minor_version),
                                );
                                info!(
                                    "Loaded extension {} version {}.{}",
                                    X11_EXTENSION_NAME,
                                    version.0,
                                    version.1,
                                );
                                Some(ExtensionInfo {
                                    version,
                                    first_event: information.first_event,
                                })
                            }
                            None => {
                                warn!("{} extension not found, dependent features are disabled", X11_EXTENSION_NAME);
                                None
                            }
                        }
                    };
                )*

                Ok(Extensions {
                    $(
                        $extension,
                    )*
                })
            }
        }
    };
}

extensions! {
    damage {
        damage_query_version(1, 1),
    },

    shm {
        shm_query_version(),
    },
}
