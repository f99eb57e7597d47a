use x11rb::rust_connection::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};

/// Errors talking to the X server
#[derive(Debug, thiserror::Error)]
pub enum X11Error {
    /// The XCB side of the display could not be set up
    #[error("Failed to connect to the X server")]
    Connect(#[from] ConnectError),

    /// A request failed or its reply carried an error
    #[error("X request failed: {0}")]
    Request(#[from] ReplyOrIdError),

    /// A request issued under an error trap was rejected by the server
    #[error("The X server rejected {request} with error code {code}")]
    Trapped {
        /// What was being attempted
        request: &'static str,
        /// The X error code caught by the trap
        code: u8,
    },

    /// Xlib could not be used
    #[error(transparent)]
    Xlib(#[from] XlibError),
}

impl From<ReplyError> for X11Error {
    fn from(err: ReplyError) -> Self {
        Self::Request(err.into())
    }
}

impl From<ConnectionError> for X11Error {
    fn from(err: ConnectionError) -> Self {
        Self::Request(err.into())
    }
}

/// Failures opening the Xlib display the GL drivers need
#[derive(Debug, thiserror::Error)]
pub enum XlibError {
    /// `libX11` or `libX11-xcb` could not be loaded
    #[error("Failed to load libX11 and libX11-xcb: {0}")]
    LibrariesNotLoaded(String),

    /// `XOpenDisplay` returned no display
    #[error("XOpenDisplay failed")]
    NoConnection,

    /// `XGetXCBConnection` returned no connection
    #[error("The Xlib display has no XCB connection")]
    NoXlibXcb,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trapped_errors_name_the_request() {
        let err = X11Error::Trapped {
            request: "CreatePixmap",
            code: 9,
        };
        assert_eq!(err.to_string(), "The X server rejected CreatePixmap with error code 9");
    }
}
