//! Various utilities functions and types

mod geometry;
pub(crate) mod ids;

pub use self::geometry::{Rectangle, Size};

/// A native handle that is either owned by this crate or supplied by the application.
///
/// Owned handles are destroyed by the backend that created them, foreign handles are
/// never destroyed here. Destructors pattern-match on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeHandle<T> {
    /// Created, and eventually destroyed, by this crate
    Owned(T),
    /// Supplied by the application, never destroyed by this crate
    Foreign(T),
}

impl<T: Copy> NativeHandle<T> {
    /// The raw handle regardless of ownership
    pub fn get(&self) -> T {
        match *self {
            NativeHandle::Owned(handle) | NativeHandle::Foreign(handle) => handle,
        }
    }

    /// Whether the handle was supplied by the application
    pub fn is_foreign(&self) -> bool {
        matches!(self, NativeHandle::Foreign(_))
    }

    /// The handle, if this crate is responsible for destroying it
    pub fn owned(&self) -> Option<T> {
        match *self {
            NativeHandle::Owned(handle) => Some(handle),
            NativeHandle::Foreign(_) => None,
        }
    }
}
