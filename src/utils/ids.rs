/// Declares an opaque, copyable id type backed by a process-wide counter.
///
/// Ids handed out by one type never repeat, so a stale id can never alias a newer object.
macro_rules! id_type {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub(crate) fn next() -> Self {
                use std::sync::atomic::{AtomicU64, Ordering};
                static COUNTER: AtomicU64 = AtomicU64::new(1);

                let id = COUNTER.fetch_add(1, Ordering::Relaxed);
                if id == u64::MAX {
                    panic!("Out of ids");
                }
                $name(id)
            }

            /// Raw numeric value of this id
            pub fn as_raw(&self) -> u64 {
                self.0
            }
        }
    };
}

pub(crate) use id_type;
