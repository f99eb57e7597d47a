//! Deferred onscreen notifications
//!
//! Backends never call application callbacks directly. Native events (and swaps that complete
//! synchronously) only queue an [`OnscreenEvent`]; the queue is drained and callbacks are invoked
//! when the application dispatches the renderer's event source.

use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::utils::{ids::id_type, Rectangle, Size};

use super::onscreen::OnscreenId;

id_type!(
    /// Identifies a registered onscreen callback
    NotifyId
);

/// A notification about an onscreen surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnscreenEvent {
    /// A swap of the onscreen finished
    SwapComplete {
        /// The onscreen
        onscreen: OnscreenId,
    },
    /// The onscreen changed size
    Resized {
        /// The onscreen
        onscreen: OnscreenId,
        /// Its new size
        size: Size,
    },
    /// Part of the onscreen has to be redrawn
    Dirty {
        /// The onscreen
        onscreen: OnscreenId,
        /// The area to redraw
        area: Rectangle,
    },
}

impl OnscreenEvent {
    /// The onscreen the event is about
    pub fn onscreen(&self) -> OnscreenId {
        match *self {
            OnscreenEvent::SwapComplete { onscreen }
            | OnscreenEvent::Resized { onscreen, .. }
            | OnscreenEvent::Dirty { onscreen, .. } => onscreen,
        }
    }

    fn kind(&self) -> EventKind {
        match self {
            OnscreenEvent::SwapComplete { .. } => EventKind::SwapComplete,
            OnscreenEvent::Resized { .. } => EventKind::Resized,
            OnscreenEvent::Dirty { .. } => EventKind::Dirty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    SwapComplete,
    Resized,
    Dirty,
}

/// Events waiting for the next dispatch
#[derive(Debug, Default)]
pub struct PendingNotifications {
    events: Vec<OnscreenEvent>,
}

impl PendingNotifications {
    /// Queue an event.
    ///
    /// Resizes of one onscreen coalesce, only the latest size is reported.
    pub fn push(&mut self, event: OnscreenEvent) {
        if let OnscreenEvent::Resized { onscreen, size } = event {
            let pending = self.events.iter_mut().find_map(|queued| match queued {
                OnscreenEvent::Resized {
                    onscreen: queued_onscreen,
                    size,
                } if *queued_onscreen == onscreen => Some(size),
                _ => None,
            });
            if let Some(pending) = pending {
                *pending = size;
                return;
            }
        }
        self.events.push(event);
    }

    /// Whether anything is queued
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take every queued event
    pub fn take(&mut self) -> Vec<OnscreenEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drop everything queued for `onscreen`
    pub fn forget(&mut self, onscreen: OnscreenId) {
        self.events.retain(|event| event.onscreen() != onscreen);
    }
}

type Callback = Rc<RefCell<dyn FnMut(&OnscreenEvent)>>;

struct Entry {
    onscreen: OnscreenId,
    kind: EventKind,
    callback: Callback,
}

/// Registered onscreen callbacks
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    entries: IndexMap<NotifyId, Entry>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(id, entry)| (id, (entry.onscreen, entry.kind))))
            .finish()
    }
}

impl CallbackRegistry {
    pub fn add(
        &mut self,
        onscreen: OnscreenId,
        kind: EventKind,
        callback: impl FnMut(&OnscreenEvent) + 'static,
    ) -> NotifyId {
        let id = NotifyId::next();
        self.entries.insert(
            id,
            Entry {
                onscreen,
                kind,
                callback: Rc::new(RefCell::new(callback)),
            },
        );
        id
    }

    pub fn remove(&mut self, onscreen: OnscreenId, kind: EventKind, id: NotifyId) -> bool {
        match self.entries.get(&id) {
            Some(entry) if entry.onscreen == onscreen && entry.kind == kind => {
                self.entries.shift_remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: NotifyId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn remove_onscreen(&mut self, onscreen: OnscreenId) {
        self.entries.retain(|_, entry| entry.onscreen != onscreen);
    }

    /// Callbacks interested in `event`, in registration order
    pub fn matching(&self, event: &OnscreenEvent) -> Vec<(NotifyId, Callback)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.onscreen == event.onscreen() && entry.kind == event.kind())
            .map(|(id, entry)| (*id, entry.callback.clone()))
            .collect()
    }
}
