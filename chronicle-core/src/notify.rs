//! Synchronous notification hub.
//!
//! Presentation-layer systems (dialogue generators, UI, audio cues)
//! register plain callbacks and are invoked inline, on the same logical
//! thread that mutated the engine. No queues, no threads.

use std::fmt;

use crate::aggregate::LevelChange;
use crate::graph::StanceChange;
use crate::types::{EntityId, MemoryId};

/// Everything the engine announces to the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum ChronicleEvent {
    /// An aggregate crossed into a different level band.
    LevelChanged(LevelChange),
    /// A relationship edge crossed into a different stance band.
    StanceChanged(StanceChange),
    /// A memory record was delivered to another entity's store.
    MemoryPropagated {
        /// Id of the derived record in the target's store.
        memory: MemoryId,
        /// Who passed the record on.
        source: EntityId,
        /// Who received it.
        target: EntityId,
        /// Reliability of the delivered copy.
        reliability: f32,
    },
}

/// Handle returned by [`EventHub::subscribe`]; pass back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

type Listener = Box<dyn Fn(&ChronicleEvent)>;

/// Registration list of event callbacks.
#[derive(Default)]
pub struct EventHub {
    listeners: Vec<(u64, Listener)>,
    next_handle: u64,
}

impl EventHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; it fires synchronously for every future event.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerHandle
    where
        F: Fn(&ChronicleEvent) + 'static,
    {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.listeners.push((handle, Box::new(listener)));
        ListenerHandle(handle)
    }

    /// Drop a previously registered callback. Unknown handles are ignored.
    pub fn unsubscribe(&mut self, handle: ListenerHandle) {
        self.listeners.retain(|(id, _)| *id != handle.0);
    }

    /// Invoke every listener with `event`, in registration order.
    pub fn emit(&self, event: &ChronicleEvent) {
        for (_, listener) in &self.listeners {
            listener(event);
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn listeners_fire_in_order_and_unsubscribe_works() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut hub = EventHub::new();

        let seen_a = Rc::clone(&seen);
        let handle_a = hub.subscribe(move |_| seen_a.borrow_mut().push("a"));
        let seen_b = Rc::clone(&seen);
        hub.subscribe(move |_| seen_b.borrow_mut().push("b"));

        let event = ChronicleEvent::MemoryPropagated {
            memory: MemoryId::new(),
            source: "npc_a".into(),
            target: "npc_b".into(),
            reliability: 0.7,
        };
        hub.emit(&event);
        assert_eq!(*seen.borrow(), vec!["a", "b"]);

        hub.unsubscribe(handle_a);
        hub.emit(&event);
        assert_eq!(*seen.borrow(), vec!["a", "b", "b"]);
        assert_eq!(hub.listener_count(), 1);
    }
}
