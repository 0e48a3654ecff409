use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::event::MotionEvent;

/// Outcome of a single listener invocation.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Listener = Box<dyn Fn(&MotionEvent) -> ListenerResult + Send + Sync>;

/// Per-channel registry of motion listeners.
///
/// Dispatch walks a channel's listeners in registration order; a failing
/// listener is logged and never blocks delivery to the remaining ones.
#[derive(Default)]
pub struct MotionListenerRegistry {
    listeners: Mutex<HashMap<u32, Vec<Listener>>>,
}

impl MotionListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for a one-based channel id.
    pub fn on_motion<F>(&self, channel: u32, listener: F)
    where
        F: Fn(&MotionEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .entry(channel)
            .or_default()
            .push(Box::new(listener));
    }

    /// Deliver an event to every listener registered for its channel.
    ///
    /// Returns the number of listeners notified. Non-motion events are
    /// dropped here so registrants only ever see the relevant kinds.
    pub fn dispatch(&self, event: &MotionEvent) -> usize {
        if !event.kind.is_motion() {
            return 0;
        }

        let listeners = self.listeners.lock();
        let Some(channel_listeners) = listeners.get(&event.channel) else {
            debug!(channel = event.channel, "no listeners for channel");
            return 0;
        };

        let mut notified = 0;
        for listener in channel_listeners {
            match listener(event) {
                Ok(()) => notified += 1,
                Err(e) => {
                    warn!(channel = event.channel, error = %e, "motion listener failed");
                }
            }
        }
        notified
    }

    pub fn listener_count(&self, channel: u32) -> usize {
        self.listeners
            .lock()
            .get(&channel)
            .map_or(0, |l| l.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::event::EventKind;

    fn motion(channel: u32) -> MotionEvent {
        MotionEvent {
            channel,
            kind: EventKind::VideoMotion,
            active: true,
        }
    }

    #[test]
    fn test_dispatch_notifies_channel_listeners_in_order() {
        let registry = MotionListenerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let order = order.clone();
            registry.on_motion(1, move |_| {
                order.lock().push(tag);
                Ok(())
            });
        }

        assert_eq!(registry.dispatch(&motion(1)), 2);
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let registry = MotionListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        registry.on_motion(3, |_| Err("listener exploded".into()));
        let hits_clone = hits.clone();
        registry.on_motion(3, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(registry.dispatch(&motion(3)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_non_motion_event_is_not_dispatched() {
        let registry = MotionListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        registry.on_motion(1, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let event = MotionEvent {
            channel: 1,
            kind: EventKind::Other("VideoLoss".to_string()),
            active: true,
        };
        assert_eq!(registry.dispatch(&event), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispatch_to_unknown_channel_is_noop() {
        let registry = MotionListenerRegistry::new();
        assert_eq!(registry.dispatch(&motion(9)), 0);
    }
}
