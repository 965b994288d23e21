//! Synchronous in-process event bus.
//!
//! Handlers run on the emitting task in subscription order. A handler that
//! returns an error or panics is logged and skipped; delivery to the remaining
//! handlers continues and the emitter never sees the failure.

use std::{
    collections::HashMap,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::{
    core::{directory::ServerStatus, invoker::ToolCallResult},
    error::RegistryError,
    inventory::ToolDefinition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ToolRegistered,
    ToolCalled,
    ServerStatusChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::ToolRegistered,
        EventKind::ToolCalled,
        EventKind::ServerStatusChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolRegistered => "tool_registered",
            Self::ToolCalled => "tool_called",
            Self::ServerStatusChanged => "server_status_changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RegistryError::Config(format!("unknown event kind '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    ToolRegistered(ToolDefinition),
    ToolCalled(ToolCallResult),
    ServerStatusChanged {
        server: String,
        previous: ServerStatus,
        status: ServerStatus,
    },
}

impl RegistryEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ToolRegistered(_) => EventKind::ToolRegistered,
            Self::ToolCalled(_) => EventKind::ToolCalled,
            Self::ServerStatusChanged { .. } => EventKind::ServerStatusChanged,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&RegistryEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type HandlerList = Vec<(SubscriptionId, EventHandler)>;

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, HandlerList>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&RegistryEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns false if the subscription was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver `event` to every handler subscribed at the time of the call.
    ///
    /// Returns the number of handlers that completed without error.
    pub fn emit(&self, event: &RegistryEvent) -> usize {
        let kind = event.kind();
        // Handlers may subscribe or unsubscribe while running; they act on the
        // next emission, not this one.
        let snapshot: Vec<EventHandler> = match self.handlers.read().get(&kind) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("Event handler for '{}' failed: {:#}", kind, e),
                Err(panic) => error!(
                    "Event handler for '{}' panicked: {}",
                    kind,
                    panic_message(panic.as_ref())
                ),
            }
        }
        delivered
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn status_event(server: &str) -> RegistryEvent {
        RegistryEvent::ServerStatusChanged {
            server: server.to_string(),
            previous: ServerStatus::Unknown,
            status: ServerStatus::Healthy,
        }
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::ToolCalled.to_string(), "tool_called");
        assert_eq!(
            "server_status_changed".parse::<EventKind>().unwrap(),
            EventKind::ServerStatusChanged
        );
        assert!("tool_removed".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_emit_in_subscription_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = Arc::clone(&seen);
            bus.subscribe(EventKind::ServerStatusChanged, move |_| {
                seen.lock().unwrap().push(i);
                Ok(())
            });
        }

        assert_eq!(bus.emit(&status_event("alpha")), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_only_matching_kind_is_delivered() {
        let bus = EventBus::new();
        bus.subscribe(EventKind::ToolCalled, |_| Ok(()));
        assert_eq!(bus.emit(&status_event("alpha")), 0);
    }

    #[test]
    fn test_failing_handlers_do_not_stop_delivery() {
        let bus = EventBus::new();
        let reached = Arc::new(Mutex::new(false));

        bus.subscribe(EventKind::ServerStatusChanged, |_| {
            anyhow::bail!("subscriber failure")
        });
        bus.subscribe(EventKind::ServerStatusChanged, |_| -> anyhow::Result<()> {
            panic!("subscriber panic")
        });
        let flag = Arc::clone(&reached);
        bus.subscribe(EventKind::ServerStatusChanged, move |_| {
            *flag.lock().unwrap() = true;
            Ok(())
        });

        assert_eq!(bus.emit(&status_event("alpha")), 1);
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe(EventKind::ToolCalled, |_| Ok(()));
        assert_eq!(bus.handler_count(EventKind::ToolCalled), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.handler_count(EventKind::ToolCalled), 0);
    }

    #[test]
    fn test_subscribe_during_emit_applies_next_time() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(Mutex::new(0));

        let inner_bus = Arc::clone(&bus);
        let inner_calls = Arc::clone(&calls);
        bus.subscribe(EventKind::ServerStatusChanged, move |_| {
            let counter = Arc::clone(&inner_calls);
            inner_bus.subscribe(EventKind::ServerStatusChanged, move |_| {
                *counter.lock().unwrap() += 1;
                Ok(())
            });
            Ok(())
        });

        // The handler added during this pass does not run in it.
        assert_eq!(bus.emit(&status_event("alpha")), 1);
        assert_eq!(*calls.lock().unwrap(), 0);

        assert_eq!(bus.emit(&status_event("alpha")), 2);
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
