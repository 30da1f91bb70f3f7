//! Lifecycle events of a proxy pool and their observers.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, PartialEq)]
pub enum ProxyEvent {
    /// Upstream authorized, downstream acceptance opened
    Started,
    Stopped,
    Error(String),
    /// Retry policy exhausted; the proxy stays stopped until started again
    RetriesExhausted { attempts: u32 },
}

pub type ListenerId = u64;

type Handler = Arc<dyn Fn(&ProxyEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(ListenerId, Handler)>>,
}

/// Registered callbacks, called in registration order
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ProxyEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.handlers.lock().push((id, Arc::new(handler)));
        id
    }

    /// Register a handler that is unregistered when the returned guard drops
    pub fn register_guarded<F>(&self, handler: F) -> ListenerGuard
    where
        F: Fn(&ProxyEvent) + Send + Sync + 'static,
    {
        let id = self.register(handler);
        ListenerGuard { id, registry: Arc::downgrade(&self.registry) }
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        self.registry.unregister(id)
    }

    pub fn clear(&self) {
        self.registry.handlers.lock().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.registry.handlers.lock().len()
    }

    /// Handlers run outside the registry lock and may register or unregister listeners.
    pub fn emit(&self, event: &ProxyEvent) {
        let handlers: Vec<Handler> = self.registry.handlers.lock().iter().map(|(_, handler)| handler.clone()).collect();
        for handler in handlers {
            handler(event);
        }
    }
}

impl Registry {
    fn unregister(&self, id: ListenerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(listener, _)| *listener != id);
        handlers.len() != before
    }
}

#[must_use = "the listener is unregistered when the guard drops"]
pub struct ListenerGuard {
    id: ListenerId,
    registry: Weak<Registry>,
}

impl ListenerGuard {
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}
