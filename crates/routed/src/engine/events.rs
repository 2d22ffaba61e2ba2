use std::sync::{Arc, RwLock};

/// Events published by the engine and its subsystems.
///
/// Cache events carry the store name and the key they concern; lifecycle
/// events mark configuration transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ConfigLoaded,
    ConfigReloaded,
    CacheHit { store: String, key: String },
    CacheMiss { store: String, key: String },
    CacheWrite { store: String, key: String },
    CacheForget { store: String, key: String },
}

impl Event {
    /// Stable name used for named subscriptions.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConfigLoaded => "config.loaded",
            Self::ConfigReloaded => "config.reloaded",
            Self::CacheHit { .. } => "cache.hit",
            Self::CacheMiss { .. } => "cache.miss",
            Self::CacheWrite { .. } => "cache.write",
            Self::CacheForget { .. } => "cache.forget",
        }
    }
}

type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

/// Engine-scoped broadcast bus.
///
/// Delivery is synchronous and ordered per subscriber: each subscriber
/// observes events in emission order, but no ordering holds across
/// subscribers. Subscribers must not block.
#[derive(Default)]
pub struct EventBus {
    all: RwLock<Vec<Subscriber>>,
    named: RwLock<Vec<(String, Subscriber)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every event.
    pub fn subscribe_all(&self, subscriber: impl Fn(&Event) + Send + Sync + 'static) {
        self.all
            .write()
            .expect("event bus lock poisoned")
            .push(Arc::new(subscriber));
    }

    /// Subscribes to events with the given [`Event::name`].
    pub fn subscribe(&self, name: &str, subscriber: impl Fn(&Event) + Send + Sync + 'static) {
        self.named
            .write()
            .expect("event bus lock poisoned")
            .push((name.to_string(), Arc::new(subscriber)));
    }

    /// Emits an event to all matching subscribers.
    pub fn emit(&self, event: &Event) {
        let all = self.all.read().expect("event bus lock poisoned").clone();
        for subscriber in &all {
            subscriber(event);
        }
        let named = self.named.read().expect("event bus lock poisoned").clone();
        for (name, subscriber) in &named {
            if name == event.name() {
                subscriber(event);
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn named_subscription_filters_by_event_name() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        bus.subscribe("cache.hit", move |event| {
            sink.lock().unwrap().push(event.name());
        });

        bus.emit(&Event::CacheHit {
            store: "memory".into(),
            key: "k".into(),
        });
        bus.emit(&Event::CacheMiss {
            store: "memory".into(),
            key: "k".into(),
        });

        assert_eq!(*seen.lock().unwrap(), vec!["cache.hit"]);
    }

    #[test]
    fn subscribers_observe_emission_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        bus.subscribe_all(move |event| {
            sink.lock().unwrap().push(event.name().to_string());
        });

        bus.emit(&Event::ConfigLoaded);
        bus.emit(&Event::ConfigReloaded);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["config.loaded".to_string(), "config.reloaded".to_string()]
        );
    }
}
