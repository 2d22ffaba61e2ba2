use ahash::HashMap as AHashMap;
use std::any::{Any, TypeId};
use std::sync::{Arc, RwLock};

/// A minimal type-keyed service container.
///
/// Services are registered once (usually at engine build time) and resolved
/// by type from anywhere a [`crate::context::Context`] is available. Values
/// are stored behind `Arc` so resolution is cheap and shared.
#[derive(Default)]
pub struct Container {
    items: RwLock<AHashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when a `T` instance has been registered.
    pub fn has<T: Send + Sync + 'static>(&self) -> bool {
        self.items
            .read()
            .expect("container lock poisoned")
            .contains_key(&TypeId::of::<T>())
    }

    /// Registers an instance of `T`, replacing any previous one.
    pub fn instance<T: Send + Sync + 'static>(&self, value: T) {
        self.items
            .write()
            .expect("container lock poisoned")
            .insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Registers an already-shared instance of `T`.
    pub fn instance_arc<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        self.items
            .write()
            .expect("container lock poisoned")
            .insert(TypeId::of::<T>(), value);
    }

    /// Resolves the registered `T` instance, if any.
    pub fn make<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.items
            .read()
            .expect("container lock poisoned")
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.items.read().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("Container").field("services", &len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Greeter(&'static str);

    #[test]
    fn registered_instances_resolve_by_type() {
        let container = Container::new();
        assert!(!container.has::<Greeter>());

        container.instance(Greeter("hello"));
        assert!(container.has::<Greeter>());
        assert_eq!(container.make::<Greeter>().unwrap().0, "hello");
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let container = Container::new();
        container.instance(Greeter("first"));
        container.instance(Greeter("second"));
        assert_eq!(container.make::<Greeter>().unwrap().0, "second");
    }

    #[test]
    fn missing_type_resolves_to_none() {
        let container = Container::new();
        assert!(container.make::<Greeter>().is_none());
    }
}
