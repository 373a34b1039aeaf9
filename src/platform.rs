//! Provides a tiny DI like container to expose all components of a node.
//!
//! The platform is more or less a simple map which keeps all central components (like the
//! [Config](crate::config::Config) or the [Groups](crate::registry::Groups) registry) as
//! **Arc<T>** around. Also this keeps the central **is_running** flag which is toggled to
//! *false* once [Platform::terminate](Platform::terminate) is invoked. Background tasks (like the
//! config monitor) observe this flag and stop once the node shuts down.
//!
//! Note that [Platform::require](Platform::require) is a good way of fetching a component which
//! is known to be there. However, once the shutdown is initiated, the internal map is cleared
//! (so that all Drop handlers run). Therefore code which might run after
//! [Platform::terminate](Platform::terminate) should use [Platform::find](Platform::find) and
//! gracefully handle the **None** case.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use shardcache::platform::Platform;
//! struct Transport {
//!     port: u16
//! }
//!
//! struct UnknownService;
//!
//! let platform = Platform::new();
//!
//! // Registers a new component...
//! platform.register::<Transport>(Arc::new(Transport { port: 8080 }));
//!
//! // Obtains a reference to a previously registered component...
//! assert_eq!(platform.require::<Transport>().port, 8080);
//!
//! // Looking up a component which hasn't been registered yields None...
//! assert_eq!(platform.find::<UnknownService>().is_none(), true);
//!
//! // Once terminated...
//! assert_eq!(platform.is_running(), true);
//! platform.terminate();
//!
//! // ...all components are released and the platform is no longer considered active.
//! assert_eq!(platform.find::<Transport>().is_none(), true);
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Components = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Provides a container to keep all central components in a single place.
pub struct Platform {
    components: Mutex<Components>,
    is_running: AtomicBool,
}

impl Platform {
    /// Creates a new platform instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Platform {
            components: Mutex::new(HashMap::new()),
            is_running: AtomicBool::new(true),
        })
    }

    fn components(&self) -> MutexGuard<'_, Components> {
        self.components
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new component.
    ///
    /// A component which has previously been registered for the same type is replaced.
    pub fn register<T>(&self, component: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self.components().insert(TypeId::of::<T>(), component);
    }

    /// Tries to resolve a previously registered component.
    ///
    /// Note, if one knows for certain, that a component will be present,
    /// [Platform::require](Platform::require) can be used.
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.components()
            .get(&TypeId::of::<T>())
            .and_then(|component| component.clone().downcast::<T>().ok())
    }

    /// Resolves a previously registered component.
    ///
    /// # Panics
    /// Panics if the requested component isn't available or if the platform is already shutting
    /// down.
    ///
    /// ```should_panic
    /// # use shardcache::platform::Platform;
    /// struct UnknownService;
    ///
    /// let platform = Platform::new();
    ///
    /// // This will panic...
    /// platform.require::<UnknownService>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if !self.is_running() {
            panic!(
                "A required component ({}) has been requested but the system is already shutting down!",
                std::any::type_name::<T>()
            );
        }

        match self.find::<T>() {
            Some(component) => component,
            None => panic!(
                "A required component ({}) was not available in the platform registry!",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Determines if the platform is still running or if [Platform::terminate](Platform::terminate)
    /// has already been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the platform.
    ///
    /// This will immediately release all components (so that their Drop handlers run eventually)
    /// and toggle the [is_running()](Platform::is_running) flag to **false**.
    pub fn terminate(&self) {
        self.components().clear();
        self.is_running.store(false, Ordering::Release);
    }
}
