use std::any::{Any, TypeId};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{error, info};

// ---------------------------------------------------------------------------
// ManagedService trait
// ---------------------------------------------------------------------------

/// Lifecycle-managed service trait.
///
/// Services are registered with a `ServiceRegistry`, initialized in registration
/// order, and shut down in reverse registration order. The `Any` bound enables
/// type-based lookup via `ServiceRegistry::get::<T>()`.
#[async_trait]
pub trait ManagedService: Send + Sync + Any {
    /// Returns the unique name of this service (e.g., `"pubsub"`).
    fn name(&self) -> &'static str;

    /// Prepare the service for use (provision resources, open connections).
    async fn init(&self) -> anyhow::Result<()>;

    /// Release the service's resources.
    async fn shutdown(&self) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Registry for lifecycle-managed services.
///
/// Provides two lookup mechanisms:
/// - **By name** (`get_by_name`): uses the service's `name()` string
/// - **By type** (`get::<T>`): uses `TypeId`
///
/// Services are initialized in registration order and shut down in reverse order.
pub struct ServiceRegistry {
    /// Name-based lookup: service name -> Arc<dyn ManagedService>.
    by_name: DashMap<&'static str, Arc<dyn ManagedService>>,
    /// Type-based lookup: `TypeId` -> `Arc<dyn Any + Send + Sync>`.
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    /// Registration order for deterministic init/shutdown sequencing.
    init_order: RwLock<Vec<&'static str>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_type: DashMap::new(),
            init_order: RwLock::new(Vec::new()),
        }
    }

    /// Register a service. The service becomes accessible via both `get::<T>()`
    /// and `get_by_name()`. Registration order determines init/shutdown sequencing.
    pub fn register<T: ManagedService>(&self, service: T) {
        let name = service.name();
        let arc = Arc::new(service);
        self.by_name.insert(name, arc.clone());
        self.by_type.insert(TypeId::of::<T>(), arc);
        self.init_order.write().push(name);
    }

    /// Retrieve a service by its concrete type.
    pub fn get<T: ManagedService>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    /// Retrieve a service by its name.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn ManagedService>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    /// Initialize all registered services in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first `init()` failure; later services are not initialized.
    pub async fn init_all(&self) -> anyhow::Result<()> {
        info!("start initializing app services");
        let order = self.init_order.read().clone();
        for name in &order {
            if let Some(service) = self.get_by_name(name) {
                service.init().await?;
            }
        }
        info!("finished initializing app services");
        Ok(())
    }

    /// Shut down all registered services in reverse registration order.
    ///
    /// A failing service is logged and does not stop the remaining shutdowns.
    pub async fn shutdown_all(&self) {
        info!("start closing app services");
        let order = self.init_order.read().clone();
        for name in order.iter().rev() {
            if let Some(service) = self.get_by_name(name) {
                if let Err(err) = service.shutdown().await {
                    error!(service = *name, error = %err, "failed to gracefully close service {name}");
                }
            }
        }
        info!("finished closing app services");
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
