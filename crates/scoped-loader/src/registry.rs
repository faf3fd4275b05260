//! Per-scope collection of loaders, one per batch function type.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::batch_fn::BatchFn;
use crate::config::LoaderConfig;
use crate::error::RegistryError;
use crate::loader::Loader;
use crate::scope::{Cancellation, RequestScope};

type LoaderFactory = Box<dyn FnOnce(&LoaderConfig, Cancellation) -> Box<dyn Any + Send + Sync> + Send>;

struct Registration {
    type_id: TypeId,
    entity: &'static str,
    config: Option<LoaderConfig>,
    factory: LoaderFactory,
}

/// The loaders of one unit of work.
///
/// A registry is built for exactly one [`RequestScope`] and discarded with
/// it; loaders are never pooled or handed to a later unit of work, so no
/// memoized entry can leak from one scope into another.
pub struct LoaderRegistry {
    scope_id: Uuid,
    loaders: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl LoaderRegistry {
    pub fn builder(config: LoaderConfig) -> RegistryBuilder {
        RegistryBuilder {
            config,
            registrations: vec![],
        }
    }

    /// The scope this registry was built for.
    pub fn scope_id(&self) -> Uuid {
        self.scope_id
    }

    /// The loader for batch function `F`, if one was registered.
    pub fn get<F: BatchFn>(&self) -> Option<&Loader<F>> {
        self.loaders
            .get(&TypeId::of::<F>())
            .and_then(|loader| loader.downcast_ref::<Loader<F>>())
    }

    /// Like [`get`](Self::get), but reports a missing loader as a wiring error.
    pub fn loader<F: BatchFn>(&self) -> Result<&Loader<F>, RegistryError> {
        self.get::<F>().ok_or(RegistryError::NotConfigured {
            entity: type_name::<F>(),
        })
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

/// Collects batch functions and turns them into a [`LoaderRegistry`].
pub struct RegistryBuilder {
    config: LoaderConfig,
    registrations: Vec<Registration>,
}

impl RegistryBuilder {
    /// Adds a loader for `batch_fn` using the builder's config.
    ///
    /// Registering a second batch function of the same type replaces the first.
    pub fn register<F: BatchFn>(self, batch_fn: F) -> Self {
        self.push(batch_fn, None)
    }

    /// Adds a loader for `batch_fn` with its own config.
    pub fn register_with_config<F: BatchFn>(self, batch_fn: F, config: LoaderConfig) -> Self {
        self.push(batch_fn, Some(config))
    }

    fn push<F: BatchFn>(mut self, batch_fn: F, config: Option<LoaderConfig>) -> Self {
        let factory: LoaderFactory = Box::new(
            move |config: &LoaderConfig, cancellation: Cancellation| -> Box<dyn Any + Send + Sync> {
                Box::new(Loader::with_cancellation(batch_fn, config.clone(), cancellation))
            },
        );
        self.registrations.push(Registration {
            type_id: TypeId::of::<F>(),
            entity: type_name::<F>(),
            config,
            factory,
        });
        self
    }

    /// Creates one loader per registered batch function, all bound to `scope`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self, scope: &RequestScope) -> LoaderRegistry {
        let mut loaders = HashMap::with_capacity(self.registrations.len());
        for registration in self.registrations {
            let config = registration.config.as_ref().unwrap_or(&self.config);
            let loader = (registration.factory)(config, scope.cancellation());
            if loaders.insert(registration.type_id, loader).is_some() {
                debug!(
                    scope_id = %scope.id(),
                    entity = registration.entity,
                    "loader registered twice, keeping the last one"
                );
            }
        }

        LoaderRegistry {
            scope_id: scope.id(),
            loaders,
        }
    }
}
