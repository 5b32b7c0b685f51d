//! Process-wide cache of model definitions.
//!
//! Each definition is built on first use, published, and shared as an
//! `Arc` afterwards. Lookups after the first only take a read lock.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::model::{Model, ModelDefinition};

type Registry = RwLock<HashMap<TypeId, Arc<ModelDefinition>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Returns the cached definition of `T`, building it on first use.
pub fn definition<T: Model>() -> Arc<ModelDefinition> {
    let key = TypeId::of::<T>();

    if let Ok(guard) = registry().read() {
        if let Some(def) = guard.get(&key) {
            return Arc::clone(def);
        }
    }

    // Built outside the lock: definitions of referenced models may be
    // resolved while this one is being assembled.
    let built = Arc::new(T::build_definition().build());
    log::trace!("catalog: built definition for {}", built.name);

    match registry().write() {
        Ok(mut guard) => Arc::clone(guard.entry(key).or_insert(built)),
        Err(_) => built,
    }
}

/// Replaces the cached definition of `T` with a modified copy.
///
/// Test-support hook for injecting metadata after the fact. Not part of the
/// steady-state API: call [`reset`] afterwards to restore the derived definition.
#[doc(hidden)]
pub fn override_definition<T: Model>(edit: impl FnOnce(&mut ModelDefinition)) -> Arc<ModelDefinition> {
    let mut def = (*definition::<T>()).clone();
    edit(&mut def);
    let def = Arc::new(def.build());
    if let Ok(mut guard) = registry().write() {
        guard.insert(TypeId::of::<T>(), Arc::clone(&def));
    }
    def
}

/// Drops the cached definition of `T` so the next lookup rebuilds it.
#[doc(hidden)]
pub fn reset<T: Model>() {
    if let Ok(mut guard) = registry().write() {
        guard.remove(&TypeId::of::<T>());
    }
}
