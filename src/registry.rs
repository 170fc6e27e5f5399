//! Category-indexed component factories.
//!
//! Every pluggable part of the node (storage backends, loggers, services,
//! isolates) is produced through one registry, keyed by `(category, type)`.
//! The registry owns the factories; callers own the instances. It is
//! populated at startup and frozen thereafter.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::context::Context;

/// A component category: a capability set with its own type-name namespace.
///
/// Categories are a closed set fixed at design time; each one is a zero-sized
/// tag naming the abstract capability its factories produce.
pub trait Category: 'static {
    /// The capability object handed back to callers.
    type Instance: ?Sized;

    /// Category name, used in configuration sections and diagnostics.
    const NAME: &'static str;
}

/// A factory takes the live context, the caller-supplied instance name and
/// the instance's JSON args, and produces an owning handle to the category's
/// capability.
pub type Factory<C> = Box<
    dyn Fn(&Context, &str, &Value) -> crate::Result<Box<<C as Category>::Instance>> + Send + Sync,
>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("component type '{type_name}' is already registered in category '{category}'")]
    DuplicateType {
        category: &'static str,
        type_name: String,
    },

    #[error("unknown component type '{type_name}' in category '{category}'")]
    UnknownType {
        category: &'static str,
        type_name: String,
    },
}

#[derive(Default)]
pub struct Registry {
    factories: HashMap<(TypeId, String), Box<dyn Any + Send + Sync>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a factory for `(C, type_name)`.
    pub fn register<C: Category>(
        &mut self,
        type_name: &str,
        factory: Factory<C>,
    ) -> Result<(), RegistryError> {
        let key = (TypeId::of::<C>(), type_name.to_string());
        if self.factories.contains_key(&key) {
            return Err(RegistryError::DuplicateType {
                category: C::NAME,
                type_name: type_name.to_string(),
            });
        }
        self.factories.insert(key, Box::new(factory));
        Ok(())
    }

    /// Look up the factory for `(C, type_name)` and invoke it.
    pub fn get<C: Category>(
        &self,
        context: &Context,
        type_name: &str,
        name: &str,
        args: &Value,
    ) -> crate::Result<Box<C::Instance>> {
        let key = (TypeId::of::<C>(), type_name.to_string());
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| RegistryError::UnknownType {
                category: C::NAME,
                type_name: type_name.to_string(),
            })?;
        let factory = factory
            .downcast_ref::<Factory<C>>()
            .expect("registry entry keyed by the wrong category");
        factory(context, name, args)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
