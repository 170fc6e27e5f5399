//! The app catalog: engines in memory, records in storage, reconciliation
//! between the two.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::context::Context;
use crate::engine::{Engine, EngineFactory};
use crate::error::ConfigError;
use crate::storage::Storage;

/// Collection holding one record per declared app.
const APPS: &str = "apps";

/// Exclusively owns every running engine; the engine map is the single
/// source of truth for "is this app running".
pub struct Catalog {
    storage: Box<dyn Storage>,
    factory: Box<dyn EngineFactory>,
    engines: BTreeMap<String, Box<dyn Engine>>,
}

impl Catalog {
    pub fn new(storage: Box<dyn Storage>, factory: Box<dyn EngineFactory>) -> Self {
        Self {
            storage,
            factory,
            engines: BTreeMap::new(),
        }
    }

    /// Start an engine for `name` and, unless recovering from storage,
    /// persist its manifest. Returns the new engine's info.
    pub fn create_engine(
        &mut self,
        context: &Context,
        name: &str,
        manifest: &Value,
        recovering: bool,
    ) -> crate::Result<Value> {
        if self.engines.contains_key(name) {
            return Err(ConfigError::AlreadyActive.into());
        }

        let mut engine = self.factory.create(context, name, manifest)?;
        engine.start()?;

        if !recovering {
            if let Err(err) = self.storage.put(APPS, name, manifest) {
                tracing::error!(app = name, "unable to start the app: {err}");
                // No record was written, so the engine must not survive
                // either: stop it before it is dropped.
                if let Err(stop_err) = engine.stop() {
                    tracing::warn!(app = name, "rollback stop failed: {stop_err}");
                }
                return Err(err.into());
            }
        }

        let info = engine.info();
        self.engines.insert(name.to_string(), engine);
        Ok(info)
    }

    /// Remove the app's record, then stop and discard its engine.
    ///
    /// The record goes first so that a crash in between never resurrects a
    /// stopped engine on reload.
    pub fn delete_engine(&mut self, name: &str) -> crate::Result<Value> {
        if !self.engines.contains_key(name) {
            return Err(ConfigError::NotActive.into());
        }

        if let Err(err) = self.storage.remove(APPS, name) {
            tracing::error!(app = name, "unable to stop the app: {err}");
            return Err(err.into());
        }

        let mut engine = self
            .engines
            .remove(name)
            .expect("engine presence checked above");
        if let Err(err) = engine.stop() {
            // The record is gone; the stop is best-effort.
            tracing::warn!(app = name, "engine stop failed: {err}");
        }
        Ok(engine.info())
    }

    /// Converge the engine map onto the set of records in storage.
    ///
    /// Apps present in both are left untouched; manifests are not reapplied.
    pub fn recover(&mut self, context: &Context) -> crate::Result<()> {
        let declared = self.storage.all(APPS)?;

        let declared_names: BTreeSet<String> = declared.keys().cloned().collect();
        let active: BTreeSet<String> = self.engines.keys().cloned().collect();

        for name in declared_names.symmetric_difference(&active) {
            if self.engines.contains_key(name) {
                tracing::warn!(app = %name, "the app is no longer available");
                self.delete_engine(name)?;
            } else {
                self.create_engine(context, name, &declared[name], true)?;
            }
        }
        Ok(())
    }

    /// Stop and discard every engine.
    pub fn stop_all(&mut self) {
        for (name, engine) in self.engines.iter_mut() {
            if let Err(err) = engine.stop() {
                tracing::warn!(app = %name, "engine stop failed: {err}");
            }
        }
        self.engines.clear();
    }

    /// Per-app info snapshots for the control plane.
    pub fn info_map(&self) -> Map<String, Value> {
        self.engines
            .iter()
            .map(|(name, engine)| (name.clone(), engine.info()))
            .collect()
    }

    pub fn active_names(&self) -> Vec<&str> {
        self.engines.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
