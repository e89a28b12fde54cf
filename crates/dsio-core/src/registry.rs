//! Detector Registry
//!
//! Maps detector names to constructors. Built-in variants are registered by
//! [`DetectorRegistry::with_builtins`]; callers may add their own with
//! [`DetectorRegistry::register`] before a run. Lookups are case-insensitive.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::DetectorParams;
use crate::detector::{AnomalyDetector, GaussianTracker, LofTracker, PercentileTracker};
use crate::detector::{gaussian, lof, percentile};
use crate::error::{DsioError, Result};

/// Builds a fresh, unfitted detector instance.
pub type DetectorConstructor =
    Arc<dyn Fn(&DetectorParams) -> Result<Box<dyn AnomalyDetector>> + Send + Sync>;

pub const DEFAULT_DETECTOR: &str = gaussian::NAME;

#[derive(Clone, Default)]
pub struct DetectorRegistry {
    constructors: BTreeMap<String, DetectorConstructor>,
}

impl DetectorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the three built-in variants
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(gaussian::NAME, |p: &DetectorParams| {
            Ok(Box::new(GaussianTracker::from_params(p)?) as Box<dyn AnomalyDetector>)
        });
        registry.register(percentile::NAME, |p: &DetectorParams| {
            Ok(Box::new(PercentileTracker::from_params(p)?) as Box<dyn AnomalyDetector>)
        });
        registry.register(lof::NAME, |p: &DetectorParams| {
            Ok(Box::new(LofTracker::from_params(p)?) as Box<dyn AnomalyDetector>)
        });
        registry
    }

    /// Register (or replace) a constructor under `name`
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&DetectorParams) -> Result<Box<dyn AnomalyDetector>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_lowercase(), Arc::new(constructor));
    }

    pub fn resolve(&self, name: &str) -> Result<DetectorConstructor> {
        self.constructors
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| DsioError::DetectorNotFound(name.to_string()))
    }

    /// Resolve and construct in one step
    pub fn create(&self, name: &str, params: &DetectorParams) -> Result<Box<dyn AnomalyDetector>> {
        let constructor = self.resolve(name)?;
        constructor(params)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.constructors.keys()).finish()
    }
}
