use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::locator::ObjectLocator;

pub type SharedLocator = Arc<dyn ObjectLocator>;

/// Registry of named object locators. Entries are shared without locking.
pub struct LocatorRegistry {
    locators: HashMap<String, SharedLocator>,
    default_name: Option<String>,
}

impl LocatorRegistry {
    pub fn new() -> Self {
        Self {
            locators: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a locator. The first registered locator becomes the default.
    pub fn register<L: ObjectLocator + 'static>(&mut self, locator: L) {
        let name = locator.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.locators.insert(name, Arc::new(locator));
    }

    /// Set default locator by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.locators.contains_key(name) {
            return Err(anyhow!("locator '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SharedLocator> {
        self.locators.get(name).cloned()
    }

    pub fn default_locator(&self) -> Option<SharedLocator> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// Registered locator names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.locators.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a locator by name, or the default when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<SharedLocator> {
        match name {
            Some(name) => self
                .get(name)
                .ok_or_else(|| anyhow!("locator '{}' not registered", name)),
            None => self
                .default_locator()
                .ok_or_else(|| anyhow!("no object locator registered")),
        }
    }

    /// Warm up every registered locator.
    pub fn warm_up_all(&self) -> Result<()> {
        for (name, locator) in &self.locators {
            locator
                .warm_up()
                .map_err(|e| anyhow!("locator '{}' warm-up failed: {:#}", name, e))?;
        }
        Ok(())
    }
}

impl Default for LocatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FixedLocator;

    #[test]
    fn first_registered_is_default() {
        let mut registry = LocatorRegistry::new();
        registry.register(FixedLocator::new(vec![]));
        assert_eq!(registry.default_name(), Some("fixed"));
        assert!(registry.resolve(None).is_ok());
        assert!(registry.resolve(Some("fixed")).is_ok());
        assert!(registry.resolve(Some("missing")).is_err());
        assert!(registry.set_default("missing").is_err());
    }

    #[test]
    fn empty_registry_has_no_default() {
        let registry = LocatorRegistry::default();
        assert!(registry.resolve(None).is_err());
        assert!(registry.list().is_empty());
    }
}
