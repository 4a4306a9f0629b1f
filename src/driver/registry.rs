use std::sync::Arc;

use crate::driver::Driver;
use crate::driver::dry_run::DryRunDriver;
use crate::driver::shell::ShellDriver;

/// Registry of available drivers, looked up by the config's `driver` name.
pub struct DriverRegistry {
    drivers: Vec<Arc<dyn Driver>>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Create a registry with the built-in `shell` and `dry-run` drivers.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(ShellDriver::new()));
        reg.register(Arc::new(DryRunDriver));
        reg
    }

    /// Look up a driver by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.iter().find(|d| d.name() == name).cloned()
    }

    /// List all registered driver names.
    pub fn list(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    /// Register a driver. A later registration shadows an earlier one with
    /// the same name.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.retain(|d| d.name() != driver.name());
        self.drivers.push(driver);
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
