//! A process-local `DriverRegistry`: a static table of driver
//! instances the binary wires up at start-up, the same way the
//! reference platform's driver manager keeps one instance per
//! configured driver id.

use std::collections::HashMap;
use std::sync::Arc;

use queue_api::{DriverRegistry, QueueDriver};

#[derive(Default)]
pub struct InMemoryDriverRegistry {
    drivers: HashMap<String, Arc<dyn QueueDriver>>,
}

impl InMemoryDriverRegistry {
    pub fn new() -> Self {
        InMemoryDriverRegistry {
            drivers: HashMap::new(),
        }
    }

    pub fn register(&mut self, driver: Arc<dyn QueueDriver>) {
        self.drivers.insert(driver.id().to_string(), driver);
    }
}

impl DriverRegistry for InMemoryDriverRegistry {
    fn get_driver(&self, id: &str) -> Option<Arc<dyn QueueDriver>> {
        self.drivers.get(id).cloned()
    }

    fn list_driver_ids(&self) -> Vec<String> {
        self.drivers.keys().cloned().collect()
    }
}
