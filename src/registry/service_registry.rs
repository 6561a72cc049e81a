use crate::args::ServiceMetaData;
use crate::config::EngineConfig;
use crate::error::{JacsError, Result};
use crate::processor::DynServiceProcessor;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Builds a processor instance for one dispatch
pub type ProcessorFactory =
    Arc<dyn Fn(&EngineConfig) -> Arc<dyn DynServiceProcessor> + Send + Sync>;

/// Registry entry: argument schema plus processor factory
#[derive(Clone)]
pub struct ServiceDescriptor {
    metadata: ServiceMetaData,
    factory: ProcessorFactory,
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl ServiceDescriptor {
    pub fn new<F>(metadata: ServiceMetaData, factory: F) -> Self
    where
        F: Fn(&EngineConfig) -> Arc<dyn DynServiceProcessor> + Send + Sync + 'static,
    {
        Self {
            metadata,
            factory: Arc::new(factory),
        }
    }

    /// Descriptor for a processor that needs no per-dispatch construction
    pub fn from_processor(processor: Arc<dyn DynServiceProcessor>) -> Self {
        let metadata = processor.service_metadata();
        Self::new(metadata, move |_| processor.clone())
    }

    pub fn name(&self) -> &str {
        &self.metadata.service_name
    }

    pub fn metadata(&self) -> &ServiceMetaData {
        &self.metadata
    }

    pub fn create_processor(&self, config: &EngineConfig) -> Arc<dyn DynServiceProcessor> {
        (self.factory)(config)
    }
}

/// Name -> descriptor lookup
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service; names must be unique
    pub fn register(&mut self, descriptor: ServiceDescriptor) -> Result<()> {
        let name = descriptor.name().to_string();
        if self.services.contains_key(&name) {
            return Err(JacsError::Configuration(format!(
                "service {name} is already registered"
            )));
        }
        debug!(service_name = %name, "Registered service");
        self.services.insert(name, descriptor);
        Ok(())
    }

    pub fn with_service(mut self, descriptor: ServiceDescriptor) -> Result<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&ServiceDescriptor> {
        self.services
            .get(name)
            .ok_or_else(|| JacsError::UnknownService(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn metadata(&self, name: &str) -> Result<ServiceMetaData> {
        self.get(name).map(|d| d.metadata().clone())
    }

    /// Metadata of every service, sorted by name
    pub fn list_metadata(&self) -> Vec<ServiceMetaData> {
        let mut all: Vec<ServiceMetaData> =
            self.services.values().map(|d| d.metadata().clone()).collect();
        all.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        all
    }

    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
