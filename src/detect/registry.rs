use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;

/// Builds a fresh detector instance for one camera worker.
pub type DetectorFactory = Arc<dyn Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

/// Registry of detector backend factories.
///
/// Backends hold per-stream state (`detect` takes `&mut self`), so the
/// registry hands out constructors rather than shared instances.
pub struct BackendRegistry {
    factories: HashMap<String, DetectorFactory>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with the backends compiled into this build.
    pub fn with_builtin(settings: &crate::config::DetectorSettings) -> Self {
        let mut registry = Self::new();
        let stub_label = settings.stub_label.clone();
        registry.register("stub", move || {
            Ok(Box::new(super::StubBackend::with_label(stub_label.clone())) as Box<dyn DetectorBackend>)
        });

        #[cfg(feature = "backend-tract")]
        {
            let model_path = settings.model_path.clone();
            let input_size = settings.input_size;
            let confidence = settings.min_confidence;
            registry.register("yolo", move || {
                let path = model_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("yolo backend requires detector.model_path"))?;
                let backend = super::YoloBackend::new(path, input_size)?.with_threshold(confidence);
                Ok(Box::new(backend) as Box<dyn DetectorBackend>)
            });
        }

        registry
    }

    /// Register a backend factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get a backend factory by name.
    pub fn get(&self, name: &str) -> Option<DetectorFactory> {
        self.factories.get(name).cloned()
    }

    /// Get the default backend factory.
    pub fn default_factory(&self) -> Option<DetectorFactory> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Factory by name, with the available names in the error.
    pub fn factory(&self, name: &str) -> Result<DetectorFactory> {
        self.get(name).ok_or_else(|| {
            let mut names = self.list();
            names.sort();
            anyhow!(
                "detector backend '{}' is not available (registered: {})",
                name,
                names.join(", ")
            )
        })
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
