//! String-tagged constructor registries for declarative pipeline assembly.

use crate::{common::*, config::TypedConfig, dataset::RandomAccessDataset, pipeline::Transform};
use serde_json::Value;

/// A constructor bound to a registered type tag. Receives the stage kwargs
/// as a JSON object.
pub type Factory<T> = fn(Value) -> Result<T>;

/// A write-once mapping from type tag to constructor. The process-wide
/// instances are populated during initialization and read-only afterwards.
#[derive(Debug)]
pub struct Registry<T> {
    name: &'static str,
    entries: IndexMap<String, Factory<T>>,
}

impl<T> Registry<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: IndexMap::new(),
        }
    }

    /// Bind a tag to a factory. Re-registering the same factory under the
    /// same tag is a no-op, so repeated initialization passes are harmless;
    /// binding a different factory to a taken tag fails.
    pub fn register(&mut self, tag: impl Into<String>, factory: Factory<T>) -> Result<()> {
        let tag = tag.into();
        match self.entries.get(&tag) {
            Some(existing) if *existing == factory => Ok(()),
            Some(_) => bail!("{} type '{}' is already registered", self.name, tag),
            None => {
                self.entries.insert(tag, factory);
                Ok(())
            }
        }
    }

    /// Construct the value described by a `{type, ...kwargs}` mapping.
    pub fn build(&self, config: &TypedConfig) -> Result<T> {
        let factory = self
            .entries
            .get(&config.ty)
            .ok_or_else(|| format_err!("unknown {} type '{}'", self.name, config.ty))?;
        factory(Value::Object(config.options.clone()))
            .with_context(|| format!("failed to build {} type '{}'", self.name, config.ty))
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|tag| tag.as_str())
    }
}

/// The process-wide pipeline stage registry.
pub static PIPELINES: Lazy<Registry<Box<dyn Transform>>> = Lazy::new(|| {
    let mut registry = Registry::new("pipeline");
    crate::pipeline::register_builtins(&mut registry)
        .expect("builtin pipeline stages must register cleanly");
    registry
});

/// The process-wide dataset registry.
pub static DATASETS: Lazy<Registry<Box<dyn RandomAccessDataset>>> = Lazy::new(|| {
    let mut registry = Registry::new("dataset");
    crate::dataset::register_builtins(&mut registry)
        .expect("builtin datasets must register cleanly");
    registry
});
