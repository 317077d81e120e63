//! Pipeline stage building blocks.

pub mod formatting;
pub mod gen_target;
pub mod loading;
pub mod mask;
pub mod normalize;
pub mod transforms;

pub use formatting::*;
pub use gen_target::*;
pub use loading::*;
pub use normalize::*;
pub use transforms::*;

use crate::{common::*, config::TypedConfig, record::Record, registry::Registry};

/// A pipeline stage: maps a record to a new record, or rejects the sample.
///
/// `Ok(None)` is a rejection, recovered by the dataset's resample loop;
/// `Err` is fatal for the sample.
pub trait Transform
where
    Self: Debug + Send + Sync,
{
    fn forward(&self, record: Record) -> Result<Option<Record>>;
}

/// Applies stages in order, short-circuiting on the first rejection. A pure
/// sequencer: no validation, no retries.
#[derive(Debug)]
pub struct Compose {
    stages: Vec<Box<dyn Transform>>,
}

impl Compose {
    pub fn new(stages: Vec<Box<dyn Transform>>) -> Self {
        Self { stages }
    }

    /// Resolve a declarative stage list through the pipeline registry.
    pub fn from_config(configs: &[TypedConfig]) -> Result<Self> {
        let stages: Vec<_> = configs
            .iter()
            .map(|config| crate::registry::PIPELINES.build(config))
            .try_collect()?;
        Ok(Self::new(stages))
    }

    pub fn forward(&self, record: Record) -> Result<Option<Record>> {
        let mut record = record;
        for stage in &self.stages {
            record = match stage.forward(record)? {
                Some(record) => record,
                None => return Ok(None),
            };
        }
        Ok(Some(record))
    }
}

pub(crate) fn register_builtins(registry: &mut Registry<Box<dyn Transform>>) -> Result<()> {
    loading::register(registry)?;
    normalize::register(registry)?;
    transforms::register(registry)?;
    gen_target::register(registry)?;
    formatting::register(registry)?;
    Ok(())
}
