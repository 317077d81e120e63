//! Dataset toolkit.

mod coco_;
mod dataset;
mod streaming;

pub use coco_::*;
pub use dataset::*;
pub use streaming::*;

use crate::{common::*, registry::Registry};

pub(crate) fn register_builtins(registry: &mut Registry<Box<dyn RandomAccessDataset>>) -> Result<()> {
    coco_::register(registry)?;
    Ok(())
}
