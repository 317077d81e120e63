//! Ordered parallel batch streaming over a random-access dataset.

use super::RandomAccessDataset;
use crate::{
    collate::{collate, Batch, Sample},
    common::*,
};
use futures::stream::{self, Stream, StreamExt as _};
use par_stream::prelude::*;

/// One collated batch together with its position in the stream.
#[derive(Debug)]
pub struct BatchRecord {
    pub epoch: usize,
    pub step: usize,
    pub data: Batch,
}

/// Batch stream options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleStreamInit {
    pub batch_size: NonZeroUsize,
    /// Parallel preparation workers. Defaults to the CPU count.
    #[serde(default)]
    pub num_workers: Option<NonZeroUsize>,
    /// Number of passes over the dataset. `None` streams forever.
    #[serde(default)]
    pub epochs: Option<usize>,
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
}

fn default_shuffle() -> bool {
    true
}

impl SampleStreamInit {
    pub fn build(self, dataset: Arc<dyn RandomAccessDataset>) -> Result<SampleStream> {
        ensure!(dataset.num_records() > 0, "the dataset is empty");
        Ok(SampleStream {
            config: self,
            dataset,
        })
    }
}

#[derive(Debug)]
pub struct SampleStream {
    config: SampleStreamInit,
    dataset: Arc<dyn RandomAccessDataset>,
}

impl SampleStream {
    /// Stream collated batches. Samples are prepared in parallel but batches
    /// follow dispatch order, so a fixed dataset and seed layout reproduces
    /// the same batch boundaries.
    pub fn stream(&self) -> Pin<Box<dyn Stream<Item = Result<BatchRecord>> + Send>> {
        let SampleStreamInit {
            batch_size,
            num_workers,
            epochs,
            shuffle,
        } = self.config.clone();
        let batch_size = batch_size.get();
        let num_workers = num_workers
            .map(NonZeroUsize::get)
            .unwrap_or_else(num_cpus::get);
        let num_records = self.dataset.num_records();
        let dataset = self.dataset.clone();

        // enumerate (epoch, index) pairs, reshuffled per epoch
        let epoch_stream = match epochs {
            Some(epochs) => stream::iter(0..epochs).boxed(),
            None => stream::iter(0..).boxed(),
        };
        let stream = epoch_stream.flat_map(move |epoch| {
            let mut indexes = (0..num_records).collect_vec();
            if shuffle {
                // every worker pass draws from its own entropy; epochs must
                // not repeat each other's order
                indexes.shuffle(&mut StdRng::from_entropy());
            }
            stream::iter(indexes.into_iter().map(move |index| (epoch, index)))
        });

        // prepare samples in parallel, preserving dispatch order
        let stream = stream.par_then(num_workers, move |(epoch, index)| {
            let dataset = dataset.clone();
            async move {
                let record =
                    async_std::task::spawn_blocking(move || dataset.get(index)).await?;
                let sample = record
                    .collected
                    .ok_or_else(|| format_err!("the pipeline does not end with a Collect stage"))?;
                Ok((epoch, sample))
            }
        });

        // group into batches and collate
        let stream = stream.chunks(batch_size).enumerate().map(
            |(step, chunk): (usize, Vec<Result<(usize, Sample)>>)| -> Result<BatchRecord> {
                let chunk: Vec<(usize, Sample)> = chunk.into_iter().try_collect()?;
                let epoch = chunk[0].0;
                let samples: Vec<Sample> =
                    chunk.into_iter().map(|(_, sample)| sample).collect();
                let data = collate(&samples)?;
                Ok(BatchRecord { epoch, step, data })
            },
        );

        Box::pin(stream)
    }
}
