use crate::{common::*, record::Record};

/// Bound on the resample loop. Exceeding it means the configuration rejects
/// essentially every sample.
pub const MAX_RESAMPLE_ATTEMPTS: usize = 1000;

/// The dataset that can be random accessed.
pub trait RandomAccessDataset
where
    Self: Debug + Send + Sync,
{
    /// Get number of records in the dataset.
    fn num_records(&self) -> usize;

    /// Run one pipeline pass over the record at `index`. `Ok(None)` means
    /// the pipeline rejected the sample.
    fn prepare(&self, index: usize) -> Result<Option<Record>>;

    /// Random access with transparent resampling: a rejected sample is
    /// replaced by a fresh uniformly drawn index, so a well-formed dataset
    /// never surfaces a rejection to the caller.
    fn get(&self, index: usize) -> Result<Record> {
        let num_records = self.num_records();
        ensure!(num_records > 0, "the dataset is empty");
        ensure!(
            index < num_records,
            "index {} out of range ({} records)",
            index,
            num_records
        );

        let mut rng = StdRng::from_entropy();
        let mut index = index;
        for _ in 0..MAX_RESAMPLE_ATTEMPTS {
            match self.prepare(index)? {
                Some(record) => return Ok(record),
                None => index = rng.gen_range(0..num_records),
            }
        }
        bail!(
            "the pipeline rejected every sample within {} attempts",
            MAX_RESAMPLE_ATTEMPTS
        );
    }
}
