//! Normalization stages.
//!
//! Both variants apply `(x - mean) / (std + eps)` and record the statistics
//! in `norm_cfg` so the map can be inverted after inference. They differ in
//! how the statistics are computed, and in whether a present `target` reuses
//! `input`'s statistics (`shared_stats`) or is renormalized from its own.

use super::Transform;
use crate::{
    common::*,
    record::{NormCfg, Record},
    registry::Registry,
};

fn range_stats(data: &Array2<f32>) -> Result<(f32, f32)> {
    ensure!(!data.is_empty(), "cannot normalize an empty image");
    let (min, max) = data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &value| {
            (min.min(value), max.max(value))
        });
    Ok(((min + max) / 2.0, (max - min) / 2.0))
}

fn moment_stats(data: &Array2<f32>) -> Result<(f32, f32)> {
    let mean = data
        .mean()
        .ok_or_else(|| format_err!("cannot normalize an empty image"))?;
    Ok((mean, data.std(0.0)))
}

fn apply(data: &mut Array2<f32>, mean: f32, std: f32, eps: f32) {
    data.mapv_inplace(|value| (value - mean) / (std + eps));
}

/// Range-based normalization: `mean = (min + max) / 2`, `std = (max - min) / 2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizeCustomizeInit {
    #[serde(default = "default_eps")]
    pub eps: R64,
    /// Normalize `target` with `input`'s statistics instead of its own.
    #[serde(default = "default_true")]
    pub shared_stats: bool,
}

fn default_eps() -> R64 {
    r64(0.0)
}

fn default_true() -> bool {
    true
}

impl Default for NormalizeCustomizeInit {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            shared_stats: true,
        }
    }
}

impl NormalizeCustomizeInit {
    pub fn build(self) -> Result<NormalizeCustomize> {
        let Self { eps, shared_stats } = self;
        ensure!(eps >= 0.0, "eps must be non-negative");
        Ok(NormalizeCustomize {
            eps: eps.raw() as f32,
            shared_stats,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NormalizeCustomize {
    eps: f32,
    shared_stats: bool,
}

impl Transform for NormalizeCustomize {
    fn forward(&self, mut record: Record) -> Result<Option<Record>> {
        let mut input = record.take_input()?;
        let (mean, std) = range_stats(&input)?;
        apply(&mut input, mean, std, self.eps);
        record.input = Some(input);
        record.norm_cfg = Some(NormCfg {
            mean,
            std,
            eps: self.eps,
        });

        if let Some(mut target) = record.target.take() {
            let (mean, std) = if self.shared_stats {
                (mean, std)
            } else {
                range_stats(&target)?
            };
            apply(&mut target, mean, std, self.eps);
            record.target = Some(target);
        }

        Ok(Some(record))
    }
}

/// Per-sample z-score normalization from the array's own mean and std.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizeInstanceInit {
    #[serde(default = "default_eps")]
    pub eps: R64,
    /// Normalize `target` with `input`'s statistics instead of its own.
    #[serde(default)]
    pub shared_stats: bool,
}

impl Default for NormalizeInstanceInit {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            shared_stats: false,
        }
    }
}

impl NormalizeInstanceInit {
    pub fn build(self) -> Result<NormalizeInstance> {
        let Self { eps, shared_stats } = self;
        ensure!(eps >= 0.0, "eps must be non-negative");
        Ok(NormalizeInstance {
            eps: eps.raw() as f32,
            shared_stats,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NormalizeInstance {
    eps: f32,
    shared_stats: bool,
}

impl Transform for NormalizeInstance {
    fn forward(&self, mut record: Record) -> Result<Option<Record>> {
        let mut input = record.take_input()?;
        let (mean, std) = moment_stats(&input)?;
        apply(&mut input, mean, std, self.eps);
        record.input = Some(input);
        record.norm_cfg = Some(NormCfg {
            mean,
            std,
            eps: self.eps,
        });

        if let Some(mut target) = record.target.take() {
            let (mean, std) = if self.shared_stats {
                (mean, std)
            } else {
                moment_stats(&target)?
            };
            apply(&mut target, mean, std, self.eps);
            record.target = Some(target);
        }

        Ok(Some(record))
    }
}

pub(crate) fn register(registry: &mut Registry<Box<dyn Transform>>) -> Result<()> {
    registry.register("NormalizeCustomize", |options| {
        let init: NormalizeCustomizeInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()?))
    })?;
    registry.register("NormalizeInstance", |options| {
        let init: NormalizeInstanceInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()?))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ImageInfo;
    use approx::assert_abs_diff_eq;

    fn ramp_record() -> Record {
        let mut record = Record::new(
            None,
            ImageInfo {
                id: 0,
                filename: "slice.dcm".into(),
                width: 16,
                height: 16,
            },
            None,
        );
        record.input = Some(Array2::from_shape_fn((16, 16), |(y, x)| {
            (y * 16 + x) as f32
        }));
        record.ori_shape = Some((16, 16));
        record
    }

    #[test]
    fn range_normalization_round_trips() {
        let original = ramp_record().input.clone().unwrap();
        let stage = NormalizeCustomizeInit::default().build().unwrap();
        let record = stage.forward(ramp_record()).unwrap().unwrap();

        let NormCfg { mean, std, eps } = record.norm_cfg.unwrap();
        let restored = record.input.unwrap().mapv(|value| value * (std + eps) + mean);
        for (&restored, &original) in restored.iter().zip(original.iter()) {
            assert_abs_diff_eq!(restored, original, epsilon = 1e-3);
        }
    }

    #[test]
    fn range_normalization_maps_into_the_unit_interval() {
        let stage = NormalizeCustomizeInit::default().build().unwrap();
        let record = stage.forward(ramp_record()).unwrap().unwrap();
        let input = record.input.unwrap();

        let min = input.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = input.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert_abs_diff_eq!(min, -1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(max, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn instance_normalization_centers_and_scales() {
        let stage = NormalizeInstanceInit::default().build().unwrap();
        let record = stage.forward(ramp_record()).unwrap().unwrap();
        let input = record.input.unwrap();

        assert_abs_diff_eq!(input.mean().unwrap(), 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(input.std(0.0), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn eps_guards_constant_images() {
        let mut record = ramp_record();
        record.input = Some(Array2::from_elem((8, 8), 3.0));

        let stage = NormalizeInstanceInit {
            eps: r64(1e-6),
            shared_stats: false,
        }
        .build()
        .unwrap();
        let record = stage.forward(record).unwrap().unwrap();
        assert!(record.input.unwrap().iter().all(|value| value.is_finite()));
    }

    #[test]
    fn shared_stats_reuses_the_input_statistics_for_target() {
        let mut record = ramp_record();
        record.target = Some(Array2::from_elem((16, 16), 255.0));

        let stage = NormalizeCustomizeInit {
            eps: r64(0.0),
            shared_stats: true,
        }
        .build()
        .unwrap();
        let record = stage.forward(record).unwrap().unwrap();

        // input range is [0, 255]: mean 127.5, std 127.5
        let target = record.target.unwrap();
        assert_abs_diff_eq!(target[(0, 0)], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn per_array_stats_renormalize_the_target() {
        let mut record = ramp_record();
        record.target = Some(Array2::from_shape_fn((16, 16), |(y, x)| {
            (y * 16 + x) as f32 * 2.0 + 100.0
        }));

        let stage = NormalizeInstanceInit {
            eps: r64(0.0),
            shared_stats: false,
        }
        .build()
        .unwrap();
        let record = stage.forward(record).unwrap().unwrap();

        let target = record.target.unwrap();
        assert_abs_diff_eq!(target.mean().unwrap(), 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(target.std(0.0), 1.0, epsilon = 1e-4);
    }
}
