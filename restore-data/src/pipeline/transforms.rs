//! Geometric transform stages.

use super::Transform;
use crate::{
    common::*,
    record::{crop_boxes_and_masks, Masks, Record},
    registry::Registry,
};

/// Copy `data` into the top-left corner of a `shape`-sized buffer filled
/// with `fill_value`.
pub fn pad2d<T: Copy>(data: &Array2<T>, shape: (usize, usize), fill_value: T) -> Array2<T> {
    let mut padded = Array2::from_elem(shape, fill_value);
    padded
        .slice_mut(s![..data.nrows(), ..data.ncols()])
        .assign(data);
    padded
}

/// What to do when a crop leaves no valid box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropPolicy {
    /// Reject the sample outright.
    Strict,
    /// Re-attempt with fresh offsets before rejecting.
    Retry,
}

impl Default for CropPolicy {
    fn default() -> Self {
        Self::Strict
    }
}

/// Crops a random square window out of the working image, keeping boxes and
/// masks consistent with the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RandomCropInit {
    pub crop_size: usize,
    #[serde(default)]
    pub policy: CropPolicy,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_max_attempts() -> usize {
    30
}

impl RandomCropInit {
    pub fn build(self) -> Result<RandomCrop> {
        let Self {
            crop_size,
            policy,
            max_attempts,
        } = self;
        ensure!(crop_size > 0, "crop_size must be positive");
        ensure!(max_attempts > 0, "max_attempts must be positive");
        Ok(RandomCrop {
            crop_size,
            policy,
            max_attempts,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RandomCrop {
    crop_size: usize,
    policy: CropPolicy,
    max_attempts: usize,
}

impl Transform for RandomCrop {
    fn forward(&self, mut record: Record) -> Result<Option<Record>> {
        let input = record.take_input()?;
        let (height, width) = input.dim();
        ensure!(
            self.crop_size <= height && self.crop_size <= width,
            "crop_size {} exceeds the input shape {}x{}",
            self.crop_size,
            height,
            width
        );

        if record.gt_masks.is_some() {
            ensure!(
                record.gt_boxes.is_some(),
                "'gt_masks' is present without 'gt_boxes'"
            );
        }

        let attempts = match self.policy {
            CropPolicy::Strict => 1,
            CropPolicy::Retry => self.max_attempts,
        };

        let mut rng = StdRng::from_entropy();
        for _ in 0..attempts {
            let crop_y = rng.gen_range(0..=height - self.crop_size);
            let crop_x = rng.gen_range(0..=width - self.crop_size);
            let window = [crop_x, crop_y, crop_x + self.crop_size, crop_y + self.crop_size];

            let survivors = match &record.gt_boxes {
                Some(boxes) => {
                    let masks = match &record.gt_masks {
                        Some(Masks::List(masks)) => Some(masks.as_slice()),
                        Some(Masks::Stacked(_)) => {
                            bail!("RandomCrop must run before Pad stacks the masks")
                        }
                        None => None,
                    };
                    match crop_boxes_and_masks(boxes, masks, window)? {
                        Some(survivors) => Some(survivors),
                        // every box collapsed under this window
                        None => continue,
                    }
                }
                None => None,
            };

            let patch = input
                .slice(s![window[1]..window[3], window[0]..window[2]])
                .to_owned();
            record.ori_shape = Some(patch.dim());
            record.input = Some(patch);
            if let Some((boxes, masks)) = survivors {
                record.gt_boxes = Some(boxes);
                record.gt_masks = masks.map(Masks::List);
            }
            return Ok(Some(record));
        }

        Ok(None)
    }
}

/// Pads the working image bottom/right to the next multiple of
/// `size_divisor` and stacks the masks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PadInit {
    #[serde(default = "default_size_divisor")]
    pub size_divisor: usize,
    #[serde(default = "default_fill_value")]
    pub fill_value: R64,
}

fn default_size_divisor() -> usize {
    32
}

fn default_fill_value() -> R64 {
    r64(0.0)
}

impl Default for PadInit {
    fn default() -> Self {
        Self {
            size_divisor: default_size_divisor(),
            fill_value: default_fill_value(),
        }
    }
}

impl PadInit {
    pub fn build(self) -> Result<Pad> {
        let Self {
            size_divisor,
            fill_value,
        } = self;
        ensure!(size_divisor > 0, "size_divisor must be positive");
        Ok(Pad {
            size_divisor,
            fill_value: fill_value.raw() as f32,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Pad {
    size_divisor: usize,
    fill_value: f32,
}

impl Pad {
    fn padded_extent(&self, extent: usize) -> usize {
        (extent + self.size_divisor - 1) / self.size_divisor * self.size_divisor
    }
}

impl Transform for Pad {
    fn forward(&self, mut record: Record) -> Result<Option<Record>> {
        let input = record.take_input()?;
        let (height, width) = input.dim();
        let pad_shape = (self.padded_extent(height), self.padded_extent(width));

        record.input = Some(pad2d(&input, pad_shape, self.fill_value));
        record.pad_shape = Some(pad_shape);

        if let Some(target) = record.target.take() {
            record.target = Some(pad2d(&target, pad_shape, self.fill_value));
        }

        if let Some(masks) = record.gt_masks.take() {
            let masks = match masks {
                Masks::List(masks) => masks,
                Masks::Stacked(_) => bail!("masks are already stacked"),
            };
            let padded: Vec<Array2<u8>> = masks
                .iter()
                .map(|mask| pad2d(mask, pad_shape, 0))
                .collect();
            let stacked = if padded.is_empty() {
                Array3::zeros((0, pad_shape.0, pad_shape.1))
            } else {
                let views: Vec<_> = padded.iter().map(|mask| mask.view()).collect();
                ndarray::stack(Axis(0), &views)?
            };
            record.gt_masks = Some(Masks::Stacked(stacked));
        }

        Ok(Some(record))
    }
}

pub(crate) fn register(registry: &mut Registry<Box<dyn Transform>>) -> Result<()> {
    registry.register("RandomCrop", |options| {
        let init: RandomCropInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()?))
    })?;
    registry.register("Pad", |options| {
        let init: PadInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()?))
    })?;
    Ok(())
}
