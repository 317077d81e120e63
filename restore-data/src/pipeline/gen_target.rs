//! Target synthesis stages.
//!
//! Each stage snapshots the working image into `target` and then corrupts
//! `input` in place, so the model learns to map corrupted back to clean.
//! They are meant to run after the geometric and normalization stages.

use super::Transform;
use crate::{common::*, record::Record, registry::Registry};

fn fill_region(
    data: &mut Array2<f32>,
    top: usize,
    left: usize,
    bottom: usize,
    right: usize,
    fill_value: f32,
) {
    let (height, width) = data.dim();
    let bottom = bottom.min(height);
    let right = right.min(width);
    if top < bottom && left < right {
        data.slice_mut(s![top..bottom, left..right]).fill(fill_value);
    }
}

/// Erases every annotated box from the working image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenTargetFromBoxesInit {
    #[serde(default = "default_fill_value")]
    pub fill_value: R64,
}

fn default_fill_value() -> R64 {
    r64(0.0)
}

impl Default for GenTargetFromBoxesInit {
    fn default() -> Self {
        Self {
            fill_value: default_fill_value(),
        }
    }
}

impl GenTargetFromBoxesInit {
    pub fn build(self) -> GenTargetFromBoxes {
        GenTargetFromBoxes {
            fill_value: self.fill_value.raw() as f32,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenTargetFromBoxes {
    fill_value: f32,
}

impl Transform for GenTargetFromBoxes {
    fn forward(&self, mut record: Record) -> Result<Option<Record>> {
        let mut input = record.take_input()?;
        record.target = Some(input.clone());

        let boxes = record
            .gt_boxes
            .as_ref()
            .ok_or_else(|| format_err!("'gt_boxes' is required to erase boxes"))?;
        for bbox in boxes {
            let top = bbox.t().max(0.0).floor() as usize;
            let left = bbox.l().max(0.0).floor() as usize;
            let bottom = bbox.b().max(0.0).ceil() as usize;
            let right = bbox.r().max(0.0).ceil() as usize;
            fill_region(&mut input, top, left, bottom, right, self.fill_value);
        }

        record.input = Some(input);
        Ok(Some(record))
    }
}

/// Blanks a square block at the image center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenTargetFromOcclusionInit {
    /// `[lo, hi)` range of the block side in pixels.
    pub block_range: (usize, usize),
    #[serde(default = "default_fill_value")]
    pub fill_value: R64,
}

impl GenTargetFromOcclusionInit {
    pub fn build(self) -> Result<GenTargetFromOcclusion> {
        let Self {
            block_range: (lo, hi),
            fill_value,
        } = self;
        ensure!(0 < lo && lo < hi, "block_range must satisfy 0 < lo < hi");
        Ok(GenTargetFromOcclusion {
            block_range: (lo, hi),
            fill_value: fill_value.raw() as f32,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GenTargetFromOcclusion {
    block_range: (usize, usize),
    fill_value: f32,
}

impl Transform for GenTargetFromOcclusion {
    fn forward(&self, mut record: Record) -> Result<Option<Record>> {
        let mut input = record.take_input()?;
        record.target = Some(input.clone());

        let (height, width) = input.dim();
        let mut rng = StdRng::from_entropy();
        let block = rng.gen_range(self.block_range.0..self.block_range.1);
        let top = height.saturating_sub(block) / 2;
        let left = width.saturating_sub(block) / 2;
        fill_region(&mut input, top, left, top + block, left + block, self.fill_value);

        record.input = Some(input);
        Ok(Some(record))
    }
}

/// Smears the working image along a random direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenTargetFromMotionInit {
    /// Probability of leaving the image untouched, teaching the model an
    /// identity mapping for already-sharp inputs.
    pub invariant_prob: R64,
    /// `[lo, hi)` range of the blur kernel size in pixels.
    pub degree_range: (usize, usize),
}

impl GenTargetFromMotionInit {
    pub fn build(self) -> Result<GenTargetFromMotion> {
        let Self {
            invariant_prob,
            degree_range: (lo, hi),
        } = self;
        ensure!(
            (0.0..=1.0).contains(&invariant_prob.raw()),
            "invariant_prob must lie in [0, 1]"
        );
        ensure!(0 < lo && lo < hi, "degree_range must satisfy 0 < lo < hi");
        Ok(GenTargetFromMotion {
            invariant_prob: invariant_prob.raw(),
            degree_range: (lo, hi),
        })
    }
}

#[derive(Debug, Clone)]
pub struct GenTargetFromMotion {
    invariant_prob: f64,
    degree_range: (usize, usize),
}

impl Transform for GenTargetFromMotion {
    fn forward(&self, mut record: Record) -> Result<Option<Record>> {
        let input = record.take_input()?;
        record.target = Some(input.clone());

        let mut rng = StdRng::from_entropy();
        if rng.gen::<f64>() < self.invariant_prob {
            record.input = Some(input);
            return Ok(Some(record));
        }

        let degree = rng.gen_range(self.degree_range.0..self.degree_range.1);
        let angle = rng.gen_range(0.0..360.0);
        let kernel = motion_kernel(degree, angle);

        let mut blurred = convolve_reflect101(&input, &kernel);
        let (lo, hi) = input
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &value| {
                (lo.min(value), hi.max(value))
            });
        rescale_to(&mut blurred, lo, hi);

        record.input = Some(blurred);
        Ok(Some(record))
    }
}

/// Directional blur kernel: an identity diagonal rotated about its center by
/// a bilinear inverse affine warp, then divided by `degree`. The division is
/// by the diagonal length, not the post-warp sum.
pub(crate) fn motion_kernel(degree: usize, angle_degrees: f64) -> Array2<f32> {
    let diagonal = Array2::<f32>::eye(degree);
    let center = (degree as f64 - 1.0) / 2.0;
    let (sin, cos) = angle_degrees.to_radians().sin_cos();

    let mut kernel = Array2::from_shape_fn((degree, degree), |(row, col)| {
        let x = col as f64 - center;
        let y = row as f64 - center;
        let source_x = cos * x + sin * y + center;
        let source_y = -sin * x + cos * y + center;
        bilinear_sample(&diagonal, source_y, source_x)
    });
    kernel.mapv_inplace(|value| value / degree as f32);
    kernel
}

/// Bilinear interpolation with zero outside the array.
fn bilinear_sample(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (height, width) = data.dim();
    let y0 = y.floor();
    let x0 = x.floor();
    let wy = (y - y0) as f32;
    let wx = (x - x0) as f32;

    let at = |row: f64, col: f64| -> f32 {
        if row < 0.0 || col < 0.0 || row >= height as f64 || col >= width as f64 {
            0.0
        } else {
            data[(row as usize, col as usize)]
        }
    };

    at(y0, x0) * (1.0 - wy) * (1.0 - wx)
        + at(y0, x0 + 1.0) * (1.0 - wy) * wx
        + at(y0 + 1.0, x0) * wy * (1.0 - wx)
        + at(y0 + 1.0, x0 + 1.0) * wy * wx
}

/// 2-D correlation with a reflect-101 border (`gfedcb|abcdefgh|gfedcb`) and
/// the anchor at the kernel center.
pub(crate) fn convolve_reflect101(input: &Array2<f32>, kernel: &Array2<f32>) -> Array2<f32> {
    let (height, width) = input.dim();
    let (kernel_h, kernel_w) = kernel.dim();
    let (anchor_y, anchor_x) = (kernel_h / 2, kernel_w / 2);

    Array2::from_shape_fn((height, width), |(y, x)| {
        let mut acc = 0.0f32;
        for row in 0..kernel_h {
            for col in 0..kernel_w {
                let source_y = reflect_101(y as isize + row as isize - anchor_y as isize, height);
                let source_x = reflect_101(x as isize + col as isize - anchor_x as isize, width);
                acc += kernel[(row, col)] * input[(source_y, source_x)];
            }
        }
        acc
    })
}

fn reflect_101(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let mut index = index.rem_euclid(period);
    if index >= len as isize {
        index = period - index;
    }
    index as usize
}

fn rescale_to(data: &mut Array2<f32>, lo: f32, hi: f32) {
    let (min, max) = data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &value| {
            (min.min(value), max.max(value))
        });
    if max > min {
        data.mapv_inplace(|value| (value - min) / (max - min) * (hi - lo) + lo);
    } else {
        data.fill(lo);
    }
}

pub(crate) fn register(registry: &mut Registry<Box<dyn Transform>>) -> Result<()> {
    registry.register("GenTargetFromBoxes", |options| {
        let init: GenTargetFromBoxesInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()))
    })?;
    registry.register("GenTargetFromOcclusion", |options| {
        let init: GenTargetFromOcclusionInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()?))
    })?;
    registry.register("GenTargetFromMotion", |options| {
        let init: GenTargetFromMotionInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()?))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{record::ImageInfo, rect::TLBR};
    use approx::assert_abs_diff_eq;

    fn ramp_record(height: usize, width: usize) -> Record {
        let mut record = Record::new(
            None,
            ImageInfo {
                id: 0,
                filename: "slice.dcm".into(),
                width,
                height,
            },
            None,
        );
        record.input = Some(Array2::from_shape_fn((height, width), |(y, x)| {
            (y * width + x) as f32
        }));
        record.ori_shape = Some((height, width));
        record
    }

    #[test]
    fn boxes_are_erased_from_input_but_not_target() {
        let mut record = ramp_record(32, 32);
        record.gt_boxes = Some(vec![TLBR::try_from_tlbr([4.0, 4.0, 8.0, 8.0]).unwrap()]);

        let stage = GenTargetFromBoxesInit {
            fill_value: r64(-7.0),
        }
        .build();
        let record = stage.forward(record).unwrap().unwrap();

        let input = record.input.unwrap();
        let target = record.target.unwrap();
        assert_eq!(input[(5, 5)], -7.0);
        assert_eq!(target[(5, 5)], (5 * 32 + 5) as f32);
        assert_eq!(input[(9, 9)], target[(9, 9)]);
    }

    #[test]
    fn occlusion_blanks_a_centered_square() {
        let stage = GenTargetFromOcclusionInit {
            block_range: (16, 32),
            fill_value: r64(0.0),
        }
        .build()
        .unwrap();
        let record = stage.forward(ramp_record(128, 128)).unwrap().unwrap();

        let input = record.input.unwrap();
        let target = record.target.unwrap();

        let changed: Vec<(usize, usize)> = input
            .indexed_iter()
            .zip(target.iter())
            .filter_map(|(((y, x), &new), &old)| (new != old).then(|| (y, x)))
            .collect();
        assert!(!changed.is_empty());

        let top = changed.iter().map(|&(y, _)| y).min().unwrap();
        let bottom = changed.iter().map(|&(y, _)| y).max().unwrap();
        let left = changed.iter().map(|&(_, x)| x).min().unwrap();
        let right = changed.iter().map(|&(_, x)| x).max().unwrap();
        let side = bottom - top + 1;

        assert_eq!(side, right - left + 1);
        assert!((16..32).contains(&side), "side {}", side);
        // centered
        assert!(top.abs_diff(128 - bottom - 1) <= 1);
        assert!(input[((top + bottom) / 2, (left + right) / 2)] == 0.0);
    }

    #[test]
    fn invariant_motion_keeps_input_identical() {
        let stage = GenTargetFromMotionInit {
            invariant_prob: r64(1.0),
            degree_range: (5, 9),
        }
        .build()
        .unwrap();
        let record = stage.forward(ramp_record(32, 32)).unwrap().unwrap();
        assert_eq!(record.input.unwrap(), record.target.unwrap());
    }

    #[test]
    fn certain_motion_always_blurs() {
        let stage = GenTargetFromMotionInit {
            invariant_prob: r64(0.0),
            degree_range: (5, 9),
        }
        .build()
        .unwrap();
        for _ in 0..10 {
            let record = stage.forward(ramp_record(32, 32)).unwrap().unwrap();
            assert_ne!(record.input.unwrap(), record.target.unwrap());
        }
    }

    #[test]
    fn motion_kernel_is_the_scaled_diagonal_at_angle_zero() {
        let kernel = motion_kernel(5, 0.0);
        for row in 0..5 {
            for col in 0..5 {
                let expected = if row == col { 1.0 / 5.0 } else { 0.0 };
                assert_abs_diff_eq!(kernel[(row, col)], expected, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn motion_kernel_mass_survives_right_angle_rotation() {
        for &degree in &[3usize, 5, 9] {
            for &angle in &[0.0f64, 90.0, 180.0, 270.0] {
                let kernel = motion_kernel(degree, angle);
                let sum: f32 = kernel.iter().sum();
                assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn blur_preserves_the_value_range() {
        let stage = GenTargetFromMotionInit {
            invariant_prob: r64(0.0),
            degree_range: (5, 9),
        }
        .build()
        .unwrap();
        let record = stage.forward(ramp_record(64, 64)).unwrap().unwrap();

        let input = record.input.unwrap();
        let min = input.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = input.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert_abs_diff_eq!(min, 0.0, epsilon = 1e-2);
        assert_abs_diff_eq!(max, (64 * 64 - 1) as f32, epsilon = 1.0);
    }

    #[test]
    fn reflect_border_mirrors_without_the_edge() {
        assert_eq!(reflect_101(-1, 8), 1);
        assert_eq!(reflect_101(-2, 8), 2);
        assert_eq!(reflect_101(8, 8), 6);
        assert_eq!(reflect_101(0, 8), 0);
        assert_eq!(reflect_101(7, 8), 7);
    }
}
