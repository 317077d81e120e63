//! Binary mask decoding for the annotation index.
//!
//! Segmentations arrive as polygons, raw run-length counts, or the compact
//! RLE string form. All of them decode to a `(height, width)` array of 0/1
//! values.

use crate::common::*;

/// A segmentation annotation in any of the supported encodings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segmentation {
    /// One or more polygons, each a flat `[x1, y1, x2, y2, ...]` ring. Parts
    /// of the same object are merged into one mask.
    Polygon(Vec<Vec<f64>>),
    Rle(RleAnn),
}

/// Run-length encoded mask, column-major, first run counting zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RleAnn {
    pub counts: RleCounts,
    /// `[height, width]` of the encoded mask.
    pub size: [usize; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RleCounts {
    Raw(Vec<u32>),
    Compressed(String),
}

/// Decode a segmentation into a binary mask of the given shape.
pub fn decode(segmentation: &Segmentation, height: usize, width: usize) -> Result<Array2<u8>> {
    match segmentation {
        Segmentation::Polygon(rings) => {
            ensure!(!rings.is_empty(), "empty polygon segmentation");
            let mut mask = Array2::zeros((height, width));
            for ring in rings {
                ensure!(
                    ring.len() >= 6 && ring.len() % 2 == 0,
                    "polygon ring must hold at least 3 (x, y) points, got {} values",
                    ring.len()
                );
                rasterize_polygon(&mut mask, ring);
            }
            Ok(mask)
        }
        Segmentation::Rle(rle) => {
            let [rle_h, rle_w] = rle.size;
            ensure!(
                (rle_h, rle_w) == (height, width),
                "RLE size {}x{} does not match the image shape {}x{}",
                rle_h,
                rle_w,
                height,
                width
            );
            let counts = match &rle.counts {
                RleCounts::Raw(counts) => counts.clone(),
                RleCounts::Compressed(string) => counts_from_string(string)?,
            };
            decode_rle(&counts, height, width)
        }
    }
}

/// Expand column-major run counts into a mask. Runs alternate between 0 and
/// 1, starting with 0.
fn decode_rle(counts: &[u32], height: usize, width: usize) -> Result<Array2<u8>> {
    let total: usize = counts.iter().map(|&count| count as usize).sum();
    ensure!(
        total == height * width,
        "RLE counts cover {} pixels, expected {}",
        total,
        height * width
    );

    let mut mask = Array2::zeros((height, width));
    let mut offset = 0usize;
    let mut value = 0u8;
    for &count in counts {
        for position in offset..offset + count as usize {
            if value == 1 {
                mask[(position % height, position / height)] = 1;
            }
        }
        offset += count as usize;
        value = 1 - value;
    }
    Ok(mask)
}

/// Decode the compact RLE string: base-48 characters carrying 5 bits each,
/// counts past the second stored as deltas against the count two back.
fn counts_from_string(string: &str) -> Result<Vec<u32>> {
    let bytes = string.as_bytes();
    let mut counts: Vec<i64> = Vec::new();
    let mut position = 0;

    while position < bytes.len() {
        let mut value: i64 = 0;
        let mut shift = 0u32;
        loop {
            ensure!(position < bytes.len(), "truncated RLE string");
            ensure!(shift < 12, "RLE run length overflows");
            let chunk = bytes[position] as i64 - 48;
            ensure!(
                (0..64).contains(&chunk),
                "invalid RLE string byte {:#x}",
                bytes[position]
            );
            value |= (chunk & 0x1f) << (5 * shift);
            position += 1;
            shift += 1;
            if chunk & 0x20 == 0 {
                if chunk & 0x10 != 0 {
                    value |= -1i64 << (5 * shift);
                }
                break;
            }
        }
        if counts.len() > 2 {
            value += counts[counts.len() - 2];
        }
        counts.push(value);
    }

    counts
        .into_iter()
        .map(|value| {
            ensure!(value >= 0, "negative RLE run length {}", value);
            Ok(value as u32)
        })
        .try_collect()
}

/// Even-odd scanline fill of one polygon ring, sampled at pixel centers.
fn rasterize_polygon(mask: &mut Array2<u8>, ring: &[f64]) {
    let (height, width) = mask.dim();
    let points: Vec<(f64, f64)> = ring
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect();

    for row in 0..height {
        let y = row as f64 + 0.5;
        let mut crossings: Vec<f64> = points
            .iter()
            .zip(points.iter().cycle().skip(1))
            .filter_map(|(&(x1, y1), &(x2, y2))| {
                ((y1 <= y) != (y2 <= y)).then(|| x1 + (y - y1) / (y2 - y1) * (x2 - x1))
            })
            .collect();
        crossings.sort_by(|a, b| a.partial_cmp(b).expect("crossing is never NaN"));

        for pair in crossings.chunks_exact(2) {
            let start = (pair[0] - 0.5).ceil().max(0.0) as usize;
            let end = (pair[1] - 0.5).floor().min(width as f64 - 1.0);
            if end < 0.0 {
                continue;
            }
            for col in start..=end as usize {
                mask[(row, col)] = 1;
            }
        }
    }
}
