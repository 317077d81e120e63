//! The per-sample record threaded through the pipeline.

use crate::{
    collate::{Field, Sample},
    common::*,
    pipeline::mask::Segmentation,
    rect::TLBR,
};

/// Raw image entry of the annotation index. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: u64,
    #[serde(rename = "file_name")]
    pub filename: PathBuf,
    pub width: usize,
    pub height: usize,
}

/// Parsed raw annotations of one image. Read-only once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnInfo {
    /// Boxes in `(x1, y1, x2, y2)` pixel coordinates.
    pub boxes: Vec<TLBR>,
    /// One raw segmentation per box, in index order.
    pub masks: Vec<Option<Segmentation>>,
}

/// Per-box binary masks. Decoded masks start out as a list; the `Pad` stage
/// stacks them into one N×H×W array.
#[derive(Debug, Clone, PartialEq)]
pub enum Masks {
    List(Vec<Array2<u8>>),
    Stacked(Array3<u8>),
}

impl Masks {
    pub fn len(&self) -> usize {
        match self {
            Self::List(masks) => masks.len(),
            Self::Stacked(masks) => masks.shape()[0],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The affine map applied by a normalization stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormCfg {
    pub mean: f32,
    pub std: f32,
    pub eps: f32,
}

/// The mutable per-sample value flowing through the pipeline. Created fresh
/// per dataset access, owned uniquely by whichever stage currently holds it.
#[derive(Debug, Clone)]
pub struct Record {
    pub data_root: Option<PathBuf>,
    pub img_info: ImageInfo,
    pub ann_info: Option<AnnInfo>,
    pub filename: Option<PathBuf>,
    pub input: Option<Array2<f32>>,
    pub target: Option<Array2<f32>>,
    pub ori_shape: Option<(usize, usize)>,
    pub pad_shape: Option<(usize, usize)>,
    pub norm_cfg: Option<NormCfg>,
    pub gt_boxes: Option<Vec<TLBR>>,
    pub gt_masks: Option<Masks>,
    /// Tensor-converted fields, filled in by the formatting stages.
    pub tensors: IndexMap<String, Field>,
    /// The final per-sample output assembled by `Collect`.
    pub collected: Option<Sample>,
}

impl Record {
    pub fn new(data_root: Option<PathBuf>, img_info: ImageInfo, ann_info: Option<AnnInfo>) -> Self {
        Self {
            data_root,
            img_info,
            ann_info,
            filename: None,
            input: None,
            target: None,
            ori_shape: None,
            pad_shape: None,
            norm_cfg: None,
            gt_boxes: None,
            gt_masks: None,
            tensors: IndexMap::new(),
            collected: None,
        }
    }

    pub fn input(&self) -> Result<&Array2<f32>> {
        self.input
            .as_ref()
            .ok_or_else(|| format_err!("'input' is not loaded yet"))
    }

    pub fn take_input(&mut self) -> Result<Array2<f32>> {
        self.input
            .take()
            .ok_or_else(|| format_err!("'input' is not loaded yet"))
    }

    pub fn ori_shape(&self) -> Result<(usize, usize)> {
        self.ori_shape
            .ok_or_else(|| format_err!("'ori_shape' is not set yet"))
    }
}

/// Crop every box to a `[x1, y1, x2, y2]` window and keep the paired masks
/// in lockstep: a box that collapses drops its mask as well, so
/// `len(masks) == len(boxes)` holds by construction. Returns `None` when no
/// box survives.
pub fn crop_boxes_and_masks(
    boxes: &[TLBR],
    masks: Option<&[Array2<u8>]>,
    window: [usize; 4],
) -> Result<Option<(Vec<TLBR>, Option<Vec<Array2<u8>>>)>> {
    if let Some(masks) = masks {
        ensure!(
            masks.len() == boxes.len(),
            "box/mask count mismatch: {} boxes, {} masks",
            boxes.len(),
            masks.len()
        );
    }

    let [wx1, wy1, wx2, wy2] = window;

    let survivors: Vec<(TLBR, Option<Array2<u8>>)> = match masks {
        Some(masks) => izip!(boxes, masks)
            .filter_map(|(bbox, mask)| {
                let bbox = bbox.crop_to(window)?;
                let mask = mask.slice(s![wy1..wy2, wx1..wx2]).to_owned();
                Some((bbox, Some(mask)))
            })
            .collect(),
        None => boxes
            .iter()
            .filter_map(|bbox| Some((bbox.crop_to(window)?, None)))
            .collect(),
    };

    if survivors.is_empty() {
        return Ok(None);
    }

    let (boxes, masks): (Vec<_>, Vec<_>) = survivors.into_iter().unzip();
    let masks: Option<Vec<_>> = masks.into_iter().collect();
    Ok(Some((boxes, masks)))
}
