//! Record loading stages.

use super::{mask, Transform};
use crate::{common::*, record::Masks, record::Record, registry::Registry};

/// Reads the DICOM slice named by the record's index entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadDicomFromFileInit {}

impl LoadDicomFromFileInit {
    pub fn build(self) -> LoadDicomFromFile {
        LoadDicomFromFile {}
    }
}

#[derive(Debug, Clone)]
pub struct LoadDicomFromFile {}

impl Transform for LoadDicomFromFile {
    fn forward(&self, mut record: Record) -> Result<Option<Record>> {
        let filename = match &record.data_root {
            Some(data_root) => data_root.join(&record.img_info.filename),
            None => record.img_info.filename.clone(),
        };

        let input = dicom_slice::read_slice(&filename)
            .with_context(|| format!("failed to load image file '{}'", filename.display()))?;

        record.ori_shape = Some(input.dim());
        record.input = Some(input);
        record.filename = Some(filename);
        Ok(Some(record))
    }
}

/// Attaches boxes and decoded masks from the raw annotation entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadAnnotationsInit {
    #[serde(default)]
    pub with_bbox: bool,
    #[serde(default)]
    pub with_mask: bool,
    #[serde(default = "default_poly2mask")]
    pub poly2mask: bool,
}

fn default_poly2mask() -> bool {
    true
}

impl Default for LoadAnnotationsInit {
    fn default() -> Self {
        Self {
            with_bbox: false,
            with_mask: false,
            poly2mask: true,
        }
    }
}

impl LoadAnnotationsInit {
    pub fn build(self) -> LoadAnnotations {
        let Self {
            with_bbox,
            with_mask,
            poly2mask,
        } = self;
        LoadAnnotations {
            with_bbox,
            with_mask,
            poly2mask,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadAnnotations {
    with_bbox: bool,
    with_mask: bool,
    poly2mask: bool,
}

impl Transform for LoadAnnotations {
    fn forward(&self, mut record: Record) -> Result<Option<Record>> {
        let ann_info = record
            .ann_info
            .as_ref()
            .ok_or_else(|| format_err!("record carries no 'ann_info'"))?;

        if self.with_bbox {
            record.gt_boxes = Some(ann_info.boxes.clone());
        }

        if self.with_mask {
            let (height, width) = record.ori_shape()?;
            let masks: Vec<Array2<u8>> = ann_info
                .masks
                .iter()
                .enumerate()
                .map(|(nth, segmentation)| {
                    let segmentation = segmentation
                        .as_ref()
                        .ok_or_else(|| format_err!("annotation {} has no segmentation", nth))?;
                    if let mask::Segmentation::Polygon(_) = segmentation {
                        ensure!(
                            self.poly2mask,
                            "annotation {} is a polygon but poly2mask is disabled",
                            nth
                        );
                    }
                    mask::decode(segmentation, height, width)
                        .with_context(|| format!("failed to decode mask of annotation {}", nth))
                })
                .try_collect()?;
            record.gt_masks = Some(Masks::List(masks));
        }

        Ok(Some(record))
    }
}

pub(crate) fn register(registry: &mut Registry<Box<dyn Transform>>) -> Result<()> {
    registry.register("LoadDicomFromFile", |options| {
        let init: LoadDicomFromFileInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()))
    })?;
    registry.register("LoadAnnotations", |options| {
        let init: LoadAnnotationsInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::mask::{RleAnn, RleCounts, Segmentation},
        record::{AnnInfo, ImageInfo},
        rect::TLBR,
    };

    fn annotated_record() -> Record {
        let ann_info = AnnInfo {
            boxes: vec![TLBR::try_from_tlbr([1.0, 1.0, 3.0, 3.0]).unwrap()],
            masks: vec![Some(Segmentation::Rle(RleAnn {
                counts: RleCounts::Raw(vec![5, 2, 9]),
                size: [4, 4],
            }))],
        };
        let mut record = Record::new(
            None,
            ImageInfo {
                id: 7,
                filename: "slice.dcm".into(),
                width: 4,
                height: 4,
            },
            Some(ann_info),
        );
        record.input = Some(Array2::zeros((4, 4)));
        record.ori_shape = Some((4, 4));
        record
    }

    #[test]
    fn boxes_and_masks_are_attached() {
        let stage = LoadAnnotationsInit {
            with_bbox: true,
            with_mask: true,
            poly2mask: true,
        }
        .build();
        let record = stage.forward(annotated_record()).unwrap().unwrap();

        assert_eq!(record.gt_boxes.as_ref().unwrap().len(), 1);
        match record.gt_masks.unwrap() {
            Masks::List(masks) => {
                assert_eq!(masks.len(), 1);
                assert_eq!(masks[0].dim(), (4, 4));
                assert_eq!(masks[0].iter().map(|&v| v as usize).sum::<usize>(), 2);
            }
            other => panic!("unexpected masks: {:?}", other),
        }
    }

    #[test]
    fn polygons_require_poly2mask() {
        let mut record = annotated_record();
        record.ann_info.as_mut().unwrap().masks =
            vec![Some(Segmentation::Polygon(vec![vec![
                0.0, 0.0, 3.0, 0.0, 3.0, 3.0,
            ]]))];

        let stage = LoadAnnotationsInit {
            with_bbox: false,
            with_mask: true,
            poly2mask: false,
        }
        .build();
        assert!(stage.forward(record).is_err());
    }

    #[test]
    fn missing_image_file_is_fatal() {
        let mut record = annotated_record();
        record.data_root = Some("/nonexistent".into());
        let err = LoadDicomFromFileInit::default()
            .build()
            .forward(record)
            .unwrap_err();
        assert!(format!("{:#}", err).contains("slice.dcm"));
    }
}
