//! The COCO-style single-slice dataset.

use super::RandomAccessDataset;
use crate::{
    common::*,
    config::TypedConfig,
    pipeline::{mask::Segmentation, Compose},
    record::{AnnInfo, ImageInfo, Record},
    rect::TLBR,
    registry::Registry,
};

/// serde model of the annotation index file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoIndex {
    pub images: Vec<ImageInfo>,
    pub annotations: Vec<CocoAnnotation>,
}

/// One object annotation of the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoAnnotation {
    pub image_id: u64,
    /// `[x, y, w, h]` in pixel units.
    pub bbox: [f32; 4],
    #[serde(default)]
    pub segmentation: Option<Segmentation>,
}

impl CocoIndex {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read annotation file '{}'", path.display()))?;
        let index = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse annotation file '{}'", path.display()))?;
        Ok(index)
    }
}

/// Dataset options, registered under the `"CocoDataset"` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CocoDatasetInit {
    pub ann_file: PathBuf,
    #[serde(default)]
    pub data_root: Option<PathBuf>,
    pub pipeline: Vec<TypedConfig>,
}

impl CocoDatasetInit {
    pub fn build(self) -> Result<CocoDataset> {
        let Self {
            ann_file,
            data_root,
            pipeline,
        } = self;

        let ann_file = match &data_root {
            Some(data_root) => data_root.join(&ann_file),
            None => ann_file,
        };
        let index = CocoIndex::open(&ann_file)?;

        // resolve the stage list up front so configuration errors surface
        // before any sample flows
        let pipeline = Compose::from_config(&pipeline)?;

        Ok(CocoDataset::from_parts(index, data_root, pipeline))
    }
}

/// The annotation index paired with its preparation pipeline.
#[derive(Debug)]
pub struct CocoDataset {
    data_root: Option<PathBuf>,
    pipeline: Compose,
    records: Vec<(ImageInfo, Vec<CocoAnnotation>)>,
}

impl CocoDataset {
    pub fn from_parts(
        index: CocoIndex,
        data_root: Option<PathBuf>,
        pipeline: Compose,
    ) -> Self {
        let CocoIndex {
            images,
            annotations,
        } = index;

        let image_ids: HashSet<u64> = images.iter().map(|image| image.id).collect();
        let orphans = annotations
            .iter()
            .filter(|ann| !image_ids.contains(&ann.image_id))
            .count();
        if orphans > 0 {
            warn!("{} annotations reference unknown images", orphans);
        }

        let mut grouped: HashMap<u64, Vec<CocoAnnotation>> = annotations
            .into_iter()
            .map(|ann| (ann.image_id, ann))
            .into_group_map();
        let records: Vec<_> = images
            .into_iter()
            .map(|image| {
                let anns = grouped.remove(&image.id).unwrap_or_default();
                (image, anns)
            })
            .collect();

        info!("loaded an index of {} images", records.len());

        Self {
            data_root,
            pipeline,
            records,
        }
    }

    /// Convert raw annotations into the per-record form: `[x, y, w, h]`
    /// becomes the `(x, y, x + w - 1, y + h - 1)` corner box.
    fn parse_ann_info(annotations: &[CocoAnnotation]) -> Result<AnnInfo> {
        let boxes: Vec<TLBR> = annotations
            .iter()
            .map(|ann| {
                let [x, y, w, h] = ann.bbox;
                TLBR::try_from_tlbr([y, x, y + h - 1.0, x + w - 1.0])
            })
            .try_collect()?;
        let masks = annotations
            .iter()
            .map(|ann| ann.segmentation.clone())
            .collect();
        Ok(AnnInfo { boxes, masks })
    }
}

impl RandomAccessDataset for CocoDataset {
    fn num_records(&self) -> usize {
        self.records.len()
    }

    fn prepare(&self, index: usize) -> Result<Option<Record>> {
        let (img_info, annotations) = self
            .records
            .get(index)
            .ok_or_else(|| format_err!("index {} out of range ({} records)", index, self.records.len()))?;
        let ann_info = Self::parse_ann_info(annotations)?;
        let record = Record::new(self.data_root.clone(), img_info.clone(), Some(ann_info));
        self.pipeline.forward(record)
    }
}

pub(crate) fn register(registry: &mut Registry<Box<dyn RandomAccessDataset>>) -> Result<()> {
    registry.register("CocoDataset", |options| {
        let init: CocoDatasetInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()?))
    })?;
    Ok(())
}
