//! Tensor conversion and collection stages.

use super::Transform;
use crate::{
    collate::{Field, MetaMap, Sample},
    common::*,
    record::{Masks, Record},
    registry::Registry,
};

fn tensor_field(record: &Record, key: &str, add_channel_axis: bool) -> Result<Field> {
    let field = match key {
        "input" => {
            let input = record.input()?.clone().into_dyn();
            Field::Tensor(if add_channel_axis {
                input.insert_axis(Axis(0))
            } else {
                input
            })
        }
        "target" => {
            let target = record
                .target
                .as_ref()
                .ok_or_else(|| format_err!("'target' is not synthesized yet"))?
                .clone()
                .into_dyn();
            Field::Tensor(if add_channel_axis {
                target.insert_axis(Axis(0))
            } else {
                target
            })
        }
        "gt_masks" => match &record.gt_masks {
            Some(Masks::Stacked(masks)) => Field::Mask(masks.clone().into_dyn()),
            Some(Masks::List(_)) => bail!("'gt_masks' must be stacked by Pad before conversion"),
            None => bail!("'gt_masks' is not loaded"),
        },
        _ => bail!("field '{}' cannot be converted to a tensor", key),
    };
    Ok(field)
}

/// Converts the named record fields to tensors as they are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToTensorInit {
    pub keys: Vec<String>,
}

impl ToTensorInit {
    pub fn build(self) -> ToTensor {
        ToTensor { keys: self.keys }
    }
}

#[derive(Debug, Clone)]
pub struct ToTensor {
    keys: Vec<String>,
}

impl Transform for ToTensor {
    fn forward(&self, mut record: Record) -> Result<Option<Record>> {
        for key in &self.keys {
            let field = tensor_field(&record, key, false)?;
            record.tensors.insert(key.clone(), field);
        }
        Ok(Some(record))
    }
}

/// Converts the named 2-D record fields to tensors with a leading channel
/// axis (H×W becomes 1×H×W).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SliceToTensorInit {
    pub keys: Vec<String>,
}

impl SliceToTensorInit {
    pub fn build(self) -> SliceToTensor {
        SliceToTensor { keys: self.keys }
    }
}

#[derive(Debug, Clone)]
pub struct SliceToTensor {
    keys: Vec<String>,
}

impl Transform for SliceToTensor {
    fn forward(&self, mut record: Record) -> Result<Option<Record>> {
        for key in &self.keys {
            let field = tensor_field(&record, key, true)?;
            record.tensors.insert(key.clone(), field);
        }
        Ok(Some(record))
    }
}

/// Assembles the final per-sample output: the tensor-converted `keys` plus a
/// `data_meta` mapping of the `meta_keys` that stays on the CPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectInit {
    pub keys: Vec<String>,
    #[serde(default = "default_meta_keys")]
    pub meta_keys: Vec<String>,
}

fn default_meta_keys() -> Vec<String> {
    vec!["filename".into(), "ori_shape".into(), "norm_cfg".into()]
}

impl CollectInit {
    pub fn build(self) -> Collect {
        let Self { keys, meta_keys } = self;
        Collect { keys, meta_keys }
    }
}

#[derive(Debug, Clone)]
pub struct Collect {
    keys: Vec<String>,
    meta_keys: Vec<String>,
}

impl Collect {
    fn meta_field(record: &Record, key: &str) -> Result<Field> {
        let field = match key {
            "filename" => {
                let filename = record
                    .filename
                    .as_ref()
                    .ok_or_else(|| format_err!("'filename' is not set yet"))?;
                Field::Text(filename.display().to_string())
            }
            "ori_shape" => Field::Shape(record.ori_shape()?),
            "pad_shape" => Field::Shape(
                record
                    .pad_shape
                    .ok_or_else(|| format_err!("'pad_shape' is not set yet"))?,
            ),
            "norm_cfg" => {
                let norm_cfg = record
                    .norm_cfg
                    .ok_or_else(|| format_err!("'norm_cfg' is not set yet"))?;
                let mut entries = IndexMap::new();
                entries.insert("mean".to_owned(), Field::Float(norm_cfg.mean as f64));
                entries.insert("std".to_owned(), Field::Float(norm_cfg.std as f64));
                entries.insert("eps".to_owned(), Field::Float(norm_cfg.eps as f64));
                Field::Map(MetaMap {
                    cpu_only: false,
                    entries,
                })
            }
            _ => bail!("unknown meta key '{}'", key),
        };
        Ok(field)
    }
}

impl Transform for Collect {
    fn forward(&self, mut record: Record) -> Result<Option<Record>> {
        let mut meta = MetaMap {
            cpu_only: true,
            entries: IndexMap::new(),
        };
        for key in &self.meta_keys {
            meta.entries
                .insert(key.clone(), Self::meta_field(&record, key)?);
        }

        let mut sample = Sample::new();
        sample.insert("data_meta".to_owned(), Field::Map(meta));
        for key in &self.keys {
            let field = record.tensors.shift_remove(key).ok_or_else(|| {
                format_err!("field '{}' was not tensor-converted before Collect", key)
            })?;
            sample.insert(key.clone(), field);
        }

        record.collected = Some(sample);
        Ok(Some(record))
    }
}

pub(crate) fn register(registry: &mut Registry<Box<dyn Transform>>) -> Result<()> {
    registry.register("ToTensor", |options| {
        let init: ToTensorInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()))
    })?;
    registry.register("SliceToTensor", |options| {
        let init: SliceToTensorInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()))
    })?;
    registry.register("Collect", |options| {
        let init: CollectInit = serde_json::from_value(options)?;
        Ok(Box::new(init.build()))
    })?;
    Ok(())
}
