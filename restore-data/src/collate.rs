//! Batch collation over typed per-sample fields.

use crate::common::*;

/// A collatable per-sample value.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Tensor(ArrayD<f32>),
    Mask(ArrayD<u8>),
    Float(f64),
    Int(i64),
    Text(String),
    Shape((usize, usize)),
    Map(MetaMap),
}

impl Field {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tensor(_) => "tensor",
            Self::Mask(_) => "mask",
            Self::Float(_) => "float",
            Self::Int(_) => "int",
            Self::Text(_) => "text",
            Self::Shape(_) => "shape",
            Self::Map(_) => "map",
        }
    }
}

/// A mapping-valued field. Values of a `cpu_only` mapping are never stacked
/// during collation; they are collected into plain per-sample sequences.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaMap {
    pub cpu_only: bool,
    pub entries: IndexMap<String, Field>,
}

/// The per-sample output of a `Collect` stage.
pub type Sample = IndexMap<String, Field>;

/// One collated batch field.
#[derive(Debug, Clone, PartialEq)]
pub enum Batched {
    Tensor(ArrayD<f32>),
    Mask(ArrayD<u8>),
    Floats(Array1<f64>),
    Ints(Array1<i64>),
    Texts(Vec<String>),
    Seq(Vec<Field>),
    Map(IndexMap<String, Batched>),
}

/// A collated batch, field by field.
pub type Batch = IndexMap<String, Batched>;

/// Merge same-shaped samples into one batch value per field.
///
/// Array fields gain a leading batch axis, scalars become 1-D arrays, text is
/// kept as a plain sequence, and mappings are collated recursively unless
/// they carry the `cpu_only` marker. A field whose type differs across
/// samples, or cannot be merged at all, aborts the batch.
pub fn collate(samples: &[Sample]) -> Result<Batch> {
    ensure!(!samples.is_empty(), "cannot collate an empty batch");

    samples[0]
        .keys()
        .map(|key| {
            let fields: Vec<&Field> = samples
                .iter()
                .map(|sample| {
                    sample
                        .get(key)
                        .ok_or_else(|| format_err!("field '{}' is missing from a sample", key))
                })
                .try_collect()?;
            let batched = collate_field(key, &fields)?;
            Ok((key.clone(), batched))
        })
        .try_collect()
}

fn collate_field(key: &str, fields: &[&Field]) -> Result<Batched> {
    for field in fields {
        ensure!(
            field.kind() == fields[0].kind(),
            "field '{}' mixes types '{}' and '{}' across samples",
            key,
            fields[0].kind(),
            field.kind()
        );
    }

    let batched = match fields[0] {
        Field::Tensor(_) => {
            let views: Vec<_> = fields
                .iter()
                .map(|field| match field {
                    Field::Tensor(array) => array.view(),
                    _ => unreachable!(),
                })
                .collect();
            let stacked = ndarray::stack(Axis(0), &views)
                .map_err(|_| format_err!("field '{}' has mismatched tensor shapes", key))?;
            Batched::Tensor(stacked)
        }
        Field::Mask(_) => {
            let views: Vec<_> = fields
                .iter()
                .map(|field| match field {
                    Field::Mask(array) => array.view(),
                    _ => unreachable!(),
                })
                .collect();
            let stacked = ndarray::stack(Axis(0), &views)
                .map_err(|_| format_err!("field '{}' has mismatched mask shapes", key))?;
            Batched::Mask(stacked)
        }
        Field::Float(_) => {
            let values: Vec<f64> = fields
                .iter()
                .map(|field| match field {
                    Field::Float(value) => *value,
                    _ => unreachable!(),
                })
                .collect();
            Batched::Floats(Array1::from(values))
        }
        Field::Int(_) => {
            let values: Vec<i64> = fields
                .iter()
                .map(|field| match field {
                    Field::Int(value) => *value,
                    _ => unreachable!(),
                })
                .collect();
            Batched::Ints(Array1::from(values))
        }
        Field::Text(_) => {
            let values: Vec<String> = fields
                .iter()
                .map(|field| match field {
                    Field::Text(value) => value.clone(),
                    _ => unreachable!(),
                })
                .collect();
            Batched::Texts(values)
        }
        Field::Map(first) => {
            let maps: Vec<&MetaMap> = fields
                .iter()
                .map(|field| match field {
                    Field::Map(map) => map,
                    _ => unreachable!(),
                })
                .collect();

            if first.cpu_only {
                // metadata stays on the CPU as per-sample sequences
                let inner: IndexMap<String, Batched> = first
                    .entries
                    .keys()
                    .map(|inner_key| {
                        let values: Vec<Field> = maps
                            .iter()
                            .map(|map| {
                                map.entries.get(inner_key).cloned().ok_or_else(|| {
                                    format_err!(
                                        "meta field '{}.{}' is missing from a sample",
                                        key,
                                        inner_key
                                    )
                                })
                            })
                            .try_collect()?;
                        Ok((inner_key.clone(), Batched::Seq(values)))
                    })
                    .try_collect::<_, _, Error>()?;
                Batched::Map(inner)
            } else {
                let entries: Vec<Sample> = maps.iter().map(|map| map.entries.clone()).collect();
                Batched::Map(collate(&entries).with_context(|| format!("in field '{}'", key))?)
            }
        }
        Field::Shape(_) => bail!(
            "field '{}' of type 'shape' cannot be collated outside a cpu_only mapping",
            key
        ),
    };

    Ok(batched)
}
