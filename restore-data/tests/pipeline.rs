use ndarray::Array2;
use restore_data::{
    collate::{collate, Batched, Field},
    config::TypedConfig,
    pipeline::Compose,
    record::{ImageInfo, Record},
};

fn record_with_input(input: Array2<f32>) -> Record {
    let (height, width) = input.dim();
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
    record.filename = Some("data/slice.dcm".into());
    record.ori_shape = Some(input.dim());
    record.input = Some(input);
    record
}

fn compose(json: &str) -> Compose {
    let configs: Vec<TypedConfig> = serde_json::from_str(json).unwrap();
    Compose::from_config(&configs).unwrap()
}

const RESTORE_PIPELINE: &str = r#"[
    {"type": "RandomCrop", "crop_size": 128},
    {"type": "Pad", "size_divisor": 32},
    {"type": "NormalizeInstance", "eps": 1e-6},
    {"type": "GenTargetFromOcclusion", "block_range": [16, 32], "fill_value": 0.0}
]"#;

#[test]
fn constant_image_flows_through_the_whole_chain() {
    let pipeline = compose(RESTORE_PIPELINE);
    let record = pipeline
        .forward(record_with_input(Array2::from_elem((256, 256), 1.0)))
        .unwrap()
        .unwrap();

    let input = record.input.unwrap();
    let target = record.target.unwrap();
    assert_eq!(input.dim(), (128, 128));
    assert_eq!(record.ori_shape.unwrap(), (128, 128));
    assert_eq!(record.pad_shape.unwrap(), (128, 128));

    // a constant image normalizes to zero, so the zero-filled occlusion
    // leaves input and target identical
    assert!(target.iter().all(|&value| value == 0.0));
    assert_eq!(input, target);

    let norm_cfg = record.norm_cfg.unwrap();
    assert_eq!(norm_cfg.mean, 1.0);
    assert_eq!(norm_cfg.std, 0.0);
}

#[test]
fn occlusion_corrupts_a_centered_square_of_the_normalized_crop() {
    let pipeline = compose(
        r#"[
            {"type": "RandomCrop", "crop_size": 128},
            {"type": "Pad", "size_divisor": 32},
            {"type": "NormalizeInstance", "eps": 1e-6},
            {"type": "GenTargetFromOcclusion", "block_range": [16, 32], "fill_value": 1000.0}
        ]"#,
    );
    let ramp = Array2::from_shape_fn((256, 256), |(y, x)| (y * 256 + x) as f32);
    let record = pipeline
        .forward(record_with_input(ramp))
        .unwrap()
        .unwrap();

    let input = record.input.unwrap();
    let target = record.target.unwrap();
    assert_eq!(input.dim(), (128, 128));

    let changed: Vec<(usize, usize)> = input
        .indexed_iter()
        .zip(target.iter())
        .filter_map(|(((y, x), &new), &old)| (new != old).then_some((y, x)))
        .collect();
    assert!(!changed.is_empty());

    let top = changed.iter().map(|&(y, _)| y).min().unwrap();
    let bottom = changed.iter().map(|&(y, _)| y).max().unwrap();
    let left = changed.iter().map(|&(_, x)| x).min().unwrap();
    let right = changed.iter().map(|&(_, x)| x).max().unwrap();

    let side = bottom - top + 1;
    assert_eq!(side, right - left + 1);
    assert!((16..32).contains(&side), "occluded side {}", side);
    assert!(top.abs_diff(128 - bottom - 1) <= 1, "square is not centered");
    assert!(input
        .indexed_iter()
        .all(|((y, x), &value)| !((top..=bottom).contains(&y) && (left..=right).contains(&x))
            || value == 1000.0));
}

#[test]
fn collected_samples_collate_into_a_batch() {
    let pipeline = compose(
        r#"[
            {"type": "RandomCrop", "crop_size": 128},
            {"type": "NormalizeCustomize", "eps": 1e-6},
            {"type": "GenTargetFromOcclusion", "block_range": [16, 32], "fill_value": 0.0},
            {"type": "SliceToTensor", "keys": ["input", "target"]},
            {"type": "Collect", "keys": ["input", "target"]}
        ]"#,
    );

    let samples: Vec<_> = (0..2)
        .map(|nth| {
            let image = Array2::from_elem((256, 256), nth as f32 + 1.0);
            let record = pipeline
                .forward(record_with_input(image))
                .unwrap()
                .unwrap();
            record.collected.unwrap()
        })
        .collect();

    let batch = collate(&samples).unwrap();
    match &batch["input"] {
        Batched::Tensor(stacked) => assert_eq!(stacked.shape(), &[2, 1, 128, 128]),
        other => panic!("unexpected batched value: {:?}", other),
    }
    match &batch["data_meta"] {
        Batched::Map(meta) => {
            match &meta["filename"] {
                Batched::Seq(values) => {
                    assert_eq!(values.len(), 2);
                    assert_eq!(values[0], Field::Text("data/slice.dcm".into()));
                }
                other => panic!("unexpected batched value: {:?}", other),
            }
            match &meta["ori_shape"] {
                Batched::Seq(values) => assert_eq!(values[0], Field::Shape((128, 128))),
                other => panic!("unexpected batched value: {:?}", other),
            }
        }
        other => panic!("unexpected batched value: {:?}", other),
    }
}
