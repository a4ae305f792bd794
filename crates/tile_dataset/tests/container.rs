use std::fs;
use std::path::Path;
use tile_dataset::{
    load_batch, ArrayDType, ArrayMeta, ContainerHeader, Endianness, Split, TileContainer,
    TileContainerWriter, TileDataset, TileDatasetError, FORMAT_VERSION, MAGIC, TRAIN_IMAGES,
    TRAIN_LABELS, VAL_IMAGES, VAL_LABELS,
};

type TB = burn_ndarray::NdArray<f32>;

const H: usize = 4;
const W: usize = 4;
const C: usize = 3;

fn tile_pixels(seed: u8) -> Vec<u8> {
    (0..H * W * C).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Write a container with `train` training tiles and `val` validation tiles.
/// Labels alternate 0/1.
fn write_fixture(path: &Path, train: usize, val: usize) {
    let mut train_img = Vec::new();
    for i in 0..train {
        train_img.extend(tile_pixels(i as u8));
    }
    let mut val_img = Vec::new();
    for i in 0..val {
        val_img.extend(tile_pixels(100 + i as u8));
    }
    let train_labels: Vec<u8> = (0..train).map(|i| (i % 2) as u8).collect();
    let val_labels: Vec<u8> = (0..val).map(|i| (i % 2) as u8).collect();

    let mut writer = TileContainerWriter::create(path);
    writer
        .add_u8_array(TRAIN_IMAGES, vec![train, H, W, C], train_img)
        .add_u8_array(TRAIN_LABELS, vec![train], train_labels)
        .add_u8_array(VAL_IMAGES, vec![val, H, W, C], val_img)
        .add_u8_array(VAL_LABELS, vec![val], val_labels);
    writer.finish().expect("write fixture container");
}

#[test]
fn roundtrip_reads_back_normalized_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiles.bin");
    write_fixture(&path, 3, 1);

    let container = TileContainer::open(&path).unwrap();
    let mut row = Vec::new();
    container.read_rows_f32(TRAIN_IMAGES, 1, 2, &mut row).unwrap();
    assert_eq!(row.len(), H * W * C);
    let expected: Vec<f32> = tile_pixels(1).iter().map(|&v| v as f32 / 255.0).collect();
    assert_eq!(row, expected);
}

#[test]
fn missing_array_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("no_val.bin");
    let mut writer = TileContainerWriter::create(&path);
    writer
        .add_u8_array(TRAIN_IMAGES, vec![1, H, W, C], tile_pixels(0))
        .add_u8_array(TRAIN_LABELS, vec![1], vec![0]);
    writer.finish().unwrap();

    let err = TileDataset::load(&path, None, None).unwrap_err();
    assert!(matches!(err, TileDatasetError::MissingArray { name, .. } if name == VAL_IMAGES));
}

#[test]
fn corrupted_payload_fails_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.bin");
    write_fixture(&path, 2, 1);

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&path, bytes).unwrap();

    let err = TileContainer::open(&path).unwrap_err();
    assert!(matches!(err, TileDatasetError::ChecksumMismatch { .. }));
}

/// Assemble container bytes from a hand-built header, bypassing the writer's
/// size validation.
fn write_raw(path: &Path, header: &ContainerHeader, payload: &[u8]) {
    let json = serde_json::to_vec(header).unwrap();
    let mut bytes = Vec::new();
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&(json.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&json);
    bytes.extend_from_slice(payload);
    fs::write(path, bytes).unwrap();
}

#[test]
fn header_shape_exceeding_payload_is_rejected_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lying.bin");
    // Shape claims 100 rows of 4 bytes; only 8 payload bytes exist.
    let header = ContainerHeader {
        version: FORMAT_VERSION,
        created_at_ms: 0,
        endianness: Endianness::Little,
        arrays: vec![ArrayMeta {
            name: TRAIN_IMAGES.to_string(),
            dtype: ArrayDType::U8,
            shape: vec![100, 4],
            byte_offset: 0,
            byte_len: 8,
            checksum_sha256: None,
        }],
    };
    write_raw(&path, &header, &[0u8; 8]);

    let err = TileContainer::open(&path).unwrap_err();
    assert!(matches!(
        err,
        TileDatasetError::Truncated { name, .. } if name == TRAIN_IMAGES
    ));
}

#[test]
fn big_endian_container_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.bin");
    let header = ContainerHeader {
        version: FORMAT_VERSION,
        created_at_ms: 0,
        endianness: Endianness::Big,
        arrays: vec![ArrayMeta {
            name: TRAIN_IMAGES.to_string(),
            dtype: ArrayDType::U8,
            shape: vec![2, 4],
            byte_offset: 0,
            byte_len: 8,
            checksum_sha256: None,
        }],
    };
    write_raw(&path, &header, &[0u8; 8]);

    let err = TileContainer::open(&path).unwrap_err();
    assert!(matches!(err, TileDatasetError::UnsupportedEndianness { .. }));
}

#[test]
fn garbage_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.bin");
    fs::write(&path, b"definitely not a container").unwrap();
    let err = TileContainer::open(&path).unwrap_err();
    assert!(matches!(err, TileDatasetError::BadMagic { .. }));
}

#[test]
fn subset_is_a_deterministic_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiles.bin");
    write_fixture(&path, 20, 5);

    let a = TileDataset::load(&path, Some(20), None).unwrap();
    let b = TileDataset::load(&path, Some(20), None).unwrap();
    assert_eq!(a.rows(Split::Train), 16);
    assert_eq!(a.rows(Split::Val), 4);
    assert_eq!(a.labels(Split::Train), b.labels(Split::Train));
    assert_eq!(a.labels(Split::Val), b.labels(Split::Val));

    // Prefix of the full split, not a shuffle.
    let full = TileDataset::load(&path, None, None).unwrap();
    assert_eq!(
        a.labels(Split::Train),
        &full.labels(Split::Train)[..16]
    );
}

#[test]
fn subset_larger_than_stored_rows_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiles.bin");
    write_fixture(&path, 4, 1);
    let err = TileDataset::load(&path, Some(100), None).unwrap_err();
    assert!(matches!(err, TileDatasetError::SubsetOutOfRange { .. }));
}

#[test]
fn class_width_is_inferred_from_observed_labels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiles.bin");
    write_fixture(&path, 6, 2);
    let dataset = TileDataset::load(&path, None, None).unwrap();
    assert_eq!(dataset.num_classes(), 2);
}

#[test]
fn explicit_class_count_overrides_inference() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiles.bin");
    write_fixture(&path, 6, 2);
    let dataset = TileDataset::load(&path, None, Some(4)).unwrap();
    assert_eq!(dataset.num_classes(), 4);

    let err = TileDataset::load(&path, None, Some(1)).unwrap_err();
    assert!(matches!(err, TileDatasetError::LabelOutOfRange { .. }));
}

#[test]
fn negative_labels_are_rejected_without_explicit_classes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiles.bin");
    let mut writer = TileContainerWriter::create(&path);
    writer
        .add_u8_array(
            TRAIN_IMAGES,
            vec![2, H, W, C],
            [tile_pixels(0), tile_pixels(1)].concat(),
        )
        .add_f32_array(TRAIN_LABELS, vec![2], vec![0.0, -1.0])
        .add_u8_array(
            VAL_IMAGES,
            vec![2, H, W, C],
            [tile_pixels(2), tile_pixels(3)].concat(),
        )
        .add_f32_array(VAL_LABELS, vec![2], vec![0.0, 1.0]);
    writer.finish().unwrap();

    let err = TileDataset::load(&path, None, None).unwrap_err();
    assert!(matches!(
        err,
        TileDatasetError::LabelOutOfRange { label: -1, .. }
    ));
}

#[test]
fn mismatched_split_widths_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiles.bin");
    // Train labels only span class 0; val spans 0..2.
    let mut writer = TileContainerWriter::create(&path);
    writer
        .add_u8_array(TRAIN_IMAGES, vec![2, H, W, C], [tile_pixels(0), tile_pixels(1)].concat())
        .add_u8_array(TRAIN_LABELS, vec![2], vec![0, 0])
        .add_u8_array(VAL_IMAGES, vec![2, H, W, C], [tile_pixels(2), tile_pixels(3)].concat())
        .add_u8_array(VAL_LABELS, vec![2], vec![0, 1]);
    writer.finish().unwrap();

    let err = TileDataset::load(&path, None, None).unwrap_err();
    assert!(matches!(
        err,
        TileDatasetError::ClassMismatch { train: 1, val: 2 }
    ));
}

#[test]
fn batch_tensors_are_nchw_with_onehot_targets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiles.bin");
    write_fixture(&path, 5, 2);
    let dataset = TileDataset::load(&path, None, None).unwrap();

    let device = Default::default();
    let batch = load_batch::<TB>(&dataset, Split::Train, 0..3, &device).unwrap();
    assert_eq!(batch.images.dims(), [3, C, H, W]);
    assert_eq!(batch.targets.dims(), [3, 2]);

    let targets: Vec<f32> = batch.targets.into_data().to_vec().unwrap();
    // Labels alternate 0/1 in the fixture.
    assert_eq!(targets, vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0]);

    // HWC -> CHW: channel 1 of pixel 0 lands at the start of plane 1.
    let images: Vec<f32> = batch.images.into_data().to_vec().unwrap();
    assert!((images[H * W] - 1.0 / 255.0).abs() < 1e-6);
}
