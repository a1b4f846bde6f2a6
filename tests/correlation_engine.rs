use approx::assert_abs_diff_eq;
use ndarray::{Array2, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rowcorr::layout::{SurfaceRow, VoxelRow};
use rowcorr::{
    BlockPlan, CorrelationEngine, CorrelationError, CorrelationOptions, CorrelationProgressObserver,
    CorrelationStage, DenseMatrix, MatrixSink, MatrixSource, NoopCorrelationProgress, Partition,
    RoiSelectors, RowLayout, SurfacePartition, ValidationError, VolumePartition, VolumeSelector,
    VolumeSpace,
};
use std::fmt;

// ========================================================================================
//                                      HELPERS
// ========================================================================================

fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-5.0f32..5.0))
}

fn run(source: DenseMatrix, options: &CorrelationOptions) -> Array2<f32> {
    let mut engine = CorrelationEngine::new(source, options).unwrap();
    let (rows, cols) = engine.output_shape();
    let mut sink = DenseMatrix::zeros(rows, cols);
    engine.run(&mut sink, &mut NoopCorrelationProgress).unwrap();
    sink.into_data()
}

fn run_roi(
    source: DenseMatrix,
    options: &CorrelationOptions,
    selectors: &RoiSelectors,
) -> (Array2<f32>, RowLayout) {
    let mut engine = CorrelationEngine::with_roi(source, options, selectors).unwrap();
    let (rows, cols) = engine.output_shape();
    let mut sink = DenseMatrix::zeros(rows, cols);
    engine.run(&mut sink, &mut NoopCorrelationProgress).unwrap();
    let layout = engine.output_layout().cloned().unwrap();
    (sink.into_data(), layout)
}

/// Weighted Pearson correlation computed directly in f64.
fn reference(a: &[f32], b: &[f32], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    let mean = |x: &[f32]| -> f64 {
        x.iter().zip(weights).map(|(&v, &w)| f64::from(v) * w).sum::<f64>() / total
    };
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for ((&x, &y), &w) in a.iter().zip(b).zip(weights) {
        let dx = f64::from(x) - ma;
        let dy = f64::from(y) - mb;
        cov += w * dx * dy;
        va += w * dx * dx;
        vb += w * dy * dy;
    }
    cov / (va.sqrt() * vb.sqrt())
}

fn assert_exactly_symmetric(out: &Array2<f32>) {
    let n = out.nrows();
    assert_eq!(out.ncols(), n);
    for i in 0..n {
        for j in 0..n {
            assert_eq!(out[[i, j]], out[[j, i]], "asymmetry at ({i}, {j})");
        }
    }
}

fn four_by_three() -> DenseMatrix {
    DenseMatrix::new(array![
        [1.0f32, 2.0, 3.0],
        [2.0, 4.0, 6.0],
        [3.0, 2.0, 1.0],
        [5.0, 1.0, 9.0],
    ])
}

fn threads(n: usize) -> CorrelationOptions {
    CorrelationOptions {
        threads: Some(n),
        ..Default::default()
    }
}

// ========================================================================================
//                                 CORE CORRELATION
// ========================================================================================

#[test]
fn four_by_three_scenario() {
    let out = run(four_by_three(), &threads(2));
    assert_eq!(out.dim(), (4, 4));
    assert_abs_diff_eq!(out[[0, 1]], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(out[[0, 2]], -1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(out[[1, 2]], -1.0, epsilon = 1e-6);
    for i in 0..4 {
        assert_eq!(out[[i, i]], 1.0);
    }
    assert_exactly_symmetric(&out);

    let data = four_by_three().into_data();
    let expected = reference(
        data.row(0).as_slice().unwrap(),
        data.row(3).as_slice().unwrap(),
        &[1.0; 3],
    );
    assert_abs_diff_eq!(f64::from(out[[0, 3]]), expected, epsilon = 1e-6);
}

#[test]
fn random_matrix_matches_reference() {
    let data = random_matrix(37, 23, 7);
    let out = run(DenseMatrix::new(data.clone()), &threads(4));
    assert_exactly_symmetric(&out);

    let ones = vec![1.0; 23];
    for i in 0..37 {
        assert_eq!(out[[i, i]], 1.0);
        for j in 0..37 {
            let r = out[[i, j]];
            assert!((-1.0..=1.0).contains(&r));
            if i != j {
                let expected = reference(
                    data.row(i).as_slice().unwrap(),
                    data.row(j).as_slice().unwrap(),
                    &ones,
                );
                assert_abs_diff_eq!(f64::from(r), expected, epsilon = 1e-5);
            }
        }
    }
}

#[test]
fn fisher_z_output_is_finite() {
    let data = random_matrix(12, 9, 11);
    let plain = run(DenseMatrix::new(data.clone()), &threads(3));
    let options = CorrelationOptions {
        fisher_z: true,
        threads: Some(3),
        ..Default::default()
    };
    let z = run(DenseMatrix::new(data), &options);
    assert_exactly_symmetric(&z);
    for i in 0..12 {
        assert!(z[[i, i]].is_finite());
        assert!(z[[i, i]] > 7.0);
        for j in 0..12 {
            assert!(z[[i, j]].is_finite());
            if i != j {
                assert_abs_diff_eq!(z[[i, j]], plain[[i, j]].atanh(), epsilon = 1e-4);
            }
        }
    }

    // Perfectly correlated distinct rows hit the clamp too.
    let z = run(four_by_three(), &CorrelationOptions {
        fisher_z: true,
        ..Default::default()
    });
    assert!(z[[0, 1]].is_finite() && z[[0, 1]] > 7.0);
    assert!(z[[0, 2]].is_finite() && z[[0, 2]] < -7.0);
}

#[test]
fn zero_variance_rows_correlate_to_zero() {
    let source = DenseMatrix::new(array![
        [1.0f32, 2.0, 3.0],
        [4.0, 4.0, 4.0],
        [3.0, 1.0, 2.0],
    ]);
    let out = run(source, &threads(2));
    assert_eq!(out[[1, 1]], 1.0);
    for j in [0, 2] {
        assert_eq!(out[[1, j]], 0.0);
        assert_eq!(out[[j, 1]], 0.0);
    }
}

// ========================================================================================
//                                      WEIGHTS
// ========================================================================================

#[test]
fn binary_weights_drop_columns() {
    let options = CorrelationOptions {
        weights: Some(vec![1.0, 0.0, 1.0]),
        threads: Some(2),
        ..Default::default()
    };
    let out = run(four_by_three(), &options);
    assert_exactly_symmetric(&out);

    let data = four_by_three().into_data();
    let two_columns: Vec<[f32; 2]> = data.rows().into_iter().map(|r| [r[0], r[2]]).collect();
    for i in 0..4 {
        for j in 0..4 {
            if i == j {
                continue;
            }
            let expected = reference(&two_columns[i], &two_columns[j], &[1.0, 1.0]);
            assert_abs_diff_eq!(f64::from(out[[i, j]]), expected, epsilon = 1e-6);
        }
    }
}

#[test]
fn general_weights_match_weighted_pearson() {
    let data = random_matrix(15, 8, 3);
    let weights = vec![0.5f32, 2.0, 0.0, 1.0, 3.5, 0.25, 1.0, 0.0];
    let options = CorrelationOptions {
        weights: Some(weights.clone()),
        threads: Some(3),
        ..Default::default()
    };
    let out = run(DenseMatrix::new(data.clone()), &options);
    assert_exactly_symmetric(&out);

    let w: Vec<f64> = weights.iter().map(|&v| f64::from(v)).collect();
    for i in 0..15 {
        for j in (i + 1)..15 {
            let expected = reference(
                data.row(i).as_slice().unwrap(),
                data.row(j).as_slice().unwrap(),
                &w,
            );
            assert_abs_diff_eq!(f64::from(out[[i, j]]), expected, epsilon = 1e-5);
        }
    }
}

#[test]
fn all_ones_weights_equal_unweighted() {
    let data = random_matrix(20, 6, 5);
    let unweighted = run(DenseMatrix::new(data.clone()), &threads(2));
    let weighted = run(
        DenseMatrix::new(data),
        &CorrelationOptions {
            weights: Some(vec![1.0; 6]),
            threads: Some(2),
            ..Default::default()
        },
    );
    for (a, b) in unweighted.iter().zip(weighted.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
}

// ========================================================================================
//                                  MEMORY BUDGETING
// ========================================================================================

#[test]
fn one_row_blocks_match_a_single_block() {
    let data = random_matrix(25, 14, 21);

    let unlimited = CorrelationEngine::new(DenseMatrix::new(data.clone()), &threads(3)).unwrap();
    assert_eq!(unlimited.plan().rows_per_block, 25);
    assert!(unlimited.plan().cache_full_input);
    let single = run(DenseMatrix::new(data.clone()), &threads(3));

    let tight = CorrelationOptions {
        memory_limit_gb: Some(0.0),
        threads: Some(3),
        ..Default::default()
    };
    let engine = CorrelationEngine::new(DenseMatrix::new(data.clone()), &tight).unwrap();
    assert_eq!(engine.plan().rows_per_block, 1);
    assert!(!engine.plan().cache_full_input);
    let per_row = run(DenseMatrix::new(data), &tight);

    assert_exactly_symmetric(&per_row);
    for (a, b) in single.iter().zip(per_row.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
}

#[test]
fn streaming_blocks_of_several_rows_match() {
    let data = random_matrix(40, 10, 8);
    let single = run(DenseMatrix::new(data.clone()), &threads(2));

    // Room for a handful of output rows once the resident input and fixed costs are
    // paid, but not for a full cache.
    let input_bytes = 40.0 * 10.0 * 4.0;
    let options = CorrelationOptions {
        memory_limit_gb: Some((input_bytes * 1.5 + 4096.0) / (1024.0 * 1024.0 * 1024.0)),
        threads: Some(2),
        full_cache_fraction: 0.01,
        ..Default::default()
    };
    let engine = CorrelationEngine::new(DenseMatrix::new(data.clone()), &options).unwrap();
    let plan = engine.plan();
    assert!(!plan.cache_full_input);
    assert!(plan.rows_per_block > 1 && plan.rows_per_block < 40);

    let blocked = run(DenseMatrix::new(data), &options);
    assert_exactly_symmetric(&blocked);
    for (a, b) in single.iter().zip(blocked.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
}

/// Walks the memory limit upward until the plan caches the whole input but still needs
/// several blocks for `output_rows` rows. `step_bytes` must stay below one output row.
fn cached_multi_block_options(
    output_rows: usize,
    step_bytes: usize,
    plan_for: impl Fn(&CorrelationOptions) -> BlockPlan,
) -> CorrelationOptions {
    for step in 1..10_000 {
        let options = CorrelationOptions {
            memory_limit_gb: Some((step * step_bytes) as f64 / (1024.0 * 1024.0 * 1024.0)),
            threads: Some(2),
            full_cache_fraction: 1.0,
            ..Default::default()
        };
        let plan = plan_for(&options);
        if plan.cache_full_input && plan.rows_per_block > 1 && plan.rows_per_block < output_rows {
            return options;
        }
    }
    panic!("no memory limit caches the input across several blocks");
}

#[test]
fn cached_input_is_reused_across_blocks() {
    let data = random_matrix(40, 10, 8);
    let single = run(DenseMatrix::new(data.clone()), &threads(2));

    // One output row is 40 * 4 bytes.
    let options = cached_multi_block_options(40, 80, |options| {
        CorrelationEngine::new(DenseMatrix::new(data.clone()), options)
            .unwrap()
            .plan()
    });
    let mut engine = CorrelationEngine::new(DenseMatrix::new(data), &options).unwrap();
    assert!(engine.plan().block_count(40) > 1);

    let mut progress = RecordingProgress::default();
    let mut sink = DenseMatrix::zeros(40, 40);
    engine.run(&mut sink, &mut progress).unwrap();
    let blocked = sink.into_data();

    assert!(progress.events.contains(&(CorrelationStage::InputCaching, "start", 40)));
    assert_exactly_symmetric(&blocked);
    for (a, b) in single.iter().zip(blocked.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Vec<(CorrelationStage, &'static str, usize)>,
}

impl CorrelationProgressObserver for RecordingProgress {
    fn on_stage_start(&mut self, stage: CorrelationStage, total_rows: usize) {
        self.events.push((stage, "start", total_rows));
    }
    fn on_stage_advance(&mut self, stage: CorrelationStage, processed_rows: usize) {
        self.events.push((stage, "advance", processed_rows));
    }
    fn on_stage_finish(&mut self, stage: CorrelationStage) {
        self.events.push((stage, "finish", 0));
    }
}

#[test]
fn progress_is_reported_per_block() {
    let options = CorrelationOptions {
        memory_limit_gb: Some(0.0),
        threads: Some(2),
        ..Default::default()
    };
    let mut engine = CorrelationEngine::new(four_by_three(), &options).unwrap();
    let mut sink = DenseMatrix::zeros(4, 4);
    let mut progress = RecordingProgress::default();
    engine.run(&mut sink, &mut progress).unwrap();

    use CorrelationStage::BlockCompute;
    assert_eq!(
        progress.events,
        vec![
            (BlockCompute, "start", 4),
            (BlockCompute, "advance", 1),
            (BlockCompute, "advance", 2),
            (BlockCompute, "advance", 3),
            (BlockCompute, "advance", 4),
            (BlockCompute, "finish", 0),
        ]
    );

    let mut cached = CorrelationEngine::new(four_by_three(), &threads(2)).unwrap();
    let mut progress = RecordingProgress::default();
    cached.run(&mut sink, &mut progress).unwrap();
    assert_eq!(progress.events[0], (CorrelationStage::InputCaching, "start", 4));
    assert_eq!(progress.events[2], (CorrelationStage::InputCaching, "finish", 0));
}

#[test]
fn run_can_be_repeated() {
    let data = random_matrix(10, 5, 2);
    let options = CorrelationOptions {
        memory_limit_gb: Some(0.0),
        threads: Some(2),
        ..Default::default()
    };
    let mut engine = CorrelationEngine::new(DenseMatrix::new(data), &options).unwrap();
    let mut first = DenseMatrix::zeros(10, 10);
    let mut second = DenseMatrix::zeros(10, 10);
    engine.run(&mut first, &mut NoopCorrelationProgress).unwrap();
    engine.run(&mut second, &mut NoopCorrelationProgress).unwrap();
    assert_eq!(first.data(), second.data());
}

// ========================================================================================
//                                 REGIONS OF INTEREST
// ========================================================================================

fn space() -> VolumeSpace {
    VolumeSpace {
        dims: [3, 1, 1],
        sform: [[2.0, 0.0, 0.0, -10.0], [0.0, 2.0, 0.0, 0.0], [0.0, 0.0, 2.0, 0.0]],
    }
}

/// Rows 4,1,6 are CORTEX_LEFT vertices 0,1,3; rows 0,5 are CORTEX_RIGHT vertices 1,0;
/// rows 3,2 are voxels (2,0,0) and (0,0,0).
fn layout() -> RowLayout {
    RowLayout {
        volume_space: Some(space()),
        partitions: vec![
            Partition::Surface(SurfacePartition {
                structure: "CORTEX_LEFT".into(),
                vertex_count: 4,
                rows: vec![
                    SurfaceRow { row: 4, vertex: 0 },
                    SurfaceRow { row: 1, vertex: 1 },
                    SurfaceRow { row: 6, vertex: 3 },
                ],
            }),
            Partition::Volume(VolumePartition {
                structure: "THALAMUS_LEFT".into(),
                rows: vec![
                    VoxelRow { row: 3, ijk: [2, 0, 0] },
                    VoxelRow { row: 2, ijk: [0, 0, 0] },
                ],
            }),
            Partition::Surface(SurfacePartition {
                structure: "CORTEX_RIGHT".into(),
                vertex_count: 2,
                rows: vec![SurfaceRow { row: 0, vertex: 1 }, SurfaceRow { row: 5, vertex: 0 }],
            }),
        ],
    }
}

fn select_everything() -> RoiSelectors {
    RoiSelectors::default()
        .with_surface("CORTEX_LEFT", vec![1.0; 4])
        .with_surface("CORTEX_RIGHT", vec![1.0; 2])
        .with_volume(VolumeSelector {
            space: space(),
            values: vec![1.0; 3],
        })
}

#[test]
fn roi_selecting_everything_reorders_the_full_matrix() {
    let data = random_matrix(7, 11, 13);
    let full = run(DenseMatrix::new(data.clone()), &threads(2));

    let source = DenseMatrix::new(data).with_layout(layout());
    let (out, out_layout) = run_roi(source, &threads(2), &select_everything());
    assert_eq!(out.dim(), (7, 7));

    // Surfaces first in layout order, then volumes.
    let order = [4, 1, 6, 0, 5, 3, 2];
    for (compact, &original) in order.iter().enumerate() {
        for col in 0..7 {
            assert_eq!(out[[compact, col]], full[[original, col]]);
        }
    }
    assert_eq!(out_layout.row_count(), 7);
    assert_eq!(out_layout.partitions[0].structure(), "CORTEX_LEFT");
    assert_eq!(out_layout.partitions[1].structure(), "CORTEX_RIGHT");
    assert_eq!(out_layout.partitions[2].structure(), "THALAMUS_LEFT");
}

#[test]
fn roi_subset_matches_the_selected_rows() {
    let data = random_matrix(7, 9, 17);
    let full = run(DenseMatrix::new(data.clone()), &threads(2));

    let selectors = RoiSelectors::default()
        .with_surface("CORTEX_LEFT", vec![0.0, 1.0, 0.0, 0.5])
        .with_volume(VolumeSelector {
            space: space(),
            values: vec![0.0, 0.0, 2.0],
        });
    for limit in [None, Some(0.0)] {
        let options = CorrelationOptions {
            memory_limit_gb: limit,
            threads: Some(3),
            ..Default::default()
        };
        let source = DenseMatrix::new(data.clone()).with_layout(layout());
        let (out, out_layout) = run_roi(source, &options, &selectors);
        assert_eq!(out.dim(), (3, 7));

        for (compact, original) in [1, 6, 3].into_iter().enumerate() {
            assert_eq!(out[[compact, original]], 1.0);
            for col in 0..7 {
                assert_abs_diff_eq!(out[[compact, col]], full[[original, col]], epsilon = 1e-6);
            }
        }
        assert_eq!(out_layout.partitions.len(), 2);
        assert_eq!(out_layout.volume_space, Some(space()));
    }
}

#[test]
fn roi_with_cached_input_spans_several_blocks() {
    let data = random_matrix(7, 11, 29);
    let (single, _) = run_roi(
        DenseMatrix::new(data.clone()).with_layout(layout()),
        &threads(2),
        &select_everything(),
    );

    // One output row is 7 * 4 bytes.
    let options = cached_multi_block_options(7, 8, |options| {
        let source = DenseMatrix::new(data.clone()).with_layout(layout());
        CorrelationEngine::with_roi(source, options, &select_everything())
            .unwrap()
            .plan()
    });
    let source = DenseMatrix::new(data).with_layout(layout());
    let (blocked, blocked_layout) = run_roi(source, &options, &select_everything());

    assert_eq!(blocked_layout.row_count(), 7);
    for (a, b) in single.iter().zip(blocked.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
    for (compact, original) in [4, 1, 6, 0, 5, 3, 2].into_iter().enumerate() {
        assert_eq!(blocked[[compact, original]], 1.0);
    }
}

// ========================================================================================
//                            VALIDATION AND FAILURE MODES
// ========================================================================================

/// A source whose rows must never be touched.
struct UntouchableSource {
    layout: Option<RowLayout>,
}

#[derive(Debug)]
struct Untouched;

impl fmt::Display for Untouched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("untouched")
    }
}

impl std::error::Error for Untouched {}

impl MatrixSource for UntouchableSource {
    type Error = Untouched;

    fn n_rows(&self) -> usize {
        7
    }

    fn n_cols(&self) -> usize {
        3
    }

    fn read_row(&mut self, index: usize, _out: &mut [f32]) -> Result<(), Self::Error> {
        panic!("row {index} was read during validation");
    }

    fn layout(&self) -> Option<&RowLayout> {
        self.layout.as_ref()
    }
}

fn untouchable() -> UntouchableSource {
    UntouchableSource {
        layout: Some(layout()),
    }
}

fn validation_error<T>(result: Result<T, CorrelationError>) -> ValidationError {
    match result {
        Err(CorrelationError::Validation(err)) => err,
        Err(other) => panic!("expected a validation error, got {other}"),
        Ok(_) => panic!("expected a validation error"),
    }
}

#[test]
fn invalid_inputs_fail_before_any_row_is_read() {
    let negative_limit = CorrelationOptions {
        memory_limit_gb: Some(-1.0),
        ..Default::default()
    };
    assert!(matches!(
        validation_error(CorrelationEngine::new(untouchable(), &negative_limit)),
        ValidationError::InvalidMemoryLimit(_)
    ));

    let short_weights = CorrelationOptions {
        weights: Some(vec![1.0, 1.0]),
        ..Default::default()
    };
    assert!(matches!(
        validation_error(CorrelationEngine::new(untouchable(), &short_weights)),
        ValidationError::WeightCountMismatch { expected: 3, found: 2 }
    ));

    let negative_weight = CorrelationOptions {
        weights: Some(vec![1.0, -0.5, 1.0]),
        ..Default::default()
    };
    assert!(matches!(
        validation_error(CorrelationEngine::new(untouchable(), &negative_weight)),
        ValidationError::NegativeWeight { column: 1, .. }
    ));

    let short_roi = RoiSelectors::default().with_surface("CORTEX_RIGHT", vec![1.0; 3]);
    assert!(matches!(
        validation_error(CorrelationEngine::with_roi(
            untouchable(),
            &CorrelationOptions::default(),
            &short_roi
        )),
        ValidationError::SurfaceSelectorLength { expected: 2, found: 3, .. }
    ));

    let nothing = RoiSelectors::default().with_surface("CORTEX_RIGHT", vec![0.0; 2]);
    assert!(matches!(
        validation_error(CorrelationEngine::with_roi(
            untouchable(),
            &CorrelationOptions::default(),
            &nothing
        )),
        ValidationError::EmptyRoiSelection
    ));

    assert!(matches!(
        validation_error(CorrelationEngine::with_roi(
            UntouchableSource { layout: None },
            &CorrelationOptions::default(),
            &select_everything()
        )),
        ValidationError::MissingLayout
    ));

    let mut overlapping = layout();
    if let Partition::Surface(right) = &mut overlapping.partitions[2] {
        right.rows[0].row = 1;
    }
    assert!(matches!(
        validation_error(CorrelationEngine::with_roi(
            UntouchableSource {
                layout: Some(overlapping)
            },
            &CorrelationOptions::default(),
            &select_everything()
        )),
        ValidationError::LayoutRowDuplicated { row: 1, .. }
    ));

    assert!(matches!(
        validation_error(CorrelationEngine::new(untouchable(), &threads(0))),
        ValidationError::InvalidThreadCount
    ));

    // A valid configuration also reads nothing until `run`.
    let engine = CorrelationEngine::new(untouchable(), &threads(2)).unwrap();
    assert_eq!(engine.output_shape(), (7, 7));
    assert_eq!(engine.worker_count(), 2);
}

#[test]
fn empty_matrix_is_rejected() {
    let empty = DenseMatrix::zeros(0, 3);
    assert!(matches!(
        validation_error(CorrelationEngine::new(empty, &CorrelationOptions::default())),
        ValidationError::EmptyMatrix { rows: 0, cols: 3 }
    ));
}

#[derive(Debug)]
struct SinkFull;

impl fmt::Display for SinkFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sink is full")
    }
}

impl std::error::Error for SinkFull {}

struct FailingSink;

impl MatrixSink for FailingSink {
    type Error = SinkFull;

    fn write_row(&mut self, _index: usize, _values: &[f32]) -> Result<(), Self::Error> {
        Err(SinkFull)
    }
}

#[test]
fn sink_failures_abort_the_run() {
    let mut engine = CorrelationEngine::new(four_by_three(), &threads(2)).unwrap();
    let err = engine
        .run(&mut FailingSink, &mut NoopCorrelationProgress)
        .unwrap_err();
    assert!(matches!(err, CorrelationError::Sink(_)));
    assert!(!err.is_validation());
    assert!(!err.is_internal());
}
