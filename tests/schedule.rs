use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ndfuse::{
    Backend, CompiledKernel, Constant, EngineError, FuseModel, Instruction, Opcode, Runtime,
    RuntimeConfig, View,
};

/// A backend that records every compiled source and every kernel call
/// instead of running native code.
#[derive(Clone, Default)]
struct RecordingBackend {
    compiled: Arc<AtomicUsize>,
    sources: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

impl Backend for RecordingBackend {
    fn compile_and_load(&self, source: &str, _symbol: &str) -> Result<CompiledKernel, EngineError> {
        self.compiled.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().unwrap().push(source.to_string());
        let calls = self.calls.clone();
        Ok(CompiledKernel::new(move |_args| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }
}

fn runtime(model: FuseModel) -> (Runtime, RecordingBackend, tempfile::TempDir) {
    let backend = RecordingBackend::default();
    let dir = tempfile::tempdir().unwrap();
    let mut config = RuntimeConfig::with_model(model);
    config.cache_dir = dir.path().to_path_buf();
    (Runtime::new(config, Box::new(backend.clone())), backend, dir)
}

fn add(out: View, in1: View, in2: View) -> Instruction {
    Instruction::new(Opcode::Add, vec![out, in1, in2], None)
}

fn mul_scalar(out: View, in1: View, factor: f64) -> Instruction {
    Instruction::new(
        Opcode::Multiply,
        vec![out, in1, View::constant()],
        Some(Constant::Float64(factor)),
    )
}

fn add_scalar(out: View, in1: View, term: f64) -> Instruction {
    Instruction::new(
        Opcode::Add,
        vec![out, in1, View::constant()],
        Some(Constant::Float64(term)),
    )
}

fn sum_all(out: View, input: View) -> Instruction {
    Instruction::new(
        Opcode::AddReduce,
        vec![out, input, View::constant()],
        Some(Constant::Int64(0)),
    )
}

#[test]
fn arange_fills_one_kernel_and_views_slice_it() {
    let (mut rt, backend, _dir) = runtime(FuseModel::Broadest);
    let a = rt.create_base(ndfuse::DType::Int64, 6);
    let batch = vec![Instruction::new(
        Opcode::Range,
        vec![View::whole_base(a, 6)],
        None,
    )];
    rt.execute(batch).unwrap();

    assert_eq!(backend.compiled.load(Ordering::SeqCst), 1);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    let sources = backend.sources.lock().unwrap();
    assert!(sources[0].contains("idx0"));

    // the buffer was materialised for the kernel
    assert!(rt.bases().get(a).has_data());

    // b = a.reshape([2, 3]); c = b[1] -- pure view arithmetic
    let b = View::contiguous(a, &[2, 3]);
    let c = View::new(a, b.start + 3, vec![3], vec![1]);
    assert_eq!(c.start, 3);
    assert_eq!(c.shape, vec![3]);
    assert_eq!(c.stride, vec![1]);
}

#[test]
fn stream_fuses_map_map_reduce_into_one_kernel() {
    let (mut rt, backend, _dir) = runtime(FuseModel::SameShapeStreamCreduce);
    let n = 1000;
    let x = rt.create_base(ndfuse::DType::Float64, n);
    let y0 = rt.create_base(ndfuse::DType::Float64, n);
    let y = rt.create_base(ndfuse::DType::Float64, n);
    let s = rt.create_base(ndfuse::DType::Float64, 1);

    let batch = vec![
        mul_scalar(View::whole_base(y0, n), View::whole_base(x, n), 2.0),
        add_scalar(View::whole_base(y, n), View::whole_base(y0, n), 1.0),
        sum_all(View::whole_base(s, 1), View::whole_base(y, n)),
    ];
    rt.execute(batch).unwrap();

    assert_eq!(backend.compiled.load(Ordering::SeqCst), 1);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    let sources = backend.sources.lock().unwrap();
    let src = &sources[0];
    assert!(src.contains("// MODE: FUSED"));
    assert!(src.contains("// NINSTR: 3"));
    // the elementwise pair streams into the reduction's accumulator
    assert!(src.contains("#pragma omp simd reduction(+:acc2)"));
    assert!(src.contains("acc2_shar"));
}

#[test]
fn scalar_separate_splits_the_reduction_off() {
    let (mut rt, backend, _dir) = runtime(FuseModel::NoXsweepScalarSeparate);
    let n = 1000;
    let x = rt.create_base(ndfuse::DType::Float64, n);
    let y0 = rt.create_base(ndfuse::DType::Float64, n);
    let y = rt.create_base(ndfuse::DType::Float64, n);
    let s = rt.create_base(ndfuse::DType::Float64, 1);

    let batch = vec![
        mul_scalar(View::whole_base(y0, n), View::whole_base(x, n), 2.0),
        add_scalar(View::whole_base(y, n), View::whole_base(y0, n), 1.0),
        sum_all(View::whole_base(s, 1), View::whole_base(y, n)),
    ];
    rt.execute(batch).unwrap();

    // elementwise kernel plus reduction kernel
    assert_eq!(backend.compiled.load(Ordering::SeqCst), 2);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn unaligned_hazard_lands_in_two_kernels() {
    let (mut rt, backend, _dir) = runtime(FuseModel::Broadest);
    let a = rt.create_base(ndfuse::DType::Float64, 8);
    let b = rt.create_base(ndfuse::DType::Float64, 5);

    // a[0:5] = 1; b = a[2:7] + 1
    let batch = vec![
        Instruction::new(
            Opcode::Identity,
            vec![View::new(a, 0, vec![5], vec![1]), View::constant()],
            Some(Constant::Float64(1.0)),
        ),
        add_scalar(View::whole_base(b, 5), View::new(a, 2, vec![5], vec![1]), 1.0),
    ];
    rt.execute(batch).unwrap();
    assert_eq!(backend.compiled.load(Ordering::SeqCst), 2);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn identical_batches_compile_once() {
    let (mut rt, backend, _dir) = runtime(FuseModel::Broadest);
    for _ in 0..10 {
        let x = rt.create_base(ndfuse::DType::Float64, 16);
        let y = rt.create_base(ndfuse::DType::Float64, 16);
        let z = rt.create_base(ndfuse::DType::Float64, 16);
        let batch = vec![add(
            View::whole_base(z, 16),
            View::whole_base(x, 16),
            View::whole_base(y, 16),
        )];
        rt.execute(batch).unwrap();
    }
    // ten executions, one compile: nine cache hits
    assert_eq!(backend.calls.load(Ordering::SeqCst), 10);
    assert_eq!(backend.compiled.load(Ordering::SeqCst), 1);
    assert_eq!(rt.compiled_kernels(), 1);
}

#[test]
fn grouping_is_deterministic() {
    for _ in 0..2 {
        let (mut rt, backend, _dir) = runtime(FuseModel::NoXsweep);
        let m = rt.create_base(ndfuse::DType::Float64, 6);
        let r0 = rt.create_base(ndfuse::DType::Float64, 3);
        let r1 = rt.create_base(ndfuse::DType::Float64, 2);
        let batch = vec![
            Instruction::new(
                Opcode::AddReduce,
                vec![
                    View::new(r0, 0, vec![3], vec![1]),
                    View::contiguous(m, &[2, 3]),
                    View::constant(),
                ],
                Some(Constant::Int64(0)),
            ),
            Instruction::new(
                Opcode::AddReduce,
                vec![
                    View::new(r1, 0, vec![2], vec![1]),
                    View::contiguous(m, &[2, 3]),
                    View::constant(),
                ],
                Some(Constant::Int64(1)),
            ),
        ];
        rt.execute(batch).unwrap();
        // cross-axis sweeps split under no_xsweep
        assert_eq!(backend.compiled.load(Ordering::SeqCst), 2);
    }
}

#[test]
fn free_releases_after_last_use() {
    let (mut rt, backend, _dir) = runtime(FuseModel::Broadest);
    let x = rt.create_base(ndfuse::DType::Float64, 8);
    let y = rt.create_base(ndfuse::DType::Float64, 8);
    let batch = vec![
        add_scalar(View::whole_base(x, 8), View::whole_base(y, 8), 1.0),
        Instruction::new(Opcode::Free, vec![View::whole_base(y, 8)], None),
    ];
    rt.execute(batch).unwrap();
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert!(rt.bases().get(x).has_data());
    assert!(!rt.bases().get(y).has_data());
}

#[test]
fn sync_only_batch_emits_nothing() {
    let (mut rt, backend, _dir) = runtime(FuseModel::Broadest);
    let x = rt.create_base(ndfuse::DType::Float64, 8);
    let batch = vec![Instruction::new(
        Opcode::Sync,
        vec![View::whole_base(x, 8)],
        None,
    )];
    rt.execute(batch).unwrap();
    assert_eq!(backend.compiled.load(Ordering::SeqCst), 0);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}
