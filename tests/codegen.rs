use ndfuse::{
    BaseArena, BaseId, BlockArena, Constant, DType, Emitter, ErrorKind, InstrId, Instruction,
    Layout, Opcode, View,
};

const CHUNK: usize = 2048;

fn cview(base: BaseId, shape: &[usize]) -> View {
    View::contiguous(base, shape)
}

fn build(batch: &mut Vec<Instruction>) -> (BlockArena, ndfuse::BlockId) {
    let mut blocks = BlockArena::new();
    let group: Vec<InstrId> = (0..batch.len()).map(InstrId).collect();
    let root = blocks.create_nested_block(batch, &group);
    (blocks, root)
}

fn source_of(arena: &BaseArena, batch: &mut Vec<Instruction>) -> String {
    let (blocks, root) = build(batch);
    let emitter = Emitter::new(&blocks, root, batch, arena, CHUNK).unwrap();
    emitter.generate_source().unwrap()
}

#[test]
fn nested_mode_collapses_outer_ranks() {
    let mut arena = BaseArena::new();
    let out = arena.create(DType::Float64, 24);
    let in1 = arena.create(DType::Float64, 24);
    let in2 = arena.create(DType::Float64, 24);
    let mut batch = vec![Instruction::new(
        Opcode::Add,
        vec![
            cview(out, &[2, 3, 4]),
            cview(in1, &[2, 3, 4]),
            cview(in2, &[2, 3, 4]),
        ],
        None,
    )];
    let src = source_of(&arena, &mut batch);

    assert!(src.contains("#pragma omp parallel for schedule(static) collapse(2)"));
    assert!(src.contains("#pragma omp simd"));
    assert!(src.contains("for (int64_t idx2 = 0; idx2 < iterspace_shape_d2; ++idx2)"));
    // walker pointers are offset over the non-axis ranks
    assert!(src.contains("a0_stride_d0*idx0"));
    assert!(src.contains("a0_stride_d1*idx1"));
    // the innermost contiguous access collapses to a plain subscript
    assert!(src.contains("a0[idx2] = (a1[idx2] + a2[idx2]);"));
    // distinct buffers are restrict-qualified
    assert!(src.contains("double *restrict a0"));
}

#[test]
fn single_rank_reduction_is_chunked_and_clause_annotated() {
    let mut arena = BaseArena::new();
    let s = arena.create(DType::Float64, 1);
    let x = arena.create(DType::Float64, 1000);
    let mut batch = vec![Instruction::new(
        Opcode::AddReduce,
        vec![View::whole_base(s, 1), View::whole_base(x, 1000), View::constant()],
        Some(Constant::Int64(0)),
    )];
    let src = source_of(&arena, &mut batch);

    assert!(src.contains("#pragma omp parallel"));
    assert!(src.contains("#pragma omp for schedule(static)"));
    assert!(src.contains("idx0_chunked += CHUNKSIZE"));
    assert!(src.contains("idx0_chunked_bound"));
    assert!(src.contains("#pragma omp simd reduction(+:acc0)"));
    // shared accumulator starts at the neutral element and is folded
    // atomically, then written back in the foot
    assert!(src.contains("double acc0_shar = 0;"));
    assert!(src.contains("#pragma omp atomic"));
    assert!(src.contains("*(buf0_data + a0_start) = acc0_shar;"));
}

#[test]
fn min_max_and_complex_folds_use_the_critical_section() {
    let mut arena = BaseArena::new();
    let s = arena.create(DType::Float64, 1);
    let x = arena.create(DType::Float64, 1000);
    let mut batch = vec![Instruction::new(
        Opcode::MaximumReduce,
        vec![View::whole_base(s, 1), View::whole_base(x, 1000), View::constant()],
        Some(Constant::Int64(0)),
    )];
    let src = source_of(&arena, &mut batch);
    assert!(src.contains("double acc0 = -DBL_MAX;"));
    assert!(src.contains("#pragma omp critical(accusync)"));
    // max has no reduction-clause token
    assert!(!src.contains("reduction("));

    let mut arena = BaseArena::new();
    let s = arena.create(DType::Complex128, 1);
    let z = arena.create(DType::Complex128, 16);
    let mut batch = vec![Instruction::new(
        Opcode::AddReduce,
        vec![View::whole_base(s, 1), View::whole_base(z, 16), View::constant()],
        Some(Constant::Int64(0)),
    )];
    let src = source_of(&arena, &mut batch);
    assert!(src.contains("#pragma omp critical(accusync)"));
    assert!(src.contains("double complex"));
}

#[test]
fn scan_is_sequential_and_writes_every_step() {
    let mut arena = BaseArena::new();
    let out = arena.create(DType::Int64, 100);
    let x = arena.create(DType::Int64, 100);
    let mut batch = vec![Instruction::new(
        Opcode::AddAccumulate,
        vec![View::whole_base(out, 100), View::whole_base(x, 100), View::constant()],
        Some(Constant::Int64(0)),
    )];
    let src = source_of(&arena, &mut batch);

    assert!(!src.contains("#pragma omp parallel"));
    assert!(!src.contains("#pragma omp simd"));
    assert!(src.contains("acc0 = (acc0 + a1[idx0]);"));
    assert!(src.contains("a0[idx0] = acc0;"));
}

#[test]
fn scalar_kernel_has_no_loop() {
    let mut arena = BaseArena::new();
    let out = arena.create(DType::Float64, 1);
    let in1 = arena.create(DType::Float64, 1);
    let mut batch = vec![Instruction::new(
        Opcode::Multiply,
        vec![View::whole_base(out, 1), View::whole_base(in1, 1), View::constant()],
        Some(Constant::Float64(3.5)),
    )];
    let src = source_of(&arena, &mut batch);

    assert!(!src.contains("for ("));
    assert!(src.contains("// LAYOUT: SCALAR"));
    // scalar output is copied to a local and written back
    assert!(src.contains("double a0 = *(buf0_data + a0_start);"));
    assert!(src.contains("*(buf0_data + a0_start) = a0;"));
    // the inline literal arrives through const_data
    assert!(src.contains("const double a2 = *(const double *) args[2]->const_data;"));
}

#[test]
fn gather_and_cond_scatter_subscripts() {
    let mut arena = BaseArena::new();
    let out = arena.create(DType::Float64, 4);
    let table = arena.create(DType::Float64, 100);
    let index = arena.create(DType::Int64, 4);
    let mut batch = vec![Instruction::new(
        Opcode::Gather,
        vec![cview(out, &[4]), View::whole_base(table, 100), cview(index, &[4])],
        None,
    )];
    let src = source_of(&arena, &mut batch);
    assert!(src.contains("a0[idx0] = *(buf1_data + a1_start + (int64_t) a2[idx0]);"));

    let mut arena = BaseArena::new();
    let out = arena.create(DType::Float64, 100);
    let input = arena.create(DType::Float64, 4);
    let index = arena.create(DType::Int64, 4);
    let mask = arena.create(DType::Bool, 4);
    let mut batch = vec![Instruction::new(
        Opcode::CondScatter,
        vec![
            View::whole_base(out, 100),
            cview(input, &[4]),
            cview(index, &[4]),
            cview(mask, &[4]),
        ],
        None,
    )];
    let src = source_of(&arena, &mut batch);
    assert!(src.contains("if (a3[idx0])"));
    assert!(src.contains("*(buf0_data + a0_start + (int64_t) a2[idx0]) = a1[idx0];"));
}

#[test]
fn range_and_random_generate_from_the_linear_index() {
    let mut arena = BaseArena::new();
    let out = arena.create(DType::Int64, 6);
    let mut batch = vec![Instruction::new(
        Opcode::Range,
        vec![View::whole_base(out, 6)],
        None,
    )];
    let src = source_of(&arena, &mut batch);
    assert!(src.contains("a0[idx0] = (int64_t) idx0;"));

    let mut arena = BaseArena::new();
    let out = arena.create(DType::UInt64, 6);
    let mut batch = vec![Instruction::new(
        Opcode::Random,
        vec![View::whole_base(out, 6), View::constant(), View::constant()],
        Some(Constant::Random123 { start: 7, key: 11 }),
    )];
    let src = source_of(&arena, &mut batch);
    assert!(src.contains("a0[idx0] = kp_random123(idx0, a1, a2);"));
    assert!(src.contains("const uint64_t a1 = *(const uint64_t *) args[1]->const_data;"));
}

#[test]
fn symbols_are_deterministic_and_type_sensitive() {
    let build_symbol = |dtype| {
        let mut arena = BaseArena::new();
        let out = arena.create(dtype, 8);
        let in1 = arena.create(dtype, 8);
        let in2 = arena.create(dtype, 8);
        let mut batch = vec![Instruction::new(
            Opcode::Add,
            vec![
                View::whole_base(out, 8),
                View::whole_base(in1, 8),
                View::whole_base(in2, 8),
            ],
            None,
        )];
        let (blocks, root) = build(&mut batch);
        let emitter = Emitter::new(&blocks, root, &batch, &arena, CHUNK).unwrap();
        emitter.symbol()
    };
    let a = build_symbol(DType::Float64);
    let b = build_symbol(DType::Float64);
    let c = build_symbol(DType::Float32);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.starts_with("KRN_"));
}

#[test]
fn source_is_written_under_the_symbol() {
    let dir = tempfile::tempdir().unwrap();
    let mut arena = BaseArena::new();
    let out = arena.create(DType::Int32, 8);
    let mut batch = vec![Instruction::new(
        Opcode::Range,
        vec![View::whole_base(out, 8)],
        None,
    )];
    let (blocks, root) = build(&mut batch);
    let emitter = Emitter::new(&blocks, root, &batch, &arena, CHUNK).unwrap();
    let (path, source) = emitter.write_source(dir.path()).unwrap();
    assert_eq!(path, dir.path().join(format!("{}.c", emitter.symbol())));
    assert_eq!(std::fs::read_to_string(path).unwrap(), source);
}

#[test]
fn strided_operands_dominate_the_iterspace_layout() {
    let mut arena = BaseArena::new();
    let out = arena.create(DType::Float64, 4);
    let in1 = arena.create(DType::Float64, 8);
    let mut batch = vec![Instruction::new(
        Opcode::Sqrt,
        vec![View::whole_base(out, 4), View::new(in1, 0, vec![4], vec![2])],
        None,
    )];
    let (blocks, root) = build(&mut batch);
    let emitter = Emitter::new(&blocks, root, &batch, &arena, CHUNK).unwrap();
    assert_eq!(emitter.iterspace().layout, Layout::Strided);
    let src = emitter.generate_source().unwrap();
    // strided innermost access multiplies by the stride constant
    assert!(src.contains("a1[idx0*a1_stride_d0]"));
}

#[test]
fn temporaries_contract_to_locals() {
    let mut arena = BaseArena::new();
    let t = arena.create(DType::Float64, 8);
    let out = arena.create(DType::Float64, 8);
    let x = arena.create(DType::Float64, 8);
    // t = sqrt(x); out = t + t -- t is born and dies inside the block
    let mut batch = vec![
        Instruction::new(
            Opcode::Sqrt,
            vec![View::whole_base(t, 8), View::whole_base(x, 8)],
            None,
        ),
        Instruction::new(
            Opcode::Add,
            vec![View::whole_base(out, 8), View::whole_base(t, 8), View::whole_base(t, 8)],
            None,
        ),
    ];
    let (mut blocks, root) = {
        let mut blocks = BlockArena::new();
        let group: Vec<InstrId> = (0..batch.len()).map(InstrId).collect();
        let root = blocks.create_nested_block(&mut batch, &group);
        (blocks, root)
    };
    {
        let l = blocks.get_mut(root).as_loop_mut().unwrap();
        l.news.insert(t);
        l.frees.insert(t);
    }
    let emitter = Emitter::new(&blocks, root, &batch, &arena, CHUNK).unwrap();
    let src = emitter.generate_source().unwrap();
    // the temporary never touches memory: a plain local, no buffer of its own
    assert!(src.contains("double a0;"));
    assert!(src.contains("// No unpacking needed."));
    assert_eq!(emitter.buffers().len(), 2);
}

#[test]
fn extension_opcodes_have_no_lowering() {
    let mut arena = BaseArena::new();
    let out = arena.create(DType::Float64, 8);
    let mut batch = vec![Instruction::new(
        Opcode::Extension(7),
        vec![View::whole_base(out, 8)],
        None,
    )];
    let (blocks, root) = build(&mut batch);
    let err = Emitter::new(&blocks, root, &batch, &arena, CHUNK).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownOperator);
}
