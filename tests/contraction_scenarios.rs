#![allow(missing_docs)]

//! End-to-end scenarios against the public engine API: matrix/tensor
//! contraction, summation, scaling and reduction, plus quantified
//! invariants (identity, linearity in alpha, beta-commutation, symmetry
//! preservation, home restoration).

use symtensor::engine::{contract, reduce, scale, sum, Operand, ReduceOp as EngineReduceOp, SymmetryStrategy};
use symtensor::error::Error;
use symtensor::messaging::{FixedMemoryReporter, SingleProcessGroup};
use symtensor::redistribute::IdentityRedistributor;
use symtensor::semiring::F64Semiring;
use symtensor::tensor::{SymMark, TensorMeta};
use symtensor::topology::Topology;

fn single_rank_topologies() -> Vec<Topology> {
    vec![Topology::new(&[1], 0)]
}

fn ample_memory() -> FixedMemoryReporter {
    FixedMemoryReporter { available: 1 << 24 }
}

#[test]
fn dense_matmul_matches_hand_computation() {
    let sr = F64Semiring;
    let mut a_meta = TensorMeta::new(vec![2, 3], vec![SymMark::NS; 2]);
    let mut b_meta = TensorMeta::new(vec![3, 2], vec![SymMark::NS; 2]);
    let mut c_meta = TensorMeta::new(vec![2, 2], vec![SymMark::NS; 2]);

    // A = [[1,2,3],[4,5,6]], B = [[7,8],[9,10],[11,12]]
    let a_data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let b_data = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
    let mut c_data = vec![0.0; 4];

    contract(
        &sr,
        &single_rank_topologies(),
        &SingleProcessGroup,
        &ample_memory(),
        &IdentityRedistributor,
        Operand { meta: &mut a_meta, labels: &['i', 'k'], data: &a_data },
        Operand { meta: &mut b_meta, labels: &['k', 'j'], data: &b_data },
        &mut c_meta,
        &['i', 'j'],
        &mut c_data,
        1.0,
        0.0,
        None,
    )
    .unwrap();

    // row 0: [1*7+2*9+3*11, 1*8+2*10+3*12] = [58, 64]
    // row 1: [4*7+5*9+6*11, 4*8+5*10+6*12] = [139, 154]
    assert_eq!(c_data, [58.0, 64.0, 139.0, 154.0]);
}

// Contracting a symmetric operand produces the same result whether the
// symmetric group is desymmetrized or expanded as a permutation sum.
#[test]
fn symmetric_operand_strategies_agree_and_match_dense_reference() {
    let sr = F64Semiring;
    // symmetric 3x3 A (dense form used as an independent reference)
    let mut a_sym_meta = TensorMeta::new(vec![3, 3], vec![SymMark::SY, SymMark::NS]);
    let mut a_dense_meta = TensorMeta::new(vec![3, 3], vec![SymMark::NS; 2]);
    let a_data = [1.0, 2.0, 3.0, 2.0, 4.0, 5.0, 3.0, 5.0, 6.0];
    let mut b_meta = TensorMeta::new(vec![3], vec![SymMark::NS]);
    let b_data = [2.0, 0.5, 1.0];

    let mut run_dense = || {
        let mut c_meta = TensorMeta::new(vec![3], vec![SymMark::NS]);
        let mut c_data = vec![0.0; 3];
        contract(
            &sr,
            &single_rank_topologies(),
            &SingleProcessGroup,
            &ample_memory(),
            &IdentityRedistributor,
            Operand { meta: &mut a_dense_meta, labels: &['i', 'j'], data: &a_data },
            Operand { meta: &mut b_meta, labels: &['i'], data: &b_data },
            &mut c_meta,
            &['j'],
            &mut c_data,
            1.0,
            0.0,
            None,
        )
        .unwrap();
        c_data
    };

    let mut run_symmetric = |strategy: SymmetryStrategy| {
        let mut c_meta = TensorMeta::new(vec![3], vec![SymMark::NS]);
        let mut c_data = vec![0.0; 3];
        contract(
            &sr,
            &single_rank_topologies(),
            &SingleProcessGroup,
            &ample_memory(),
            &IdentityRedistributor,
            Operand { meta: &mut a_sym_meta, labels: &['i', 'j'], data: &a_data },
            Operand { meta: &mut b_meta, labels: &['i'], data: &b_data },
            &mut c_meta,
            &['j'],
            &mut c_data,
            1.0,
            0.0,
            Some(strategy),
        )
        .unwrap();
        c_data
    };

    let dense = run_dense();
    let desym = run_symmetric(SymmetryStrategy::Desymmetrize);
    let perm_sum = run_symmetric(SymmetryStrategy::PermutationSum);

    assert_eq!(desym, dense);
    assert_eq!(perm_sum, dense);
}

// Antisymmetric operand: both strategies must still agree since the
// permutation-sum derivation holds the opposite-signed-coefficient
// cancellation for AS groups too.
#[test]
fn antisymmetric_operand_strategies_agree() {
    let sr = F64Semiring;
    // antisymmetric 3x3: only the upper triangle (i<j) is independent data,
    // but we supply the full antisymmetric dense array for the reference.
    let mut a_anti_meta = TensorMeta::new(vec![3, 3], vec![SymMark::AS, SymMark::NS]);
    let mut a_dense_meta = TensorMeta::new(vec![3, 3], vec![SymMark::NS; 2]);
    // A[i][j] = i - j (manifestly antisymmetric, A[i][i] = 0)
    let a_data = [0.0, -1.0, -2.0, 1.0, 0.0, -1.0, 2.0, 1.0, 0.0];
    let mut b_meta = TensorMeta::new(vec![3], vec![SymMark::NS]);
    let b_data = [1.0, 1.0, 1.0];

    let mut run_dense = || {
        let mut c_meta = TensorMeta::new(vec![3], vec![SymMark::NS]);
        let mut c_data = vec![0.0; 3];
        contract(
            &sr,
            &single_rank_topologies(),
            &SingleProcessGroup,
            &ample_memory(),
            &IdentityRedistributor,
            Operand { meta: &mut a_dense_meta, labels: &['i', 'j'], data: &a_data },
            Operand { meta: &mut b_meta, labels: &['i'], data: &b_data },
            &mut c_meta,
            &['j'],
            &mut c_data,
            1.0,
            0.0,
            None,
        )
        .unwrap();
        c_data
    };

    let mut run_antisym = |strategy: SymmetryStrategy| {
        let mut c_meta = TensorMeta::new(vec![3], vec![SymMark::NS]);
        let mut c_data = vec![0.0; 3];
        contract(
            &sr,
            &single_rank_topologies(),
            &SingleProcessGroup,
            &ample_memory(),
            &IdentityRedistributor,
            Operand { meta: &mut a_anti_meta, labels: &['i', 'j'], data: &a_data },
            Operand { meta: &mut b_meta, labels: &['i'], data: &b_data },
            &mut c_meta,
            &['j'],
            &mut c_data,
            1.0,
            0.0,
            Some(strategy),
        )
        .unwrap();
        c_data
    };

    let dense = run_dense();
    let desym = run_antisym(SymmetryStrategy::Desymmetrize);
    let perm_sum = run_antisym(SymmetryStrategy::PermutationSum);

    assert_eq!(desym, dense);
    assert_eq!(perm_sum, dense);
}

// C's home buffer is restored to its original layout after a contraction
// completes, exercised end to end through the public API rather than
// through HomeGuard directly.
#[test]
fn home_layout_is_intact_after_contraction() {
    let sr = F64Semiring;
    let mut a_meta = TensorMeta::new(vec![2, 2], vec![SymMark::NS; 2]);
    let mut b_meta = TensorMeta::new(vec![2, 2], vec![SymMark::NS; 2]);
    let mut c_meta = TensorMeta::new(vec![2, 2], vec![SymMark::NS; 2]);
    let home_mapping_before = c_meta.mapping().to_vec();

    let a_data = [1.0, 0.0, 0.0, 1.0];
    let b_data = [5.0, 6.0, 7.0, 8.0];
    let mut c_data = vec![0.0; 4];

    contract(
        &sr,
        &single_rank_topologies(),
        &SingleProcessGroup,
        &ample_memory(),
        &IdentityRedistributor,
        Operand { meta: &mut a_meta, labels: &['i', 'k'], data: &a_data },
        Operand { meta: &mut b_meta, labels: &['k', 'j'], data: &b_data },
        &mut c_meta,
        &['i', 'j'],
        &mut c_data,
        1.0,
        0.0,
        None,
    )
    .unwrap();

    assert!(c_meta.is_home());
    assert_eq!(c_meta.mapping(), home_mapping_before.as_slice());
    assert_eq!(c_data, [5.0, 6.0, 7.0, 8.0]);
}

// A declared symmetric group on C that a contraction uses asymmetrically
// (one member shared with A, the other a pure broadcast axis) must still
// come out symmetric, since the engine symmetrizes C's raw result back.
#[test]
fn broken_symmetry_on_c_is_restored_after_contraction() {
    let sr = F64Semiring;
    let mut a_meta = TensorMeta::new(vec![3], vec![SymMark::NS]);
    let mut b_meta = TensorMeta::new(vec![], vec![]);
    let mut c_meta = TensorMeta::new(vec![3, 3], vec![SymMark::SY, SymMark::NS]);

    let a_data = [1.0, 2.0, 3.0];
    let b_data = [4.0];
    let mut c_data = vec![0.0; 9];

    contract(
        &sr,
        &single_rank_topologies(),
        &SingleProcessGroup,
        &ample_memory(),
        &IdentityRedistributor,
        Operand { meta: &mut a_meta, labels: &['i'], data: &a_data },
        Operand { meta: &mut b_meta, labels: &[], data: &b_data },
        &mut c_meta,
        &['i', 'j'],
        &mut c_data,
        1.0,
        0.0,
        None,
    )
    .unwrap();

    for i in 0..3 {
        for j in 0..3 {
            assert_eq!(c_data[i * 3 + j], c_data[j * 3 + i], "C[{i},{j}] != C[{j},{i}]");
        }
    }
}

// Identity invariant: contracting against a Kronecker delta reproduces the
// other operand exactly.
#[test]
fn identity_contraction_reproduces_the_other_operand() {
    let sr = F64Semiring;
    let mut identity_meta = TensorMeta::new(vec![3, 3], vec![SymMark::NS; 2]);
    let identity_data = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    let mut a_meta = TensorMeta::new(vec![3], vec![SymMark::NS]);
    let a_data = [3.0, -2.0, 5.0];
    let mut c_meta = TensorMeta::new(vec![3], vec![SymMark::NS]);
    let mut c_data = vec![0.0; 3];

    contract(
        &sr,
        &single_rank_topologies(),
        &SingleProcessGroup,
        &ample_memory(),
        &IdentityRedistributor,
        Operand { meta: &mut identity_meta, labels: &['i', 'j'], data: &identity_data },
        Operand { meta: &mut a_meta, labels: &['j'], data: &a_data },
        &mut c_meta,
        &['i'],
        &mut c_data,
        1.0,
        0.0,
        None,
    )
    .unwrap();

    assert_eq!(c_data, a_data);
}

// Linearity in alpha: doubling alpha doubles the contribution.
#[test]
fn contraction_is_linear_in_alpha() {
    let sr = F64Semiring;
    let mut a_meta = TensorMeta::new(vec![2, 2], vec![SymMark::NS; 2]);
    let mut b_meta = TensorMeta::new(vec![2, 2], vec![SymMark::NS; 2]);
    let a_data = [1.0, 2.0, 3.0, 4.0];
    let b_data = [5.0, 6.0, 7.0, 8.0];

    let mut run = |alpha: f64| {
        let mut c_meta = TensorMeta::new(vec![2, 2], vec![SymMark::NS; 2]);
        let mut c_data = vec![0.0; 4];
        contract(
            &sr,
            &single_rank_topologies(),
            &SingleProcessGroup,
            &ample_memory(),
            &IdentityRedistributor,
            Operand { meta: &mut a_meta, labels: &['i', 'k'], data: &a_data },
            Operand { meta: &mut b_meta, labels: &['k', 'j'], data: &b_data },
            &mut c_meta,
            &['i', 'j'],
            &mut c_data,
            alpha,
            0.0,
            None,
        )
        .unwrap();
        c_data
    };

    let once = run(1.0);
    let doubled = run(2.0);
    for (o, d) in once.iter().zip(doubled.iter()) {
        assert!((d - 2.0 * o).abs() < 1e-12);
    }
}

// Beta-commutation: accumulating into a pre-populated C with beta=1 matches
// doing the contraction alone and adding the two results.
#[test]
fn beta_one_accumulates_onto_existing_c() {
    let sr = F64Semiring;
    let mut a_meta = TensorMeta::new(vec![2, 2], vec![SymMark::NS; 2]);
    let mut b_meta = TensorMeta::new(vec![2, 2], vec![SymMark::NS; 2]);
    let a_data = [1.0, 2.0, 3.0, 4.0];
    let b_data = [5.0, 6.0, 7.0, 8.0];
    let preexisting = vec![100.0, 200.0, 300.0, 400.0];

    let mut c_meta = TensorMeta::new(vec![2, 2], vec![SymMark::NS; 2]);
    let mut c_data = preexisting.clone();
    contract(
        &sr,
        &single_rank_topologies(),
        &SingleProcessGroup,
        &ample_memory(),
        &IdentityRedistributor,
        Operand { meta: &mut a_meta, labels: &['i', 'k'], data: &a_data },
        Operand { meta: &mut b_meta, labels: &['k', 'j'], data: &b_data },
        &mut c_meta,
        &['i', 'j'],
        &mut c_data,
        1.0,
        1.0,
        None,
    )
    .unwrap();

    let mut fresh_meta = TensorMeta::new(vec![2, 2], vec![SymMark::NS; 2]);
    let mut fresh_data = vec![0.0; 4];
    contract(
        &sr,
        &single_rank_topologies(),
        &SingleProcessGroup,
        &ample_memory(),
        &IdentityRedistributor,
        Operand { meta: &mut a_meta, labels: &['i', 'k'], data: &a_data },
        Operand { meta: &mut b_meta, labels: &['k', 'j'], data: &b_data },
        &mut fresh_meta,
        &['i', 'j'],
        &mut fresh_data,
        1.0,
        0.0,
        None,
    )
    .unwrap();

    for i in 0..4 {
        assert!((c_data[i] - (preexisting[i] + fresh_data[i])).abs() < 1e-12);
    }
}

// sum: B += alpha * A under a permuted label order (transpose-add).
#[test]
fn sum_with_transposed_labels_adds_the_transpose() {
    let sr = F64Semiring;
    let mut a_meta = TensorMeta::new(vec![2, 3], vec![SymMark::NS; 2]);
    let a_data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let mut b_meta = TensorMeta::new(vec![3, 2], vec![SymMark::NS; 2]);
    let mut b_data = vec![0.0; 6];

    sum(
        &sr,
        &IdentityRedistributor,
        Operand { meta: &mut a_meta, labels: &['i', 'j'], data: &a_data },
        1.0,
        0.0,
        &mut b_meta,
        &['j', 'i'],
        &mut b_data,
    )
    .unwrap();

    // B[j][i] = A[i][j], so B is the transpose of A's 2x3 shape read as 3x2
    assert_eq!(b_data, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
}

#[test]
fn scale_on_a_zero_edge_tensor_is_a_no_op() {
    let sr = F64Semiring;
    let meta = TensorMeta::new(vec![0, 3], vec![SymMark::NS; 2]);
    let mut data: Vec<f64> = vec![];
    scale(&sr, 5.0, &meta, &mut data);
    assert!(data.is_empty());
}

#[test]
fn reduce_rejects_order_statistics_on_empty_data() {
    let sr = F64Semiring;
    let meta = TensorMeta::new(vec![3], vec![SymMark::NS]);
    let empty: [f64; 0] = [];
    let result = reduce(&sr, &SingleProcessGroup, &meta, &empty, EngineReduceOp::Max);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

// Plan determinism: the same shapes/symmetry produce the same estimated
// cost across repeated calls.
#[test]
fn repeated_contractions_with_identical_shapes_produce_identical_plan_cost() {
    let sr = F64Semiring;
    let mut a_meta = TensorMeta::new(vec![4, 4], vec![SymMark::NS; 2]);
    let mut b_meta = TensorMeta::new(vec![4, 4], vec![SymMark::NS; 2]);
    let a_data = vec![1.0; 16];
    let b_data = vec![2.0; 16];

    let mut run = || {
        let mut c_meta = TensorMeta::new(vec![4, 4], vec![SymMark::NS; 2]);
        let mut c_data = vec![0.0; 16];
        let plan = contract(
            &sr,
            &single_rank_topologies(),
            &SingleProcessGroup,
            &ample_memory(),
            &IdentityRedistributor,
            Operand { meta: &mut a_meta, labels: &['i', 'k'], data: &a_data },
            Operand { meta: &mut b_meta, labels: &['k', 'j'], data: &b_data },
            &mut c_meta,
            &['i', 'j'],
            &mut c_data,
            1.0,
            0.0,
            None,
        )
        .unwrap()
        .unwrap();
        (plan.cost.memuse, c_data)
    };

    let (cost_1, data_1) = run();
    let (cost_2, data_2) = run();
    assert_eq!(cost_1, cost_2);
    assert_eq!(data_1, data_2);
}
