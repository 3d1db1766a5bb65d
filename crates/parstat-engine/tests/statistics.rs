//! Engine integration tests against the deterministic host backend.

use parstat_backend::HostBackend;
use parstat_backend_api::ReduceOp;
use parstat_engine::{
    atomic_split_sum, bitonic_sort, compare, mean, minimum, maximum, reduce, run_statistics,
    std_dev, EngineError, ReducePlan, RunPlan, SortPlan, SumStrategy,
};

/// Deterministic pseudo-random dataset in `[0, 100)`.
fn lcg_dataset(n: usize, seed: u64) -> Vec<f32> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) % 100_000) as f32 / 1000.0
        })
        .collect()
}

fn host_mean(data: &[f32]) -> f64 {
    data.iter().map(|&v| v as f64).sum::<f64>() / data.len() as f64
}

fn host_std_dev(data: &[f32]) -> f64 {
    let m = host_mean(data);
    let sum_sq: f64 = data.iter().map(|&v| (v as f64 - m).powi(2)).sum();
    (sum_sq / data.len() as f64).sqrt()
}

#[test]
fn four_elements_two_per_group_produce_exact_statistics() {
    let backend = HostBackend::with_workgroup_size(2);
    let data = [1.0, 2.0, 3.0, 4.0];
    let plan = ReducePlan::optimized();

    let lo = minimum(&backend, &data, &plan).unwrap();
    let hi = maximum(&backend, &data, &plan).unwrap();
    assert_eq!(lo.value, 1.0);
    assert_eq!(hi.value, 4.0);

    // Group totals 3.0 and 7.0 split exactly, so both strategies agree.
    let m_multi = mean(&backend, &data, SumStrategy::MultiPass, &plan).unwrap();
    let m_atomic = mean(&backend, &data, SumStrategy::AtomicSplit, &plan).unwrap();
    assert_eq!(m_multi.value, 2.5);
    assert_eq!(m_atomic.value, 2.5);

    // Deviations [2.25, 0.25, 0.25, 2.25]; group totals of 2.5 split into
    // (2, 5) each, so even the atomic path reconstructs the exact sum.
    let expected_sd = 1.25f64.sqrt();
    let sd_multi = std_dev(&backend, &data, 2.5, SumStrategy::MultiPass, &plan).unwrap();
    let sd_atomic = std_dev(&backend, &data, 2.5, SumStrategy::AtomicSplit, &plan).unwrap();
    assert!((sd_multi.value - expected_sd).abs() < 1e-6);
    assert!((sd_atomic.value - expected_sd).abs() < 1e-6);
}

#[test]
fn multi_pass_reduction_matches_a_sequential_fold() {
    let backend = HostBackend::new();
    let data = lcg_dataset(1000, 7);

    let lo = reduce(&backend, &data, ReduceOp::Min, &ReducePlan::baseline()).unwrap();
    let hi = reduce(&backend, &data, ReduceOp::Max, &ReducePlan::baseline()).unwrap();
    let expected_lo = data.iter().copied().fold(f32::INFINITY, f32::min);
    let expected_hi = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    assert_eq!(lo.value, expected_lo);
    assert_eq!(hi.value, expected_hi);

    let total = reduce(&backend, &data, ReduceOp::Sum, &ReducePlan::baseline()).unwrap();
    let expected_sum: f64 = data.iter().map(|&v| v as f64).sum();
    assert!((total.value as f64 - expected_sum).abs() < 0.5);
}

#[test]
fn pass_budget_is_honoured_before_the_host_fold_takes_over() {
    let backend = HostBackend::with_workgroup_size(2);
    let data: Vec<f32> = (1..=32).map(|v| v as f32).collect();

    // 32 -> 16 -> 8 -> 4 within the budget, then 4 partials fold on the host.
    let reduced = reduce(&backend, &data, ReduceOp::Sum, &ReducePlan::optimized()).unwrap();
    assert_eq!(reduced.passes, 3);
    assert_eq!(reduced.value, (32 * 33 / 2) as f32);

    // The generous budget collapses all the way to a single value.
    let reduced = reduce(&backend, &data, ReduceOp::Sum, &ReducePlan::baseline()).unwrap();
    assert_eq!(reduced.passes, 5);
    assert_eq!(reduced.value, (32 * 33 / 2) as f32);
}

#[test]
fn atomic_split_sum_is_within_a_tenth_per_group() {
    let backend = HostBackend::new();
    let data = lcg_dataset(1000, 11);
    let groups = (data.len() + 31) / 32;

    let summed = atomic_split_sum(&backend, &data).unwrap();
    let expected: f64 = data.iter().map(|&v| v as f64).sum();
    assert!((summed.value - expected).abs() <= groups as f64 * 0.1 + 0.5);
}

#[test]
fn both_mean_strategies_agree_within_tolerance() {
    let backend = HostBackend::new();
    let data = lcg_dataset(1000, 13);
    let expected = host_mean(&data);

    let m_multi = mean(&backend, &data, SumStrategy::MultiPass, &ReducePlan::baseline()).unwrap();
    let m_atomic =
        mean(&backend, &data, SumStrategy::AtomicSplit, &ReducePlan::optimized()).unwrap();
    assert!((m_multi.value - expected).abs() < 0.05);
    assert!((m_atomic.value - expected).abs() < 0.05);
}

#[test]
fn both_deviation_strategies_agree_within_tolerance() {
    let backend = HostBackend::new();
    let data = lcg_dataset(1000, 17);
    let expected = host_std_dev(&data);
    let m = host_mean(&data);

    let sd_multi =
        std_dev(&backend, &data, m, SumStrategy::MultiPass, &ReducePlan::baseline()).unwrap();
    let sd_atomic =
        std_dev(&backend, &data, m, SumStrategy::AtomicSplit, &ReducePlan::optimized()).unwrap();
    assert!((sd_multi.value - expected).abs() < 0.1);
    assert!((sd_atomic.value - expected).abs() < 0.1);
}

#[test]
fn deviation_pass_discards_the_padded_tail() {
    // 33 elements force a padded group; the fill would contribute mean^2
    // per slot if it leaked into the deviation sum.
    let backend = HostBackend::new();
    let data = vec![10.0f32; 33];
    let sd = std_dev(&backend, &data, 10.0, SumStrategy::MultiPass, &ReducePlan::baseline())
        .unwrap();
    assert!(sd.value.abs() < 1e-6);
}

#[test]
fn empty_datasets_are_rejected_before_any_dispatch() {
    let backend = HostBackend::new();
    let plan = ReducePlan::optimized();
    assert!(matches!(
        reduce(&backend, &[], ReduceOp::Sum, &plan),
        Err(EngineError::Config(_))
    ));
    assert!(matches!(
        mean(&backend, &[], SumStrategy::AtomicSplit, &plan),
        Err(EngineError::Config(_))
    ));
    assert!(matches!(
        std_dev(&backend, &[], 0.0, SumStrategy::MultiPass, &plan),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn comparison_runs_both_plans_over_the_same_data() {
    let backend = HostBackend::new();
    let data = lcg_dataset(500, 23);

    let report = compare(&backend, &data).unwrap();
    assert_eq!(report.optimized.label, "optimized");
    assert_eq!(report.baseline.label, "baseline");
    assert_eq!(report.optimized.count, data.len());
    assert_eq!(report.baseline.count, data.len());
    assert_eq!(report.optimized.mean.value, report.baseline.mean.value);
    assert_eq!(report.optimized.minimum.value, report.baseline.minimum.value);
    assert_eq!(report.optimized.maximum.value, report.baseline.maximum.value);
    let delta = report.baseline.totals.overall_ns() as i64
        - report.optimized.totals.overall_ns() as i64;
    assert_eq!(report.saved_ns, delta);
}

#[test]
fn mean_goes_through_the_atomic_accumulator_in_both_plans() {
    let backend = HostBackend::new();
    let data = lcg_dataset(777, 37);

    let optimized = run_statistics(&backend, &data, &RunPlan::optimized()).unwrap();
    let baseline = run_statistics(&backend, &data, &RunPlan::baseline()).unwrap();
    assert_eq!(optimized.mean.value, baseline.mean.value);

    let expected = mean(&backend, &data, SumStrategy::AtomicSplit, &ReducePlan::optimized())
        .unwrap();
    assert_eq!(optimized.mean.value, expected.value);
}

#[test]
fn all_zero_dataset_yields_zero_statistics_under_both_plans() {
    let backend = HostBackend::new();
    let data = vec![0.0f32; 1000];
    for plan in [RunPlan::optimized(), RunPlan::baseline()] {
        let report = run_statistics(&backend, &data, &plan).unwrap();
        assert_eq!(report.mean.value, 0.0);
        assert_eq!(report.minimum.value, 0.0);
        assert_eq!(report.maximum.value, 0.0);
        assert_eq!(report.std_dev.value, 0.0);
    }
}

#[test]
fn repeated_runs_are_deterministic_on_the_host_backend() {
    let backend = HostBackend::new();
    let data = lcg_dataset(256, 29);
    let plan = RunPlan::optimized();

    let first = run_statistics(&backend, &data, &plan).unwrap();
    let second = run_statistics(&backend, &data, &plan).unwrap();
    assert_eq!(first.mean.value, second.mean.value);
    assert_eq!(first.minimum.value, second.minimum.value);
    assert_eq!(first.maximum.value, second.maximum.value);
    assert_eq!(first.std_dev.value, second.std_dev.value);
}

#[test]
fn sort_rejects_datasets_beyond_capacity() {
    let backend = HostBackend::new();
    let data = vec![0.0f32; 100];
    let plan = SortPlan { capacity: 64 };
    assert!(matches!(
        bitonic_sort(&backend, &data, &plan),
        Err(EngineError::CapacityExceeded {
            len: 100,
            capacity: 64
        })
    ));
}

#[test]
fn sort_orders_a_non_power_of_two_dataset() {
    let backend = HostBackend::new();
    let mut data = lcg_dataset(45, 31);
    let sorted = bitonic_sort(&backend, &data, &SortPlan::default()).unwrap();
    data.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(sorted.values, data);
}
