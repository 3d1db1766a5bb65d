//! Full statistics runs and the optimized-versus-baseline comparison.

use log::info;
use serde::Serialize;

use parstat_backend_api::{ComputeBackend, DeviceInfo};

use crate::driver::ReducePlan;
use crate::error::Result;
use crate::stats::{self, StatisticResult, SumStrategy};
use crate::timing::TimingTotals;

/// How one run computes its statistics: the pass budget for tree reductions
/// and the strategy used for the deviation sum. The mean is always the
/// atomic split sum; only the standard deviation varies between plans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub label: &'static str,
    pub reduce: ReducePlan,
    pub sd_strategy: SumStrategy,
}

impl RunPlan {
    /// Tight pass budget, the deviation sum collapsed into a single atomic
    /// dispatch.
    pub fn optimized() -> Self {
        Self {
            label: "optimized",
            reduce: ReducePlan::optimized(),
            sd_strategy: SumStrategy::AtomicSplit,
        }
    }

    /// Generous pass budget, the deviation sum iterated through tree
    /// reduction.
    pub fn baseline() -> Self {
        Self {
            label: "baseline",
            reduce: ReducePlan::baseline(),
            sd_strategy: SumStrategy::MultiPass,
        }
    }
}

/// One statistic's value plus its timing breakdown.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatisticSummary {
    pub value: f64,
    pub kernel_ns: u64,
    pub write_ns: u64,
    pub read_ns: u64,
}

impl From<StatisticResult> for StatisticSummary {
    fn from(result: StatisticResult) -> Self {
        Self {
            value: result.value,
            kernel_ns: result.timing.kernel_ns,
            write_ns: result.timing.write_ns,
            read_ns: result.timing.read_ns,
        }
    }
}

/// Everything one run produced: the four statistics and the run totals.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub label: &'static str,
    pub device: DeviceInfo,
    pub count: usize,
    pub mean: StatisticSummary,
    pub minimum: StatisticSummary,
    pub maximum: StatisticSummary,
    pub std_dev: StatisticSummary,
    pub totals: TimingTotals,
}

/// The two runs side by side, with the time the optimized plan saved.
/// `saved_ns` is negative when the optimized plan was slower.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub optimized: RunReport,
    pub baseline: RunReport,
    pub saved_ns: i64,
}

/// Compute mean, minimum, maximum and standard deviation over `data` under
/// one plan. The mean is computed first and fed into the deviation pass.
pub fn run_statistics(
    backend: &dyn ComputeBackend,
    data: &[f32],
    plan: &RunPlan,
) -> Result<RunReport> {
    info!(
        "statistics run '{}' over {} elements (max {} passes)",
        plan.label,
        data.len(),
        plan.reduce.max_passes
    );
    let mut totals = TimingTotals::default();

    let mean = stats::mean(backend, data, SumStrategy::AtomicSplit, &plan.reduce)?;
    totals.absorb(mean.timing);
    let minimum = stats::minimum(backend, data, &plan.reduce)?;
    totals.absorb(minimum.timing);
    let maximum = stats::maximum(backend, data, &plan.reduce)?;
    totals.absorb(maximum.timing);
    let std_dev = stats::std_dev(backend, data, mean.value, plan.sd_strategy, &plan.reduce)?;
    totals.absorb(std_dev.timing);

    Ok(RunReport {
        label: plan.label,
        device: backend.device_info(),
        count: data.len(),
        mean: mean.into(),
        minimum: minimum.into(),
        maximum: maximum.into(),
        std_dev: std_dev.into(),
        totals,
    })
}

/// Run the optimized plan and the baseline plan over the same dataset and
/// report the difference in overall device time.
pub fn compare(backend: &dyn ComputeBackend, data: &[f32]) -> Result<ComparisonReport> {
    let optimized = run_statistics(backend, data, &RunPlan::optimized())?;
    let baseline = run_statistics(backend, data, &RunPlan::baseline())?;
    let saved_ns = baseline.totals.overall_ns() as i64 - optimized.totals.overall_ns() as i64;
    info!(
        "optimized plan {} {} ns relative to baseline",
        if saved_ns >= 0 { "saved" } else { "lost" },
        saved_ns.abs()
    );
    Ok(ComparisonReport {
        optimized,
        baseline,
        saved_ns,
    })
}
