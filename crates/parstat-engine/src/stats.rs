//! Statistic computations built on the reduction drivers.

use log::debug;

use parstat_backend_api::{ComputeBackend, KernelInvocation, ReduceOp};

use crate::atomic::atomic_split_sum;
use crate::driver::{reduce, ReducePlan};
use crate::error::{EngineError, Result};
use crate::pad::pad_to_workgroup;
use crate::timing::DispatchTiming;

/// How a sum is realised on the device: iterated tree-reduction passes, or
/// one dispatch through the atomic split accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumStrategy {
    MultiPass,
    AtomicSplit,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatisticResult {
    pub value: f64,
    pub timing: DispatchTiming,
}

pub fn minimum(
    backend: &dyn ComputeBackend,
    data: &[f32],
    plan: &ReducePlan,
) -> Result<StatisticResult> {
    let reduced = reduce(backend, data, ReduceOp::Min, plan)?;
    Ok(StatisticResult {
        value: reduced.value as f64,
        timing: reduced.timing,
    })
}

pub fn maximum(
    backend: &dyn ComputeBackend,
    data: &[f32],
    plan: &ReducePlan,
) -> Result<StatisticResult> {
    let reduced = reduce(backend, data, ReduceOp::Max, plan)?;
    Ok(StatisticResult {
        value: reduced.value as f64,
        timing: reduced.timing,
    })
}

fn sum(
    backend: &dyn ComputeBackend,
    data: &[f32],
    strategy: SumStrategy,
    plan: &ReducePlan,
) -> Result<StatisticResult> {
    match strategy {
        SumStrategy::MultiPass => {
            let reduced = reduce(backend, data, ReduceOp::Sum, plan)?;
            Ok(StatisticResult {
                value: reduced.value as f64,
                timing: reduced.timing,
            })
        }
        SumStrategy::AtomicSplit => {
            let summed = atomic_split_sum(backend, data)?;
            Ok(StatisticResult {
                value: summed.value,
                timing: summed.timing,
            })
        }
    }
}

pub fn mean(
    backend: &dyn ComputeBackend,
    data: &[f32],
    strategy: SumStrategy,
    plan: &ReducePlan,
) -> Result<StatisticResult> {
    if data.is_empty() {
        return Err(EngineError::Config(
            "cannot take the mean of an empty dataset".into(),
        ));
    }
    let total = sum(backend, data, strategy, plan)?;
    Ok(StatisticResult {
        value: total.value / data.len() as f64,
        timing: total.timing,
    })
}

/// Population standard deviation around a precomputed `mean`.
///
/// One map dispatch produces the squared deviations; only the first
/// `data.len()` elements are read back, discarding whatever the padded tail
/// produced, before the deviations are summed with `strategy`.
pub fn std_dev(
    backend: &dyn ComputeBackend,
    data: &[f32],
    mean: f64,
    strategy: SumStrategy,
    plan: &ReducePlan,
) -> Result<StatisticResult> {
    if data.is_empty() {
        return Err(EngineError::Config(
            "cannot take the standard deviation of an empty dataset".into(),
        ));
    }
    let group = backend.workgroup_size();
    let padded = pad_to_workgroup(data, group, 0.0);
    let global = padded.len();

    let input = backend.create_f32(global)?;
    let output = backend.create_f32(global)?;
    let mut timing = DispatchTiming::default();
    timing.write_ns += backend.write_f32(&input, &padded)?.duration_ns();
    let invocation = KernelInvocation::SquaredDeviation {
        input: &input,
        output: &output,
        mean: mean as f32,
    };
    timing.kernel_ns += backend.dispatch(&invocation, global, group)?.duration_ns();
    let mut deviations = vec![0.0f32; data.len()];
    timing.read_ns += backend.read_f32(&output, &mut deviations)?.duration_ns();
    backend.free(&input)?;
    backend.free(&output)?;
    debug!(
        "squared-deviation map over {} elements ({} padded)",
        data.len(),
        global
    );

    let total = sum(backend, &deviations, strategy, plan)?;
    timing += total.timing;
    Ok(StatisticResult {
        value: (total.value / data.len() as f64).max(0.0).sqrt(),
        timing,
    })
}
