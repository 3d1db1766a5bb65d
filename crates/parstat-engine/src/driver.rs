//! Multi-pass tree reduction driver.
//!
//! Each device pass folds every work-group of the current vector down to one
//! partial. The driver keeps dispatching passes until either a single value
//! remains or the plan's pass budget is spent, then folds the surviving
//! partials sequentially on the host. Padding with the operation's neutral
//! element keeps every pass an exact multiple of the work-group size without
//! disturbing the result.

use log::debug;

use parstat_backend_api::{ComputeBackend, KernelInvocation, ReduceOp};

use crate::error::{EngineError, Result};
use crate::pad::pad_to_workgroup;
use crate::timing::DispatchTiming;

/// How many device passes a reduction may spend before falling back to a
/// sequential host fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReducePlan {
    pub max_passes: u32,
}

impl ReducePlan {
    /// The tuned plan: enough passes to collapse datasets up to
    /// `workgroup_size^3` elements entirely on the device.
    pub fn optimized() -> Self {
        Self { max_passes: 3 }
    }

    /// The reference plan: a deliberately generous pass budget so the
    /// comparison run exercises the same kernels with more round-trips.
    pub fn baseline() -> Self {
        Self { max_passes: 6 }
    }
}

/// Outcome of one reduction: the folded value, how many device passes ran,
/// and the accumulated transfer/kernel timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reduced {
    pub value: f32,
    pub passes: u32,
    pub timing: DispatchTiming,
}

/// Reduce `data` under `op` using at most `plan.max_passes` device passes.
pub fn reduce(
    backend: &dyn ComputeBackend,
    data: &[f32],
    op: ReduceOp,
    plan: &ReducePlan,
) -> Result<Reduced> {
    if data.is_empty() {
        return Err(EngineError::Config("cannot reduce an empty dataset".into()));
    }
    let group = backend.workgroup_size();
    let mut current = pad_to_workgroup(data, group, op.neutral());
    let mut timing = DispatchTiming::default();
    let mut passes = 0u32;

    while passes < plan.max_passes && current.len() >= group {
        current = pad_to_workgroup(&current, group, op.neutral());
        let global = current.len();
        let partials_len = global / group;

        let input = backend.create_f32(global)?;
        let output = backend.create_f32(partials_len)?;
        timing.write_ns += backend.write_f32(&input, &current)?.duration_ns();
        let invocation = KernelInvocation::Reduce {
            op,
            input: &input,
            output: &output,
        };
        timing.kernel_ns += backend.dispatch(&invocation, global, group)?.duration_ns();
        let mut partials = vec![0.0f32; partials_len];
        timing.read_ns += backend.read_f32(&output, &mut partials)?.duration_ns();
        backend.free(&input)?;
        backend.free(&output)?;

        passes += 1;
        debug!(
            "reduce pass {}: {} -> {} partials ({})",
            passes,
            global,
            partials_len,
            invocation.kernel_name()
        );
        current = partials;
    }

    let value = current
        .iter()
        .copied()
        .fold(op.neutral(), |acc, v| op.combine(acc, v));
    Ok(Reduced {
        value,
        passes,
        timing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_expose_their_pass_budgets() {
        assert_eq!(ReducePlan::optimized().max_passes, 3);
        assert_eq!(ReducePlan::baseline().max_passes, 6);
    }
}
