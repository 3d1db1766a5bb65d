//! Backend interface that compute providers implement and the reduction
//! engine drives.
//!
//! A backend owns device buffers and executes named kernel programs. Every
//! blocking transfer or dispatch returns a [`CompletionEvent`] with
//! host-measured start/end timestamps in nanoseconds; the engine folds these
//! into per-statistic timing totals. The host is strictly synchronous: each
//! call completes before the next is issued, so event ordering is trivially
//! sequential per run.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Opaque reference to a device-side buffer.
///
/// `len` is the element count, not a byte count; the element type is fixed
/// by the creating call (`create_f32` vs `create_split_cells`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferHandle {
    pub buffer_id: u64,
    pub len: usize,
}

/// Host-measured timestamps for one blocking transfer or dispatch,
/// in nanoseconds relative to the backend's creation instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub start_ns: u64,
    pub end_ns: u64,
}

impl CompletionEvent {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// Structured device information for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub backend: String,
}

/// Associative, commutative combine applied group-wise during reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum = 0,
    Min = 1,
    Max = 2,
}

impl ReduceOp {
    /// The operation identity: a padding element that cannot change the
    /// result of the combine it is mixed into.
    pub fn neutral(self) -> f32 {
        match self {
            ReduceOp::Sum => 0.0,
            ReduceOp::Min => f32::INFINITY,
            ReduceOp::Max => f32::NEG_INFINITY,
        }
    }

    pub fn combine(self, a: f32, b: f32) -> f32 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }
}

/// One kernel dispatch: the program to run plus its typed arguments.
///
/// The engine guarantees that every f32 buffer bound here has a length that
/// is an exact multiple of the work-group size, so kernels may assume a full
/// final group.
#[derive(Debug, Clone)]
pub enum KernelInvocation<'a> {
    /// Group-wise tree reduction: one partial per work-group, written to
    /// `output[workgroup_id]`.
    Reduce {
        op: ReduceOp,
        input: &'a BufferHandle,
        output: &'a BufferHandle,
    },
    /// Group-wise pre-sum followed by one atomic add of the group total's
    /// integer part and tenths part into the two split cells.
    AtomicSplitSum {
        input: &'a BufferHandle,
        cells: &'a BufferHandle,
    },
    /// Map pass: `output[i] = (input[i] - mean)^2`.
    SquaredDeviation {
        input: &'a BufferHandle,
        output: &'a BufferHandle,
        mean: f32,
    },
    /// One compare-exchange step of the bitonic network for stage `k`,
    /// distance `j`. `data` is sorted in place across the step sequence.
    BitonicStep {
        data: &'a BufferHandle,
        j: u32,
        k: u32,
    },
}

impl KernelInvocation<'_> {
    /// The kernel program name, for logging and diagnostics.
    pub fn kernel_name(&self) -> &'static str {
        match self {
            KernelInvocation::Reduce {
                op: ReduceOp::Sum, ..
            } => "reduce_sum",
            KernelInvocation::Reduce {
                op: ReduceOp::Min, ..
            } => "reduce_min",
            KernelInvocation::Reduce {
                op: ReduceOp::Max, ..
            } => "reduce_max",
            KernelInvocation::AtomicSplitSum { .. } => "reduce_sum_atomic_split",
            KernelInvocation::SquaredDeviation { .. } => "squared_deviation_map",
            KernelInvocation::BitonicStep { .. } => "bitonic_step",
        }
    }
}

/// Device interface the reduction engine drives.
///
/// All methods block until the device has completed the operation.
/// Implementations are responsible for their own buffer lifetimes; the
/// engine frees what it creates.
pub trait ComputeBackend: Send + Sync {
    fn device_info(&self) -> DeviceInfo;

    /// The fixed work-group size this backend dispatches with. The engine
    /// pads inputs to a multiple of this and validates divisibility before
    /// any dispatch.
    fn workgroup_size(&self) -> usize;

    /// Allocate an uninitialised f32 buffer of `len` elements.
    fn create_f32(&self, len: usize) -> Result<BufferHandle>;

    /// Allocate the two-cell i32 split accumulator (integer part, tenths).
    fn create_split_cells(&self) -> Result<BufferHandle>;

    /// Blocking host-to-device copy. `data.len()` must equal the handle's.
    fn write_f32(&self, handle: &BufferHandle, data: &[f32]) -> Result<CompletionEvent>;

    /// Zero-initialise a buffer (f32 or split-cell) in place.
    fn fill_zero(&self, handle: &BufferHandle) -> Result<()>;

    /// Execute one kernel over `global_size` work-items in groups of
    /// `local_size`. `global_size` must be a multiple of `local_size`.
    fn dispatch(
        &self,
        invocation: &KernelInvocation<'_>,
        global_size: usize,
        local_size: usize,
    ) -> Result<CompletionEvent>;

    /// Blocking device-to-host copy into `out` (`out.len()` elements).
    fn read_f32(&self, handle: &BufferHandle, out: &mut [f32]) -> Result<CompletionEvent>;

    /// Read the split accumulator cells.
    fn read_split_cells(&self, handle: &BufferHandle) -> Result<([i32; 2], CompletionEvent)>;

    fn free(&self, handle: &BufferHandle) -> Result<()>;
}
