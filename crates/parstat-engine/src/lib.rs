//! Parallel statistics engine.
//!
//! Computes minimum, maximum, mean and population standard deviation over an
//! f32 dataset by driving a [`ComputeBackend`]: multi-pass tree reduction
//! for min/max, and either iterated reduction or a single atomic
//! split-accumulator dispatch for sums. Every run carries host-measured
//! kernel and transfer timing, and [`compare`] pits the optimized plan
//! against a baseline over the same data.
//!
//! [`ComputeBackend`]: parstat_backend_api::ComputeBackend

pub mod atomic;
pub mod compare;
pub mod driver;
pub mod error;
pub mod pad;
pub mod sort;
pub mod split;
pub mod stats;
pub mod timing;

pub use atomic::{atomic_split_sum, AtomicSum};
pub use compare::{compare, run_statistics, ComparisonReport, RunPlan, RunReport, StatisticSummary};
pub use driver::{reduce, Reduced, ReducePlan};
pub use error::{EngineError, Result};
pub use sort::{bitonic_sort, SortPlan, Sorted};
pub use split::SplitSum;
pub use stats::{maximum, mean, minimum, std_dev, StatisticResult, SumStrategy};
pub use timing::{DispatchTiming, TimingTotals};
