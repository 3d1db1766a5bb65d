//! Compute backends for parstat.
//!
//! [`WgpuBackend`] runs the kernel programs on a real adapter through wgpu.
//! [`HostBackend`] executes the same kernel semantics per work-group on the
//! host, including the split-accumulator truncation, so the engine can be
//! exercised deterministically without a GPU.

pub mod host;
pub mod wgpu_backend;

pub use host::HostBackend;
pub use wgpu_backend::{WgpuBackend, WgpuBackendOptions};
