//! Fixed-point split accumulator.
//!
//! Work-group totals are split into an integer part and a truncated tenths
//! part so they can be combined with integer atomic adds on devices without
//! floating-point atomics. One decimal digit of the fraction survives per
//! group; the reconstruction below is therefore an approximation of the
//! exact sum, accurate to roughly 0.1 per contributing work-group.

use serde::Serialize;

/// The two accumulator cells read back from the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SplitSum {
    pub int_part: i32,
    pub tenths: i32,
}

impl SplitSum {
    pub fn from_cells(cells: [i32; 2]) -> Self {
        Self {
            int_part: cells[0],
            tenths: cells[1],
        }
    }

    /// Split one group total the way the kernel does: truncate toward zero,
    /// then truncate the remaining fraction to tenths. Both parts carry the
    /// sign of the total.
    pub fn split(total: f32) -> (i32, i32) {
        let whole = total.trunc();
        (whole as i32, ((total - whole) * 10.0).trunc() as i32)
    }

    /// Reconstruct the accumulated value.
    pub fn value(&self) -> f64 {
        self.int_part as f64 + self.tenths as f64 / 10.0
    }
}
