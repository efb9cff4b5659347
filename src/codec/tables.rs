//! Quantiser tables shared by the encoder and its setup header.

/// AC scale factor per quality index (percent of the base matrix).
pub const AC_SCALE: [u16; 64] = [
    500, 450, 400, 370, 340, 310, 285, 265, 245, 225, 210, 195, 185, 175, 165, 155, 145, 140, 135,
    130, 125, 120, 115, 110, 105, 100, 95, 93, 91, 89, 87, 85, 83, 81, 79, 77, 75, 73, 71, 69, 67,
    65, 63, 62, 61, 60, 59, 58, 57, 56, 55, 54, 53, 52, 51, 50, 49, 48, 47, 46, 45, 44, 43, 42,
];

/// DC scale factor per quality index.
pub const DC_SCALE: [u16; 64] = [
    220, 200, 190, 180, 170, 160, 150, 140, 130, 120, 110, 100, 90, 85, 80, 75, 70, 65, 60, 58, 56,
    54, 52, 50, 48, 46, 44, 42, 40, 38, 36, 34, 32, 31, 30, 29, 28, 27, 26, 25, 24, 23, 22, 21, 20,
    19, 18, 17, 16, 15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1,
];

/// Zigzag scan order for 8x8 blocks.
pub const ZIGZAG: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27, 20,
    13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58, 59,
    52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// Base matrix for intra luma blocks.
pub const BASE_INTRA_Y: [u8; 64] = [
    16, 11, 10, 16, 24, 40, 51, 61, 12, 12, 14, 19, 26, 58, 60, 55, 14, 13, 16, 24, 40, 57, 69, 56,
    14, 17, 22, 29, 51, 87, 80, 62, 18, 22, 37, 56, 68, 109, 103, 77, 24, 35, 55, 64, 81, 104, 113,
    92, 49, 64, 78, 87, 103, 121, 120, 101, 72, 92, 95, 98, 112, 100, 103, 99,
];

/// Base matrix for intra chroma blocks.
pub const BASE_INTRA_UV: [u8; 64] = [
    17, 18, 24, 47, 99, 99, 99, 99, 18, 21, 26, 66, 99, 99, 99, 99, 24, 26, 56, 99, 99, 99, 99, 99,
    47, 66, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
    99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
];

/// Base matrix for inter (residual) blocks.
pub const BASE_INTER: [u8; 64] = [16; 64];

/// Quantiser set derived from one quality index.
#[derive(Debug, Clone)]
pub struct QuantMatrices {
    pub intra_y: [u16; 64],
    pub intra_uv: [u16; 64],
    pub inter: [u16; 64],
}

impl QuantMatrices {
    pub fn for_quality(qi: u8) -> Self {
        let qi = (qi as usize).min(63);
        Self {
            intra_y: scale_matrix(&BASE_INTRA_Y, qi),
            intra_uv: scale_matrix(&BASE_INTRA_UV, qi),
            inter: scale_matrix(&BASE_INTER, qi),
        }
    }
}

fn scale_matrix(base: &[u8; 64], qi: usize) -> [u16; 64] {
    std::array::from_fn(|i| {
        let scale = if i == 0 { DC_SCALE[qi] } else { AC_SCALE[qi] } as u32;
        (scale * base[i] as u32 / 100).clamp(1, 4096) as u16
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zigzag_coverage() {
        let mut seen = [false; 64];
        for &idx in &ZIGZAG {
            assert!(!seen[idx], "duplicate index in zigzag: {}", idx);
            seen[idx] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_higher_quality_means_finer_steps() {
        let coarse = QuantMatrices::for_quality(0);
        let fine = QuantMatrices::for_quality(63);
        for i in 0..64 {
            assert!(fine.intra_y[i] <= coarse.intra_y[i]);
            assert!(fine.inter[i] >= 1);
        }
    }
}
