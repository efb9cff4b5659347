//! Separable orthonormal 8x8 DCT with a precomputed basis.

pub(crate) const BLOCK_SIZE: usize = 8;

pub(crate) struct Dct {
    basis: [[f32; BLOCK_SIZE]; BLOCK_SIZE],
}

impl Dct {
    pub(crate) fn new() -> Self {
        let n = BLOCK_SIZE as f32;
        let mut basis = [[0.0f32; BLOCK_SIZE]; BLOCK_SIZE];
        for (u, row) in basis.iter_mut().enumerate() {
            let cu = if u == 0 { 1.0 / 2.0_f32.sqrt() } else { 1.0 };
            for (x, value) in row.iter_mut().enumerate() {
                *value = cu
                    * (std::f32::consts::PI * (2.0 * x as f32 + 1.0) * u as f32 / (2.0 * n)).cos()
                    * (2.0 / n).sqrt();
            }
        }
        Self { basis }
    }

    pub(crate) fn forward(&self, input: &[i16; 64], output: &mut [i32; 64]) {
        let mut temp = [0.0f32; 64];

        for y in 0..8 {
            for u in 0..8 {
                let mut sum = 0.0f32;
                for x in 0..8 {
                    sum += input[y * 8 + x] as f32 * self.basis[u][x];
                }
                temp[y * 8 + u] = sum;
            }
        }

        for x in 0..8 {
            for v in 0..8 {
                let mut sum = 0.0f32;
                for y in 0..8 {
                    sum += temp[y * 8 + x] * self.basis[v][y];
                }
                output[v * 8 + x] = sum.round() as i32;
            }
        }
    }

    pub(crate) fn inverse(&self, input: &[i32; 64], output: &mut [i16; 64]) {
        let mut temp = [0.0f32; 64];

        for y in 0..8 {
            for x in 0..8 {
                let mut sum = 0.0f32;
                for u in 0..8 {
                    sum += input[y * 8 + u] as f32 * self.basis[u][x];
                }
                temp[y * 8 + x] = sum;
            }
        }

        for x in 0..8 {
            for y in 0..8 {
                let mut sum = 0.0f32;
                for v in 0..8 {
                    sum += temp[v * 8 + x] * self.basis[v][y];
                }
                output[y * 8 + x] = sum.round().clamp(-32768.0, 32767.0) as i16;
            }
        }
    }
}
