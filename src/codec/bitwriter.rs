//! MSB-first bit writer with Exp-Golomb helpers.

pub(crate) struct BitWriter {
    data: Vec<u8>,
    current_byte: u8,
    bit_pos: u8,
}

impl BitWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            current_byte: 0,
            bit_pos: 0,
        }
    }

    pub(crate) fn write_bit(&mut self, bit: bool) {
        if bit {
            self.current_byte |= 1 << (7 - self.bit_pos);
        }
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.data.push(self.current_byte);
            self.current_byte = 0;
            self.bit_pos = 0;
        }
    }

    pub(crate) fn write_bits(&mut self, value: u32, n: u8) {
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    /// Unsigned Exp-Golomb code
    pub(crate) fn write_ue(&mut self, value: u32) {
        let coded = value as u64 + 1;
        let len = 64 - coded.leading_zeros() as u8;
        for _ in 1..len {
            self.write_bit(false);
        }
        for i in (0..len).rev() {
            self.write_bit((coded >> i) & 1 != 0);
        }
    }

    /// Signed Exp-Golomb code (0, 1, -1, 2, -2, ...)
    pub(crate) fn write_se(&mut self, value: i32) {
        let mapped = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.write_ue(mapped);
    }

    /// Append whole bytes; the writer must be byte aligned.
    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        debug_assert_eq!(self.bit_pos, 0);
        self.data.extend_from_slice(bytes);
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        if self.bit_pos > 0 {
            self.data.push(self.current_byte);
        }
        self.data
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Reader used by codec tests to walk encoded packets
    pub(crate) struct BitReader<'a> {
        data: &'a [u8],
        pos: usize,
    }

    impl<'a> BitReader<'a> {
        pub(crate) fn new(data: &'a [u8]) -> Self {
            Self { data, pos: 0 }
        }

        pub(crate) fn read_bit(&mut self) -> bool {
            let byte = self.data[self.pos / 8];
            let bit = byte & (1 << (7 - self.pos % 8)) != 0;
            self.pos += 1;
            bit
        }

        pub(crate) fn read_bits(&mut self, n: u8) -> u32 {
            (0..n).fold(0, |acc, _| (acc << 1) | self.read_bit() as u32)
        }

        pub(crate) fn read_ue(&mut self) -> u32 {
            let mut zeros = 0;
            while !self.read_bit() {
                zeros += 1;
            }
            let rest = self.read_bits(zeros);
            ((1u32 << zeros) | rest) - 1
        }

        pub(crate) fn read_se(&mut self) -> i32 {
            let v = self.read_ue();
            if v % 2 == 1 {
                ((v + 1) / 2) as i32
            } else {
                -((v / 2) as i32)
            }
        }
    }

    #[test]
    fn test_exp_golomb_codes() {
        let mut w = BitWriter::with_capacity(8);
        w.write_ue(0);
        w.write_ue(1);
        w.write_ue(2);
        w.write_ue(7);
        // 1 | 010 | 011 | 0001000
        assert_eq!(w.finish(), vec![0b1010_0110, 0b0010_0000]);

        let mut w = BitWriter::with_capacity(8);
        for v in [0, 1, -1, 5, -300, 4096] {
            w.write_se(v);
        }
        let data = w.finish();
        let mut r = BitReader::new(&data);
        for v in [0, 1, -1, 5, -300, 4096] {
            assert_eq!(r.read_se(), v);
        }
    }

    #[test]
    fn test_write_bits_msb_first() {
        let mut w = BitWriter::with_capacity(4);
        w.write_bits(0x80, 8);
        w.write_bits(0b101, 3);
        assert_eq!(w.finish(), vec![0x80, 0b1010_0000]);
    }
}
