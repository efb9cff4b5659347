//! Block-based video encoder.
//!
//! Frames are split into 8x8 blocks per plane, transformed with a DCT,
//! quantised with a quality-derived matrix and entropy coded with Exp-Golomb
//! run/level codes. Keyframes code every block against mid-grey; the frames in
//! between code residuals against the reconstructed previous frame and skip
//! blocks whose residual quantises to zero.
//!
//! Stream layout follows Theora: identification, comment and setup header
//! packets, then one data packet per frame. Granule positions use the 3.2.1
//! rule so an Ogg demuxer can seek on keyframes.

use super::bitwriter::BitWriter;
use super::dct::{Dct, BLOCK_SIZE};
use super::tables::{QuantMatrices, AC_SCALE, BASE_INTER, BASE_INTRA_UV, BASE_INTRA_Y, DC_SCALE, ZIGZAG};
use super::{CodecError, Packet};
use serde::{Deserialize, Serialize};

/// Bitstream version written to the identification header.
pub const VERSION_MAJOR: u8 = 3;
pub const VERSION_MINOR: u8 = 2;
pub const VERSION_SUBMINOR: u8 = 1;

/// Number of header packets emitted by [`VideoEncoder::flush_header`]
pub const HEADER_COUNT: u8 = 3;

const HEADER_MAGIC: &[u8; 6] = b"theora";
const VENDOR: &str = concat!("camera-recorder ", env!("CARGO_PKG_VERSION"));

/// Macroblock alignment of the coded frame
const MACROBLOCK: u32 = 16;

/// Colour space signalled in the identification header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    #[default]
    Unspecified = 0,
    Rec470M = 1,
    Rec470Bg = 2,
}

/// Encoder configuration.
///
/// The coded frame is the picture padded up to whole macroblocks; the picture
/// rectangle inside it is what a player displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Coded frame width, a multiple of 16
    pub frame_width: u32,
    /// Coded frame height, a multiple of 16
    pub frame_height: u32,
    /// Displayed picture width
    pub pic_width: u32,
    /// Displayed picture height
    pub pic_height: u32,
    /// Picture offset inside the coded frame
    pub pic_x: u32,
    pub pic_y: u32,
    pub fps_numerator: u32,
    pub fps_denominator: u32,
    /// Pixel aspect ratio, 0:0 when unknown
    pub aspect_numerator: u32,
    pub aspect_denominator: u32,
    pub color_space: ColorSpace,
    /// Target bitrate in bits per second, 0 for constant quality
    pub target_bitrate: u32,
    /// Quality index, 0 (smallest) to 63 (best)
    pub quality: u8,
    /// Maximum distance between keyframes
    pub keyframe_interval: u32,
    /// Bits of the granule position that count frames since the last keyframe
    pub keyframe_granule_shift: u8,
    /// User comments for the comment header, `KEY=value` by convention
    pub comments: Vec<String>,
}

impl EncoderConfig {
    /// Configuration for a `width`x`height` picture at `fps_numerator/fps_denominator`
    pub fn new(width: u32, height: u32, fps_numerator: u32, fps_denominator: u32) -> Self {
        Self {
            frame_width: align_to_macroblock(width),
            frame_height: align_to_macroblock(height),
            pic_width: width,
            pic_height: height,
            pic_x: 0,
            pic_y: 0,
            fps_numerator,
            fps_denominator,
            aspect_numerator: 0,
            aspect_denominator: 0,
            color_space: ColorSpace::Unspecified,
            target_bitrate: 0,
            quality: 48,
            keyframe_interval: 64,
            keyframe_granule_shift: 6,
            comments: Vec::new(),
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_target_bitrate(mut self, bits_per_second: u32) -> Self {
        self.target_bitrate = bits_per_second;
        self
    }

    pub fn with_keyframe_interval(mut self, interval: u32) -> Self {
        self.keyframe_interval = interval;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comments.push(comment.into());
        self
    }

    /// Bytes in one input frame: the picture in planar 4:2:0
    pub fn picture_frame_size(&self) -> usize {
        let w = self.pic_width as usize;
        let h = self.pic_height as usize;
        w * h + 2 * (w / 2) * (h / 2)
    }

    /// Check the configuration against the bitstream limits
    pub fn validate(&self) -> Result<(), CodecError> {
        let invalid = |msg: String| Err(CodecError::InvalidConfig(msg));

        if self.pic_width == 0 || self.pic_height == 0 {
            return invalid(format!(
                "picture size {}x{} must be non-zero",
                self.pic_width, self.pic_height
            ));
        }
        if self.pic_width % 2 != 0 || self.pic_height % 2 != 0 {
            return invalid(format!(
                "picture size {}x{} must be even for 4:2:0",
                self.pic_width, self.pic_height
            ));
        }
        if self.frame_width % MACROBLOCK != 0 || self.frame_height % MACROBLOCK != 0 {
            return invalid(format!(
                "frame size {}x{} is not a multiple of {}",
                self.frame_width, self.frame_height, MACROBLOCK
            ));
        }
        if self.frame_width / MACROBLOCK > 0xFFFF || self.frame_height / MACROBLOCK > 0xFFFF {
            return invalid("frame size exceeds 65535 macroblocks".to_string());
        }
        if self.pic_width > 0xFF_FFFF || self.pic_height > 0xFF_FFFF {
            return invalid("picture size exceeds 24 bits".to_string());
        }
        if self.pic_x > 0xFF || self.pic_y > 0xFF {
            return invalid(format!(
                "picture offset ({}, {}) exceeds 255",
                self.pic_x, self.pic_y
            ));
        }
        if self.pic_x % 2 != 0 || self.pic_y % 2 != 0 {
            return invalid("picture offset must be even for 4:2:0".to_string());
        }
        if self.pic_x + self.pic_width > self.frame_width
            || self.pic_y + self.pic_height > self.frame_height
        {
            return invalid("picture does not fit inside the coded frame".to_string());
        }
        if self.fps_numerator == 0 || self.fps_denominator == 0 {
            return invalid(format!(
                "frame rate {}/{} has a zero term",
                self.fps_numerator, self.fps_denominator
            ));
        }
        if self.aspect_numerator > 0xFF_FFFF || self.aspect_denominator > 0xFF_FFFF {
            return invalid("pixel aspect ratio exceeds 24 bits".to_string());
        }
        if self.target_bitrate > 0xFF_FFFF {
            return invalid("target bitrate exceeds 24 bits".to_string());
        }
        if self.quality > 63 {
            return invalid(format!("quality {} exceeds 63", self.quality));
        }
        if self.keyframe_granule_shift > 31 {
            return invalid(format!(
                "keyframe granule shift {} exceeds 31",
                self.keyframe_granule_shift
            ));
        }
        if self.keyframe_interval == 0
            || self.keyframe_interval as u64 > 1u64 << self.keyframe_granule_shift
        {
            return invalid(format!(
                "keyframe interval {} must be between 1 and {}",
                self.keyframe_interval,
                1u64 << self.keyframe_granule_shift
            ));
        }
        Ok(())
    }
}

fn align_to_macroblock(value: u32) -> u32 {
    (value + MACROBLOCK - 1) & !(MACROBLOCK - 1)
}

#[derive(Clone)]
struct Plane {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Plane {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }
}

/// Encoder session. Create with [`VideoEncoder::open`], release with
/// [`VideoEncoder::close`].
pub struct VideoEncoder {
    config: EncoderConfig,
    dct: Dct,
    qi: u8,
    quant: QuantMatrices,
    /// Current input, padded to the coded frame size
    planes: [Plane; 3],
    /// Reconstruction of the previous frame
    reference: Option<[Plane; 3]>,
    headers_emitted: u8,
    packet_no: i64,
    frame_no: u64,
    keyframe_no: u64,
    target_frame_bytes: Option<usize>,
}

impl VideoEncoder {
    /// Open an encoder session
    pub fn open(config: EncoderConfig) -> Result<Self, CodecError> {
        config.validate()?;

        let fw = config.frame_width as usize;
        let fh = config.frame_height as usize;
        let planes = [
            Plane::new(fw, fh),
            Plane::new(fw / 2, fh / 2),
            Plane::new(fw / 2, fh / 2),
        ];

        let target_frame_bytes = (config.target_bitrate > 0).then(|| {
            let bytes_per_sec = config.target_bitrate as u64 / 8;
            (bytes_per_sec * config.fps_denominator as u64 / config.fps_numerator as u64).max(1)
                as usize
        });

        tracing::debug!(
            "Opening video encoder: picture {}x{}+{}+{} in {}x{} frame @ {}/{} fps, quality {}",
            config.pic_width,
            config.pic_height,
            config.pic_x,
            config.pic_y,
            config.frame_width,
            config.frame_height,
            config.fps_numerator,
            config.fps_denominator,
            config.quality
        );

        Ok(Self {
            qi: config.quality,
            quant: QuantMatrices::for_quality(config.quality),
            config,
            dct: Dct::new(),
            planes,
            reference: None,
            headers_emitted: 0,
            packet_no: 0,
            frame_no: 0,
            keyframe_no: 0,
            target_frame_bytes,
        })
    }

    /// Encoder configuration
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Whether every header packet has been produced
    pub fn headers_done(&self) -> bool {
        self.headers_emitted >= HEADER_COUNT
    }

    /// Number of frames encoded so far
    pub fn frames_encoded(&self) -> u64 {
        self.frame_no
    }

    /// Quality index used for the next frame
    pub fn quality_index(&self) -> u8 {
        self.qi
    }

    /// Produce the next header packet, or `None` once all have been produced
    pub fn flush_header(&mut self) -> Result<Option<Packet>, CodecError> {
        let data = match self.headers_emitted {
            0 => self.id_header(),
            1 => self.comment_header(),
            2 => self.setup_header(),
            _ => return Ok(None),
        };

        let packet = Packet {
            data,
            granule_pos: 0,
            packet_no: self.packet_no,
            bos: self.headers_emitted == 0,
            eos: false,
            keyframe: false,
        };
        self.headers_emitted += 1;
        self.packet_no += 1;
        Ok(Some(packet))
    }

    fn id_header(&self) -> Vec<u8> {
        let c = &self.config;
        let mut writer = BitWriter::with_capacity(42);

        writer.write_bits(0x80, 8);
        writer.write_bytes(HEADER_MAGIC);
        writer.write_bits(VERSION_MAJOR as u32, 8);
        writer.write_bits(VERSION_MINOR as u32, 8);
        writer.write_bits(VERSION_SUBMINOR as u32, 8);

        writer.write_bits(c.frame_width / MACROBLOCK, 16);
        writer.write_bits(c.frame_height / MACROBLOCK, 16);
        writer.write_bits(c.pic_width, 24);
        writer.write_bits(c.pic_height, 24);
        writer.write_bits(c.pic_x, 8);
        writer.write_bits(c.pic_y, 8);

        writer.write_bits(c.fps_numerator, 32);
        writer.write_bits(c.fps_denominator, 32);
        writer.write_bits(c.aspect_numerator, 24);
        writer.write_bits(c.aspect_denominator, 24);

        writer.write_bits(c.color_space as u32, 8);
        writer.write_bits(c.target_bitrate, 24);
        writer.write_bits(c.quality as u32, 6);
        writer.write_bits(c.keyframe_granule_shift as u32, 5);
        // Pixel format 0 = 4:2:0, then 3 reserved bits
        writer.write_bits(0, 2);
        writer.write_bits(0, 3);

        writer.finish()
    }

    fn comment_header(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(64);
        data.push(0x81);
        data.extend_from_slice(HEADER_MAGIC);

        // Vorbis-comment layout: little-endian lengths
        data.extend_from_slice(&(VENDOR.len() as u32).to_le_bytes());
        data.extend_from_slice(VENDOR.as_bytes());
        data.extend_from_slice(&(self.config.comments.len() as u32).to_le_bytes());
        for comment in &self.config.comments {
            data.extend_from_slice(&(comment.len() as u32).to_le_bytes());
            data.extend_from_slice(comment.as_bytes());
        }
        data
    }

    fn setup_header(&self) -> Vec<u8> {
        let mut writer = BitWriter::with_capacity(512);

        writer.write_bits(0x82, 8);
        writer.write_bytes(HEADER_MAGIC);

        for scale in AC_SCALE {
            writer.write_bits(scale as u32, 10);
        }
        for scale in DC_SCALE {
            writer.write_bits(scale as u32, 10);
        }

        writer.write_bits(3, 9);
        for base in [&BASE_INTRA_Y, &BASE_INTRA_UV, &BASE_INTER] {
            for &value in base.iter() {
                writer.write_bits(value as u32, 8);
            }
        }

        writer.finish()
    }

    /// Encode one planar 4:2:0 frame of exactly [`EncoderConfig::picture_frame_size`] bytes.
    ///
    /// Returns the packet for this frame; `None` is reserved for frames the
    /// encoder decides to hold back, which this encoder never does.
    pub fn encode(&mut self, frame: &[u8]) -> Result<Option<Packet>, CodecError> {
        if !self.headers_done() {
            return Err(CodecError::HeadersPending);
        }

        let expected = self.config.picture_frame_size();
        if frame.len() != expected {
            return Err(CodecError::FrameSize {
                expected,
                actual: frame.len(),
            });
        }

        self.load_picture(frame);

        let keyframe = self.reference.is_none()
            || self.frame_no - self.keyframe_no >= self.config.keyframe_interval as u64;
        if keyframe {
            self.keyframe_no = self.frame_no;
        }

        let mut recon = match self.reference.take() {
            Some(planes) => planes,
            None => self.planes.clone(),
        };

        let mut writer = BitWriter::with_capacity(expected / 4);
        writer.write_bit(false);
        writer.write_bit(!keyframe);
        writer.write_bits(self.qi as u32, 6);

        for (idx, (source, recon)) in self.planes.iter().zip(recon.iter_mut()).enumerate() {
            let matrix = match (keyframe, idx) {
                (true, 0) => &self.quant.intra_y,
                (true, _) => &self.quant.intra_uv,
                (false, _) => &self.quant.inter,
            };
            encode_plane(&mut writer, &self.dct, matrix, source, recon, keyframe);
        }
        self.reference = Some(recon);

        let data = writer.finish();
        let shift = self.config.keyframe_granule_shift as u32;
        let granule_pos =
            (((self.keyframe_no + 1) << shift) + (self.frame_no - self.keyframe_no)) as i64;

        let packet = Packet {
            data,
            granule_pos,
            packet_no: self.packet_no,
            bos: false,
            eos: false,
            keyframe,
        };

        self.frame_no += 1;
        self.packet_no += 1;
        self.adjust_rate(packet.data.len());

        Ok(Some(packet))
    }

    /// Release the session
    pub fn close(self) {
        tracing::debug!(
            "Video encoder closed after {} frames ({} packets)",
            self.frame_no,
            self.packet_no
        );
    }

    /// Copy the picture into the padded planes, replicating edge pixels
    fn load_picture(&mut self, frame: &[u8]) {
        let c = &self.config;
        let (pw, ph) = (c.pic_width as usize, c.pic_height as usize);
        let (px, py) = (c.pic_x as usize, c.pic_y as usize);
        let luma = pw * ph;
        let chroma = (pw / 2) * (ph / 2);

        let sources = [
            (&frame[..luma], pw, ph, px, py),
            (&frame[luma..luma + chroma], pw / 2, ph / 2, px / 2, py / 2),
            (&frame[luma + chroma..], pw / 2, ph / 2, px / 2, py / 2),
        ];

        for (plane, (src, sw, sh, ox, oy)) in self.planes.iter_mut().zip(sources) {
            for y in 0..plane.height {
                let sy = y.saturating_sub(oy).min(sh - 1);
                let src_row = &src[sy * sw..(sy + 1) * sw];
                let dst_row = &mut plane.data[y * plane.width..(y + 1) * plane.width];
                for (x, dst) in dst_row.iter_mut().enumerate() {
                    *dst = src_row[x.saturating_sub(ox).min(sw - 1)];
                }
            }
        }
    }

    /// Nudge the quality index toward the target packet size
    fn adjust_rate(&mut self, packet_len: usize) {
        let Some(target) = self.target_frame_bytes else {
            return;
        };

        let qi = if packet_len > target + target / 10 {
            self.qi.saturating_sub(1)
        } else if packet_len < target - target / 10 {
            (self.qi + 1).min(63)
        } else {
            self.qi
        };

        if qi != self.qi {
            self.qi = qi;
            self.quant = QuantMatrices::for_quality(qi);
        }
    }
}

/// Code every block of one plane and update its reconstruction
fn encode_plane(
    writer: &mut BitWriter,
    dct: &Dct,
    quant: &[u16; 64],
    source: &Plane,
    recon: &mut Plane,
    keyframe: bool,
) {
    let stride = source.width;
    let blocks_x = source.width / BLOCK_SIZE;
    let blocks_y = source.height / BLOCK_SIZE;
    let mut dc_pred = 0i32;

    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let origin = by * BLOCK_SIZE * stride + bx * BLOCK_SIZE;

            let mut block = [0i16; 64];
            for y in 0..BLOCK_SIZE {
                for x in 0..BLOCK_SIZE {
                    let idx = origin + y * stride + x;
                    let predicted = if keyframe { 128 } else { recon.data[idx] as i16 };
                    block[y * BLOCK_SIZE + x] = source.data[idx] as i16 - predicted;
                }
            }

            let mut coeffs = [0i32; 64];
            dct.forward(&block, &mut coeffs);
            let levels = quantize(&coeffs, quant);

            if !keyframe {
                let coded = levels.iter().any(|&l| l != 0);
                writer.write_bit(coded);
                if !coded {
                    continue;
                }
            }

            writer.write_se(levels[0] - dc_pred);
            dc_pred = levels[0];

            let nonzero = ZIGZAG[1..].iter().filter(|&&i| levels[i] != 0).count();
            writer.write_ue(nonzero as u32);
            let mut run = 0u32;
            for &i in &ZIGZAG[1..] {
                if levels[i] == 0 {
                    run += 1;
                } else {
                    writer.write_ue(run);
                    writer.write_se(levels[i]);
                    run = 0;
                }
            }

            // Rebuild the block exactly as a decoder would see it
            let dequant: [i32; 64] = std::array::from_fn(|i| levels[i] * quant[i] as i32);
            let mut residual = [0i16; 64];
            dct.inverse(&dequant, &mut residual);
            for y in 0..BLOCK_SIZE {
                for x in 0..BLOCK_SIZE {
                    let idx = origin + y * stride + x;
                    let base = if keyframe { 128 } else { recon.data[idx] as i32 };
                    recon.data[idx] = (base + residual[y * BLOCK_SIZE + x] as i32).clamp(0, 255) as u8;
                }
            }
        }
    }
}

fn quantize(coeffs: &[i32; 64], quant: &[u16; 64]) -> [i32; 64] {
    std::array::from_fn(|i| {
        let q = quant[i] as i32;
        let c = coeffs[i];
        if c >= 0 {
            (c + q / 2) / q
        } else {
            -((-c + q / 2) / q)
        }
    })
}
