//! Pixel format conversion
//!
//! I420 → RGBA for the preview path, plus the NV12 / YUYV → I420 normalisers
//! used by camera backends that cannot deliver planar 4:2:0 directly.
//!
//! All conversions write into caller-owned buffers so they can run inside the
//! capture callback without allocating per frame.

use thiserror::Error;

/// Conversion errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("Invalid dimensions {width}x{height}: must be non-zero and even")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Buffer too small: need {required} bytes, got {available}")]
    BufferTooSmall { required: usize, available: usize },
}

/// Size in bytes of one I420 frame
pub fn i420_frame_size(width: u32, height: u32) -> usize {
    let w = width as usize;
    let h = height as usize;
    w * h + 2 * (w / 2) * (h / 2)
}

/// Size in bytes of one packed RGBA frame
pub fn rgba_frame_size(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

fn check_dimensions(width: u32, height: u32) -> Result<(), ConvertError> {
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(ConvertError::InvalidDimensions { width, height });
    }
    Ok(())
}

fn check_len(required: usize, available: usize) -> Result<(), ConvertError> {
    if available < required {
        return Err(ConvertError::BufferTooSmall {
            required,
            available,
        });
    }
    Ok(())
}

/// Convert one I420 frame to packed RGBA (BT.601, alpha 255).
///
/// Only the first frame's worth of `src` is read.
pub fn i420_to_rgba(width: u32, height: u32, src: &[u8], dst: &mut [u8]) -> Result<(), ConvertError> {
    check_dimensions(width, height)?;
    check_len(i420_frame_size(width, height), src.len())?;
    check_len(rgba_frame_size(width, height), dst.len())?;

    let w = width as usize;
    let h = height as usize;
    let chroma = (w / 2) * (h / 2);

    let y_plane = &src[0..w * h];
    let u_plane = &src[w * h..w * h + chroma];
    let v_plane = &src[w * h + chroma..w * h + 2 * chroma];

    for row in 0..h {
        let y_row = &y_plane[row * w..(row + 1) * w];
        let c_off = (row / 2) * (w / 2);
        let dst_row = &mut dst[row * w * 4..(row + 1) * w * 4];

        for col in 0..w {
            let (r, g, b) = yuv_to_rgb(y_row[col], u_plane[c_off + col / 2], v_plane[c_off + col / 2]);
            let px = &mut dst_row[col * 4..col * 4 + 4];
            px[0] = r;
            px[1] = g;
            px[2] = b;
            px[3] = 255;
        }
    }

    Ok(())
}

/// Convert NV12 (Y plane, interleaved UV) to I420
pub fn nv12_to_i420(width: u32, height: u32, src: &[u8], dst: &mut [u8]) -> Result<(), ConvertError> {
    check_dimensions(width, height)?;
    let size = i420_frame_size(width, height);
    check_len(size, src.len())?;
    check_len(size, dst.len())?;

    let luma = width as usize * height as usize;
    let chroma = (size - luma) / 2;

    dst[..luma].copy_from_slice(&src[..luma]);
    let (u_plane, v_plane) = dst[luma..size].split_at_mut(chroma);
    for (i, uv) in src[luma..size].chunks_exact(2).enumerate() {
        u_plane[i] = uv[0];
        v_plane[i] = uv[1];
    }

    Ok(())
}

/// Convert packed YUYV 4:2:2 to I420, averaging chroma over row pairs
pub fn yuyv_to_i420(width: u32, height: u32, src: &[u8], dst: &mut [u8]) -> Result<(), ConvertError> {
    check_dimensions(width, height)?;
    let w = width as usize;
    let h = height as usize;
    check_len(w * h * 2, src.len())?;
    check_len(i420_frame_size(width, height), dst.len())?;

    let chroma = (w / 2) * (h / 2);
    let (y_plane, rest) = dst.split_at_mut(w * h);
    let (u_plane, v_plane) = rest.split_at_mut(chroma);
    let stride = w * 2;

    for row in 0..h {
        let line = &src[row * stride..(row + 1) * stride];
        for (pair, px) in line.chunks_exact(4).enumerate() {
            y_plane[row * w + pair * 2] = px[0];
            y_plane[row * w + pair * 2 + 1] = px[2];
        }
    }

    for crow in 0..h / 2 {
        let top = &src[crow * 2 * stride..(crow * 2 + 1) * stride];
        let bottom = &src[(crow * 2 + 1) * stride..(crow * 2 + 2) * stride];
        for pair in 0..w / 2 {
            let idx = crow * (w / 2) + pair;
            u_plane[idx] = ((top[pair * 4 + 1] as u16 + bottom[pair * 4 + 1] as u16 + 1) / 2) as u8;
            v_plane[idx] = ((top[pair * 4 + 3] as u16 + bottom[pair * 4 + 3] as u16 + 1) / 2) as u8;
        }
    }

    Ok(())
}

/// BT.601 YUV → RGB, fixed point scaled by 1024
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = y as i32;
    let u = u as i32 - 128;
    let v = v as i32 - 128;

    let r = y + ((1436 * v) >> 10);
    let g = y - ((352 * u + 731 * v) >> 10);
    let b = y + ((1815 * u) >> 10);

    (
        r.clamp(0, 255) as u8,
        g.clamp(0, 255) as u8,
        b.clamp(0, 255) as u8,
    )
}
