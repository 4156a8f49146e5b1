//! Memory-layout tags and packed-layout conversion.
//!
//! `Nc1hwc0` is the channel-blocked layout the packed kernels consume:
//! channels are split into groups of `c0`, and each group's spatial plane is
//! stored with the `c0` channel values interleaved innermost
//! (`[n][c1][h][w][c0]`, `c1 = ceil(c / c0)`). Channel tails are zero-padded
//! in the packed form and dropped again on the way back, so the round trip
//! is exact for any channel count.

use anyhow::{bail, Result};

/// How a tensor's buffer is laid out in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    Nchw,
    Nhwc,
    /// Channel-blocked packed layout with `c0` channels interleaved innermost.
    Nc1hwc0 { c0: usize },
    /// Plain row-major matrix (rank-2/3 operands).
    RowMajor,
}

/// Packs an NCHW buffer into NC1HWC0 with block size `c0`.
///
/// Pure permutation plus zero padding of the channel tail.
pub fn nchw_to_nc1hwc0<T: Copy + Default>(
    src: &[T],
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    c0: usize,
) -> Result<Vec<T>> {
    if c0 == 0 {
        bail!("c0 must be non-zero");
    }
    if src.len() != n * c * h * w {
        bail!(
            "NCHW buffer length {} does not match [{}, {}, {}, {}]",
            src.len(),
            n,
            c,
            h,
            w
        );
    }
    let c1 = c.div_ceil(c0);
    let hw = h * w;
    let mut dst = vec![T::default(); n * c1 * hw * c0];
    for b in 0..n {
        for block in 0..c1 {
            let dst_plane = &mut dst[(b * c1 + block) * hw * c0..(b * c1 + block + 1) * hw * c0];
            for lane in 0..c0 {
                let ch = block * c0 + lane;
                if ch >= c {
                    break; // tail lanes stay zero
                }
                let src_plane = &src[(b * c + ch) * hw..(b * c + ch + 1) * hw];
                for s in 0..hw {
                    dst_plane[s * c0 + lane] = src_plane[s];
                }
            }
        }
    }
    Ok(dst)
}

/// Unpacks an NC1HWC0 buffer back to NCHW, dropping padded tail lanes.
pub fn nc1hwc0_to_nchw<T: Copy + Default>(
    src: &[T],
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    c0: usize,
) -> Result<Vec<T>> {
    if c0 == 0 {
        bail!("c0 must be non-zero");
    }
    let c1 = c.div_ceil(c0);
    let hw = h * w;
    if src.len() != n * c1 * hw * c0 {
        bail!(
            "NC1HWC0 buffer length {} does not match [{}, {}, {}, {}] with c0={}",
            src.len(),
            n,
            c,
            h,
            w,
            c0
        );
    }
    let mut dst = vec![T::default(); n * c * hw];
    for b in 0..n {
        for ch in 0..c {
            let block = ch / c0;
            let lane = ch % c0;
            let src_plane = &src[(b * c1 + block) * hw * c0..(b * c1 + block + 1) * hw * c0];
            let dst_plane = &mut dst[(b * c + ch) * hw..(b * c + ch + 1) * hw];
            for s in 0..hw {
                dst_plane[s] = src_plane[s * c0 + lane];
            }
        }
    }
    Ok(dst)
}
