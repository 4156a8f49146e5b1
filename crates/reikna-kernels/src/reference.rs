//! Portable reference implementations.
//!
//! Slow, obviously-correct scalar loops. They serve two roles: the hard
//! fallback whenever no optimized path's preconditions hold (correctness
//! must never regress, whatever the shape), and the oracles the optimized
//! paths are tested against.

use reikna_core::Element;

/// Direct convolution, NCHW single image:
/// `out[oc, oh, ow] = Σ in[g·icg+ic, ...] * k[oc, ic, kh, kw] + bias[oc]`.
#[allow(clippy::too_many_arguments)]
pub fn conv2d_ref<E: Element>(
    input: &[E],
    in_c: usize,
    in_h: usize,
    in_w: usize,
    kernel: &[E],
    out_c: usize,
    kh: usize,
    kw: usize,
    bias: Option<&[f32]>,
    stride_h: usize,
    stride_w: usize,
    pad_top: usize,
    pad_left: usize,
    dilation_h: usize,
    dilation_w: usize,
    group: usize,
    out: &mut [E],
    out_h: usize,
    out_w: usize,
) {
    let in_cg = in_c / group;
    let out_cg = out_c / group;

    for g in 0..group {
        for ocg in 0..out_cg {
            let oc = g * out_cg + ocg;
            let k_base = oc * in_cg * kh * kw;
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut sum = bias.map_or(0.0, |bv| bv[oc]);
                    for ic in 0..in_cg {
                        let c = g * in_cg + ic;
                        let plane = &input[c * in_h * in_w..(c + 1) * in_h * in_w];
                        for ki in 0..kh {
                            let ih = (oh * stride_h + ki * dilation_h) as isize
                                - pad_top as isize;
                            if ih < 0 || ih as usize >= in_h {
                                continue;
                            }
                            for kj in 0..kw {
                                let iw = (ow * stride_w + kj * dilation_w) as isize
                                    - pad_left as isize;
                                if iw < 0 || iw as usize >= in_w {
                                    continue;
                                }
                                let kv = kernel[k_base + (ic * kh + ki) * kw + kj].to_f32();
                                sum += plane[ih as usize * in_w + iw as usize].to_f32() * kv;
                            }
                        }
                    }
                    out[(oc * out_h + oh) * out_w + ow] = E::from_f32(sum);
                }
            }
        }
    }
}

/// Direct int8 convolution producing exact int32 accumulators.
///
/// Padded taps read `pad_value` (the input zero point), matching the im2col
/// path so the zero-point fusion cancels identically on both.
#[allow(clippy::too_many_arguments)]
pub fn conv2d_ref_int8_i32(
    input: &[i8],
    in_c: usize,
    in_h: usize,
    in_w: usize,
    kernel: &[i8],
    out_c: usize,
    kh: usize,
    kw: usize,
    bias: Option<&[i32]>,
    stride_h: usize,
    stride_w: usize,
    pad_top: usize,
    pad_left: usize,
    dilation_h: usize,
    dilation_w: usize,
    group: usize,
    pad_value: i8,
    out: &mut [i32],
    out_h: usize,
    out_w: usize,
) {
    let in_cg = in_c / group;
    let out_cg = out_c / group;

    for g in 0..group {
        for ocg in 0..out_cg {
            let oc = g * out_cg + ocg;
            let k_base = oc * in_cg * kh * kw;
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let mut sum = bias.map_or(0, |bv| bv[oc]);
                    for ic in 0..in_cg {
                        let c = g * in_cg + ic;
                        let plane = &input[c * in_h * in_w..(c + 1) * in_h * in_w];
                        for ki in 0..kh {
                            for kj in 0..kw {
                                let ih = (oh * stride_h + ki * dilation_h) as isize
                                    - pad_top as isize;
                                let iw = (ow * stride_w + kj * dilation_w) as isize
                                    - pad_left as isize;
                                let iv = if ih >= 0
                                    && (ih as usize) < in_h
                                    && iw >= 0
                                    && (iw as usize) < in_w
                                {
                                    plane[ih as usize * in_w + iw as usize]
                                } else {
                                    pad_value
                                };
                                let kv = kernel[k_base + (ic * kh + ki) * kw + kj];
                                sum += iv as i32 * kv as i32;
                            }
                        }
                    }
                    out[(oc * out_h + oh) * out_w + ow] = sum;
                }
            }
        }
    }
}

/// Max-pool over one `[c, h, w]` image. Windows are clamped to the real
/// input extent: synthesized padding (explicit or ceil-mode) never
/// participates in the max.
#[allow(clippy::too_many_arguments)]
pub fn maxpool2d_ref<T: Copy + PartialOrd>(
    input: &[T],
    channels: usize,
    in_h: usize,
    in_w: usize,
    kh: usize,
    kw: usize,
    stride_h: usize,
    stride_w: usize,
    pad_top: usize,
    pad_left: usize,
    out: &mut [T],
    out_h: usize,
    out_w: usize,
) {
    for c in 0..channels {
        let plane = &input[c * in_h * in_w..(c + 1) * in_h * in_w];
        for oh in 0..out_h {
            let h0 = (oh * stride_h) as isize - pad_top as isize;
            for ow in 0..out_w {
                let w0 = (ow * stride_w) as isize - pad_left as isize;
                let mut best: Option<T> = None;
                for ki in 0..kh {
                    let ih = h0 + ki as isize;
                    if ih < 0 || ih as usize >= in_h {
                        continue;
                    }
                    for kj in 0..kw {
                        let iw = w0 + kj as isize;
                        if iw < 0 || iw as usize >= in_w {
                            continue;
                        }
                        let v = plane[ih as usize * in_w + iw as usize];
                        best = match best {
                            Some(b) if b >= v => Some(b),
                            _ => Some(v),
                        };
                    }
                }
                // Window geometry guarantees at least one real element.
                if let Some(b) = best {
                    out[(c * out_h + oh) * out_w + ow] = b;
                }
            }
        }
    }
}
