//! im2col patch extraction.
//!
//! Rearranges convolution input patches into matrix columns so convolution
//! reduces to one GEMM: row `c*kh*kw + ki*kw + kj` of the output holds, for
//! every spatial output position, the input value that kernel tap `(ki, kj)`
//! of channel `c` touches. Out-of-bounds taps read `pad_value` — zero for
//! float paths, the input zero point for int8 (so that the zero-point
//! fusion folded into the bias cancels exactly over padded positions too).

/// Expands one `[in_c, in_h, in_w]` image into a
/// `[in_c*kh*kw, out_h*out_w]` patch matrix.
#[allow(clippy::too_many_arguments)]
pub fn im2col<T: Copy>(
    input: &[T],
    in_c: usize,
    in_h: usize,
    in_w: usize,
    out_h: usize,
    out_w: usize,
    kh: usize,
    kw: usize,
    stride_h: usize,
    stride_w: usize,
    pad_top: usize,
    pad_left: usize,
    dilation_h: usize,
    dilation_w: usize,
    pad_value: T,
) -> Vec<T> {
    debug_assert_eq!(input.len(), in_c * in_h * in_w);
    let cols = out_h * out_w;
    let mut out = Vec::with_capacity(in_c * kh * kw * cols);

    for c in 0..in_c {
        let plane = &input[c * in_h * in_w..(c + 1) * in_h * in_w];
        for ki in 0..kh {
            for kj in 0..kw {
                for oh in 0..out_h {
                    let ih = (oh * stride_h + ki * dilation_h) as isize - pad_top as isize;
                    for ow in 0..out_w {
                        let iw = (ow * stride_w + kj * dilation_w) as isize - pad_left as isize;
                        let v = if ih >= 0
                            && (ih as usize) < in_h
                            && iw >= 0
                            && (iw as usize) < in_w
                        {
                            plane[ih as usize * in_w + iw as usize]
                        } else {
                            pad_value
                        };
                        out.push(v);
                    }
                }
            }
        }
    }
    out
}

/// Output spatial extent of a convolution/pooling window.
pub fn conv_out_dim(
    in_dim: usize,
    kernel: usize,
    stride: usize,
    pad_before: usize,
    pad_after: usize,
    dilation: usize,
) -> usize {
    let effective = dilation * (kernel - 1) + 1;
    (in_dim + pad_before + pad_after - effective) / stride + 1
}
