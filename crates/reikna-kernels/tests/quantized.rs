//! Int8 operator paths: zero-point fusion, exact-arithmetic parity between
//! the packed and reference paths, and end-to-end quantization error bounds.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reikna_kernels::conv2d::{self, Conv2dParams, ConvAlgorithm};
use reikna_kernels::{
    dequantize, fullyconnected, quantize, DType, EngineOptions, Layout, QuantInfo, QuantParam,
    Tensor, TensorData,
};

fn options(vector_bytes: usize) -> EngineOptions {
    EngineOptions {
        vector_bytes: Some(vector_bytes),
        ..Default::default()
    }
}

fn quantize_vec(real: &[f32], scale: f32, zp: i32) -> Vec<i8> {
    real.iter().map(|&v| quantize(v, scale, zp)).collect()
}

fn i8_tensor(dims: Vec<usize>, layout: Layout, data: Vec<i8>, q: QuantInfo) -> Tensor {
    Tensor::new(dims, layout, TensorData::I8(data))
        .unwrap()
        .with_quant(q)
}

/// Per-channel kernel scales that actually differ per channel.
fn channel_scales(out_c: usize, base: f32) -> Vec<QuantParam> {
    (0..out_c)
        .map(|c| QuantParam {
            scale: base * (1.0 + c as f32 * 0.01),
            zero_point: 0,
        })
        .collect()
}

/// A 1x1 conv with in_c = out_c = 64 and per-channel quantization:
/// feeding the same dequantized inputs through two operators prepared
/// with input zero point 0 vs 5 must produce identical outputs — the
/// fusion folds the zero point into the bias exactly.
#[test]
fn scenario_zero_point_fusion_1x1() {
    let mut rng = StdRng::seed_from_u64(7070);
    let (in_c, out_c, h, w) = (64, 64, 4, 4);
    let s_in = 0.02f32;
    let s_out = 0.25f32;

    let input_real: Vec<f32> = (0..in_c * h * w).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let kernel_q: Vec<i8> = (0..out_c * in_c).map(|_| rng.gen_range(-100..=100)).collect();
    let bias_q: Vec<i32> = (0..out_c).map(|_| rng.gen_range(-500..500)).collect();

    let kernel = i8_tensor(
        vec![out_c, in_c, 1, 1],
        Layout::Nchw,
        kernel_q,
        QuantInfo::per_channel(channel_scales(out_c, 0.004)).unwrap(),
    );
    let bias = Tensor::new(vec![out_c], Layout::RowMajor, TensorData::I32(bias_q)).unwrap();
    let params = Conv2dParams::default();
    let opts = options(16);

    let mut outputs = Vec::new();
    for input_zp in [0, 5] {
        let input_q = quantize_vec(&input_real, s_in, input_zp);
        let input = i8_tensor(
            vec![1, in_c, h, w],
            Layout::Nchw,
            input_q,
            QuantInfo::per_tensor(s_in, input_zp),
        );
        let mut output = Tensor::zeros(vec![1, out_c, h, w], Layout::Nchw, DType::I8)
            .unwrap()
            .with_quant(QuantInfo::per_tensor(s_out, -1));

        let prepared =
            conv2d::prepare(&input, &output, &kernel, Some(&bias), &params, &opts).unwrap();
        assert_eq!(prepared.algorithm(), ConvAlgorithm::Gemm1x1);
        prepared.execute(&input, &mut output).unwrap();
        outputs.push(output.data().as_i8().unwrap().to_vec());
    }

    assert_eq!(outputs[0], outputs[1]);
}

/// The packed im2col path and the scalar reference path run the same exact
/// integer arithmetic, so their outputs must be bit-identical.
#[test]
fn packed_and_reference_int8_agree_exactly() {
    let mut rng = StdRng::seed_from_u64(7071);
    let (in_c, out_c, h, w) = (5, 9, 7, 6);
    let s_in = 0.03f32;
    let s_out = 0.4f32;
    let input_zp = -7;

    let input_q: Vec<i8> = (0..in_c * h * w).map(|_| rng.gen_range(-128..=127)).collect();
    let kernel_q: Vec<i8> = (0..out_c * in_c * 9).map(|_| rng.gen_range(-128..=127)).collect();
    let bias_q: Vec<i32> = (0..out_c).map(|_| rng.gen_range(-2000..2000)).collect();

    let input = i8_tensor(
        vec![1, in_c, h, w],
        Layout::Nchw,
        input_q,
        QuantInfo::per_tensor(s_in, input_zp),
    );
    let kernel = i8_tensor(
        vec![out_c, in_c, 3, 3],
        Layout::Nchw,
        kernel_q,
        QuantInfo::per_channel(channel_scales(out_c, 0.005)).unwrap(),
    );
    let bias = Tensor::new(vec![out_c], Layout::RowMajor, TensorData::I32(bias_q)).unwrap();
    let params = Conv2dParams {
        pad_top: 1,
        pad_left: 1,
        pad_bottom: 1,
        pad_right: 1,
        ..Default::default()
    };

    let mut results = Vec::new();
    for vb in [16usize, 0] {
        let mut output = Tensor::zeros(vec![1, out_c, h, w], Layout::Nchw, DType::I8)
            .unwrap()
            .with_quant(QuantInfo::per_tensor(s_out, 3));
        let prepared =
            conv2d::prepare(&input, &output, &kernel, Some(&bias), &params, &options(vb))
                .unwrap();
        if vb == 0 {
            assert_eq!(prepared.algorithm(), ConvAlgorithm::Reference);
        } else {
            assert_eq!(prepared.algorithm(), ConvAlgorithm::Im2colGemm);
        }
        prepared.execute(&input, &mut output).unwrap();
        results.push(output.data().as_i8().unwrap().to_vec());
    }
    assert_eq!(results[0], results[1]);
}

#[test]
fn grouped_int8_1x1_agrees_with_reference_path() {
    let mut rng = StdRng::seed_from_u64(7072);
    let (in_c, out_c, h, w, group) = (8, 12, 5, 5, 4);
    let in_cg = in_c / group;

    let input_q: Vec<i8> = (0..in_c * h * w).map(|_| rng.gen_range(-128..=127)).collect();
    let kernel_q: Vec<i8> = (0..out_c * in_cg).map(|_| rng.gen_range(-128..=127)).collect();

    let input = i8_tensor(
        vec![1, in_c, h, w],
        Layout::Nchw,
        input_q,
        QuantInfo::per_tensor(0.05, 4),
    );
    let kernel = i8_tensor(
        vec![out_c, in_cg, 1, 1],
        Layout::Nchw,
        kernel_q,
        QuantInfo::per_tensor(0.01, 0),
    );
    let params = Conv2dParams {
        group,
        ..Default::default()
    };

    let mut results = Vec::new();
    for vb in [16usize, 0] {
        let mut output = Tensor::zeros(vec![1, out_c, h, w], Layout::Nchw, DType::I8)
            .unwrap()
            .with_quant(QuantInfo::per_tensor(0.5, 0));
        let prepared =
            conv2d::prepare(&input, &output, &kernel, None, &params, &options(vb)).unwrap();
        prepared.execute(&input, &mut output).unwrap();
        results.push(output.data().as_i8().unwrap().to_vec());
    }
    assert_eq!(results[0], results[1]);
}

/// End-to-end error bound: dequantized int8 conv output tracks the real
/// convolution within one output quantum plus accumulated rounding.
#[test]
fn int8_conv_tracks_real_convolution() {
    let mut rng = StdRng::seed_from_u64(7073);
    let (in_c, out_c, h, w) = (4, 6, 6, 6);
    let (s_in, zp_in) = (0.015f32, 3);
    let s_k = 0.008f32;
    let (s_out, zp_out) = (0.05f32, -2);

    let input_real: Vec<f32> = (0..in_c * h * w).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let kernel_real: Vec<f32> =
        (0..out_c * in_c * 9).map(|_| rng.gen_range(-0.9..0.9)).collect();

    let input_q = quantize_vec(&input_real, s_in, zp_in);
    let kernel_q = quantize_vec(&kernel_real, s_k, 0);

    let input = i8_tensor(
        vec![1, in_c, h, w],
        Layout::Nchw,
        input_q.clone(),
        QuantInfo::per_tensor(s_in, zp_in),
    );
    let kernel = i8_tensor(
        vec![out_c, in_c, 3, 3],
        Layout::Nchw,
        kernel_q.clone(),
        QuantInfo::per_tensor(s_k, 0),
    );
    let params = Conv2dParams {
        pad_top: 1,
        pad_left: 1,
        pad_bottom: 1,
        pad_right: 1,
        ..Default::default()
    };
    let mut output = Tensor::zeros(vec![1, out_c, h, w], Layout::Nchw, DType::I8)
        .unwrap()
        .with_quant(QuantInfo::per_tensor(s_out, zp_out));

    let prepared = conv2d::prepare(&input, &output, &kernel, None, &params, &options(16)).unwrap();
    prepared.execute(&input, &mut output).unwrap();
    let got = output.data().as_i8().unwrap();

    // real-domain oracle over the dequantized operands (padding dequantizes
    // to exactly 0.0 because the pad value is the input zero point)
    let deq_in: Vec<f32> = input_q.iter().map(|&q| dequantize(q, s_in, zp_in)).collect();
    let deq_k: Vec<f32> = kernel_q.iter().map(|&q| dequantize(q, s_k, 0)).collect();
    let mut expect = vec![0f32; out_c * h * w];
    reikna_kernels::reference::conv2d_ref(
        &deq_in, in_c, h, w, &deq_k, out_c, 3, 3, None, 1, 1, 1, 1, 1, 1, 1, &mut expect, h, w,
    );

    let lo = (-128 - zp_out) as f32 * s_out;
    let hi = (127 - zp_out) as f32 * s_out;
    for i in 0..got.len() {
        let got_real = dequantize(got[i], s_out, zp_out);
        let expect_c = expect[i].clamp(lo, hi);
        assert!(
            (got_real - expect_c).abs() <= s_out * 1.01,
            "idx {}: {} vs {}",
            i,
            got_real,
            expect_c
        );
    }
}

#[test]
fn fc_int8_per_channel_tracks_real_product() {
    let mut rng = StdRng::seed_from_u64(7074);
    let (batch, in_n, out_n) = (3, 32, 10);
    let (s_in, zp_in) = (0.02f32, 6);
    let (s_out, zp_out) = (0.08f32, 1);

    let x_real: Vec<f32> = (0..batch * in_n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let w_real: Vec<f32> = (0..out_n * in_n).map(|_| rng.gen_range(-0.8..0.8)).collect();

    let w_params = channel_scales(out_n, 0.007);
    let x_q = quantize_vec(&x_real, s_in, zp_in);
    let w_q: Vec<i8> = (0..out_n)
        .flat_map(|o| {
            let s = w_params[o].scale;
            w_real[o * in_n..(o + 1) * in_n]
                .iter()
                .map(move |&v| quantize(v, s, 0))
                .collect::<Vec<_>>()
        })
        .collect();

    let input = i8_tensor(
        vec![batch, in_n],
        Layout::RowMajor,
        x_q.clone(),
        QuantInfo::per_tensor(s_in, zp_in),
    );
    let weight = i8_tensor(
        vec![out_n, in_n],
        Layout::RowMajor,
        w_q.clone(),
        QuantInfo::per_channel(w_params.clone()).unwrap(),
    );
    let mut output = Tensor::zeros(vec![batch, out_n], Layout::RowMajor, DType::I8)
        .unwrap()
        .with_quant(QuantInfo::per_tensor(s_out, zp_out));

    let prepared =
        fullyconnected::prepare(&input, &output, &weight, None, &options(16)).unwrap();
    prepared.execute(&input, &mut output).unwrap();
    let got = output.data().as_i8().unwrap();

    let lo = (-128 - zp_out) as f32 * s_out;
    let hi = (127 - zp_out) as f32 * s_out;
    for b in 0..batch {
        for o in 0..out_n {
            let mut expect = 0f32;
            for k in 0..in_n {
                expect += dequantize(x_q[b * in_n + k], s_in, zp_in)
                    * dequantize(w_q[o * in_n + k], w_params[o].scale, 0);
            }
            let got_real = dequantize(got[b * out_n + o], s_out, zp_out);
            let expect_c = expect.clamp(lo, hi);
            assert!(
                (got_real - expect_c).abs() <= s_out * 1.01,
                "({}, {}): {} vs {}",
                b,
                o,
                got_real,
                expect_c
            );
        }
    }
}

#[test]
fn prepare_rejects_invalid_quantization() {
    let input = Tensor::zeros(vec![1, 4, 4, 4], Layout::Nchw, DType::I8).unwrap();
    let kernel = Tensor::zeros(vec![4, 4, 1, 1], Layout::Nchw, DType::I8).unwrap();
    let output = Tensor::zeros(vec![1, 4, 4, 4], Layout::Nchw, DType::I8).unwrap();
    let params = Conv2dParams::default();

    // missing quantization info entirely
    assert!(conv2d::prepare(&input, &output, &kernel, None, &params, &options(16)).is_err());

    // asymmetric kernel (non-zero zero point) is an explicit error
    let input = input.with_quant(QuantInfo::per_tensor(0.1, 0));
    let output = output.with_quant(QuantInfo::per_tensor(0.1, 0));
    let kernel = kernel.with_quant(QuantInfo::per_tensor(0.1, 3));
    assert!(conv2d::prepare(&input, &output, &kernel, None, &params, &options(16)).is_err());
}
