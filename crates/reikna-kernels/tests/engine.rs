//! Cross-cutting engine behavior: pooling edge semantics, packed-layout
//! round trips and configuration knobs.

use half::f16;
use ndarray::Array4;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reikna_kernels::conv2d::{self, Conv2dParams, ConvAlgorithm};
use reikna_core::{nc1hwc0_to_nchw, nchw_to_nc1hwc0};
use reikna_kernels::maxpool::{self, MaxPool2dParams};
use reikna_kernels::{DType, EngineOptions, Layout, Tensor, TensorData};

fn options(vector_bytes: usize) -> EngineOptions {
    EngineOptions {
        vector_bytes: Some(vector_bytes),
        ..Default::default()
    }
}

/// 2x2 stride-2 pooling over an odd extent with ceil_mode: the output
/// extent is ceil(in/2), and the synthesized trailing column/row is
/// excluded from the max rather than contributing a zero.
#[test]
fn scenario_ceil_mode_pooling_odd_extent() {
    let (c, h, w) = (2, 7, 7);
    // strictly negative input so any zero-padding leak is visible
    let data: Vec<f32> = (0..c * h * w).map(|i| -1.0 - ((i * 31) % 97) as f32 * 0.01).collect();
    let input = Tensor::new(vec![1, c, h, w], Layout::Nchw, TensorData::F32(data.clone())).unwrap();

    let params = MaxPool2dParams {
        kernel_h: 2,
        kernel_w: 2,
        stride_h: 2,
        stride_w: 2,
        pad_top: 0,
        pad_left: 0,
        pad_bottom: 0,
        pad_right: 0,
        ceil_mode: true,
    };
    let (oh, ow) = (4, 4); // ceil(7/2)
    let mut output = Tensor::zeros(vec![1, c, oh, ow], Layout::Nchw, DType::F32).unwrap();

    let prepared = maxpool::prepare(&input, &output, &params, &options(16)).unwrap();
    assert_eq!(prepared.output_dims(), [1, c, oh, ow]);
    prepared.execute(&input, &mut output).unwrap();

    let got = output.data().as_f32().unwrap();
    for (i, &v) in got.iter().enumerate() {
        assert!(v < 0.0, "idx {}: padding leaked into the max ({})", i, v);
    }
    // the corner window covers exactly input[6][6] of each channel
    for ch in 0..c {
        assert_eq!(
            got[(ch * oh + 3) * ow + 3],
            data[(ch * h + 6) * w + 6],
            "single-element corner window"
        );
    }
}

#[test]
fn int8_pooling_matches_float_ordering() {
    let mut rng = StdRng::seed_from_u64(60);
    let (c, h, w) = (3, 6, 9);
    let data: Vec<i8> = (0..c * h * w).map(|_| rng.gen_range(-128..=127)).collect();
    let input = Tensor::new(vec![1, c, h, w], Layout::Nchw, TensorData::I8(data.clone())).unwrap();

    let params = MaxPool2dParams {
        kernel_h: 2,
        kernel_w: 2,
        stride_h: 2,
        stride_w: 2,
        pad_top: 0,
        pad_left: 0,
        pad_bottom: 0,
        pad_right: 0,
        ceil_mode: true,
    };
    let (oh, ow) = (3, 5);
    let mut output = Tensor::zeros(vec![1, c, oh, ow], Layout::Nchw, DType::I8).unwrap();
    let prepared = maxpool::prepare(&input, &output, &params, &options(16)).unwrap();
    prepared.execute(&input, &mut output).unwrap();

    // same pooling on the values widened to f32
    let f_data: Vec<f32> = data.iter().map(|&v| v as f32).collect();
    let f_input = Tensor::new(vec![1, c, h, w], Layout::Nchw, TensorData::F32(f_data)).unwrap();
    let mut f_output = Tensor::zeros(vec![1, c, oh, ow], Layout::Nchw, DType::F32).unwrap();
    let f_prepared = maxpool::prepare(&f_input, &f_output, &params, &options(16)).unwrap();
    f_prepared.execute(&f_input, &mut f_output).unwrap();

    let got = output.data().as_i8().unwrap();
    let expect = f_output.data().as_f32().unwrap();
    for i in 0..got.len() {
        assert_eq!(got[i] as f32, expect[i], "idx {}", i);
    }
}

#[test]
fn nc1hwc0_round_trip_f16_with_tail() {
    let mut rng = StdRng::seed_from_u64(61);
    let (n, c, h, w, c0) = (2, 11, 3, 5, 8);
    let src: Vec<f16> = (0..n * c * h * w)
        .map(|_| f16::from_f32(rng.gen_range(-4.0..4.0)))
        .collect();
    let packed = nchw_to_nc1hwc0(&src, n, c, h, w, c0).unwrap();
    assert_eq!(packed.len(), n * 2 * h * w * c0);
    let back = nc1hwc0_to_nchw(&packed, n, c, h, w, c0).unwrap();
    assert_eq!(back, src);
}

#[test]
fn disabling_winograd_reroutes_to_im2col_with_same_result() {
    let mut rng = StdRng::seed_from_u64(62);
    let input = Tensor::from_array4_f32(
        Array4::<f32>::random_using((1, 6, 12, 12), Uniform::new(-1.0, 1.0), &mut rng),
        Layout::Nchw,
    )
    .unwrap();
    let kernel = Tensor::from_array4_f32(
        Array4::<f32>::random_using((6, 6, 3, 3), Uniform::new(-1.0, 1.0), &mut rng),
        Layout::Nchw,
    )
    .unwrap();
    let params = Conv2dParams {
        pad_top: 1,
        pad_left: 1,
        pad_bottom: 1,
        pad_right: 1,
        ..Default::default()
    };

    let run = |allow_winograd: bool| {
        let opts = EngineOptions {
            vector_bytes: Some(16),
            allow_winograd,
            ..Default::default()
        };
        let mut output = Tensor::zeros(vec![1, 6, 12, 12], Layout::Nchw, DType::F32).unwrap();
        let prepared = conv2d::prepare(&input, &output, &kernel, None, &params, &opts).unwrap();
        let alg = prepared.algorithm();
        prepared.execute(&input, &mut output).unwrap();
        (alg, output.data().as_f32().unwrap().to_vec())
    };

    let (alg_wino, out_wino) = run(true);
    let (alg_gemm, out_gemm) = run(false);
    assert_eq!(alg_wino, ConvAlgorithm::WinogradB4F3);
    assert_eq!(alg_gemm, ConvAlgorithm::Im2colGemm);
    for i in 0..out_wino.len() {
        let rel = (out_wino[i] - out_gemm[i]).abs() / out_gemm[i].abs().max(1.0);
        assert!(rel < 1e-3, "idx {}", i);
    }
}
