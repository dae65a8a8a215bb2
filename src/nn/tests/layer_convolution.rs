/*
 * @Description  : Convolution层单元测试（数值与手算/PyTorch结果对照）
 */

use crate::assert_err;
use crate::nn::{
    Blob, Convolution, ConvolutionParameter, FillerParameter, LayerError, LayerParameter,
    LayerType, TraitLayer,
};
use crate::tensor::Tensor;
use approx::assert_abs_diff_eq;

#[rustfmt::skip]
const X_3X3: &[f32] = &[
    1.0, 2.0, 3.0,
    4.0, 5.0, 6.0,
    7.0, 8.0, 9.0,
];

fn conv_layer(conv_param: ConvolutionParameter) -> Convolution {
    let param =
        LayerParameter::new("conv", LayerType::Convolution).with_convolution_param(conv_param);
    Convolution::new(&param).unwrap()
}

#[test]
fn test_forward_with_bias() {
    #[rustfmt::skip]
    let x = Tensor::new(&[
        1.0, 2.0, 3.0, 4.0,
        5.0, 6.0, 7.0, 8.0,
        9.0, 10.0, 11.0, 12.0,
        13.0, 14.0, 15.0, 16.0,
    ], &[1, 1, 4, 4]);
    let bottom = [Blob::from_tensor(x)];
    let top = [Blob::empty()];

    let mut conv = conv_layer(ConvolutionParameter::new(2, 2));
    conv.setup(&bottom, &top).unwrap();
    assert_eq!(top[0].shape(), vec![1, 2, 3, 3]);
    assert_eq!(conv.blobs().len(), 2);
    assert_eq!(conv.blobs()[0].shape(), vec![2, 1, 2, 2]);
    assert_eq!(conv.blobs()[1].shape(), vec![2]);

    // filter 0为对角线，filter 1为反对角线
    conv.blobs()[0]
        .set_data(&Tensor::new(&[1., 0., 0., 1., 0., 1., 1., 0.], &[2, 1, 2, 2]))
        .unwrap();
    conv.blobs()[1]
        .set_data(&Tensor::new(&[0.5, -0.5], &[2]))
        .unwrap();
    conv.forward(&bottom, &top).unwrap();

    #[rustfmt::skip]
    let expected = [
        7.5, 9.5, 11.5,
        15.5, 17.5, 19.5,
        23.5, 25.5, 27.5,
        6.5, 8.5, 10.5,
        14.5, 16.5, 18.5,
        22.5, 24.5, 26.5,
    ];
    for (&y, &e) in top[0].data().data_as_slice().iter().zip(&expected) {
        assert_abs_diff_eq!(y, e, epsilon = 1e-5);
    }
}

#[test]
fn test_forward_with_stride_and_pad() {
    let bottom = [Blob::from_tensor(Tensor::new(X_3X3, &[1, 1, 3, 3]))];
    let top = [Blob::empty()];
    let mut conv = conv_layer(
        ConvolutionParameter::new(1, 3)
            .with_stride(2)
            .with_pad(1)
            .with_bias_term(false)
            .with_weight_filler(FillerParameter::Constant { value: 1. }),
    );
    conv.setup(&bottom, &top).unwrap();
    assert_eq!(conv.blobs().len(), 1);
    assert_eq!(top[0].shape(), vec![1, 1, 2, 2]);

    conv.forward(&bottom, &top).unwrap();
    assert_eq!(top[0].data().data_as_slice(), &[12., 16., 24., 28.]);
}

#[test]
fn test_backward() {
    let bottom = [Blob::from_tensor(Tensor::new(X_3X3, &[1, 1, 3, 3]))];
    let top = [Blob::empty()];
    let mut conv = conv_layer(ConvolutionParameter::new(1, 2));
    conv.setup(&bottom, &top).unwrap();
    conv.blobs()[0]
        .set_data(&Tensor::new(&[0.1, 0.2, 0.3, 0.4], &[1, 1, 2, 2]))
        .unwrap();
    conv.blobs()[1].set_data(&Tensor::new(&[0.5], &[1])).unwrap();
    conv.forward(&bottom, &top).unwrap();
    for (&y, &e) in top[0].data().data_as_slice().iter().zip(&[4.2, 5.2, 7.2, 8.2]) {
        assert_abs_diff_eq!(y, e, epsilon = 1e-5);
    }

    // MSE(输出, [5, 6, 8, 9])对输出的梯度均为-0.4
    top[0].diff_mut().fill(-0.4);
    conv.backward(&top, &[true], &bottom).unwrap();

    let weight_diff = conv.blobs()[0].diff();
    for (&g, &e) in weight_diff
        .data_as_slice()
        .iter()
        .zip(&[-4.8, -6.4, -9.6, -11.2])
    {
        assert_abs_diff_eq!(g, e, epsilon = 1e-5);
    }
    assert_abs_diff_eq!(conv.blobs()[1].diff().data_as_slice()[0], -1.6, epsilon = 1e-5);

    #[rustfmt::skip]
    let expected_bottom_diff = [
        -0.04, -0.12, -0.08,
        -0.16, -0.40, -0.24,
        -0.12, -0.28, -0.16,
    ];
    for (&g, &e) in bottom[0]
        .diff()
        .data_as_slice()
        .iter()
        .zip(&expected_bottom_diff)
    {
        assert_abs_diff_eq!(g, e, epsilon = 1e-5);
    }
}

#[test]
fn test_backward_accumulates_param_diff() {
    let bottom = [Blob::from_tensor(Tensor::new(X_3X3, &[1, 1, 3, 3]))];
    let top = [Blob::empty()];
    let mut conv = conv_layer(ConvolutionParameter::new(1, 2));
    conv.setup(&bottom, &top).unwrap();
    conv.forward(&bottom, &top).unwrap();
    top[0].diff_mut().fill(1.);

    conv.backward(&top, &[false], &bottom).unwrap();
    conv.backward(&top, &[false], &bottom).unwrap();
    // 两次反向的参数梯度累加，窗口[1, 2, 4, 5]等之和为12
    assert_abs_diff_eq!(conv.blobs()[0].diff()[[0, 0, 0, 0]], 24., epsilon = 1e-5);
    assert_abs_diff_eq!(conv.blobs()[1].diff().data_as_slice()[0], 8., epsilon = 1e-5);
    // propagate_down为false时输入梯度保持不变
    assert_eq!(bottom[0].diff().sum(), 0.);
}

#[test]
fn test_reshape_follows_input_shape() {
    let bottom = [Blob::new(&[1, 2, 5, 5])];
    let top = [Blob::empty()];
    let mut conv = conv_layer(ConvolutionParameter::new(4, 3));
    conv.setup(&bottom, &top).unwrap();
    assert_eq!(top[0].shape(), vec![1, 4, 3, 3]);

    bottom[0].reshape(&[3, 2, 7, 6]);
    conv.reshape(&bottom, &top).unwrap();
    assert_eq!(top[0].shape(), vec![3, 4, 5, 4]);

    bottom[0].reshape(&[1, 3, 5, 5]);
    assert_err!(
        conv.reshape(&bottom, &top),
        LayerError::ShapeMismatch([1, 2, 5, 5], [1, 3, 5, 5], "层conv的输入通道数与setup时不一致")
    );
}

#[test]
fn test_invalid_setups() {
    let top = [Blob::empty()];

    // 输入数量不对
    let mut conv = conv_layer(ConvolutionParameter::new(1, 3));
    let two_bottoms = [Blob::new(&[1, 1, 3, 3]), Blob::new(&[1, 1, 3, 3])];
    assert_err!(
        conv.setup(&two_bottoms, &top),
        LayerError::InvalidArity { kind: "bottom", expected: 1, got: 2, .. }
    );

    // 输入比卷积核还小
    let mut conv = conv_layer(ConvolutionParameter::new(1, 3));
    assert_err!(
        conv.setup(&[Blob::new(&[1, 1, 2, 2])], &top),
        LayerError::InvalidParameter(msg) if msg.contains("小于卷积核尺寸")
    );

    // 输入不是4维
    let mut conv = conv_layer(ConvolutionParameter::new(1, 1));
    assert_err!(
        conv.setup(&[Blob::new(&[2, 2])], &top),
        LayerError::InvalidParameter("层conv的输入必须是4维[N, C, H, W]，实际形状为[2, 2]")
    );

    // 原地计算
    let mut conv = conv_layer(ConvolutionParameter::new(1, 1));
    let blob = Blob::new(&[1, 1, 2, 2]);
    assert_err!(
        conv.setup(&[blob.clone()], &[blob]),
        LayerError::InvalidParameter("层conv不支持原地计算")
    );
}

#[test]
fn test_invalid_params() {
    let param = LayerParameter::new("conv", LayerType::Convolution);
    assert_err!(
        Convolution::new(&param),
        LayerError::InvalidParameter("Convolution类型的层conv缺少convolution_param")
    );

    let param = LayerParameter::new("conv", LayerType::Convolution)
        .with_convolution_param(ConvolutionParameter::new(1, 0));
    assert_err!(
        Convolution::new(&param),
        LayerError::InvalidParameter("卷积核尺寸必须大于0")
    );

    let param = LayerParameter::new("conv", LayerType::Convolution)
        .with_convolution_param(ConvolutionParameter::new(1, 3).with_stride(0));
    assert_err!(
        Convolution::new(&param),
        LayerError::InvalidParameter("卷积步长必须大于0")
    );
}

#[test]
fn test_preset_blobs_are_validated() {
    let bottom = [Blob::new(&[1, 2, 3, 3])];
    let top = [Blob::empty()];
    let mut conv = conv_layer(ConvolutionParameter::new(1, 3));
    conv.setup(&bottom, &top).unwrap();

    // 重新setup时已有的参数保持不变
    conv.blobs()[0].data_mut().fill(0.25);
    conv.setup(&bottom, &top).unwrap();
    assert_abs_diff_eq!(conv.blobs()[0].data().sum(), 0.25 * 18., epsilon = 1e-5);

    // 输入通道改变后已有权重形状不再匹配
    let other_bottom = [Blob::new(&[1, 3, 3, 3])];
    assert_err!(
        conv.setup(&other_bottom, &top),
        LayerError::ShapeMismatch { .. }
    );
}
