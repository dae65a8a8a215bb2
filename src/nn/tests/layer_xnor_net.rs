/*
 * @Description  : XnorNet组合层单元测试
 */

use crate::nn::{
    Blob, Convolution, ConvolutionParameter, LayerParameter, LayerType, Phase, TraitLayer,
    XnorNet,
};
use crate::tensor::Tensor;
use approx::assert_abs_diff_eq;

// 形状(1, 4, 2, 2)，各像素的通道均值为[1, 1, 0.5, 0]
#[rustfmt::skip]
const X: &[f32] = &[
    1.0, -2.0, 0.5, -1.0,
    3.0, 2.0, -0.5, 1.0,
    -1.0, 0.0, 0.5, -1.0,
    1.0, 4.0, 1.5, 1.0,
];
// 形状(2, 4, 1, 1)
const WEIGHT: &[f32] = &[1.0, 1.0, -0.5, 2.0, -0.5, -0.5, -0.5, -0.5];

fn xnor_param(conv_param: ConvolutionParameter, phase: Phase) -> LayerParameter {
    LayerParameter::new("xnor", LayerType::XnorNet)
        .with_convolution_param(conv_param)
        .with_phase(phase)
}

fn setup_xnor(phase: Phase) -> (XnorNet, [Blob; 1], [Blob; 1]) {
    let param = xnor_param(
        ConvolutionParameter::new(2, 1).with_bias_term(false),
        phase,
    );
    let mut layer = XnorNet::new(&param).unwrap();
    let bottom = [Blob::from_tensor(Tensor::new(X, &[1, 4, 2, 2]))];
    let top = [Blob::empty()];
    layer.setup(&bottom, &top).unwrap();
    layer.blobs()[0]
        .set_data(&Tensor::new(WEIGHT, &[2, 4, 1, 1]))
        .unwrap();
    (layer, bottom, top)
}

fn assert_slice_eq(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (&a, &e) in actual.iter().zip(expected) {
        assert_abs_diff_eq!(a, e, epsilon = 1e-5);
    }
}

#[test]
fn test_forward() {
    let (mut layer, bottom, top) = setup_xnor(Phase::Train);
    assert_eq!(top[0].shape(), vec![1, 2, 2, 2]);

    layer.forward(&bottom, &top).unwrap();
    assert_slice_eq(layer.binary_convolution_layer().alphas(), &[1.125, 0.5]);
    assert_slice_eq(layer.binactiv_layer().channel_mean().data_as_slice(), &[1., 1., 0.5, 0.]);
    // Y = binary_conv(sign(X)) ⊙ K
    assert_slice_eq(
        top[0].data().data_as_slice(),
        &[4.5, 0., 0., 0., -1., -1., -0.5, 0.],
    );
}

#[test]
fn test_backward() {
    let (mut layer, bottom, top) = setup_xnor(Phase::Train);
    layer.forward(&bottom, &top).unwrap();
    top[0].diff_mut().fill(1.);
    layer.backward(&top, &[true], &bottom).unwrap();

    // 经过二值卷积与BinActiv的直通估计，缩放因子一支没有梯度
    #[rustfmt::skip]
    let expected_bottom_diff = [
        0.625, 0., 0.3125, 0.,
        0., 0., 0.3125, 0.,
        -1.625, -1.625, -0.8125, 0.,
        0.625, 0., 0., 0.,
    ];
    assert_slice_eq(bottom[0].diff().data_as_slice(), &expected_bottom_diff);

    // 本层参数的梯度即二值卷积子层的参数梯度
    assert_slice_eq(
        layer.blobs()[0].diff().data_as_slice(),
        &[0.6875, 2.0625, 0.6875, 0.625, 0.375, 1.125, 0.375, 1.875],
    );
}

#[test]
fn test_backward_without_propagate_down() {
    let (mut layer, bottom, top) = setup_xnor(Phase::Train);
    layer.forward(&bottom, &top).unwrap();
    top[0].diff_mut().fill(1.);
    layer.backward(&top, &[false], &bottom).unwrap();

    assert_eq!(bottom[0].diff().sum(), 0.);
    assert_eq!(layer.blobs()[0].diff().sum(), 0.);
}

#[test]
fn test_params_aliased_with_binary_convolution() {
    let (layer, _, _) = setup_xnor(Phase::Train);
    let own = &layer.blobs()[0];
    let inner = &layer.binary_convolution_layer().blobs()[0];
    assert_eq!(layer.blobs().len(), 1);
    assert!(own.shares_data_with(inner));
    assert!(own.shares_diff_with(inner));

    // 本层 → 子层
    own.data_mut().fill(0.3);
    assert!(inner.data().data_as_slice().iter().all(|&w| w == 0.3));
    // 子层 → 本层
    inner.diff_mut().fill(-2.);
    assert_eq!(own.diff().sum(), -16.);
}

#[test]
fn test_resetup_keeps_params() {
    let (mut layer, bottom, top) = setup_xnor(Phase::Train);
    layer.setup(&bottom, &top).unwrap();

    assert_eq!(layer.blobs().len(), 1);
    let own = &layer.blobs()[0];
    let inner = &layer.binary_convolution_layer().blobs()[0];
    assert!(own.shares_data_with(inner));
    assert!(own.shares_diff_with(inner));
    assert_slice_eq(own.data().data_as_slice(), WEIGHT);

    layer.forward(&bottom, &top).unwrap();
    assert_slice_eq(
        top[0].data().data_as_slice(),
        &[4.5, 0., 0., 0., -1., -1., -0.5, 0.],
    );
}

#[test]
fn test_params_with_bias() {
    let param = xnor_param(ConvolutionParameter::new(3, 3), Phase::Train);
    let mut layer = XnorNet::new(&param).unwrap();
    layer
        .setup(&[Blob::new(&[1, 2, 5, 5])], &[Blob::empty()])
        .unwrap();
    assert_eq!(layer.blobs().len(), 2);
    assert_eq!(layer.blobs()[0].shape(), vec![3, 2, 3, 3]);
    assert_eq!(layer.blobs()[1].shape(), vec![3]);
    assert!(layer.blobs()[1].shares_data_with(&layer.binary_convolution_layer().blobs()[1]));
}

#[test]
fn test_output_shape_matches_convolution() {
    let conv_param = ConvolutionParameter::new(5, 3).with_stride(2).with_pad(1);
    let bottom = [Blob::new(&[2, 3, 7, 6])];

    let mut xnor = XnorNet::new(&xnor_param(conv_param.clone(), Phase::Train)).unwrap();
    let xnor_top = [Blob::empty()];
    xnor.setup(&bottom, &xnor_top).unwrap();

    let mut conv = Convolution::new(
        &LayerParameter::new("conv", LayerType::Convolution).with_convolution_param(conv_param),
    )
    .unwrap();
    let conv_top = [Blob::empty()];
    conv.setup(&bottom, &conv_top).unwrap();

    assert_eq!(xnor_top[0].shape(), conv_top[0].shape());
    assert_eq!(xnor_top[0].shape(), vec![2, 5, 4, 3]);

    // 输入形状改变后重新推断
    bottom[0].reshape(&[1, 3, 9, 9]);
    xnor.reshape(&bottom, &xnor_top).unwrap();
    conv.reshape(&bottom, &conv_top).unwrap();
    assert_eq!(xnor_top[0].shape(), conv_top[0].shape());
    xnor.forward(&bottom, &xnor_top).unwrap();
}

#[test]
fn test_evaluation_mode_uses_current_shared_params() {
    let param = xnor_param(
        ConvolutionParameter::new(1, 1).with_bias_term(false),
        Phase::Test,
    );
    let mut layer = XnorNet::new(&param).unwrap();
    // 通道均值为1，sign全为+1
    let bottom = [Blob::from_tensor(Tensor::new(&[0.5, 1.5], &[1, 2, 1, 1]))];
    let top = [Blob::empty()];
    layer.setup(&bottom, &top).unwrap();

    // 模拟评估网络共享训练网络的参数：本层参数改为指向外部存储
    let external = Blob::from_tensor(Tensor::new(&[1., 1.], &[1, 2, 1, 1]));
    layer.blobs_mut()[0].share_data(&external).unwrap();
    layer.forward(&bottom, &top).unwrap();
    assert_abs_diff_eq!(top[0].data()[[0, 0, 0, 0]], 2., epsilon = 1e-6);

    external.set_data(&Tensor::new(&[-3., -1.], &[1, 2, 1, 1])).unwrap();
    layer.forward(&bottom, &top).unwrap();
    assert_abs_diff_eq!(top[0].data()[[0, 0, 0, 0]], -4., epsilon = 1e-6);

    // 换成另一份外部参数
    let another = Blob::from_tensor(Tensor::new(&[0.5, -0.5], &[1, 2, 1, 1]));
    layer.blobs_mut()[0].share_data(&another).unwrap();
    layer.forward(&bottom, &top).unwrap();
    assert_abs_diff_eq!(top[0].data()[[0, 0, 0, 0]], 0., epsilon = 1e-6);
    assert_slice_eq(
        layer.binary_convolution_layer().blobs()[0].data().data_as_slice(),
        &[0.5, -0.5],
    );
}

#[test]
fn test_train_mode_does_not_sync_params() {
    let param = xnor_param(
        ConvolutionParameter::new(1, 1).with_bias_term(false),
        Phase::Train,
    );
    let mut layer = XnorNet::new(&param).unwrap();
    let bottom = [Blob::from_tensor(Tensor::new(&[0.5, 1.5], &[1, 2, 1, 1]))];
    let top = [Blob::empty()];
    layer.setup(&bottom, &top).unwrap();
    layer.blobs()[0]
        .set_data(&Tensor::new(&[1., 1.], &[1, 2, 1, 1]))
        .unwrap();

    let external = Blob::from_tensor(Tensor::new(&[-3., -1.], &[1, 2, 1, 1]));
    layer.blobs_mut()[0].share_data(&external).unwrap();
    layer.forward(&bottom, &top).unwrap();
    // 训练阶段子层仍使用自己的参数
    assert_abs_diff_eq!(top[0].data()[[0, 0, 0, 0]], 2., epsilon = 1e-6);

    // 切换到评估阶段后才会同步
    layer.set_phase(Phase::Test);
    assert_eq!(layer.binary_convolution_layer().phase(), Phase::Test);
    assert_eq!(layer.binactiv_layer().phase(), Phase::Test);
    layer.forward(&bottom, &top).unwrap();
    assert_abs_diff_eq!(top[0].data()[[0, 0, 0, 0]], -4., epsilon = 1e-6);
}
