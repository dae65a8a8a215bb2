/*
 * @Description  : 二值卷积层（XNOR-Net 的权重二值化卷积）
 *
 * 前向时以 W_b[o] = α_o · sign(W[o]) 代替实值权重做卷积，其中 α_o = mean(|W[o]|)（按输出通道）；
 * 参数blob中始终保存实值权重，优化器更新的也是实值权重。
 * 反向时权重梯度按 dW = dW_b · (1/n + α_o · 1{|W| ≤ 1}) 估计，n = C_in · k · k。
 */

use super::convolution::{ConvGeometry, init_conv_blobs, reshape_conv_top};
use super::{TraitLayer, check_4d, sign, should_propagate};
use crate::nn::{Blob, ConvolutionParameter, LayerError, LayerParameter, Phase};
use crate::tensor::Tensor;

#[derive(Debug)]
pub struct BinaryConvolution {
    layer_param: LayerParameter,
    conv_param: ConvolutionParameter,
    geometry: ConvGeometry,
    channels: usize,
    blobs: Vec<Blob>,
    // 以下为前向/反向用到的缓存，仅在setup/reshape时分配
    binary_weight: Tensor,
    binary_weight_diff: Tensor,
    alphas: Vec<f32>,
}

impl BinaryConvolution {
    pub fn new(param: &LayerParameter) -> Result<Self, LayerError> {
        let conv_param = param.convolution_param()?.clone();
        conv_param.validate()?;
        Ok(Self {
            layer_param: param.clone(),
            geometry: ConvGeometry::from_param(&conv_param),
            alphas: vec![0.; conv_param.num_output],
            conv_param,
            channels: 0,
            blobs: Vec::new(),
            binary_weight: Tensor::zeros(&[0]),
            binary_weight_diff: Tensor::zeros(&[0]),
        })
    }

    pub const fn conv_param(&self) -> &ConvolutionParameter {
        &self.conv_param
    }

    /// 最近一次前向传播所用的二值化权重 α·sign(W)
    pub const fn binary_weight(&self) -> &Tensor {
        &self.binary_weight
    }

    /// 最近一次前向传播所用的各输出通道缩放因子 α
    pub fn alphas(&self) -> &[f32] {
        &self.alphas
    }

    fn ensure_buffers(&mut self) {
        let weight_shape = self.blobs[0].shape();
        if self.binary_weight.shape() != weight_shape.as_slice() {
            self.binary_weight = Tensor::zeros(&weight_shape);
            self.binary_weight_diff = Tensor::zeros(&weight_shape);
        }
    }
}

/// 按输出通道二值化权重，写入`binary_weight`与`alphas`
fn binarize_weights(weight: &Tensor, binary_weight: &mut Tensor, alphas: &mut [f32]) {
    let per_output = weight.size() / alphas.len().max(1);
    if per_output == 0 {
        return;
    }
    let chunks = weight
        .data_as_slice()
        .chunks(per_output)
        .zip(binary_weight.data_as_slice_mut().chunks_mut(per_output));
    for (alpha, (real, binary)) in alphas.iter_mut().zip(chunks) {
        *alpha = real.iter().map(|w| w.abs()).sum::<f32>() / per_output as f32;
        for (b, &w) in binary.iter_mut().zip(real) {
            *b = *alpha * sign(w);
        }
    }
}

impl TraitLayer for BinaryConvolution {
    fn layer_param(&self) -> &LayerParameter {
        &self.layer_param
    }

    fn set_phase(&mut self, phase: Phase) {
        self.layer_param.phase = phase;
    }

    fn blobs(&self) -> &[Blob] {
        &self.blobs
    }

    fn blobs_mut(&mut self) -> &mut [Blob] {
        &mut self.blobs
    }

    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        Some(1)
    }

    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(1)
    }

    fn layer_setup(&mut self, bottom: &[Blob], _top: &[Blob]) -> Result<(), LayerError> {
        let [_, channels, _, _] = check_4d(&bottom[0], &self.layer_param.name)?;
        self.channels = channels;
        init_conv_blobs(
            &self.layer_param.name,
            &self.conv_param,
            channels,
            &mut self.blobs,
        )?;
        self.ensure_buffers();
        Ok(())
    }

    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        reshape_conv_top(
            &self.layer_param.name,
            &self.geometry,
            self.conv_param.num_output,
            self.channels,
            bottom,
            top,
        )?;
        self.ensure_buffers();
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        binarize_weights(
            &self.blobs[0].data(),
            &mut self.binary_weight,
            &mut self.alphas,
        );
        let input = bottom[0].data();
        let bias = self.blobs.get(1).map(Blob::data);
        let mut output = top[0].data_mut();
        self.geometry.forward(
            &input,
            &self.binary_weight,
            bias.as_deref(),
            &mut output,
        );
        Ok(())
    }

    fn backward(
        &mut self,
        top: &[Blob],
        propagate_down: &[bool],
        bottom: &[Blob],
    ) -> Result<(), LayerError> {
        let top_diff = top[0].diff();

        // 1. 对二值化权重的梯度 dW_b
        self.binary_weight_diff.fill(0.);
        self.geometry.backward_weight(
            &top_diff,
            &bottom[0].data(),
            &mut self.binary_weight_diff,
        );

        // 2. 换算为对实值权重的梯度并累加
        {
            let weight = self.blobs[0].data();
            let mut weight_diff = self.blobs[0].diff_mut();
            let per_output = weight.size() / self.alphas.len().max(1);
            let inv_n = if per_output == 0 {
                0.
            } else {
                1. / per_output as f32
            };
            let grads = weight_diff
                .data_as_slice_mut()
                .iter_mut()
                .zip(weight.data_as_slice())
                .zip(self.binary_weight_diff.data_as_slice());
            for (i, ((grad, &w), &binary_grad)) in grads.enumerate() {
                let alpha = self.alphas[i / per_output.max(1)];
                let ste = if w.abs() <= 1. { alpha } else { 0. };
                *grad += binary_grad * (inv_n + ste);
            }
        }

        if let Some(bias) = self.blobs.get(1) {
            ConvGeometry::backward_bias(&top_diff, &mut bias.diff_mut());
        }
        if should_propagate(propagate_down, 0) {
            self.geometry.backward_input(
                &top_diff,
                &self.binary_weight,
                &mut bottom[0].diff_mut(),
            );
        }
        Ok(())
    }
}
