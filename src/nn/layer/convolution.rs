/*
 * @Description  : 2D 卷积层（Caffe 风格）
 *
 * - 输入必须是 4D [N, C_in, H, W]，输出为 [N, num_output, H', W']
 * - H' = (H + 2*pad - kernel) / stride + 1，W' 同理
 * - 参数blob：[权重 [num_output, C_in, k, k]，偏置 [num_output]（可选）]
 * - 反向传播时参数梯度累加（由调用方负责清零），输入梯度直接覆盖
 */

use tracing::debug;

use super::{TraitLayer, check_4d, check_not_in_place, should_propagate};
use crate::nn::{Blob, ConvolutionParameter, LayerError, LayerParameter, Phase};
use crate::tensor::Tensor;

/// 卷积的几何参数，供`Convolution`与`BinaryConvolution`共用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(in crate::nn::layer) struct ConvGeometry {
    kernel: usize,
    stride: usize,
    pad: usize,
}

impl ConvGeometry {
    pub(in crate::nn::layer) const fn from_param(param: &ConvolutionParameter) -> Self {
        Self {
            kernel: param.kernel_size,
            stride: param.stride,
            pad: param.pad,
        }
    }

    /// 单个空间维度上的输出尺寸
    pub(in crate::nn::layer) fn output_extent(&self, input: usize) -> Result<usize, LayerError> {
        let padded = input + 2 * self.pad;
        if padded < self.kernel {
            return Err(LayerError::InvalidParameter(format!(
                "卷积输出尺寸无效：填充后的输入尺寸{padded}小于卷积核尺寸{}",
                self.kernel
            )));
        }
        Ok((padded - self.kernel) / self.stride + 1)
    }

    /// 输出位置`out`与核偏移`k`对应的输入位置，落在填充区时返回None
    #[inline]
    fn input_index(&self, out: usize, k: usize, extent: usize) -> Option<usize> {
        let pos = (out * self.stride + k).checked_sub(self.pad)?;
        (pos < extent).then_some(pos)
    }

    /// output = conv(input, weight) + bias
    pub(in crate::nn::layer) fn forward(
        &self,
        input: &Tensor,
        weight: &Tensor,
        bias: Option<&Tensor>,
        output: &mut Tensor,
    ) {
        let (batch, in_c, in_h, in_w) = dims(input);
        let (_, out_c, out_h, out_w) = dims(output);
        let k = self.kernel;

        for n in 0..batch {
            for oc in 0..out_c {
                let b = bias.map_or(0., |b| b.data_as_slice()[oc]);
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let mut sum = b;
                        for ic in 0..in_c {
                            for kh in 0..k {
                                let Some(ih) = self.input_index(oh, kh, in_h) else {
                                    continue;
                                };
                                for kw in 0..k {
                                    let Some(iw) = self.input_index(ow, kw, in_w) else {
                                        continue;
                                    };
                                    sum += input[[n, ic, ih, iw]] * weight[[oc, ic, kh, kw]];
                                }
                            }
                        }
                        output[[n, oc, oh, ow]] = sum;
                    }
                }
            }
        }
    }

    /// dL/dX：转置卷积，结果覆盖`bottom_diff`
    pub(in crate::nn::layer) fn backward_input(
        &self,
        top_diff: &Tensor,
        weight: &Tensor,
        bottom_diff: &mut Tensor,
    ) {
        let (batch, out_c, out_h, out_w) = dims(top_diff);
        let (_, in_c, in_h, in_w) = dims(bottom_diff);
        let k = self.kernel;

        bottom_diff.fill(0.);
        for n in 0..batch {
            for oc in 0..out_c {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let grad = top_diff[[n, oc, oh, ow]];
                        for ic in 0..in_c {
                            for kh in 0..k {
                                let Some(ih) = self.input_index(oh, kh, in_h) else {
                                    continue;
                                };
                                for kw in 0..k {
                                    let Some(iw) = self.input_index(ow, kw, in_w) else {
                                        continue;
                                    };
                                    bottom_diff[[n, ic, ih, iw]] += grad * weight[[oc, ic, kh, kw]];
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// dL/dK：输入与上游梯度的相关运算，结果累加到`weight_diff`
    pub(in crate::nn::layer) fn backward_weight(
        &self,
        top_diff: &Tensor,
        input: &Tensor,
        weight_diff: &mut Tensor,
    ) {
        let (batch, out_c, out_h, out_w) = dims(top_diff);
        let (_, in_c, in_h, in_w) = dims(input);
        let k = self.kernel;

        for n in 0..batch {
            for oc in 0..out_c {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let grad = top_diff[[n, oc, oh, ow]];
                        for ic in 0..in_c {
                            for kh in 0..k {
                                let Some(ih) = self.input_index(oh, kh, in_h) else {
                                    continue;
                                };
                                for kw in 0..k {
                                    let Some(iw) = self.input_index(ow, kw, in_w) else {
                                        continue;
                                    };
                                    weight_diff[[oc, ic, kh, kw]] += grad * input[[n, ic, ih, iw]];
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// dL/db：上游梯度在N、H、W上求和，结果累加到`bias_diff`
    pub(in crate::nn::layer) fn backward_bias(top_diff: &Tensor, bias_diff: &mut Tensor) {
        let (batch, out_c, out_h, out_w) = dims(top_diff);
        let plane = out_h * out_w;
        let grads = top_diff.data_as_slice();
        let bias_diff = bias_diff.data_as_slice_mut();
        for n in 0..batch {
            for (oc, b) in bias_diff.iter_mut().enumerate().take(out_c) {
                let start = (n * out_c + oc) * plane;
                *b += grads[start..start + plane].iter().sum::<f32>();
            }
        }
    }
}

#[inline]
fn dims(tensor: &Tensor) -> (usize, usize, usize, usize) {
    let shape = tensor.shape();
    (shape[0], shape[1], shape[2], shape[3])
}

/// 按卷积参数初始化（或校验已存在的）参数blob：[权重, 偏置（可选）]
pub(in crate::nn::layer) fn init_conv_blobs(
    layer: &str,
    param: &ConvolutionParameter,
    channels: usize,
    blobs: &mut Vec<Blob>,
) -> Result<(), LayerError> {
    let weight_shape = vec![param.num_output, channels, param.kernel_size, param.kernel_size];
    let expected_count = if param.bias_term { 2 } else { 1 };

    if !blobs.is_empty() {
        // 参数已存在（如从别处共享而来），只做校验
        if blobs.len() != expected_count {
            return Err(LayerError::ParamCountMismatch {
                layer: layer.to_string(),
                expected: expected_count,
                got: blobs.len(),
            });
        }
        if blobs[0].shape() != weight_shape {
            return Err(LayerError::ShapeMismatch {
                expected: weight_shape,
                got: blobs[0].shape(),
                message: format!("层{layer}已有的权重形状与卷积参数不符"),
            });
        }
        debug!("层[{layer}]已有参数，跳过初始化");
        return Ok(());
    }

    blobs.push(Blob::from_tensor(param.weight_filler.fill(&weight_shape)?));
    if param.bias_term {
        blobs.push(Blob::from_tensor(
            param.bias_filler.fill(&[param.num_output])?,
        ));
    }
    Ok(())
}

/// 按卷积参数推断输出形状并reshape输出，同时校验输入通道数
pub(in crate::nn::layer) fn reshape_conv_top(
    layer: &str,
    geometry: &ConvGeometry,
    num_output: usize,
    channels: usize,
    bottom: &[Blob],
    top: &[Blob],
) -> Result<(), LayerError> {
    check_not_in_place(bottom, top, layer)?;
    let [n, c, h, w] = check_4d(&bottom[0], layer)?;
    if c != channels {
        return Err(LayerError::ShapeMismatch {
            expected: vec![n, channels, h, w],
            got: vec![n, c, h, w],
            message: format!("层{layer}的输入通道数与setup时不一致"),
        });
    }
    let out_h = geometry.output_extent(h)?;
    let out_w = geometry.output_extent(w)?;
    top[0].reshape(&[n, num_output, out_h, out_w]);
    Ok(())
}

/// 标准卷积层
#[derive(Debug)]
pub struct Convolution {
    layer_param: LayerParameter,
    conv_param: ConvolutionParameter,
    geometry: ConvGeometry,
    channels: usize,
    blobs: Vec<Blob>,
}

impl Convolution {
    pub fn new(param: &LayerParameter) -> Result<Self, LayerError> {
        let conv_param = param.convolution_param()?.clone();
        conv_param.validate()?;
        Ok(Self {
            layer_param: param.clone(),
            geometry: ConvGeometry::from_param(&conv_param),
            conv_param,
            channels: 0,
            blobs: Vec::new(),
        })
    }

    pub const fn conv_param(&self) -> &ConvolutionParameter {
        &self.conv_param
    }
}

impl TraitLayer for Convolution {
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
        )
    }

    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        reshape_conv_top(
            &self.layer_param.name,
            &self.geometry,
            self.conv_param.num_output,
            self.channels,
            bottom,
            top,
        )
    }

    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        let input = bottom[0].data();
        let weight = self.blobs[0].data();
        let bias = self.blobs.get(1).map(Blob::data);
        let mut output = top[0].data_mut();
        self.geometry
            .forward(&input, &weight, bias.as_deref(), &mut output);
        Ok(())
    }

    fn backward(
        &mut self,
        top: &[Blob],
        propagate_down: &[bool],
        bottom: &[Blob],
    ) -> Result<(), LayerError> {
        let top_diff = top[0].diff();
        {
            let input = bottom[0].data();
            self.geometry
                .backward_weight(&top_diff, &input, &mut self.blobs[0].diff_mut());
        }
        if let Some(bias) = self.blobs.get(1) {
            ConvGeometry::backward_bias(&top_diff, &mut bias.diff_mut());
        }
        if should_propagate(propagate_down, 0) {
            self.geometry.backward_input(
                &top_diff,
                &self.blobs[0].data(),
                &mut bottom[0].diff_mut(),
            );
        }
        Ok(())
    }
}
