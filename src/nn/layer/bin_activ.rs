/*
 * @Description  : BinActiv层：输入激活的二值化（XNOR-Net）
 *
 * 输入 X [N, C, H, W]，两个输出：
 * - top[0] Sign：sign(X)，形状同输入；
 * - top[1] Mean：先对通道求均值得到 [N, 1, H, W]，再用全1卷积核做盒式滤波并除以 k²，
 *   即每个位置附近的平均激活幅值（作为XNOR卷积输出的缩放因子K）。
 * 反向只沿Sign路径传播，采用饱和区间[-1, 1]内直通（STE）的估计；Mean路径不回传梯度。
 */

use std::cell::Ref;

use tracing::debug;

use super::{Convolution, TraitLayer, check_4d, check_not_in_place, sign, should_propagate};
use crate::nn::{Blob, FillerParameter, LayerError, LayerParameter, LayerType, Phase};
use crate::tensor::Tensor;

#[derive(Debug)]
pub struct BinActiv {
    layer_param: LayerParameter,
    kernel_size: usize,
    /// 权重固定为1、无偏置、单输出通道的卷积，仅作盒式滤波用
    box_filter: Box<Convolution>,
    convolution_bottom: Blob,
    convolution_top: Blob,
    blobs: Vec<Blob>,
}

impl BinActiv {
    pub fn new(param: &LayerParameter) -> Result<Self, LayerError> {
        let mut box_param = param.convolution_param()?.clone();
        let kernel_size = box_param.kernel_size;
        box_param.num_output = 1;
        box_param.bias_term = false;
        box_param.weight_filler = FillerParameter::Constant { value: 1. };

        let conv_layer_param =
            LayerParameter::new(&format!("{}/box_filter", param.name), LayerType::Convolution)
                .with_convolution_param(box_param)
                .with_phase(param.phase);
        Ok(Self {
            layer_param: param.clone(),
            kernel_size,
            box_filter: Box::new(Convolution::new(&conv_layer_param)?),
            convolution_bottom: Blob::empty(),
            convolution_top: Blob::empty(),
            blobs: Vec::new(),
        })
    }

    /// 最近一次前向传播得到的通道均值（盒式滤波之前），形状为[N, 1, H, W]
    pub fn channel_mean(&self) -> Ref<'_, Tensor> {
        self.convolution_bottom.data()
    }

    pub const fn kernel_size(&self) -> usize {
        self.kernel_size
    }
}

impl TraitLayer for BinActiv {
    fn layer_param(&self) -> &LayerParameter {
        &self.layer_param
    }

    fn set_phase(&mut self, phase: Phase) {
        self.layer_param.phase = phase;
        self.box_filter.set_phase(phase);
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
        Some(2)
    }

    fn layer_setup(&mut self, bottom: &[Blob], _top: &[Blob]) -> Result<(), LayerError> {
        let [n, _, h, w] = check_4d(&bottom[0], &self.layer_param.name)?;
        self.convolution_bottom.reshape(&[n, 1, h, w]);
        self.box_filter.setup(
            std::slice::from_ref(&self.convolution_bottom),
            std::slice::from_ref(&self.convolution_top),
        )?;
        let param_count = self.box_filter.blobs().len();
        if param_count != 1 {
            return Err(LayerError::ParamCountMismatch {
                layer: self.box_filter.name().to_string(),
                expected: 1,
                got: param_count,
            });
        }
        debug!("BinActiv层[{}]的盒式滤波卷积已setup", self.layer_param.name);
        Ok(())
    }

    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        check_not_in_place(bottom, top, &self.layer_param.name)?;
        let [n, _, h, w] = check_4d(&bottom[0], &self.layer_param.name)?;
        top[0].reshape_like(&bottom[0]);
        self.convolution_bottom.reshape(&[n, 1, h, w]);
        self.box_filter.reshape(
            std::slice::from_ref(&self.convolution_bottom),
            std::slice::from_ref(&self.convolution_top),
        )?;
        top[1].reshape(&[
            self.convolution_top.num(),
            1,
            self.convolution_top.height(),
            self.convolution_top.width(),
        ]);
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        let channels = bottom[0].channels();
        let plane = bottom[0].height() * bottom[0].width();
        {
            let input = bottom[0].data();
            let mut mean = self.convolution_bottom.data_mut();
            let mut signs = top[0].data_mut();
            mean.fill(0.);
            let mean = mean.data_as_slice_mut();
            let values = input
                .data_as_slice()
                .iter()
                .zip(signs.data_as_slice_mut())
                .enumerate();
            for (i, (&x, s)) in values {
                *s = sign(x);
                let sample = i / (channels * plane);
                mean[sample * plane + i % plane] += x / channels as f32;
            }
        }

        self.box_filter.forward(
            std::slice::from_ref(&self.convolution_bottom),
            std::slice::from_ref(&self.convolution_top),
        )?;
        top[1].copy_from(&self.convolution_top, false, false)?;
        let area = (self.kernel_size * self.kernel_size) as f32;
        top[1].data_mut().scale_mut(1. / area);
        Ok(())
    }

    fn backward(
        &mut self,
        top: &[Blob],
        propagate_down: &[bool],
        bottom: &[Blob],
    ) -> Result<(), LayerError> {
        if !should_propagate(propagate_down, 0) {
            return Ok(());
        }
        let input = bottom[0].data();
        let top_diff = top[0].diff();
        let mut bottom_diff = bottom[0].diff_mut();
        let grads = bottom_diff
            .data_as_slice_mut()
            .iter_mut()
            .zip(input.data_as_slice())
            .zip(top_diff.data_as_slice());
        for ((g, &x), &top_g) in grads {
            *g = if x.abs() <= 1. { top_g } else { 0. };
        }
        Ok(())
    }
}
