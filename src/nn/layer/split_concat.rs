/*
 * @Description  : SplitConcat层：把单通道输入复制成num_output个通道
 *
 * 输入 [N, 1, H, W] → 输出 [N, num_output, H, W]，每个输出通道都是输入通道的拷贝，
 * 用于将逐像素的缩放因子广播到卷积的各输出通道上。
 * 反向时各输出通道的梯度求和后写回输入。
 */

use super::{TraitLayer, check_4d, check_not_in_place, should_propagate};
use crate::nn::{Blob, LayerError, LayerParameter, Phase};

#[derive(Debug)]
pub struct SplitConcat {
    layer_param: LayerParameter,
    num_output: usize,
    blobs: Vec<Blob>,
}

impl SplitConcat {
    pub fn new(param: &LayerParameter) -> Result<Self, LayerError> {
        let num_output = param.convolution_param()?.num_output;
        if num_output == 0 {
            return Err(LayerError::InvalidParameter(
                "SplitConcat的输出通道数必须大于0".to_string(),
            ));
        }
        Ok(Self {
            layer_param: param.clone(),
            num_output,
            blobs: Vec::new(),
        })
    }

    pub const fn num_output(&self) -> usize {
        self.num_output
    }
}

impl TraitLayer for SplitConcat {
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

    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        check_not_in_place(bottom, top, &self.layer_param.name)?;
        let [n, c, h, w] = check_4d(&bottom[0], &self.layer_param.name)?;
        if c != 1 {
            return Err(LayerError::ShapeMismatch {
                expected: vec![n, 1, h, w],
                got: vec![n, c, h, w],
                message: format!("层{}的输入必须是单通道", self.layer_param.name),
            });
        }
        top[0].reshape(&[n, self.num_output, h, w]);
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        let plane = bottom[0].height() * bottom[0].width();
        if plane == 0 {
            return Ok(());
        }
        let input = bottom[0].data();
        let mut output = top[0].data_mut();
        let samples = input
            .data_as_slice()
            .chunks(plane)
            .zip(output.data_as_slice_mut().chunks_mut(plane * self.num_output));
        for (src, dst) in samples {
            for channel in dst.chunks_mut(plane) {
                channel.copy_from_slice(src);
            }
        }
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
        let plane = bottom[0].height() * bottom[0].width();
        if plane == 0 {
            return Ok(());
        }
        let top_diff = top[0].diff();
        let mut bottom_diff = bottom[0].diff_mut();
        let samples = bottom_diff
            .data_as_slice_mut()
            .chunks_mut(plane)
            .zip(top_diff.data_as_slice().chunks(plane * self.num_output));
        for (dst, src) in samples {
            dst.fill(0.);
            for channel in src.chunks(plane) {
                for (d, s) in dst.iter_mut().zip(channel) {
                    *d += s;
                }
            }
        }
        Ok(())
    }
}
