/*
 * @Description  : Eltwise层：多个同形状输入的逐元素运算（乘积、加权和、最大值）
 *                 参考自：Caffe的EltwiseLayer
 */

use super::{TraitLayer, check_not_in_place, should_propagate};
use crate::nn::{Blob, EltwiseOp, LayerError, LayerParameter, Phase};

#[derive(Debug)]
pub struct Eltwise {
    layer_param: LayerParameter,
    operation: EltwiseOp,
    coeffs: Vec<f32>,
    /// `Max`运算时每个输出元素来自哪个输入
    max_idx: Vec<usize>,
    blobs: Vec<Blob>,
}

impl Eltwise {
    pub fn new(param: &LayerParameter) -> Result<Self, LayerError> {
        let eltwise_param = &param.eltwise_param;
        if !eltwise_param.coeff.is_empty() && eltwise_param.operation != EltwiseOp::Sum {
            return Err(LayerError::InvalidParameter(
                "Eltwise层只有Sum运算支持系数".to_string(),
            ));
        }
        Ok(Self {
            layer_param: param.clone(),
            operation: eltwise_param.operation,
            coeffs: Vec::new(),
            max_idx: Vec::new(),
            blobs: Vec::new(),
        })
    }

    pub const fn operation(&self) -> EltwiseOp {
        self.operation
    }
}

impl TraitLayer for Eltwise {
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

    fn min_bottom_blobs(&self) -> Option<usize> {
        Some(2)
    }

    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(1)
    }

    fn layer_setup(&mut self, bottom: &[Blob], _top: &[Blob]) -> Result<(), LayerError> {
        let coeff = &self.layer_param.eltwise_param.coeff;
        self.coeffs = if coeff.is_empty() {
            vec![1.; bottom.len()]
        } else if coeff.len() == bottom.len() {
            coeff.clone()
        } else {
            return Err(LayerError::InvalidParameter(format!(
                "Eltwise层的系数个数{}与输入个数{}不一致",
                coeff.len(),
                bottom.len()
            )));
        };
        Ok(())
    }

    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        check_not_in_place(bottom, top, &self.layer_param.name)?;
        let shape = bottom[0].shape();
        for b in &bottom[1..] {
            if b.shape() != shape {
                return Err(LayerError::ShapeMismatch {
                    expected: shape,
                    got: b.shape(),
                    message: format!("层{}的所有输入形状必须相同", self.layer_param.name),
                });
            }
        }
        top[0].reshape(&shape);
        if self.operation == EltwiseOp::Max {
            self.max_idx.resize(top[0].count(), 0);
        }
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        let mut output = top[0].data_mut();
        match self.operation {
            EltwiseOp::Prod => {
                output.assign(&bottom[0].data());
                for b in &bottom[1..] {
                    let input = b.data();
                    for (y, x) in output.data_as_slice_mut().iter_mut().zip(input.data_as_slice()) {
                        *y *= x;
                    }
                }
            }
            EltwiseOp::Sum => {
                output.fill(0.);
                for (b, &coeff) in bottom.iter().zip(&self.coeffs) {
                    let input = b.data();
                    for (y, x) in output.data_as_slice_mut().iter_mut().zip(input.data_as_slice()) {
                        *y += coeff * x;
                    }
                }
            }
            EltwiseOp::Max => {
                output.assign(&bottom[0].data());
                self.max_idx.fill(0);
                for (i, b) in bottom.iter().enumerate().skip(1) {
                    let input = b.data();
                    let values = output
                        .data_as_slice_mut()
                        .iter_mut()
                        .zip(input.data_as_slice())
                        .zip(self.max_idx.iter_mut());
                    for ((y, &x), idx) in values {
                        if x > *y {
                            *y = x;
                            *idx = i;
                        }
                    }
                }
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
        let top_diff = top[0].diff();
        for (i, b) in bottom.iter().enumerate() {
            if !should_propagate(propagate_down, i) {
                continue;
            }
            let mut bottom_diff = b.diff_mut();
            match self.operation {
                EltwiseOp::Prod => {
                    // 对第i个输入的梯度 = 上游梯度 × 其余输入之积
                    bottom_diff.assign(&top_diff);
                    for (j, other) in bottom.iter().enumerate() {
                        if j == i {
                            continue;
                        }
                        let input = other.data();
                        for (g, x) in bottom_diff
                            .data_as_slice_mut()
                            .iter_mut()
                            .zip(input.data_as_slice())
                        {
                            *g *= x;
                        }
                    }
                }
                EltwiseOp::Sum => {
                    bottom_diff.assign(&top_diff);
                    bottom_diff.scale_mut(self.coeffs[i]);
                }
                EltwiseOp::Max => {
                    let grads = bottom_diff
                        .data_as_slice_mut()
                        .iter_mut()
                        .zip(top_diff.data_as_slice())
                        .zip(&self.max_idx);
                    for ((g, &top_g), &idx) in grads {
                        *g = if idx == i { top_g } else { 0. };
                    }
                }
            }
        }
        Ok(())
    }
}
