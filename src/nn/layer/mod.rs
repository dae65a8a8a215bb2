/*
 * @Description  : 层（Layer）的统一接口与工厂
 *
 * 每个层都遵循Caffe的生命周期：setup（检查数量+分配子层与参数+reshape）→ reshape → forward → backward。
 * 层之间通过`Blob`交换数据，`Blob`的克隆只是句柄，因此同一存储可被多个层读写。
 * 具体层由`LayerEnum`统一派发，`LayerEnum::create`按`LayerType`创建，不需要全局注册表。
 */

mod bin_activ;
mod binary_convolution;
mod convolution;
mod eltwise;
mod split_concat;
mod xnor_net;

pub use bin_activ::BinActiv;
pub use binary_convolution::BinaryConvolution;
pub use convolution::Convolution;
pub use eltwise::Eltwise;
pub use split_concat::SplitConcat;
pub use xnor_net::XnorNet;

use enum_dispatch::enum_dispatch;
use tracing::debug;

use super::{Blob, LayerError, LayerParameter, LayerType, Phase};

#[enum_dispatch]
#[derive(Debug)]
pub enum LayerEnum {
    Convolution,
    BinaryConvolution,
    SplitConcat,
    Eltwise,
    BinActiv,
    XnorNet,
}

#[enum_dispatch(LayerEnum)]
pub trait TraitLayer {
    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓基本↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    fn layer_param(&self) -> &LayerParameter;

    fn name(&self) -> &str {
        &self.layer_param().name
    }

    fn layer_type(&self) -> LayerType {
        self.layer_param().layer_type
    }

    fn phase(&self) -> Phase {
        self.layer_param().phase
    }

    /// 设置执行阶段（组合层需同时设置其子层）
    fn set_phase(&mut self, phase: Phase);

    /// 可学习的参数blob（按固定顺序，如卷积为[权重, 偏置]）
    fn blobs(&self) -> &[Blob];

    fn blobs_mut(&mut self) -> &mut [Blob];
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑基本↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓输入输出数量约定↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        None
    }

    fn min_bottom_blobs(&self) -> Option<usize> {
        None
    }

    fn exact_num_top_blobs(&self) -> Option<usize> {
        None
    }

    fn check_blob_counts(&self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        let arity_error = |kind, expected, got| LayerError::InvalidArity {
            layer: self.name().to_string(),
            kind,
            expected,
            got,
        };
        if let Some(expected) = self.exact_num_bottom_blobs() {
            if bottom.len() != expected {
                return Err(arity_error("bottom", expected, bottom.len()));
            }
        }
        if let Some(min) = self.min_bottom_blobs() {
            if bottom.len() < min {
                return Err(arity_error("bottom", min, bottom.len()));
            }
        }
        if let Some(expected) = self.exact_num_top_blobs() {
            if top.len() != expected {
                return Err(arity_error("top", expected, top.len()));
            }
        }
        Ok(())
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑输入输出数量约定↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓生命周期↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    /// 检查输入输出数量、分配子层与参数并推断输出形状。重新setup前结构保持不变
    fn setup(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        self.check_blob_counts(bottom, top)?;
        self.layer_setup(bottom, top)?;
        self.reshape(bottom, top)
    }

    /// 层特有的一次性初始化（子层、参数等）
    fn layer_setup(&mut self, _bottom: &[Blob], _top: &[Blob]) -> Result<(), LayerError> {
        Ok(())
    }

    /// 根据输入形状重新计算输出形状；输入形状改变后必须在forward之前调用
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError>;

    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError>;

    /// 由输出的梯度计算输入的梯度，`propagate_down[i]`为false时不计算第i个输入的梯度
    fn backward(
        &mut self,
        top: &[Blob],
        propagate_down: &[bool],
        bottom: &[Blob],
    ) -> Result<(), LayerError>;
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑生命周期↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/
}

impl LayerEnum {
    /// 按层类型创建层（相当于Caffe的`LayerRegistry::CreateLayer`）
    pub fn create(param: &LayerParameter) -> Result<Self, LayerError> {
        let layer: Self = match param.layer_type {
            LayerType::Convolution => Convolution::new(param)?.into(),
            LayerType::BinaryConvolution => BinaryConvolution::new(param)?.into(),
            LayerType::SplitConcat => SplitConcat::new(param)?.into(),
            LayerType::Eltwise => Eltwise::new(param)?.into(),
            LayerType::BinActiv => BinActiv::new(param)?.into(),
            LayerType::XnorNet => XnorNet::new(param)?.into(),
        };
        debug!("创建{}层[{}]", param.layer_type, param.name);
        Ok(layer)
    }
}

/// 二值化符号函数：x ≥ 0 时为1，否则为-1（0也映射为1）
#[inline]
pub fn sign(x: f32) -> f32 {
    if x >= 0. { 1. } else { -1. }
}

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓层实现共用的辅助函数↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
pub(in crate::nn) fn should_propagate(propagate_down: &[bool], index: usize) -> bool {
    propagate_down.get(index).copied().unwrap_or(false)
}

/// 检查blob是4维的并返回`[N, C, H, W]`
pub(in crate::nn) fn check_4d(blob: &Blob, layer: &str) -> Result<[usize; 4], LayerError> {
    let shape = blob.shape();
    match shape.as_slice() {
        &[n, c, h, w] => Ok([n, c, h, w]),
        _ => Err(LayerError::InvalidParameter(format!(
            "层{layer}的输入必须是4维[N, C, H, W]，实际形状为{shape:?}"
        ))),
    }
}

/// 输出与输入共享存储（原地计算）时报错
pub(in crate::nn) fn check_not_in_place(
    bottom: &[Blob],
    top: &[Blob],
    layer: &str,
) -> Result<(), LayerError> {
    let in_place = top
        .iter()
        .any(|t| bottom.iter().any(|b| t.shares_data_with(b)));
    if in_place {
        return Err(LayerError::InvalidParameter(format!(
            "层{layer}不支持原地计算"
        )));
    }
    Ok(())
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑层实现共用的辅助函数↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/
