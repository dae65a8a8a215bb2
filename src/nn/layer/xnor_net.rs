/*
 * @Description  : XnorNet层：由4个子层组合而成的XNOR卷积
 *
 *   X ──BinActiv──┬─ B (sign) ──BinaryConvolution── Z ──┐
 *                 └─ K (mean) ──SplitConcat──────── K' ──┴──Eltwise(PROD)── Y
 *
 * 本层的参数blob与BinaryConvolution子层的参数blob共享同一存储（值与梯度都共享），
 * 因此优化器对本层参数的更新就是对子层参数的更新。
 * 反向时缩放因子K'所在的分支不回传梯度。
 */

use tracing::debug;

use super::{
    BinActiv, BinaryConvolution, Eltwise, SplitConcat, TraitLayer, should_propagate,
};
use crate::nn::{
    Blob, EltwiseOp, EltwiseParameter, LayerError, LayerParameter, LayerType, Phase,
};

#[derive(Debug)]
pub struct XnorNet {
    layer_param: LayerParameter,
    binactiv: BinActiv,
    split_concat: SplitConcat,
    binary_convolution: BinaryConvolution,
    eltwise: Eltwise,
    // 子层之间的中间blob
    binactiv_top: Vec<Blob>,
    split_concat_bottom: Vec<Blob>,
    split_concat_top: Vec<Blob>,
    binary_convolution_bottom: Vec<Blob>,
    binary_convolution_top: Vec<Blob>,
    eltwise_bottom: Vec<Blob>,
    blobs: Vec<Blob>,
}

impl XnorNet {
    pub fn new(param: &LayerParameter) -> Result<Self, LayerError> {
        let conv_param = param.convolution_param()?.clone();
        let sub_param = |suffix: &str, layer_type| {
            LayerParameter::new(&format!("{}/{suffix}", param.name), layer_type)
                .with_convolution_param(conv_param.clone())
                .with_phase(param.phase)
        };

        let binactiv = BinActiv::new(&sub_param("binactiv", LayerType::BinActiv))?;
        let split_concat = SplitConcat::new(&sub_param("split_concat", LayerType::SplitConcat))?;
        let binary_convolution = BinaryConvolution::new(&sub_param(
            "binary_convolution",
            LayerType::BinaryConvolution,
        ))?;
        let eltwise = Eltwise::new(
            &sub_param("eltwise", LayerType::Eltwise)
                .with_eltwise_param(EltwiseParameter::new(EltwiseOp::Prod)),
        )?;

        // B、K为BinActiv的两个输出；K'、Z分别为SplitConcat与BinaryConvolution的输出
        let (b, k) = (Blob::empty(), Blob::empty());
        let (k_split, z) = (Blob::empty(), Blob::empty());
        Ok(Self {
            layer_param: param.clone(),
            binactiv,
            split_concat,
            binary_convolution,
            eltwise,
            binactiv_top: vec![b.clone(), k.clone()],
            split_concat_bottom: vec![k],
            split_concat_top: vec![k_split.clone()],
            binary_convolution_bottom: vec![b],
            binary_convolution_top: vec![z.clone()],
            eltwise_bottom: vec![z, k_split],
            blobs: Vec::new(),
        })
    }

    pub const fn binactiv_layer(&self) -> &BinActiv {
        &self.binactiv
    }

    pub const fn split_concat_layer(&self) -> &SplitConcat {
        &self.split_concat
    }

    pub const fn binary_convolution_layer(&self) -> &BinaryConvolution {
        &self.binary_convolution
    }

    pub const fn eltwise_layer(&self) -> &Eltwise {
        &self.eltwise
    }

    /// 令本层参数blob与二值卷积子层的参数blob共享存储。
    /// 重新setup时子层保留已有参数，本层重新指向它们，因此参数值不变
    fn share_binary_convolution_params(&mut self) -> Result<(), LayerError> {
        let params = self.binary_convolution.blobs();
        // 只在重新setup时可能非空；首次setup时本层还没有参数
        if !self.blobs.is_empty() && self.blobs.len() != params.len() {
            return Err(LayerError::ParamCountMismatch {
                layer: self.layer_param.name.clone(),
                expected: params.len(),
                got: self.blobs.len(),
            });
        }
        self.blobs = params
            .iter()
            .map(|param| -> Result<Blob, LayerError> {
                let mut blob = Blob::new(&param.shape());
                blob.share_data(param)?;
                blob.share_diff(param)?;
                Ok(blob)
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }
}

impl TraitLayer for XnorNet {
    fn layer_param(&self) -> &LayerParameter {
        &self.layer_param
    }

    fn set_phase(&mut self, phase: Phase) {
        self.layer_param.phase = phase;
        self.binactiv.set_phase(phase);
        self.split_concat.set_phase(phase);
        self.binary_convolution.set_phase(phase);
        self.eltwise.set_phase(phase);
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

    fn layer_setup(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        let name = &self.layer_param.name;

        self.binactiv.setup(bottom, &self.binactiv_top)?;
        debug!("XnorNet层[{name}]的BinActiv子层已setup");

        self.split_concat
            .setup(&self.split_concat_bottom, &self.split_concat_top)?;
        debug!("XnorNet层[{name}]的SplitConcat子层已setup");

        self.binary_convolution
            .setup(&self.binary_convolution_bottom, &self.binary_convolution_top)?;
        debug!("XnorNet层[{name}]的BinaryConvolution子层已setup");

        self.share_binary_convolution_params()?;
        debug!("XnorNet层[{}]已与BinaryConvolution子层共享参数", self.layer_param.name);

        self.eltwise.setup(&self.eltwise_bottom, top)?;
        debug!("XnorNet层[{}]的Eltwise子层已setup", self.layer_param.name);
        Ok(())
    }

    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        self.binactiv.reshape(bottom, &self.binactiv_top)?;
        self.split_concat
            .reshape(&self.split_concat_bottom, &self.split_concat_top)?;
        self.binary_convolution
            .reshape(&self.binary_convolution_bottom, &self.binary_convolution_top)?;
        self.eltwise.reshape(&self.eltwise_bottom, top)
    }

    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<(), LayerError> {
        self.binactiv.forward(bottom, &self.binactiv_top)?;
        self.split_concat
            .forward(&self.split_concat_bottom, &self.split_concat_top)?;

        // 评估阶段的网络可能与训练网络共享本层参数（此时本层blob已指向训练网络的存储），
        // 而子层仍持有自己的存储，因此每次前向前都要把当前参数值同步给子层
        if self.layer_param.phase == Phase::Test {
            for (param, own) in self.binary_convolution.blobs().iter().zip(&self.blobs) {
                param.copy_from(own, false, false)?;
            }
        }

        self.binary_convolution
            .forward(&self.binary_convolution_bottom, &self.binary_convolution_top)?;
        self.eltwise.forward(&self.eltwise_bottom, top)
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
        // 只有Z（二值卷积输出）一支回传梯度，缩放因子K'一支被截断
        let branch_propagate = [true, false];
        self.eltwise
            .backward(top, &branch_propagate, &self.eltwise_bottom)?;
        self.binary_convolution.backward(
            &self.binary_convolution_top,
            propagate_down,
            &self.binary_convolution_bottom,
        )?;
        self.binactiv
            .backward(&self.binactiv_top, &branch_propagate, bottom)
    }
}
