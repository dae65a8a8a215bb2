/*
 * @Description  : 顺序执行的网络（Caffe风格的Net）
 *
 * 由`NetParameter`描述：先声明带形状的网络输入，再按顺序列出各层，层之间用blob名称连接。
 * - 前向按层的声明顺序执行，反向按相反顺序执行；
 * - 网络输入不需要梯度，因此直接消费网络输入的层在反向时不会收到`propagate_down = true`；
 * - 同一blob可被多个层读取，反向时各层写回的梯度会累加到该blob上；
 * - 可学习参数只来自顶层的各个层（组合层内部与子层共享的参数不会重复出现）。
 */

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use super::{Blob, LayerEnum, LayerError, NetParameter, Phase, TraitLayer};
use crate::tensor::Tensor;

#[derive(Debug)]
pub struct Net {
    name: String,
    phase: Phase,
    input_names: Vec<String>,
    blobs: HashMap<String, Blob>,
    layers: Vec<LayerEnum>,
    bottom_vecs: Vec<Vec<Blob>>,
    top_vecs: Vec<Vec<Blob>>,
    bottom_need_backward: Vec<Vec<bool>>,
    bottom_names: Vec<Vec<String>>,
    /// 被多个层读取的blob，反向时需累加梯度
    fan_out_blobs: HashSet<String>,
}

impl Net {
    /// 参数文件魔数
    const PARAMS_MAGIC: &'static [u8; 4] = b"XNPR";
    /// 参数文件版本
    const PARAMS_VERSION: u32 = 1;

    /// 按网络描述创建各层并依次setup，所有层都处于`phase`阶段
    pub fn new(param: &NetParameter, phase: Phase) -> Result<Self, LayerError> {
        let mut blobs = HashMap::new();
        let mut need_backward = HashMap::new();
        let mut input_names = Vec::with_capacity(param.inputs.len());
        for input in &param.inputs {
            blobs.insert(input.name.clone(), Blob::new(&input.shape));
            need_backward.insert(input.name.clone(), false);
            input_names.push(input.name.clone());
        }

        let mut layers: Vec<LayerEnum> = Vec::with_capacity(param.layers.len());
        let mut bottom_vecs = Vec::with_capacity(param.layers.len());
        let mut top_vecs = Vec::with_capacity(param.layers.len());
        let mut bottom_need_backward = Vec::with_capacity(param.layers.len());
        let mut bottom_names = Vec::with_capacity(param.layers.len());
        let mut consumers: HashMap<String, usize> = HashMap::new();

        for layer_param in &param.layers {
            if layers.iter().any(|l| l.name() == layer_param.name) {
                return Err(LayerError::InvalidParameter(format!(
                    "网络{}中存在重名的层{}",
                    param.name, layer_param.name
                )));
            }
            let layer_param = layer_param.clone().with_phase(phase);
            let mut layer = LayerEnum::create(&layer_param)?;

            let mut bottom = Vec::with_capacity(layer_param.bottoms.len());
            let mut propagate = Vec::with_capacity(layer_param.bottoms.len());
            for (i, name) in layer_param.bottoms.iter().enumerate() {
                if layer_param.bottoms[..i].contains(name) {
                    return Err(LayerError::InvalidParameter(format!(
                        "层{}的输入{}重复出现",
                        layer_param.name, name
                    )));
                }
                let blob = blobs
                    .get(name)
                    .ok_or_else(|| LayerError::BlobNotFound(name.clone()))?;
                bottom.push(blob.clone());
                propagate.push(need_backward.get(name).copied().unwrap_or(false));
                *consumers.entry(name.clone()).or_insert(0) += 1;
            }

            // 与已有blob同名的输出复用该blob的存储，各层都会在setup时拒绝原地计算
            let top: Vec<Blob> = layer_param
                .tops
                .iter()
                .map(|name| {
                    blobs
                        .entry(name.clone())
                        .or_insert_with(Blob::empty)
                        .clone()
                })
                .collect();

            layer.setup(&bottom, &top)?;

            let top_need_backward = propagate.iter().any(|&p| p) || !layer.blobs().is_empty();
            for name in &layer_param.tops {
                need_backward.insert(name.clone(), top_need_backward);
            }
            debug!(
                "网络[{}]的{}层[{}]已setup，输出形状：{:?}",
                param.name,
                layer_param.layer_type,
                layer_param.name,
                top.iter().map(Blob::shape).collect::<Vec<_>>()
            );

            layers.push(layer);
            bottom_vecs.push(bottom);
            top_vecs.push(top);
            bottom_need_backward.push(propagate);
            bottom_names.push(layer_param.bottoms.clone());
        }

        let fan_out_blobs: HashSet<String> = consumers
            .into_iter()
            .filter(|&(_, count)| count > 1)
            .map(|(name, _)| name)
            .collect();
        if !fan_out_blobs.is_empty() {
            debug!("网络[{}]中被多个层读取的blob：{:?}", param.name, fan_out_blobs);
        }

        Ok(Self {
            name: param.name.clone(),
            phase,
            input_names,
            blobs,
            layers,
            bottom_vecs,
            top_vecs,
            bottom_need_backward,
            bottom_names,
            fan_out_blobs,
        })
    }

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓基本信息↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    pub fn blob(&self, name: &str) -> Result<&Blob, LayerError> {
        self.blobs
            .get(name)
            .ok_or_else(|| LayerError::BlobNotFound(name.to_string()))
    }

    pub fn layer(&self, name: &str) -> Result<&LayerEnum, LayerError> {
        self.layers
            .iter()
            .find(|l| l.name() == name)
            .ok_or_else(|| LayerError::LayerNotFound(name.to_string()))
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑基本信息↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓执行↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    /// 设置某个网络输入的值，形状与当前不同时会改变该输入的形状（之后的前向会重新推断各层形状）
    pub fn set_input(&self, name: &str, value: &Tensor) -> Result<(), LayerError> {
        if !self.input_names.iter().any(|n| n == name) {
            return Err(LayerError::BlobNotFound(name.to_string()));
        }
        let blob = self.blob(name)?;
        blob.reshape(value.shape());
        blob.set_data(value)
    }

    /// 按当前输入形状重新推断所有层的输出形状
    pub fn reshape(&mut self) -> Result<(), LayerError> {
        for ((layer, bottom), top) in self
            .layers
            .iter_mut()
            .zip(&self.bottom_vecs)
            .zip(&self.top_vecs)
        {
            layer.reshape(bottom, top)?;
        }
        Ok(())
    }

    /// 依次执行各层的前向传播（每层前向之前先reshape，以适应输入形状的变化）
    pub fn forward(&mut self) -> Result<(), LayerError> {
        for ((layer, bottom), top) in self
            .layers
            .iter_mut()
            .zip(&self.bottom_vecs)
            .zip(&self.top_vecs)
        {
            layer.reshape(bottom, top)?;
            layer.forward(bottom, top)?;
        }
        Ok(())
    }

    /// 按相反顺序执行各层的反向传播，调用前需已设置好输出blob的梯度。
    /// 层的反向会覆盖输入blob的梯度，因此对被多个层读取的blob，
    /// 先暂存此前各层已写回的梯度，该层反向后再加回去
    pub fn backward(&mut self) -> Result<(), LayerError> {
        let mut received: HashSet<&str> = HashSet::new();
        for i in (0..self.layers.len()).rev() {
            let accumulated: Vec<Option<Tensor>> = self.bottom_vecs[i]
                .iter()
                .zip(&self.bottom_names[i])
                .zip(&self.bottom_need_backward[i])
                .map(|((blob, name), &need)| {
                    (need && received.contains(name.as_str())).then(|| blob.diff().clone())
                })
                .collect();

            self.layers[i].backward(
                &self.top_vecs[i],
                &self.bottom_need_backward[i],
                &self.bottom_vecs[i],
            )?;

            for (((blob, name), &need), previous) in self.bottom_vecs[i]
                .iter()
                .zip(&self.bottom_names[i])
                .zip(&self.bottom_need_backward[i])
                .zip(accumulated)
            {
                if let Some(previous) = previous {
                    *blob.diff_mut() += &previous;
                }
                if need && self.fan_out_blobs.contains(name) {
                    received.insert(name);
                }
            }
        }
        Ok(())
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑执行↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓参数↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    /// 所有可学习参数（句柄），顺序为层的声明顺序
    pub fn learnable_params(&self) -> Vec<Blob> {
        self.layers
            .iter()
            .flat_map(|l| l.blobs().iter().cloned())
            .collect()
    }

    pub fn clear_param_diffs(&self) {
        for param in self.learnable_params() {
            param.clear_diff();
        }
    }

    /// 最简单的SGD：data -= lr * diff
    pub fn sgd_update(&self, learning_rate: f32) {
        for param in self.learnable_params() {
            param.diff_mut().scale_mut(learning_rate);
            param.update();
        }
    }

    /// 令本网络中与`other`同名的层使用`other`的参数值存储（如评估网络共享训练网络的权重）
    pub fn share_trained_layers_with(&mut self, other: &Self) -> Result<(), LayerError> {
        for layer in &mut self.layers {
            let Ok(source) = other.layer(layer.name()) else {
                debug!("层[{}]在网络[{}]中不存在，不共享参数", layer.name(), other.name);
                continue;
            };
            let source_blobs = source.blobs();
            if source_blobs.len() != layer.blobs().len() {
                return Err(LayerError::ParamCountMismatch {
                    layer: layer.name().to_string(),
                    expected: source_blobs.len(),
                    got: layer.blobs().len(),
                });
            }
            for (target, source) in layer.blobs_mut().iter_mut().zip(source_blobs) {
                if target.shape() != source.shape() {
                    return Err(LayerError::ShapeMismatch {
                        expected: source.shape(),
                        got: target.shape(),
                        message: "共享参数时形状不一致".to_string(),
                    });
                }
                target.share_data(source)?;
            }
        }
        Ok(())
    }

    /// 把所有可学习参数的值保存到二进制文件，键为`层名/序号`
    pub fn save_params<P: AsRef<Path>>(&self, path: P) -> Result<(), LayerError> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        writer.write_all(Self::PARAMS_MAGIC)?;
        writer.write_all(&Self::PARAMS_VERSION.to_le_bytes())?;

        let params: Vec<(String, Tensor)> = self
            .layers
            .iter()
            .flat_map(|l| {
                l.blobs()
                    .iter()
                    .enumerate()
                    .map(move |(i, b)| (format!("{}/{i}", l.name()), b.data().clone()))
            })
            .collect();
        bincode::serialize_into(&mut writer, &params)?;
        writer.flush()?;
        debug!("网络[{}]已保存{}个参数", self.name, params.len());
        Ok(())
    }

    /// 从`save_params`保存的文件加载参数值，文件中不属于本网络的参数会被忽略
    pub fn load_params<P: AsRef<Path>>(&self, path: P) -> Result<(), LayerError> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != Self::PARAMS_MAGIC {
            return Err(LayerError::InvalidParamsFile(
                "魔数不符，不是由save_params保存的参数文件".to_string(),
            ));
        }
        let mut version_bytes = [0u8; 4];
        reader.read_exact(&mut version_bytes)?;
        let version = u32::from_le_bytes(version_bytes);
        if version != Self::PARAMS_VERSION {
            return Err(LayerError::InvalidParamsFile(format!(
                "不支持的参数文件版本：{version}"
            )));
        }

        let params: Vec<(String, Tensor)> = bincode::deserialize_from(&mut reader)?;
        let lookup: HashMap<String, Blob> = self
            .layers
            .iter()
            .flat_map(|l| {
                l.blobs()
                    .iter()
                    .enumerate()
                    .map(move |(i, b)| (format!("{}/{i}", l.name()), b.clone()))
            })
            .collect();
        for (key, value) in &params {
            match lookup.get(key) {
                Some(blob) => blob.set_data(value)?,
                None => warn!("网络[{}]中没有参数{key}，已跳过", self.name),
            }
        }
        Ok(())
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑参数↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/
}
