/*
 * @Description  : 层与网络的参数描述（可由JSON反序列化得到）
 *
 * 字段命名与默认值沿用Caffe的`LayerParameter`/`ConvolutionParameter`约定，
 * 层类型则用枚举`LayerType`代替运行期的字符串注册表
 */

use std::fmt::{self, Display};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::LayerError;
use crate::tensor::Tensor;

/// 执行阶段：训练或评估（推理）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Train,
    Test,
}

/// 层类型，序列化后的字符串与Caffe中的层类型名一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerType {
    Convolution,
    BinaryConvolution,
    SplitConcat,
    Eltwise,
    BinActiv,
    XnorNet,
}

impl LayerType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Convolution => "Convolution",
            Self::BinaryConvolution => "BinaryConvolution",
            Self::SplitConcat => "SplitConcat",
            Self::Eltwise => "Eltwise",
            Self::BinActiv => "BinActiv",
            Self::XnorNet => "XnorNet",
        }
    }
}

impl Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Convolution" => Ok(Self::Convolution),
            "BinaryConvolution" => Ok(Self::BinaryConvolution),
            "SplitConcat" => Ok(Self::SplitConcat),
            "Eltwise" => Ok(Self::Eltwise),
            "BinActiv" => Ok(Self::BinActiv),
            "XnorNet" => Ok(Self::XnorNet),
            _ => Err(LayerError::UnknownLayerType(s.to_string())),
        }
    }
}

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓参数初始化器↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
/// 参数初始化器，`seed`为`None`时使用线程随机数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FillerParameter {
    Constant {
        #[serde(default)]
        value: f32,
    },
    Gaussian {
        #[serde(default)]
        mean: f32,
        #[serde(default = "default_gaussian_std")]
        std: f32,
        #[serde(default)]
        seed: Option<u64>,
    },
    Uniform {
        #[serde(default)]
        min: f32,
        #[serde(default = "default_uniform_max")]
        max: f32,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl Default for FillerParameter {
    fn default() -> Self {
        Self::Constant { value: 0. }
    }
}

impl FillerParameter {
    /// 按初始化器生成指定形状的张量
    pub fn fill(&self, shape: &[usize]) -> Result<Tensor, LayerError> {
        match *self {
            Self::Constant { value } => Ok(Tensor::full(value, shape)),
            Self::Gaussian { mean, std, seed } => {
                if std < 0. {
                    return Err(LayerError::InvalidParameter(format!(
                        "高斯初始化器的标准差不能为负，实际为{std}"
                    )));
                }
                Ok(match seed {
                    Some(seed) => Tensor::normal_seeded(mean, std, shape, seed),
                    None => Tensor::normal(mean, std, shape),
                })
            }
            Self::Uniform { min, max, seed } => {
                if min > max {
                    return Err(LayerError::InvalidParameter(format!(
                        "均匀初始化器的下界{min}大于上界{max}"
                    )));
                }
                Ok(match seed {
                    Some(seed) => Tensor::uniform_seeded(min, max, shape, seed),
                    None => Tensor::uniform(min, max, shape),
                })
            }
        }
    }
}

const fn default_gaussian_std() -> f32 {
    0.01
}

const fn default_uniform_max() -> f32 {
    1.
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑参数初始化器↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓卷积参数↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
/// 卷积参数（方形卷积核，高宽共用同一步长与填充）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvolutionParameter {
    pub num_output: usize,
    pub kernel_size: usize,
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default)]
    pub pad: usize,
    #[serde(default = "default_bias_term")]
    pub bias_term: bool,
    #[serde(default = "default_weight_filler")]
    pub weight_filler: FillerParameter,
    #[serde(default)]
    pub bias_filler: FillerParameter,
}

impl ConvolutionParameter {
    pub fn new(num_output: usize, kernel_size: usize) -> Self {
        Self {
            num_output,
            kernel_size,
            stride: default_stride(),
            pad: 0,
            bias_term: default_bias_term(),
            weight_filler: default_weight_filler(),
            bias_filler: FillerParameter::default(),
        }
    }

    pub const fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub const fn with_pad(mut self, pad: usize) -> Self {
        self.pad = pad;
        self
    }

    pub const fn with_bias_term(mut self, bias_term: bool) -> Self {
        self.bias_term = bias_term;
        self
    }

    pub fn with_weight_filler(mut self, filler: FillerParameter) -> Self {
        self.weight_filler = filler;
        self
    }

    pub fn with_bias_filler(mut self, filler: FillerParameter) -> Self {
        self.bias_filler = filler;
        self
    }

    pub(in crate::nn) fn validate(&self) -> Result<(), LayerError> {
        if self.num_output == 0 {
            return Err(LayerError::InvalidParameter(
                "卷积输出通道数必须大于0".to_string(),
            ));
        }
        if self.kernel_size == 0 {
            return Err(LayerError::InvalidParameter(
                "卷积核尺寸必须大于0".to_string(),
            ));
        }
        if self.stride == 0 {
            return Err(LayerError::InvalidParameter("卷积步长必须大于0".to_string()));
        }
        Ok(())
    }
}

const fn default_stride() -> usize {
    1
}

const fn default_bias_term() -> bool {
    true
}

const fn default_weight_filler() -> FillerParameter {
    FillerParameter::Gaussian {
        mean: 0.,
        std: 0.01,
        seed: None,
    }
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑卷积参数↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

/// 逐元素运算的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EltwiseOp {
    Prod,
    #[default]
    Sum,
    Max,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EltwiseParameter {
    #[serde(default)]
    pub operation: EltwiseOp,
    /// 仅对`Sum`有效：各输入的系数，为空时全部视为1
    #[serde(default)]
    pub coeff: Vec<f32>,
}

impl EltwiseParameter {
    pub const fn new(operation: EltwiseOp) -> Self {
        Self {
            operation,
            coeff: Vec::new(),
        }
    }

    pub fn with_coeff(mut self, coeff: &[f32]) -> Self {
        self.coeff = coeff.to_vec();
        self
    }
}

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓层参数↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    /// 输入blob的名称（仅在`Net`中使用）
    #[serde(default)]
    pub bottoms: Vec<String>,
    /// 输出blob的名称（仅在`Net`中使用）
    #[serde(default)]
    pub tops: Vec<String>,
    #[serde(default)]
    pub convolution_param: Option<ConvolutionParameter>,
    #[serde(default)]
    pub eltwise_param: EltwiseParameter,
    #[serde(default)]
    pub phase: Phase,
}

impl LayerParameter {
    pub fn new(name: &str, layer_type: LayerType) -> Self {
        Self {
            name: name.to_string(),
            layer_type,
            bottoms: Vec::new(),
            tops: Vec::new(),
            convolution_param: None,
            eltwise_param: EltwiseParameter::default(),
            phase: Phase::default(),
        }
    }

    pub fn with_convolution_param(mut self, param: ConvolutionParameter) -> Self {
        self.convolution_param = Some(param);
        self
    }

    pub fn with_eltwise_param(mut self, param: EltwiseParameter) -> Self {
        self.eltwise_param = param;
        self
    }

    pub const fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_bottoms(mut self, bottoms: &[&str]) -> Self {
        self.bottoms = bottoms.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_tops(mut self, tops: &[&str]) -> Self {
        self.tops = tops.iter().map(|s| s.to_string()).collect();
        self
    }

    /// 获取卷积参数，未设置时报错
    pub fn convolution_param(&self) -> Result<&ConvolutionParameter, LayerError> {
        self.convolution_param.as_ref().ok_or_else(|| {
            LayerError::InvalidParameter(format!(
                "{}类型的层{}缺少convolution_param",
                self.layer_type, self.name
            ))
        })
    }
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑层参数↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

/*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓网络参数↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
/// 网络输入的声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetParameter {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    pub layers: Vec<LayerParameter>,
}

impl NetParameter {
    pub fn from_json_str(json: &str) -> Result<Self, LayerError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, LayerError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, LayerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
/*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑网络参数↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/
