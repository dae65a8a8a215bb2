/*
 * @Description  : 负责神经网络（neural network）层的构建与执行：
 *                 Blob存储、层参数、层接口与工厂、各具体层以及顺序执行的Net
 */

mod blob;
mod config;
mod error;
pub mod layer;
mod net;

pub use blob::Blob;
pub use config::{
    ConvolutionParameter, EltwiseOp, EltwiseParameter, FillerParameter, InputSpec,
    LayerParameter, LayerType, NetParameter, Phase,
};
pub use error::LayerError;
pub use layer::{
    BinActiv, BinaryConvolution, Convolution, Eltwise, LayerEnum, SplitConcat, TraitLayer,
    XnorNet, sign,
};
pub use net::Net;

#[cfg(test)]
mod tests;
