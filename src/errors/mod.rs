use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TensorError {
    #[error("数据长度{data_len}与形状{shape:?}所需的元素个数不一致")]
    DataShapeMismatch { data_len: usize, shape: Vec<usize> },
    #[error("张量形状不兼容：无法将形状{from:?}变为{to:?}")]
    IncompatibleShape { from: Vec<usize>, to: Vec<usize> },
    #[error("张量形状不一致：第一个张量的形状为{0:?}，第二个张量的形状为{1:?}")]
    InconsistentShape(Vec<usize>, Vec<usize>),
    #[error("该操作需要4维张量[N, C, H, W]，实际维度为{0}")]
    NotFourDimensional(usize),
    #[error("张量数据不是连续存储的")]
    NonContiguous,
}
