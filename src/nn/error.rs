/*
 * @Description  : 层与网络的错误类型
 *
 * 所有错误均属于前置条件违例（数量、形状、参数等），在setup/reshape/forward时同步检出，
 * 出错后不做任何恢复，由调用方决定如何处理
 */

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayerError {
    #[error("层{layer}需要{expected}个{kind} blob，实际得到{got}个")]
    InvalidArity {
        layer: String,
        kind: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{message}：预期形状为{expected:?}，实际形状为{got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
        message: String,
    },
    #[error("层{layer}的参数blob数量不一致：预期{expected}个，实际{got}个")]
    ParamCountMismatch {
        layer: String,
        expected: usize,
        got: usize,
    },
    #[error("参数无效：{0}")]
    InvalidParameter(String),
    #[error("未知的层类型：{0}")]
    UnknownLayerType(String),
    #[error("未找到名为{0}的blob")]
    BlobNotFound(String),
    #[error("未找到名为{0}的层")]
    LayerNotFound(String),
    #[error("IO错误：{0}")]
    Io(#[from] std::io::Error),
    #[error("配置解析错误：{0}")]
    Config(#[from] serde_json::Error),
    #[error("参数文件序列化错误：{0}")]
    Serialization(#[from] bincode::Error),
    #[error("参数文件格式无效：{0}")]
    InvalidParamsFile(String),
}
