//! # XNOR Layers
//!
//! `xnor_layers`用纯rust实现了[XNOR-Net](https://arxiv.org/abs/1603.05279)中的两种二值化层：
//! - `BinActiv`：输入的逐元素二值化（sign）以及跨通道均值经盒式滤波后的缩放因子；
//! - `XnorNet`：由`BinActiv`、`SplitConcat`、`BinaryConvolution`和`Eltwise`组合而成的二值卷积层。
//!
//! 为了让这两种层能独立运行，本库同时提供了一个Caffe风格的小型层框架：
//! 带梯度的共享存储`Blob`、统一的层接口`TraitLayer`、按层类型创建层的工厂以及顺序执行的`Net`。
//!

pub mod errors;
pub mod nn;
pub mod tensor;
pub mod utils;
