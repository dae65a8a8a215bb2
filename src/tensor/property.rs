/*
 * @Description  : 本文件仅包含一些属性方法，不包含任何运算方法，所以不会需要用到mut（`data_as_slice_mut`除外）
 */

use super::Tensor;
use crate::errors::TensorError;

impl Tensor {
    /// 张量的形状，4维张量为`[N, C, H, W]`
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// 张量的维（dim）数、阶（rank）数，即`shape()`的元素个数
    pub fn dimension(&self) -> usize {
        self.data.ndim()
    }

    /// 计算张量中所有元素的数量
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 判断两个张量的形状是否严格一致。如：形状为 [1, 4]，[1, 4]和[4]是不一致的，会返回false
    pub fn is_same_shape(&self, other: &Self) -> bool {
        self.shape() == other.shape()
    }

    /// 以行优先的扁平切片形式访问数据
    pub fn data_as_slice(&self) -> &[f32] {
        self.data
            .as_slice()
            .unwrap_or_else(|| panic!("{}", TensorError::NonContiguous))
    }

    pub fn data_as_slice_mut(&mut self) -> &mut [f32] {
        self.data
            .as_slice_mut()
            .unwrap_or_else(|| panic!("{}", TensorError::NonContiguous))
    }

    /// 4维张量中`(n, c, h, w)`处元素在扁平数据中的偏移量
    pub fn offset(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        let shape = self.shape();
        assert!(
            shape.len() == 4,
            "{}",
            TensorError::NotFourDimensional(shape.len())
        );
        ((n * shape[1] + c) * shape[2] + h) * shape[3] + w
    }
}
