use crate::errors::TensorError;
use crate::tensor::Tensor;

impl Tensor {
    /// 将所有元素置为`value`
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// 将`other`的值原地复制到本张量，两者形状必须严格一致，否则会panic
    pub fn assign(&mut self, other: &Self) {
        assert!(
            self.is_same_shape(other),
            "{}",
            TensorError::InconsistentShape(self.shape().to_vec(), other.shape().to_vec())
        );
        self.data.assign(&other.data);
    }

    /// 所有元素原地乘以`factor`
    pub fn scale_mut(&mut self, factor: f32) {
        self.data.mapv_inplace(|x| x * factor);
    }

    /// 在元素个数不变的前提下原地改变形状，否则会panic
    pub fn reshape_mut(&mut self, shape: &[usize]) {
        let new_size: usize = shape.iter().product();
        assert!(
            new_size == self.size(),
            "{}",
            TensorError::IncompatibleShape {
                from: self.shape().to_vec(),
                to: shape.to_vec(),
            }
        );
        *self = Self::new(self.data_as_slice(), shape);
    }

    /// 对张量中的所有元素求和
    pub fn sum(&self) -> f32 {
        self.data.sum()
    }
}
