use crate::errors::TensorError;
use crate::tensor::Tensor;
use std::ops::AddAssign;

impl<'a> AddAssign<&'a Self> for Tensor {
    /// 逐元素原地相加，两者形状必须严格一致，否则会panic
    fn add_assign(&mut self, other: &'a Self) {
        assert!(
            self.is_same_shape(other),
            "{}",
            TensorError::InconsistentShape(self.shape().to_vec(), other.shape().to_vec())
        );
        self.data += &other.data;
    }
}
