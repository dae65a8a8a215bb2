use std::ops::{Index, IndexMut};

use super::Tensor;

// 4维张量的元素索引：`tensor[[n, c, h, w]]`
impl Index<[usize; 4]> for Tensor {
    type Output = f32;

    fn index(&self, index: [usize; 4]) -> &Self::Output {
        &self.data[&index[..]]
    }
}

impl IndexMut<[usize; 4]> for Tensor {
    fn index_mut(&mut self, index: [usize; 4]) -> &mut Self::Output {
        &mut self.data[&index[..]]
    }
}
