/*
 * @Description  : Blob：值（data）与梯度（diff）成对的张量存储
 *
 * 设计要点：
 * - data与diff各自放在`Rc<RefCell<Tensor>>`中，克隆Blob只复制句柄，底层存储共享；
 * - `share_data`/`share_diff`可把本句柄的存储重新指向另一个Blob的存储（参数别名）；
 * - 仅支持单线程使用（`Rc`本身即非`Send`），同一存储的多个持有者需自行约定写入顺序。
 */

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use super::LayerError;
use crate::tensor::Tensor;

#[derive(Clone)]
pub struct Blob {
    data: Rc<RefCell<Tensor>>,
    diff: Rc<RefCell<Tensor>>,
}

impl Blob {
    /// 创建一个指定形状、值与梯度均为0的Blob
    pub fn new(shape: &[usize]) -> Self {
        Self {
            data: Rc::new(RefCell::new(Tensor::zeros(shape))),
            diff: Rc::new(RefCell::new(Tensor::zeros(shape))),
        }
    }

    /// 创建一个尚无元素的Blob，形状将在之后的`reshape`中确定
    pub fn empty() -> Self {
        Self::new(&[0])
    }

    /// 以给定张量为值创建Blob，梯度初始化为0
    pub fn from_tensor(value: Tensor) -> Self {
        let diff = Tensor::zeros(value.shape());
        Self {
            data: Rc::new(RefCell::new(value)),
            diff: Rc::new(RefCell::new(diff)),
        }
    }

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓形状↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    pub fn shape(&self) -> Vec<usize> {
        self.data.borrow().shape().to_vec()
    }

    pub fn num_axes(&self) -> usize {
        self.data.borrow().dimension()
    }

    pub fn count(&self) -> usize {
        self.data.borrow().size()
    }

    // 以下4个访问器沿用Caffe的约定：缺失的维度视为1
    pub fn num(&self) -> usize {
        self.dim_or_one(0)
    }

    pub fn channels(&self) -> usize {
        self.dim_or_one(1)
    }

    pub fn height(&self) -> usize {
        self.dim_or_one(2)
    }

    pub fn width(&self) -> usize {
        self.dim_or_one(3)
    }

    pub fn offset(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        self.data.borrow().offset(n, c, h, w)
    }

    /// 改变形状：所有共享该存储的句柄都会看到新形状。
    /// 元素个数不变时保留原有值，否则值与梯度均重置为0
    pub fn reshape(&self, shape: &[usize]) {
        Self::reshape_tensor(&mut self.data.borrow_mut(), shape);
        Self::reshape_tensor(&mut self.diff.borrow_mut(), shape);
    }

    pub fn reshape_like(&self, other: &Self) {
        self.reshape(&other.shape());
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑形状↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓存取↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    pub fn data(&self) -> Ref<'_, Tensor> {
        self.data.borrow()
    }

    pub fn data_mut(&self) -> RefMut<'_, Tensor> {
        self.data.borrow_mut()
    }

    pub fn diff(&self) -> Ref<'_, Tensor> {
        self.diff.borrow()
    }

    pub fn diff_mut(&self) -> RefMut<'_, Tensor> {
        self.diff.borrow_mut()
    }

    /// 设置值，形状必须与当前形状一致
    pub fn set_data(&self, value: &Tensor) -> Result<(), LayerError> {
        let mut data = self.data.borrow_mut();
        if !data.is_same_shape(value) {
            return Err(LayerError::ShapeMismatch {
                expected: data.shape().to_vec(),
                got: value.shape().to_vec(),
                message: "设置Blob的值时形状不一致".to_string(),
            });
        }
        data.assign(value);
        Ok(())
    }

    /// 设置梯度，形状必须与当前形状一致
    pub fn set_diff(&self, grad: &Tensor) -> Result<(), LayerError> {
        let mut diff = self.diff.borrow_mut();
        if !diff.is_same_shape(grad) {
            return Err(LayerError::ShapeMismatch {
                expected: diff.shape().to_vec(),
                got: grad.shape().to_vec(),
                message: "设置Blob的梯度时形状不一致".to_string(),
            });
        }
        diff.assign(grad);
        Ok(())
    }

    pub fn clear_diff(&self) {
        self.diff.borrow_mut().fill(0.);
    }

    /// 用梯度更新值：data -= diff
    pub fn update(&self) {
        let diff = self.diff.borrow();
        let mut data = self.data.borrow_mut();
        for (x, g) in data
            .data_as_slice_mut()
            .iter_mut()
            .zip(diff.data_as_slice())
        {
            *x -= g;
        }
    }

    /// 从`source`复制值（`copy_diff`为true时复制梯度）。
    /// 形状不一致时，若`reshape`为true则先改变本Blob的形状，否则报错。
    /// 两者本就共享同一存储时不做任何事
    pub fn copy_from(&self, source: &Self, copy_diff: bool, reshape: bool) -> Result<(), LayerError> {
        let (src, dst) = if copy_diff {
            (&source.diff, &self.diff)
        } else {
            (&source.data, &self.data)
        };
        if Rc::ptr_eq(src, dst) {
            return Ok(());
        }

        let same_shape = source.data.borrow().shape() == self.data.borrow().shape();
        if !same_shape {
            let source_shape = source.shape();
            if !reshape {
                return Err(LayerError::ShapeMismatch {
                    expected: self.shape(),
                    got: source_shape,
                    message: "复制Blob时形状不一致".to_string(),
                });
            }
            self.reshape(&source_shape);
        }
        dst.borrow_mut().assign(&src.borrow());
        Ok(())
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑存取↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/

    /*↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓共享存储↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓↓*/
    /// 令本句柄的值指向`other`的值存储，两者元素个数必须一致
    pub fn share_data(&mut self, other: &Self) -> Result<(), LayerError> {
        self.check_same_count(other, "共享Blob的值时元素个数不一致")?;
        self.data = Rc::clone(&other.data);
        Ok(())
    }

    /// 令本句柄的梯度指向`other`的梯度存储，两者元素个数必须一致
    pub fn share_diff(&mut self, other: &Self) -> Result<(), LayerError> {
        self.check_same_count(other, "共享Blob的梯度时元素个数不一致")?;
        self.diff = Rc::clone(&other.diff);
        Ok(())
    }

    pub fn shares_data_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    pub fn shares_diff_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.diff, &other.diff)
    }
    /*↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑共享存储↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑↑*/
}

// 私有方法
impl Blob {
    fn dim_or_one(&self, axis: usize) -> usize {
        self.data.borrow().shape().get(axis).copied().unwrap_or(1)
    }

    fn reshape_tensor(tensor: &mut Tensor, shape: &[usize]) {
        if tensor.shape() == shape {
            return;
        }
        if tensor.size() == shape.iter().product::<usize>() {
            tensor.reshape_mut(shape);
        } else {
            *tensor = Tensor::zeros(shape);
        }
    }

    fn check_same_count(&self, other: &Self, message: &str) -> Result<(), LayerError> {
        if self.count() != other.count() {
            return Err(LayerError::ShapeMismatch {
                expected: self.shape(),
                got: other.shape(),
                message: message.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("shape", &self.shape())
            .field("data_refs", &Rc::strong_count(&self.data))
            .field("diff_refs", &Rc::strong_count(&self.diff))
            .finish()
    }
}
