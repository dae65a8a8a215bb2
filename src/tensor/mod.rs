use ndarray::{Array, ArrayD, IxDyn};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::errors::TensorError;

mod ops {
    pub mod add_assign;
    pub mod others;
}

mod index;
mod property;


/// 定义张量的结构体。本库中的张量统一为行优先（row-major）的连续存储，
/// 4维张量的各维依次为`[N, C, H, W]`（批、通道、高、宽）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    data: ArrayD<f32>,
}

impl Tensor {
    /// 创建一个张量，`data`的长度必须和`shape`中所有元素的乘积相等，否则会panic。
    /// 形状为`[]`时表示标量，此时`data`的长度须为1。
    pub fn new(data: &[f32], shape: &[usize]) -> Self {
        match Array::from_shape_vec(IxDyn(shape), data.to_vec()) {
            Ok(data) => Self { data },
            Err(_) => panic!(
                "{}",
                TensorError::DataShapeMismatch {
                    data_len: data.len(),
                    shape: shape.to_vec(),
                }
            ),
        }
    }

    /// 创建一个元素全为0的张量
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(shape)),
        }
    }

    /// 创建一个元素全为`value`的张量
    pub fn full(value: f32, shape: &[usize]) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(shape), value),
        }
    }

    /// 创建一个随机张量，其值在[min, max]的闭区间
    pub fn uniform(min: f32, max: f32, shape: &[usize]) -> Self {
        Self::uniform_with(&mut rand::thread_rng(), min, max, shape)
    }

    /// 使用固定种子创建随机张量（确保可重复性）
    pub fn uniform_seeded(min: f32, max: f32, shape: &[usize], seed: u64) -> Self {
        Self::uniform_with(&mut StdRng::seed_from_u64(seed), min, max, shape)
    }

    /// 创建一个服从正态分布的随机张量
    pub fn normal(mean: f32, std_dev: f32, shape: &[usize]) -> Self {
        Self::normal_with(&mut rand::thread_rng(), mean, std_dev, shape)
    }

    /// 使用固定种子创建服从正态分布的随机张量（确保可重复性）
    pub fn normal_seeded(mean: f32, std_dev: f32, shape: &[usize], seed: u64) -> Self {
        Self::normal_with(&mut StdRng::seed_from_u64(seed), mean, std_dev, shape)
    }
}

// 私有方法
impl Tensor {
    fn uniform_with<R: Rng>(rng: &mut R, min: f32, max: f32, shape: &[usize]) -> Self {
        let uniform = Uniform::from(min..=max);
        let data = (0..shape.iter().product::<usize>())
            .map(|_| uniform.sample(rng))
            .collect::<Vec<_>>();
        Self::new(&data, shape)
    }

    // Box-Muller变换
    fn normal_with<R: Rng>(rng: &mut R, mean: f32, std_dev: f32, shape: &[usize]) -> Self {
        let data_len = shape.iter().product::<usize>();
        let mut data = Vec::with_capacity(data_len);

        while data.len() < data_len {
            let u1: f32 = rng.r#gen();
            let u2: f32 = rng.r#gen();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f32::consts::PI * u2;
            let z0 = mean + std_dev * r * theta.cos();
            let z1 = mean + std_dev * r * theta.sin();

            if z0.is_finite() {
                data.push(z0);
            }
            if data.len() < data_len && z1.is_finite() {
                data.push(z1);
            }
        }

        Self::new(&data, shape)
    }
}
