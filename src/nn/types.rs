/*
 * @Author       : 老董
 * @Date         : 2026-02-11
 * @Description  : 基础类型：整数句柄、形状、张量规格/登记项、初始化方式
 *
 * 设计要点：层与张量的"身份"统一用 arena 发放的整数句柄表达，
 * 克隆引擎的层缓存/张量替换表因此都是句柄到句柄的映射，
 * 不依赖可变对象的引用相等或哈希。
 */

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 层的稳定整数句柄（由 arena 在登记时发放）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerId(pub u64);

/// 张量的稳定整数句柄（由 arena 在节点登记时发放）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorId(pub u64);

/// 权重与中间结果的数值载体（本 crate 只搬运，不做数值内核）
pub type TensorData = ndarray::ArrayD<f32>;

/// 掩码张量
pub type Mask = ndarray::ArrayD<bool>;

/// 调用期关键字参数（随 Node 记录，克隆重放时原样传回）
pub type CallArgs = serde_json::Map<String, serde_json::Value>;

/// 张量元素类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DType {
    #[default]
    F32,
    F64,
    Bool,
}

impl DType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::F32 => "float32",
            Self::F64 => "float64",
            Self::Bool => "bool",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "float32" => Some(Self::F32),
            "float64" => Some(Self::F64),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }
}

/// 形状：每一维是 Some(定长) 或 None（不定长，常见于 batch 维）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape(pub Vec<Option<usize>>);

impl Shape {
    pub fn new(dims: Vec<Option<usize>>) -> Self {
        Self(dims)
    }

    /// 全定长形状
    pub fn from_fixed(dims: &[usize]) -> Self {
        Self(dims.iter().map(|&d| Some(d)).collect())
    }

    /// 批形状：[None, 特征维...]
    pub fn with_batch(feature_dims: &[usize]) -> Self {
        let mut dims = vec![None];
        dims.extend(feature_dims.iter().map(|&d| Some(d)));
        Self(dims)
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[Option<usize>] {
        &self.0
    }

    /// 最后一维（全连接层的特征维推断用）
    pub fn last_dim(&self) -> Option<usize> {
        self.0.last().copied().flatten()
    }

    /// 判断具体数组形状是否与本形状兼容（None 维匹配任意长度）
    pub fn is_compatible_with(&self, concrete: &[usize]) -> bool {
        self.0.len() == concrete.len()
            && self
                .0
                .iter()
                .zip(concrete)
                .all(|(dim, &c)| dim.is_none() || *dim == Some(c))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|d| d.map_or_else(|| "None".to_string(), |v| v.to_string()))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// 张量规格：形状 + 元素类型 + 稀疏标记
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub shape: Shape,
    pub dtype: DType,
    pub sparse: bool,
}

impl TensorSpec {
    pub fn dense(shape: Shape, dtype: DType) -> Self {
        Self {
            shape,
            dtype,
            sparse: false,
        }
    }
}

/// 张量来源：弱回指的查表化表达（张量 → (层, 节点序, 输出序)）
///
/// 不把指针挂在张量上，形状/掩码推断要回溯时查 arena 即可。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorOrigin {
    pub layer: LayerId,
    pub node_index: usize,
    pub tensor_index: usize,
}

/// 张量登记项
#[derive(Debug, Clone)]
pub struct TensorMeta {
    pub name: String,
    pub spec: TensorSpec,
    pub origin: TensorOrigin,
}

/// 参数初始化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Init {
    Zeros,
    Ones,
    #[default]
    GlorotUniform,
}

impl Init {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Zeros => "zeros",
            Self::Ones => "ones",
            Self::GlorotUniform => "glorot_uniform",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "zeros" => Some(Self::Zeros),
            "ones" => Some(Self::Ones),
            "glorot_uniform" => Some(Self::GlorotUniform),
            _ => None,
        }
    }

    /// 按形状生成初始值；rng 来自所属图（可带种子，保证可重复）
    pub fn generate_with_rng(&self, dims: &[usize], rng: &mut StdRng) -> TensorData {
        match self {
            Self::Zeros => ndarray::ArrayD::zeros(ndarray::IxDyn(dims)),
            Self::Ones => ndarray::ArrayD::ones(ndarray::IxDyn(dims)),
            Self::GlorotUniform => {
                // fan_in/fan_out 取首末两维（一维权重退化为同一维）
                let fan_in = dims.first().copied().unwrap_or(1);
                let fan_out = dims.last().copied().unwrap_or(1);
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                ndarray::ArrayD::from_shape_fn(ndarray::IxDyn(dims), |_| {
                    rng.gen_range(-limit..limit)
                })
            }
        }
    }
}
