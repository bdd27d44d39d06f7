/*
 * @Author       : 老董
 * @Date         : 2026-02-12
 * @Description  : GraphInner——层/张量/节点 arena 的底层实现
 *
 * 各 impl 块分散在子模块中：
 * - core.rs: 基础访问器 + 登记/命名 + 来源回溯
 * - call.rs: 层调用（构建、形状推断、节点与张量登记）
 */

mod call;
mod core;

use crate::nn::graph::node::Node;
use crate::nn::layer::Layer;
use crate::nn::types::{LayerId, TensorId, TensorMeta};
use rand::rngs::StdRng;
use std::collections::HashMap;

/// 层在 arena 中的登记槽：层本体 + 它名下的全部调用记录
pub struct LayerSlot {
    pub layer: Box<dyn Layer>,
    pub inbound_nodes: Vec<Node>,
}

/// 图的完整定义（核心实现）
///
/// 这是层图 arena 的核心实现。用户通常通过 `Graph` 句柄使用此结构。
/// 每个模型世界拥有一个 arena；嵌套进其他模型的 Sequential 自带
/// 私有 arena，节点随所属模型一同销毁。
pub struct GraphInner {
    pub(in crate::nn) name: String,
    pub(in crate::nn) layers: HashMap<LayerId, LayerSlot>,
    pub(in crate::nn) tensors: HashMap<TensorId, TensorMeta>,
    pub(in crate::nn) next_layer_id: u64,
    pub(in crate::nn) next_tensor_id: u64,
    /// 自动命名用的前缀计数（如 "dense" -> 已发放序号）
    pub(in crate::nn) name_uids: HashMap<String, u64>,
    /// 图级别的随机数生成器（用于参数初始化等）
    /// None 表示使用默认的 thread 熵源（非确定性）
    pub(in crate::nn) rng: Option<StdRng>,
}

impl Default for GraphInner {
    fn default() -> Self {
        Self::new()
    }
}
