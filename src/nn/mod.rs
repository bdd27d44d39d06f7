/*
 * @Author       : 老董
 * @Date         : 2026-02-11
 * @Description  : 负责层图模型容器（layer graph model container）的构建
 *
 * 子模块分工：
 * - graph: 张量/层/节点的 arena 与调用登记
 * - layer: Layer 契约、参考层实现、类名注册表
 * - model: Sequential / 函数式 Model / 克隆引擎 / 存档网关
 * - optimizer: 优化器契约与参考实现（状态可存档）
 * - criterion: 损失/指标名称表与数值求值
 */

mod criterion;
mod error;
mod graph;
pub mod layer;
mod model;
pub mod optimizer;
mod types;

pub use criterion::resolve_custom_objects;
pub use error::GraphError;
pub use graph::{Graph, GraphInner, LayerSlot, Node};
pub use layer::{
    Activation, CustomObjects, Dense, InputLayer, Layer, LayerCtor, deserialize_layer,
};
pub use model::{
    AnyModel, CloneInput, Model, ModelRef, NodeKey, Sequential, TrainingState,
    clone_functional_model, clone_model, clone_sequential_model, load_model, load_weights,
    model_from_config, model_from_json, save_model, save_weights,
};
#[cfg(feature = "archive")]
pub use model::save_model_with_prompt;
pub use optimizer::{Adam, ExternalOptimizer, Optimizer, OptimizerCtor, SGD, deserialize_optimizer};
pub use types::{
    CallArgs, DType, Init, LayerId, Mask, Shape, TensorData, TensorId, TensorMeta, TensorOrigin,
    TensorSpec,
};

#[cfg(test)]
mod tests;
