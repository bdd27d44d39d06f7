/*
 * @Author       : 老董
 * @Date         : 2026-02-22
 * @Description  : 克隆引擎——同结构、全新参数地重建模型图
 *
 * Sequential 走受限路径（逐层按配置重实例化再重放 add）；
 * 函数式模型走通用路径：张量替换表 + 层身份缓存 + 深度严格递减遍历。
 * 两条路径都不改动源模型。
 */

use super::super::error::GraphError;
use super::super::graph::Graph;
use super::super::types::{LayerId, Mask, TensorData, TensorId};
use super::functional::Model;
use super::sequential::Sequential;
use std::collections::HashMap;

/// 克隆入口的模型引用（按动态种类分派）
pub enum ModelRef<'a> {
    Sequential(&'a Sequential),
    Functional(&'a Model),
}

impl<'a> From<&'a Sequential> for ModelRef<'a> {
    fn from(model: &'a Sequential) -> Self {
        Self::Sequential(model)
    }
}

impl<'a> From<&'a Model> for ModelRef<'a> {
    fn from(model: &'a Model) -> Self {
        Self::Functional(model)
    }
}

impl ModelRef<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Sequential(m) => m.name(),
            Self::Functional(m) => m.name(),
        }
    }

    pub fn graph(&self) -> &Graph {
        match self {
            Self::Sequential(m) => m.graph(),
            Self::Functional(m) => m.graph(),
        }
    }
}

/// 克隆产物（与输入同种类）
pub enum AnyModel {
    Sequential(Sequential),
    Functional(Model),
}

impl AnyModel {
    pub fn as_ref(&self) -> ModelRef<'_> {
        match self {
            Self::Sequential(m) => ModelRef::Sequential(m),
            Self::Functional(m) => ModelRef::Functional(m),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Sequential(m) => m.name(),
            Self::Functional(m) => m.name(),
        }
    }

    pub fn as_sequential(&self) -> Option<&Sequential> {
        match self {
            Self::Sequential(m) => Some(m),
            Self::Functional(_) => None,
        }
    }

    pub fn as_sequential_mut(&mut self) -> Option<&mut Sequential> {
        match self {
            Self::Sequential(m) => Some(m),
            Self::Functional(_) => None,
        }
    }

    pub fn as_functional(&self) -> Option<&Model> {
        match self {
            Self::Functional(m) => Some(m),
            Self::Sequential(_) => None,
        }
    }

    pub fn as_functional_mut(&mut self) -> Option<&mut Model> {
        match self {
            Self::Functional(m) => Some(m),
            Self::Sequential(_) => None,
        }
    }
}

/// 替换输入：已在目标图里的张量，或待包装的原始数组
pub enum CloneInput {
    Tensor(TensorId),
    Value(TensorData),
}

/// 克隆任意模型（按动态种类分派到对应路径）
pub fn clone_model(
    model: ModelRef<'_>,
    replacement: Option<(Graph, Vec<CloneInput>)>,
) -> Result<AnyModel, GraphError> {
    match model {
        ModelRef::Sequential(m) => clone_sequential_model(m, replacement).map(AnyModel::Sequential),
        ModelRef::Functional(m) => clone_functional_model(m, replacement).map(AnyModel::Functional),
    }
}

/// 克隆 Sequential 模型
///
/// 无替换输入时在全新 arena 里重放层堆叠（首层的隐式输入合成规则
/// 照常生效）；给定替换输入时必须恰好一个张量：来源是占位输入层则
/// 把该层接到栈首，来源是其他层则拒绝，原始数组先包装成输入层。
pub fn clone_sequential_model(
    model: &Sequential,
    replacement: Option<(Graph, Vec<CloneInput>)>,
) -> Result<Sequential, GraphError> {
    let clone_stack = |skip_input_layers: bool| -> Result<Vec<_>, GraphError> {
        let inner = model.graph().inner();
        let mut all = Vec::with_capacity(model.layer_count());
        for &id in model.layer_ids() {
            let slot = inner.layer(id)?;
            // 注入新输入时，源栈里原有的输入层不再重复
            if skip_input_layers && slot.layer.is_input_layer() {
                continue;
            }
            all.push(slot.layer.fresh_clone()?);
        }
        Ok(all)
    };

    let Some((graph, inputs)) = replacement else {
        let mut cloned = Sequential::new(Some(model.name()));
        for layer in clone_stack(false)? {
            cloned.add(layer)?;
        }
        return Ok(cloned);
    };

    if inputs.len() != 1 {
        return Err(GraphError::TensorCountMismatch {
            expected: 1,
            got: inputs.len(),
        });
    }
    let tensor = match inputs.into_iter().next().unwrap() {
        CloneInput::Tensor(tensor) => {
            if !graph.contains_tensor(tensor) {
                return Err(GraphError::TensorNotFound(tensor));
            }
            tensor
        }
        CloneInput::Value(value) => {
            let name = format!("input_wrapper_for_{}", model.name());
            graph.input_wrapping(value, Some(&name))?
        }
    };
    let mut cloned = Sequential::with_graph(graph, Some(model.name()));
    cloned.seed_with_input_tensor(tensor)?;
    for layer in clone_stack(true)? {
        cloned.add(layer)?;
    }
    Ok(cloned)
}

/// 克隆函数式模型
///
/// 替换表以源模型输入播种：要么镜像占位输入（形状/类型/稀疏/名称
/// 一致），要么用调用方给的替换张量。随后按深度严格递减遍历源节点
/// ——深度 d 的节点只依赖深度 > d 的产出，所以处理到某节点时它的
/// 输入必然已在表中。层身份缓存保证多路可达的层只克隆一次。
pub fn clone_functional_model(
    model: &Model,
    replacement: Option<(Graph, Vec<CloneInput>)>,
) -> Result<Model, GraphError> {
    let source = model.graph();
    // 层缓存与张量替换表都是句柄到句柄的映射
    let mut layer_map: HashMap<LayerId, LayerId> = HashMap::new();
    let mut tensor_map: HashMap<TensorId, (TensorId, Option<Mask>)> = HashMap::new();

    let target = match replacement {
        None => {
            // 镜像源模型的占位输入
            let target = Graph::with_name(model.name());
            let inner = source.inner();
            for &t in model.inputs() {
                let meta = inner.tensor(t)?;
                let origin_layer = meta.origin.layer;
                let layer_name = inner.layer_name(origin_layer)?.to_string();
                let new_tensor = target.input_with_spec(meta.spec.clone(), Some(&layer_name))?;
                let new_layer = {
                    let t_inner = target.inner();
                    t_inner.tensor(new_tensor)?.origin.layer
                };
                layer_map.insert(origin_layer, new_layer);
                tensor_map.insert(t, (new_tensor, None));
            }
            target
        }
        Some((target, inputs)) => {
            if inputs.len() != model.inputs().len() {
                return Err(GraphError::TensorCountMismatch {
                    expected: model.inputs().len(),
                    got: inputs.len(),
                });
            }
            // 先把源输入的来路元数据取出来，目标与源可能共用一个 arena
            let origin_info: Vec<(TensorId, LayerId, String)> = {
                let inner = source.inner();
                let mut all = Vec::with_capacity(model.inputs().len());
                for &orig in model.inputs() {
                    let origin_layer = inner.tensor(orig)?.origin.layer;
                    all.push((orig, origin_layer, inner.layer_name(origin_layer)?.to_string()));
                }
                all
            };
            for ((orig, origin_layer, origin_name), input) in origin_info.into_iter().zip(inputs) {
                match input {
                    CloneInput::Tensor(tensor) => {
                        if !target.contains_tensor(tensor) {
                            return Err(GraphError::TensorNotFound(tensor));
                        }
                        tensor_map.insert(orig, (tensor, None));
                    }
                    CloneInput::Value(value) => {
                        // 原始数组先包装成输入层再接进图
                        let name = format!("input_wrapper_for_{origin_name}");
                        let new_tensor = target.input_wrapping(value, Some(&name))?;
                        let new_layer = {
                            let t_inner = target.inner();
                            t_inner.tensor(new_tensor)?.origin.layer
                        };
                        layer_map.insert(origin_layer, new_layer);
                        tensor_map.insert(orig, (new_tensor, None));
                    }
                }
            }
            target
        }
    };

    // 深度严格递减遍历源模型节点
    for (_, keys) in model.nodes_by_depth().iter().rev() {
        for &(layer_id, node_index) in keys {
            let node = model.node_record((layer_id, node_index))?;

            // 取缓存或克隆该层
            let new_layer = match layer_map.get(&layer_id) {
                Some(&cached) => {
                    // 输入层只表示一次，不再重复调用
                    if target.inner().layer(cached)?.layer.is_input_layer() {
                        continue;
                    }
                    cached
                }
                None => {
                    let fresh = source.inner().layer(layer_id)?.layer.fresh_clone()?;
                    let new_id = target.add_layer(fresh)?;
                    layer_map.insert(layer_id, new_id);
                    new_id
                }
            };

            // 聚齐替换后的输入与掩码；不齐则跳过（固定遍历序保证
            // 真正的前置都在更深处处理过了，此处不是错误）
            let mut new_inputs = Vec::with_capacity(node.input_tensors.len());
            let mut input_masks = Vec::with_capacity(node.input_tensors.len());
            for &t in &node.input_tensors {
                match tensor_map.get(&t) {
                    Some((mapped, mask)) => {
                        new_inputs.push(*mapped);
                        input_masks.push(mask.clone());
                    }
                    None => break,
                }
            }
            if new_inputs.len() != node.input_tensors.len() {
                continue;
            }

            // 用原节点的调用期参数重放调用，并重算输出掩码
            let new_outputs = target.call_layer(new_layer, &new_inputs, node.arguments.clone())?;
            let mut output_masks = {
                let t_inner = target.inner();
                t_inner.layer(new_layer)?.layer.compute_mask(&input_masks)
            };
            output_masks.resize(new_outputs.len(), None);
            for (&orig, (new, mask)) in node
                .output_tensors
                .iter()
                .zip(new_outputs.into_iter().zip(output_masks))
            {
                tensor_map.insert(orig, (new, mask));
            }
        }
    }

    // 所有声明的输出都必须已被替换，否则源图本身就有毛病
    let mut new_outputs = Vec::with_capacity(model.outputs().len());
    for &t in model.outputs() {
        match tensor_map.get(&t) {
            Some((mapped, _)) => new_outputs.push(*mapped),
            None => {
                return Err(GraphError::InternalError(format!(
                    "无法计算输出张量{t:?}：源模型图不连通或已损坏"
                )));
            }
        }
    }
    let new_inputs: Vec<TensorId> = model
        .inputs()
        .iter()
        .map(|t| tensor_map[t].0)
        .collect();
    Model::new(target, new_inputs, new_outputs, Some(model.name()))
}
