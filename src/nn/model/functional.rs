/*
 * @Author       : 老董
 * @Date         : 2026-02-18
 * @Description  : 函数式 Model——由输入张量到输出张量的 DAG
 *
 * 构建时做一次自输出端回溯的逆拓扑整理，得到按深度分桶的节点索引
 * （输出端深度 0，越靠输入深度越大）。深度 d 的节点只依赖深度 > d
 * 的节点产出的张量，因此克隆/执行按深度严格递减遍历即可保证
 * 所有前置都已就绪。分桶只在构建时计算一次，之后作为只读视图。
 */

use super::super::criterion;
use super::super::error::GraphError;
use super::super::graph::{Graph, Node};
use super::super::layer::{CustomObjects, InputLayer, deserialize_layer};
use super::super::optimizer::Optimizer;
use super::super::types::{CallArgs, LayerId, TensorData, TensorId};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};

/// 模型 DAG 中的节点坐标：(层, 该层上的节点序号)
pub type NodeKey = (LayerId, usize);

/// compile 之后挂在模型上的训练状态
pub struct TrainingState {
    pub optimizer: Box<dyn Optimizer>,
    pub loss: Value,
    pub metrics: Value,
    pub sample_weight_mode: Option<String>,
    pub loss_weights: Option<Vec<f32>>,
    pub(in crate::nn) train_function_built: bool,
}

pub struct Model {
    graph: Graph,
    name: String,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    /// 深度 -> 节点列表；深度 0 为输出端
    nodes_by_depth: BTreeMap<usize, Vec<NodeKey>>,
    /// 拓扑序层列表（靠输入侧在前）
    layers: Vec<LayerId>,
    training: Option<TrainingState>,
}

impl Model {
    // ==================== 构建 ====================

    /// 从输入/输出张量构建 DAG 模型
    ///
    /// 回溯在声明的输入张量处停下，因此把中间张量当输入也是合法的
    /// （克隆注入替换张量时会出现这种模型）。
    pub fn new(
        graph: Graph,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
        name: Option<&str>,
    ) -> Result<Self, GraphError> {
        if inputs.is_empty() || outputs.is_empty() {
            return Err(GraphError::InvalidConfig(
                "模型必须至少有一个输入张量和一个输出张量".into(),
            ));
        }
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| graph.inner().name().to_string());

        let (nodes_by_depth, layers) = {
            let inner = graph.inner();
            for &t in inputs.iter().chain(&outputs) {
                inner.tensor(t)?;
            }
            let input_set: HashSet<TensorId> = inputs.iter().copied().collect();
            let order = topo_nodes(&inner, &outputs, &input_set)?;

            // 消费者先行的松弛：producer 深度 = max(consumer 深度 + 1)
            let known: HashSet<NodeKey> = order.iter().copied().collect();
            let mut depth: HashMap<NodeKey, usize> =
                order.iter().map(|&k| (k, 0usize)).collect();
            for &key in order.iter().rev() {
                let d = depth[&key];
                let node = inner.node(key.0, key.1)?;
                for &t in &node.input_tensors {
                    let origin = inner.tensor(t)?.origin;
                    let producer = (origin.layer, origin.node_index);
                    if known.contains(&producer) {
                        let entry = depth.get_mut(&producer).unwrap();
                        *entry = (*entry).max(d + 1);
                    }
                }
            }

            let mut buckets: BTreeMap<usize, Vec<NodeKey>> = BTreeMap::new();
            for &key in &order {
                buckets.entry(depth[&key]).or_default().push(key);
            }

            // 层按首见顺序收集，再按层深度（其节点的最大深度）降序稳定排序
            let mut layer_seq: Vec<LayerId> = Vec::new();
            let mut layer_depth: HashMap<LayerId, usize> = HashMap::new();
            for &(layer, node_index) in &order {
                if !layer_seq.contains(&layer) {
                    layer_seq.push(layer);
                }
                let entry = layer_depth.entry(layer).or_insert(0);
                *entry = (*entry).max(depth[&(layer, node_index)]);
            }
            layer_seq.sort_by_key(|id| std::cmp::Reverse(layer_depth[id]));
            (buckets, layer_seq)
        };

        Ok(Self {
            graph,
            name,
            inputs,
            outputs,
            nodes_by_depth,
            layers,
            training: None,
        })
    }

    // ==================== 基础访问器 ====================

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn layer_ids(&self) -> &[LayerId] {
        &self.layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// 深度分桶索引的只读视图（深度 0 为输出端）
    pub fn nodes_by_depth(&self) -> &BTreeMap<usize, Vec<NodeKey>> {
        &self.nodes_by_depth
    }

    pub fn node_count(&self) -> usize {
        self.nodes_by_depth.values().map(Vec::len).sum()
    }

    /// 按名字（唯一）或拓扑序号检索层
    pub fn get_layer(
        &self,
        name: Option<&str>,
        index: Option<usize>,
    ) -> Result<LayerId, GraphError> {
        if let Some(index) = index {
            return self.layers.get(index).copied().ok_or_else(|| {
                GraphError::InvalidOperation(format!(
                    "层序号{index}越界（模型共有{}层）",
                    self.layers.len()
                ))
            });
        }
        let name = name.ok_or_else(|| {
            GraphError::InvalidOperation("get_layer 需要给出层名或序号".into())
        })?;
        let inner = self.graph.inner();
        self.layers
            .iter()
            .copied()
            .find(|&id| inner.layer_name(id).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| GraphError::InvalidOperation(format!("模型中没有名为`{name}`的层")))
    }

    pub fn count_params(&self) -> usize {
        let inner = self.graph.inner();
        self.layers
            .iter()
            .filter_map(|&id| inner.layer(id).ok())
            .flat_map(|slot| slot.layer.weights())
            .map(|(_, w)| w.len())
            .sum()
    }

    // ==================== 执行 ====================

    /// 深度递减遍历执行前向计算
    pub fn predict(&self, xs: &[TensorData]) -> Result<Vec<TensorData>, GraphError> {
        if xs.len() != self.inputs.len() {
            return Err(GraphError::TensorCountMismatch {
                expected: self.inputs.len(),
                got: xs.len(),
            });
        }
        let inner = self.graph.inner();
        let mut values: HashMap<TensorId, TensorData> = HashMap::new();
        for (&t, x) in self.inputs.iter().zip(xs) {
            let spec = &inner.tensor(t)?.spec;
            if !spec.shape.is_compatible_with(x.shape()) {
                return Err(GraphError::ShapeMismatch {
                    expected: spec.shape.to_string(),
                    got: x.shape().to_vec(),
                    message: format!("输入张量`{}`", inner.tensor(t)?.name),
                });
            }
            values.insert(t, x.clone());
        }

        let empty_args = CallArgs::new();
        for (_, keys) in self.nodes_by_depth.iter().rev() {
            for &(layer_id, node_index) in keys {
                let slot = inner.layer(layer_id)?;
                let node = inner.node(layer_id, node_index)?;
                if slot.layer.is_input_layer() {
                    let out = node.output_tensors[0];
                    if !values.contains_key(&out) {
                        if let Some(input) = slot.layer.as_any().downcast_ref::<InputLayer>()
                            && let Some(v) = input.fixed_value()
                        {
                            values.insert(out, v.clone());
                        } else {
                            return Err(GraphError::InvalidOperation(format!(
                                "占位输入`{}`没有喂入数值",
                                inner.tensor(out)?.name
                            )));
                        }
                    }
                    continue;
                }
                let mut ins = Vec::with_capacity(node.input_tensors.len());
                for &t in &node.input_tensors {
                    ins.push(values.get(&t).cloned().ok_or_else(|| {
                        GraphError::InternalError("深度遍历顺序被破坏：输入尚未就绪".into())
                    })?);
                }
                let args = node.arguments.as_ref().unwrap_or(&empty_args);
                let outs = slot.layer.call(&ins, args)?;
                for (&t, v) in node.output_tensors.iter().zip(outs) {
                    values.insert(t, v);
                }
            }
        }

        self.outputs
            .iter()
            .map(|&t| {
                values.get(&t).cloned().ok_or_else(|| {
                    GraphError::InternalError("无法计算输出张量：模型图可能不连通".into())
                })
            })
            .collect()
    }

    // ==================== 训练状态 ====================

    pub fn compile(
        &mut self,
        optimizer: Box<dyn Optimizer>,
        loss: Value,
        metrics: Value,
    ) -> Result<(), GraphError> {
        self.compile_full(optimizer, loss, metrics, None, None)
    }

    pub fn compile_full(
        &mut self,
        optimizer: Box<dyn Optimizer>,
        loss: Value,
        metrics: Value,
        sample_weight_mode: Option<String>,
        loss_weights: Option<Vec<f32>>,
    ) -> Result<(), GraphError> {
        self.training = Some(TrainingState {
            optimizer,
            loss,
            metrics,
            sample_weight_mode,
            loss_weights,
            train_function_built: false,
        });
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.training.is_some()
    }

    pub fn training_state(&self) -> Option<&TrainingState> {
        self.training.as_ref()
    }

    pub fn training_state_mut(&mut self) -> Option<&mut TrainingState> {
        self.training.as_mut()
    }

    /// 构建训练函数：按拓扑序收集可训练参数清单并让优化器创建槽变量
    pub fn make_train_function(&mut self) -> Result<(), GraphError> {
        if self.training.is_none() {
            return Err(GraphError::NotCompiled);
        }
        let params: Vec<(String, Vec<usize>)> = {
            let inner = self.graph.inner();
            let mut all = Vec::new();
            for &id in &self.layers {
                let slot = inner.layer(id)?;
                if !slot.layer.trainable() {
                    continue;
                }
                for (name, w) in slot.layer.weights() {
                    all.push((name, w.shape().to_vec()));
                }
            }
            all
        };
        let state = self.training.as_mut().unwrap();
        state.optimizer.build(&params)?;
        state.train_function_built = true;
        Ok(())
    }

    pub fn evaluate(&self, x: &[TensorData], y: &TensorData) -> Result<f32, GraphError> {
        let state = self.training.as_ref().ok_or(GraphError::NotCompiled)?;
        let outputs = self.predict(x)?;
        if outputs.len() != 1 {
            return Err(GraphError::InvalidOperation(
                "evaluate 目前只支持单输出模型".into(),
            ));
        }
        criterion::evaluate_loss(&state.loss, &outputs[0], y)
    }

    /// 单批训练入口：前向 + 损失 + 优化器记账
    ///
    /// 梯度与参数更新属于外部执行后端，这里只推进训练簿记。
    pub fn train_on_batch(&mut self, x: &[TensorData], y: &TensorData) -> Result<f32, GraphError> {
        if self.training.is_none() {
            return Err(GraphError::NotCompiled);
        }
        if !self.training.as_ref().unwrap().train_function_built {
            self.make_train_function()?;
        }
        let loss = self.evaluate(x, y)?;
        self.training.as_mut().unwrap().optimizer.step();
        Ok(loss)
    }

    // ==================== 权重 ====================

    pub fn get_weights(&self) -> Vec<TensorData> {
        let inner = self.graph.inner();
        self.layers
            .iter()
            .filter_map(|&id| inner.layer(id).ok())
            .flat_map(|slot| slot.layer.weights())
            .map(|(_, w)| w)
            .collect()
    }

    pub fn set_weights(&mut self, values: &[TensorData]) -> Result<(), GraphError> {
        let mut inner = self.graph.inner_mut();
        let mut cursor = 0usize;
        for &id in &self.layers {
            let slot = inner.layer_mut(id)?;
            let count = slot.layer.weights().len();
            if cursor + count > values.len() {
                return Err(GraphError::TensorCountMismatch {
                    expected: cursor + count,
                    got: values.len(),
                });
            }
            slot.layer.set_weights(&values[cursor..cursor + count])?;
            cursor += count;
        }
        if cursor != values.len() {
            return Err(GraphError::TensorCountMismatch {
                expected: cursor,
                got: values.len(),
            });
        }
        Ok(())
    }

    // ==================== 配置导出/重建 ====================

    /// 导出函数式拓扑配置
    ///
    /// 节点序号导出为"模型相对"序号：共享 arena 里层可能还挂着别的
    /// 模型的节点，重建端重放时序号从零密集分配，引用要跟着换算。
    pub fn get_config(&self) -> Result<Value, GraphError> {
        let inner = self.graph.inner();

        // 模型相对节点序号换算表
        let mut nodes_of_layer: HashMap<LayerId, Vec<usize>> = HashMap::new();
        for keys in self.nodes_by_depth.values() {
            for &(layer, node_index) in keys {
                nodes_of_layer.entry(layer).or_default().push(node_index);
            }
        }
        let mut relative: HashMap<NodeKey, usize> = HashMap::new();
        for (&layer, indices) in &mut nodes_of_layer {
            indices.sort_unstable();
            for (rel, &orig) in indices.iter().enumerate() {
                relative.insert((layer, orig), rel);
            }
        }

        let tensor_ref = |t: TensorId| -> Result<Value, GraphError> {
            let origin = inner.tensor(t)?.origin;
            let rel = relative
                .get(&(origin.layer, origin.node_index))
                .copied()
                .ok_or_else(|| {
                    GraphError::NotSerializable(
                        "模型边界张量不是由模型内节点产出，无法导出拓扑".into(),
                    )
                })?;
            Ok(json!([
                inner.layer_name(origin.layer)?,
                rel,
                origin.tensor_index
            ]))
        };

        let mut layer_records = Vec::with_capacity(self.layers.len());
        for &id in &self.layers {
            let slot = inner.layer(id)?;
            let mut node_confs = Vec::new();
            for &orig_index in &nodes_of_layer[&id] {
                let node = inner.node(id, orig_index)?;
                if node.input_tensors.is_empty() {
                    // 输入层节点在重建端随登记自动产生，不进配置
                    continue;
                }
                let mut tuples = Vec::with_capacity(node.input_tensors.len());
                for (i, &t) in node.input_tensors.iter().enumerate() {
                    let Value::Array(mut parts) = tensor_ref(t)? else {
                        unreachable!()
                    };
                    let kwargs = if i == 0 {
                        node.arguments.clone().unwrap_or_default()
                    } else {
                        CallArgs::new()
                    };
                    parts.push(Value::Object(kwargs));
                    tuples.push(Value::Array(parts));
                }
                node_confs.push(Value::Array(tuples));
            }
            layer_records.push(json!({
                "name": slot.layer.name(),
                "class_name": slot.layer.class_name(),
                "config": slot.layer.get_config(),
                "inbound_nodes": node_confs,
            }));
        }

        let input_layers: Vec<Value> = self
            .inputs
            .iter()
            .map(|&t| tensor_ref(t))
            .collect::<Result<_, _>>()?;
        let output_layers: Vec<Value> = self
            .outputs
            .iter()
            .map(|&t| tensor_ref(t))
            .collect::<Result<_, _>>()?;

        Ok(json!({
            "name": self.name,
            "layers": layer_records,
            "input_layers": input_layers,
            "output_layers": output_layers,
        }))
    }

    /// 从函数式拓扑配置重建模型（全新 arena，全新权重）
    pub fn from_config(
        config: &Value,
        custom_objects: Option<&CustomObjects>,
    ) -> Result<Self, GraphError> {
        let obj = config
            .as_object()
            .ok_or_else(|| GraphError::TypeMismatch("函数式模型配置应为对象".into()))?;
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("model")
            .to_string();
        let layer_records = obj
            .get("layers")
            .and_then(Value::as_array)
            .ok_or_else(|| GraphError::InvalidConfig("函数式模型配置缺少 layers".into()))?;

        let graph = Graph::with_name(&name);
        let mut id_by_name: HashMap<String, LayerId> = HashMap::new();
        struct PendingLayer {
            id: LayerId,
            node_confs: Vec<Value>,
            applied: usize,
        }
        let mut pendings: Vec<PendingLayer> = Vec::new();

        for record in layer_records {
            let layer_name = record
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| GraphError::InvalidConfig("层记录缺少 name".into()))?;
            let mut layer = deserialize_layer(record, custom_objects)?;
            layer.set_name(layer_name);
            let is_input = layer.is_input_layer();
            let id = graph.add_layer(layer)?;
            id_by_name.insert(layer_name.to_string(), id);
            if is_input {
                graph.call_layer(id, &[], None)?;
            }
            let node_confs = record
                .get("inbound_nodes")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            pendings.push(PendingLayer {
                id,
                node_confs,
                applied: 0,
            });
        }

        // 轮替重放节点：引用的 (层, 节点) 就绪才可调用，直到全部完成
        loop {
            let mut progress = false;
            let mut remaining = false;
            for pending in &mut pendings {
                while pending.applied < pending.node_confs.len() {
                    let conf = &pending.node_confs[pending.applied];
                    match resolve_node_conf(&graph, &id_by_name, conf)? {
                        Some((inputs, arguments)) => {
                            graph.call_layer(pending.id, &inputs, arguments)?;
                            pending.applied += 1;
                            progress = true;
                        }
                        None => {
                            remaining = true;
                            break;
                        }
                    }
                }
            }
            if !remaining {
                break;
            }
            if !progress {
                return Err(GraphError::InvalidConfig(
                    "拓扑配置存在无法解析的节点引用".into(),
                ));
            }
        }

        let resolve_boundary = |key: &str| -> Result<Vec<TensorId>, GraphError> {
            obj.get(key)
                .and_then(Value::as_array)
                .ok_or_else(|| GraphError::InvalidConfig(format!("函数式模型配置缺少 {key}")))?
                .iter()
                .map(|entry| resolve_tensor_ref(&graph, &id_by_name, entry))
                .collect()
        };
        let inputs = resolve_boundary("input_layers")?;
        let outputs = resolve_boundary("output_layers")?;
        Self::new(graph, inputs, outputs, Some(&name))
    }

    // ==================== 概要 ====================

    /// 层概要表（名称/类名/输出形状/参数量）
    pub fn summary(&self) -> String {
        let inner = self.graph.inner();
        let mut lines = vec![format!("Model: {}", self.name)];
        lines.push(format!(
            "{:<24}{:<16}{:<20}{}",
            "Layer (name)", "Class", "Output shape", "Params"
        ));
        let mut total = 0usize;
        for &id in &self.layers {
            let Ok(slot) = inner.layer(id) else { continue };
            let shape = slot
                .inbound_nodes
                .last()
                .and_then(|n| n.output_shapes.first())
                .map_or_else(|| "?".to_string(), |s| s.to_string());
            let params: usize = slot.layer.weights().iter().map(|(_, w)| w.len()).sum();
            total += params;
            lines.push(format!(
                "{:<24}{:<16}{:<20}{}",
                slot.layer.name(),
                slot.layer.class_name(),
                shape,
                params
            ));
        }
        lines.push(format!("Total params: {total}"));
        lines.join("\n")
    }
}

// ========== 自由函数：拓扑整理与配置解析 ==========

/// 自输出端回溯的后序收集：产出有效拓扑序（生产者在前）
fn topo_nodes(
    inner: &crate::nn::graph::GraphInner,
    outputs: &[TensorId],
    input_set: &HashSet<TensorId>,
) -> Result<Vec<NodeKey>, GraphError> {
    enum Step {
        Enter(TensorId),
        Exit(NodeKey),
    }
    let mut order: Vec<NodeKey> = Vec::new();
    let mut visited: HashSet<NodeKey> = HashSet::new();
    let mut emitted: HashSet<NodeKey> = HashSet::new();
    let mut stack: Vec<Step> = outputs.iter().rev().map(|&t| Step::Enter(t)).collect();

    while let Some(step) = stack.pop() {
        match step {
            Step::Enter(tensor) => {
                let origin = inner.tensor(tensor)?.origin;
                let key = (origin.layer, origin.node_index);
                if input_set.contains(&tensor) {
                    // 边界张量：占位输入层自己的节点保留为叶子，其余不再下潜
                    if inner.layer(origin.layer)?.layer.is_input_layer() && emitted.insert(key) {
                        order.push(key);
                    }
                    continue;
                }
                if !visited.insert(key) {
                    continue;
                }
                stack.push(Step::Exit(key));
                let node = inner.node(key.0, key.1)?;
                for &input in node.input_tensors.iter().rev() {
                    stack.push(Step::Enter(input));
                }
            }
            Step::Exit(key) => {
                if emitted.insert(key) {
                    order.push(key);
                }
            }
        }
    }
    Ok(order)
}

/// 解析一条节点配置；引用的节点未就绪时返回 None
fn resolve_node_conf(
    graph: &Graph,
    id_by_name: &HashMap<String, LayerId>,
    conf: &Value,
) -> Result<Option<(Vec<TensorId>, Option<CallArgs>)>, GraphError> {
    let tuples = conf
        .as_array()
        .ok_or_else(|| GraphError::InvalidConfig("节点配置应为来路数组".into()))?;
    let inner = graph.inner();
    let mut inputs = Vec::with_capacity(tuples.len());
    let mut arguments: Option<CallArgs> = None;
    for (i, tuple) in tuples.iter().enumerate() {
        let parts = tuple
            .as_array()
            .filter(|p| p.len() >= 3)
            .ok_or_else(|| GraphError::InvalidConfig("节点来路应为 [层名, 节点序, 张量序]".into()))?;
        let layer_name = parts[0]
            .as_str()
            .ok_or_else(|| GraphError::InvalidConfig("节点来路的层名应为字符串".into()))?;
        let node_index = parts[1].as_u64().unwrap_or(0) as usize;
        let tensor_index = parts[2].as_u64().unwrap_or(0) as usize;
        let &layer_id = id_by_name.get(layer_name).ok_or_else(|| {
            GraphError::InvalidConfig(format!("节点来路引用了未定义的层`{layer_name}`"))
        })?;
        let slot = inner.layer(layer_id)?;
        let Some(node) = slot.inbound_nodes.get(node_index) else {
            return Ok(None); // 还没重放到，留待下一轮
        };
        let &tensor = node.output_tensors.get(tensor_index).ok_or_else(|| {
            GraphError::InvalidConfig(format!("节点来路的张量序号{tensor_index}越界"))
        })?;
        inputs.push(tensor);
        if i == 0
            && let Some(Value::Object(kwargs)) = parts.get(3)
            && !kwargs.is_empty()
        {
            arguments = Some(kwargs.clone());
        }
    }
    Ok(Some((inputs, arguments)))
}

/// 解析边界张量引用 [层名, 节点序, 张量序]
fn resolve_tensor_ref(
    graph: &Graph,
    id_by_name: &HashMap<String, LayerId>,
    entry: &Value,
) -> Result<TensorId, GraphError> {
    let parts = entry
        .as_array()
        .filter(|p| p.len() >= 3)
        .ok_or_else(|| GraphError::InvalidConfig("边界引用应为 [层名, 节点序, 张量序]".into()))?;
    let layer_name = parts[0]
        .as_str()
        .ok_or_else(|| GraphError::InvalidConfig("边界引用的层名应为字符串".into()))?;
    let node_index = parts[1].as_u64().unwrap_or(0) as usize;
    let tensor_index = parts[2].as_u64().unwrap_or(0) as usize;
    let &layer_id = id_by_name.get(layer_name).ok_or_else(|| {
        GraphError::InvalidConfig(format!("边界引用了未定义的层`{layer_name}`"))
    })?;
    let inner = graph.inner();
    let node = inner.node(layer_id, node_index)?;
    node.output_tensors.get(tensor_index).copied().ok_or_else(|| {
        GraphError::InvalidConfig(format!("边界引用的张量序号{tensor_index}越界"))
    })
}

// 供克隆引擎按坐标读取节点记录
impl Model {
    pub(in crate::nn) fn node_record(&self, key: NodeKey) -> Result<Node, GraphError> {
        Ok(self.graph.inner().node(key.0, key.1)?.clone())
    }
}
