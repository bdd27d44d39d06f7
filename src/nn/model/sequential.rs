/*
 * @Author       : 老董
 * @Date         : 2026-02-20
 * @Description  : Sequential——单路层堆叠容器
 *
 * 约束：除首层外每一层恰好消费前一层的单个输出张量；多输出层一律
 * 拒绝。容器维护一个不进 arena 的顶层合成节点，add/pop 时同步其
 * 输出元数据。内部的完整 Model 惰性物化：add/pop 只把 built 置回
 * false，直到某个依赖构建的入口被调用。
 */

use super::super::error::GraphError;
use super::super::graph::{Graph, Node};
use super::super::layer::{CustomObjects, Layer, deserialize_layer};
use super::super::optimizer::Optimizer;
use super::super::types::{CallArgs, DType, LayerId, Mask, Shape, TensorData, TensorId, TensorSpec};
use super::functional::{Model, TrainingState};
use rand::rngs::StdRng;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

/// 首层形状推断时嵌套模型的拆层上限
const MAX_NESTED_DEPTH: usize = 16;

static SEQUENTIAL_UID: AtomicU64 = AtomicU64::new(0);

pub struct Sequential {
    graph: Graph,
    name: String,
    layers: Vec<LayerId>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    /// 容器自身的顶层合成节点（随 add/pop 更新，不进 arena）
    container_node: Option<Node>,
    model: Option<Model>,
    built: bool,
    trainable: bool,
}

impl Sequential {
    // ==================== 创建 ====================

    pub fn new(name: Option<&str>) -> Self {
        let name = name.map(str::to_string).unwrap_or_else(|| {
            format!("sequential_{}", SEQUENTIAL_UID.fetch_add(1, Ordering::Relaxed) + 1)
        });
        Self {
            graph: Graph::with_name(&name),
            name,
            layers: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            container_node: None,
            model: None,
            built: false,
            trainable: true,
        }
    }

    /// 创建带种子的容器（参数初始化可重复）
    pub fn new_with_seed(name: Option<&str>, seed: u64) -> Self {
        let mut sequential = Self::new(name);
        sequential.graph.inner_mut().set_seed(seed);
        sequential
    }

    /// 以给定层序列创建（逐个 add，全部校验照常生效）
    pub fn with_layers(
        layers: Vec<Box<dyn Layer>>,
        name: Option<&str>,
    ) -> Result<Self, GraphError> {
        let mut sequential = Self::new(name);
        for layer in layers {
            sequential.add(layer)?;
        }
        Ok(sequential)
    }

    /// 绑定到既有 arena 的空容器（克隆注入替换张量时使用）
    pub(in crate::nn) fn with_graph(graph: Graph, name: Option<&str>) -> Self {
        let mut sequential = Self::new(name);
        sequential.graph = graph;
        sequential
    }

    // ==================== 基础访问器 ====================

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layer_ids(&self) -> &[LayerId] {
        &self.layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    /// 顶层合成节点的只读视图
    pub fn container_node(&self) -> Option<&Node> {
        self.container_node.as_ref()
    }

    pub fn built(&self) -> bool {
        self.built
    }

    /// 惰性物化的内部 Model（未构建时为 None）
    pub fn inner_model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    // ==================== 堆叠操作 ====================

    /// 在栈顶追加一层
    ///
    /// 首层若未声明输入形状，按层（或嵌套模型逐层拆开后的首层）的
    /// 批形状合成一个占位输入并立即调用；此后每层消费前一层的单个
    /// 输出。失败的 add 不会在容器上留下任何可见状态。
    pub fn add(&mut self, layer: Box<dyn Layer>) -> Result<(), GraphError> {
        if self.outputs.is_empty() {
            self.add_first(layer)
        } else {
            self.add_subsequent(layer)
        }
    }

    fn add_first(&mut self, layer: Box<dyn Layer>) -> Result<(), GraphError> {
        if layer.is_input_layer() {
            let layer_id = self.graph.add_layer(layer)?;
            let outputs = self.graph.call_layer(layer_id, &[], None)?;
            return self.commit(layer_id, outputs);
        }

        // 先推断批输入形状（还没登记，失败不留痕）
        let (batch_shape, dtype) = if layer.is_model_container() {
            let nested = layer
                .as_any()
                .downcast_ref::<Sequential>()
                .ok_or_else(|| {
                    GraphError::TypeMismatch("未知的模型容器类型无法作为 Sequential 首层".into())
                })?;
            nested_leading_spec(nested)?
        } else {
            let shape = layer.batch_input_shape().ok_or_else(|| {
                GraphError::InvalidConfig(
                    "Sequential 的第一层必须声明 input_shape（批输入形状）".into(),
                )
            })?;
            (shape, layer.dtype())
        };

        let layer_id = self.graph.add_layer(layer)?;
        let result = (|| {
            let input_name = format!("{}_input", self.graph.layer_name(layer_id)?);
            let x = self
                .graph
                .input(&batch_shape, dtype, Some(&input_name))?;
            let specs = self.graph.peek_output_specs(layer_id, &[x])?;
            if specs.len() != 1 {
                return Err(GraphError::MultiOutputLayer);
            }
            self.graph.call_layer(layer_id, &[x], None)
        })();
        match result {
            Ok(outputs) => self.commit(layer_id, outputs),
            Err(e) => {
                self.rollback_first(layer_id);
                Err(e)
            }
        }
    }

    fn add_subsequent(&mut self, layer: Box<dyn Layer>) -> Result<(), GraphError> {
        let layer_id = self.graph.add_layer(layer)?;
        let x = self.outputs[0];
        let result = (|| {
            let specs = self.graph.peek_output_specs(layer_id, &[x])?;
            if specs.len() != 1 {
                return Err(GraphError::MultiOutputLayer);
            }
            self.graph.call_layer(layer_id, &[x], None)
        })();
        match result {
            Ok(outputs) => self.commit(layer_id, outputs),
            Err(e) => {
                self.graph.inner_mut().remove_layer(layer_id);
                Err(e)
            }
        }
    }

    /// add 成功后的状态更新：输出张量、顶层合成节点、层序列、失效标记
    fn commit(&mut self, layer_id: LayerId, outputs: Vec<TensorId>) -> Result<(), GraphError> {
        debug_assert_eq!(outputs.len(), 1);
        let shape = self.graph.tensor_spec(outputs[0])?.shape;
        self.outputs = outputs;
        if self.inputs.is_empty() {
            self.inputs = self.graph.source_inputs(self.outputs[0])?;
        }
        match &mut self.container_node {
            Some(node) => {
                node.output_tensors = self.outputs.clone();
                node.output_shapes = vec![shape];
            }
            None => {
                self.container_node = Some(Node::synthetic(
                    self.inputs.clone(),
                    self.outputs.clone(),
                    vec![shape],
                ));
            }
        }
        self.layers.push(layer_id);
        self.built = false;
        Ok(())
    }

    /// 首层失败回滚：层本体与可能已合成的占位输入一并移除
    fn rollback_first(&mut self, layer_id: LayerId) {
        let input_layer = {
            let inner = self.graph.inner();
            inner
                .layer(layer_id)
                .ok()
                .map(|slot| format!("{}_input", slot.layer.name()))
                .and_then(|name| inner.layer_id_by_name(&name))
        };
        let mut inner = self.graph.inner_mut();
        inner.remove_layer(layer_id);
        if let Some(id) = input_layer {
            inner.remove_layer(id);
        }
    }

    /// 弹出最后一层，从新的末层恢复输出张量与节点元数据
    pub fn pop(&mut self) -> Result<(), GraphError> {
        if self.layers.is_empty() {
            return Err(GraphError::EmptyModel);
        }
        self.layers.pop();
        if self.layers.is_empty() {
            self.inputs.clear();
            self.outputs.clear();
            self.container_node = None;
        } else {
            let last = *self.layers.last().unwrap();
            let (output, shape) = {
                let inner = self.graph.inner();
                let node = inner.layer(last)?.inbound_nodes.last().ok_or_else(|| {
                    GraphError::InternalError("Sequential 末层没有调用记录".into())
                })?;
                (node.output_tensors[0], node.output_shapes[0].clone())
            };
            self.outputs = vec![output];
            if let Some(node) = &mut self.container_node {
                node.output_tensors = self.outputs.clone();
                node.output_shapes = vec![shape];
            }
        }
        self.built = false;
        Ok(())
    }

    /// 克隆注入：以既有占位输入张量为起点（来源层计入层序列）
    pub(in crate::nn) fn seed_with_input_tensor(
        &mut self,
        tensor: TensorId,
    ) -> Result<(), GraphError> {
        let origin_layer = {
            let inner = self.graph.inner();
            let origin = inner.tensor(tensor)?.origin;
            if !inner.layer(origin.layer)?.layer.is_input_layer() {
                return Err(GraphError::UnsupportedOrigin(
                    "Sequential 克隆只接受来自占位输入层的张量作注入点，\
                     其他层的输出请改用函数式 API"
                        .into(),
                ));
            }
            origin.layer
        };
        let shape = self.graph.tensor_spec(tensor)?.shape;
        self.layers.push(origin_layer);
        self.inputs = vec![tensor];
        self.outputs = vec![tensor];
        self.container_node = Some(Node::synthetic(
            vec![tensor],
            vec![tensor],
            vec![shape],
        ));
        self.built = false;
        Ok(())
    }

    // ==================== 物化 ====================

    /// 物化内部 Model；已构建且未失效时为 no-op
    pub fn build(&mut self) -> Result<(), GraphError> {
        if self.built && self.model.is_some() {
            return Ok(());
        }
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(GraphError::InvalidConfig(
                "Sequential 模型为空，无法构建，请先添加层".into(),
            ));
        }
        let model = Model::new(
            self.graph.clone(),
            self.inputs.clone(),
            self.outputs.clone(),
            Some(&format!("{}_model", self.name)),
        )?;
        self.model = Some(model);
        self.built = true;
        Ok(())
    }

    fn ensure_built(&mut self) -> Result<&Model, GraphError> {
        self.build()?;
        Ok(self.model.as_ref().unwrap())
    }

    fn ensure_compiled(&mut self) -> Result<(), GraphError> {
        if !self.built || !self.model.as_ref().is_some_and(Model::is_compiled) {
            return Err(GraphError::NotCompiled);
        }
        Ok(())
    }

    /// 按名字（唯一）或拓扑序号检索层（先强制构建）
    pub fn get_layer(
        &mut self,
        name: Option<&str>,
        index: Option<usize>,
    ) -> Result<LayerId, GraphError> {
        self.ensure_built()?.get_layer(name, index)
    }

    // ==================== 执行与训练（对内部 Model 的薄委托） ====================

    pub fn predict(&mut self, x: &TensorData) -> Result<TensorData, GraphError> {
        let outputs = self.ensure_built()?.predict(&[x.clone()])?;
        Ok(outputs.into_iter().next().unwrap())
    }

    pub fn predict_on_batch(&mut self, x: &TensorData) -> Result<TensorData, GraphError> {
        self.predict(x)
    }

    /// 概率预测：输出不在 [0,1] 区间时记一条警告
    pub fn predict_proba(&mut self, x: &TensorData) -> Result<TensorData, GraphError> {
        let preds = self.predict(x)?;
        let min = preds.iter().copied().fold(f32::INFINITY, f32::min);
        let max = preds.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if min < 0.0 || max > 1.0 {
            log::warn!(
                "模型输出不是合法概率值，末层可能没有做归一化（如 softmax/sigmoid）"
            );
        }
        Ok(preds)
    }

    /// 类别预测：按最后一维 argmax（单列输出按 0.5 阈值）
    pub fn predict_classes(&mut self, x: &TensorData) -> Result<Vec<usize>, GraphError> {
        let preds = self.predict(x)?;
        let last_dim = preds.shape().last().copied().unwrap_or(1);
        if last_dim <= 1 {
            return Ok(preds.iter().map(|&p| usize::from(p > 0.5)).collect());
        }
        let rows = preds.len() / last_dim;
        let mut classes = Vec::with_capacity(rows);
        for row in 0..rows {
            let best = (0..last_dim)
                .max_by(|&a, &b| {
                    let va = preds.as_slice().map_or(0.0, |s| s[row * last_dim + a]);
                    let vb = preds.as_slice().map_or(0.0, |s| s[row * last_dim + b]);
                    va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(0);
            classes.push(best);
        }
        Ok(classes)
    }

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
        self.build()?;
        self.model.as_mut().unwrap().compile_full(
            optimizer,
            loss,
            metrics,
            sample_weight_mode,
            loss_weights,
        )
    }

    pub fn is_compiled(&self) -> bool {
        self.model.as_ref().is_some_and(Model::is_compiled)
    }

    pub fn training_state(&self) -> Option<&TrainingState> {
        self.model.as_ref().and_then(Model::training_state)
    }

    pub fn training_state_mut(&mut self) -> Option<&mut TrainingState> {
        self.model.as_mut().and_then(Model::training_state_mut)
    }

    pub fn make_train_function(&mut self) -> Result<(), GraphError> {
        self.ensure_compiled()?;
        self.model.as_mut().unwrap().make_train_function()
    }

    pub fn fit(
        &mut self,
        x: &TensorData,
        y: &TensorData,
        epochs: usize,
    ) -> Result<Vec<f32>, GraphError> {
        self.ensure_compiled()?;
        let model = self.model.as_mut().unwrap();
        let mut history = Vec::with_capacity(epochs);
        for _ in 0..epochs {
            history.push(model.train_on_batch(&[x.clone()], y)?);
        }
        Ok(history)
    }

    pub fn evaluate(&mut self, x: &TensorData, y: &TensorData) -> Result<f32, GraphError> {
        self.ensure_compiled()?;
        self.model.as_ref().unwrap().evaluate(&[x.clone()], y)
    }

    pub fn train_on_batch(&mut self, x: &TensorData, y: &TensorData) -> Result<f32, GraphError> {
        self.ensure_compiled()?;
        self.model.as_mut().unwrap().train_on_batch(&[x.clone()], y)
    }

    pub fn test_on_batch(&mut self, x: &TensorData, y: &TensorData) -> Result<f32, GraphError> {
        self.evaluate(x, y)
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

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    pub fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    pub fn trainable_weights(&self) -> Vec<(String, TensorData)> {
        if !self.trainable {
            return Vec::new();
        }
        let inner = self.graph.inner();
        self.layers
            .iter()
            .filter_map(|&id| inner.layer(id).ok())
            .filter(|slot| slot.layer.trainable())
            .flat_map(|slot| slot.layer.weights())
            .collect()
    }

    pub fn non_trainable_weights(&self) -> Vec<(String, TensorData)> {
        let inner = self.graph.inner();
        self.layers
            .iter()
            .filter_map(|&id| inner.layer(id).ok())
            .filter(|slot| !self.trainable || !slot.layer.trainable())
            .flat_map(|slot| slot.layer.weights())
            .collect()
    }

    // ==================== 配置导出/重建 ====================

    /// 导出为有序的 `{class_name, config}` 记录数组（插入顺序）
    pub fn get_config(&self) -> Value {
        let inner = self.graph.inner();
        let records: Vec<Value> = self
            .layers
            .iter()
            .filter_map(|&id| inner.layer(id).ok())
            .map(|slot| {
                serde_json::json!({
                    "class_name": slot.layer.class_name(),
                    "config": slot.layer.get_config(),
                })
            })
            .collect();
        Value::Array(records)
    }

    /// 逐条重放 add 重建容器：add 期的全部校验（首层输入、单输出
    /// 规则）在重建时原样生效，被手改坏的配置会在相同的位置失败
    pub fn from_config(
        config: &Value,
        custom_objects: Option<&CustomObjects>,
    ) -> Result<Self, GraphError> {
        let records = config.as_array().ok_or_else(|| {
            GraphError::TypeMismatch("Sequential 配置应为层记录数组".into())
        })?;
        let mut model = Self::new(None);
        for record in records {
            let layer = deserialize_layer(record, custom_objects)?;
            model.add(layer)?;
        }
        Ok(model)
    }

    /// 层概要表（先强制构建）
    pub fn summary(&mut self) -> Result<String, GraphError> {
        Ok(self.ensure_built()?.summary())
    }
}

/// 逐层拆开嵌套模型求首层批形状：显式迭代，嵌套深度有上限
fn nested_leading_spec(sequential: &Sequential) -> Result<(Shape, DType), GraphError> {
    let mut graph = sequential.graph.clone();
    let mut current = *sequential.layers.first().ok_or_else(|| {
        GraphError::InvalidConfig("不能把空模型添加进 Sequential".into())
    })?;
    for _ in 0..MAX_NESTED_DEPTH {
        enum Next {
            Deeper(Graph, LayerId),
            Leaf(Shape, DType),
        }
        let next = {
            let inner = graph.inner();
            let slot = inner.layer(current)?;
            if let Some(nested) = slot.layer.as_any().downcast_ref::<Sequential>() {
                let first = *nested.layers.first().ok_or_else(|| {
                    GraphError::InvalidConfig("不能把空模型添加进 Sequential".into())
                })?;
                Next::Deeper(nested.graph.clone(), first)
            } else {
                let shape = slot.layer.batch_input_shape().ok_or_else(|| {
                    GraphError::InvalidConfig(
                        "Sequential 的第一层必须声明 input_shape（批输入形状）".into(),
                    )
                })?;
                Next::Leaf(shape, slot.layer.dtype())
            }
        };
        match next {
            Next::Deeper(g, id) => {
                graph = g;
                current = id;
            }
            Next::Leaf(shape, dtype) => return Ok((shape, dtype)),
        }
    }
    Err(GraphError::InvalidConfig(format!(
        "嵌套模型深度超过上限（{MAX_NESTED_DEPTH}）"
    )))
}

// ========== Sequential 作为层（可嵌套进其他容器） ==========

impl Layer for Sequential {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn class_name(&self) -> &'static str {
        "Sequential"
    }

    fn batch_input_shape(&self) -> Option<Shape> {
        if let Some(&input) = self.inputs.first() {
            return self.graph.tensor_spec(input).ok().map(|spec| spec.shape);
        }
        nested_leading_spec(self).ok().map(|(shape, _)| shape)
    }

    fn dtype(&self) -> DType {
        self.inputs
            .first()
            .and_then(|&input| self.graph.tensor_spec(input).ok())
            .map_or(DType::F32, |spec| spec.dtype)
    }

    fn built(&self) -> bool {
        let inner = self.graph.inner();
        !self.layers.is_empty()
            && self
                .layers
                .iter()
                .all(|&id| inner.layer(id).map(|slot| slot.layer.built()).unwrap_or(false))
    }

    fn build(&mut self, input_specs: &[TensorSpec], _rng: &mut StdRng) -> Result<(), GraphError> {
        // 内部层在 add 期已各自构建；这里只校验输入数
        if input_specs.len() != 1 {
            return Err(GraphError::TensorCountMismatch {
                expected: 1,
                got: input_specs.len(),
            });
        }
        Ok(())
    }

    fn compute_output_specs(
        &self,
        input_specs: &[TensorSpec],
    ) -> Result<Vec<TensorSpec>, GraphError> {
        if input_specs.len() != 1 {
            return Err(GraphError::TensorCountMismatch {
                expected: 1,
                got: input_specs.len(),
            });
        }
        let inner = self.graph.inner();
        let mut spec = input_specs[0].clone();
        for &id in &self.layers {
            let slot = inner.layer(id)?;
            if slot.layer.is_input_layer() {
                continue;
            }
            spec = slot
                .layer
                .compute_output_specs(std::slice::from_ref(&spec))?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    GraphError::InternalError("Sequential 内部层没有输出规格".into())
                })?;
        }
        Ok(vec![spec])
    }

    fn call(
        &self,
        inputs: &[TensorData],
        arguments: &CallArgs,
    ) -> Result<Vec<TensorData>, GraphError> {
        if inputs.len() != 1 {
            return Err(GraphError::TensorCountMismatch {
                expected: 1,
                got: inputs.len(),
            });
        }
        let inner = self.graph.inner();
        let mut current = inputs[0].clone();
        for &id in &self.layers {
            let slot = inner.layer(id)?;
            if slot.layer.is_input_layer() {
                continue;
            }
            current = slot
                .layer
                .call(std::slice::from_ref(&current), arguments)?
                .into_iter()
                .next()
                .ok_or_else(|| GraphError::InternalError("Sequential 内部层没有输出".into()))?;
        }
        Ok(vec![current])
    }

    fn compute_mask(&self, input_masks: &[Option<Mask>]) -> Vec<Option<Mask>> {
        input_masks.to_vec()
    }

    fn get_config(&self) -> Value {
        Sequential::get_config(self)
    }

    fn fresh_clone(&self) -> Result<Box<dyn Layer>, GraphError> {
        Ok(Box::new(Sequential::from_config(
            &Sequential::get_config(self),
            None,
        )?))
    }

    fn weights(&self) -> Vec<(String, TensorData)> {
        let inner = self.graph.inner();
        self.layers
            .iter()
            .filter_map(|&id| inner.layer(id).ok())
            .flat_map(|slot| slot.layer.weights())
            .collect()
    }

    fn set_weights(&mut self, values: &[TensorData]) -> Result<(), GraphError> {
        Sequential::set_weights(self, values)
    }

    fn trainable(&self) -> bool {
        self.trainable
    }

    fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    fn is_model_container(&self) -> bool {
        true
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
