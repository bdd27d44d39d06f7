/*
 * @Author       : 老董
 * @Date         : 2026-02-12
 * @Description  : GraphInner 基础操作：登记、命名、访问、来源回溯
 */

use super::{GraphInner, LayerSlot};
use crate::nn::error::GraphError;
use crate::nn::graph::node::Node;
use crate::nn::layer::Layer;
use crate::nn::types::{LayerId, TensorId, TensorMeta, TensorOrigin, TensorSpec};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;

impl GraphInner {
    // ========== 创建 ==========

    pub fn new() -> Self {
        Self::with_name("default_graph")
    }

    pub fn with_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            layers: HashMap::new(),
            tensors: HashMap::new(),
            next_layer_id: 0,
            next_tensor_id: 0,
            name_uids: HashMap::new(),
            rng: None,
        }
    }

    /// 创建一个带固定种子的图（参数初始化可重复）
    pub fn new_with_seed(seed: u64) -> Self {
        let mut graph = Self::new();
        graph.rng = Some(StdRng::seed_from_u64(seed));
        graph
    }

    /// 设置/重置图的随机种子
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = Some(StdRng::seed_from_u64(seed));
    }

    pub const fn has_seed(&self) -> bool {
        self.rng.is_some()
    }

    // ========== 基础访问器 ==========

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layers_count(&self) -> usize {
        self.layers.len()
    }

    pub fn tensors_count(&self) -> usize {
        self.tensors.len()
    }

    pub fn layer(&self, id: LayerId) -> Result<&LayerSlot, GraphError> {
        self.layers.get(&id).ok_or(GraphError::LayerNotFound(id))
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Result<&mut LayerSlot, GraphError> {
        self.layers
            .get_mut(&id)
            .ok_or(GraphError::LayerNotFound(id))
    }

    pub fn layer_name(&self, id: LayerId) -> Result<&str, GraphError> {
        Ok(self.layer(id)?.layer.name())
    }

    /// 按层名查找（图内层名唯一）
    pub fn layer_id_by_name(&self, name: &str) -> Option<LayerId> {
        self.layers
            .iter()
            .find(|(_, slot)| slot.layer.name() == name)
            .map(|(&id, _)| id)
    }

    pub fn tensor(&self, id: TensorId) -> Result<&TensorMeta, GraphError> {
        self.tensors.get(&id).ok_or(GraphError::TensorNotFound(id))
    }

    pub fn contains_tensor(&self, id: TensorId) -> bool {
        self.tensors.contains_key(&id)
    }

    pub fn node(&self, layer: LayerId, node_index: usize) -> Result<&Node, GraphError> {
        self.layer(layer)?.inbound_nodes.get(node_index).ok_or_else(|| {
            GraphError::InternalError(format!("层{layer:?}上不存在节点序号{node_index}"))
        })
    }

    /// 张量的来源层是否为输入层
    pub fn tensor_from_input_layer(&self, id: TensorId) -> Result<bool, GraphError> {
        let origin = self.tensor(id)?.origin;
        Ok(self.layer(origin.layer)?.layer.is_input_layer())
    }

    // ========== 登记与命名 ==========

    /// 登记一个层：空名自动发放 `{类名小写}_{n}`，显式重名拒绝
    pub fn register_layer(&mut self, mut layer: Box<dyn Layer>) -> Result<LayerId, GraphError> {
        if layer.name().is_empty() {
            let name = self.generate_layer_name(layer.class_name());
            layer.set_name(&name);
        } else {
            self.check_duplicate_layer_name(layer.name())?;
        }
        self.next_layer_id += 1;
        let id = LayerId(self.next_layer_id);
        self.layers.insert(
            id,
            LayerSlot {
                layer,
                inbound_nodes: Vec::new(),
            },
        );
        Ok(id)
    }

    /// 移除层与它名下产出的全部张量（仅用于失败回滚）
    pub(in crate::nn) fn remove_layer(&mut self, id: LayerId) {
        self.layers.remove(&id);
        self.tensors.retain(|_, meta| meta.origin.layer != id);
    }

    pub(in crate::nn) fn check_duplicate_layer_name(&self, name: &str) -> Result<(), GraphError> {
        if self.layers.values().any(|slot| slot.layer.name() == name) {
            return Err(GraphError::DuplicateLayerName(name.to_string()));
        }
        Ok(())
    }

    pub(in crate::nn) fn generate_layer_name(&mut self, class_name: &str) -> String {
        let prefix = class_name.to_lowercase();
        loop {
            let counter = self.name_uids.entry(prefix.clone()).or_insert(0);
            *counter += 1;
            let name = format!("{prefix}_{counter}");
            if self.check_duplicate_layer_name(&name).is_ok() {
                return name;
            }
        }
    }

    pub(in crate::nn) fn new_tensor(
        &mut self,
        name: String,
        spec: TensorSpec,
        origin: TensorOrigin,
    ) -> TensorId {
        self.next_tensor_id += 1;
        let id = TensorId(self.next_tensor_id);
        self.tensors.insert(id, TensorMeta { name, spec, origin });
        id
    }

    // ========== 来源回溯 ==========

    /// 回溯张量的源头占位输入（去重，保持发现顺序）
    pub fn source_inputs(&self, tensor: TensorId) -> Result<Vec<TensorId>, GraphError> {
        let mut sources = Vec::new();
        self.collect_source_inputs(tensor, &mut sources)?;
        Ok(sources)
    }

    fn collect_source_inputs(
        &self,
        tensor: TensorId,
        sources: &mut Vec<TensorId>,
    ) -> Result<(), GraphError> {
        let origin = self.tensor(tensor)?.origin;
        let node = self.node(origin.layer, origin.node_index)?;
        if node.input_tensors.is_empty() {
            if !sources.contains(&tensor) {
                sources.push(tensor);
            }
            return Ok(());
        }
        for &input in &node.input_tensors {
            self.collect_source_inputs(input, sources)?;
        }
        Ok(())
    }
}
