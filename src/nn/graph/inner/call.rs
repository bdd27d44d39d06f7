/*
 * @Author       : 老董
 * @Date         : 2026-02-12
 * @Description  : GraphInner 层调用：构建、输出规格推断、节点与张量登记
 */

use super::GraphInner;
use crate::nn::error::GraphError;
use crate::nn::graph::node::Node;
use crate::nn::types::{CallArgs, LayerId, TensorId, TensorOrigin, TensorSpec};
use rand::SeedableRng;
use rand::rngs::StdRng;

impl GraphInner {
    /// 推断一次调用的输出规格，但不登记节点/张量。
    ///
    /// 层若未构建会先按输入规格构建（权重就位）；Sequential 用它在
    /// 改动任何容器状态之前校验单输出规则。
    pub fn peek_output_specs(
        &mut self,
        layer_id: LayerId,
        inputs: &[TensorId],
    ) -> Result<Vec<TensorSpec>, GraphError> {
        let input_specs = self.gather_specs(inputs)?;
        self.build_and_infer(layer_id, &input_specs)
    }

    /// 调用一个层：构建（如需）、推断输出规格、登记输出张量与 Node
    ///
    /// 返回输出张量句柄列表。输入张量的来路坐标一并写进 Node，
    /// 供深度遍历与克隆引擎回放。
    pub fn call_layer(
        &mut self,
        layer_id: LayerId,
        inputs: &[TensorId],
        arguments: Option<CallArgs>,
    ) -> Result<Vec<TensorId>, GraphError> {
        let input_specs = self.gather_specs(inputs)?;
        let input_origins: Vec<TensorOrigin> = {
            let mut origins = Vec::with_capacity(inputs.len());
            for &id in inputs {
                origins.push(self.tensor(id)?.origin);
            }
            origins
        };

        let out_specs = self.build_and_infer(layer_id, &input_specs)?;
        let (layer_name, node_index) = {
            let slot = self.layer(layer_id)?;
            (slot.layer.name().to_string(), slot.inbound_nodes.len())
        };

        // 登记输出张量
        let mut output_tensors = Vec::with_capacity(out_specs.len());
        let mut output_shapes = Vec::with_capacity(out_specs.len());
        for (i, spec) in out_specs.into_iter().enumerate() {
            let tensor_name = format!("{layer_name}/{node_index}:{i}");
            output_shapes.push(spec.shape.clone());
            let id = self.new_tensor(
                tensor_name,
                spec,
                TensorOrigin {
                    layer: layer_id,
                    node_index,
                    tensor_index: i,
                },
            );
            output_tensors.push(id);
        }

        // 登记 Node
        let node = Node {
            inbound_layers: input_origins.iter().map(|o| o.layer).collect(),
            node_indices: input_origins.iter().map(|o| o.node_index).collect(),
            tensor_indices: input_origins.iter().map(|o| o.tensor_index).collect(),
            input_tensors: inputs.to_vec(),
            output_tensors: output_tensors.clone(),
            output_shapes,
            arguments,
        };
        self.layer_mut(layer_id)?.inbound_nodes.push(node);

        Ok(output_tensors)
    }

    // ========== 内部 ==========

    fn gather_specs(&self, inputs: &[TensorId]) -> Result<Vec<TensorSpec>, GraphError> {
        inputs
            .iter()
            .map(|&id| self.tensor(id).map(|meta| meta.spec.clone()))
            .collect()
    }

    /// 构建（如需）并推断输出规格；种子 rng 与层槽是不相交的字段借用
    fn build_and_infer(
        &mut self,
        layer_id: LayerId,
        input_specs: &[TensorSpec],
    ) -> Result<Vec<TensorSpec>, GraphError> {
        let slot = self
            .layers
            .get_mut(&layer_id)
            .ok_or(GraphError::LayerNotFound(layer_id))?;
        if !slot.layer.built() {
            match self.rng.as_mut() {
                Some(rng) => slot.layer.build(input_specs, rng)?,
                None => {
                    let mut rng = StdRng::from_entropy();
                    slot.layer.build(input_specs, &mut rng)?;
                }
            }
        }
        slot.layer.compute_output_specs(input_specs)
    }
}
