/*
 * @Author       : 老董
 * @Date         : 2026-02-13
 * @Description  : Layer 契约与参考层实现
 *
 * 层是多态黑盒：容器只依赖本 trait 的能力（构建、形状推断、调用、
 * 掩码、配置导出、按配置重实例化、具名权重）。真正的"层动物园"
 * 属于外部协作者，这里只提供让容器可被实际使用与测试的参考实现。
 */

mod activation;
mod dense;
mod input;
mod registry;

pub use activation::Activation;
pub use dense::Dense;
pub use input::InputLayer;
pub use registry::{CustomObjects, LayerCtor, deserialize_layer};

use crate::nn::error::GraphError;
use crate::nn::types::{CallArgs, DType, Mask, Shape, TensorData, TensorSpec};
use rand::rngs::StdRng;

/// 层：具名、可配置、持有自身参数的变换单元
///
/// 身份按登记发放的句柄（`LayerId`）认定；两个配置相同的实例
/// 也永远不是同一个层。
pub trait Layer {
    // ==================== 标识 ====================

    fn name(&self) -> &str;
    fn set_name(&mut self, name: &str);
    fn class_name(&self) -> &'static str;

    // ==================== 形状与构建 ====================

    /// 层声明的批输入形状（含 batch 维）。只有声明过 input_shape 的层
    /// （或能递归推出首层形状的嵌套模型）返回 Some
    fn batch_input_shape(&self) -> Option<Shape> {
        None
    }

    fn dtype(&self) -> DType {
        DType::F32
    }

    fn built(&self) -> bool;

    /// 按输入规格创建权重；rng 来自所属图（可带种子）
    fn build(&mut self, input_specs: &[TensorSpec], rng: &mut StdRng) -> Result<(), GraphError>;

    /// 由输入规格推断输出规格；在节点登记之前调用
    fn compute_output_specs(
        &self,
        input_specs: &[TensorSpec],
    ) -> Result<Vec<TensorSpec>, GraphError>;

    // ==================== 执行 ====================

    fn call(
        &self,
        inputs: &[TensorData],
        arguments: &CallArgs,
    ) -> Result<Vec<TensorData>, GraphError>;

    /// 计算输出掩码；默认原样传递输入掩码
    fn compute_mask(&self, input_masks: &[Option<Mask>]) -> Vec<Option<Mask>> {
        input_masks.to_vec()
    }

    // ==================== 配置与克隆 ====================

    /// 导出配置（与注册表里的构造函数对偶）
    fn get_config(&self) -> serde_json::Value;

    /// 依据自身配置重新实例化（同超参数、全新权重）
    fn fresh_clone(&self) -> Result<Box<dyn Layer>, GraphError>;

    // ==================== 权重 ====================

    /// 具名权重，顺序稳定（kernel 在前，bias 在后）
    fn weights(&self) -> Vec<(String, TensorData)> {
        Vec::new()
    }

    /// 按 `weights()` 的顺序恢复权重值
    fn set_weights(&mut self, values: &[TensorData]) -> Result<(), GraphError> {
        if values.is_empty() {
            Ok(())
        } else {
            Err(GraphError::InvalidOperation(format!(
                "层`{}`没有权重可设置",
                self.name()
            )))
        }
    }

    fn trainable(&self) -> bool {
        true
    }

    fn set_trainable(&mut self, _trainable: bool) {}

    // ==================== 种类判定 ====================

    fn is_input_layer(&self) -> bool {
        false
    }

    /// 是否为模型容器（嵌套形状推断需要逐层拆开）
    fn is_model_container(&self) -> bool {
        false
    }

    /// 输入层的稀疏标记（克隆镜像占位输入时使用）
    fn sparse(&self) -> bool {
        false
    }

    fn as_any(&self) -> &dyn std::any::Any;
}
