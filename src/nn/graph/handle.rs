/*
 * @Author       : 老董
 * @Date         : 2026-02-12
 * @Description  : Graph 句柄（用户级 API）
 */

use super::inner::GraphInner;
use crate::nn::error::GraphError;
use crate::nn::layer::{InputLayer, Layer};
use crate::nn::types::{CallArgs, DType, LayerId, Shape, TensorData, TensorId, TensorSpec};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Graph - 层图 arena 句柄
///
/// # 设计原则
/// - 是 `Rc<RefCell<GraphInner>>` 的薄封装
/// - Clone 语义：多个 Graph 引用同一个 GraphInner
/// - 同一实例不支持并发修改，调用方须自行串行化访问
#[derive(Clone)]
pub struct Graph {
    inner: Rc<RefCell<GraphInner>>,
}

impl Graph {
    // ==================== 创建 ====================

    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(GraphInner::new())),
        }
    }

    pub fn with_name(name: &str) -> Self {
        Self {
            inner: Rc::new(RefCell::new(GraphInner::with_name(name))),
        }
    }

    /// 创建带种子的图（用于确定性的参数初始化）
    pub fn new_with_seed(seed: u64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(GraphInner::new_with_seed(seed))),
        }
    }

    pub fn from_inner(inner: GraphInner) -> Self {
        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    pub fn inner(&self) -> Ref<'_, GraphInner> {
        self.inner.borrow()
    }

    pub fn inner_mut(&self) -> RefMut<'_, GraphInner> {
        self.inner.borrow_mut()
    }

    /// 两个句柄是否指向同一个 arena
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ==================== 登记与输入 ====================

    /// 登记一个层（自动命名/查重见 GraphInner::register_layer）
    pub fn add_layer(&self, layer: Box<dyn Layer>) -> Result<LayerId, GraphError> {
        self.inner.borrow_mut().register_layer(layer)
    }

    /// 合成一个占位输入：输入层 + 它的节点 + 占位张量
    pub fn input(
        &self,
        shape: &Shape,
        dtype: DType,
        name: Option<&str>,
    ) -> Result<TensorId, GraphError> {
        self.input_with_spec(TensorSpec::dense(shape.clone(), dtype), name)
    }

    /// 按完整规格（含稀疏标记）合成占位输入
    pub fn input_with_spec(
        &self,
        spec: TensorSpec,
        name: Option<&str>,
    ) -> Result<TensorId, GraphError> {
        let layer = InputLayer::new(spec, name);
        let mut g = self.inner.borrow_mut();
        let layer_id = g.register_layer(Box::new(layer))?;
        let outputs = g.call_layer(layer_id, &[], None)?;
        Ok(outputs[0])
    }

    /// 包装一个具体数组为输入（克隆注入原始数值时使用）
    pub fn input_wrapping(
        &self,
        value: TensorData,
        name: Option<&str>,
    ) -> Result<TensorId, GraphError> {
        let layer = InputLayer::wrapping(value, name);
        let mut g = self.inner.borrow_mut();
        let layer_id = g.register_layer(Box::new(layer))?;
        let outputs = g.call_layer(layer_id, &[], None)?;
        Ok(outputs[0])
    }

    // ==================== 调用 ====================

    pub fn call_layer(
        &self,
        layer: LayerId,
        inputs: &[TensorId],
        arguments: Option<CallArgs>,
    ) -> Result<Vec<TensorId>, GraphError> {
        self.inner.borrow_mut().call_layer(layer, inputs, arguments)
    }

    pub fn peek_output_specs(
        &self,
        layer: LayerId,
        inputs: &[TensorId],
    ) -> Result<Vec<TensorSpec>, GraphError> {
        self.inner.borrow_mut().peek_output_specs(layer, inputs)
    }

    // ==================== 访问 ====================

    pub fn layer_name(&self, id: LayerId) -> Result<String, GraphError> {
        Ok(self.inner.borrow().layer_name(id)?.to_string())
    }

    pub fn tensor_spec(&self, id: TensorId) -> Result<TensorSpec, GraphError> {
        Ok(self.inner.borrow().tensor(id)?.spec.clone())
    }

    pub fn contains_tensor(&self, id: TensorId) -> bool {
        self.inner.borrow().contains_tensor(id)
    }

    /// 张量的来源层是否为输入层
    pub fn tensor_from_input_layer(&self, id: TensorId) -> Result<bool, GraphError> {
        self.inner.borrow().tensor_from_input_layer(id)
    }

    pub fn source_inputs(&self, id: TensorId) -> Result<Vec<TensorId>, GraphError> {
        self.inner.borrow().source_inputs(id)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
