/*
 * @Author       : 老董
 * @Date         : 2026-02-13
 * @Description  : Dense (全连接) 层
 *
 * `output = x @ kernel + bias`，可选内置激活。
 *
 * # 输入/输出形状
 * - 输入：[batch_size, in_features]
 * - 输出：[batch_size, units]
 */

use super::activation::{apply_activation, is_known_activation};
use super::Layer;
use crate::nn::error::GraphError;
use crate::nn::types::{CallArgs, Init, Shape, TensorData, TensorSpec};
use ndarray::{Ix1, Ix2};
use rand::rngs::StdRng;
use serde_json::{Value, json};

pub struct Dense {
    name: String,
    units: usize,
    /// 内置激活名（None 即线性输出）
    activation: Option<String>,
    use_bias: bool,
    kernel_initializer: Init,
    /// 声明的批输入形状（作为 Sequential 首层时需要）
    batch_input_shape: Option<Shape>,
    trainable: bool,
    /// 权重 [in_features, units]
    kernel: Option<TensorData>,
    /// 偏置 [units]
    bias: Option<TensorData>,
}

impl Dense {
    pub fn new(units: usize) -> Self {
        Self {
            name: String::new(),
            units,
            activation: None,
            use_bias: true,
            kernel_initializer: Init::GlorotUniform,
            batch_input_shape: None,
            trainable: true,
            kernel: None,
            bias: None,
        }
    }

    pub fn with_activation(mut self, activation: &str) -> Result<Self, GraphError> {
        if !is_known_activation(activation) {
            return Err(GraphError::UnknownIdentifier(format!(
                "未知的激活函数名：{activation}"
            )));
        }
        self.activation = Some(activation.to_string());
        Ok(self)
    }

    /// 声明输入特征形状，如 `with_input_shape(&[784])` 即 [None, 784]
    pub fn with_input_shape(mut self, feature_dims: &[usize]) -> Self {
        self.batch_input_shape = Some(Shape::with_batch(feature_dims));
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_initializer(mut self, init: Init) -> Self {
        self.kernel_initializer = init;
        self
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn from_config(config: &Value) -> Result<Self, GraphError> {
        let units = config
            .get("units")
            .and_then(Value::as_u64)
            .ok_or_else(|| GraphError::InvalidConfig("Dense 配置缺少 units".into()))?;
        let mut layer = Self::new(units as usize);
        if let Some(name) = config.get("name").and_then(Value::as_str) {
            layer.name = name.to_string();
        }
        if let Some(act) = config.get("activation").and_then(Value::as_str) {
            layer = layer.with_activation(act)?;
        }
        if let Some(use_bias) = config.get("use_bias").and_then(Value::as_bool) {
            layer.use_bias = use_bias;
        }
        if let Some(init_name) = config.get("kernel_initializer").and_then(Value::as_str) {
            layer.kernel_initializer = Init::from_name(init_name).ok_or_else(|| {
                GraphError::InvalidConfig(format!("未知的初始化方式：{init_name}"))
            })?;
        }
        if let Some(shape) = config.get("batch_input_shape").filter(|v| !v.is_null()) {
            layer.batch_input_shape = Some(serde_json::from_value(shape.clone())?);
        }
        Ok(layer)
    }
}

impl Layer for Dense {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn class_name(&self) -> &'static str {
        "Dense"
    }

    fn batch_input_shape(&self) -> Option<Shape> {
        self.batch_input_shape.clone()
    }

    fn built(&self) -> bool {
        self.kernel.is_some()
    }

    fn build(&mut self, input_specs: &[TensorSpec], rng: &mut StdRng) -> Result<(), GraphError> {
        if input_specs.len() != 1 {
            return Err(GraphError::TensorCountMismatch {
                expected: 1,
                got: input_specs.len(),
            });
        }
        let in_features = input_specs[0].shape.last_dim().ok_or_else(|| {
            GraphError::InvalidConfig(format!(
                "Dense 层`{}`的输入最后一维必须是定长，实得{}",
                self.name, input_specs[0].shape
            ))
        })?;
        self.kernel = Some(
            self.kernel_initializer
                .generate_with_rng(&[in_features, self.units], rng),
        );
        if self.use_bias {
            self.bias = Some(Init::Zeros.generate_with_rng(&[self.units], rng));
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
        let mut dims = input_specs[0].shape.dims().to_vec();
        if dims.is_empty() {
            return Err(GraphError::InvalidConfig(format!(
                "Dense 层`{}`的输入不能是零维",
                self.name
            )));
        }
        *dims.last_mut().unwrap() = Some(self.units);
        Ok(vec![TensorSpec::dense(
            Shape::new(dims),
            input_specs[0].dtype,
        )])
    }

    fn call(
        &self,
        inputs: &[TensorData],
        _arguments: &CallArgs,
    ) -> Result<Vec<TensorData>, GraphError> {
        if inputs.len() != 1 {
            return Err(GraphError::TensorCountMismatch {
                expected: 1,
                got: inputs.len(),
            });
        }
        let kernel = self
            .kernel
            .as_ref()
            .ok_or_else(|| GraphError::InvalidOperation(format!("Dense 层`{}`尚未构建", self.name)))?;
        let x = inputs[0]
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| GraphError::InvalidOperation("Dense 目前只支持二维输入".into()))?;
        let k = kernel
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| GraphError::InternalError("Dense 核权重不是二维".into()))?;
        let mut out = x.dot(&k);
        if let Some(bias) = &self.bias {
            let b = bias
                .view()
                .into_dimensionality::<Ix1>()
                .map_err(|_| GraphError::InternalError("Dense 偏置不是一维".into()))?;
            out = out + &b;
        }
        let mut out = out.into_dyn();
        if let Some(act) = &self.activation {
            out = apply_activation(act, out)?;
        }
        Ok(vec![out])
    }

    fn get_config(&self) -> Value {
        json!({
            "name": self.name,
            "units": self.units,
            "activation": self.activation,
            "use_bias": self.use_bias,
            "kernel_initializer": self.kernel_initializer.as_str(),
            "batch_input_shape": self
                .batch_input_shape
                .as_ref()
                .and_then(|s| serde_json::to_value(s).ok()),
        })
    }

    fn fresh_clone(&self) -> Result<Box<dyn Layer>, GraphError> {
        Ok(Box::new(Self::from_config(&self.get_config())?))
    }

    fn weights(&self) -> Vec<(String, TensorData)> {
        let mut all = Vec::new();
        if let Some(kernel) = &self.kernel {
            all.push((format!("{}/kernel", self.name), kernel.clone()));
        }
        if let Some(bias) = &self.bias {
            all.push((format!("{}/bias", self.name), bias.clone()));
        }
        all
    }

    fn set_weights(&mut self, values: &[TensorData]) -> Result<(), GraphError> {
        let expected = usize::from(self.kernel.is_some()) + usize::from(self.bias.is_some());
        if values.len() != expected {
            return Err(GraphError::TensorCountMismatch {
                expected,
                got: values.len(),
            });
        }
        let mut iter = values.iter();
        if let Some(kernel) = &mut self.kernel {
            let value = iter.next().unwrap();
            if value.shape() != kernel.shape() {
                return Err(GraphError::ShapeMismatch {
                    expected: format!("{:?}", kernel.shape()),
                    got: value.shape().to_vec(),
                    message: format!("Dense 层`{}`的 kernel", self.name),
                });
            }
            *kernel = value.clone();
        }
        if let Some(bias) = &mut self.bias {
            let value = iter.next().unwrap();
            if value.shape() != bias.shape() {
                return Err(GraphError::ShapeMismatch {
                    expected: format!("{:?}", bias.shape()),
                    got: value.shape().to_vec(),
                    message: format!("Dense 层`{}`的 bias", self.name),
                });
            }
            *bias = value.clone();
        }
        Ok(())
    }

    fn trainable(&self) -> bool {
        self.trainable
    }

    fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
