/*
 * @Author       : 老董
 * @Date         : 2026-02-15
 * @Description  : SGD (随机梯度下降) 优化器
 */

use super::Optimizer;
use super::base::{iterations_tensor, restore_slots};
use crate::nn::error::GraphError;
use crate::nn::types::TensorData;
use serde_json::{Value, json};

/// SGD 优化器：可选动量槽
pub struct SGD {
    learning_rate: f32,
    momentum: f32,
    nesterov: bool,
    iterations: u64,
    /// 动量缓冲（momentum > 0 时每个参数一个）
    slots: Vec<(String, TensorData)>,
}

impl SGD {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            momentum: 0.0,
            nesterov: false,
            iterations: 0,
            slots: Vec::new(),
        }
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_nesterov(mut self, nesterov: bool) -> Self {
        self.nesterov = nesterov;
        self
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn from_config(config: &Value) -> Result<Self, GraphError> {
        let learning_rate = config
            .get("learning_rate")
            .and_then(Value::as_f64)
            .ok_or_else(|| GraphError::InvalidConfig("SGD 配置缺少 learning_rate".into()))?;
        let mut optimizer = Self::new(learning_rate as f32);
        if let Some(momentum) = config.get("momentum").and_then(Value::as_f64) {
            optimizer.momentum = momentum as f32;
        }
        if let Some(nesterov) = config.get("nesterov").and_then(Value::as_bool) {
            optimizer.nesterov = nesterov;
        }
        Ok(optimizer)
    }
}

impl Optimizer for SGD {
    fn class_name(&self) -> &'static str {
        "SGD"
    }

    fn get_config(&self) -> Value {
        json!({
            "learning_rate": self.learning_rate,
            "momentum": self.momentum,
            "nesterov": self.nesterov,
        })
    }

    fn build(&mut self, params: &[(String, Vec<usize>)]) -> Result<(), GraphError> {
        self.slots.clear();
        if self.momentum > 0.0 {
            for (name, dims) in params {
                self.slots.push((
                    format!("{name}/momentum"),
                    ndarray::ArrayD::zeros(ndarray::IxDyn(dims)),
                ));
            }
        }
        Ok(())
    }

    fn weights(&self) -> Vec<(String, TensorData)> {
        let mut all = vec![("iterations".to_string(), iterations_tensor(self.iterations))];
        all.extend(self.slots.iter().cloned());
        all
    }

    fn set_weights(&mut self, values: &[(String, TensorData)]) -> Result<(), GraphError> {
        restore_slots("SGD", &mut self.iterations, &mut self.slots, values)
    }

    fn step(&mut self) {
        self.iterations += 1;
    }

    fn iterations(&self) -> u64 {
        self.iterations
    }
}
