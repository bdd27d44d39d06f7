/*
 * @Author       : 老董
 * @Date         : 2026-02-15
 * @Description  : Adam 优化器
 */

use super::Optimizer;
use super::base::{iterations_tensor, restore_slots};
use crate::nn::error::GraphError;
use crate::nn::types::TensorData;
use serde_json::{Value, json};

/// Adam 优化器：每个参数一对 m/v 槽
pub struct Adam {
    learning_rate: f32,
    beta_1: f32,
    beta_2: f32,
    epsilon: f32,
    iterations: u64,
    /// m/v 槽，顺序为 [p1/m, p2/m, ..., p1/v, p2/v, ...]
    slots: Vec<(String, TensorData)>,
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-7,
            iterations: 0,
            slots: Vec::new(),
        }
    }

    pub fn with_betas(mut self, beta_1: f32, beta_2: f32) -> Self {
        self.beta_1 = beta_1;
        self.beta_2 = beta_2;
        self
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn from_config(config: &Value) -> Result<Self, GraphError> {
        let learning_rate = config
            .get("learning_rate")
            .and_then(Value::as_f64)
            .ok_or_else(|| GraphError::InvalidConfig("Adam 配置缺少 learning_rate".into()))?;
        let mut optimizer = Self::new(learning_rate as f32);
        if let Some(beta_1) = config.get("beta_1").and_then(Value::as_f64) {
            optimizer.beta_1 = beta_1 as f32;
        }
        if let Some(beta_2) = config.get("beta_2").and_then(Value::as_f64) {
            optimizer.beta_2 = beta_2 as f32;
        }
        if let Some(epsilon) = config.get("epsilon").and_then(Value::as_f64) {
            optimizer.epsilon = epsilon as f32;
        }
        Ok(optimizer)
    }
}

impl Optimizer for Adam {
    fn class_name(&self) -> &'static str {
        "Adam"
    }

    fn get_config(&self) -> Value {
        json!({
            "learning_rate": self.learning_rate,
            "beta_1": self.beta_1,
            "beta_2": self.beta_2,
            "epsilon": self.epsilon,
        })
    }

    fn build(&mut self, params: &[(String, Vec<usize>)]) -> Result<(), GraphError> {
        self.slots.clear();
        for (name, dims) in params {
            self.slots.push((
                format!("{name}/m"),
                ndarray::ArrayD::zeros(ndarray::IxDyn(dims)),
            ));
        }
        for (name, dims) in params {
            self.slots.push((
                format!("{name}/v"),
                ndarray::ArrayD::zeros(ndarray::IxDyn(dims)),
            ));
        }
        Ok(())
    }

    fn weights(&self) -> Vec<(String, TensorData)> {
        let mut all = vec![("iterations".to_string(), iterations_tensor(self.iterations))];
        all.extend(self.slots.iter().cloned());
        all
    }

    fn set_weights(&mut self, values: &[(String, TensorData)]) -> Result<(), GraphError> {
        restore_slots("Adam", &mut self.iterations, &mut self.slots, values)
    }

    fn step(&mut self) {
        self.iterations += 1;
    }

    fn iterations(&self) -> u64 {
        self.iterations
    }
}
