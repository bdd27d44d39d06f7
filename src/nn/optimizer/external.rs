/*
 * @Author       : 老董
 * @Date         : 2026-02-15
 * @Description  : 外部委托优化器包装
 *
 * 包装由外部执行后端管理的优化器：实例化后无法内省其属性与状态，
 * 因此存档网关遇到它只会记一条警告并跳过训练配置区。
 */

use super::Optimizer;
use crate::nn::error::GraphError;
use crate::nn::types::TensorData;
use serde_json::{Value, json};

pub struct ExternalOptimizer {
    /// 外部后端里的标识（仅用于日志）
    label: String,
    iterations: u64,
}

impl ExternalOptimizer {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            iterations: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Optimizer for ExternalOptimizer {
    fn class_name(&self) -> &'static str {
        "ExternalOptimizer"
    }

    fn get_config(&self) -> Value {
        json!({ "label": self.label })
    }

    fn build(&mut self, _params: &[(String, Vec<usize>)]) -> Result<(), GraphError> {
        Ok(())
    }

    fn weights(&self) -> Vec<(String, TensorData)> {
        Vec::new()
    }

    fn set_weights(&mut self, _values: &[(String, TensorData)]) -> Result<(), GraphError> {
        Err(GraphError::InvalidOperation(
            "外部委托优化器的状态不可恢复".into(),
        ))
    }

    fn step(&mut self) {
        self.iterations += 1;
    }

    fn iterations(&self) -> u64 {
        self.iterations
    }

    fn is_external(&self) -> bool {
        true
    }
}
