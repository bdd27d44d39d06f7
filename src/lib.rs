//! # Only Keras
//!
//! `only_keras`项目旨在用纯rust仿造[keras](https://keras.io)的模型容器层：
//! 以层（Layer）为基本单元构建线性堆叠（Sequential）或任意DAG（函数式Model），
//! 并提供拓扑+权重的单文件存档、从存档重建、以及"同结构、全新参数"的图克隆。
//! 数值内核、自动微分、分布式执行不在本crate范围内。
//!

pub mod nn;
pub mod utils;
