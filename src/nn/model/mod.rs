/*
 * @Author       : 老董
 * @Date         : 2026-02-18
 * @Description  : 模型模块：Sequential 容器、函数式 Model、克隆引擎、存档网关
 */

mod clone;
mod functional;
mod model_io;
mod sequential;

pub use clone::{AnyModel, CloneInput, ModelRef, clone_functional_model, clone_model,
    clone_sequential_model};
pub use functional::{Model, NodeKey, TrainingState};
pub use model_io::{load_model, load_weights, model_from_config, model_from_json, save_model,
    save_weights};
#[cfg(feature = "archive")]
pub use model_io::save_model_with_prompt;
#[cfg(all(test, feature = "archive"))]
pub(in crate::nn) use model_io::{truncate_optimizer_weights, write_archive_without_topology};
pub use sequential::Sequential;
