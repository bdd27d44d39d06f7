/*
 * @Author       : 老董
 * @Date         : 2026-02-11
 * @Description  : 层图模型容器的错误类型
 */

use super::types::{LayerId, TensorId};
use thiserror::Error;

/// 图/模型操作错误类型
///
/// 除 load_model 中两处明确降级为警告的场景外，所有错误都立即上抛，
/// 调用中途失败不会破坏失败前的状态（如 add 失败时层序列保持原样）。
#[derive(Error, Debug)]
pub enum GraphError {
    // ========== 参数与配置 ==========
    #[error("类型不匹配：{0}")]
    TypeMismatch(String),
    #[error("配置无效：{0}")]
    InvalidConfig(String),
    #[error("形状不匹配：期望{expected}，实得{got:?}（{message}）")]
    ShapeMismatch {
        expected: String,
        got: Vec<usize>,
        message: String,
    },
    #[error("Sequential 模型的每一层都必须只有单个输出张量，多输出层请改用函数式 API")]
    MultiOutputLayer,
    #[error("张量数量不匹配：期望{expected}个，实得{got}个")]
    TensorCountMismatch { expected: usize, got: usize },
    #[error("不支持的注入点：{0}")]
    UnsupportedOrigin(String),
    #[error("模型使用前需要先编译（compile）")]
    NotCompiled,
    #[error("模型中没有层可供弹出")]
    EmptyModel,

    // ========== 存档 ==========
    #[error("存档后端不可用：{0}")]
    BackendUnavailable(String),
    #[error("存档缺少必需记录：{0}")]
    MissingRecord(String),
    #[error("存档无效：{0}")]
    InvalidArchive(String),
    #[error("未注册的标识符：{0}")]
    UnknownIdentifier(String),
    #[error("值无法写入拓扑描述：{0}")]
    NotSerializable(String),

    // ========== 图内部 ==========
    #[error("层{0:?}在图中不存在")]
    LayerNotFound(LayerId),
    #[error("张量{0:?}在图中不存在")]
    TensorNotFound(TensorId),
    #[error("层名`{0}`在图中重复")]
    DuplicateLayerName(String),
    #[error("无效操作：{0}")]
    InvalidOperation(String),
    #[error("内部不变量被破坏：{0}")]
    InternalError(String),

    // ========== IO 与编解码 ==========
    #[error("IO 错误：{0}")]
    Io(#[from] std::io::Error),
    #[error("JSON 编解码失败：{0}")]
    Json(#[from] serde_json::Error),
}
