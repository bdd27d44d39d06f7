/*
 * @Author       : 老董
 * @Date         : 2026-02-12
 * @Description  : Node——层的一次调用的不可变记录
 */

use crate::nn::types::{CallArgs, LayerId, Shape, TensorId};

/// 层的一次调用产生一个 Node，登记在该层的 inbound_nodes 列表里。
///
/// Node 的归属层由存放位置决定（(层, 节点序) 即可定位），
/// 记录里只保留每个输入张量的来路坐标与输入/输出张量句柄。
/// 一旦登记不再修改；唯一的例外是 Sequential 容器自身的合成节点，
/// 它不进 arena，由容器在 add/pop 时更新输出元数据。
#[derive(Debug, Clone)]
pub struct Node {
    /// 每个输入张量的来源层
    pub inbound_layers: Vec<LayerId>,
    /// 来源层上对应的节点序号
    pub node_indices: Vec<usize>,
    /// 来源节点输出列表中的张量序号
    pub tensor_indices: Vec<usize>,
    pub input_tensors: Vec<TensorId>,
    pub output_tensors: Vec<TensorId>,
    /// 输出形状缓存（与 output_tensors 一一对应）
    pub output_shapes: Vec<Shape>,
    /// 调用期关键字参数（克隆重放时原样传回）
    pub arguments: Option<CallArgs>,
}

impl Node {
    /// 不依赖任何来源的合成节点（容器顶层节点、输入层节点）
    pub fn synthetic(
        input_tensors: Vec<TensorId>,
        output_tensors: Vec<TensorId>,
        output_shapes: Vec<Shape>,
    ) -> Self {
        Self {
            inbound_layers: Vec::new(),
            node_indices: Vec::new(),
            tensor_indices: Vec::new(),
            input_tensors,
            output_tensors,
            output_shapes,
            arguments: None,
        }
    }
}
