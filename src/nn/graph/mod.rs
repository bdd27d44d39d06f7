/*
 * @Author       : 老董
 * @Date         : 2026-02-12
 * @Description  : Graph 模块：层/张量/节点 arena 的核心实现
 *
 * 公开 API：
 * - `Graph`: 用户级句柄（廉价克隆，多个句柄共享同一 arena）
 * - `GraphInner`: 底层 arena（高级用户使用）
 * - `Node`: 层的一次调用的不可变记录
 */

mod handle;
mod inner;
mod node;

pub use handle::Graph;
pub use inner::{GraphInner, LayerSlot};
pub use node::Node;
