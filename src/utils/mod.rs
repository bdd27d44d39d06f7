//! # 常用接口模块
//!
//! 本模块提供一些不属于图/模型语义的辅助操作接口

use std::io::{self, BufRead, Write};
use std::path::Path;

/// 询问用户是否覆盖已存在的文件（外部协作者：标准输入）
///
/// 返回 true 表示用户同意覆盖。非交互环境下（读取失败）视为拒绝。
pub fn ask_to_proceed_with_overwrite(path: &Path) -> bool {
    print!("[警告] 文件 {} 已存在，是否覆盖？[y/n] ", path.display());
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
