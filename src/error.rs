//! 错误类型定义

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipError {
    /// 用户输入不合法（缺少包名、缺少自定义源 URL 等）
    #[error("{0}")]
    Validation(String),

    /// 无法启动解释器 / pip 进程
    #[error("无法启动 {program}: {source}")]
    ProcessLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("未找到有效的pip环境")]
    PipUnavailable,

    /// 读取 / 备份 / 写入配置文件失败
    #[error("配置文件操作失败 ({}): {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("配置文件第 {line} 行解析失败: {message}")]
    Parse { line: usize, message: String },

    #[error("当前正在执行其他操作，请稍候！")]
    Busy,

    /// pip 返回非零退出码（list 等只读命令）
    #[error("{0}")]
    CommandFailed(String),

    /// 工作线程异常退出
    #[error("内部错误: {0}")]
    Internal(String),
}

impl PipError {
    pub fn config(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipError::Config {
            path: path.into(),
            source,
        }
    }

    /// 是否需要以"严重错误"级别提示
    pub fn is_critical(&self) -> bool {
        matches!(self, PipError::ProcessLaunch { .. } | PipError::PipUnavailable)
    }
}

pub type Result<T> = std::result::Result<T, PipError>;
