//! pip 操作相关数据类型定义

use crate::error::PipError;
use std::fmt;

/// 已安装包（来自 `pip list --format=freeze`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
}

impl PackageRecord {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Install,
    Uninstall,
    ListInstalled,
    CheckAvailable,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Install => write!(f, "安装"),
            Verb::Uninstall => write!(f, "卸载"),
            Verb::ListInstalled => write!(f, "获取已安装列表"),
            Verb::CheckAvailable => write!(f, "检查 pip"),
        }
    }
}

/// 安装选项，仅对 Install 生效
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallFlags {
    /// `--user`
    pub user_scope: bool,
    /// `--upgrade`
    pub force_upgrade: bool,
}

/// 一次 pip 调用的请求，提交后不可修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    verb: Verb,
    target: Option<String>,
    version: Option<String>,
    flags: InstallFlags,
}

impl OperationRequest {
    /// 构建安装请求。包名为空时返回 Validation 错误；版本为空视为不锁定版本。
    pub fn install(
        target: &str,
        version: Option<&str>,
        flags: InstallFlags,
    ) -> Result<Self, PipError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(PipError::Validation("请输入要安装的包名称！".to_string()));
        }
        let version = version
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Ok(Self {
            verb: Verb::Install,
            target: Some(target.to_string()),
            version,
            flags,
        })
    }

    pub fn uninstall(target: &str) -> Result<Self, PipError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(PipError::Validation("请先选择要卸载的包！".to_string()));
        }
        Ok(Self {
            verb: Verb::Uninstall,
            target: Some(target.to_string()),
            version: None,
            flags: InstallFlags::default(),
        })
    }

    pub fn list_installed() -> Self {
        Self {
            verb: Verb::ListInstalled,
            target: None,
            version: None,
            flags: InstallFlags::default(),
        }
    }

    pub fn check_available() -> Self {
        Self {
            verb: Verb::CheckAvailable,
            target: None,
            version: None,
            flags: InstallFlags::default(),
        }
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// 目标包的完整规格，带版本时为 `name==version`
    pub fn requirement(&self) -> Option<String> {
        let target = self.target.as_deref()?;
        Some(match &self.version {
            Some(v) => format!("{}=={}", target, v),
            None => target.to_string(),
        })
    }

    /// `-m pip` 之后的参数列表
    pub fn pip_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match self.verb {
            Verb::Install => {
                args.push("install".to_string());
                if self.flags.user_scope {
                    args.push("--user".to_string());
                }
                if self.flags.force_upgrade {
                    args.push("--upgrade".to_string());
                }
            }
            Verb::Uninstall => {
                args.push("uninstall".to_string());
                args.push("-y".to_string());
            }
            Verb::ListInstalled => {
                args.push("list".to_string());
                args.push("--format=freeze".to_string());
            }
            Verb::CheckAvailable => {
                args.push("--version".to_string());
            }
        }
        if let Some(req) = self.requirement() {
            args.push(req);
        }
        args
    }
}

/// 失败输出的分类，仅用于给用户提示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Network,
    Permission,
    DependencyConflict,
    Unknown,
}

impl ErrorKind {
    pub fn hint(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "包不存在或名称错误",
            ErrorKind::Network => "网络连接失败，请检查镜像源",
            ErrorKind::Permission => "权限不足，请尝试管理员权限运行",
            ErrorKind::DependencyConflict => "依赖冲突，请使用--user参数",
            ErrorKind::Unknown => "未知错误",
        }
    }
}

/// 操作最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub exit_code: i32,
    pub classified_error: Option<ErrorKind>,
    pub raw_output: String,
    pub cancelled: bool,
    /// 已成功完成的目标包（批量卸载时可能只完成一部分）
    pub completed: Vec<String>,
    pub failed_target: Option<String>,
    /// 批量卸载中途无法启动 pip 时的错误描述，此前已完成的包仍记录在 `completed`
    pub launch_error: Option<String>,
}

impl OperationResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.cancelled
    }
}

/// 工作线程发往 UI 的事件
#[derive(Debug)]
pub enum OperationEvent {
    Line(String),
    /// `\r` 刷新的进度行，不计入输出记录
    Progress(String),
    Completed(OperationResult),
    /// 进程无法启动等，操作被中止
    Aborted(PipError),
}
