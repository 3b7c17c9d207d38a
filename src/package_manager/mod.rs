//! pip 封装 — 通过 `<interpreter> -m pip` 调用

pub mod catalog;
pub mod parser;
pub mod session;
pub mod streaming;
pub mod types;

pub use catalog::PackageList;
pub use session::{OperationHandle, Session};
pub use types::{
    InstallFlags, OperationEvent, OperationRequest, OperationResult, PackageRecord, Verb,
};

use crate::error::{PipError, Result};
use parser::parse_freeze;
use std::process::{Command, Stdio};

#[derive(Debug, Clone)]
pub struct Pip {
    interpreter: String,
}

impl Pip {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// 构建 `<interpreter> -m pip <args...>` 命令
    pub fn command(&self, pip_args: &[String]) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-m").arg("pip").args(pip_args);
        // 让 pip 的输出按行及时刷新，并避免终端编码问题
        cmd.env("PYTHONUNBUFFERED", "1");
        cmd.env("PYTHONIOENCODING", "utf-8");
        cmd.env("PIP_NO_COLOR", "1");
        cmd.env("PIP_DISABLE_PIP_VERSION_CHECK", "1");
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        cmd
    }

    /// 检查 pip 是否可用；任何启动失败都视为不可用
    pub fn check_available(&self) -> bool {
        let args = OperationRequest::check_available().pip_args();
        match self
            .command(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) => status.success(),
            Err(e) => {
                log::debug!("pip 不可用 ({}): {}", self.interpreter, e);
                false
            }
        }
    }

    /// 获取已安装包列表 (pip list --format=freeze)
    pub fn list_installed(&self) -> Result<Vec<PackageRecord>> {
        let args = OperationRequest::list_installed().pip_args();
        let output = self
            .command(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| PipError::ProcessLaunch {
                program: self.interpreter.clone(),
                source,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::warn!("pip list 执行失败: {}", stderr.trim());
            return Err(PipError::CommandFailed(format!(
                "获取已安装列表失败: {}",
                stderr.lines().last().unwrap_or("pip list 返回非零退出码")
            )));
        }
        Ok(parse_freeze(&String::from_utf8_lossy(&output.stdout)))
    }
}
