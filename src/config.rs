use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 用来执行 `-m pip` 的 Python 解释器
    pub python: String,
    /// pip 配置文件路径，不填则使用平台默认位置
    pub pip_config_path: Option<PathBuf>,
    /// 包列表过滤的防抖间隔
    pub filter_debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python: if cfg!(windows) { "python" } else { "python3" }.to_string(),
            pip_config_path: None,
            filter_debounce_ms: 300,
        }
    }
}

impl Config {
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lian-pip")
            .join("config.toml")
    }

    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::path();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件 {} 失败", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("解析配置文件 {} 失败", path.display()))?;
        Ok(config)
    }

    pub fn pip_config_path(&self) -> PathBuf {
        self.pip_config_path
            .clone()
            .unwrap_or_else(crate::mirror::default_config_path)
    }
}
