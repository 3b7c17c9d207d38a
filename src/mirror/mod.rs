//! pip 镜像源切换：读写 pip 配置文件中的 `[global] index-url` / `trusted-host`

pub mod ini;
pub mod registry;

pub use registry::{MirrorProfile, BUILTIN_PROFILES, CUSTOM_ID, DEFAULT_ID};

use crate::error::{PipError, Result};
use ini::IniDocument;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const SECTION: &str = "global";
const INDEX_URL: &str = "index-url";
const TRUSTED_HOST: &str = "trusted-host";

/// 写入配置文件的方式。默认实现先写临时文件再原子替换。
pub trait ConfigWriter: Send + Sync {
    fn write(&self, path: &Path, contents: &str) -> std::io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AtomicWriter;

impl ConfigWriter for AtomicWriter {
    fn write(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// pip 用户配置文件的默认位置：Windows 为 `%APPDATA%\pip\pip.ini`，其余平台为 `~/.pip/pip.conf`
pub fn default_config_path() -> PathBuf {
    if cfg!(windows) {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pip")
            .join("pip.ini")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pip")
            .join("pip.conf")
    }
}

pub struct MirrorManager {
    config_path: PathBuf,
    writer: Box<dyn ConfigWriter>,
}

impl MirrorManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self::with_writer(config_path, Box::new(AtomicWriter))
    }

    pub fn with_writer(config_path: PathBuf, writer: Box<dyn ConfigWriter>) -> Self {
        Self {
            config_path,
            writer,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.config_path.clone().into_os_string();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// 当前配置的 index-url；文件不存在、无法读取或解析失败时为 None
    pub fn current_url(&self) -> Option<String> {
        if !self.config_path.exists() {
            return None;
        }
        let text = match fs::read_to_string(&self.config_path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("读取 {} 失败: {}", self.config_path.display(), e);
                return None;
            }
        };
        match IniDocument::parse(&text) {
            Ok(doc) => doc.get(SECTION, INDEX_URL).map(str::to_string),
            Err(e) => {
                log::warn!("解析 {} 失败，按默认源处理: {}", self.config_path.display(), e);
                None
            }
        }
    }

    /// 当前使用的镜像源 id：按 URL 匹配内置源，未匹配为 "custom"，未配置为 "default"
    pub fn current_profile(&self) -> String {
        match self.current_url() {
            None => DEFAULT_ID.to_string(),
            Some(url) => registry::find_by_url(&url)
                .map(|p| p.id.to_string())
                .unwrap_or_else(|| CUSTOM_ID.to_string()),
        }
    }

    /// 备份现有配置文件（覆盖旧的 .bak），文件不存在时返回 None
    pub fn backup(&self) -> Result<Option<PathBuf>> {
        if !self.config_path.exists() {
            return Ok(None);
        }
        let backup = self.backup_path();
        fs::copy(&self.config_path, &backup).map_err(|e| PipError::config(&backup, e))?;
        log::info!("已备份 {} -> {}", self.config_path.display(), backup.display());
        Ok(Some(backup))
    }

    fn resolve_profile(id: &str, custom_url: Option<&str>) -> Result<MirrorProfile> {
        if id == CUSTOM_ID {
            let url = custom_url.map(str::trim).unwrap_or_default();
            if url.is_empty() {
                return Err(PipError::Validation("必须提供自定义源URL".to_string()));
            }
            return Ok(MirrorProfile::custom(url));
        }
        registry::find_by_id(id)
            .cloned()
            .ok_or_else(|| PipError::Validation(format!("无效的镜像源: {}", id)))
    }

    /// 切换到指定镜像源，返回备份文件路径（如有）
    pub fn apply_profile(&self, id: &str, custom_url: Option<&str>) -> Result<Option<PathBuf>> {
        let profile = Self::resolve_profile(id, custom_url)?;

        let mut doc = if self.config_path.exists() {
            let text = fs::read_to_string(&self.config_path)
                .map_err(|e| PipError::config(&self.config_path, e))?;
            IniDocument::parse(&text)?
        } else {
            IniDocument::default()
        };

        // 备份成功之后才允许改动原文件
        let backup = self.backup()?;

        if let Some(dir) = self.config_path.parent() {
            fs::create_dir_all(dir).map_err(|e| PipError::config(dir, e))?;
        }

        doc.set(SECTION, INDEX_URL, &profile.index_url);
        match &profile.trusted_host {
            Some(host) => doc.set(SECTION, TRUSTED_HOST, host),
            None => {
                doc.remove(SECTION, TRUSTED_HOST);
            }
        }

        self.writer
            .write(&self.config_path, &doc.serialize())
            .map_err(|e| PipError::config(&self.config_path, e))?;
        log::info!("已切换镜像源: {} ({})", profile.id, profile.index_url);
        Ok(backup)
    }

    /// 恢复默认：备份后删除配置文件。文件不存在时什么也不做。
    pub fn restore_default(&self) -> Result<Option<PathBuf>> {
        if !self.config_path.exists() {
            return Ok(None);
        }
        let backup = self.backup()?;
        fs::remove_file(&self.config_path).map_err(|e| PipError::config(&self.config_path, e))?;
        log::info!("已删除 {}，恢复默认源", self.config_path.display());
        Ok(backup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingWriter;

    impl ConfigWriter for FailingWriter {
        fn write(&self, _path: &Path, _contents: &str) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }
    }

    fn manager(dir: &Path) -> MirrorManager {
        MirrorManager::new(dir.join("pip").join("pip.conf"))
    }

    #[test]
    fn missing_file_reports_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(manager(dir.path()).current_profile(), "default");
    }

    #[test]
    fn apply_then_restore_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        assert_eq!(m.apply_profile("tsinghua", None).unwrap(), None);
        assert_eq!(m.current_profile(), "tsinghua");
        let text = fs::read_to_string(m.config_path()).unwrap();
        assert!(text.contains("index-url = https://pypi.tuna.tsinghua.edu.cn/simple"));
        assert!(text.contains("trusted-host = pypi.tuna.tsinghua.edu.cn"));

        let backup = m.restore_default().unwrap();
        assert_eq!(backup, Some(m.backup_path()));
        assert!(!m.config_path().exists());
        assert_eq!(m.current_profile(), "default");
        assert_eq!(m.restore_default().unwrap(), None);
    }

    #[test]
    fn custom_url_is_matched_by_url_not_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());

        m.apply_profile("custom", Some("https://pypi.example.org/simple")).unwrap();
        assert_eq!(m.current_profile(), "custom");
        let text = fs::read_to_string(m.config_path()).unwrap();
        assert!(!text.contains("trusted-host"));

        m.apply_profile("custom", Some("https://mirrors.aliyun.com/pypi/simple/"))
            .unwrap();
        assert_eq!(m.current_profile(), "aliyun");
    }

    #[test]
    fn custom_without_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        assert!(matches!(m.apply_profile("custom", None), Err(PipError::Validation(_))));
        assert!(matches!(m.apply_profile("custom", Some("  ")), Err(PipError::Validation(_))));
        assert!(matches!(m.apply_profile("nope", None), Err(PipError::Validation(_))));
        assert!(!m.config_path().exists());
    }

    #[test]
    fn apply_merges_into_existing_settings() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        fs::create_dir_all(m.config_path().parent().unwrap()).unwrap();
        let original = "[global]\ntimeout = 60\ntrusted-host = old.example.com\n\n[install]\nuser = true\n";
        fs::write(m.config_path(), original).unwrap();
        assert_eq!(m.current_profile(), "default");

        let backup = m.apply_profile("custom", Some("http://10.0.0.2/simple")).unwrap();
        assert_eq!(fs::read_to_string(backup.unwrap()).unwrap(), original);
        assert_eq!(
            fs::read_to_string(m.config_path()).unwrap(),
            "[global]\ntimeout = 60\nindex-url = http://10.0.0.2/simple\n\n[install]\nuser = true\n"
        );
    }

    #[test]
    fn unparseable_file_reads_as_default_but_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        fs::create_dir_all(m.config_path().parent().unwrap()).unwrap();
        fs::write(m.config_path(), "index-url = https://pypi.org/simple\n").unwrap();

        assert_eq!(m.current_profile(), "default");
        assert!(matches!(m.apply_profile("aliyun", None), Err(PipError::Parse { .. })));
        assert_eq!(
            fs::read_to_string(m.config_path()).unwrap(),
            "index-url = https://pypi.org/simple\n"
        );
    }

    #[test]
    fn write_failure_after_backup_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pip.conf");
        let original = "[global]\nindex-url = https://pypi.douban.com/simple/\n";
        fs::write(&path, original).unwrap();

        let m = MirrorManager::with_writer(path.clone(), Box::new(FailingWriter));
        let err = m.apply_profile("ustc", None).unwrap_err();
        assert!(matches!(err, PipError::Config { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        assert_eq!(fs::read_to_string(m.backup_path()).unwrap(), original);
        assert_eq!(m.current_profile(), "douban");
    }

    #[test]
    fn backup_failure_aborts_before_any_change() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        fs::create_dir_all(m.config_path().parent().unwrap()).unwrap();
        let original = "[global]\nindex-url = https://pypi.org/simple\n";
        fs::write(m.config_path(), original).unwrap();
        // .bak 位置被目录占用，复制必然失败
        fs::create_dir_all(m.backup_path()).unwrap();

        assert!(matches!(m.apply_profile("tencent", None), Err(PipError::Config { .. })));
        assert!(matches!(m.restore_default(), Err(PipError::Config { .. })));
        assert_eq!(fs::read_to_string(m.config_path()).unwrap(), original);
    }

    #[test]
    fn commented_section_header_is_understood() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        fs::create_dir_all(m.config_path().parent().unwrap()).unwrap();
        fs::write(
            m.config_path(),
            "[global] # pip\nindex-url = https://pypi.tuna.tsinghua.edu.cn/simple\n",
        )
        .unwrap();

        assert_eq!(m.current_profile(), "tsinghua");
        m.apply_profile("aliyun", None).unwrap();
        assert_eq!(m.current_profile(), "aliyun");
    }

    #[test]
    fn backup_path_appends_suffix() {
        let m = MirrorManager::new(PathBuf::from("/tmp/x/pip.conf"));
        assert_eq!(m.backup_path(), PathBuf::from("/tmp/x/pip.conf.bak"));
    }
}
