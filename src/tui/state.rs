use super::input::TextInput;
use crate::config::Config;
use crate::mirror::{MirrorManager, BUILTIN_PROFILES};
use crate::package_manager::{OperationHandle, PackageList, PackageRecord, Pip, Session, Verb};
use chrono::Local;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

// ========== 枚举 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Packages,
    Install,
    Mirror,
}

impl AppMode {
    pub fn next(self) -> Self {
        match self {
            AppMode::Packages => AppMode::Install,
            AppMode::Install => AppMode::Mirror,
            AppMode::Mirror => AppMode::Packages,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallField {
    Name,
    Version,
    UserScope,
    ForceUpgrade,
}

impl InstallField {
    const ORDER: [InstallField; 4] = [
        InstallField::Name,
        InstallField::Version,
        InstallField::UserScope,
        InstallField::ForceUpgrade,
    ];

    fn index(self) -> usize {
        Self::ORDER.iter().position(|f| *f == self).unwrap_or(0)
    }

    pub fn next(self) -> Self {
        Self::ORDER[(self.index() + 1) % Self::ORDER.len()]
    }

    pub fn prev(self) -> Self {
        Self::ORDER[(self.index() + Self::ORDER.len() - 1) % Self::ORDER.len()]
    }
}

/// 阻塞式提示，按任意键关闭
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Warning(String),
    Error(String),
    Critical(String),
}

// ========== 事件 ==========

#[derive(Debug)]
pub enum AppEvent {
    PipChecked(bool),
    PackagesLoaded(Result<Vec<PackageRecord>, String>),
}

// ========== 子状态结构体 ==========

/// 输出区域：pip 的逐行输出 + 本程序的状态行
#[derive(Debug, Default)]
pub struct OutputLog {
    pub lines: Vec<String>,
    pub progress: String,
    pub scroll: usize,
    /// 是否自动跟随最新输出
    pub follow: bool,
}

impl OutputLog {
    pub fn new() -> Self {
        Self {
            follow: true,
            ..Default::default()
        }
    }

    pub fn add_line(&mut self, line: String) {
        self.lines.push(line);
        if self.follow {
            self.scroll = self.lines.len();
        }
    }

    /// 带时间戳的状态行
    pub fn add_status(&mut self, message: &str) {
        let stamp = Local::now().format("%H:%M:%S");
        self.add_line(format!("[{}] {}", stamp, message));
    }

    pub fn scroll_up(&mut self, amount: usize, visible: usize) {
        self.clamp(visible);
        self.scroll = self.scroll.saturating_sub(amount);
        self.follow = false;
    }

    pub fn scroll_down(&mut self, amount: usize, visible: usize) {
        let max_scroll = self.lines.len().saturating_sub(visible);
        self.scroll = (self.scroll + amount).min(max_scroll);
        self.follow = self.scroll >= max_scroll;
    }

    pub fn clamp(&mut self, visible: usize) {
        let max_scroll = self.lines.len().saturating_sub(visible);
        self.scroll = self.scroll.min(max_scroll);
    }
}

pub struct PackagesState {
    pub list: PackageList,
    pub filter: TextInput,
    pub selected: usize,
    /// 标记待卸载的包名
    pub marked: BTreeSet<String>,
    pub loading: bool,
    /// 防抖：最后一次输入的时间
    pub filter_scheduled: Option<Instant>,
    /// 等待用户确认卸载的包
    pub confirm: Option<Vec<String>>,
}

impl PackagesState {
    fn new() -> Self {
        Self {
            list: PackageList::new(),
            filter: TextInput::new(),
            selected: 0,
            marked: BTreeSet::new(),
            loading: false,
            filter_scheduled: None,
            confirm: None,
        }
    }

    pub fn clamp_selection(&mut self) {
        self.selected = self.selected.min(self.list.len().saturating_sub(1));
    }

    /// 要卸载的包：有标记时取全部标记，否则取当前选中行
    pub fn uninstall_targets(&self) -> Vec<String> {
        if !self.marked.is_empty() {
            return self.marked.iter().cloned().collect();
        }
        self.list
            .get(self.selected)
            .map(|r| vec![r.name.clone()])
            .unwrap_or_default()
    }

    pub fn toggle_mark(&mut self) {
        if let Some(record) = self.list.get(self.selected) {
            let name = record.name.clone();
            if !self.marked.remove(&name) {
                self.marked.insert(name);
            }
        }
    }
}

pub struct InstallForm {
    pub name: TextInput,
    pub version: TextInput,
    pub user_scope: bool,
    pub force_upgrade: bool,
    pub focus: InstallField,
}

impl InstallForm {
    fn new() -> Self {
        Self {
            name: TextInput::new(),
            version: TextInput::new(),
            user_scope: false,
            force_upgrade: false,
            focus: InstallField::Name,
        }
    }
}

pub struct MirrorState {
    /// 0..6 为内置源，6 为自定义源
    pub selected: usize,
    pub custom_url: TextInput,
    pub editing_custom: bool,
    pub current: String,
    pub message: Option<String>,
}

impl MirrorState {
    pub const CUSTOM_INDEX: usize = BUILTIN_PROFILES.len();

    fn new() -> Self {
        Self {
            // 默认选中阿里云
            selected: 2,
            custom_url: TextInput::new(),
            editing_custom: false,
            current: String::new(),
            message: None,
        }
    }

    pub fn selected_id(&self) -> &'static str {
        BUILTIN_PROFILES
            .get(self.selected)
            .map(|p| p.id.as_ref())
            .unwrap_or(crate::mirror::CUSTOM_ID)
    }
}

/// 正在执行的 install / uninstall
pub struct RunningOperation {
    pub handle: OperationHandle,
    pub verb: Verb,
}

// ========== 主状态 ==========

pub struct App {
    pub mode: AppMode,
    pub session: Session,
    pub mirrors: MirrorManager,
    pub pip_available: Option<bool>,
    pub packages: PackagesState,
    pub install: InstallForm,
    pub mirror: MirrorState,
    pub output: OutputLog,
    pub operation: Option<RunningOperation>,
    pub notice: Option<Notice>,
    pub status: String,
    pub debounce: Duration,
    pub tick: usize,
    pub should_quit: bool,
}

impl App {
    pub fn new(config: &Config) -> Self {
        let mirrors = MirrorManager::new(config.pip_config_path());
        let mut mirror = MirrorState::new();
        mirror.current = mirrors.current_profile();
        Self {
            mode: AppMode::Packages,
            session: Session::new(Pip::new(config.python.clone())),
            mirrors,
            pip_available: None,
            packages: PackagesState::new(),
            install: InstallForm::new(),
            mirror,
            output: OutputLog::new(),
            operation: None,
            notice: None,
            status: "就绪".to_string(),
            debounce: Duration::from_millis(config.filter_debounce_ms),
            tick: 0,
            should_quit: false,
        }
    }

    pub fn busy_label(&self) -> Option<&str> {
        if let Some(op) = &self.operation {
            return Some(op.handle.label());
        }
        if self.packages.loading {
            return Some("正在获取已安装包列表");
        }
        None
    }

    /// 取消正在执行的操作（如有）
    pub fn cancel_operation(&mut self) {
        if let Some(op) = &self.operation {
            if !op.handle.is_cancelled() {
                op.handle.cancel();
                self.output.add_status("正在取消...");
                self.status = "正在取消...".to_string();
            }
        }
    }

    pub fn refresh_mirror_status(&mut self) {
        self.mirror.current = self.mirrors.current_profile();
    }
}
