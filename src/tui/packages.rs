use super::input::render_input_box;
use super::layout;
use super::state::{App, AppEvent, Notice, RunningOperation};
use super::theme::{ACCENT, DIM, MARKED, SEL_BG};
use crate::package_manager::{OperationResult, PackageRecord, Verb};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::{Constraint, Direction, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use std::time::Instant;
use tokio::sync::mpsc;
use unicode_width::UnicodeWidthStr;

/// 后台刷新已安装包列表。只读操作，可以和安装 / 卸载同时进行。
pub fn spawn_refresh(app: &mut App, tx: &mpsc::Sender<AppEvent>) {
    if app.packages.loading {
        return;
    }
    app.packages.loading = true;
    app.status = "正在获取已安装包列表...".to_string();
    let job = app.session.refresh();
    let tx = tx.clone();
    tokio::spawn(async move {
        let result = match job.await {
            Ok(Ok(records)) => Ok(records),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("后台任务异常: {}", e)),
        };
        let _ = tx.send(AppEvent::PackagesLoaded(result)).await;
    });
}

pub fn handle_packages_loaded(app: &mut App, result: Result<Vec<PackageRecord>, String>) {
    app.packages.loading = false;
    match result {
        Ok(records) => {
            let count = records.len();
            app.packages.list.update(records);
            // 已不存在的包不再保留标记
            let list = &app.packages.list;
            app.packages.marked.retain(|name| list.contains(name));
            app.packages.clamp_selection();
            app.status = format!("已加载 {} 个安装包", count);
        }
        Err(e) => {
            app.output.add_status(&format!("错误: 获取已安装列表失败: {}", e));
            app.status = "获取已安装列表失败".to_string();
            // 不覆盖已有的严重错误提示
            if app.notice.is_none() {
                app.notice = Some(Notice::Warning(format!("获取已安装列表失败: {}", e)));
            }
        }
    }
}

/// 防抖到期后执行过滤
pub fn execute_pending_filter(app: &mut App) {
    if let Some(scheduled) = app.packages.filter_scheduled {
        if scheduled.elapsed() >= app.debounce {
            app.packages.filter_scheduled = None;
            let query = app.packages.filter.content().to_string();
            app.packages.list.filter(&query);
            app.packages.selected = 0;
            app.status = format!("显示 {} 个匹配包", app.packages.list.len());
        }
    }
}

fn request_uninstall(app: &mut App) {
    if app.operation.is_some() {
        app.notice = Some(Notice::Warning("当前正在执行其他操作，请稍候！".to_string()));
        return;
    }
    let targets = app.packages.uninstall_targets();
    if targets.is_empty() {
        app.notice = Some(Notice::Warning("请先选择要卸载的包！".to_string()));
        return;
    }
    app.packages.confirm = Some(targets);
}

fn spawn_uninstall_task(app: &mut App, packages: Vec<String>) {
    let count = packages.len();
    match app.session.uninstall(packages) {
        Ok(handle) => {
            app.output.add_status("开始卸载操作");
            app.status = format!("正在卸载 {} 个包...", count);
            app.operation = Some(RunningOperation {
                handle,
                verb: Verb::Uninstall,
            });
        }
        Err(e) => {
            app.notice = Some(Notice::Warning(e.to_string()));
        }
    }
}

/// 卸载结束：无论成功与否都重新读取列表，以实际安装状态为准
pub fn handle_uninstall_complete(
    app: &mut App,
    result: OperationResult,
    tx: &mpsc::Sender<AppEvent>,
) {
    for name in &result.completed {
        app.packages.marked.remove(name);
    }
    if let Some(error) = &result.launch_error {
        let message = format!(
            "卸载 {} 时无法启动 pip: {}，已卸载 {} 个包",
            result.failed_target.as_deref().unwrap_or("?"),
            error,
            result.completed.len()
        );
        app.output.add_status(&format!("错误: {}", message));
        app.status = format!("错误: {}", message);
        app.notice = Some(Notice::Critical(message));
    } else if result.success() {
        app.output.add_status("卸载完成！");
        app.status = "卸载操作完成".to_string();
    } else if result.cancelled {
        app.output.add_status(&format!("卸载已取消，已卸载 {} 个包", result.completed.len()));
        app.status = "卸载已取消".to_string();
    } else {
        let target = result.failed_target.as_deref().unwrap_or("?");
        let hint = result.classified_error.map(|k| k.hint()).unwrap_or("未知错误");
        let message = format!(
            "卸载过程中发生错误: 卸载 {} 失败（{}），已卸载 {} 个包",
            target,
            hint,
            result.completed.len()
        );
        app.output.add_status(&format!("错误: {}", message));
        app.status = format!("错误: {}", message);
        app.notice = Some(Notice::Error(message));
    }
    spawn_refresh(app, tx);
}

/// 处理包列表视图按键。过滤框始终处于输入状态。
pub fn handle_packages_key(
    key: KeyEvent,
    app: &mut App,
    tx: &mpsc::Sender<AppEvent>,
    term_height: u16,
) -> bool {
    if let Some(targets) = app.packages.confirm.clone() {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                app.packages.confirm = None;
                spawn_uninstall_task(app, targets);
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                app.packages.confirm = None;
            }
            _ => {}
        }
        return true;
    }

    let page = layout::visible_content_height(term_height).max(1);
    match key.code {
        KeyCode::Up => {
            app.packages.selected = app.packages.selected.saturating_sub(1);
        }
        KeyCode::Down => {
            if app.packages.selected + 1 < app.packages.list.len() {
                app.packages.selected += 1;
            }
        }
        KeyCode::PageUp => app.output.scroll_up(page / 2, page),
        KeyCode::PageDown => app.output.scroll_down(page / 2, page),
        KeyCode::Char(' ') => {
            app.packages.toggle_mark();
            if app.packages.selected + 1 < app.packages.list.len() {
                app.packages.selected += 1;
            }
        }
        KeyCode::Enter | KeyCode::Delete => request_uninstall(app),
        KeyCode::F(5) => spawn_refresh(app, tx),
        KeyCode::Esc => {
            if !app.packages.filter.content().is_empty() {
                app.packages.filter.clear();
                app.packages.filter_scheduled = None;
                app.packages.list.filter("");
                app.packages.clamp_selection();
            }
        }
        KeyCode::Backspace => {
            if app.packages.filter.delete_back() {
                app.packages.filter_scheduled = Some(Instant::now());
            }
        }
        KeyCode::Left => app.packages.filter.move_left(),
        KeyCode::Right => app.packages.filter.move_right(),
        KeyCode::Char(c) => {
            app.packages.filter.insert(c);
            app.packages.filter_scheduled = Some(Instant::now());
        }
        _ => return false,
    }
    true
}

pub fn render_packages(f: &mut Frame, app: &App) {
    let chunks = layout::main_layout(f.area());
    let busy = app.busy_label().map(|l| (l, app.tick));
    layout::render_header(f, "📦 pip 图形化管理工具 · 已安装包", busy, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(chunks[1]);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(body[0]);

    render_input_box(f, &app.packages.filter, "🔍 过滤:", true, left[0]);
    render_package_table(f, app, left[1]);

    layout::render_scrollable_content(
        f,
        "输出",
        &app.output.lines,
        &app.output.progress,
        app.output.scroll,
        body[1],
    );

    let hint = if app.operation.is_some() {
        "Esc 取消操作 | PgUp/PgDn 滚动输出 | Tab 切换页面"
    } else {
        "↑↓ 选择 | Space 标记 | Enter 卸载 | F5 刷新 | Tab 安装/镜像源 | Ctrl+C 退出"
    };
    layout::render_footer(f, hint, &app.status, chunks[2]);

    if let Some(targets) = &app.packages.confirm {
        let mut body = vec![format!("确定要卸载以下 {} 个包吗？", targets.len()), String::new()];
        body.extend(targets.iter().map(|t| format!("  • {}", t)));
        layout::render_popup(f, "确认卸载", &body, Color::Red, "y/Enter 确认  ·  n/Esc 取消");
    }
}

fn render_package_table(f: &mut Frame, app: &App, area: Rect) {
    let state = &app.packages;
    let title = if state.list.query().is_empty() {
        format!(" 已安装包列表 ({}) ", state.list.total())
    } else {
        format!(" 已安装包列表 ({}/{}) ", state.list.len(), state.list.total())
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));
    let inner = block.inner(area);
    f.render_widget(block, area);
    let inner = inner.inner(Margin {
        horizontal: 1,
        vertical: 0,
    });

    if state.list.is_empty() {
        let text = if app.pip_available == Some(false) {
            "未找到有效的pip环境"
        } else if state.loading {
            "正在获取已安装包列表..."
        } else if state.list.total() == 0 {
            "没有已安装的包（F5 刷新）"
        } else {
            "没有匹配的包"
        };
        f.render_widget(Paragraph::new(text).style(Style::default().fg(DIM)), inner);
        return;
    }

    let visible = inner.height as usize;
    let offset = state.selected.saturating_sub(visible.saturating_sub(1));
    let name_width = state
        .list
        .visible()
        .iter()
        .map(|r| UnicodeWidthStr::width(r.name.as_str()))
        .max()
        .unwrap_or(10)
        .min((inner.width as usize).saturating_sub(16).max(10));

    let lines: Vec<Line> = state
        .list
        .visible()
        .into_iter()
        .enumerate()
        .skip(offset)
        .take(visible)
        .map(|(i, record)| {
            let is_selected = i == state.selected;
            let is_marked = state.marked.contains(&record.name);
            let mark = if is_marked { "✓ " } else { "  " };
            let pad = name_width.saturating_sub(UnicodeWidthStr::width(record.name.as_str()));
            let mut name_style = Style::default().fg(if is_marked { MARKED } else { Color::White });
            let mut version_style = Style::default().fg(DIM);
            if is_selected {
                name_style = name_style.bg(SEL_BG).add_modifier(Modifier::BOLD);
                version_style = version_style.bg(SEL_BG);
            }
            Line::from(vec![
                Span::styled(mark, Style::default().fg(MARKED)),
                Span::styled(format!("{}{}", record.name, " ".repeat(pad)), name_style),
                Span::styled(format!("  {}", record.version), version_style),
            ])
        })
        .collect();

    f.render_widget(Paragraph::new(lines), inner);
}
