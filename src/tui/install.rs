use super::input::render_input_box;
use super::layout;
use super::packages::spawn_refresh;
use super::state::{App, AppEvent, InstallField, Notice, RunningOperation};
use super::theme::{ACCENT, DIM, OK};
use crate::package_manager::{InstallFlags, OperationRequest, OperationResult, Verb};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::{Constraint, Direction, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use tokio::sync::mpsc;

/// 根据表单内容提交安装
pub fn spawn_install_task(app: &mut App) {
    if app.operation.is_some() || app.session.is_busy() {
        app.notice = Some(Notice::Warning("当前正在执行安装操作，请稍候！".to_string()));
        return;
    }
    let form = &app.install;
    let flags = InstallFlags {
        user_scope: form.user_scope,
        force_upgrade: form.force_upgrade,
    };
    let request = match OperationRequest::install(
        form.name.content(),
        Some(form.version.content()),
        flags,
    ) {
        Ok(request) => request,
        Err(e) => {
            app.notice = Some(Notice::Warning(e.to_string()));
            return;
        }
    };
    let requirement = request.requirement().unwrap_or_default();

    match app.session.install(request) {
        Ok(handle) => {
            app.output.add_status(&format!("开始安装 {}", requirement));
            app.status = format!("正在安装 {}...", requirement);
            app.operation = Some(RunningOperation {
                handle,
                verb: Verb::Install,
            });
        }
        Err(e) => {
            app.notice = Some(Notice::Warning(e.to_string()));
        }
    }
}

pub fn handle_install_complete(
    app: &mut App,
    result: OperationResult,
    tx: &mpsc::Sender<AppEvent>,
) {
    // 以结果中的目标为准，执行期间表单可能已被修改
    let package = result
        .completed
        .first()
        .or(result.failed_target.as_ref())
        .cloned()
        .unwrap_or_default();
    if result.success() {
        app.output.add_status("安装成功！");
        app.status = format!("{} 安装成功", package);
        spawn_refresh(app, tx);
    } else if result.cancelled {
        app.output.add_status("安装已取消");
        app.status = "安装已取消".to_string();
        // 取消时可能已经装了一部分依赖
        spawn_refresh(app, tx);
    } else {
        let hint = result.classified_error.map(|k| k.hint()).unwrap_or("未知错误");
        app.output.add_status(&format!("安装失败: {}", hint));
        app.status = format!("{} 安装失败", package);
        app.notice = Some(Notice::Error(format!(
            "安装 {} 失败（退出码 {}）\n{}",
            package, result.exit_code, hint
        )));
    }
}

pub fn handle_install_key(key: KeyEvent, app: &mut App, term_height: u16) -> bool {
    let page = layout::visible_content_height(term_height).max(1);
    match key.code {
        KeyCode::Enter => {
            spawn_install_task(app);
            return true;
        }
        KeyCode::PageUp => {
            app.output.scroll_up(page / 2, page);
            return true;
        }
        KeyCode::PageDown => {
            app.output.scroll_down(page / 2, page);
            return true;
        }
        _ => {}
    }

    let form = &mut app.install;
    let focus = form.focus;
    match (focus, key.code) {
        (_, KeyCode::Up) => form.focus = focus.prev(),
        (_, KeyCode::Down) => form.focus = focus.next(),
        (InstallField::UserScope, KeyCode::Char(' ')) => form.user_scope = !form.user_scope,
        (InstallField::ForceUpgrade, KeyCode::Char(' ')) => {
            form.force_upgrade = !form.force_upgrade
        }
        (InstallField::Name | InstallField::Version, code) => {
            let input = if focus == InstallField::Name {
                &mut form.name
            } else {
                &mut form.version
            };
            match code {
                KeyCode::Char(c) => input.insert(c),
                KeyCode::Backspace => {
                    input.delete_back();
                }
                KeyCode::Delete => {
                    input.delete_forward();
                }
                KeyCode::Left => input.move_left(),
                KeyCode::Right => input.move_right(),
                KeyCode::Home => input.move_home(),
                KeyCode::End => input.move_end(),
                _ => return false,
            }
        }
        _ => return false,
    }
    true
}

pub fn render_install(f: &mut Frame, app: &App) {
    let chunks = layout::main_layout(f.area());
    let busy = app.busy_label().map(|l| (l, app.tick));
    layout::render_header(f, "📥 pip 图形化管理工具 · 安装包", busy, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(10), Constraint::Min(0)])
        .split(chunks[1]);

    render_form(f, app, body[0]);
    layout::render_scrollable_content(
        f,
        "安装输出",
        &app.output.lines,
        &app.output.progress,
        app.output.scroll,
        body[1],
    );

    let hint = if app.operation.is_some() {
        "Esc 取消安装 | PgUp/PgDn 滚动输出 | Tab 切换页面"
    } else {
        "↑↓ 切换字段 | Space 勾选 | Enter 安装 | Tab 切换页面 | Ctrl+C 退出"
    };
    layout::render_footer(f, hint, &app.status, chunks[2]);
}

fn render_form(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" 安装包 ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(inner);

    let form = &app.install;
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(rows[0]);
    render_input_box(f, &form.name, "包名:", form.focus == InstallField::Name, cols[0]);
    render_input_box(
        f,
        &form.version,
        "版本(可选):",
        form.focus == InstallField::Version,
        cols[1],
    );

    let tip = if form.name.content().trim().is_empty() {
        "输入要安装的包名，版本留空则安装最新版".to_string()
    } else {
        let mut req = form.name.content().trim().to_string();
        if !form.version.content().trim().is_empty() {
            req = format!("{}=={}", req, form.version.content().trim());
        }
        format!("将执行: pip install {}", req)
    };
    f.render_widget(
        Paragraph::new(tip).style(Style::default().fg(DIM)),
        rows[1].inner(Margin {
            horizontal: 1,
            vertical: 1,
        }),
    );

    f.render_widget(
        Paragraph::new(checkbox(
            "仅为当前用户安装 (--user)",
            form.user_scope,
            form.focus == InstallField::UserScope,
        )),
        rows[2],
    );
    f.render_widget(
        Paragraph::new(checkbox(
            "强制升级 (--upgrade)",
            form.force_upgrade,
            form.focus == InstallField::ForceUpgrade,
        )),
        rows[3],
    );
}

fn checkbox(label: &str, checked: bool, focused: bool) -> Line<'static> {
    let mark = if checked { "[x]" } else { "[ ]" };
    let mut style = Style::default().fg(if checked { OK } else { Color::White });
    if focused {
        style = style.fg(Color::Yellow).add_modifier(Modifier::BOLD);
    }
    Line::from(vec![
        Span::raw(if focused { " ▶ " } else { "   " }),
        Span::styled(format!("{} {}", mark, label), style),
    ])
}
