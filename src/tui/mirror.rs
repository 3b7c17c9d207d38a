use super::input::render_input_box;
use super::layout;
use super::state::{App, MirrorState, Notice};
use super::theme::{ACCENT, DIM, OK, SEL_BG};
use crate::mirror::{registry, BUILTIN_PROFILES, CUSTOM_ID};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::{Constraint, Direction, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};
use std::path::PathBuf;

fn backup_note(backup: Option<PathBuf>) -> String {
    match backup {
        Some(path) => format!("\n备份文件: {}", path.display()),
        None => String::new(),
    }
}

fn apply_selected(app: &mut App) {
    let id = app.mirror.selected_id();
    let custom = app.mirror.custom_url.content().trim().to_string();
    let custom = (id == CUSTOM_ID).then_some(custom.as_str());

    match app.mirrors.apply_profile(id, custom) {
        Ok(backup) => {
            let name = registry::display_name(id);
            app.mirror.message = Some(format!("成功切换到 {}{}", name, backup_note(backup)));
            app.mirror.editing_custom = false;
            app.output.add_status(&format!("镜像源已切换到 {}", name));
            app.status = format!("当前镜像源: {}", name);
        }
        Err(e) => {
            app.notice = Some(Notice::Error(format!("设置失败: {}", e)));
        }
    }
    app.refresh_mirror_status();
}

fn restore_default(app: &mut App) {
    if !app.mirrors.config_path().exists() {
        app.mirror.message = Some("已经是默认配置".to_string());
        return;
    }
    match app.mirrors.restore_default() {
        Ok(backup) => {
            app.mirror.message = Some(format!("已恢复默认源{}", backup_note(backup)));
            app.output.add_status("已恢复默认源");
            app.status = "当前镜像源: 默认官方源".to_string();
        }
        Err(e) => {
            app.notice = Some(Notice::Error(format!("恢复默认失败: {}", e)));
        }
    }
    app.refresh_mirror_status();
}

/// 处理镜像源视图按键。编辑自定义 URL 时所有字符都进入输入框。
pub fn handle_mirror_key(key: KeyEvent, app: &mut App) -> bool {
    if app.mirror.editing_custom {
        let input = &mut app.mirror.custom_url;
        match key.code {
            KeyCode::Enter => apply_selected(app),
            KeyCode::Esc => app.mirror.editing_custom = false,
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
        return true;
    }

    match key.code {
        KeyCode::Up => {
            app.mirror.selected = app.mirror.selected.saturating_sub(1);
        }
        KeyCode::Down => {
            if app.mirror.selected < MirrorState::CUSTOM_INDEX {
                app.mirror.selected += 1;
            }
        }
        KeyCode::Enter => {
            if app.mirror.selected == MirrorState::CUSTOM_INDEX
                && app.mirror.custom_url.content().trim().is_empty()
            {
                app.mirror.editing_custom = true;
            } else {
                apply_selected(app);
            }
        }
        KeyCode::Char('e') if app.mirror.selected == MirrorState::CUSTOM_INDEX => {
            app.mirror.editing_custom = true;
        }
        KeyCode::Char('d') | KeyCode::Char('D') => restore_default(app),
        _ => return false,
    }
    true
}

pub fn render_mirror(f: &mut Frame, app: &App) {
    let chunks = layout::main_layout(f.area());
    let busy = app.busy_label().map(|l| (l, app.tick));
    layout::render_header(f, "🌐 pip 图形化管理工具 · 镜像源", busy, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(BUILTIN_PROFILES.len() as u16 + 3),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(chunks[1]);

    render_current(f, app, body[0]);
    render_profile_list(f, app, body[1]);
    render_input_box(
        f,
        &app.mirror.custom_url,
        "自定义URL:",
        app.mirror.editing_custom,
        body[2],
    );

    let message = app.mirror.message.as_deref().unwrap_or("");
    let block = Block::default().borders(Borders::ALL).title(" 结果 ");
    f.render_widget(
        Paragraph::new(message)
            .style(Style::default().fg(OK))
            .wrap(Wrap { trim: false })
            .block(block),
        body[3],
    );

    let hint = if app.mirror.editing_custom {
        "输入自定义源 URL | Enter 应用 | Esc 结束编辑"
    } else {
        "↑↓ 选择 | Enter 应用 | e 编辑自定义源 | d 恢复默认 | Tab 切换页面 | Ctrl+C 退出"
    };
    layout::render_footer(f, hint, &app.status, chunks[2]);
}

fn render_current(f: &mut Frame, app: &App, area: Rect) {
    let mut spans = vec![
        Span::styled("当前源: ", Style::default().fg(DIM)),
        Span::styled(
            registry::display_name(&app.mirror.current).to_string(),
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
    ];
    spans.push(Span::styled(
        format!("   ({})", app.mirrors.config_path().display()),
        Style::default().fg(DIM),
    ));
    f.render_widget(
        Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn render_profile_list(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" 镜像源 ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));
    let inner = block.inner(area).inner(Margin {
        horizontal: 1,
        vertical: 0,
    });
    f.render_widget(block, area);

    let entries = BUILTIN_PROFILES
        .iter()
        .map(|p| (p.id.as_ref(), p.display_name.as_ref(), p.index_url.as_ref()))
        .chain(std::iter::once((
            CUSTOM_ID,
            registry::display_name(CUSTOM_ID),
            "手动输入 URL",
        )));

    let lines: Vec<Line> = entries
        .enumerate()
        .map(|(i, (id, name, url))| {
            let selected = i == app.mirror.selected;
            let active = id == app.mirror.current;
            let mut style = Style::default().fg(Color::White);
            if selected {
                style = style.bg(SEL_BG).add_modifier(Modifier::BOLD);
            }
            Line::from(vec![
                Span::styled(if active { "● " } else { "  " }, Style::default().fg(OK)),
                Span::styled(format!("{:<8}", name), style),
                Span::styled(format!("  {}", url), Style::default().fg(DIM)),
            ])
        })
        .collect();

    f.render_widget(Paragraph::new(lines), inner);
}
