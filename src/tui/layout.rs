use super::theme::{ACCENT, DIM};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
    Frame,
};

const SPINNER: [&str; 4] = ["⠋", "⠙", "⠹", "⠸"];

/// 标准三段式布局：Header(3) + Content(弹性) + Footer(3)
pub fn main_layout(area: Rect) -> Vec<Rect> {
    Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area)
        .to_vec()
}

/// 渲染 header；有操作在执行时在标题后显示转动的指示符
pub fn render_header(f: &mut Frame, title: &str, busy: Option<(&str, usize)>, area: Rect) {
    let mut spans = vec![Span::styled(
        title.to_string(),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )];
    if let Some((label, tick)) = busy {
        spans.push(Span::raw("   "));
        spans.push(Span::styled(
            format!("{} {}...", SPINNER[tick % SPINNER.len()], label),
            Style::default().fg(Color::Yellow),
        ));
    }
    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Center);
    f.render_widget(header, area);
}

/// 渲染 footer：快捷键提示 + 状态信息
pub fn render_footer(f: &mut Frame, hint: &str, status: &str, area: Rect) {
    let mut spans = vec![Span::styled(format!(" {}", hint), Style::default().fg(Color::Green))];
    if !status.is_empty() {
        spans.push(Span::styled("  │  ", Style::default().fg(DIM)));
        spans.push(Span::styled(status.to_string(), Style::default().fg(Color::White)));
    }
    let footer = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, area);
}

/// 渲染带滚动条的输出区域；`progress` 非空时固定显示在最后一行
pub fn render_scrollable_content(
    f: &mut Frame,
    title: &str,
    lines: &[String],
    progress: &str,
    scroll_offset: usize,
    area: Rect,
) {
    let block = Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let padded = inner.inner(Margin {
        horizontal: 1,
        vertical: 0,
    });

    let reserved = usize::from(!progress.is_empty());
    let total_lines = lines.len();
    let visible_height = (padded.height as usize).saturating_sub(reserved);
    let max_scroll = total_lines.saturating_sub(visible_height);
    let actual_scroll = scroll_offset.min(max_scroll);

    let mut visible_content: Vec<Line> = lines
        .iter()
        .skip(actual_scroll)
        .take(visible_height)
        .map(|line| Line::from(line.clone()))
        .collect();
    if reserved == 1 {
        visible_content.push(Line::from(Span::styled(
            progress.to_string(),
            Style::default().fg(DIM),
        )));
    }

    f.render_widget(Paragraph::new(visible_content), padded);

    if total_lines > visible_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("↑"))
            .end_symbol(Some("↓"));
        let mut scrollbar_state = ScrollbarState::new(max_scroll).position(actual_scroll);
        f.render_stateful_widget(
            scrollbar,
            area.inner(Margin {
                horizontal: 0,
                vertical: 1,
            }),
            &mut scrollbar_state,
        );
    }
}

/// 屏幕中央的矩形区域
pub fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

/// 弹出式提示框，覆盖在当前视图之上
pub fn render_popup(f: &mut Frame, title: &str, body: &[String], color: Color, hint: &str) {
    let height = (body.len() as u16).saturating_add(4);
    let area = centered_rect(f.area().width.saturating_sub(10).min(70), height, f.area());
    f.render_widget(Clear, area);

    let block = Block::default()
        .title(format!(" {} ", title))
        .title_style(Style::default().fg(color).add_modifier(Modifier::BOLD))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let mut lines: Vec<Line> = body.iter().map(|l| Line::from(l.clone())).collect();
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(hint.to_string(), Style::default().fg(ACCENT))));
    let para = Paragraph::new(lines).wrap(Wrap { trim: false });
    f.render_widget(
        para,
        inner.inner(Margin {
            horizontal: 1,
            vertical: 0,
        }),
    );
}

/// 估算输出区域可见行数（总高度减去 header/footer/borders）
pub fn visible_content_height(term_height: u16) -> usize {
    term_height.saturating_sub(8) as usize
}
