use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

/// 单行文本输入，光标按字符计数（非字节），支持中英文
#[derive(Debug, Clone, Default)]
pub struct TextInput {
    content: String,
    cursor: usize,
}

impl TextInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn clear(&mut self) {
        self.content.clear();
        self.cursor = 0;
    }

    pub fn insert(&mut self, c: char) {
        let byte_pos = char_to_byte(&self.content, self.cursor);
        self.content.insert(byte_pos, c);
        self.cursor += 1;
    }

    /// Backspace：删除光标前的字符，返回内容是否改变
    pub fn delete_back(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        let start = char_to_byte(&self.content, self.cursor);
        let end = char_to_byte(&self.content, self.cursor + 1);
        self.content.drain(start..end);
        true
    }

    /// Delete：删除光标后的字符
    pub fn delete_forward(&mut self) -> bool {
        if self.cursor >= self.content.chars().count() {
            return false;
        }
        let start = char_to_byte(&self.content, self.cursor);
        let end = char_to_byte(&self.content, self.cursor + 1);
        self.content.drain(start..end);
        true
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        if self.cursor < self.content.chars().count() {
            self.cursor += 1;
        }
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.content.chars().count();
    }
}

/// UTF-8 安全的字符位置转字节位置
fn char_to_byte(s: &str, char_pos: usize) -> usize {
    s.char_indices()
        .nth(char_pos)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// 渲染输入框：label + 文本 + 光标
pub fn render_input_box(f: &mut Frame, input: &TextInput, label: &str, focused: bool, area: Rect) {
    let border_color = if focused { Color::Yellow } else { Color::DarkGray };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color));

    let chars: Vec<char> = input.content.chars().collect();
    let cursor = input.cursor.min(chars.len());
    let before: String = chars[..cursor].iter().collect();
    let cursor_char = chars.get(cursor).map(|c| c.to_string()).unwrap_or_else(|| " ".to_string());
    let after: String = chars.get(cursor + 1..).map(|s| s.iter().collect()).unwrap_or_default();

    let cursor_style = if focused {
        Style::default().fg(Color::Black).bg(Color::White)
    } else {
        Style::default().fg(Color::White)
    };

    let spans = vec![
        Span::styled(
            format!("{label} "),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(before, Style::default().fg(Color::White)),
        Span::styled(cursor_char, cursor_style),
        Span::styled(after, Style::default().fg(Color::White)),
    ];

    f.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}
