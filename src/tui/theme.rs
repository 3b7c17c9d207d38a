//! 界面配色，全局统一使用

use ratatui::style::Color;

/// 强调色（标题、选中项）
pub const ACCENT: Color = Color::Rgb(91, 206, 250);
/// 标记待卸载的包
pub const MARKED: Color = Color::Rgb(245, 169, 184);
/// 选中行背景色
pub const SEL_BG: Color = Color::Rgb(45, 35, 55);
pub const OK: Color = Color::Rgb(120, 200, 120);
pub const WARN: Color = Color::Rgb(230, 190, 90);
pub const ERR: Color = Color::Rgb(235, 100, 100);
/// 暗灰色（次要信息）
pub const DIM: Color = Color::Rgb(130, 130, 140);
