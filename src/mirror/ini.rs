//! pip 配置文件（INI 格式）的保序读写。
//!
//! 只改动需要改的键，其余节、键、注释和空行原样保留。

use crate::error::{PipError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// `key = value`；续行（缩进行）以 `\n` 拼接在 value 中
    Entry { key: String, value: String },
    /// 注释、空行
    Verbatim(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    name: String,
    lines: Vec<Line>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    /// 第一个节之前的注释和空行
    preamble: Vec<String>,
    sections: Vec<Section>,
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with('#') || trimmed.starts_with(';')
}

fn keys_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

impl IniDocument {
    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = IniDocument::default();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() || is_comment(trimmed) {
                match doc.sections.last_mut() {
                    Some(section) => section.lines.push(Line::Verbatim(raw.to_string())),
                    None => doc.preamble.push(raw.to_string()),
                }
                continue;
            }

            // 缩进行是上一个键的续行（如多行 trusted-host）
            if raw.starts_with([' ', '\t']) {
                let last_entry = doc
                    .sections
                    .last_mut()
                    .and_then(|s| s.lines.iter_mut().rev().find(|l| matches!(l, Line::Entry { .. })));
                if let Some(Line::Entry { value, .. }) = last_entry {
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    value.push_str(trimmed);
                    continue;
                }
                return Err(PipError::Parse {
                    line: line_no,
                    message: "续行前没有键".to_string(),
                });
            }

            if let Some(rest) = trimmed.strip_prefix('[') {
                let (name, tail) = rest.split_once(']').ok_or_else(|| PipError::Parse {
                    line: line_no,
                    message: format!("节标题缺少 ']': {}", trimmed),
                })?;
                // `]` 之后只允许注释
                let tail = tail.trim();
                if !tail.is_empty() && !is_comment(tail) {
                    return Err(PipError::Parse {
                        line: line_no,
                        message: format!("节标题后有多余内容: {}", trimmed),
                    });
                }
                doc.sections.push(Section {
                    name: name.trim().to_string(),
                    lines: Vec::new(),
                });
                continue;
            }

            let split_at = trimmed.find(['=', ':']).ok_or_else(|| PipError::Parse {
                line: line_no,
                message: format!("无法识别的行: {}", trimmed),
            })?;
            let key = trimmed[..split_at].trim();
            let value = trimmed[split_at + 1..].trim();
            if key.is_empty() {
                return Err(PipError::Parse {
                    line: line_no,
                    message: "键名为空".to_string(),
                });
            }
            let section = doc.sections.last_mut().ok_or_else(|| PipError::Parse {
                line: line_no,
                message: "键值出现在任何节之前".to_string(),
            })?;
            section.lines.push(Line::Entry {
                key: key.to_string(),
                value: value.to_string(),
            });
        }

        Ok(doc)
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?.lines.iter().find_map(|line| match line {
            Line::Entry { key: k, value } if keys_match(k, key) => Some(value.as_str()),
            _ => None,
        })
    }

    /// 设置键值，节或键不存在时追加
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        let idx = match self.sections.iter().position(|s| s.name == section) {
            Some(idx) => idx,
            None => {
                self.sections.push(Section {
                    name: section.to_string(),
                    lines: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        let lines = &mut self.sections[idx].lines;
        let existing = lines.iter_mut().find_map(|line| match line {
            Line::Entry { key: k, value } if keys_match(k, key) => Some(value),
            _ => None,
        });
        match existing {
            Some(v) => *v = value.to_string(),
            None => {
                // 插在节末尾的空行之前，保持节之间的空行分隔
                let at = lines
                    .iter()
                    .rposition(|l| !matches!(l, Line::Verbatim(t) if t.trim().is_empty()))
                    .map(|p| p + 1)
                    .unwrap_or(0);
                lines.insert(
                    at,
                    Line::Entry {
                        key: key.to_string(),
                        value: value.to_string(),
                    },
                );
            }
        }
    }

    /// 删除键，返回是否存在过
    pub fn remove(&mut self, section: &str, key: &str) -> bool {
        let Some(section) = self.sections.iter_mut().find(|s| s.name == section) else {
            return false;
        };
        let before = section.lines.len();
        section
            .lines
            .retain(|line| !matches!(line, Line::Entry { key: k, .. } if keys_match(k, key)));
        section.lines.len() != before
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        for section in &self.sections {
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for line in &section.lines {
                match line {
                    Line::Entry { key, value } => {
                        out.push_str(key);
                        out.push_str(" = ");
                        out.push_str(&value.replace('\n', "\n    "));
                        out.push('\n');
                    }
                    Line::Verbatim(text) => {
                        out.push_str(text);
                        out.push('\n');
                    }
                }
            }
        }
        out
    }
}
