//! pip 输出解析：freeze 列表、终端控制序列清理、失败原因分类

use super::types::{ErrorKind, PackageRecord};
use once_cell::sync::Lazy;
use regex::Regex;

/// 失败特征表，按优先级排列，先匹配者生效
static FAILURE_SIGNATURES: Lazy<Vec<(Regex, ErrorKind)>> = Lazy::new(|| {
    [
        (
            r"(?i)ERROR: Could not find a version that satisfies the requirement",
            ErrorKind::NotFound,
        ),
        (
            r"(?i)ERROR: Could not install packages due to an OSError",
            ErrorKind::Network,
        ),
        (
            r"(?i)ERROR: Could not install packages due to an EnvironmentError: \[Errno 13\]",
            ErrorKind::Permission,
        ),
        (r"(?i)ERROR: Cannot uninstall '.*'", ErrorKind::DependencyConflict),
    ]
    .into_iter()
    .filter_map(|(pattern, kind)| match Regex::new(pattern) {
        Ok(re) => Some((re, kind)),
        Err(e) => {
            log::error!("失败特征正则无效 {}: {}", pattern, e);
            None
        }
    })
    .collect()
});

/// 对失败输出做分类，无匹配时返回 Unknown
pub fn classify_failure(output: &str) -> ErrorKind {
    FAILURE_SIGNATURES
        .iter()
        .find(|(re, _)| re.is_match(output))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}

/// 解析 `pip list --format=freeze` 输出；`-e ...`、`name @ url` 等非 `==` 行跳过
pub fn parse_freeze(output: &str) -> Vec<PackageRecord> {
    output
        .lines()
        .filter_map(|line| {
            let (name, version) = line.split_once("==")?;
            let name = name.trim();
            let version = version.trim();
            if name.is_empty() || name.starts_with('-') || name.starts_with('#') {
                return None;
            }
            Some(PackageRecord::new(name, version))
        })
        .collect()
}

/// 清理单行终端输出中的 ANSI 转义序列和控制字符
pub fn clean_terminal_output(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.peek() {
                // CSI: ESC [ ... 字母
                Some('[') => {
                    chars.next();
                    for next in chars.by_ref() {
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
                // OSC: ESC ] ... BEL
                Some(']') => {
                    chars.next();
                    for next in chars.by_ref() {
                        if next == '\x07' {
                            break;
                        }
                    }
                }
                _ => {}
            },
            '\t' => result.push(c),
            c if c.is_control() => {}
            _ => result.push(c),
        }
    }

    result.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_lines_are_parsed_and_noise_skipped() {
        let output = "\
requests==2.31.0
-e git+https://example.com/repo.git@abc#egg=local_pkg
numpy == 1.26.4
mypkg @ file:///tmp/mypkg
WARNING: You are using pip version 21.0
";
        let records = parse_freeze(output);
        assert_eq!(
            records,
            vec![
                PackageRecord::new("requests", "2.31.0"),
                PackageRecord::new("numpy", "1.26.4"),
            ]
        );
    }

    #[test]
    fn not_found_wins_over_permission() {
        let output = "\
ERROR: Could not install packages due to an EnvironmentError: [Errno 13] Permission denied
ERROR: Could not find a version that satisfies the requirement nosuchpkg
";
        assert_eq!(classify_failure(output), ErrorKind::NotFound);
    }

    #[test]
    fn each_signature_maps_to_its_kind() {
        assert_eq!(
            classify_failure("ERROR: Could not install packages due to an OSError: HTTPSConnectionPool"),
            ErrorKind::Network
        );
        assert_eq!(
            classify_failure(
                "error: could not install packages due to an environmenterror: [errno 13] denied"
            ),
            ErrorKind::Permission
        );
        assert_eq!(
            classify_failure("ERROR: Cannot uninstall 'PyYAML'. It is a distutils installed project"),
            ErrorKind::DependencyConflict
        );
        assert_eq!(classify_failure("Segmentation fault"), ErrorKind::Unknown);
        assert_eq!(classify_failure(""), ErrorKind::Unknown);
    }

    #[test]
    fn escape_sequences_are_stripped() {
        assert_eq!(
            clean_terminal_output("\x1b[32mSuccessfully installed\x1b[0m six-1.16.0\r"),
            "Successfully installed six-1.16.0"
        );
        assert_eq!(clean_terminal_output("\x1b]0;title\x07Collecting x"), "Collecting x");
        assert_eq!(clean_terminal_output("a\tb\x08"), "a\tb");
    }
}
