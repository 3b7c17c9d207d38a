//! 内置镜像源列表

use std::borrow::Cow;

pub const DEFAULT_ID: &str = "default";
pub const CUSTOM_ID: &str = "custom";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorProfile {
    pub id: Cow<'static, str>,
    pub display_name: Cow<'static, str>,
    pub index_url: Cow<'static, str>,
    pub trusted_host: Option<Cow<'static, str>>,
}

impl MirrorProfile {
    const fn builtin(
        id: &'static str,
        display_name: &'static str,
        index_url: &'static str,
        trusted_host: &'static str,
    ) -> Self {
        Self {
            id: Cow::Borrowed(id),
            display_name: Cow::Borrowed(display_name),
            index_url: Cow::Borrowed(index_url),
            trusted_host: Some(Cow::Borrowed(trusted_host)),
        }
    }

    /// 用户自定义源，不设置 trusted-host
    pub fn custom(index_url: impl Into<String>) -> Self {
        Self {
            id: Cow::Borrowed(CUSTOM_ID),
            display_name: Cow::Borrowed("自定义源"),
            index_url: Cow::Owned(index_url.into()),
            trusted_host: None,
        }
    }
}

pub static BUILTIN_PROFILES: [MirrorProfile; 6] = [
    MirrorProfile::builtin(DEFAULT_ID, "默认官方源", "https://pypi.org/simple", "pypi.org"),
    MirrorProfile::builtin(
        "tsinghua",
        "清华大学",
        "https://pypi.tuna.tsinghua.edu.cn/simple",
        "pypi.tuna.tsinghua.edu.cn",
    ),
    MirrorProfile::builtin(
        "aliyun",
        "阿里云",
        "https://mirrors.aliyun.com/pypi/simple/",
        "mirrors.aliyun.com",
    ),
    MirrorProfile::builtin(
        "douban",
        "豆瓣",
        "https://pypi.douban.com/simple/",
        "pypi.douban.com",
    ),
    MirrorProfile::builtin(
        "ustc",
        "中科大",
        "https://pypi.mirrors.ustc.edu.cn/simple/",
        "pypi.mirrors.ustc.edu.cn",
    ),
    MirrorProfile::builtin(
        "tencent",
        "腾讯云",
        "https://mirrors.cloud.tencent.com/pypi/simple",
        "mirrors.cloud.tencent.com",
    ),
];

pub fn find_by_id(id: &str) -> Option<&'static MirrorProfile> {
    BUILTIN_PROFILES.iter().find(|p| p.id == id)
}

/// 按 URL 精确匹配（区分大小写）
pub fn find_by_url(url: &str) -> Option<&'static MirrorProfile> {
    BUILTIN_PROFILES.iter().find(|p| p.index_url == url)
}

/// 界面显示名，未知 id 原样返回
pub fn display_name(id: &str) -> &str {
    if id == CUSTOM_ID {
        return "自定义源";
    }
    find_by_id(id).map(|p| p.display_name.as_ref()).unwrap_or(id)
}
