//! 已安装包列表的视图模型：去重、排序、过滤

use super::types::PackageRecord;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct PackageList {
    /// 全部包，按名称（忽略大小写）排序
    all: Vec<PackageRecord>,
    /// 当前显示的包在 `all` 中的下标
    visible: Vec<usize>,
    query: String,
}

fn sort_key(name: &str) -> String {
    name.to_lowercase()
}

impl PackageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// 替换整个列表。名称忽略大小写去重（后出现者覆盖），并重新应用当前过滤条件。
    pub fn update(&mut self, records: Vec<PackageRecord>) {
        let mut by_name: HashMap<String, PackageRecord> = HashMap::with_capacity(records.len());
        for record in records {
            by_name.insert(sort_key(&record.name), record);
        }
        let mut all: Vec<PackageRecord> = by_name.into_values().collect();
        all.sort_by(|a, b| {
            sort_key(&a.name)
                .cmp(&sort_key(&b.name))
                .then_with(|| a.name.cmp(&b.name))
        });
        self.all = all;
        let query = std::mem::take(&mut self.query);
        self.filter(&query);
    }

    /// 按名称子串过滤（忽略大小写），空查询显示全部
    pub fn filter(&mut self, query: &str) {
        self.query = query.trim().to_string();
        let needle = self.query.to_lowercase();
        self.visible = self
            .all
            .iter()
            .enumerate()
            .filter(|(_, r)| needle.is_empty() || r.name.to_lowercase().contains(&needle))
            .map(|(i, _)| i)
            .collect();
    }

    pub fn visible(&self) -> Vec<&PackageRecord> {
        self.visible.iter().map(|&i| &self.all[i]).collect()
    }

    pub fn get(&self, visible_index: usize) -> Option<&PackageRecord> {
        self.visible.get(visible_index).map(|&i| &self.all[i])
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn total(&self) -> usize {
        self.all.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        let key = sort_key(name);
        self.all.iter().any(|r| sort_key(&r.name) == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<PackageRecord> {
        vec![
            PackageRecord::new("requests", "2.31.0"),
            PackageRecord::new("Django", "5.0.1"),
            PackageRecord::new("attrs", "23.2.0"),
            PackageRecord::new("PyYAML", "6.0.1"),
            PackageRecord::new("pytest", "8.0.0"),
        ]
    }

    fn names(list: &PackageList) -> Vec<String> {
        list.visible().into_iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn empty_filter_shows_everything_sorted() {
        let mut list = PackageList::new();
        list.update(sample());
        list.filter("");
        assert_eq!(names(&list), ["attrs", "Django", "pytest", "PyYAML", "requests"]);
        assert_eq!(list.len(), list.total());
    }

    #[test]
    fn filter_is_case_insensitive_substring() {
        let mut list = PackageList::new();
        list.update(sample());
        list.filter("PY");
        assert_eq!(names(&list), ["pytest", "PyYAML"]);

        list.filter("  yaml ");
        assert_eq!(names(&list), ["PyYAML"]);

        list.filter("zzz");
        assert!(list.is_empty());
    }

    #[test]
    fn filter_is_idempotent() {
        let mut list = PackageList::new();
        list.update(sample());
        list.filter("t");
        let first = names(&list);
        list.filter("t");
        assert_eq!(names(&list), first);
        assert_eq!(first, ["attrs", "pytest", "requests"]);
    }

    #[test]
    fn update_keeps_active_query_and_dedups_names() {
        let mut list = PackageList::new();
        list.filter("re");
        list.update(vec![
            PackageRecord::new("requests", "2.30.0"),
            PackageRecord::new("Requests", "2.31.0"),
            PackageRecord::new("six", "1.16.0"),
        ]);
        assert_eq!(list.total(), 2);
        assert_eq!(list.query(), "re");
        let visible = list.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].version, "2.31.0");
        assert!(list.contains("REQUESTS"));
        assert!(list.get(1).is_none());
    }
}
