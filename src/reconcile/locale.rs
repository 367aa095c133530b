//! 语言规则表
//!
//! 每个语言标签对应一组有序的提取正则和一个输出模板。内置表覆盖
//! `ja`、`zh`、`en`、`fr`、`it`、`de`、`es` 以及最低优先级的 `generic`
//! 纯数字兜底规则；配置文件中的条目按标签整体替换内置条目。

use markup5ever_rcdom::Handle;
use serde::{Deserialize, Serialize};

use crate::parsers::html::dom::{find_first, get_node_attr, text_content};
use crate::reconcile::config::constants;

/// 兜底规则使用的语言标签
pub const GENERIC_LOCALE: &str = "generic";

/// 单个语言的规则条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleEntry {
    pub tag: String,
    /// 按优先级排列的正则，每条必须恰好有一个捕获分组
    pub patterns: Vec<String>,
    /// 输出模板，`{value}` 会被替换为提取到的值
    #[serde(default = "default_formatter")]
    pub formatter: String,
    /// 文本长度上限（字符数），超过时该语言的规则不参与匹配
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_text_len: Option<usize>,
}

fn default_formatter() -> String {
    constants::DEFAULT_FORMATTER.to_string()
}

impl LocaleEntry {
    pub fn new(tag: &str, patterns: &[&str]) -> Self {
        Self {
            tag: tag.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            formatter: default_formatter(),
            max_text_len: None,
        }
    }

    pub fn with_max_text_len(mut self, max_text_len: usize) -> Self {
        self.max_text_len = Some(max_text_len);
        self
    }
}

/// 语言规则表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleTable {
    entries: Vec<LocaleEntry>,
}

impl LocaleTable {
    /// 内置规则表
    pub fn builtin(fallback_max_text_len: usize) -> Self {
        let entries = vec![
            LocaleEntry::new(
                "ja",
                &[
                    r"([0-9]+)\s*件のレビュー",
                    r"([0-9]+)\s*のレビュー",
                    r"([0-9]+)\s*件の評価",
                    r"レビュー\s*[（(]?\s*([0-9]+)\s*件?[）)]?",
                ],
            ),
            LocaleEntry::new(
                "zh",
                &[r"([0-9]+)\s*条评价", r"([0-9]+)\s*条评论", r"([0-9]+)\s*則評論"],
            ),
            LocaleEntry::new(
                "en",
                &[
                    r"(?i)based\s*on\s*([0-9]+)\s*reviews?",
                    r"(?i)([0-9]+)\s*verified\s*reviews?",
                    r"(?i)([0-9]+)\s*customer\s*reviews?",
                    r"(?i)([0-9]+)\s*review\(s\)",
                    r"(?i)([0-9]+)\s*reviews?",
                    r"(?i)([0-9]+)\s*ratings?",
                ],
            ),
            LocaleEntry::new("fr", &[r"(?i)([0-9]+)\s*avis"]),
            LocaleEntry::new("it", &[r"(?i)([0-9]+)\s*recensioni"]),
            LocaleEntry::new("de", &[r"(?i)([0-9]+)\s*bewertungen"]),
            LocaleEntry::new("es", &[r"(?i)([0-9]+)\s*reseñas"]),
            LocaleEntry::new(GENERIC_LOCALE, &[r"([0-9]+)"]).with_max_text_len(fallback_max_text_len),
        ];

        Self { entries }
    }

    /// 从条目列表构建
    pub fn from_entries(entries: Vec<LocaleEntry>) -> Self {
        Self { entries }
    }

    /// 合并覆盖条目：同标签替换，新标签插入到 `generic` 之前
    pub fn merge(mut self, overrides: &[LocaleEntry]) -> Self {
        for entry in overrides {
            if let Some(existing) = self.entries.iter_mut().find(|e| e.tag == entry.tag) {
                *existing = entry.clone();
                continue;
            }
            let position = self
                .entries
                .iter()
                .position(|e| e.tag == GENERIC_LOCALE)
                .unwrap_or(self.entries.len());
            self.entries.insert(position, entry.clone());
        }
        self
    }

    pub fn get(&self, tag: &str) -> Option<&LocaleEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    pub fn tags(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.tag.as_str()).collect()
    }

    /// 按启用列表选出条目
    ///
    /// `active` 非空时严格按给定顺序返回；为空时返回全部条目，
    /// 并把检测到的文档语言提前到最前（`generic` 始终最后）。
    pub fn select(&self, active: &[String], detected: Option<&str>) -> Vec<&LocaleEntry> {
        if !active.is_empty() {
            return active
                .iter()
                .filter_map(|tag| {
                    let entry = self.get(tag);
                    if entry.is_none() {
                        tracing::warn!("未知的语言标签: {}", tag);
                    }
                    entry
                })
                .collect();
        }

        let mut selected: Vec<&LocaleEntry> = self.entries.iter().collect();
        if let Some(tag) = detected {
            if let Some(index) = selected
                .iter()
                .position(|e| e.tag == tag && e.tag != GENERIC_LOCALE)
            {
                let entry = selected.remove(index);
                selected.insert(0, entry);
            }
        }
        selected
    }
}

/// 检测文档语言
///
/// 优先读取 `<html lang>` 的主标签；没有时若正文含有假名则判定为 `ja`。
pub fn detect_document_locale(document: &Handle) -> Option<String> {
    let html = find_first(document, "html")?;

    if let Some(lang) = get_node_attr(&html, "lang") {
        let primary = lang
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if !primary.is_empty() {
            return Some(primary);
        }
    }

    let body = find_first(&html, "body")?;
    if contains_kana(&text_content(&body)) {
        return Some("ja".to_string());
    }

    None
}

fn contains_kana(text: &str) -> bool {
    text.chars()
        .any(|c| matches!(c, '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}'))
}
