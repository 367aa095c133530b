//! 文本模式匹配
//!
//! `match_text` 是纯函数：按顺序尝试规则，第一条成功的规则胜出。
//! `RuleBook` 在其上维护会话级状态，负责禁用运行时表现异常的规则。

use std::collections::HashSet;

use regex::Regex;

use crate::reconcile::config::{constants, LocaleConfig};
use crate::reconcile::error::{ReconcileError, ReconcileResult};
use crate::reconcile::locale::{LocaleEntry, LocaleTable};

/// 提取规则
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    locale: String,
    regex: Regex,
    template: String,
    max_text_len: Option<usize>,
}

impl ExtractionRule {
    /// 构建规则；正则必须能编译并且恰好含有一个捕获分组
    pub fn new(locale: &str, pattern: &str) -> ReconcileResult<Self> {
        let malformed = |reason: String| ReconcileError::MalformedRule {
            locale: locale.to_string(),
            pattern: pattern.to_string(),
            reason,
        };

        let regex = Regex::new(pattern).map_err(|e| malformed(e.to_string()))?;

        // captures_len 包含整体匹配的第 0 组
        let groups = regex.captures_len() - 1;
        if groups != 1 {
            return Err(malformed(format!(
                "expected exactly one capture group, found {}",
                groups
            )));
        }

        Ok(Self {
            locale: locale.to_string(),
            regex,
            template: constants::DEFAULT_FORMATTER.to_string(),
            max_text_len: None,
        })
    }

    /// 设置输出模板，模板必须包含 `{value}`
    pub fn with_template(mut self, template: &str) -> ReconcileResult<Self> {
        if !template.contains("{value}") {
            return Err(ReconcileError::MalformedRule {
                locale: self.locale.clone(),
                pattern: self.regex.as_str().to_string(),
                reason: format!("formatter {:?} has no {{value}} placeholder", template),
            });
        }
        self.template = template.to_string();
        Ok(self)
    }

    pub fn with_max_text_len(mut self, max_text_len: Option<usize>) -> Self {
        self.max_text_len = max_text_len;
        self
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// 生成规范文本
    pub fn format(&self, value: &str) -> String {
        self.template.replace("{value}", value)
    }

    fn accepts_length(&self, text: &str) -> bool {
        match self.max_text_len {
            Some(limit) => text.chars().count() < limit,
            None => true,
        }
    }
}

/// 单次匹配结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// 规则 `rule` 提取到了 `value`
    Value { value: String, rule: usize },
    /// 规则 `rule` 匹配了文本但没有得到有效的捕获值
    Malformed { rule: usize },
}

/// 按顺序匹配文本
///
/// 文本先去除首尾空白；`disabled` 中的规则被跳过。
pub fn match_text(
    text: &str,
    rules: &[ExtractionRule],
    disabled: &HashSet<usize>,
) -> Option<MatchOutcome> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    for (index, rule) in rules.iter().enumerate() {
        if disabled.contains(&index) || !rule.accepts_length(text) {
            continue;
        }

        let Some(captures) = rule.regex.captures(text) else {
            continue;
        };

        return match captures.get(1).map(|m| m.as_str()) {
            Some(value) if !value.is_empty() => Some(MatchOutcome::Value {
                value: value.to_string(),
                rule: index,
            }),
            _ => Some(MatchOutcome::Malformed { rule: index }),
        };
    }

    None
}

/// 一次成功的提取
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub value: String,
    pub locale: String,
    /// 按语言模板生成的规范文本
    pub canonical: String,
}

/// 会话级规则集
///
/// 运行时表现异常的规则只报告一次，随后在整个会话中被禁用。
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    rules: Vec<ExtractionRule>,
    disabled: HashSet<usize>,
    rejected: Vec<ReconcileError>,
    /// 首个启用语言的输出模板
    formatter: Option<String>,
}

impl RuleBook {
    pub fn new(rules: Vec<ExtractionRule>) -> Self {
        Self {
            rules,
            disabled: HashSet::new(),
            rejected: Vec::new(),
            formatter: None,
        }
    }

    /// 根据语言配置和检测到的文档语言构建规则集
    ///
    /// 无法构建的规则会记录警告并跳过，其余规则照常生效。
    pub fn from_config(config: &LocaleConfig, detected: Option<&str>) -> Self {
        let table = LocaleTable::builtin(config.fallback_max_text_len).merge(&config.entries);
        let entries = table.select(&config.active, detected);
        Self::from_entries(&entries)
    }

    pub fn from_entries(entries: &[&LocaleEntry]) -> Self {
        let mut book = Self {
            formatter: entries
                .first()
                .map(|entry| entry.formatter.clone())
                .filter(|formatter| formatter.contains("{value}")),
            ..Self::default()
        };

        for entry in entries {
            for pattern in &entry.patterns {
                let rule = ExtractionRule::new(&entry.tag, pattern)
                    .and_then(|rule| rule.with_template(&entry.formatter))
                    .map(|rule| rule.with_max_text_len(entry.max_text_len));

                match rule {
                    Ok(rule) => book.rules.push(rule),
                    Err(e) => {
                        tracing::warn!("跳过无效规则: {}", e);
                        book.rejected.push(e);
                    }
                }
            }
        }

        book
    }

    /// 提取文本中的值并生成规范文本
    pub fn extract(&mut self, text: &str) -> Option<Extraction> {
        loop {
            match match_text(text, &self.rules, &self.disabled)? {
                MatchOutcome::Value { value, rule } => {
                    let rule = &self.rules[rule];
                    return Some(Extraction {
                        canonical: rule.format(&value),
                        locale: rule.locale.clone(),
                        value,
                    });
                }
                MatchOutcome::Malformed { rule } => {
                    let e = ReconcileError::MalformedRule {
                        locale: self.rules[rule].locale.clone(),
                        pattern: self.rules[rule].pattern().to_string(),
                        reason: "capture group did not produce a value".to_string(),
                    };
                    tracing::warn!("规则已禁用: {}", e);
                    self.disabled.insert(rule);
                    self.rejected.push(e);
                }
            }
        }
    }

    /// 用首个启用语言的模板格式化一个不经规则提取的值
    pub fn format_value(&self, value: &str) -> String {
        self.formatter
            .as_deref()
            .unwrap_or(constants::DEFAULT_FORMATTER)
            .replace("{value}", value)
    }

    pub fn rules(&self) -> &[ExtractionRule] {
        &self.rules
    }

    pub fn is_disabled(&self, index: usize) -> bool {
        self.disabled.contains(&index)
    }

    /// 构建或运行时被拒绝的规则
    pub fn rejected(&self) -> &[ReconcileError] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(active: &[&str]) -> RuleBook {
        let config = LocaleConfig {
            active: active.iter().map(|s| s.to_string()).collect(),
            ..LocaleConfig::default()
        };
        RuleBook::from_config(&config, None)
    }

    #[test]
    fn test_locale_dispatch() {
        let mut ja = book(&["ja"]);
        assert_eq!(ja.extract("7 件のレビュー").unwrap().canonical, "(7)");

        let mut en = book(&["en"]);
        let extraction = en.extract("12 customer reviews").unwrap();
        assert_eq!(extraction.canonical, "(12)");
        assert_eq!(extraction.locale, "en");

        let mut fr = book(&["fr"]);
        assert_eq!(fr.extract("3 avis").unwrap().canonical, "(3)");

        let mut all = book(&[]);
        assert!(all.extract("Free Shipping").is_none());
    }

    #[test]
    fn test_non_breaking_space_between_number_and_keyword() {
        let mut en = book(&["en"]);
        assert_eq!(en.extract("12\u{00A0}reviews").unwrap().value, "12");

        let mut ja = book(&["ja"]);
        assert_eq!(ja.extract(" 7\u{00A0}件のレビュー ").unwrap().value, "7");
    }

    #[test]
    fn test_only_ascii_digits_are_counts() {
        let mut all = book(&[]);
        assert!(all.extract("１２ reviews").is_none());
        assert!(all.extract("١٢ avis").is_none());
        assert!(all.extract("١٢").is_none());
        assert_eq!(all.extract("12 reviews").unwrap().value, "12");
    }

    #[test]
    fn test_earlier_rule_wins() {
        let rules = vec![
            ExtractionRule::new("a", r"(\d+) reviews").unwrap(),
            ExtractionRule::new("b", r"(\d+)").unwrap(),
        ];
        let outcome = match_text("5 reviews", &rules, &HashSet::new());
        assert_eq!(
            outcome,
            Some(MatchOutcome::Value {
                value: "5".to_string(),
                rule: 0
            })
        );
    }

    #[test]
    fn test_fallback_respects_length_threshold() {
        let mut generic = book(&["generic"]);
        assert_eq!(generic.extract("42").unwrap().canonical, "(42)");

        let long = format!("{} 42", "x".repeat(60));
        assert!(generic.extract(&long).is_none());
    }

    #[test]
    fn test_construction_rejects_wrong_group_count() {
        assert!(matches!(
            ExtractionRule::new("en", r"\d+ reviews"),
            Err(ReconcileError::MalformedRule { .. })
        ));
        assert!(matches!(
            ExtractionRule::new("en", r"(\d+) (reviews)"),
            Err(ReconcileError::MalformedRule { .. })
        ));
        assert!(ExtractionRule::new("en", r"(\d+").is_err());
        assert!(ExtractionRule::new("en", r"(\d+)")
            .unwrap()
            .with_template("no placeholder")
            .is_err());
    }

    #[test]
    fn test_malformed_rule_is_disabled_once() {
        let mut book = RuleBook::new(vec![
            ExtractionRule::new("broken", r"reviews(\d*)").unwrap(),
            ExtractionRule::new("en", r"(\d+)\s*reviews").unwrap(),
        ]);

        assert_eq!(book.extract("4 reviews").unwrap().canonical, "(4)");
        assert!(book.is_disabled(0));
        assert_eq!(book.rejected().len(), 1);

        assert_eq!(book.extract("9 reviews").unwrap().canonical, "(9)");
        assert_eq!(book.rejected().len(), 1);
    }

    #[test]
    fn test_invalid_config_entries_are_skipped() {
        let good = LocaleEntry::new("en", &[r"(\d+) reviews"]);
        let bad = LocaleEntry::new("xx", &[r"no group", r"(\d+) stars"]);
        let book = RuleBook::from_entries(&[&bad, &good]);
        assert_eq!(book.len(), 2);
        assert_eq!(book.rejected().len(), 1);
    }

    #[test]
    fn test_format_value_uses_first_active_locale() {
        let mut fr = LocaleEntry::new("fr", &[r"(\d+) avis"]);
        fr.formatter = "[{value}]".to_string();
        let en = LocaleEntry::new("en", &[r"(\d+) reviews"]);

        assert_eq!(RuleBook::from_entries(&[&fr, &en]).format_value("8"), "[8]");
        assert_eq!(RuleBook::from_entries(&[&en, &fr]).format_value("8"), "(8)");
        assert_eq!(RuleBook::default().format_value("8"), "(8)");
    }
}
