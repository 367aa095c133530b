//! 收敛引擎配置管理模块
//!
//! 提供配置加载、验证和环境变量覆盖。所有字段都有默认值，
//! 配置文件只需要写出与默认值不同的部分。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reconcile::error::{ReconcileError, ReconcileResult};
use crate::reconcile::locale::LocaleEntry;
use crate::reconcile::observer::RetryPolicy;
use crate::reconcile::rewriter::SettlementMode;

/// 引擎配置常量
pub mod constants {
    pub const CONFIG_PATHS: &[&str] = &[
        "reconciler.toml",
        ".reconciler.toml",
        "~/.config/storefront-reconciler/config.toml",
    ];

    pub const DEFAULT_SELECTORS: &[&str] = &[
        ".jdgm-prev-badge__text",
        ".jdgm-preview-badge .jdgm-prev-badge__text",
        ".jdgm-widget .jdgm-prev-badge__text",
        ".judgeme-review-count",
        ".review-count",
        ".product-review-count",
        "[class*=\"jdgm\"][class*=\"text\"]",
        "[class*=\"review\"][class*=\"count\"]",
        "[class*=\"review\"][class*=\"text\"]",
    ];

    /// 文本无法匹配时，依次读取这些属性中的数值
    pub const VALUE_ATTRIBUTES: &[&str] = &["data-number-of-reviews"];

    pub const MARKER_ATTRIBUTE: &str = "data-reconciled";
    pub const OVERLAY_CLASS: &str = "reconcile-overlay";
    pub const STYLESHEET_ID: &str = "reconcile-style";

    pub const CONTEXT_CLASSES: &[&str] = &["jdgm", "review"];
    pub const WALK_KEYWORD_PATTERN: &str =
        r"(?i)[0-9]+.*(?:review|レビュー|評価|avis|recensioni|bewertungen|reseñas|评价|评论)";
    pub const WALK_MAX_TEXT_LEN: usize = 100;
    pub const FALLBACK_MAX_TEXT_LEN: usize = 50;
    pub const DEFAULT_FORMATTER: &str = "({value})";

    pub const STYLE_PAYLOAD: &[(&str, &str)] = &[
        ("font-size", "12px"),
        ("color", "#666"),
        ("margin-left", "4px"),
    ];

    pub const TRACKED_ATTRIBUTES: &[&str] = &["class", "data-number-of-reviews", "style"];
    pub const WIDGET_EVENTS: &[&str] = &[
        "judgeme_loaded",
        "judgeme_rendered",
        "judgeme_widget_loaded",
    ];

    // 默认调度参数（毫秒）
    pub const DEFAULT_MAX_RETRIES: usize = 15;
    pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 100;
    pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5000;
    pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
    pub const DEFAULT_DEBOUNCE_MAX_WAIT_MS: u64 = 2000;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;
    pub const DEFAULT_RECHECK_DELAYS_MS: &[u64] = &[500, 1000, 2000, 5000];
    pub const FOCUS_DELAY_MS: u64 = 500;
    pub const VISIBILITY_DELAY_MS: u64 = 300;
    pub const WIDGET_EVENT_DELAY_MS: u64 = 300;
}

/// 引擎完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub selectors: SelectorConfig,
    pub walk: WalkConfig,
    pub locales: LocaleConfig,
    pub style: StyleConfig,
    pub schedule: ScheduleConfig,
    pub settlement: SettlementConfig,
}

/// 选择器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// 有序的选择器列表
    pub queries: Vec<String>,
    /// 落定标记属性名
    pub marker_attribute: String,
    /// 覆盖层元素的类名
    pub overlay_class: String,
    /// 规则未命中时读取数值的属性，按顺序尝试
    pub value_attributes: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            queries: constants::DEFAULT_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            marker_attribute: constants::MARKER_ATTRIBUTE.to_string(),
            overlay_class: constants::OVERLAY_CLASS.to_string(),
            value_attributes: constants::VALUE_ATTRIBUTES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// 文本遍历兜底配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkConfig {
    pub enabled: bool,
    /// 接受的最大文本长度（字符数）
    pub max_text_len: usize,
    /// 关键词正则
    pub keyword_pattern: String,
    /// 祖先元素 class 片段
    pub context_classes: Vec<String>,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_text_len: constants::WALK_MAX_TEXT_LEN,
            keyword_pattern: constants::WALK_KEYWORD_PATTERN.to_string(),
            context_classes: constants::CONTEXT_CLASSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// 语言规则配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocaleConfig {
    /// 启用的语言标签；为空时使用文档语言检测结果
    pub active: Vec<String>,
    /// 纯数字兜底规则的最大文本长度
    pub fallback_max_text_len: usize,
    /// 覆盖或追加的语言条目（与内置条目按标签合并）
    pub entries: Vec<LocaleEntry>,
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            fallback_max_text_len: constants::FALLBACK_MAX_TEXT_LEN,
            entries: Vec::new(),
        }
    }
}

/// 样式负载中的一条声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleProperty {
    pub name: String,
    pub value: String,
}

/// 样式负载配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// 注入到 `<head>` 的全局样式表，为空时不注入
    pub stylesheet: Option<String>,
    pub stylesheet_id: String,
    pub payload: Vec<StyleProperty>,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            stylesheet: None,
            stylesheet_id: constants::STYLESHEET_ID.to_string(),
            payload: constants::STYLE_PAYLOAD
                .iter()
                .map(|(name, value)| StyleProperty {
                    name: name.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        }
    }
}

impl StyleConfig {
    /// 以 `(name, value)` 形式返回负载
    pub fn declarations(&self) -> Vec<(String, String)> {
        self.payload
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }
}

/// 调度配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub max_retries: usize,
    #[serde(rename = "debounce_ms", with = "duration_ms")]
    pub debounce: Duration,
    #[serde(rename = "debounce_max_wait_ms", with = "duration_ms")]
    pub debounce_max_wait: Duration,
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
    #[serde(rename = "recheck_delays_ms", with = "duration_ms::list")]
    pub recheck_delays: Vec<Duration>,
    #[serde(rename = "focus_delay_ms", with = "duration_ms")]
    pub focus_delay: Duration,
    #[serde(rename = "visibility_delay_ms", with = "duration_ms")]
    pub visibility_delay: Duration,
    #[serde(rename = "widget_event_delay_ms", with = "duration_ms")]
    pub widget_event_delay: Duration,
    pub widget_events: Vec<String>,
    /// 被视为相关的属性变更
    pub tracked_attributes: Vec<String>,
    pub retry: RetryPolicy,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            max_retries: constants::DEFAULT_MAX_RETRIES,
            debounce: Duration::from_millis(constants::DEFAULT_DEBOUNCE_MS),
            debounce_max_wait: Duration::from_millis(constants::DEFAULT_DEBOUNCE_MAX_WAIT_MS),
            poll_interval: Duration::from_millis(constants::DEFAULT_POLL_INTERVAL_MS),
            recheck_delays: constants::DEFAULT_RECHECK_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            focus_delay: Duration::from_millis(constants::FOCUS_DELAY_MS),
            visibility_delay: Duration::from_millis(constants::VISIBILITY_DELAY_MS),
            widget_event_delay: Duration::from_millis(constants::WIDGET_EVENT_DELAY_MS),
            widget_events: constants::WIDGET_EVENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tracked_attributes: constants::TRACKED_ATTRIBUTES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            retry: RetryPolicy::default(),
        }
    }
}

/// 落定配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SettlementConfig {
    pub mode: SettlementMode,
}

impl EngineConfig {
    /// 查找并加载配置文件，然后应用环境变量覆盖
    pub fn load(explicit_path: Option<&str>) -> ReconcileResult<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::discover() {
                Some(path) => {
                    tracing::info!("加载配置文件: {}", path.display());
                    Self::load_from_file(&path.to_string_lossy())?
                }
                None => {
                    tracing::debug!("未找到配置文件，使用默认配置");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 按 `CONFIG_PATHS` 顺序查找第一个存在的配置文件
    pub fn discover() -> Option<PathBuf> {
        constants::CONFIG_PATHS.iter().find_map(|path| {
            let expanded = shellexpand::tilde(path);
            let candidate = Path::new(expanded.as_ref());
            candidate.exists().then(|| candidate.to_path_buf())
        })
    }

    /// 从指定文件加载配置（`.toml` 或 JSON）
    pub fn load_from_file(path: &str) -> ReconcileResult<Self> {
        let expanded = shellexpand::tilde(path);
        let content = std::fs::read_to_string(expanded.as_ref()).map_err(|e| {
            ReconcileError::ConfigError(format!("读取配置文件失败: {}", e)).with_context(path)
        })?;

        if path.ends_with(".json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) {
        use crate::env::{engine, EnvVar};

        if let Some(locales) = engine::Locale::get_override() {
            self.locales.active = locales;
        }

        if let Some(max_retries) = engine::MaxRetries::get_override() {
            self.schedule.max_retries = max_retries;
        }

        if let Some(interval) = engine::RetryInterval::get_override() {
            self.schedule.retry = self.schedule.retry.with_base(interval);
        }

        if let Some(debounce) = engine::Debounce::get_override() {
            self.schedule.debounce = debounce;
        }

        if let Some(poll_interval) = engine::PollInterval::get_override() {
            self.schedule.poll_interval = poll_interval;
        }

        if let Some(mode) = engine::Settlement::get_override() {
            if let Ok(mode) = mode.parse() {
                self.settlement.mode = mode;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ReconcileResult<()> {
        if self.selectors.queries.is_empty() && !self.walk.enabled {
            return Err(ReconcileError::ConfigError(
                "选择器列表为空且禁用了文本遍历，引擎没有任何候选来源".to_string(),
            ));
        }

        if self.selectors.marker_attribute.trim().is_empty() {
            return Err(ReconcileError::ConfigError("标记属性名不能为空".to_string()));
        }

        if self.walk.max_text_len == 0 {
            return Err(ReconcileError::ConfigError("遍历文本长度上限不能为0".to_string()));
        }

        if self.schedule.debounce.is_zero() {
            return Err(ReconcileError::ConfigError("防抖窗口不能为0".to_string()));
        }

        if self.schedule.debounce_max_wait < self.schedule.debounce {
            return Err(ReconcileError::ConfigError(
                "防抖最长等待时间不能小于防抖窗口".to_string(),
            ));
        }

        if self.schedule.poll_interval.is_zero() {
            return Err(ReconcileError::ConfigError("轮询间隔不能为0".to_string()));
        }

        self.schedule.retry.validate()?;

        Ok(())
    }

    /// 生成示例配置文件
    pub fn generate_example_config(path: &str) -> ReconcileResult<()> {
        let config = Self::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| ReconcileError::ConfigError(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ReconcileError::ConfigError(format!("写入配置文件失败: {}", e)))?;

        Ok(())
    }
}

/// 以毫秒整数序列化 `Duration`
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }

    pub mod list {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(durations: &[Duration], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.collect_seq(durations.iter().map(|d| d.as_millis() as u64))
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let ms = Vec::<u64>::deserialize(deserializer)?;
            Ok(ms.into_iter().map(Duration::from_millis).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.selectors.marker_attribute, "data-reconciled");
        assert_eq!(config.schedule.recheck_delays.len(), 4);
        assert_eq!(config.settlement.mode, SettlementMode::Replace);
    }

    #[test]
    fn test_selector_defaults_cover_substring_queries() {
        let selectors = SelectorConfig::default();
        assert!(selectors
            .queries
            .iter()
            .any(|q| q == r#"[class*="review"][class*="text"]"#));
        assert_eq!(selectors.value_attributes, vec!["data-number-of-reviews"]);

        let config: EngineConfig = toml::from_str(
            r#"
            [selectors]
            value_attributes = ["data-count", "data-number-of-reviews"]
            "#,
        )
        .unwrap();
        assert_eq!(config.selectors.value_attributes.len(), 2);
        assert_eq!(config.selectors.queries, SelectorConfig::default().queries);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [schedule]
            debounce_ms = 150
            recheck_delays_ms = [100, 200]

            [schedule.retry]
            kind = "exponential"
            initial_ms = 50
            max_ms = 400

            [settlement]
            mode = "overlay"
            "#,
        )
        .unwrap();

        assert_eq!(config.schedule.debounce, Duration::from_millis(150));
        assert_eq!(
            config.schedule.recheck_delays,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(
            config.schedule.poll_interval,
            Duration::from_millis(constants::DEFAULT_POLL_INTERVAL_MS)
        );
        assert_eq!(config.settlement.mode, SettlementMode::Overlay);
        assert_eq!(config.selectors, SelectorConfig::default());
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let config = EngineConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_bad_schedule() {
        let mut config = EngineConfig::default();
        config.schedule.debounce_max_wait = Duration::from_millis(10);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.selectors.queries.clear();
        config.walk.enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generate_and_load_example_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconciler.toml");
        let path = path.to_string_lossy().to_string();

        EngineConfig::generate_example_config(&path).unwrap();
        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, EngineConfig::default());
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let err = EngineConfig::load_from_file("/nonexistent/reconciler.toml").unwrap_err();
        assert!(matches!(err, ReconcileError::ConfigError(_)));
    }
}
