//! 统一的环境变量管理系统
//!
//! 提供类型安全、可验证的环境变量管理。引擎配置从文件加载之后，
//! 再由这里定义的 `RECONCILER_*` 变量逐项覆盖。

use std::env;
use std::fmt;
use std::time::Duration;

/// 环境变量解析错误
#[derive(Debug, Clone)]
pub struct EnvError {
    pub variable: String,
    pub message: String,
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment variable '{}': {}", self.variable, self.message)
    }
}

impl std::error::Error for EnvError {}

pub type EnvResult<T> = Result<T, EnvError>;

/// 环境变量访问器特性
pub trait EnvVar<T> {
    const NAME: &'static str;
    const DEFAULT: Option<T>;
    const DESCRIPTION: &'static str;

    fn parse(value: &str) -> EnvResult<T>;

    fn get() -> EnvResult<T> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value),
            Err(_) => {
                if let Some(default) = Self::DEFAULT {
                    Ok(default)
                } else {
                    Err(EnvError {
                        variable: Self::NAME.to_string(),
                        message: "Required environment variable not set".to_string(),
                    })
                }
            }
        }
    }

    /// 仅在变量被显式设置时返回值；设置了但无法解析时记录警告并忽略
    fn get_override() -> Option<T> {
        let value = env::var(Self::NAME).ok()?;
        match Self::parse(&value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("忽略无效的环境变量: {}", e);
                None
            }
        }
    }
}

/// 核心环境变量定义
pub mod core {
    use super::*;

    /// 日志级别
    pub struct LogLevel;
    impl EnvVar<String> for LogLevel {
        const NAME: &'static str = "RECONCILER_LOG_LEVEL";
        const DEFAULT: Option<String> = None;

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("info".to_string()),
            }
        }
        const DESCRIPTION: &'static str = "Log level: trace, debug, info, warn, error";

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_lowercase()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!(
                        "Invalid log level '{}'. Use: trace, debug, info, warn, error",
                        value
                    ),
                }),
            }
        }
    }

    /// 禁用颜色输出
    pub struct NoColor;
    impl EnvVar<bool> for NoColor {
        const NAME: &'static str = "NO_COLOR";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Disable colored output when set to any value";

        fn parse(value: &str) -> EnvResult<bool> {
            // NO_COLOR 遵循标准：任何值都表示禁用颜色
            Ok(!value.is_empty())
        }
    }
}

/// 收敛引擎相关环境变量
pub mod engine {
    use super::*;

    /// 启用的语言标签（逗号分隔）
    pub struct Locale;
    impl EnvVar<Vec<String>> for Locale {
        const NAME: &'static str = "RECONCILER_LOCALE";
        const DEFAULT: Option<Vec<String>> = None;
        const DESCRIPTION: &'static str =
            "Comma-separated locale tags to activate (ja, zh, en, fr, it, de, es, generic)";

        fn parse(value: &str) -> EnvResult<Vec<String>> {
            let tags: Vec<String> = value
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();

            if tags.is_empty() {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "At least one locale tag is required".to_string(),
                });
            }
            Ok(tags)
        }
    }

    /// 启动阶段最大重试次数
    pub struct MaxRetries;
    impl EnvVar<usize> for MaxRetries {
        const NAME: &'static str = "RECONCILER_MAX_RETRIES";
        const DEFAULT: Option<usize> = None;
        const DESCRIPTION: &'static str = "Maximum number of startup retry scans (0-100)";

        fn parse(value: &str) -> EnvResult<usize> {
            parse_positive_usize(value, Self::NAME, 0, 100)
        }
    }

    /// 重试间隔
    pub struct RetryInterval;
    impl EnvVar<Duration> for RetryInterval {
        const NAME: &'static str = "RECONCILER_RETRY_INTERVAL_MS";
        const DEFAULT: Option<Duration> = None;
        const DESCRIPTION: &'static str = "Delay between startup retry scans in milliseconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_millis(value, Self::NAME, 10, 60_000)
        }
    }

    /// 变更防抖窗口
    pub struct Debounce;
    impl EnvVar<Duration> for Debounce {
        const NAME: &'static str = "RECONCILER_DEBOUNCE_MS";
        const DEFAULT: Option<Duration> = None;
        const DESCRIPTION: &'static str = "Mutation debounce window in milliseconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_millis(value, Self::NAME, 10, 60_000)
        }
    }

    /// 稳态轮询间隔
    pub struct PollInterval;
    impl EnvVar<Duration> for PollInterval {
        const NAME: &'static str = "RECONCILER_POLL_INTERVAL_MS";
        const DEFAULT: Option<Duration> = None;
        const DESCRIPTION: &'static str = "Steady-state poll interval in milliseconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_millis(value, Self::NAME, 100, 3_600_000)
        }
    }

    /// 落定方式
    pub struct Settlement;
    impl EnvVar<String> for Settlement {
        const NAME: &'static str = "RECONCILER_SETTLEMENT";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Settlement mode: replace, overlay";

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "replace" | "overlay" => Ok(value.to_lowercase()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!("Invalid settlement mode '{}'. Use: replace, overlay", value),
                }),
            }
        }
    }
}

fn parse_positive_usize(value: &str, var_name: &str, min: usize, max: usize) -> EnvResult<usize> {
    let num: usize = value.trim().parse().map_err(|_| EnvError {
        variable: var_name.to_string(),
        message: "Must be a valid positive number".to_string(),
    })?;

    if num < min {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} is below minimum {}", num, min),
        });
    }

    if num > max {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} exceeds maximum {}", num, max),
        });
    }

    Ok(num)
}

fn parse_millis(value: &str, var_name: &str, min: usize, max: usize) -> EnvResult<Duration> {
    parse_positive_usize(value, var_name, min, max).map(|ms| Duration::from_millis(ms as u64))
}

/// 环境变量文档生成器
pub fn generate_env_docs() -> String {
    let mut docs = String::new();
    docs.push_str("# Environment Variables\n\n");

    let sections: &[(&str, &[(&str, &str)])] = &[
        (
            "Core",
            &[
                (core::LogLevel::NAME, core::LogLevel::DESCRIPTION),
                (core::NoColor::NAME, core::NoColor::DESCRIPTION),
            ],
        ),
        (
            "Engine",
            &[
                (engine::Locale::NAME, engine::Locale::DESCRIPTION),
                (engine::MaxRetries::NAME, engine::MaxRetries::DESCRIPTION),
                (engine::RetryInterval::NAME, engine::RetryInterval::DESCRIPTION),
                (engine::Debounce::NAME, engine::Debounce::DESCRIPTION),
                (engine::PollInterval::NAME, engine::PollInterval::DESCRIPTION),
                (engine::Settlement::NAME, engine::Settlement::DESCRIPTION),
            ],
        ),
    ];

    for (title, vars) in sections {
        docs.push_str(&format!("## {}\n\n", title));
        for (name, description) in vars.iter() {
            docs.push_str(&format!("- `{}`: {}\n", name, description));
        }
        docs.push('\n');
    }

    docs
}
