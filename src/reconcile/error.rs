//! 收敛引擎统一错误处理
//!
//! 提供结构化错误类型和错误处理机制。引擎内部对 DOM 的操作不会向宿主页面抛出错误，
//! 这里的错误只出现在配置、规则构建、选择器解析和 CLI 的 IO 路径上。

use std::fmt;

use thiserror::Error;

/// 收敛引擎错误类型
#[derive(Error, Debug, Clone)]
pub enum ReconcileError {
    /// 文本不匹配任何规则（不影响循环，仅用于诊断）
    #[error("没有规则匹配文本: {0:?}")]
    NoMatch(String),

    /// 节点在选择与改写之间被外部组件摘除
    #[error("节点已脱离文档: {0}")]
    StaleNode(String),

    /// 提取规则无效（必须恰好捕获一个值分组）
    #[error("提取规则无效 [{locale}] {pattern}: {reason}")]
    MalformedRule {
        locale: String,
        pattern: String,
        reason: String,
    },

    /// 选择器无法解析
    #[error("选择器无效 {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 解析错误
    #[error("解析错误: {0}")]
    ParseError(String),

    /// IO 错误
    #[error("IO错误: {0}")]
    IoError(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    InternalError(String),
}

impl ReconcileError {
    /// 获取错误的严重程度
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ReconcileError::NoMatch(_) => ErrorSeverity::Info,
            ReconcileError::StaleNode(_) => ErrorSeverity::Info,
            ReconcileError::MalformedRule { .. } => ErrorSeverity::Warning,
            ReconcileError::InvalidSelector { .. } => ErrorSeverity::Warning,
            ReconcileError::ConfigError(_) => ErrorSeverity::Critical,
            ReconcileError::ParseError(_) => ErrorSeverity::Error,
            ReconcileError::IoError(_) => ErrorSeverity::Error,
            ReconcileError::InternalError(_) => ErrorSeverity::Critical,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            ReconcileError::NoMatch(_) => ErrorCategory::Matching,
            ReconcileError::StaleNode(_) => ErrorCategory::Dom,
            ReconcileError::MalformedRule { .. } => ErrorCategory::Configuration,
            ReconcileError::InvalidSelector { .. } => ErrorCategory::Configuration,
            ReconcileError::ConfigError(_) => ErrorCategory::Configuration,
            ReconcileError::ParseError(_) => ErrorCategory::Parsing,
            ReconcileError::IoError(_) => ErrorCategory::Io,
            ReconcileError::InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// 引擎能否在本地恢复（降级为"部分节点未收敛"）
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ReconcileError::ConfigError(_) | ReconcileError::InternalError(_)
        )
    }

    /// 创建带上下文的错误
    pub fn with_context<T: fmt::Display>(mut self, context: T) -> Self {
        match &mut self {
            ReconcileError::NoMatch(msg)
            | ReconcileError::StaleNode(msg)
            | ReconcileError::ConfigError(msg)
            | ReconcileError::ParseError(msg)
            | ReconcileError::IoError(msg)
            | ReconcileError::InternalError(msg)
            | ReconcileError::MalformedRule { reason: msg, .. }
            | ReconcileError::InvalidSelector { reason: msg, .. } => {
                *msg = format!("{} (上下文: {})", msg, context)
            }
        }

        self
    }
}

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Matching,
    Dom,
    Configuration,
    Parsing,
    Io,
    Internal,
}

impl From<std::io::Error> for ReconcileError {
    fn from(error: std::io::Error) -> Self {
        ReconcileError::IoError(error.to_string())
    }
}

impl From<toml::de::Error> for ReconcileError {
    fn from(error: toml::de::Error) -> Self {
        ReconcileError::ConfigError(format!("解析TOML配置失败: {}", error))
    }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(error: serde_json::Error) -> Self {
        ReconcileError::ConfigError(format!("解析JSON配置失败: {}", error))
    }
}

impl From<regex::Error> for ReconcileError {
    fn from(error: regex::Error) -> Self {
        ReconcileError::ParseError(error.to_string())
    }
}

/// 收敛引擎结果类型
pub type ReconcileResult<T> = Result<T, ReconcileError>;
