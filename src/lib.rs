//! # Storefront Reconciler
//!
//! 让第三方评价组件渲染出的文本和样式收敛到期望的规范形式。
//! 组件会反复、异步地重新渲染自己的 DOM 子树，引擎通过
//! 扫描 → 匹配 → 改写 → 观察 的循环到达并保持不动点。
//!
//! ## 模块组织
//!
//! - `core` - 对静态 HTML 文档的一次性修正（CLI 使用）
//! - `env` - 环境变量覆盖
//! - `parsers` - HTML / CSS 解析与 DOM 操作
//! - `reconcile` - 收敛引擎、观察循环和配置

pub mod core;
pub mod env;
pub mod parsers;
pub mod reconcile;

// Re-export commonly used items for convenience
pub use crate::core::*;
pub use crate::reconcile::{
    EngineConfig, HostEvent, MutationRecord, ObservationLoop, ReadyState, ReconcileError,
    ReconcileResult, Reconciler, ScanResult, SettlementMode,
};
