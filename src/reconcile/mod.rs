//! 收敛式 DOM 修正引擎
//!
//! 数据流：`ObservationLoop` → `ElementSelector` → 候选节点 → `RuleBook` →
//! 提取值 → `Rewriter`（由 `ConvergenceState` 把关）→ 账本更新。
//! 外部组件的变更作为触发源回到 `ObservationLoop`。

pub mod config;
pub mod engine;
pub mod error;
pub mod locale;
pub mod matcher;
pub mod observer;
pub mod rewriter;
#[cfg(feature = "runtime")]
pub mod runtime;
pub mod selector;
pub mod state;

pub use config::EngineConfig;
pub use engine::{Reconciler, ScanResult};
pub use error::{ErrorCategory, ErrorSeverity, ReconcileError, ReconcileResult};
pub use locale::{LocaleEntry, LocaleTable};
pub use matcher::{match_text, ExtractionRule, MatchOutcome, RuleBook};
pub use observer::{
    HostEvent, LoopState, MutationRecord, ObservationLoop, ReadyState, RetryPolicy, TimerKind,
};
pub use rewriter::{ApplyOutcome, Rewriter, SettlementMode, SkipReason};
#[cfg(feature = "runtime")]
pub use runtime::{LoopDriver, LoopHandle};
pub use selector::{ElementSelector, TextWalker};
pub use state::{ConvergenceRecord, ConvergenceState};
