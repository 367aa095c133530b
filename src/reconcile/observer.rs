//! 观察循环
//!
//! 状态机：`Idle → Scanning → (Retrying | Watching) → Reconciling → Watching …`，
//! 以及 `TornDown`。循环本身不读时钟，宿主在每个入口传入 `now`，
//! 通过 `poll(now)` 触发到期的定时器，通过 `next_deadline()` 得知下一次唤醒时间。
//!
//! 所有触发源（启动重试、变更防抖、稳态轮询、阶段性复查、宿主事件）
//! 都汇入同一个扫描入口；同一时刻到期的多个触发只执行一次扫描。

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use markup5ever_rcdom::Handle;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parsers::html::dom::{
    class_contains, get_parent_node, has_class, is_element, is_non_rendered, text_content,
};
use crate::reconcile::config::{constants, duration_ms, EngineConfig, ScheduleConfig};
use crate::reconcile::engine::{Reconciler, ScanResult};
use crate::reconcile::error::{ReconcileError, ReconcileResult};

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RetryPolicy {
    /// 固定间隔
    Fixed {
        #[serde(rename = "interval_ms", with = "duration_ms")]
        interval: Duration,
    },
    /// 指数退避，延迟不超过 `max`
    Exponential {
        #[serde(rename = "initial_ms", with = "duration_ms")]
        initial: Duration,
        #[serde(rename = "max_ms", with = "duration_ms")]
        max: Duration,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed {
            interval: Duration::from_millis(constants::DEFAULT_RETRY_INTERVAL_MS),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次重试（从 1 开始）之前的等待时间
    pub fn delay(&self, attempt: usize) -> Duration {
        match *self {
            RetryPolicy::Fixed { interval } => interval,
            RetryPolicy::Exponential { initial, max } => {
                let shift = attempt.saturating_sub(1).min(31) as u32;
                initial
                    .checked_mul(1u32 << shift)
                    .unwrap_or(max)
                    .min(max)
            }
        }
    }

    /// 替换基础间隔，保留策略类型
    pub fn with_base(self, base: Duration) -> Self {
        match self {
            RetryPolicy::Fixed { .. } => RetryPolicy::Fixed { interval: base },
            RetryPolicy::Exponential { max, .. } => RetryPolicy::Exponential {
                initial: base,
                max: max.max(base),
            },
        }
    }

    pub fn validate(&self) -> ReconcileResult<()> {
        match *self {
            RetryPolicy::Fixed { interval } if interval.is_zero() => Err(
                ReconcileError::ConfigError("重试间隔不能为0".to_string()),
            ),
            RetryPolicy::Exponential { initial, max } if initial.is_zero() || max < initial => {
                Err(ReconcileError::ConfigError(
                    "指数退避的初始间隔必须大于0且不超过上限".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// 宿主文档的加载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

impl ReadyState {
    fn is_ready(self) -> bool {
        !matches!(self, ReadyState::Loading)
    }
}

/// 宿主转发的 DOM 变更记录
#[derive(Debug, Clone)]
pub enum MutationRecord {
    ChildList {
        target: Handle,
        added: Vec<Handle>,
        removed: Vec<Handle>,
    },
    Attributes {
        target: Handle,
        name: String,
    },
    CharacterData {
        target: Handle,
    },
}

/// 宿主事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// 加载状态变化
    ReadyStateChange(ReadyState),
    /// 窗口重新获得焦点
    Focus,
    /// 页面可见性变化
    VisibilityChange { visible: bool },
    /// 外部组件派发的自定义事件
    Widget(String),
}

/// 循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Scanning,
    Retrying,
    Watching,
    Reconciling,
    TornDown,
}

/// 定时器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// 启动阶段的重试
    Retry,
    /// 进入观察后的阶段性复查
    Recheck,
    /// 稳态轮询
    Poll,
    /// 变更防抖
    Debounce,
    /// 宿主事件触发的延迟扫描
    Deferred,
}

/// 变更相关性过滤
#[derive(Debug, Clone)]
struct RelevanceFilter {
    context_classes: Vec<String>,
    keyword: Option<Regex>,
    tracked_attributes: Vec<String>,
    marker_attribute: String,
    overlay_class: String,
}

impl RelevanceFilter {
    fn from_config(config: &EngineConfig) -> Self {
        // 关键词正则已经在构建 Reconciler 时验证过
        let keyword = Some(config.walk.keyword_pattern.trim())
            .filter(|pattern| !pattern.is_empty())
            .and_then(|pattern| Regex::new(pattern).ok());
        Self {
            context_classes: config.walk.context_classes.clone(),
            keyword,
            tracked_attributes: config.schedule.tracked_attributes.clone(),
            marker_attribute: config.selectors.marker_attribute.clone(),
            overlay_class: config.selectors.overlay_class.clone(),
        }
    }

    fn has_context_class(&self, node: &Handle) -> bool {
        self.context_classes
            .iter()
            .any(|fragment| class_contains(node, fragment))
    }

    fn in_context(&self, node: &Handle) -> bool {
        let mut current = Some(node.clone());
        while let Some(element) = current {
            if self.has_context_class(&element) {
                return true;
            }
            current = get_parent_node(&element);
        }
        false
    }

    fn in_overlay(&self, node: &Handle) -> bool {
        let mut current = Some(node.clone());
        while let Some(element) = current {
            if has_class(&element, &self.overlay_class) {
                return true;
            }
            current = get_parent_node(&element);
        }
        false
    }

    /// 新增节点是否像是外部组件渲染的内容
    fn is_related_addition(&self, node: &Handle) -> bool {
        if !is_element(node) || is_non_rendered(node) || has_class(node, &self.overlay_class) {
            return false;
        }

        let mut stack = vec![node.clone()];
        while let Some(current) = stack.pop() {
            if self.has_context_class(&current) {
                return true;
            }
            for child in current.children.borrow().iter() {
                if is_element(child) {
                    stack.push(child.clone());
                }
            }
        }

        match &self.keyword {
            Some(keyword) => keyword.is_match(&text_content(node)),
            None => false,
        }
    }
}

/// 观察循环
pub struct ObservationLoop {
    engine: Reconciler,
    schedule: ScheduleConfig,
    filter: RelevanceFilter,
    state: LoopState,
    timers: BTreeMap<(Instant, u64), TimerKind>,
    seq: u64,
    retries: usize,
    observing: bool,
    debounce: Option<DebounceWindow>,
    passes: usize,
    last_result: Option<ScanResult>,
}

#[derive(Debug, Clone, Copy)]
struct DebounceWindow {
    started: Instant,
    key: (Instant, u64),
}

impl ObservationLoop {
    pub fn new(engine: Reconciler, config: &EngineConfig) -> Self {
        Self {
            engine,
            schedule: config.schedule.clone(),
            filter: RelevanceFilter::from_config(config),
            state: LoopState::Idle,
            timers: BTreeMap::new(),
            seq: 0,
            retries: 0,
            observing: false,
            debounce: None,
            passes: 0,
            last_result: None,
        }
    }

    /// 启动循环；文档已可交互时立即扫描，否则等待 `on_ready_state`
    pub fn start(&mut self, ready: ReadyState, now: Instant) {
        if self.state != LoopState::Idle {
            return;
        }
        if ready.is_ready() {
            self.scan(now);
        } else {
            tracing::debug!("文档尚未就绪，等待加载完成");
        }
    }

    /// 文档加载状态变化
    pub fn on_ready_state(&mut self, ready: ReadyState, now: Instant) {
        if self.state == LoopState::Idle && ready.is_ready() {
            self.scan(now);
        }
    }

    /// 处理一批 DOM 变更；只在观察阶段生效
    pub fn on_mutations(&mut self, records: &[MutationRecord], now: Instant) {
        if !self.observing || self.state == LoopState::TornDown {
            return;
        }
        if records.iter().any(|record| self.is_relevant(record)) {
            self.arm_debounce(now);
        }
    }

    /// 处理宿主事件
    pub fn on_host_event(&mut self, event: &HostEvent, now: Instant) {
        if matches!(self.state, LoopState::TornDown) {
            return;
        }

        let delay = match event {
            HostEvent::ReadyStateChange(ready) => {
                self.on_ready_state(*ready, now);
                return;
            }
            HostEvent::Focus => self.schedule.focus_delay,
            HostEvent::VisibilityChange { visible: true } => self.schedule.visibility_delay,
            HostEvent::VisibilityChange { visible: false } => return,
            HostEvent::Widget(name) => {
                if !self.schedule.widget_events.iter().any(|e| e == name) {
                    return;
                }
                tracing::debug!("检测到组件事件: {}", name);
                self.schedule.widget_event_delay
            }
        };

        if self.state == LoopState::Idle {
            return;
        }
        self.schedule_timer(now + delay, TimerKind::Deferred);
    }

    /// 触发所有已到期的定时器，返回执行的扫描次数（0 或 1）
    pub fn poll(&mut self, now: Instant) -> usize {
        if self.state == LoopState::TornDown {
            return 0;
        }

        // 键小于 (now, MAX) 的定时器均已到期
        let due: Vec<TimerKind> = {
            let pending = self.timers.split_off(&(now, u64::MAX));
            let due = std::mem::replace(&mut self.timers, pending);
            due.into_values().collect()
        };
        if due.is_empty() {
            return 0;
        }

        if due.contains(&TimerKind::Debounce) {
            self.debounce = None;
        }
        if due.contains(&TimerKind::Poll) {
            self.schedule_timer(now + self.schedule.poll_interval, TimerKind::Poll);
        }

        tracing::trace!("到期的触发: {:?}", due);

        match self.state {
            LoopState::Retrying | LoopState::Scanning | LoopState::Idle => self.scan(now),
            LoopState::Watching | LoopState::Reconciling => self.reconcile(now),
            LoopState::TornDown => return 0,
        }
        1
    }

    /// 下一个定时器的到期时间
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.keys().next().map(|(deadline, _)| *deadline)
    }

    /// 断开观察并取消所有定时器
    pub fn teardown(&mut self) {
        if self.state == LoopState::TornDown {
            return;
        }
        let cancelled = self.timers.len();
        self.timers.clear();
        self.debounce = None;
        self.observing = false;
        self.state = LoopState::TornDown;
        tracing::debug!("观察循环已停止，取消了 {} 个定时器", cancelled);
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn pending_of(&self, kind: TimerKind) -> usize {
        self.timers.values().filter(|k| **k == kind).count()
    }

    /// 已执行的扫描次数
    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn last_result(&self) -> Option<&ScanResult> {
        self.last_result.as_ref()
    }

    pub fn engine(&self) -> &Reconciler {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Reconciler {
        &mut self.engine
    }

    /// 启动阶段扫描：没有匹配且仍有重试预算时进入 Retrying，否则进入 Watching
    fn scan(&mut self, now: Instant) {
        self.state = LoopState::Scanning;
        self.cancel(TimerKind::Retry);
        let result = self.run_pass();

        if result.matched() == 0 && self.retries < self.schedule.max_retries {
            self.retries += 1;
            let delay = self.schedule.retry.delay(self.retries);
            tracing::debug!(
                "未找到目标元素，{:?} 后重试 ({}/{})",
                delay,
                self.retries,
                self.schedule.max_retries
            );
            self.schedule_timer(now + delay, TimerKind::Retry);
            self.state = LoopState::Retrying;
        } else {
            self.enter_watching(now);
        }
    }

    fn enter_watching(&mut self, now: Instant) {
        self.observing = true;
        self.state = LoopState::Watching;

        self.schedule_timer(now + self.schedule.poll_interval, TimerKind::Poll);
        let rechecks = self.schedule.recheck_delays.clone();
        for delay in rechecks {
            self.schedule_timer(now + delay, TimerKind::Recheck);
        }

        tracing::debug!(
            "进入观察阶段 (重试 {} 次, 已落定 {})",
            self.retries,
            self.engine.state().len()
        );
    }

    fn reconcile(&mut self, _now: Instant) {
        self.state = LoopState::Reconciling;
        self.run_pass();
        self.state = LoopState::Watching;
    }

    fn run_pass(&mut self) -> ScanResult {
        let result = self.engine.run_pass();
        self.passes += 1;
        self.last_result = Some(result);
        result
    }

    /// 尾沿防抖：新的相关变更推迟截止时间，但总等待不超过最长等待时间
    fn arm_debounce(&mut self, now: Instant) {
        let (started, deadline) = match self.debounce.take() {
            Some(window) => {
                self.timers.remove(&window.key);
                let latest = window.started + self.schedule.debounce_max_wait;
                (window.started, (now + self.schedule.debounce).min(latest))
            }
            None => (now, now + self.schedule.debounce),
        };

        let key = self.schedule_timer(deadline, TimerKind::Debounce);
        self.debounce = Some(DebounceWindow { started, key });
    }

    fn schedule_timer(&mut self, deadline: Instant, kind: TimerKind) -> (Instant, u64) {
        self.seq += 1;
        let key = (deadline, self.seq);
        self.timers.insert(key, kind);
        key
    }

    fn cancel(&mut self, kind: TimerKind) {
        self.timers.retain(|_, k| *k != kind);
    }

    fn is_relevant(&self, record: &MutationRecord) -> bool {
        match record {
            MutationRecord::ChildList { target, added, removed } => {
                if self.filter.in_overlay(target) {
                    return false;
                }
                if added.iter().any(|node| self.filter.is_related_addition(node)) {
                    return true;
                }
                let own_overlay_only = !added.is_empty()
                    && added.iter().all(|n| has_class(n, &self.filter.overlay_class));
                if own_overlay_only {
                    return false;
                }
                let changed = !added.is_empty() || !removed.is_empty();
                changed && self.touches_unsettled(target)
            }
            MutationRecord::Attributes { target, name } => {
                if name == &self.filter.marker_attribute
                    || !self.filter.tracked_attributes.iter().any(|a| a == name)
                    || has_class(target, &self.filter.overlay_class)
                    || !self.filter.has_context_class(target)
                {
                    return false;
                }
                !self.engine.state().is_holding(target)
            }
            MutationRecord::CharacterData { target } => match get_parent_node(target) {
                Some(parent) => !self.filter.in_overlay(&parent) && self.touches_unsettled(&parent),
                None => false,
            },
        }
    }

    /// 变更所在的被跟踪节点已不再保持落定，或变更发生在相关区域内
    fn touches_unsettled(&self, node: &Handle) -> bool {
        let state = self.engine.state();
        let mut current = Some(node.clone());
        while let Some(element) = current {
            if state.contains(&element) {
                return !state.is_holding(&element);
            }
            current = get_parent_node(&element);
        }
        self.filter.in_context(node)
    }
}
