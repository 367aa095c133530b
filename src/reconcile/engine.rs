//! 单次收敛扫描
//!
//! `Reconciler` 持有一个文档根、规则集、改写器和账本，每次 `run_pass`
//! 都同步完成 选择 → 匹配 → 改写 并返回 `ScanResult`。

use markup5ever_rcdom::Handle;
use serde::Serialize;

use crate::parsers::html::dom::{get_node_attr, text_content_excluding};
use crate::reconcile::config::EngineConfig;
use crate::reconcile::error::ReconcileResult;
use crate::reconcile::locale::detect_document_locale;
use crate::reconcile::matcher::RuleBook;
use crate::reconcile::rewriter::{ApplyOutcome, Rewriter, SkipReason};
use crate::reconcile::selector::ElementSelector;
use crate::reconcile::state::ConvergenceState;

/// 单次扫描的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    /// 本次新落定的节点
    pub newly_settled: usize,
    /// 已经处于落定状态的节点
    pub already_settled: usize,
    /// 没有规则匹配的候选
    pub unmatched: usize,
    /// 改写前已脱离文档的候选
    pub stale: usize,
    /// DOM 写入次数
    pub writes: usize,
    /// 扫描开始时清理掉的记录
    pub pruned: usize,
    /// 是否使用了文本遍历兜底
    pub fallback_used: bool,
}

impl ScanResult {
    /// 匹配到的候选总数
    pub fn matched(&self) -> usize {
        self.newly_settled + self.already_settled
    }

    /// 合并后续扫描：累加增量，快照类计数取最新值
    pub fn absorb(&mut self, later: &ScanResult) {
        self.newly_settled += later.newly_settled;
        self.stale += later.stale;
        self.writes += later.writes;
        self.pruned += later.pruned;
        self.already_settled = later.already_settled;
        self.unmatched = later.unmatched;
        self.fallback_used |= later.fallback_used;
    }
}

/// 收敛引擎
pub struct Reconciler {
    root: Handle,
    selector: ElementSelector,
    rules: RuleBook,
    rewriter: Rewriter,
    state: ConvergenceState,
    style: Vec<(String, String)>,
    overlay_class: String,
    value_attributes: Vec<String>,
    passes: usize,
}

impl Reconciler {
    /// 为一个文档根创建引擎
    ///
    /// 未显式启用语言时，检测到的文档语言会被提到规则表最前。
    pub fn new(root: Handle, config: &EngineConfig) -> ReconcileResult<Self> {
        let detected = detect_document_locale(&root);
        if let Some(locale) = &detected {
            tracing::debug!("检测到文档语言: {}", locale);
        }

        let rules = RuleBook::from_config(&config.locales, detected.as_deref());
        if rules.is_empty() {
            tracing::warn!("没有可用的提取规则，引擎不会改写任何节点");
        }

        Ok(Self {
            selector: ElementSelector::new(config)?,
            rewriter: Rewriter::new(config),
            state: ConvergenceState::new(&config.selectors.marker_attribute),
            style: config.style.declarations(),
            overlay_class: config.selectors.overlay_class.clone(),
            value_attributes: config.selectors.value_attributes.clone(),
            root,
            rules,
            passes: 0,
        })
    }

    /// 执行一次完整扫描
    pub fn run_pass(&mut self) -> ScanResult {
        let mut result = ScanResult {
            pruned: self.state.prune(),
            ..ScanResult::default()
        };

        if self.rewriter.inject_stylesheet(&self.root) {
            result.writes += 1;
        }

        let candidates = self.selector.collect(&self.root, &self.state);
        self.reconcile_into(&candidates, &mut result);

        if result.matched() == 0 && self.selector.walk_enabled() {
            let fallback = self.selector.walk_text(&self.root, &self.state);
            result.fallback_used = true;
            self.reconcile_into(&fallback, &mut result);
        }

        self.passes += 1;

        if result.newly_settled > 0 {
            tracing::info!(
                "第{}次扫描: 新落定 {}, 已落定 {}, 未匹配 {}, 写入 {}",
                self.passes,
                result.newly_settled,
                result.already_settled,
                result.unmatched,
                result.writes
            );
        } else {
            tracing::debug!("第{}次扫描: {:?}", self.passes, result);
        }

        result
    }

    /// 反复扫描直到某次扫描没有任何写入，或达到扫描次数上限
    pub fn run_to_fixed_point(&mut self, max_passes: usize) -> ScanResult {
        let mut total = ScanResult::default();
        for _ in 0..max_passes.max(1) {
            let result = self.run_pass();
            total.absorb(&result);
            if result.writes == 0 {
                break;
            }
        }
        total
    }

    /// 处理一组已选出的候选节点
    pub fn reconcile_nodes(&mut self, candidates: &[Handle]) -> ScanResult {
        let mut result = ScanResult::default();
        self.reconcile_into(candidates, &mut result);
        result
    }

    fn reconcile_into(&mut self, candidates: &[Handle], result: &mut ScanResult) {
        for node in candidates {
            if self.state.is_holding(node) {
                result.already_settled += 1;
                continue;
            }

            let text = text_content_excluding(node, Some(&self.overlay_class));
            let canonical = match self.rules.extract(&text) {
                Some(extraction) => extraction.canonical,
                None => match self.attribute_value(node) {
                    Some(value) => self.rules.format_value(&value),
                    None => {
                        tracing::trace!("未匹配: {:?}", text.trim());
                        result.unmatched += 1;
                        continue;
                    }
                },
            };

            match self
                .rewriter
                .apply(&mut self.state, node, &canonical, &self.style)
            {
                ApplyOutcome::Applied { writes } => {
                    result.newly_settled += 1;
                    result.writes += writes;
                }
                ApplyOutcome::Skipped(SkipReason::AlreadySettled) => result.already_settled += 1,
                ApplyOutcome::Skipped(SkipReason::Stale) => result.stale += 1,
            }
        }
    }

    /// 从数值属性中读取计数，只接受 ASCII 数字
    fn attribute_value(&self, node: &Handle) -> Option<String> {
        self.value_attributes.iter().find_map(|name| {
            let value = get_node_attr(node, name)?;
            let value = value.trim();
            (!value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()))
                .then(|| value.to_string())
        })
    }

    /// 撤销所有改写
    pub fn restore_all(&mut self) -> usize {
        self.state.restore_all()
    }

    /// 撤销单个节点的改写
    pub fn restore(&mut self, node: &Handle) -> Option<String> {
        self.rewriter.restore(&mut self.state, node)
    }

    pub fn root(&self) -> &Handle {
        &self.root
    }

    pub fn state(&self) -> &ConvergenceState {
        &self.state
    }

    pub fn rules(&self) -> &RuleBook {
        &self.rules
    }

    pub fn passes(&self) -> usize {
        self.passes
    }
}
