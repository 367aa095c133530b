//! 节点改写
//!
//! 把规范文本和样式负载写入候选节点，并在账本中登记。元素本身永远不会被替换：
//! 替换模式原地修改已有的文本节点，覆盖模式隐藏原文并追加一个覆盖层子元素。

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Instant;

use markup5ever_rcdom::Handle;
use serde::{Deserialize, Serialize};

use crate::parsers::css::{contains_important, merge_important};
use crate::parsers::html::dom::{
    append_child, create_element, create_text_node, find_first, get_node_attr, get_parent_node,
    get_text, has_class, is_attached, remove_child, set_node_attr, set_text, text_content_excluding,
    text_descendants,
};
use crate::parsers::html::utils::WHITESPACES;
use crate::reconcile::config::EngineConfig;
use crate::reconcile::state::{ConvergenceRecord, ConvergenceState};

/// 覆盖模式下隐藏原文所用的声明
const HIDE_DECLARATIONS: &[(&str, &str)] = &[("font-size", "0"), ("line-height", "0")];

/// 落定方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
    /// 原地改写文本节点
    #[default]
    Replace,
    /// 隐藏原文并追加覆盖层
    Overlay,
}

impl FromStr for SettlementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(SettlementMode::Replace),
            "overlay" => Ok(SettlementMode::Overlay),
            other => Err(format!("unknown settlement mode: {}", other)),
        }
    }
}

impl fmt::Display for SettlementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementMode::Replace => write!(f, "replace"),
            SettlementMode::Overlay => write!(f, "overlay"),
        }
    }
}

/// 跳过原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 账本显示节点已以相同规范文本落定
    AlreadySettled,
    /// 节点已脱离文档
    Stale,
}

/// 改写结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { writes: usize },
    Skipped(SkipReason),
}

/// 节点改写器
#[derive(Debug, Clone)]
pub struct Rewriter {
    mode: SettlementMode,
    marker_attribute: String,
    overlay_class: String,
    stylesheet: Option<(String, String)>,
}

impl Rewriter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            mode: config.settlement.mode,
            marker_attribute: config.selectors.marker_attribute.clone(),
            overlay_class: config.selectors.overlay_class.clone(),
            stylesheet: config
                .style
                .stylesheet
                .as_ref()
                .filter(|css| !css.trim().is_empty())
                .map(|css| (config.style.stylesheet_id.clone(), css.clone())),
        }
    }

    pub fn mode(&self) -> SettlementMode {
        self.mode
    }

    /// 改写节点
    pub fn apply(
        &self,
        state: &mut ConvergenceState,
        node: &Handle,
        canonical: &str,
        style: &[(String, String)],
    ) -> ApplyOutcome {
        if !is_attached(node) {
            tracing::debug!("节点已脱离文档，跳过改写: {}", canonical);
            return ApplyOutcome::Skipped(SkipReason::Stale);
        }

        if state.is_settled(node, canonical) {
            return ApplyOutcome::Skipped(SkipReason::AlreadySettled);
        }

        let previous = state.take(node);
        let mut writes = 0;

        let current_style = get_node_attr(node, "style");
        let original_style = match &previous {
            // 我们的声明还在，说明现有 style 不是外部组件的原始值
            Some(prev) if contains_important(current_style.as_deref(), &prev.node_style) => {
                prev.original_style.clone()
            }
            _ => current_style.clone(),
        };
        let source_text = text_content_excluding(node, Some(&self.overlay_class))
            .trim()
            .to_string();
        // 替换模式保留最早的原文；覆盖模式从不改动原文，以外部组件的最新文本为准
        let original_text = match (&previous, self.mode) {
            (Some(prev), SettlementMode::Replace) => prev.original_text.clone(),
            _ => source_text.clone(),
        };

        let mut record = ConvergenceRecord {
            node: Rc::downgrade(node),
            original_text,
            source_text,
            original_texts: Vec::new(),
            original_style,
            canonical: canonical.to_string(),
            style: style.to_vec(),
            node_style: Vec::new(),
            mode: self.mode,
            overlay: None,
            appended: None,
            written_at: Instant::now(),
            applications: previous.as_ref().map(|p| p.applications).unwrap_or(0) + 1,
            overlay_class: self.overlay_class.clone(),
        };

        match self.mode {
            SettlementMode::Replace => {
                writes += self.replace_text(node, canonical, previous.as_ref(), &mut record);
                record.node_style = style.to_vec();
            }
            SettlementMode::Overlay => {
                writes += self.place_overlay(node, canonical, style, previous.as_ref(), &mut record);
                record.node_style = HIDE_DECLARATIONS
                    .iter()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect();
            }
        }

        let merged = merge_important(current_style.as_deref(), &record.node_style);
        if current_style.as_deref() != Some(merged.as_str()) {
            set_node_attr(node, "style", Some(merged));
            writes += 1;
        }

        if get_node_attr(node, &self.marker_attribute).as_deref() != Some(canonical) {
            set_node_attr(node, &self.marker_attribute, Some(canonical.to_string()));
            writes += 1;
        }

        tracing::debug!(
            "改写节点: {:?} -> {:?} ({}, 第{}次)",
            record.original_text,
            canonical,
            self.mode,
            record.applications
        );
        state.mark_settled(node, record);

        ApplyOutcome::Applied { writes }
    }

    fn replace_text(
        &self,
        node: &Handle,
        canonical: &str,
        previous: Option<&ConvergenceRecord>,
        record: &mut ConvergenceRecord,
    ) -> usize {
        let mut writes = 0;
        let texts = text_descendants(node, Some(&self.overlay_class));

        record.original_texts = texts
            .iter()
            .map(|text_node| {
                let inherited = previous.and_then(|prev| {
                    prev.original_texts.iter().find_map(|(weak, original)| {
                        weak.upgrade()
                            .filter(|n| Rc::ptr_eq(n, text_node))
                            .map(|_| original.clone())
                    })
                });
                let original = inherited.unwrap_or_else(|| get_text(text_node).unwrap_or_default());
                (Rc::downgrade(text_node), original)
            })
            .collect();

        let is_blank = |n: &Handle| {
            get_text(n)
                .map(|t| t.trim_matches(WHITESPACES).is_empty())
                .unwrap_or(true)
        };

        let reusable = previous
            .and_then(ConvergenceRecord::appended_handle)
            .filter(|n| is_child_of(n, node));

        let target = texts
            .iter()
            .find(|n| !is_blank(*n))
            .cloned()
            .or_else(|| reusable.clone());

        match target {
            Some(target) => {
                for text_node in &texts {
                    let desired = if Rc::ptr_eq(text_node, &target) {
                        canonical
                    } else {
                        ""
                    };
                    if get_text(text_node).as_deref() != Some(desired) {
                        set_text(text_node, desired);
                        writes += 1;
                    }
                }
                record.appended = reusable
                    .filter(|n| Rc::ptr_eq(n, &target))
                    .map(|n| Rc::downgrade(&n));
            }
            None => {
                let text_node = create_text_node(canonical);
                append_child(node, &text_node);
                record.appended = Some(Rc::downgrade(&text_node));
                writes += 1;
            }
        }

        writes
    }

    fn place_overlay(
        &self,
        node: &Handle,
        canonical: &str,
        style: &[(String, String)],
        previous: Option<&ConvergenceRecord>,
        record: &mut ConvergenceRecord,
    ) -> usize {
        let mut writes = 0;
        let overlay_style = self.overlay_style(style);

        let existing = previous
            .and_then(ConvergenceRecord::overlay_handle)
            .filter(|n| is_child_of(n, node))
            .or_else(|| {
                node.children
                    .borrow()
                    .iter()
                    .find(|child| has_class(child, &self.overlay_class))
                    .cloned()
            });

        let overlay = match existing {
            Some(overlay) => {
                if text_content_excluding(&overlay, None).trim() != canonical {
                    let children: Vec<Handle> = overlay.children.borrow().clone();
                    for child in &children {
                        remove_child(&overlay, child);
                    }
                    append_child(&overlay, &create_text_node(canonical));
                    writes += 1;
                }
                let current = get_node_attr(&overlay, "style");
                let merged = merge_important(current.as_deref(), &overlay_style);
                if current.as_deref() != Some(merged.as_str()) {
                    set_node_attr(&overlay, "style", Some(merged));
                    writes += 1;
                }
                overlay
            }
            None => {
                let overlay = create_element(
                    "span",
                    vec![
                        ("class", self.overlay_class.clone()),
                        ("style", merge_important(None, &overlay_style)),
                    ],
                );
                append_child(&overlay, &create_text_node(canonical));
                append_child(node, &overlay);
                writes += 1;
                overlay
            }
        };

        record.overlay = Some(Rc::downgrade(&overlay));
        writes
    }

    /// 覆盖层样式：负载本身，缺少字号时补上，避免继承父元素的隐藏字号
    fn overlay_style(&self, style: &[(String, String)]) -> Vec<(String, String)> {
        let mut declarations = style.to_vec();
        if !declarations
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("font-size"))
        {
            declarations.push(("font-size".to_string(), "initial".to_string()));
        }
        declarations
    }

    /// 撤销对节点的改写
    pub fn restore(&self, state: &mut ConvergenceState, node: &Handle) -> Option<String> {
        state.restore(node)
    }

    /// 向 `<head>` 注入全局样式表；已存在时不重复注入
    pub fn inject_stylesheet(&self, document: &Handle) -> bool {
        let Some((id, css)) = &self.stylesheet else {
            return false;
        };
        let Some(head) = find_first(document, "head") else {
            return false;
        };

        let exists = head
            .children
            .borrow()
            .iter()
            .any(|child| get_node_attr(child, "id").as_deref() == Some(id.as_str()));
        if exists {
            return false;
        }

        let style = create_element("style", vec![("id", id.clone())]);
        append_child(&style, &create_text_node(css));
        append_child(&head, &style);
        tracing::debug!("已注入样式表 #{}", id);
        true
    }
}

fn is_child_of(child: &Handle, parent: &Handle) -> bool {
    get_parent_node(child)
        .map(|p| Rc::ptr_eq(&p, parent))
        .unwrap_or(false)
}
