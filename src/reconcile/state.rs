//! 收敛状态账本
//!
//! 以节点身份为键记录每个被改写节点的原始内容和最后一次写入的规范文本。
//! 账本只持有 `Weak` 引用，节点的生命周期完全由 DOM 决定；
//! 节点被释放或脱离文档后，对应记录会在下一次扫描开始时被清理。

use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Instant;

use markup5ever_rcdom::{Handle, Node};

use crate::parsers::css::contains_important;
use crate::parsers::html::dom::{
    get_node_attr, get_parent_node, is_attached, remove_child, set_node_attr, set_text,
    text_content, text_content_excluding,
};
use crate::reconcile::config::constants;
use crate::reconcile::rewriter::SettlementMode;

/// 单个节点的收敛记录
#[derive(Debug, Clone)]
pub struct ConvergenceRecord {
    pub(crate) node: Weak<Node>,
    /// 首次改写前的显示文本（已去除首尾空白）
    pub original_text: String,
    /// 覆盖模式下被隐藏的文本（写入时），外部组件改动它后节点不再算落定
    pub source_text: String,
    /// 每个被改写文本节点的原始内容
    pub(crate) original_texts: Vec<(Weak<Node>, String)>,
    /// 原始 `style` 属性，`None` 表示原先没有该属性
    pub original_style: Option<String>,
    /// 最后一次写入的规范文本
    pub canonical: String,
    /// 请求的样式负载
    pub style: Vec<(String, String)>,
    /// 实际合并到节点自身 `style` 上的声明
    pub(crate) node_style: Vec<(String, String)>,
    pub mode: SettlementMode,
    pub(crate) overlay: Option<Weak<Node>>,
    /// 替换模式下为空元素追加的文本节点
    pub(crate) appended: Option<Weak<Node>>,
    pub written_at: Instant,
    /// 该节点累计被改写的次数
    pub applications: usize,
    pub(crate) overlay_class: String,
}

impl ConvergenceRecord {
    /// 节点当前显示的文本
    pub fn displayed_text(&self, node: &Handle) -> Option<String> {
        match self.mode {
            SettlementMode::Replace => Some(
                text_content_excluding(node, Some(&self.overlay_class))
                    .trim()
                    .to_string(),
            ),
            SettlementMode::Overlay => {
                let overlay = self.overlay_handle()?;
                let parent = get_parent_node(&overlay)?;
                if !Rc::ptr_eq(&parent, node) {
                    return None;
                }
                Some(text_content(&overlay).trim().to_string())
            }
        }
    }

    /// 节点是否仍保持着本记录写入的文本和样式
    pub fn holds(&self, node: &Handle) -> bool {
        if self.displayed_text(node).as_deref() != Some(self.canonical.as_str()) {
            return false;
        }
        if self.mode == SettlementMode::Overlay
            && text_content_excluding(node, Some(&self.overlay_class)).trim() != self.source_text
        {
            return false;
        }
        if !contains_important(get_node_attr(node, "style").as_deref(), &self.node_style) {
            return false;
        }
        match self.overlay_handle() {
            Some(overlay) => {
                contains_important(get_node_attr(&overlay, "style").as_deref(), &self.style)
            }
            None => true,
        }
    }

    pub(crate) fn overlay_handle(&self) -> Option<Handle> {
        self.overlay.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn appended_handle(&self) -> Option<Handle> {
        self.appended.as_ref().and_then(Weak::upgrade)
    }

    fn node_handle(&self) -> Option<Handle> {
        self.node.upgrade()
    }
}

/// 收敛账本
#[derive(Debug)]
pub struct ConvergenceState {
    records: HashMap<usize, ConvergenceRecord>,
    marker_attribute: String,
}

impl Default for ConvergenceState {
    fn default() -> Self {
        Self::new(constants::MARKER_ATTRIBUTE)
    }
}

fn key_of(node: &Handle) -> usize {
    Rc::as_ptr(node) as usize
}

impl ConvergenceState {
    pub fn new(marker_attribute: &str) -> Self {
        Self {
            records: HashMap::new(),
            marker_attribute: marker_attribute.to_string(),
        }
    }

    pub fn marker_attribute(&self) -> &str {
        &self.marker_attribute
    }

    /// 查找节点的记录；地址被复用的旧记录不会被返回
    pub fn get(&self, node: &Handle) -> Option<&ConvergenceRecord> {
        self.records.get(&key_of(node)).filter(|record| {
            record
                .node_handle()
                .map(|n| Rc::ptr_eq(&n, node))
                .unwrap_or(false)
        })
    }

    pub fn contains(&self, node: &Handle) -> bool {
        self.get(node).is_some()
    }

    /// 节点是否已经以 `canonical` 落定
    pub fn is_settled(&self, node: &Handle, canonical: &str) -> bool {
        self.get(node)
            .map(|record| record.canonical == canonical && record.holds(node))
            .unwrap_or(false)
    }

    /// 节点是否已落定（不关心规范文本）
    pub fn is_holding(&self, node: &Handle) -> bool {
        self.get(node)
            .map(|record| record.holds(node))
            .unwrap_or(false)
    }

    /// 写入或替换节点的记录
    pub fn mark_settled(&mut self, node: &Handle, record: ConvergenceRecord) {
        self.records.insert(key_of(node), record);
    }

    /// 取出节点的记录（用于重新改写时继承原始内容）
    pub(crate) fn take(&mut self, node: &Handle) -> Option<ConvergenceRecord> {
        if self.contains(node) {
            self.records.remove(&key_of(node))
        } else {
            None
        }
    }

    /// 撤销对节点的全部改写，返回原始文本
    ///
    /// 文本节点写回原始内容，`style` 恢复或移除，标记属性和覆盖层被移除，
    /// 记录被清除，节点可以被重新处理。
    pub fn restore(&mut self, node: &Handle) -> Option<String> {
        let record = self.take(node)?;
        undo(node, &record, &self.marker_attribute);
        tracing::debug!("已恢复节点原始内容: {:?}", record.original_text);
        Some(record.original_text)
    }

    /// 恢复所有仍然存活的节点，返回恢复的数量
    pub fn restore_all(&mut self) -> usize {
        let records: Vec<ConvergenceRecord> = self.records.drain().map(|(_, r)| r).collect();
        let mut restored = 0;
        for record in records {
            if let Some(node) = record.node_handle() {
                undo(&node, &record, &self.marker_attribute);
                restored += 1;
            }
        }
        restored
    }

    /// 清理节点已被释放或已脱离文档的记录，返回清理的数量
    pub fn prune(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| match record.node_handle() {
            Some(node) => is_attached(&node),
            None => false,
        });
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 所有仍然存活的被跟踪节点
    pub fn tracked_nodes(&self) -> Vec<Handle> {
        self.records
            .values()
            .filter_map(ConvergenceRecord::node_handle)
            .collect()
    }
}

fn undo(node: &Handle, record: &ConvergenceRecord, marker_attribute: &str) {
    for (text_node, original) in &record.original_texts {
        if let Some(text_node) = text_node.upgrade() {
            set_text(&text_node, original);
        }
    }

    if let Some(appended) = record.appended_handle() {
        remove_child(node, &appended);
    }

    if let Some(overlay) = record.overlay_handle() {
        remove_child(node, &overlay);
    }

    set_node_attr(node, "style", record.original_style.clone());
    set_node_attr(node, marker_attribute, None);
}
