//! 候选节点收集
//!
//! 两个来源：配置的选择器列表，以及在选择器一无所获时使用的文本遍历兜底。
//! 两者都按文档顺序返回去重后的元素。

use std::collections::HashSet;
use std::rc::Rc;

use markup5ever_rcdom::{Handle, NodeData};
use regex::Regex;

use crate::parsers::html::dom::{
    class_contains, get_node_attr, get_parent_node, has_class, is_non_rendered, text_content,
    text_content_excluding,
};
use crate::parsers::html::selector::{parse_selector_list, SelectorList};
use crate::parsers::html::utils::has_digit;
use crate::reconcile::config::{EngineConfig, WalkConfig};
use crate::reconcile::error::{ReconcileError, ReconcileResult};
use crate::reconcile::state::ConvergenceState;

/// 文本遍历的接受条件
#[derive(Debug, Clone)]
pub struct WalkFilter {
    max_text_len: usize,
    keyword: Option<Regex>,
    context_classes: Vec<String>,
}

impl WalkFilter {
    pub fn from_config(config: &WalkConfig) -> ReconcileResult<Self> {
        let keyword = if config.keyword_pattern.trim().is_empty() {
            None
        } else {
            Some(Regex::new(&config.keyword_pattern).map_err(|e| {
                ReconcileError::ConfigError(format!("遍历关键词正则无效: {}", e))
            })?)
        };

        Ok(Self {
            max_text_len: config.max_text_len,
            keyword,
            context_classes: config.context_classes.clone(),
        })
    }

    /// 判断文本节点是否可作为候选
    ///
    /// 文本非空、不超过长度上限、含有数字，并且命中关键词或位于相关 class 的祖先之下。
    pub fn accepts(&self, text: &str, parent: &Handle) -> bool {
        let text = text.trim();
        if text.is_empty() || text.chars().count() > self.max_text_len || !has_digit(text) {
            return false;
        }

        if let Some(keyword) = &self.keyword {
            if keyword.is_match(text) {
                return true;
            }
        }

        self.has_context_ancestor(parent)
    }

    fn has_context_ancestor(&self, node: &Handle) -> bool {
        if self.context_classes.is_empty() {
            return false;
        }
        let mut current = Some(node.clone());
        while let Some(element) = current {
            if self
                .context_classes
                .iter()
                .any(|fragment| class_contains(&element, fragment))
            {
                return true;
            }
            current = get_parent_node(&element);
        }
        false
    }
}

/// 文本叶子节点的显式栈遍历器
///
/// 遍历有限且可重启：`reset` 之后从新的根重新开始。不渲染文本的元素
/// 以及带有跳过类名的子树不会被进入。
pub struct TextWalker {
    stack: Vec<Handle>,
    skip_class: Option<String>,
}

impl TextWalker {
    pub fn new(root: &Handle, skip_class: Option<&str>) -> Self {
        Self {
            stack: vec![root.clone()],
            skip_class: skip_class.map(str::to_string),
        }
    }

    pub fn reset(&mut self, root: &Handle) {
        self.stack.clear();
        self.stack.push(root.clone());
    }
}

impl Iterator for TextWalker {
    type Item = Handle;

    fn next(&mut self) -> Option<Handle> {
        while let Some(node) = self.stack.pop() {
            match &node.data {
                NodeData::Text { .. } => return Some(node),
                NodeData::Element { .. } => {
                    if is_non_rendered(&node) {
                        continue;
                    }
                    if let Some(class_name) = &self.skip_class {
                        if has_class(&node, class_name) {
                            continue;
                        }
                    }
                    for child in node.children.borrow().iter().rev() {
                        self.stack.push(child.clone());
                    }
                }
                NodeData::Document => {
                    for child in node.children.borrow().iter().rev() {
                        self.stack.push(child.clone());
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// 候选元素收集器
#[derive(Debug, Clone)]
pub struct ElementSelector {
    lists: Vec<SelectorList>,
    filter: WalkFilter,
    walk_enabled: bool,
    marker_attribute: String,
    overlay_class: String,
}

impl ElementSelector {
    pub fn new(config: &EngineConfig) -> ReconcileResult<Self> {
        let lists = config
            .selectors
            .queries
            .iter()
            .map(|query| parse_selector_list(query))
            .collect::<ReconcileResult<Vec<_>>>()?;

        Ok(Self {
            lists,
            filter: WalkFilter::from_config(&config.walk)?,
            walk_enabled: config.walk.enabled,
            marker_attribute: config.selectors.marker_attribute.clone(),
            overlay_class: config.selectors.overlay_class.clone(),
        })
    }

    pub fn walk_enabled(&self) -> bool {
        self.walk_enabled
    }

    /// 按选择器收集候选元素（文档顺序，去重）
    pub fn collect(&self, root: &Handle, state: &ConvergenceState) -> Vec<Handle> {
        let mut found = Vec::new();
        let mut stack: Vec<Handle> = vec![root.clone()];

        while let Some(node) = stack.pop() {
            if let NodeData::Element { .. } = node.data {
                if has_class(&node, &self.overlay_class) {
                    continue;
                }
                if self.lists.iter().any(|list| list.matches(&node))
                    && !self.is_excluded(&node, state)
                {
                    found.push(node.clone());
                }
            }
            for child in node.children.borrow().iter().rev() {
                stack.push(child.clone());
            }
        }

        found
    }

    /// 文本遍历兜底：返回通过过滤条件的文本节点的父元素
    pub fn walk_text(&self, root: &Handle, state: &ConvergenceState) -> Vec<Handle> {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut found = Vec::new();

        for text_node in TextWalker::new(root, Some(&self.overlay_class)) {
            let Some(parent) = get_parent_node(&text_node) else {
                continue;
            };
            let text = text_content(&text_node);
            if !self.filter.accepts(&text, &parent) {
                continue;
            }
            if !seen.insert(Rc::as_ptr(&parent) as usize) {
                continue;
            }
            if self.is_excluded(&parent, state) {
                continue;
            }
            found.push(parent);
        }

        found
    }

    /// 不在账本中、但标记属性与当前显示文本一致的节点（上一个引擎实例落定的节点）
    pub fn is_excluded(&self, node: &Handle, state: &ConvergenceState) -> bool {
        if state.contains(node) {
            return false;
        }
        let Some(marker) = get_node_attr(node, &self.marker_attribute) else {
            return false;
        };

        if text_content_excluding(node, Some(&self.overlay_class)).trim() == marker {
            return true;
        }

        node.children.borrow().iter().any(|child| {
            has_class(child, &self.overlay_class) && text_content(child).trim() == marker
        })
    }
}
