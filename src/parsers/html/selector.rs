//! CSS 选择器解析与匹配
//!
//! 解析和匹配都交给 `selectors`，这里只为 rcdom 节点实现 `selectors::Element`。
//! 支持类型选择器、`*`、`.class`、`#id`、属性选择器（含 `i` 标志）、`:not()`、
//! 组合器和逗号列表。伪类与伪元素一律拒绝。

use std::fmt;
use std::rc::Rc;

use markup5ever_rcdom::{Handle, NodeData};
use selectors::attr::{
    AttrSelectorOperation, AttrSelectorOperator, CaseSensitivity, NamespaceConstraint,
};
use selectors::matching::{
    matches_selector, ElementSelectorFlags, IgnoreNthChildForInvalidation, MatchingContext,
    MatchingMode, NeedsSelectorFlags, QuirksMode,
};
use selectors::parser::{ParseRelative, SelectorParseErrorKind};
use selectors::{NthIndexCache, OpaqueElement};
use selectors_cssparser::{CowRcStr, ParseError, Parser, ParserInput, SourceLocation, ToCss};

use crate::reconcile::error::{ReconcileError, ReconcileResult};

use super::dom::{get_node_attr, get_node_name, get_parent_node, is_element};

/// 实现 `selectors::Element` 的元素句柄
#[derive(Clone)]
pub struct ElementRef(Handle);

impl fmt::Debug for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ElementRef")
            .field(&get_node_name(&self.0).unwrap_or_default())
            .finish()
    }
}

impl ElementRef {
    /// 只有元素节点可以参与匹配
    pub fn new(node: Handle) -> Option<Self> {
        is_element(&node).then_some(Self(node))
    }

    fn tag_name(&self) -> Option<&str> {
        get_node_name(&self.0)
    }

    fn attribute(&self, name: &str) -> Option<String> {
        get_node_attr(&self.0, name)
    }

    fn siblings(&self) -> Vec<Handle> {
        let Some(parent) = get_parent_node(&self.0) else {
            return Vec::new();
        };
        let siblings = parent.children.borrow().clone();
        siblings
    }
}

impl selectors::Element for ElementRef {
    type Impl = WidgetSelectors;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(&*self.0)
    }

    fn parent_element(&self) -> Option<Self> {
        get_parent_node(&self.0).and_then(ElementRef::new)
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        false
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        let siblings = self.siblings();
        let position = siblings.iter().position(|s| Rc::ptr_eq(s, &self.0))?;
        siblings[..position]
            .iter()
            .rev()
            .find_map(|s| ElementRef::new(s.clone()))
    }

    fn next_sibling_element(&self) -> Option<Self> {
        let siblings = self.siblings();
        let position = siblings.iter().position(|s| Rc::ptr_eq(s, &self.0))?;
        siblings[position + 1..]
            .iter()
            .find_map(|s| ElementRef::new(s.clone()))
    }

    fn first_element_child(&self) -> Option<Self> {
        self.0
            .children
            .borrow()
            .iter()
            .find_map(|child| ElementRef::new(child.clone()))
    }

    fn is_html_element_in_html_document(&self) -> bool {
        true
    }

    fn has_local_name(&self, local_name: &str) -> bool {
        self.tag_name() == Some(local_name)
    }

    fn has_namespace(&self, _ns: &()) -> bool {
        true
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.tag_name() == other.tag_name()
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&()>,
        local_name: &AttrString,
        operation: &AttrSelectorOperation<&AttrString>,
    ) -> bool {
        if !matches!(ns, NamespaceConstraint::Specific(())) {
            return false;
        }

        let Some(actual) = self.attribute(&local_name.0) else {
            return false;
        };

        match operation {
            AttrSelectorOperation::Exists => true,
            AttrSelectorOperation::WithValue {
                operator,
                case_sensitivity,
                value,
            } => {
                let (actual, expected) = match case_sensitivity {
                    CaseSensitivity::CaseSensitive => (actual, value.0.clone()),
                    CaseSensitivity::AsciiCaseInsensitive => {
                        (actual.to_ascii_lowercase(), value.0.to_ascii_lowercase())
                    }
                };
                attr_operator_matches(*operator, &actual, &expected)
            }
        }
    }

    fn match_non_ts_pseudo_class(
        &self,
        pc: &NonTSPseudoClass,
        _context: &mut MatchingContext<Self::Impl>,
    ) -> bool {
        match *pc {}
    }

    fn match_pseudo_element(
        &self,
        pe: &PseudoElement,
        _context: &mut MatchingContext<Self::Impl>,
    ) -> bool {
        match *pe {}
    }

    fn apply_selector_flags(&self, _flags: ElementSelectorFlags) {}

    fn is_link(&self) -> bool {
        matches!(self.tag_name(), Some("a" | "area")) && self.attribute("href").is_some()
    }

    fn is_html_slot_element(&self) -> bool {
        self.tag_name() == Some("slot")
    }

    fn has_id(&self, id: &AttrString, case_sensitivity: CaseSensitivity) -> bool {
        self.attribute("id")
            .is_some_and(|actual| same_name(case_sensitivity, &actual, &id.0))
    }

    fn has_class(&self, name: &AttrString, case_sensitivity: CaseSensitivity) -> bool {
        self.attribute("class").is_some_and(|classes| {
            classes
                .split_ascii_whitespace()
                .any(|class| same_name(case_sensitivity, class, &name.0))
        })
    }

    fn imported_part(&self, _name: &AttrString) -> Option<AttrString> {
        None
    }

    fn is_part(&self, _name: &AttrString) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.0.children.borrow().iter().all(|child| match &child.data {
            NodeData::Element { .. } => false,
            NodeData::Text { contents } => contents.borrow().is_empty(),
            _ => true,
        })
    }

    fn is_root(&self) -> bool {
        self.tag_name() == Some("html")
    }
}

fn same_name(case_sensitivity: CaseSensitivity, actual: &str, expected: &str) -> bool {
    match case_sensitivity {
        CaseSensitivity::CaseSensitive => actual == expected,
        CaseSensitivity::AsciiCaseInsensitive => actual.eq_ignore_ascii_case(expected),
    }
}

fn attr_operator_matches(operator: AttrSelectorOperator, actual: &str, expected: &str) -> bool {
    match operator {
        AttrSelectorOperator::Equal => actual == expected,
        AttrSelectorOperator::Includes => actual.split_ascii_whitespace().any(|p| p == expected),
        AttrSelectorOperator::DashMatch => {
            actual == expected
                || actual
                    .strip_prefix(expected)
                    .is_some_and(|rest| rest.starts_with('-'))
        }
        AttrSelectorOperator::Prefix => !expected.is_empty() && actual.starts_with(expected),
        AttrSelectorOperator::Suffix => !expected.is_empty() && actual.ends_with(expected),
        AttrSelectorOperator::Substring => !expected.is_empty() && actual.contains(expected),
    }
}

/// 选择器中使用的字符串
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AttrString(pub String);

impl From<&str> for AttrString {
    fn from(s: &str) -> Self {
        AttrString(s.to_string())
    }
}

impl std::borrow::Borrow<str> for AttrString {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl ToCss for AttrString {
    fn to_css<W>(&self, dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        selectors_cssparser::serialize_string(&self.0, dest)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WidgetSelectors;

impl selectors::SelectorImpl for WidgetSelectors {
    type ExtraMatchingData<'a> = ();
    type AttrValue = AttrString;
    type Identifier = AttrString;
    type LocalName = AttrString;
    type NamespacePrefix = AttrString;
    type NamespaceUrl = ();
    type BorrowedLocalName = str;
    type BorrowedNamespaceUrl = ();
    type NonTSPseudoClass = NonTSPseudoClass;
    type PseudoElement = PseudoElement;
}

/// 不支持任何非树结构伪类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonTSPseudoClass {}

impl selectors::parser::NonTSPseudoClass for NonTSPseudoClass {
    type Impl = WidgetSelectors;

    fn is_active_or_hover(&self) -> bool {
        match *self {}
    }

    fn is_user_action_state(&self) -> bool {
        match *self {}
    }
}

impl ToCss for NonTSPseudoClass {
    fn to_css<W>(&self, _dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        match *self {}
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoElement {}

impl selectors::parser::PseudoElement for PseudoElement {
    type Impl = WidgetSelectors;
}

impl ToCss for PseudoElement {
    fn to_css<W>(&self, _dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        match *self {}
    }
}

struct WidgetSelectorParser;

impl<'i> selectors::parser::Parser<'i> for WidgetSelectorParser {
    type Impl = WidgetSelectors;
    type Error = SelectorParseErrorKind<'i>;

    fn parse_non_ts_pseudo_class(
        &self,
        location: SourceLocation,
        name: CowRcStr<'i>,
    ) -> Result<NonTSPseudoClass, ParseError<'i, SelectorParseErrorKind<'i>>> {
        Err(location.new_custom_error(
            SelectorParseErrorKind::UnsupportedPseudoClassOrElement(name),
        ))
    }

    fn parse_pseudo_element(
        &self,
        location: SourceLocation,
        name: CowRcStr<'i>,
    ) -> Result<PseudoElement, ParseError<'i, SelectorParseErrorKind<'i>>> {
        Err(location.new_custom_error(
            SelectorParseErrorKind::UnsupportedPseudoClassOrElement(name),
        ))
    }

    fn parse_non_ts_functional_pseudo_class<'t>(
        &self,
        name: CowRcStr<'i>,
        parser: &mut Parser<'i, 't>,
    ) -> Result<NonTSPseudoClass, ParseError<'i, SelectorParseErrorKind<'i>>> {
        Err(parser.new_custom_error(
            SelectorParseErrorKind::UnsupportedPseudoClassOrElement(name),
        ))
    }

    fn default_namespace(&self) -> Option<()> {
        None
    }

    fn namespace_for_prefix(&self, _prefix: &AttrString) -> Option<()> {
        None
    }
}

/// 逗号分隔的选择器列表
#[derive(Clone)]
pub struct SelectorList {
    selectors: selectors::parser::SelectorList<WidgetSelectors>,
    source: String,
}

impl fmt::Debug for SelectorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectorList")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl SelectorList {
    /// 选择器原文
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.selectors.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.0.is_empty()
    }

    /// 判断元素是否匹配列表中的任一选择器
    pub fn matches(&self, node: &Handle) -> bool {
        let Some(element) = ElementRef::new(node.clone()) else {
            return false;
        };

        let mut nth_index_cache = NthIndexCache::default();
        let mut context = MatchingContext::new(
            MatchingMode::Normal,
            None,
            &mut nth_index_cache,
            QuirksMode::NoQuirks,
            NeedsSelectorFlags::No,
            IgnoreNthChildForInvalidation::No,
        );

        self.selectors
            .0
            .iter()
            .any(|selector| matches_selector(selector, 0, None, &element, &mut context))
    }
}

/// 解析选择器列表
pub fn parse_selector_list(selector: &str) -> ReconcileResult<SelectorList> {
    let mut input = ParserInput::new(selector);
    let mut parser = Parser::new(&mut input);

    let selectors = selectors::parser::SelectorList::parse(
        &WidgetSelectorParser,
        &mut parser,
        ParseRelative::No,
    )
    .map_err(|e| ReconcileError::InvalidSelector {
        selector: selector.to_string(),
        reason: format!("{:?}", e.kind),
    })?;

    Ok(SelectorList {
        selectors,
        source: selector.to_string(),
    })
}

/// 在子树中按文档顺序查找所有匹配的元素
pub fn query_selector_all(root: &Handle, list: &SelectorList) -> Vec<Handle> {
    let mut found = Vec::new();
    let mut stack: Vec<Handle> = vec![root.clone()];

    while let Some(node) = stack.pop() {
        if list.matches(&node) {
            found.push(node.clone());
        }
        for child in node.children.borrow().iter().rev() {
            stack.push(child.clone());
        }
    }

    found
}
