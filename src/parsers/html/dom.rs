use std::cell::RefCell;
use std::rc::Rc;

use encoding_rs::Encoding;
use html5ever::interface::{Attribute, QualName};
use html5ever::parse_document;
use html5ever::tendril::{format_tendril, StrTendril, TendrilSink};
use html5ever::{namespace_url, ns, LocalName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};

use super::utils::{NON_RENDERED_ELEMENTS, WHITESPACES};

/// 将 HTML 字节转换为 DOM
pub fn html_to_dom(data: &[u8], document_encoding: String) -> RcDom {
    let s: String;

    if let Some(encoding) = Encoding::for_label(document_encoding.as_bytes()) {
        let (string, _, _) = encoding.decode(data);
        s = string.to_string();
    } else {
        s = String::from_utf8_lossy(data).to_string();
    }

    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut s.as_bytes())
        .unwrap_or_default()
}

/// 根据名称获取子节点
pub fn get_child_node_by_name(parent: &Handle, node_name: &str) -> Option<Handle> {
    let children = parent.children.borrow();
    let matching_children = children.iter().find(|child| match child.data {
        NodeData::Element { ref name, .. } => &*name.local == node_name,
        _ => false,
    });
    matching_children.cloned()
}

/// 获取节点属性值
pub fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => {
            for attr in attrs.borrow().iter() {
                if &*attr.name.local == attr_name {
                    return Some(attr.value.to_string());
                }
            }
            None
        }
        _ => None,
    }
}

/// 获取节点名称
pub fn get_node_name(node: &Handle) -> Option<&'_ str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

/// 获取父节点
///
/// `Cell` 中的弱引用在读取后会被放回，节点与父节点的关系保持不变。
pub fn get_parent_node(child: &Handle) -> Option<Handle> {
    let weak = child.parent.take();
    let parent = weak.as_ref().and_then(|node| node.upgrade());
    child.parent.set(weak);
    parent
}

/// 检查节点是否仍然挂在文档树上
///
/// 沿父节点链向上查找，只有最终到达 Document 节点时才视为已挂载。
pub fn is_attached(node: &Handle) -> bool {
    let mut current = node.clone();
    loop {
        if let NodeData::Document = current.data {
            return true;
        }
        match get_parent_node(&current) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

/// 设置节点属性
pub fn set_node_attr(node: &Handle, attr_name: &str, attr_value: Option<String>) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let attrs_mut = &mut attrs.borrow_mut();
        let mut i = 0;
        let mut found_existing_attr: bool = false;

        while i < attrs_mut.len() {
            if &attrs_mut[i].name.local == attr_name {
                found_existing_attr = true;

                if let Some(attr_value) = attr_value.clone() {
                    attrs_mut[i].value.clear();
                    attrs_mut[i].value.push_slice(attr_value.as_str());
                } else {
                    // Remove attr completely if attr_value is not defined
                    attrs_mut.remove(i);
                    continue;
                }
            }

            i += 1;
        }

        if !found_existing_attr {
            if let Some(attr_value) = attr_value {
                let name = LocalName::from(attr_name);

                attrs_mut.push(Attribute {
                    name: QualName::new(None, ns!(), name),
                    value: format_tendril!("{}", attr_value),
                });
            }
        }
    };
}

/// 检查元素的 class 属性是否包含指定的类名
pub fn has_class(node: &Handle, class_name: &str) -> bool {
    get_node_attr(node, "class")
        .map(|classes| classes.split(WHITESPACES).any(|c| c == class_name))
        .unwrap_or(false)
}

/// 检查元素的 class 属性是否包含指定片段（对应 `[class*="..."]`）
pub fn class_contains(node: &Handle, fragment: &str) -> bool {
    get_node_attr(node, "class")
        .map(|classes| classes.contains(fragment))
        .unwrap_or(false)
}

pub fn is_element(node: &Handle) -> bool {
    matches!(node.data, NodeData::Element { .. })
}

/// 检查元素是否属于不渲染文本的类型（script、style 等）
pub fn is_non_rendered(node: &Handle) -> bool {
    get_node_name(node)
        .map(|name| NON_RENDERED_ELEMENTS.contains(&name))
        .unwrap_or(false)
}

/// 获取元素的文本内容（等价于 `textContent`）
pub fn text_content(node: &Handle) -> String {
    text_content_excluding(node, None)
}

/// 获取元素的文本内容，跳过带有指定类名的子树
///
/// 与 `text_descendants` 看到的文本一致：不渲染的子元素（script、style 等）被跳过，
/// 只有 `node` 本身可以是这类元素。
pub fn text_content_excluding(node: &Handle, skip_class: Option<&str>) -> String {
    let mut out = String::new();
    for text in text_descendants(node, skip_class) {
        if let NodeData::Text { contents } = &text.data {
            out.push_str(&contents.borrow());
        }
    }
    out
}

/// 收集元素下所有文本节点（文档顺序）
pub fn text_descendants(node: &Handle, skip_class: Option<&str>) -> Vec<Handle> {
    let mut found = Vec::new();
    let mut stack: Vec<Handle> = vec![node.clone()];

    while let Some(current) = stack.pop() {
        match &current.data {
            NodeData::Text { .. } => found.push(current.clone()),
            NodeData::Element { .. } | NodeData::Document => {
                if is_non_rendered(&current) && !Rc::ptr_eq(&current, node) {
                    continue;
                }
                if let Some(class_name) = skip_class {
                    if has_class(&current, class_name) {
                        continue;
                    }
                }
                for child in current.children.borrow().iter().rev() {
                    stack.push(child.clone());
                }
            }
            _ => {}
        }
    }

    found
}

/// 读取文本节点内容
pub fn get_text(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Text { contents } => Some(contents.borrow().to_string()),
        _ => None,
    }
}

/// 原地替换文本节点内容（节点本身不会被替换）
pub fn set_text(node: &Handle, text: &str) -> bool {
    match &node.data {
        NodeData::Text { contents } => {
            let mut contents = contents.borrow_mut();
            contents.clear();
            contents.push_slice(text);
            true
        }
        _ => false,
    }
}

/// 创建新的文本节点
pub fn create_text_node(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from_slice(text)),
    })
}

/// 创建新的 HTML 元素
pub fn create_element(tag_name: &str, attrs: Vec<(&str, String)>) -> Handle {
    let attrs = attrs
        .into_iter()
        .map(|(name, value)| Attribute {
            name: QualName::new(None, ns!(), LocalName::from(name)),
            value: format_tendril!("{}", value),
        })
        .collect();

    Node::new(NodeData::Element {
        name: QualName::new(None, ns!(html), LocalName::from(tag_name)),
        attrs: RefCell::new(attrs),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

/// 追加子节点并设置父节点引用
pub fn append_child(parent: &Handle, child: &Handle) {
    if let Some(previous) = get_parent_node(child) {
        remove_child(&previous, child);
    }
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child.clone());
}

/// 移除子节点；返回子节点原先是否存在
pub fn remove_child(parent: &Handle, child: &Handle) -> bool {
    let mut children = parent.children.borrow_mut();
    let before = children.len();
    children.retain(|c| !Rc::ptr_eq(c, child));
    let removed = children.len() != before;
    if removed {
        child.parent.set(None);
    }
    removed
}

/// 从父节点上摘除节点（模拟外部组件的重新渲染）
pub fn detach(node: &Handle) -> bool {
    match get_parent_node(node) {
        Some(parent) => remove_child(&parent, node),
        None => false,
    }
}

/// 查找第一个指定名称的元素（深度优先，文档顺序）
pub fn find_first(node: &Handle, node_name: &str) -> Option<Handle> {
    let mut stack: Vec<Handle> = vec![node.clone()];

    while let Some(current) = stack.pop() {
        if get_node_name(&current) == Some(node_name) {
            return Some(current);
        }
        for child in current.children.borrow().iter().rev() {
            stack.push(child.clone());
        }
    }

    None
}
