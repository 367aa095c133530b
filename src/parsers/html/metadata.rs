//! HTML 文档元数据处理
//!
//! CLI 在改写保存下来的页面时需要：
//! - 读取文档声明的字符编码，以便按正确编码重新解析
//! - 在输出编码与原文不同时更新编码声明
//! - 读取标题，用于输出路径中的 `%title%`

use markup5ever_rcdom::{Handle, NodeData};

use super::dom::{
    append_child, create_element, find_first, get_child_node_by_name, get_node_attr, set_node_attr,
};

fn head_meta_nodes(document: &Handle) -> Vec<Handle> {
    let Some(head) = get_child_node_by_name(document, "html")
        .and_then(|html| get_child_node_by_name(&html, "head"))
    else {
        return Vec::new();
    };
    let metas: Vec<Handle> = head
        .children
        .borrow()
        .iter()
        .filter(|child| {
            matches!(&child.data, NodeData::Element { name, .. } if &*name.local == "meta")
        })
        .cloned()
        .collect();
    metas
}

/// 从 `content-type` 取值中提取 charset 参数
fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|part| {
        let part = part.trim();
        let (key, value) = part.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// 获取文档声明的字符编码
///
/// 同时支持 `<meta charset>` 和 `<meta http-equiv="content-type">` 两种写法，
/// 以 `<head>` 中第一个声明为准。
pub fn get_charset(document: &Handle) -> Option<String> {
    for meta in head_meta_nodes(document) {
        if let Some(charset) = get_node_attr(&meta, "charset") {
            return Some(charset);
        }

        if get_node_attr(&meta, "http-equiv")
            .unwrap_or_default()
            .eq_ignore_ascii_case("content-type")
        {
            if let Some(content) = get_node_attr(&meta, "content") {
                return charset_from_content_type(&content);
            }
        }
    }

    None
}

/// 设置文档的字符编码声明，没有声明时在 `<head>` 末尾追加一个
pub fn set_charset(document: &Handle, charset: &str) {
    for meta in head_meta_nodes(document) {
        if get_node_attr(&meta, "charset").is_some() {
            set_node_attr(&meta, "charset", Some(charset.to_string()));
            return;
        }

        if get_node_attr(&meta, "http-equiv")
            .unwrap_or_default()
            .eq_ignore_ascii_case("content-type")
            && get_node_attr(&meta, "content").is_some()
        {
            set_node_attr(
                &meta,
                "content",
                Some(format!("text/html;charset={charset}")),
            );
            return;
        }
    }

    if let Some(head) = find_first(document, "head") {
        let meta = create_element("meta", vec![("charset", charset.to_string())]);
        append_child(&head, &meta);
    }
}

/// 获取文档标题
pub fn get_title(document: &Handle) -> Option<String> {
    let title = find_first(document, "title")?;
    let title_text = title
        .children
        .borrow()
        .iter()
        .find_map(|child| match &child.data {
            NodeData::Text { contents } => Some(contents.borrow().trim().to_string()),
            _ => None,
        });
    title_text
}
