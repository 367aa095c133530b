//! HTML解析和处理模块
//!
//! - `utils`: 基础工具函数和常量
//! - `dom`: 基础DOM操作
//! - `selector`: 选择器解析与匹配
//! - `metadata`: 文档元数据处理
//! - `serializer`: 序列化功能

pub mod dom;
pub mod metadata;
pub mod selector;
pub mod serializer;
pub mod utils;

pub use dom::{
    get_child_node_by_name, get_node_attr, get_node_name, get_parent_node, html_to_dom,
    is_attached, set_node_attr, text_content,
};
pub use metadata::{get_charset, get_title, set_charset};
pub use selector::{parse_selector_list, query_selector_all, SelectorList};
pub use serializer::serialize_document;
pub use utils::WHITESPACES;
