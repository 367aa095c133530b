//! # 解析器模块
//!
//! - `html` - HTML文档解析、DOM操作、选择器、元数据处理、序列化
//! - `css` - 内联样式声明的解析与 `!important` 合并

pub mod css;
pub mod html;

// Re-export commonly used items for convenience
pub use css::{contains_important, merge_important, parse_inline_style, StyleDeclaration};
pub use html::{
    get_charset, get_title, html_to_dom, parse_selector_list, query_selector_all,
    serialize_document, set_charset,
};
