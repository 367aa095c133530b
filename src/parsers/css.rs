//! 内联样式解析器模块
//!
//! 解析元素 `style` 属性中的声明，并以 `!important` 优先级合并样式负载，
//! 使外部组件重新应用自身样式表时仍无法覆盖规范化的外观。
//!
//! # 使用示例
//!
//! ```rust
//! use storefront_reconciler::parsers::css::{merge_important, parse_inline_style};
//!
//! let payload = vec![("color".to_string(), "#666".to_string())];
//! let merged = merge_important(Some("color: red; margin: 0"), &payload);
//! assert_eq!(merged, "margin: 0; color: #666 !important");
//! assert!(parse_inline_style(&merged)[1].important);
//! ```

use cssparser::{Delimiter, ParseError, Parser, ParserInput};

/// 单条样式声明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleDeclaration {
    /// 属性名（小写）
    pub name: String,
    /// 属性值（不含 `!important`）
    pub value: String,
    /// 是否带有 `!important`
    pub important: bool,
}

impl StyleDeclaration {
    /// 序列化为 `name: value[ !important]`
    pub fn to_css(&self) -> String {
        if self.important {
            format!("{}: {} !important", self.name, self.value)
        } else {
            format!("{}: {}", self.name, self.value)
        }
    }
}

/// 解析内联样式声明列表
///
/// 无法解析的声明会被跳过，其余声明保持原有顺序。
pub fn parse_inline_style(style: &str) -> Vec<StyleDeclaration> {
    let mut input = ParserInput::new(style);
    let mut parser = Parser::new(&mut input);
    let mut declarations = Vec::new();

    while !parser.is_exhausted() {
        let result: Result<StyleDeclaration, ParseError<'_, ()>> =
            parser.parse_until_after(Delimiter::Semicolon, |p| {
                let name = p.expect_ident()?.to_ascii_lowercase();
                p.expect_colon()?;
                let start = p.position();
                while p.next().is_ok() {}
                let raw = p.slice_from(start).trim();
                let (value, important) = split_important(raw);
                Ok(StyleDeclaration {
                    name,
                    value: value.to_string(),
                    important,
                })
            });

        if let Ok(declaration) = result {
            if !declaration.value.is_empty() {
                declarations.push(declaration);
            }
        }
    }

    declarations
}

fn split_important(raw: &str) -> (&str, bool) {
    let lowered = raw.to_ascii_lowercase();
    if let Some(index) = lowered.rfind('!') {
        if lowered[index + 1..].trim() == "important" {
            return (raw[..index].trim_end(), true);
        }
    }
    (raw, false)
}

/// 序列化声明列表
pub fn serialize_declarations(declarations: &[StyleDeclaration]) -> String {
    declarations
        .iter()
        .map(StyleDeclaration::to_css)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 以 `!important` 合并样式负载
///
/// 与负载同名的已有声明被替换，其余声明原样保留。
pub fn merge_important(existing: Option<&str>, payload: &[(String, String)]) -> String {
    let mut declarations: Vec<StyleDeclaration> = existing
        .map(parse_inline_style)
        .unwrap_or_default()
        .into_iter()
        .filter(|d| !payload.iter().any(|(name, _)| name.eq_ignore_ascii_case(&d.name)))
        .collect();

    for (name, value) in payload {
        declarations.push(StyleDeclaration {
            name: name.to_ascii_lowercase(),
            value: value.trim().to_string(),
            important: true,
        });
    }

    serialize_declarations(&declarations)
}

/// 检查样式中是否仍然包含负载的全部 `!important` 声明
pub fn contains_important(existing: Option<&str>, payload: &[(String, String)]) -> bool {
    if payload.is_empty() {
        return true;
    }
    let declarations = match existing {
        Some(style) => parse_inline_style(style),
        None => return false,
    };

    payload.iter().all(|(name, value)| {
        declarations.iter().any(|d| {
            d.important && d.name.eq_ignore_ascii_case(name) && d.value == value.trim()
        })
    })
}
