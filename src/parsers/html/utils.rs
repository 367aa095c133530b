/// ASCII 空白字符
pub const WHITESPACES: &[char] = &[' ', '\t', '\n', '\x0c', '\r'];

/// 不会渲染文本内容的元素，遍历文本时跳过
pub const NON_RENDERED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "meta", "link", "title", "svg", "math",
    "canvas", "iframe", "object", "embed",
];

/// 判断字符串是否包含至少一个 ASCII 数字
pub fn has_digit(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_digit() {
        assert!(has_digit("12 reviews"));
        assert!(has_digit("レビュー7件"));
        assert!(!has_digit("Free Shipping"));
        assert!(!has_digit("１２ reviews"));
    }
}
