use encoding_rs::Encoding;
use html5ever::serialize::{serialize, SerializeOpts};
use markup5ever_rcdom::{Handle, SerializableHandle};

use crate::reconcile::error::{ReconcileError, ReconcileResult};

/// 序列化文档
///
/// `document_encoding` 非空且可识别时按该编码输出，否则输出 UTF-8。
pub fn serialize_document(document: &Handle, document_encoding: &str) -> ReconcileResult<Vec<u8>> {
    let mut buf: Vec<u8> = Vec::new();

    let serializable: SerializableHandle = document.clone().into();
    serialize(&mut buf, &serializable, SerializeOpts::default())
        .map_err(|e| ReconcileError::IoError(format!("无法序列化文档: {}", e)))?;

    if !document_encoding.is_empty() {
        if let Some(encoding) = Encoding::for_label(document_encoding.as_bytes()) {
            if encoding != encoding_rs::UTF_8 {
                let s: &str = &String::from_utf8_lossy(&buf);
                let (data, _, _) = encoding.encode(s);
                buf = data.to_vec();
            }
        }
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::html::dom::html_to_dom;

    #[test]
    fn test_serialize_utf8() {
        let dom = html_to_dom("<p>7 件のレビュー</p>".as_bytes(), "utf-8".to_string());
        let out = serialize_document(&dom.document, "utf-8").unwrap();
        let html = String::from_utf8(out).unwrap();
        assert!(html.contains("<p>7 件のレビュー</p>"));
    }

    #[test]
    fn test_serialize_legacy_encoding() {
        let dom = html_to_dom("<p>レビュー</p>".as_bytes(), "utf-8".to_string());
        let out = serialize_document(&dom.document, "shift_jis").unwrap();
        let (expected, _, _) = encoding_rs::SHIFT_JIS.encode("レビュー");
        assert!(out.windows(expected.len()).any(|w| w == &expected[..]));
    }

    #[test]
    fn test_unknown_encoding_falls_back_to_utf8() {
        let dom = html_to_dom(b"<p>x</p>", "utf-8".to_string());
        let out = serialize_document(&dom.document, "no-such-charset").unwrap();
        assert!(String::from_utf8(out).is_ok());
    }
}
