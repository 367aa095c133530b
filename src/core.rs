use std::fs;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use encoding_rs::Encoding;
use markup5ever_rcdom::RcDom;

use crate::parsers::html::{get_charset, get_title, html_to_dom, serialize_document, set_charset};
use crate::reconcile::config::EngineConfig;
use crate::reconcile::engine::{Reconciler, ScanResult};
use crate::reconcile::error::{ReconcileError, ReconcileResult};

/// 单次修正的选项
#[derive(Debug, Clone)]
pub struct FixOptions {
    /// 输入编码；为空时使用文档声明的编码，再退回 UTF-8
    pub input_encoding: Option<String>,
    /// 输出编码；为空时沿用输入编码
    pub output_encoding: Option<String>,
    /// 静态文档上的最大扫描次数
    pub max_passes: usize,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            input_encoding: None,
            output_encoding: None,
            max_passes: 4,
        }
    }
}

/// 修正结果
#[derive(Debug, Clone)]
pub struct FixedDocument {
    /// 序列化后的文档
    pub data: Vec<u8>,
    pub title: Option<String>,
    /// 所有扫描的汇总
    pub result: ScanResult,
    pub passes: usize,
    /// 实际使用的文档编码
    pub encoding: String,
}

const ANSI_COLOR_RED: &str = "\x1b[31m";
const ANSI_COLOR_RESET: &str = "\x1b[0m";

/// 按输入编码解析文档；文档自身声明了有效编码时以声明为准
fn parse_with_encoding(input_data: &[u8], input_encoding: Option<String>) -> (RcDom, String) {
    let explicit = input_encoding.is_some();
    let mut document_encoding = input_encoding.unwrap_or_else(|| "utf-8".to_string());
    let mut dom = html_to_dom(input_data, document_encoding.clone());

    if explicit {
        return (dom, document_encoding);
    }

    if let Some(html_charset) = get_charset(&dom.document).filter(|c| !c.is_empty()) {
        if let Some(charset) = Encoding::for_label_no_replacement(html_charset.as_bytes()) {
            if !charset.name().eq_ignore_ascii_case(&document_encoding) {
                tracing::debug!("按文档声明的编码重新解析: {}", charset.name());
                dom = html_to_dom(input_data, charset.name().to_string());
            }
            document_encoding = html_charset;
        }
    }

    (dom, document_encoding)
}

/// 对一份静态 HTML 运行收敛引擎直到不动点，返回改写后的文档
///
/// 静态文档没有外部渲染器，启动阶段的重试会折叠成达到不动点所需的扫描次数。
pub fn fix_document_from_data(
    config: &EngineConfig,
    input_data: &[u8],
    options: &FixOptions,
) -> ReconcileResult<FixedDocument> {
    if let Some(label) = &options.output_encoding {
        if Encoding::for_label_no_replacement(label.as_bytes()).is_none() {
            return Err(ReconcileError::ConfigError(format!(
                "未知的输出编码: {}",
                label
            )));
        }
    }

    let (dom, document_encoding) = parse_with_encoding(input_data, options.input_encoding.clone());

    let mut engine = Reconciler::new(dom.document.clone(), config)?;
    let result = engine.run_to_fixed_point(options.max_passes);
    let passes = engine.passes();

    let encoding = match &options.output_encoding {
        Some(custom) => {
            set_charset(&dom.document, custom);
            custom.clone()
        }
        None => document_encoding,
    };

    let title = get_title(&dom.document);
    let mut data = serialize_document(&dom.document, &encoding)?;
    if data.last() != Some(&b'\n') {
        data.push(b'\n');
    }

    Ok(FixedDocument {
        data,
        title,
        result,
        passes,
        encoding,
    })
}

/// 读取本地文件并修正
pub fn fix_document(
    config: &EngineConfig,
    path: &str,
    options: &FixOptions,
) -> ReconcileResult<FixedDocument> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(ReconcileError::IoError(format!(
            "文件不存在: {}",
            path.display()
        )));
    }

    let data = fs::read(path)?;
    fix_document_from_data(config, &data, options)
}

/// 替换输出路径中的占位符并清理标题中的非法字符
pub fn format_output_path(path: &str, document_title: Option<&str>) -> String {
    let datetime: &str = &Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let title = document_title.unwrap_or("");

    path.replace("%timestamp%", &datetime.replace(':', "_"))
        .replace(
            "%title%",
            title
                .replace(['/', '\\'], "_")
                .replace('<', "[")
                .replace('>', "]")
                .replace(':', " - ")
                .replace('\"', "")
                .replace('|', "-")
                .replace('?', "")
                .trim_start_matches('.'),
        )
        .replace("%extension%", "html")
        .replace("%ext%", "htm")
}

/// Prints an error message to stderr
pub fn print_error_message(msg: &str) {
    eprintln!("{ANSI_COLOR_RED}{msg}{ANSI_COLOR_RESET}");
}

/// Prints an info message to stdout
pub fn print_info_message(msg: &str) {
    println!("{msg}");
}
