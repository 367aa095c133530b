// 集成测试公共模块
//
// 提供测试辅助工具和一个模拟外部评价组件的渲染器

use std::time::{Duration, Instant};

use markup5ever_rcdom::{Handle, RcDom};

use storefront_reconciler::parsers::html::dom::{
    append_child, create_element, create_text_node, find_first, get_node_attr, html_to_dom,
    set_node_attr, set_text, text_content, text_descendants,
};
use storefront_reconciler::parsers::html::selector::{parse_selector_list, query_selector_all};
use storefront_reconciler::reconcile::{
    EngineConfig, MutationRecord, ObservationLoop, Reconciler,
};

pub struct HtmlTestHelper;

impl HtmlTestHelper {
    /// 创建测试用的DOM结构
    pub fn create_test_dom(html: &str) -> RcDom {
        html_to_dom(html.as_bytes(), "utf-8".to_string())
    }

    /// 带有多语言评价徽章的商品列表页
    pub fn create_badge_page() -> String {
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Collection</title>
    <meta charset="UTF-8">
</head>
<body>
    <div class="product-card">
        <div class="jdgm-widget jdgm-preview-badge">
            <span class="jdgm-prev-badge__text">7 件のレビュー</span>
        </div>
    </div>
    <div class="product-card">
        <span class="review-count">12 customer reviews</span>
    </div>
    <div class="product-card">
        <span class="product-review-count">3 avis</span>
    </div>
    <div class="product-card">
        <span class="review-count">Free Shipping</span>
    </div>
    <script>window.reviews = 42;</script>
</body>
</html>"#
            .to_string()
    }

    /// 组件尚未渲染的空容器页面
    pub fn create_empty_widget_page() -> String {
        r#"<!DOCTYPE html>
<html lang="en">
<head><title>Product</title></head>
<body>
    <h1>Linen Shirt</h1>
    <div id="widget" class="jdgm-widget"></div>
</body>
</html>"#
            .to_string()
    }

    /// 包含大量徽章的页面
    pub fn create_large_page(count: usize) -> String {
        let mut html = String::from("<!DOCTYPE html><html><head><title>Large</title></head><body>");
        for i in 1..=count {
            html.push_str(&format!(
                r#"<div class="product-card"><span class="review-count">{} reviews</span></div>"#,
                i
            ));
        }
        html.push_str("</body></html>");
        html
    }

    pub fn select(dom: &RcDom, selector: &str) -> Vec<Handle> {
        let list = parse_selector_list(selector).expect("test selector should parse");
        query_selector_all(&dom.document, &list)
    }

    pub fn texts(dom: &RcDom, selector: &str) -> Vec<String> {
        Self::select(dom, selector)
            .iter()
            .map(|node| text_content(node).trim().to_string())
            .collect()
    }
}

/// 测试配置构建器
pub struct TestConfigBuilder {
    config: EngineConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    /// 关闭阶段性复查，轮询间隔拉长到测试窗口之外
    pub fn quiet(mut self) -> Self {
        self.config.schedule.recheck_delays = Vec::new();
        self.config.schedule.poll_interval = Duration::from_secs(3600);
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.config.schedule.max_retries = max_retries;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.schedule.poll_interval = interval;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration, max_wait: Duration) -> Self {
        self.config.schedule.debounce = debounce;
        self.config.schedule.debounce_max_wait = max_wait;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

/// 创建观察循环
pub fn observation_loop(dom: &RcDom, config: &EngineConfig) -> ObservationLoop {
    let engine = Reconciler::new(dom.document.clone(), config).expect("engine should build");
    ObservationLoop::new(engine, config)
}

/// 测试时钟
pub struct TestClock {
    start: Instant,
    offset: Duration,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Duration::ZERO,
        }
    }

    pub fn now(&self) -> Instant {
        self.start + self.offset
    }

    pub fn advance(&mut self, by: Duration) -> Instant {
        self.offset += by;
        self.now()
    }

    pub fn advance_ms(&mut self, ms: u64) -> Instant {
        self.advance(Duration::from_millis(ms))
    }
}

/// 模拟外部评价组件
///
/// 组件完全拥有自己的容器：重新渲染时丢弃旧节点并创建新节点，
/// 也可能把已经被改写的文本或样式改回去。每个操作都返回宿主会转发的变更记录。
pub struct FakeWidget {
    container: Handle,
    badge_class: String,
}

impl FakeWidget {
    pub fn new(container: Handle) -> Self {
        Self {
            container,
            badge_class: "jdgm-prev-badge__text".to_string(),
        }
    }

    pub fn find(dom: &RcDom, id: &str) -> Self {
        let container = HtmlTestHelper::select(dom, &format!("#{}", id))
            .into_iter()
            .next()
            .expect("widget container should exist");
        Self::new(container)
    }

    pub fn container(&self) -> &Handle {
        &self.container
    }

    /// 当前徽章元素
    pub fn badge(&self) -> Option<Handle> {
        find_first(&self.container, "span")
    }

    /// 丢弃现有内容并渲染新的徽章
    pub fn render(&self, text: &str) -> (Handle, MutationRecord) {
        let removed: Vec<Handle> = self.container.children.borrow().clone();
        self.container.children.borrow_mut().clear();
        for child in &removed {
            child.parent.set(None);
        }

        let badge = create_element("span", vec![("class", self.badge_class.clone())]);
        append_child(&badge, &create_text_node(text));
        append_child(&self.container, &badge);

        let record = MutationRecord::ChildList {
            target: self.container.clone(),
            added: vec![badge.clone()],
            removed,
        };
        (badge, record)
    }

    /// 把徽章文本改回组件自己的格式
    pub fn revert_text(&self, text: &str) -> Vec<MutationRecord> {
        let Some(badge) = self.badge() else {
            return Vec::new();
        };
        let nodes = text_descendants(&badge, Some("reconcile-overlay"));
        let mut records = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            set_text(node, if i == 0 { text } else { "" });
            records.push(MutationRecord::CharacterData {
                target: node.clone(),
            });
        }
        records
    }

    /// 覆盖徽章的 style 属性
    pub fn restyle(&self, style: &str) -> Option<MutationRecord> {
        let badge = self.badge()?;
        set_node_attr(&badge, "style", Some(style.to_string()));
        Some(MutationRecord::Attributes {
            target: badge,
            name: "style".to_string(),
        })
    }

    pub fn badge_style(&self) -> Option<String> {
        self.badge().and_then(|badge| get_node_attr(&badge, "style"))
    }

    pub fn badge_text(&self) -> Option<String> {
        self.badge()
            .map(|badge| text_content(&badge).trim().to_string())
    }
}
