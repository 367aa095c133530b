//! 观察循环集成测试
//!
//! 使用手动推进的时钟驱动 `ObservationLoop`，`FakeWidget` 扮演外部组件。

use std::time::Duration;

use storefront_reconciler::parsers::html::dom::{get_node_attr, text_descendants};
use storefront_reconciler::reconcile::{
    HostEvent, LoopState, MutationRecord, ReadyState, RetryPolicy, SettlementMode, TimerKind,
};

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{observation_loop, FakeWidget, HtmlTestHelper, TestClock, TestConfigBuilder};

#[test]
fn test_burst_of_mutations_triggers_one_pass() {
    let dom = HtmlTestHelper::create_test_dom(&HtmlTestHelper::create_empty_widget_page());
    let widget = FakeWidget::find(&dom, "widget");
    let config = TestConfigBuilder::new().quiet().with_max_retries(0).build();
    let mut observer = observation_loop(&dom, &config);
    let mut clock = TestClock::new();

    observer.start(ReadyState::Complete, clock.now());
    assert_eq!(observer.state(), LoopState::Watching);
    assert_eq!(observer.passes(), 1);

    for i in 0..50 {
        let now = clock.advance_ms(10);
        let (_, record) = widget.render(&format!("{} reviews", i + 1));
        observer.on_mutations(&[record], now);
        assert_eq!(observer.poll(now), 0);
    }
    assert_eq!(observer.pending_of(TimerKind::Debounce), 1);

    // 最后一次变更之后一个防抖窗口
    assert_eq!(observer.poll(clock.advance_ms(299)), 0);
    assert_eq!(observer.poll(clock.advance_ms(1)), 1);
    assert_eq!(observer.passes(), 2);
    assert_eq!(widget.badge_text().as_deref(), Some("(50)"));

    for _ in 0..10 {
        assert_eq!(observer.poll(clock.advance_ms(100)), 0);
    }
    assert_eq!(observer.passes(), 2);
    println!("✅ 50 次变更合并为 {} 次扫描", observer.passes() - 1);
}

#[test]
fn test_debounce_is_bounded_by_max_wait() {
    let dom = HtmlTestHelper::create_test_dom(&HtmlTestHelper::create_empty_widget_page());
    let widget = FakeWidget::find(&dom, "widget");
    let config = TestConfigBuilder::new()
        .quiet()
        .with_max_retries(0)
        .with_debounce(Duration::from_millis(300), Duration::from_millis(2000))
        .build();
    let mut observer = observation_loop(&dom, &config);
    let mut clock = TestClock::new();
    observer.start(ReadyState::Complete, clock.now());

    let mut first_pass_at = None;
    for step in 1..=30u64 {
        let now = clock.advance_ms(100);
        if observer.poll(now) > 0 && first_pass_at.is_none() {
            first_pass_at = Some(step * 100);
        }
        let (_, record) = widget.render("9 reviews");
        observer.on_mutations(&[record], now);
    }

    // 第一条变更在 100ms，最长等待 2000ms
    assert_eq!(first_pass_at, Some(2100));
}

#[test]
fn test_teardown_stops_everything() {
    let dom = HtmlTestHelper::create_test_dom(&HtmlTestHelper::create_empty_widget_page());
    let widget = FakeWidget::find(&dom, "widget");
    let config = TestConfigBuilder::new().with_max_retries(0).build();
    let mut observer = observation_loop(&dom, &config);
    let mut clock = TestClock::new();

    observer.start(ReadyState::Complete, clock.now());
    let (_, record) = widget.render("3 reviews");
    observer.on_mutations(&[record], clock.advance_ms(10));
    assert!(observer.pending_timers() > 0);

    observer.teardown();
    assert_eq!(observer.state(), LoopState::TornDown);
    assert_eq!(observer.pending_timers(), 0);
    assert!(!observer.is_observing());

    let passes = observer.passes();
    let (_, record) = widget.render("4 reviews");
    observer.on_mutations(&[record], clock.advance_ms(10));
    observer.on_host_event(&HostEvent::Focus, clock.now());
    for _ in 0..100 {
        assert_eq!(observer.poll(clock.advance_ms(100)), 0);
    }

    assert_eq!(observer.passes(), passes);
    assert_eq!(observer.pending_timers(), 0);
    assert_eq!(observer.next_deadline(), None);
    assert_eq!(widget.badge_text().as_deref(), Some("4 reviews"));
}

#[test]
fn test_retry_budget_is_finite() {
    let dom = HtmlTestHelper::create_test_dom("<p>Nothing to see here</p>");
    let config = TestConfigBuilder::new().quiet().with_max_retries(3).build();
    let mut observer = observation_loop(&dom, &config);
    let mut clock = TestClock::new();

    observer.start(ReadyState::Complete, clock.now());
    assert_eq!(observer.state(), LoopState::Retrying);

    for _ in 0..3 {
        assert_eq!(observer.poll(clock.advance_ms(100)), 1);
    }

    assert_eq!(observer.passes(), 4);
    assert_eq!(observer.retries(), 3);
    assert_eq!(observer.state(), LoopState::Watching);
    assert_eq!(observer.pending_of(TimerKind::Retry), 0);

    // 之后只剩轮询定时器
    assert_eq!(observer.pending_timers(), 1);
    assert_eq!(observer.pending_of(TimerKind::Poll), 1);
}

#[test]
fn test_retry_picks_up_late_widget() {
    let dom = HtmlTestHelper::create_test_dom(&HtmlTestHelper::create_empty_widget_page());
    let widget = FakeWidget::find(&dom, "widget");
    let config = TestConfigBuilder::new().quiet().build();
    let mut observer = observation_loop(&dom, &config);
    let mut clock = TestClock::new();

    observer.start(ReadyState::Complete, clock.now());
    observer.poll(clock.advance_ms(100));
    observer.poll(clock.advance_ms(100));
    assert_eq!(observer.state(), LoopState::Retrying);

    widget.render("21 reviews");
    // 还在重试阶段，变更不会被处理
    observer.on_mutations(&[], clock.advance_ms(50));
    assert_eq!(observer.pending_of(TimerKind::Debounce), 0);

    observer.poll(clock.advance_ms(50));
    assert_eq!(observer.state(), LoopState::Watching);
    assert_eq!(observer.retries(), 3);
    assert_eq!(widget.badge_text().as_deref(), Some("(21)"));
    assert_eq!(observer.last_result().map(|r| r.newly_settled), Some(1));
}

#[test]
fn test_exponential_retry_schedule() {
    let dom = HtmlTestHelper::create_test_dom("<p>empty</p>");
    let mut config = TestConfigBuilder::new().quiet().with_max_retries(4).build();
    config.schedule.retry = RetryPolicy::Exponential {
        initial: Duration::from_millis(100),
        max: Duration::from_millis(400),
    };
    let mut observer = observation_loop(&dom, &config);
    let clock = TestClock::new();
    let mut now = clock.now();

    observer.start(ReadyState::Complete, now);
    let mut delays = Vec::new();
    while observer.state() == LoopState::Retrying {
        let deadline = observer.next_deadline().unwrap();
        delays.push(deadline - now);
        now = deadline;
        observer.poll(now);
    }

    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(400),
        ]
    );
}

#[test]
fn test_steady_poll_fights_reversion() {
    let dom = HtmlTestHelper::create_test_dom(&HtmlTestHelper::create_empty_widget_page());
    let widget = FakeWidget::find(&dom, "widget");
    widget.render("5 reviews");
    let config = TestConfigBuilder::new()
        .quiet()
        .with_poll_interval(Duration::from_millis(1000))
        .build();
    let mut observer = observation_loop(&dom, &config);
    let mut clock = TestClock::new();

    observer.start(ReadyState::Complete, clock.now());
    assert_eq!(widget.badge_text().as_deref(), Some("(5)"));

    // 组件把文本改回去，但宿主没有转发变更
    widget.revert_text("5 reviews");
    assert_eq!(observer.poll(clock.advance_ms(999)), 0);
    assert_eq!(widget.badge_text().as_deref(), Some("5 reviews"));

    assert_eq!(observer.poll(clock.advance_ms(1)), 1);
    assert_eq!(widget.badge_text().as_deref(), Some("(5)"));
    assert_eq!(observer.pending_of(TimerKind::Poll), 1);
}

#[test]
fn test_reversion_mutation_is_relevant() {
    let dom = HtmlTestHelper::create_test_dom(&HtmlTestHelper::create_empty_widget_page());
    let widget = FakeWidget::find(&dom, "widget");
    widget.render("5 reviews");
    let config = TestConfigBuilder::new().quiet().build();
    let mut observer = observation_loop(&dom, &config);
    let mut clock = TestClock::new();
    observer.start(ReadyState::Complete, clock.now());

    let records = widget.revert_text("5 reviews");
    observer.on_mutations(&records, clock.advance_ms(10));
    assert_eq!(observer.pending_of(TimerKind::Debounce), 1);

    assert_eq!(observer.poll(clock.advance_ms(300)), 1);
    assert_eq!(widget.badge_text().as_deref(), Some("(5)"));

    let record = widget.restyle("color: blue").unwrap();
    observer.on_mutations(&[record], clock.advance_ms(10));
    assert_eq!(observer.pending_of(TimerKind::Debounce), 1);
}

#[test]
fn test_own_writes_do_not_retrigger() {
    let dom = HtmlTestHelper::create_test_dom(&HtmlTestHelper::create_empty_widget_page());
    let widget = FakeWidget::find(&dom, "widget");
    let (badge, _) = widget.render("5 reviews");
    let mut config = TestConfigBuilder::new().quiet().build();
    config.settlement.mode = SettlementMode::Overlay;
    let mut observer = observation_loop(&dom, &config);
    let mut clock = TestClock::new();
    observer.start(ReadyState::Complete, clock.now());
    assert!(get_node_attr(&badge, "data-reconciled").is_some());

    // 引擎自己的写入产生的变更记录
    let overlay = HtmlTestHelper::select(&dom, ".reconcile-overlay").remove(0);
    let mut records = vec![
        MutationRecord::Attributes {
            target: badge.clone(),
            name: "style".to_string(),
        },
        MutationRecord::Attributes {
            target: badge.clone(),
            name: "data-reconciled".to_string(),
        },
        MutationRecord::ChildList {
            target: badge.clone(),
            added: vec![overlay.clone()],
            removed: Vec::new(),
        },
    ];
    for text in text_descendants(&overlay, None) {
        records.push(MutationRecord::CharacterData { target: text });
    }

    observer.on_mutations(&records, clock.advance_ms(5));
    assert_eq!(observer.pending_of(TimerKind::Debounce), 0);
    assert_eq!(observer.pending_timers(), 1);
}

#[test]
fn test_host_events_schedule_deferred_pass() {
    let dom = HtmlTestHelper::create_test_dom(&HtmlTestHelper::create_empty_widget_page());
    let widget = FakeWidget::find(&dom, "widget");
    let config = TestConfigBuilder::new().quiet().with_max_retries(0).build();
    let mut observer = observation_loop(&dom, &config);
    let mut clock = TestClock::new();
    observer.start(ReadyState::Complete, clock.now());

    // 隐藏页面和未知事件不触发扫描
    observer.on_host_event(&HostEvent::VisibilityChange { visible: false }, clock.now());
    observer.on_host_event(&HostEvent::Widget("unrelated".to_string()), clock.now());
    assert_eq!(observer.pending_of(TimerKind::Deferred), 0);

    widget.render("8 reviews");
    observer.on_host_event(
        &HostEvent::Widget("judgeme_loaded".to_string()),
        clock.now(),
    );
    assert_eq!(observer.pending_of(TimerKind::Deferred), 1);
    assert_eq!(observer.poll(clock.advance_ms(299)), 0);
    assert_eq!(observer.poll(clock.advance_ms(1)), 1);
    assert_eq!(widget.badge_text().as_deref(), Some("(8)"));

    observer.on_host_event(&HostEvent::Focus, clock.now());
    assert_eq!(observer.poll(clock.advance_ms(499)), 0);
    assert_eq!(observer.poll(clock.advance_ms(1)), 1);
}

#[test]
fn test_triggers_due_at_same_tick_coalesce() {
    let dom = HtmlTestHelper::create_test_dom(&HtmlTestHelper::create_empty_widget_page());
    let config = TestConfigBuilder::new().quiet().with_max_retries(0).build();
    let mut observer = observation_loop(&dom, &config);
    let mut clock = TestClock::new();
    observer.start(ReadyState::Complete, clock.now());

    // 焦点 +500ms，200ms 后的可见性 +300ms，同一时刻到期
    observer.on_host_event(&HostEvent::Focus, clock.now());
    observer.on_host_event(
        &HostEvent::VisibilityChange { visible: true },
        clock.advance_ms(200),
    );
    assert_eq!(observer.pending_of(TimerKind::Deferred), 2);

    let before = observer.passes();
    assert_eq!(observer.poll(clock.advance_ms(300)), 1);
    assert_eq!(observer.passes(), before + 1);
    assert_eq!(observer.pending_of(TimerKind::Deferred), 0);
}

#[test]
fn test_staged_rechecks_and_poll() {
    let dom = HtmlTestHelper::create_test_dom(&HtmlTestHelper::create_empty_widget_page());
    let config = TestConfigBuilder::new().with_max_retries(0).build();
    let mut observer = observation_loop(&dom, &config);
    let mut clock = TestClock::new();
    observer.start(ReadyState::Complete, clock.now());
    assert_eq!(observer.pending_of(TimerKind::Recheck), 4);

    let mut fired = Vec::new();
    for step in 1..=50u64 {
        if observer.poll(clock.advance_ms(100)) > 0 {
            fired.push(step * 100);
        }
    }

    assert_eq!(fired, vec![500, 1000, 2000, 3000, 5000]);
    assert_eq!(observer.pending_of(TimerKind::Recheck), 0);
}

#[test]
fn test_waits_for_document_ready() {
    let dom = HtmlTestHelper::create_test_dom(&HtmlTestHelper::create_badge_page());
    let config = TestConfigBuilder::new().quiet().build();
    let mut observer = observation_loop(&dom, &config);
    let mut clock = TestClock::new();

    observer.start(ReadyState::Loading, clock.now());
    assert_eq!(observer.state(), LoopState::Idle);
    assert_eq!(observer.passes(), 0);

    // 未启动时焦点事件不会排程
    observer.on_host_event(&HostEvent::Focus, clock.now());
    assert_eq!(observer.pending_timers(), 0);

    observer.on_host_event(
        &HostEvent::ReadyStateChange(ReadyState::Interactive),
        clock.advance_ms(50),
    );
    assert_eq!(observer.passes(), 1);
    assert_eq!(observer.state(), LoopState::Watching);
    assert_eq!(
        HtmlTestHelper::texts(&dom, ".review-count"),
        vec!["(12)", "Free Shipping"]
    );

    // 再次就绪不会重复启动
    observer.on_ready_state(ReadyState::Complete, clock.advance_ms(10));
    assert_eq!(observer.passes(), 1);
}
