//! tokio 驱动集成测试
//!
//! 时间被暂停，`sleep` 会自动推进到下一个定时器。

#![cfg(feature = "runtime")]

use std::time::Duration;

use storefront_reconciler::reconcile::runtime::channel;
use storefront_reconciler::reconcile::{HostEvent, LoopState, ReadyState};

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{observation_loop, FakeWidget, HtmlTestHelper, TestConfigBuilder};

#[tokio::test(start_paused = true)]
async fn test_driver_converges_against_rerendering_widget() {
    let dom = HtmlTestHelper::create_test_dom(&HtmlTestHelper::create_empty_widget_page());
    let widget = FakeWidget::find(&dom, "widget");
    let config = TestConfigBuilder::new()
        .quiet()
        .with_poll_interval(Duration::from_millis(1000))
        .build();
    let (driver, handle) = channel(observation_loop(&dom, &config));

    let script = async move {
        // 组件在启动重试期间完成首次渲染
        tokio::time::sleep(Duration::from_millis(250)).await;
        widget.render("14 reviews");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(widget.badge_text().as_deref(), Some("(14)"));

        // 重新渲染并转发变更
        let (_, record) = widget.render("15 reviews");
        handle.send_mutations(vec![record]).unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(widget.badge_text().as_deref(), Some("(15)"));

        // 悄悄改回去，由轮询纠正
        widget.revert_text("15 reviews");
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(widget.badge_text().as_deref(), Some("(15)"));

        handle
            .send_host_event(HostEvent::Widget("judgeme_rendered".to_string()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        handle.shutdown();
    };

    let (observation, ()) = tokio::join!(driver.run(ReadyState::Complete), script);

    assert_eq!(observation.state(), LoopState::TornDown);
    assert_eq!(observation.pending_timers(), 0);
    assert!(observation.retries() >= 2);
    assert_eq!(observation.engine().state().len(), 1);
}
