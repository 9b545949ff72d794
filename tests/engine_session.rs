use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use locator_engine::{
    route_channel, CapturePort, ContextId, EngineConfig, EngineError, LiveDriver, LocatorEngine,
    RouteEvent, ScopeId, ScopeKind, ScopeRef, SnapshotDriver, StaticCapturePort,
};
use perceiver_structural::{
    snapshot_from_tree, CapturedTree, PerceiverError, RawDomNode, RouteEventSender,
};

fn login_tree(test_id: &str) -> CapturedTree {
    CapturedTree::new(
        vec![
            RawDomNode::new(1, "form").attr("id", "login"),
            RawDomNode::new(2, "input").child_of(1).attr("name", "user"),
            RawDomNode::new(3, "button")
                .child_of(1)
                .text("Sign in")
                .attr("data-testid", test_id),
            RawDomNode::new(4, "a").text("Forgot password"),
        ],
        vec![],
    )
}

struct Session {
    engine: LocatorEngine,
    port: Arc<StaticCapturePort>,
    driver: Arc<SnapshotDriver>,
}

fn session() -> Session {
    let port = Arc::new(StaticCapturePort::new());
    port.set_tree(&ScopeId::main(), login_tree("sign-in"));
    let driver = Arc::new(SnapshotDriver::new(Arc::new(snapshot_from_tree(
        &login_tree("sign-in"),
    ))));
    let engine = LocatorEngine::builder(EngineConfig::default())
        .driver(Arc::clone(&driver) as Arc<dyn LiveDriver>)
        .capture_port(Arc::clone(&port) as Arc<dyn CapturePort>)
        .build()
        .unwrap();
    Session {
        engine,
        port,
        driver,
    }
}

#[test]
fn build_requires_a_driver() {
    let result = LocatorEngine::builder(EngineConfig::default()).build();
    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[test]
fn build_rejects_invalid_config() {
    let mut config = EngineConfig::default();
    config.resolver.max_attempts = 0;
    let driver = Arc::new(SnapshotDriver::new(Arc::new(snapshot_from_tree(&CapturedTree::default()))));
    let result = LocatorEngine::builder(config).driver(driver).build();
    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[tokio::test]
async fn resolve_current_captures_on_first_use() -> Result<()> {
    let Session { engine, .. } = session();
    assert!(engine.needs_reindex());
    assert!(engine.snapshot().is_none());

    let report = engine
        .resolve_current("click sign in", &ContextId::new("login"))
        .await?;

    assert!(report.is_resolved());
    assert_eq!(report.locator.as_deref(), Some("[data-testid=\"sign-in\"]"));
    assert!(!engine.needs_reindex());
    assert_eq!(engine.snapshot().unwrap().len(), 4);
    Ok(())
}

#[tokio::test]
async fn resolve_current_without_capture_port_needs_a_snapshot() {
    let driver = Arc::new(SnapshotDriver::new(Arc::new(snapshot_from_tree(&CapturedTree::default()))));
    let engine = LocatorEngine::builder(EngineConfig::default())
        .driver(driver)
        .build()
        .unwrap();

    let err = engine
        .resolve_current("click sign in", &ContextId::new("login"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoSnapshot(_)));
    assert!(matches!(
        engine.refresh().await,
        Err(EngineError::NoSnapshot(_))
    ));

    let page = snapshot_from_tree(&login_tree("sign-in"));
    assert!(engine.offer(page).is_changed());
    assert!(engine.snapshot().is_some());
}

#[tokio::test]
async fn unchanged_recapture_keeps_the_snapshot() -> Result<()> {
    let Session { engine, .. } = session();
    let first = engine.refresh().await?;
    assert!(first.is_changed());
    let second = engine.refresh().await?;
    assert!(!second.is_changed());
    assert!(Arc::ptr_eq(first.snapshot(), second.snapshot()));
    Ok(())
}

#[tokio::test]
async fn route_change_triggers_recapture_before_resolving() -> Result<()> {
    let Session {
        engine,
        port,
        driver,
    } = session();
    let context = ContextId::new("login");
    engine.resolve_current("click sign in", &context).await?;

    let (sender, _keep) = route_channel(8);
    engine.watch_routes(&sender).await;

    // the single-page app swaps its view without a document load
    port.set_tree(&ScopeId::main(), login_tree("sign-in-v2"));
    driver.set_page(Arc::new(snapshot_from_tree(&login_tree("sign-in-v2"))));
    sender
        .send(RouteEvent::PushState {
            url: "https://example.test/login?step=2".into(),
        })?;
    sender
        .send(RouteEvent::HashChange {
            url: "https://example.test/login?step=2#form".into(),
        })?;

    for _ in 0..100 {
        if engine.needs_reindex() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(engine.needs_reindex());

    let report = engine.resolve_current("click sign in", &context).await?;
    assert_eq!(
        report.locator.as_deref(),
        Some("[data-testid=\"sign-in-v2\"]")
    );
    assert!(!engine.needs_reindex());
    engine.stop_watching().await;
    Ok(())
}

/// Serves the login page and fires one route change while the first capture
/// of the main document is running.
struct NavigatingPort {
    inner: StaticCapturePort,
    routes: RouteEventSender,
    fired: AtomicBool,
}

#[async_trait]
impl CapturePort for NavigatingPort {
    async fn capture_tree(&self, scope: &ScopeRef) -> Result<CapturedTree, PerceiverError> {
        if scope.id == ScopeId::main() && !self.fired.swap(true, Ordering::SeqCst) {
            let _ = self.routes.send(RouteEvent::PopState {
                url: "https://example.test/login?step=2".into(),
            });
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.capture_tree(scope).await
    }

    async fn list_frames(&self, scope: &ScopeRef) -> Result<Vec<ScopeRef>, PerceiverError> {
        self.inner.list_frames(scope).await
    }
}

#[tokio::test]
async fn route_change_during_capture_keeps_the_reindex_mark() -> Result<()> {
    let (sender, _keep) = route_channel(8);
    let inner = StaticCapturePort::new();
    inner.set_tree(&ScopeId::main(), login_tree("sign-in"));
    let port = Arc::new(NavigatingPort {
        inner,
        routes: sender.clone(),
        fired: AtomicBool::new(false),
    });
    let driver = Arc::new(SnapshotDriver::new(Arc::new(snapshot_from_tree(
        &login_tree("sign-in"),
    ))));
    let engine = LocatorEngine::builder(EngineConfig::default())
        .driver(driver)
        .capture_port(port as Arc<dyn CapturePort>)
        .build()?;
    engine.watch_routes(&sender).await;

    engine.refresh().await?;
    assert!(engine.snapshot().is_some());
    // the page navigated mid-capture, so what was captured may already be stale
    assert!(engine.needs_reindex());

    engine.refresh().await?;
    assert!(!engine.needs_reindex());
    engine.stop_watching().await;
    Ok(())
}

#[tokio::test]
async fn nested_frames_are_captured_into_the_session() -> Result<()> {
    let Session { engine, port, .. } = session();
    let payment = ScopeRef::main().child(ScopeId::new("payment"), ScopeKind::Frame);
    port.add_frame(&ScopeId::main(), payment.clone());
    port.set_tree(
        &payment.id,
        CapturedTree::new(vec![RawDomNode::new(1, "button").text("Pay")], vec![]),
    );

    let change = engine.refresh().await?;
    let snapshot = change.snapshot();
    assert_eq!(snapshot.len(), 5);
    assert!(snapshot.scopes.get(&payment.id).is_some());
    Ok(())
}

#[tokio::test]
async fn clear_context_drops_promotion_records() -> Result<()> {
    let Session { engine, .. } = session();
    let login = ContextId::new("login");
    let other = ContextId::new("other");
    engine.resolve_current("click sign in", &login).await?;
    engine.resolve_current("click sign in", &other).await?;
    assert_eq!(engine.promotion().len(), 2);

    let (_, records) = engine.clear_context(&login);
    assert_eq!(records, 1);
    assert!(!engine.promotion().has_context(&login));
    assert!(engine.promotion().has_context(&other));
    Ok(())
}

#[tokio::test]
async fn metrics_cover_capture_resolution_and_cache() -> Result<()> {
    let Session { engine, .. } = session();
    engine
        .resolve_current("click sign in", &ContextId::new("login"))
        .await?;

    let metrics = engine.metrics();
    assert!(metrics.capture.snapshot.total >= 1);
    assert!(metrics.resolve.total >= 1);
    assert!(metrics.resolve.resolved >= 1);
    assert!(metrics.cache.misses >= 1);
    assert_eq!(metrics.promotion_records, 1);
    serde_json::to_value(&metrics)?;
    Ok(())
}
