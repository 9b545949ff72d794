use std::sync::Arc;
use std::time::Instant;

use locator_core_types::{ScopeId, ScopeRef};
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::errors::PerceiverError;
use crate::events;
use crate::merge::SnapshotBuilder;
use crate::model::{CapturedTree, Snapshot};
use crate::policy::CaptureOptions;
use crate::ports::CapturePort;

/// Captures a scope and its nested frames/shadow roots into one snapshot.
pub struct Sampler<P>
where
    P: CapturePort + ?Sized,
{
    port: Arc<P>,
    options: CaptureOptions,
}

impl<P> Sampler<P>
where
    P: CapturePort + ?Sized,
{
    pub fn new(port: Arc<P>, options: CaptureOptions) -> Self {
        Self { port, options }
    }

    pub fn port(&self) -> Arc<P> {
        Arc::clone(&self.port)
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Walks the scope tree below `root` up to the configured depth.
    ///
    /// Only a failing root is an error; nested scopes that cannot be captured
    /// (cross-origin frames, detached shadow hosts) are left out.
    pub async fn capture(&self, root: ScopeRef) -> Result<Snapshot, PerceiverError> {
        let started = Instant::now();
        let root_tree = self.capture_root(&root).await?;

        let mut builder = SnapshotBuilder::new(self.options.clone());
        builder.add_scope(root.clone(), None, &root_tree);

        let mut pending: Vec<(ScopeRef, ScopeId)> = self
            .children_of(&root)
            .await
            .into_iter()
            .rev()
            .map(|child| (child, root.id.clone()))
            .collect();

        while let Some((scope, parent)) = pending.pop() {
            if scope.depth() > self.options.max_scope_depth {
                debug!(
                    target: "perceiver.events",
                    scope = %scope,
                    max_depth = self.options.max_scope_depth,
                    "structural.scope.depth_limit"
                );
                continue;
            }
            let tree = match self.port.capture_tree(&scope).await {
                Ok(tree) => tree,
                Err(err) => {
                    events::emit_scope_skipped(&scope, &err.to_string());
                    continue;
                }
            };
            builder.add_scope(scope.clone(), Some(parent), &tree);
            let children = self.children_of(&scope).await;
            pending.extend(
                children
                    .into_iter()
                    .rev()
                    .map(|child| (child, scope.id.clone())),
            );
        }

        let snapshot = builder.build();
        events::emit_snapshot(
            snapshot.scopes.len(),
            snapshot.len(),
            &snapshot.content_hash,
            started.elapsed(),
        );
        Ok(snapshot)
    }

    async fn capture_root(&self, root: &ScopeRef) -> Result<CapturedTree, PerceiverError> {
        let max_attempts = self.options.root_attempts.max(1);
        let mut attempt = 0;
        let mut last_err: Option<PerceiverError> = None;
        while attempt < max_attempts {
            match self.port.capture_tree(root).await {
                Ok(tree) => return Ok(tree),
                Err(err) => {
                    let retryable = err.is_retryable();
                    last_err = Some(err);
                    attempt += 1;
                    if !retryable {
                        break;
                    }
                    if attempt < max_attempts {
                        let backoff = self.options.retry_backoff_ms * (attempt as u64);
                        sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| PerceiverError::internal("root capture failed")))
    }

    async fn children_of(&self, scope: &ScopeRef) -> Vec<ScopeRef> {
        match self.port.list_frames(scope).await {
            Ok(children) => children,
            Err(err) => {
                events::emit_scope_skipped(scope, &format!("frame listing failed: {err}"));
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawDomNode;
    use crate::ports::StaticCapturePort;
    use locator_core_types::ScopeKind;

    fn submit_tree() -> CapturedTree {
        CapturedTree::new(vec![RawDomNode::new(1, "button").text("Submit")], vec![])
    }

    #[tokio::test]
    async fn captures_nested_frames_and_skips_failures() {
        let port = Arc::new(StaticCapturePort::new());
        let main = ScopeRef::main();
        let payment = main.child(ScopeId::new("payment"), ScopeKind::Frame);
        let ads = main.child(ScopeId::new("ads"), ScopeKind::Frame);
        let card = payment.child(ScopeId::new("card-widget"), ScopeKind::Shadow);

        port.set_tree(&main.id, submit_tree());
        port.set_tree(&payment.id, submit_tree());
        port.set_tree(&card.id, submit_tree());
        port.add_frame(&main.id, payment.clone());
        port.add_frame(&main.id, ads.clone());
        port.add_frame(&payment.id, card.clone());
        port.fail_scope(&ads.id, "cross-origin");

        let sampler = Sampler::new(port, CaptureOptions::default());
        let snapshot = sampler.capture(main.clone()).await.unwrap();

        let ids: Vec<&str> = snapshot.scopes.iter().map(|n| n.scope.id.as_str()).collect();
        assert_eq!(ids, vec!["main", "payment", "card-widget"]);
        assert_eq!(snapshot.len(), 3);
        assert_eq!(
            snapshot.scopes.get(&card.id).unwrap().parent,
            Some(payment.id.clone())
        );
    }

    #[tokio::test]
    async fn honours_depth_limit() {
        let port = Arc::new(StaticCapturePort::new());
        let main = ScopeRef::main();
        let outer = main.child(ScopeId::new("outer"), ScopeKind::Frame);
        let inner = outer.child(ScopeId::new("inner"), ScopeKind::Frame);
        for scope in [&main, &outer, &inner] {
            port.set_tree(&scope.id, submit_tree());
        }
        port.add_frame(&main.id, outer.clone());
        port.add_frame(&outer.id, inner.clone());

        let options = CaptureOptions {
            max_scope_depth: 1,
            ..CaptureOptions::default()
        };
        let snapshot = Sampler::new(port, options).capture(main).await.unwrap();
        assert_eq!(snapshot.scopes.len(), 2);
        assert!(!snapshot.scopes.contains(&inner.id));
    }

    #[tokio::test]
    async fn root_failure_is_an_error() {
        let port = Arc::new(StaticCapturePort::new());
        let options = CaptureOptions {
            retry_backoff_ms: 1,
            ..CaptureOptions::default()
        };
        let err = Sampler::new(port, options)
            .capture(ScopeRef::main())
            .await
            .unwrap_err();
        assert!(matches!(err, PerceiverError::CaptureFailed(_)));
    }
}
