use std::sync::Arc;

use locator_core_types::{ScopeId, ScopeKind, ScopeRef};
use perceiver_structural::{
    CaptureOptions, CapturedTree, ReindexFlag, Sampler, SnapshotChange, SnapshotTracker,
    StaticCapturePort,
};

const CHECKOUT: &str = r#"{
  "dom": [
    {"backend_id": 1, "parent": null, "tag": "form", "attributes": [["id", "checkout"]]},
    {"backend_id": 2, "parent": 1, "tag": "input", "attributes": [["name", "email"], ["id", "input-8f3a9c21"]]},
    {"backend_id": 3, "parent": 1, "tag": "button", "text": "Pay now", "attributes": [["class", "css-1q2w3e btn-primary"]]}
  ],
  "ax": [
    {"backend_id": 2, "role": "textbox", "name": "Email"},
    {"backend_id": 3, "role": "button", "name": "Pay now"}
  ]
}"#;

#[test]
fn recorded_capture_parses() {
    let tree = CapturedTree::from_json(CHECKOUT).unwrap();
    assert_eq!(tree.dom.len(), 3);
    assert_eq!(tree.ax.len(), 2);
    assert!(CapturedTree::from_json("{\"dom\": 7}").is_err());
}

#[tokio::test]
async fn rerendered_page_keeps_identities() {
    let port = Arc::new(StaticCapturePort::new());
    let main = ScopeRef::main();
    let frame = main.child(ScopeId::new("payment"), ScopeKind::Frame);
    port.set_tree(&main.id, CapturedTree::from_json(CHECKOUT).unwrap());
    port.set_tree(&frame.id, CapturedTree::from_json(CHECKOUT).unwrap());
    port.add_frame(&main.id, frame.clone());

    let sampler = Sampler::new(Arc::clone(&port), CaptureOptions::default());
    let tracker = SnapshotTracker::new(ReindexFlag::new());

    let first = tracker.offer(sampler.capture(main.clone()).await.unwrap());
    assert!(first.is_changed());
    let before = Arc::clone(first.snapshot());
    assert_eq!(before.len(), 6);
    assert_eq!(before.in_scope(&frame.id).count(), 3);

    // same page re-rendered with a fresh framework id
    let rerendered = CHECKOUT.replace("input-8f3a9c21", "input-77d0e1b4");
    port.set_tree(&main.id, CapturedTree::from_json(&rerendered).unwrap());
    let second = tracker.offer(sampler.capture(main.clone()).await.unwrap());
    let after = match second {
        SnapshotChange::Replaced { current, .. } => current,
        SnapshotChange::Unchanged(_) => panic!("attribute change must alter the content hash"),
    };

    let identities = |snapshot: &perceiver_structural::Snapshot| {
        snapshot
            .descriptors
            .iter()
            .map(|d| d.identity_hash.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(identities(&before), identities(&after));

    let third = tracker.offer(sampler.capture(main).await.unwrap());
    assert!(!third.is_changed());
}
