use md_collab::sync::BlockEdit;
use md_collab::{
    BlockReplica, LoopbackHub, MemoryDiagnostics, Node, ReplicatedState, SessionConfig,
    SessionEvent, SessionManager, SessionState,
};
use std::rc::Rc;

fn manager() -> (SessionManager, Rc<MemoryDiagnostics>) {
    let diagnostics = Rc::new(MemoryDiagnostics::new());
    (SessionManager::new(diagnostics.clone()), diagnostics)
}

#[test]
fn test_no_collaboration_handles() {
    let (manager, diagnostics) = manager();
    let session = manager
        .build(SessionConfig::new().with_markdown("plain"))
        .unwrap();
    assert_eq!(session.state(), SessionState::Foundation);
    assert!(!session.is_collaborative());
    assert!(!diagnostics.contains(|event| matches!(event, SessionEvent::CollaborationIncomplete { .. })));
}

#[test]
fn test_replica_without_provider() {
    let (manager, diagnostics) = manager();
    let session = manager
        .build(SessionConfig::new().with_replica(BlockReplica::new(1).into_shared()))
        .unwrap();
    assert_eq!(session.state(), SessionState::Foundation);
    assert!(diagnostics.contains(|event| {
        *event
            == SessionEvent::CollaborationIncomplete {
                missing: "transportProvider",
            }
    }));
}

#[test]
fn test_provider_without_replica() {
    let (manager, diagnostics) = manager();
    let hub = LoopbackHub::new();
    let session = manager
        .build(SessionConfig::new().with_provider(hub.shared_provider()))
        .unwrap();
    assert_eq!(session.state(), SessionState::Foundation);
    assert!(diagnostics.contains(|event| {
        *event
            == SessionEvent::CollaborationIncomplete {
                missing: "replicatedDoc",
            }
    }));
}

#[test]
fn test_malformed_replica_falls_back() {
    let (manager, diagnostics) = manager();
    let mut replica = BlockReplica::new(1);
    let stray_row = Node::table_row(vec![Node::table_cell(vec![Node::paragraph(vec![
        Node::text("x"),
    ])])]);
    replica
        .edit(vec![BlockEdit::Insert {
            after: None,
            nodes: vec![stray_row],
        }])
        .unwrap();
    let hub = LoopbackHub::new();
    let provider = hub.shared_provider();

    let session = manager
        .build(
            SessionConfig::new()
                .with_replica(replica.into_shared())
                .with_provider(provider.clone())
                .with_markdown("local text"),
        )
        .unwrap();

    assert_eq!(session.state(), SessionState::Foundation);
    assert_eq!(
        session.transitions(),
        &[
            SessionState::Uninitialized,
            SessionState::Foundation,
            SessionState::CollaborationValidating,
            SessionState::CollaborationDegraded,
            SessionState::Foundation,
        ]
    );
    assert_eq!(session.to_markdown(), "local text");
    assert!(!provider.borrow().is_connected());
    assert!(diagnostics.contains(|event| matches!(event, SessionEvent::CollaborationFailed { .. })));
}

#[test]
fn test_missing_identity_is_only_a_warning() {
    let (manager, diagnostics) = manager();
    let hub = LoopbackHub::new();
    let session = manager
        .build(
            SessionConfig::new()
                .with_replica(BlockReplica::new(1).without_identity().into_shared())
                .with_provider(hub.shared_provider()),
        )
        .unwrap();
    assert_eq!(session.state(), SessionState::CollaborationActive);
    assert!(diagnostics.contains(|event| *event == SessionEvent::MissingIdentity));
}

#[test]
fn test_degraded_session_still_edits() {
    let (manager, _) = manager();
    let hub = LoopbackHub::new();
    hub.reject_connections(Some("offline"));
    let mut session = manager
        .build(
            SessionConfig::new()
                .with_replica(BlockReplica::new(1).into_shared())
                .with_provider(hub.shared_provider())
                .with_markdown("draft"),
        )
        .unwrap();
    assert_eq!(session.state(), SessionState::Foundation);

    session.import_markdown("# Rewritten").unwrap();
    assert_eq!(session.to_markdown(), "# Rewritten");
    assert!(session.undo().unwrap());
    assert_eq!(session.to_markdown(), "draft");
}
