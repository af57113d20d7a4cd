use crate::{
    restore::{
        RestoreAction, RestoreContext, RestoreError, RestoreEvent, RestoreState,
        RestoreStateMachine, RestoreSummary,
    },
    tests::test_utils::{gen_backup_record, gen_txid},
};

fn apply(context: RestoreContext, event: RestoreEvent) -> RestoreContext {
    RestoreStateMachine::apply(context, event).unwrap().context
}

#[test]
fn test_happy_path() {
    let context = RestoreContext::new(gen_backup_record(1));
    assert_eq!(context.state, RestoreState::Pending);
    assert_eq!(context.attempt, 0);

    let transition = RestoreStateMachine::apply(context, RestoreEvent::Start).unwrap();
    assert!(transition.dirty);
    assert_eq!(transition.actions, vec![RestoreAction::ConnectPeer]);
    assert_eq!(transition.context.state, RestoreState::Connecting);
    assert_eq!(transition.context.attempt, 1);

    let transition =
        RestoreStateMachine::apply(transition.context, RestoreEvent::PeerConnected).unwrap();
    assert_eq!(transition.actions, vec![RestoreAction::RequestClose]);

    let transition = RestoreStateMachine::apply(
        transition.context,
        RestoreEvent::CloseRequested {
            closing_txid: gen_txid(9),
        },
    )
    .unwrap();
    assert_eq!(transition.actions, vec![RestoreAction::AwaitSweep]);
    assert_eq!(transition.context.closing_txid, Some(gen_txid(9)));

    let transition = RestoreStateMachine::apply(transition.context, RestoreEvent::Swept).unwrap();
    assert_eq!(transition.context.state, RestoreState::Completed);
    assert!(transition.actions.is_empty());
}

#[test]
fn test_any_active_step_can_fail() {
    let connecting = apply(RestoreContext::new(gen_backup_record(1)), RestoreEvent::Start);
    let requesting = apply(connecting.clone(), RestoreEvent::PeerConnected);
    let monitoring = apply(
        requesting.clone(),
        RestoreEvent::CloseRequested {
            closing_txid: gen_txid(1),
        },
    );
    for context in [connecting, requesting, monitoring] {
        let failed = apply(
            context,
            RestoreEvent::StepFailed {
                reason: "peer offline".to_string(),
            },
        );
        assert_eq!(failed.state, RestoreState::Failed);
        assert_eq!(failed.error.as_deref(), Some("peer offline"));
    }
}

#[test]
fn test_retry_restarts_failed_context() {
    let failed = apply(
        apply(RestoreContext::new(gen_backup_record(1)), RestoreEvent::Start),
        RestoreEvent::StepFailed {
            reason: "timeout".to_string(),
        },
    );
    let pending = apply(failed, RestoreEvent::Retry);
    assert_eq!(pending.state, RestoreState::Pending);
    assert_eq!(pending.error, None);

    let connecting = apply(pending, RestoreEvent::Start);
    assert_eq!(connecting.state, RestoreState::Connecting);
    assert_eq!(connecting.attempt, 2);
}

#[test]
fn test_invalid_transitions_are_rejected() {
    let pending = RestoreContext::new(gen_backup_record(1));
    assert!(matches!(
        RestoreStateMachine::apply(pending.clone(), RestoreEvent::Swept),
        Err(RestoreError::InvalidTransition(
            RestoreState::Pending,
            RestoreState::Completed
        ))
    ));
    assert!(RestoreStateMachine::apply(pending.clone(), RestoreEvent::Retry).is_err());

    let connecting = apply(pending, RestoreEvent::Start);
    assert!(RestoreStateMachine::apply(connecting.clone(), RestoreEvent::Start).is_err());
    assert!(RestoreStateMachine::apply(
        connecting,
        RestoreEvent::CloseRequested {
            closing_txid: gen_txid(1)
        }
    )
    .is_err());
}

#[test]
fn test_completed_is_final() {
    let mut context = RestoreContext::new(gen_backup_record(1));
    for event in [
        RestoreEvent::Start,
        RestoreEvent::PeerConnected,
        RestoreEvent::CloseRequested {
            closing_txid: gen_txid(1),
        },
        RestoreEvent::Swept,
    ] {
        context = apply(context, event);
    }
    assert_eq!(context.state, RestoreState::Completed);
    for event in [
        RestoreEvent::Retry,
        RestoreEvent::Start,
        RestoreEvent::StepFailed {
            reason: "late".to_string(),
        },
    ] {
        assert!(RestoreStateMachine::apply(context.clone(), event).is_err());
    }
}

#[test]
fn test_summary_counts() {
    let pending = RestoreContext::new(gen_backup_record(1));
    let mut completed = RestoreContext::new(gen_backup_record(2));
    completed.state = RestoreState::Completed;
    let mut failed = RestoreContext::new(gen_backup_record(3));
    failed.state = RestoreState::Failed;

    let summary = RestoreSummary::from_contexts([&pending, &completed, &failed]);
    assert_eq!(
        summary,
        RestoreSummary {
            pending_channels: 1,
            completed_channels: 1,
            failed_channels: 1,
            total_channels: 3,
        }
    );
    assert!(!summary.is_complete());

    let summary = RestoreSummary::from_contexts([&completed, &failed]);
    assert!(summary.is_complete());
    assert!(summary.is_partial_success());
    assert!(!RestoreSummary::from_contexts([&completed]).is_partial_success());
    assert!(!RestoreSummary::default().is_complete());
}

#[test]
fn test_summary_serialized_field_names() {
    let summary = RestoreSummary {
        pending_channels: 2,
        completed_channels: 1,
        failed_channels: 0,
        total_channels: 3,
    };
    let value = serde_json::to_value(summary).unwrap();
    assert_eq!(value["pending_channels"], 2);
    assert_eq!(value["completed_channels"], 1);
    assert_eq!(value["failed_channels"], 0);
    assert_eq!(value["total_channels"], 3);
    assert_eq!(
        serde_json::from_value::<RestoreSummary>(value).unwrap(),
        summary
    );
}
