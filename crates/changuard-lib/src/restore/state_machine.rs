use bitcoin::Txid;

use super::{RestoreContext, RestoreError, RestoreState};
use crate::now_timestamp_as_millis_u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreEvent {
    Start,
    PeerConnected,
    CloseRequested { closing_txid: Txid },
    Swept,
    StepFailed { reason: String },
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreAction {
    ConnectPeer,
    RequestClose,
    AwaitSweep,
}

/// The state machine transition result contains the new context and the actions to be taken.
#[derive(Debug, Clone)]
pub struct RestoreTransition {
    pub context: RestoreContext,
    /// Whether the state changed.
    pub dirty: bool,
    pub actions: Vec<RestoreAction>,
}

pub struct RestoreStateMachine;

impl RestoreStateMachine {
    /// The actions to be taken when the context enters its current state.
    pub fn on_entering(context: &RestoreContext) -> Vec<RestoreAction> {
        match context.state {
            RestoreState::Pending => vec![],
            RestoreState::Connecting => vec![RestoreAction::ConnectPeer],
            RestoreState::RequestingClose => vec![RestoreAction::RequestClose],
            RestoreState::Monitoring => vec![RestoreAction::AwaitSweep],
            RestoreState::Completed => vec![],
            RestoreState::Failed => vec![],
        }
    }

    pub fn apply(
        mut context: RestoreContext,
        event: RestoreEvent,
    ) -> Result<RestoreTransition, RestoreError> {
        let prev_state = context.state;

        match event {
            RestoreEvent::Start => {
                Self::try_transition_to(&mut context, RestoreState::Connecting)?;
                context.attempt += 1;
            }
            RestoreEvent::PeerConnected => {
                Self::try_transition_to(&mut context, RestoreState::RequestingClose)?;
            }
            RestoreEvent::CloseRequested { closing_txid } => {
                Self::try_transition_to(&mut context, RestoreState::Monitoring)?;
                context.closing_txid = Some(closing_txid);
            }
            RestoreEvent::Swept => {
                Self::try_transition_to(&mut context, RestoreState::Completed)?;
            }
            RestoreEvent::StepFailed { reason } => {
                Self::try_transition_to(&mut context, RestoreState::Failed)?;
                context.error = Some(reason);
            }
            RestoreEvent::Retry => {
                Self::try_transition_to(&mut context, RestoreState::Pending)?;
                context.error = None;
            }
        }

        let dirty = context.state != prev_state;
        let actions = if dirty {
            context.updated_at = now_timestamp_as_millis_u64();
            Self::on_entering(&context)
        } else {
            vec![]
        };
        Ok(RestoreTransition {
            context,
            dirty,
            actions,
        })
    }

    fn allow_transition(from: RestoreState, to: RestoreState) -> bool {
        match (from, to) {
            (RestoreState::Pending, RestoreState::Connecting) => true,
            (RestoreState::Connecting, RestoreState::RequestingClose) => true,
            (RestoreState::RequestingClose, RestoreState::Monitoring) => true,
            (RestoreState::Monitoring, RestoreState::Completed) => true,
            (RestoreState::Failed, RestoreState::Pending) => true,
            (from, RestoreState::Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    fn try_transition_to(
        context: &mut RestoreContext,
        to: RestoreState,
    ) -> Result<(), RestoreError> {
        if !Self::allow_transition(context.state, to) {
            return Err(RestoreError::InvalidTransition(context.state, to));
        }
        context.state = to;
        Ok(())
    }
}
