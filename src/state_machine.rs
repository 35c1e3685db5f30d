//! Fall-confirmation state machine.
//!
//! [`transition`] is pure: it maps the current state and an event to the next
//! state plus an ordered list of effects. The engine executes the effects in
//! order, which is how "unsubscribe before prompt" is guaranteed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ConfirmPolicy;
use crate::types::SensorCapabilities;

/// Engine-wide state. Sensors stream if and only if the state is `Monitoring`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineState {
    /// Not started, stopped, or no sensor available
    #[default]
    Idle,
    /// Sensors live, samples flowing to inference
    Monitoring,
    /// Sensors suspended, fall prompt pending
    AwaitingConfirmation,
    /// Fall confirmed and help requested; sensors stay suspended
    AlertSent,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::Monitoring => write!(f, "Monitoring"),
            EngineState::AwaitingConfirmation => write!(f, "AwaitingConfirmation"),
            EngineState::AlertSent => write!(f, "AlertSent"),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// `start()` after probing, carrying the cached capabilities
    Start(SensorCapabilities),
    Stop,
    /// An inference result with `fall_detected == true`
    FallDetected,
    Confirm,
    Deny,
    PromptTimeout,
}

/// Side effects requested by a transition, executed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    SubscribeAvailable,
    UnsubscribeAll,
    ArmDispatcher,
    /// Stop accepting samples and cancel the pending debounce
    DisarmDispatcher,
    /// Forget in-flight inference calls so late responses are discarded
    DropInFlight,
    RaisePrompt,
    ClosePrompt,
    /// Invoke the notification hook (exactly once per confirmed fall)
    SendAlert,
    NoticeUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: EngineState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(state: EngineState) -> Self {
        Transition {
            next: state,
            effects: Vec::new(),
        }
    }

    fn to(next: EngineState, effects: Vec<Effect>) -> Self {
        Transition { next, effects }
    }

    pub fn is_noop(&self, from: EngineState) -> bool {
        self.next == from && self.effects.is_empty()
    }
}

pub fn transition(state: EngineState, event: EngineEvent, policy: ConfirmPolicy) -> Transition {
    use Effect::*;
    use EngineState::*;

    match (state, event) {
        (Idle | AlertSent, EngineEvent::Start(capabilities)) => {
            if capabilities.any() {
                Transition::to(Monitoring, vec![ArmDispatcher, SubscribeAvailable])
            } else {
                Transition::to(Idle, vec![NoticeUnavailable])
            }
        }
        (Monitoring | AwaitingConfirmation, EngineEvent::Start(_)) => Transition::stay(state),

        (Idle, EngineEvent::Stop) => Transition::stay(Idle),
        (Monitoring | AlertSent, EngineEvent::Stop) => Transition::to(
            Idle,
            vec![UnsubscribeAll, DisarmDispatcher, DropInFlight],
        ),
        (AwaitingConfirmation, EngineEvent::Stop) => Transition::to(
            Idle,
            vec![UnsubscribeAll, DisarmDispatcher, DropInFlight, ClosePrompt],
        ),

        (Monitoring, EngineEvent::FallDetected) => Transition::to(
            AwaitingConfirmation,
            vec![UnsubscribeAll, DisarmDispatcher, DropInFlight, RaisePrompt],
        ),
        (_, EngineEvent::FallDetected) => Transition::stay(state),

        (AwaitingConfirmation, EngineEvent::Deny | EngineEvent::PromptTimeout) => Transition::to(
            Monitoring,
            vec![ClosePrompt, ArmDispatcher, SubscribeAvailable],
        ),
        (AwaitingConfirmation, EngineEvent::Confirm) => match policy {
            ConfirmPolicy::StaySuspended => {
                Transition::to(AlertSent, vec![ClosePrompt, SendAlert])
            }
            ConfirmPolicy::Resume => Transition::to(
                Monitoring,
                vec![ClosePrompt, SendAlert, ArmDispatcher, SubscribeAvailable],
            ),
        },
        (_, EngineEvent::Confirm | EngineEvent::Deny | EngineEvent::PromptTimeout) => {
            Transition::stay(state)
        }
    }
}
