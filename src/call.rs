//! Call-control state machine.
//!
//! Owns the hook/ring/dial/in-call state for one handset. Transitions are
//! pure and atomic: each consumes one local input or one relay command,
//! mutates the state, and optionally yields one outbound [`ControlEvent`].
//! Emission is best-effort; a dropped send never rolls a transition back.

use crate::directory::{DialMatch, NumberDirectory};
use crate::protocol::{ControlCommand, ControlEvent};

/// The operator number every directory must reach. An unreachable dial
/// sequence collapses to this instead of being dropped.
pub const FALLBACK_NUMBER: &str = "0";

/// Local input from the handset hardware boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhoneInput {
    /// Hook switch changed; `true` means the handset is resting.
    Hook { state: bool },
    /// One digit from the dial plate.
    Digit(char),
}

/// Snapshot of the call-control state. Published over a watch channel so
/// the hardware boundary can drive the bell and dial plate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallState {
    /// Handset resting (on-hook).
    pub hooked: bool,
    /// Local bell should sound.
    pub ringing: bool,
    /// Digits accumulated since the last reset.
    pub dialed_number: String,
    /// A number was fully dialed or a call was accepted.
    pub in_call: bool,
    /// Digit input currently accepted.
    pub dialing_enabled: bool,
}

impl Default for CallState {
    fn default() -> Self {
        Self {
            hooked: true,
            ringing: false,
            dialed_number: String::new(),
            in_call: false,
            dialing_enabled: true,
        }
    }
}

impl CallState {
    /// Whether local audio transmission should be suppressed. Muted
    /// whenever no call is up.
    pub fn muted(&self) -> bool {
        !self.in_call
    }
}

pub struct CallStateMachine {
    state: CallState,
    directory: NumberDirectory,
}

impl CallStateMachine {
    pub fn new(directory: NumberDirectory) -> Self {
        Self {
            state: CallState::default(),
            directory,
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn handle_input(&mut self, input: PhoneInput) -> Option<ControlEvent> {
        match input {
            PhoneInput::Hook { state } => self.set_hooked(state),
            PhoneInput::Digit(digit) => self.dial(digit),
        }
    }

    /// Hook switch transition. A no-op unless the state actually toggles.
    pub fn set_hooked(&mut self, hooked: bool) -> Option<ControlEvent> {
        if self.state.hooked == hooked {
            return None;
        }
        self.state.hooked = hooked;

        if hooked {
            // Hanging up ends any call and re-arms the dial plate.
            if self.state.in_call {
                self.state.in_call = false;
                self.state.dialing_enabled = true;
                self.state.dialed_number.clear();
            }
            self.state.ringing = false;
        } else if self.state.ringing {
            // Lifting the handset while the bell sounds answers the call.
            self.state.ringing = false;
            self.state.in_call = true;
            self.state.dialing_enabled = false;
        }

        Some(ControlEvent::Hook { state: hooked })
    }

    /// One digit from the dial plate. Dropped while dialing is disabled.
    pub fn dial(&mut self, digit: char) -> Option<ControlEvent> {
        if !self.state.dialing_enabled {
            log::debug!(target: "Call", "Dialing disabled, dropping digit {digit}");
            return None;
        }

        let mut candidate = self.state.dialed_number.clone();
        candidate.push(digit);

        match self.directory.classify(&candidate) {
            DialMatch::Complete => Some(self.complete_dial(candidate)),
            DialMatch::Partial => {
                self.state.dialed_number = candidate;
                None
            }
            // An unreachable sequence always collapses to the operator;
            // the digit is never silently dropped and the accumulated
            // prefix never outlives the mismatch.
            DialMatch::Invalid => Some(self.complete_dial(FALLBACK_NUMBER.to_string())),
        }
    }

    fn complete_dial(&mut self, number: String) -> ControlEvent {
        log::info!(target: "Call", "Calling {number}");
        self.state.dialed_number = number.clone();
        self.state.dialing_enabled = false;
        self.state.in_call = true;
        if self.state.hooked {
            // Immediate local feedback before the far side answers.
            self.state.ringing = true;
        }
        ControlEvent::Dial { number }
    }

    /// Apply a command received from the relay.
    pub fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Ring { state } => {
                self.state.ringing = state;
            }
            ControlCommand::ClearDial => {
                self.state.dialed_number.clear();
                self.state.dialing_enabled = true;
                self.state.in_call = false;
            }
        }
    }
}
