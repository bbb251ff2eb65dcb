//! Session lifecycle driven by runtime events.

use super::{SessionState, XrError, XrEvent, XrResult, XrRuntime};
use std::fmt;

/// Our side of the session lifecycle. `Exiting` and `LossPending` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Running,
    Stopped,
    Exiting,
    LossPending,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Running => "running",
            SessionPhase::Stopped => "stopped",
            SessionPhase::Exiting => "exiting",
            SessionPhase::LossPending => "loss pending",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Exiting | SessionPhase::LossPending)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work the runtime must do for a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    BeginSession,
    EndSession,
    ExitLoop { restart: bool },
    Ignore,
}

/// Pure transition function: next phase and the action to perform.
pub fn transition(
    phase: SessionPhase,
    state: SessionState,
) -> Result<(SessionPhase, SessionAction), XrError> {
    use SessionAction::*;
    use SessionPhase::*;
    match (phase, state) {
        (Exiting | LossPending, _) => Ok((phase, Ignore)),
        (Running, SessionState::Ready) => Err(XrError::InvalidTransition { phase, state }),
        (_, SessionState::Ready) => Ok((Running, BeginSession)),
        (Running, SessionState::Stopping) => Ok((Stopped, EndSession)),
        (_, SessionState::Stopping) => Ok((phase, Ignore)),
        (_, SessionState::Exiting) => Ok((Exiting, ExitLoop { restart: false })),
        (_, SessionState::LossPending) => Ok((LossPending, ExitLoop { restart: true })),
        (
            _,
            SessionState::Unknown
            | SessionState::Idle
            | SessionState::Synchronized
            | SessionState::Visible
            | SessionState::Focused,
        ) => Ok((phase, Ignore)),
    }
}

/// Flags the driver checks once per iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopControl {
    pub exit_loop: bool,
    pub request_restart: bool,
}

impl LoopControl {
    pub fn exit(&mut self, restart: bool) {
        self.exit_loop = true;
        self.request_restart = restart;
    }
}

#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
    phase: SessionPhase,
    control: LoopControl,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unknown,
            phase: SessionPhase::Idle,
            control: LoopControl::default(),
        }
    }

    /// Last state the runtime reported.
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// True from a successful begin until the matching end is attempted.
    pub fn is_running(&self) -> bool {
        self.phase == SessionPhase::Running
    }

    pub fn control(&self) -> LoopControl {
        self.control
    }

    pub fn control_mut(&mut self) -> &mut LoopControl {
        &mut self.control
    }

    /// Drains every queued event. Instance loss flags an exit with restart
    /// but the queue is still drained. A state change for a session other
    /// than ours stops processing with [`XrError::UnknownSession`].
    pub fn poll_events<R: XrRuntime + ?Sized>(&mut self, runtime: &mut R) -> XrResult<()> {
        while let Some(event) = runtime.poll_event()? {
            match event {
                XrEvent::SessionStateChanged { session, state, time } => {
                    let ours = runtime.session_handle();
                    if !ours.is_null() && session != ours {
                        log::error!("[session] state change for foreign session {session:?}");
                        return Err(XrError::UnknownSession(session));
                    }
                    log::info!("[session] {} -> {} (time {time})", self.state, state);
                    self.handle_state_change(runtime, state)?;
                }
                XrEvent::EventsLost { lost } => {
                    log::warn!("[session] {lost} runtime events lost");
                }
                XrEvent::InstanceLossPending { loss_time } => {
                    log::warn!("[session] instance loss pending at {loss_time}");
                    self.control.exit(true);
                }
                XrEvent::InteractionProfileChanged => {
                    log::info!("[session] interaction profile changed");
                }
                XrEvent::ReferenceSpaceChangePending => {
                    log::trace!("[session] reference space change pending, ignored");
                }
                XrEvent::Other => {
                    log::trace!("[session] ignoring event");
                }
            }
        }
        Ok(())
    }

    /// Applies one runtime state change.
    pub fn handle_state_change<R: XrRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        state: SessionState,
    ) -> XrResult<()> {
        self.state = state;
        let (next, action) = transition(self.phase, state)?;
        match action {
            SessionAction::BeginSession => {
                runtime.begin_session()?;
                log::info!("[session] session begun");
            }
            SessionAction::EndSession => {
                // Not running from here on, even if ending fails.
                self.phase = next;
                if !runtime.session_handle().is_null() {
                    runtime.end_session()?;
                }
                log::info!("[session] session ended");
            }
            SessionAction::ExitLoop { restart } => {
                self.control.exit(restart);
                log::info!("[session] leaving render loop (restart: {restart})");
            }
            SessionAction::Ignore if self.phase.is_terminal() => {
                log::warn!("[session] {state} after {} ignored", self.phase);
            }
            SessionAction::Ignore => {
                log::trace!("[session] no action for {state}");
            }
        }
        self.phase = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xr::SessionHandle;
    use crate::xr::simulated::{SimulatedRuntime, XrCall};

    fn changed(runtime: &SimulatedRuntime, state: SessionState) -> XrEvent {
        XrEvent::SessionStateChanged {
            session: runtime.session_handle(),
            state,
            time: 0,
        }
    }

    #[test]
    fn ready_begins_and_stopping_ends() {
        let mut runtime = SimulatedRuntime::default();
        let mut machine = SessionStateMachine::new();
        runtime.push_event(changed(&runtime, SessionState::Ready));
        machine.poll_events(&mut runtime).unwrap();
        assert!(machine.is_running());

        runtime.push_event(changed(&runtime, SessionState::Stopping));
        machine.poll_events(&mut runtime).unwrap();
        assert!(!machine.is_running());
        assert_eq!(machine.phase(), SessionPhase::Stopped);
        assert_eq!(
            runtime.calls_matching(|c| matches!(c, XrCall::BeginSession | XrCall::EndSession)),
            vec![XrCall::BeginSession, XrCall::EndSession]
        );
    }

    #[test]
    fn ready_then_stopping_in_one_poll_is_handled() {
        let mut runtime = SimulatedRuntime::default();
        let mut machine = SessionStateMachine::new();
        runtime.push_event(changed(&runtime, SessionState::Ready));
        runtime.push_event(changed(&runtime, SessionState::Stopping));
        machine.poll_events(&mut runtime).unwrap();
        assert!(!machine.is_running());
        assert_eq!(machine.state(), SessionState::Stopping);
        assert!(!machine.control().exit_loop);
    }

    #[test]
    fn exiting_and_loss_pending_set_exit_flags() {
        let mut runtime = SimulatedRuntime::default();
        let mut machine = SessionStateMachine::new();
        runtime.push_event(changed(&runtime, SessionState::Exiting));
        machine.poll_events(&mut runtime).unwrap();
        assert_eq!(
            machine.control(),
            LoopControl {
                exit_loop: true,
                request_restart: false
            }
        );

        let mut machine = SessionStateMachine::new();
        runtime.push_event(changed(&runtime, SessionState::LossPending));
        machine.poll_events(&mut runtime).unwrap();
        assert_eq!(
            machine.control(),
            LoopControl {
                exit_loop: true,
                request_restart: true
            }
        );
    }

    #[test]
    fn intermediate_states_change_nothing() {
        let mut runtime = SimulatedRuntime::default();
        let mut machine = SessionStateMachine::new();
        for state in [
            SessionState::Idle,
            SessionState::Synchronized,
            SessionState::Visible,
            SessionState::Focused,
        ] {
            runtime.push_event(changed(&runtime, state));
        }
        machine.poll_events(&mut runtime).unwrap();
        assert_eq!(machine.phase(), SessionPhase::Idle);
        assert_eq!(machine.state(), SessionState::Focused);
        assert_eq!(machine.control(), LoopControl::default());
    }

    #[test]
    fn drains_every_pending_event() {
        let mut runtime = SimulatedRuntime::default();
        let mut machine = SessionStateMachine::new();
        runtime.push_event(XrEvent::EventsLost { lost: 3 });
        runtime.push_event(XrEvent::Other);
        runtime.push_event(changed(&runtime, SessionState::Ready));
        runtime.push_event(XrEvent::InteractionProfileChanged);
        machine.poll_events(&mut runtime).unwrap();
        assert!(machine.is_running());
        assert_eq!(runtime.pending_events(), 0);
    }

    #[test]
    fn foreign_session_aborts_polling() {
        let mut runtime = SimulatedRuntime::default();
        let mut machine = SessionStateMachine::new();
        runtime.push_event(XrEvent::SessionStateChanged {
            session: SessionHandle(0xdead),
            state: SessionState::Ready,
            time: 0,
        });
        runtime.push_event(changed(&runtime, SessionState::Ready));
        let err = machine.poll_events(&mut runtime).unwrap_err();
        assert!(matches!(err, XrError::UnknownSession(SessionHandle(0xdead))));
        assert!(!machine.is_running());
        assert_eq!(runtime.pending_events(), 1);
    }

    #[test]
    fn instance_loss_requests_restart_and_keeps_draining() {
        let mut runtime = SimulatedRuntime::default();
        let mut machine = SessionStateMachine::new();
        runtime.push_event(XrEvent::InstanceLossPending { loss_time: 42 });
        runtime.push_event(XrEvent::EventsLost { lost: 1 });
        runtime.push_event(XrEvent::Other);
        machine.poll_events(&mut runtime).unwrap();
        assert!(machine.control().exit_loop);
        assert!(machine.control().request_restart);
        assert_eq!(runtime.pending_events(), 0);
    }

    #[test]
    fn failed_end_session_still_stops_running() {
        let mut runtime = SimulatedRuntime::default();
        let mut machine = SessionStateMachine::new();
        machine
            .handle_state_change(&mut runtime, SessionState::Ready)
            .unwrap();
        assert!(machine.is_running());

        runtime.fail_call("xrEndSession");
        let err = machine
            .handle_state_change(&mut runtime, SessionState::Stopping)
            .unwrap_err();
        assert!(matches!(err, XrError::Runtime { call: "xrEndSession", .. }));
        assert!(!machine.is_running());
        assert_eq!(machine.phase(), SessionPhase::Stopped);
    }

    #[test]
    fn ready_while_running_is_rejected() {
        let err = transition(SessionPhase::Running, SessionState::Ready).unwrap_err();
        assert!(matches!(err, XrError::InvalidTransition { .. }));
    }

    #[test]
    fn terminal_phases_ignore_later_states() {
        for phase in [SessionPhase::Exiting, SessionPhase::LossPending] {
            for state in [SessionState::Ready, SessionState::Stopping, SessionState::Exiting] {
                assert_eq!(transition(phase, state).unwrap(), (phase, SessionAction::Ignore));
            }
        }
    }

    #[test]
    fn stopping_without_running_does_not_end_session() {
        let mut runtime = SimulatedRuntime::default();
        let mut machine = SessionStateMachine::new();
        machine
            .handle_state_change(&mut runtime, SessionState::Stopping)
            .unwrap();
        assert!(runtime.calls().is_empty());
    }
}
