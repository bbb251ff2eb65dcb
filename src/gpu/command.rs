//! The single reusable command buffer shared by every view.
//!
//! All legal moves live in [`CommandState::apply`]; the device calls in
//! [`CommandBuffer`] run only after the move has been accepted.

use super::{GpuDevice, GpuError, GpuResult};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Undefined,
    Initialized,
    Recording,
    Executable,
    Executing,
}

impl CommandState {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandState::Undefined => "Undefined",
            CommandState::Initialized => "Initialized",
            CommandState::Recording => "Recording",
            CommandState::Executable => "Executable",
            CommandState::Executing => "Executing",
        }
    }

    /// State after `op`, or `None` when `op` is illegal here.
    pub fn apply(self, op: CommandOp) -> Option<CommandState> {
        use CommandOp::*;
        use CommandState::*;
        match (self, op) {
            (Undefined, Init) => Some(Initialized),
            (Initialized | Executable, Reset) => Some(Initialized),
            (Initialized, Begin) => Some(Recording),
            (Recording, Record) => Some(Recording),
            (Recording, End) => Some(Executable),
            (Executable, Submit) => Some(Executing),
            (Initialized, Wait) => Some(Initialized),
            (Executing, Wait) => Some(Executable),
            (_, Init | Reset | Begin | Record | End | Submit | Wait) => None,
        }
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOp {
    Init,
    Reset,
    Begin,
    Record,
    End,
    Submit,
    Wait,
}

impl fmt::Display for CommandOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandOp::Init => "init",
            CommandOp::Reset => "reset",
            CommandOp::Begin => "begin",
            CommandOp::Record => "record",
            CommandOp::End => "end",
            CommandOp::Submit => "submit",
            CommandOp::Wait => "wait",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FenceWaitPolicy {
    pub timeout: Duration,
    pub attempts: u32,
}

impl Default for FenceWaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            attempts: 5,
        }
    }
}

pub struct CommandBuffer<D: GpuDevice> {
    context: Option<D::CommandContext>,
    state: CommandState,
    policy: FenceWaitPolicy,
}

impl<D: GpuDevice> CommandBuffer<D> {
    pub fn new(policy: FenceWaitPolicy) -> Self {
        Self {
            context: None,
            state: CommandState::Undefined,
            policy,
        }
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    fn check(&self, op: CommandOp) -> GpuResult<CommandState> {
        self.state.apply(op).ok_or(GpuError::InvalidState {
            op,
            state: self.state,
        })
    }

    fn context(&self, op: CommandOp) -> GpuResult<&D::CommandContext> {
        self.context.as_ref().ok_or(GpuError::InvalidState {
            op,
            state: self.state,
        })
    }

    /// Allocates the pool, buffer and fence. Only callable once.
    pub fn init(&mut self, device: &D) -> GpuResult<()> {
        let next = self.check(CommandOp::Init)?;
        self.context = Some(device.create_command_context()?);
        self.state = next;
        Ok(())
    }

    /// Returns to `Initialized`. From `Initialized` nothing is touched; from
    /// `Executable` the caller must already know the work has completed.
    pub fn reset(&mut self, device: &D) -> GpuResult<()> {
        let next = self.check(CommandOp::Reset)?;
        if self.state == CommandState::Executable {
            device.reset_command_context(self.context(CommandOp::Reset)?)?;
        }
        self.state = next;
        Ok(())
    }

    pub fn begin(&mut self, device: &D) -> GpuResult<()> {
        let next = self.check(CommandOp::Begin)?;
        device.begin_recording(self.context(CommandOp::Begin)?)?;
        self.state = next;
        Ok(())
    }

    /// The context, if and only if commands may be recorded now.
    pub fn recording(&self) -> GpuResult<&D::CommandContext> {
        self.check(CommandOp::Record)?;
        self.context(CommandOp::Record)
    }

    pub fn end(&mut self, device: &D) -> GpuResult<()> {
        let next = self.check(CommandOp::End)?;
        device.end_recording(self.context(CommandOp::End)?)?;
        self.state = next;
        Ok(())
    }

    pub fn submit(&mut self, device: &D) -> GpuResult<()> {
        let next = self.check(CommandOp::Submit)?;
        device.submit(self.context(CommandOp::Submit)?)?;
        self.state = next;
        Ok(())
    }

    /// Blocks until submitted work completes, retrying the fence wait a
    /// bounded number of times. Succeeds immediately from `Initialized`.
    pub fn wait(&mut self, device: &D) -> GpuResult<()> {
        let next = self.check(CommandOp::Wait)?;
        if self.state == CommandState::Initialized {
            return Ok(());
        }

        let ctx = self.context(CommandOp::Wait)?;
        for attempt in 1..=self.policy.attempts {
            if device.wait_for_completion(ctx, self.policy.timeout)? {
                self.state = next;
                return Ok(());
            }
            log::warn!(
                "[cmd] fence wait timed out after {:?} (attempt {attempt}/{})",
                self.policy.timeout,
                self.policy.attempts
            );
        }
        log::error!("[cmd] giving up on fence after {} attempts", self.policy.attempts);
        Err(GpuError::Timeout {
            attempts: self.policy.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::null::{GpuCall, NullDevice};

    fn ready(device: &NullDevice) -> CommandBuffer<NullDevice> {
        let mut cmd = CommandBuffer::new(FenceWaitPolicy::default());
        cmd.init(device).expect("init from undefined");
        cmd
    }

    fn cycle(cmd: &mut CommandBuffer<NullDevice>, device: &NullDevice) -> GpuResult<()> {
        cmd.reset(device)?;
        cmd.begin(device)?;
        cmd.end(device)?;
        cmd.submit(device)?;
        cmd.wait(device)
    }

    #[test]
    fn transition_table_accepts_only_the_lifecycle() {
        use CommandOp::*;
        use CommandState::*;
        let states = [Undefined, Initialized, Recording, Executable, Executing];
        let ops = [Init, Reset, Begin, Record, End, Submit, Wait];
        let legal = [
            (Undefined, Init, Initialized),
            (Initialized, Reset, Initialized),
            (Executable, Reset, Initialized),
            (Initialized, Begin, Recording),
            (Recording, Record, Recording),
            (Recording, End, Executable),
            (Executable, Submit, Executing),
            (Initialized, Wait, Initialized),
            (Executing, Wait, Executable),
        ];
        for state in states {
            for op in ops {
                let expected = legal
                    .iter()
                    .find(|(s, o, _)| *s == state && *o == op)
                    .map(|(_, _, next)| *next);
                assert_eq!(state.apply(op), expected, "{op} from {state}");
            }
        }
    }

    #[test]
    fn repeated_cycles_succeed() {
        let device = NullDevice::default();
        let mut cmd = ready(&device);
        for _ in 0..3 {
            cycle(&mut cmd, &device).expect("legal cycle");
            assert_eq!(cmd.state(), CommandState::Executable);
        }
    }

    #[test]
    fn init_twice_is_rejected() {
        let device = NullDevice::default();
        let mut cmd = ready(&device);
        let err = cmd.init(&device).unwrap_err();
        assert!(matches!(
            err,
            GpuError::InvalidState { op: CommandOp::Init, state: CommandState::Initialized }
        ));
    }

    #[test]
    fn begin_before_init_is_rejected() {
        let device = NullDevice::default();
        let mut cmd: CommandBuffer<NullDevice> = CommandBuffer::new(FenceWaitPolicy::default());
        assert!(matches!(
            cmd.begin(&device),
            Err(GpuError::InvalidState { state: CommandState::Undefined, .. })
        ));
    }

    #[test]
    fn begin_without_reset_after_execution_is_rejected() {
        let device = NullDevice::default();
        let mut cmd = ready(&device);
        cycle(&mut cmd, &device).expect("first cycle");
        assert!(matches!(
            cmd.begin(&device),
            Err(GpuError::InvalidState { op: CommandOp::Begin, state: CommandState::Executable })
        ));
    }

    #[test]
    fn submit_while_recording_is_rejected() {
        let device = NullDevice::default();
        let mut cmd = ready(&device);
        cmd.begin(&device).unwrap();
        assert!(cmd.submit(&device).is_err());
        assert!(cmd.reset(&device).is_err());
        assert!(cmd.wait(&device).is_err());
        assert_eq!(cmd.state(), CommandState::Recording);
    }

    #[test]
    fn wait_when_initialized_skips_the_fence() {
        let device = NullDevice::default();
        let mut cmd = ready(&device);
        device.clear_journal();
        cmd.wait(&device).expect("no-op wait");
        assert!(device.journal().is_empty());
        assert_eq!(cmd.state(), CommandState::Initialized);
    }

    #[test]
    fn reset_from_initialized_skips_the_device() {
        let device = NullDevice::default();
        let mut cmd = ready(&device);
        device.clear_journal();
        cmd.reset(&device).unwrap();
        assert!(device.journal().is_empty());
    }

    #[test]
    fn reset_from_executable_resets_fence_and_buffer() {
        let device = NullDevice::default();
        let mut cmd = ready(&device);
        cycle(&mut cmd, &device).unwrap();
        device.clear_journal();
        cmd.reset(&device).unwrap();
        assert_eq!(device.journal(), vec![GpuCall::ResetCommands]);
    }

    #[test]
    fn recording_context_only_while_recording() {
        let device = NullDevice::default();
        let mut cmd = ready(&device);
        assert!(cmd.recording().is_err());
        cmd.begin(&device).unwrap();
        assert!(cmd.recording().is_ok());
        cmd.end(&device).unwrap();
        assert!(cmd.recording().is_err());
    }

    #[test]
    fn wait_retries_then_succeeds() {
        let device = NullDevice::default().with_fence_timeouts(4);
        let mut cmd = ready(&device);
        cycle(&mut cmd, &device).expect("fifth attempt signals");
        let waits = device
            .journal()
            .into_iter()
            .filter(|call| matches!(call, GpuCall::WaitFence { .. }))
            .count();
        assert_eq!(waits, 5);
    }

    #[test]
    fn wait_exhaustion_is_timeout() {
        let device = NullDevice::default().with_fence_timeouts(5);
        let mut cmd = ready(&device);
        cmd.begin(&device).unwrap();
        cmd.end(&device).unwrap();
        cmd.submit(&device).unwrap();
        let err = cmd.wait(&device).unwrap_err();
        assert!(matches!(err, GpuError::Timeout { attempts: 5 }));
        assert_eq!(cmd.state(), CommandState::Executing);
    }
}
