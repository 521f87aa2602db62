//! Execution state machine for the active run.
//!
//! The machine is passive: every transition is driven by the controller,
//! which is the only place the order of operations is decided. The machine
//! just keeps the pair of states and the pending-breakpoint reference
//! consistent: the pending breakpoint exists exactly while the execution
//! state is [`ExecutionState::Halted`].

use serde::Serialize;
use uuid::Uuid;

use crate::model::{BreakpointPhase, EventType};

/// The core's control mode for the active run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// No run in progress.
    Idle,
    /// The run proceeds breakpoint by breakpoint; the next one halts.
    Step,
    /// Halted at a breakpoint, waiting for the operator.
    Halted,
    /// Breakpoints are echoed back without halting.
    Continue,
}

/// What the agent appears to be doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    AgentRunning,
    LlmThinking,
    ToolExecuting,
    Halting,
    Halted,
    AgentFinished,
}

/// Reference to the breakpoint the core is currently holding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBreakpoint {
    pub event_id: String,
    pub uuid: Uuid,
}

/// Derive the agent state from the breakpoint that was just released (or
/// forwarded). Releasing a begin breakpoint means the agent is now inside
/// the event's work; releasing an end (or message) breakpoint means free
/// agent time. Debug messages never change the reported state.
pub fn derive_agent_state(
    phase: BreakpointPhase,
    event_type: EventType,
    current: AgentState,
) -> AgentState {
    match (phase, event_type) {
        (_, EventType::DebugMessage) => current,
        (BreakpointPhase::Begin, EventType::LlmQuery) => AgentState::LlmThinking,
        (BreakpointPhase::Begin, EventType::ToolInvocation) => AgentState::ToolExecuting,
        _ => AgentState::AgentRunning,
    }
}

/// Holds the execution/agent state pair and the pending breakpoint for the
/// active run.
#[derive(Debug)]
pub struct StateMachine {
    execution: ExecutionState,
    agent: AgentState,
    pending: Option<PendingBreakpoint>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            execution: ExecutionState::Idle,
            agent: AgentState::Idle,
            pending: None,
        }
    }

    pub fn execution(&self) -> ExecutionState {
        self.execution
    }

    pub fn agent(&self) -> AgentState {
        self.agent
    }

    pub fn pending(&self) -> Option<&PendingBreakpoint> {
        self.pending.as_ref()
    }

    /// PROGRAM_STARTED: a fresh run begins in step mode.
    pub fn run_started(&mut self) {
        self.execution = ExecutionState::Step;
        self.agent = AgentState::AgentRunning;
        self.pending = None;
    }

    /// A breakpoint arrived while stepping: halt on it.
    pub fn halt_at(&mut self, event_id: String, uuid: Uuid) {
        self.execution = ExecutionState::Halted;
        self.agent = AgentState::Halted;
        self.pending = Some(PendingBreakpoint { event_id, uuid });
    }

    /// The pending breakpoint was handed back to the agent. `resume_as` is
    /// Step or Continue depending on which command released it.
    pub fn release_pending(&mut self, resume_as: ExecutionState, agent: AgentState) {
        self.pending = None;
        self.execution = resume_as;
        self.agent = agent;
    }

    /// UI CONTINUE while stepping (nothing pending to release).
    pub fn set_continue(&mut self) {
        self.execution = ExecutionState::Continue;
    }

    /// UI HALT while continuing: arm step mode and report whether the agent
    /// is already held or still has to reach the next breakpoint.
    pub fn arm_halt(&mut self) {
        self.execution = ExecutionState::Step;
        self.agent = if self.pending.is_some() {
            AgentState::Halted
        } else {
            AgentState::Halting
        };
    }

    /// A breakpoint was forwarded without halting (continue mode).
    pub fn forwarded(&mut self, agent: AgentState) {
        self.agent = agent;
    }

    /// PROGRAM_FINISHED or agent disconnect: the run is over.
    pub fn run_finished(&mut self) {
        self.execution = ExecutionState::Idle;
        self.agent = AgentState::AgentFinished;
        self.pending = None;
    }

    /// Invariant: a pending breakpoint exists iff the state is Halted.
    pub fn is_consistent(&self) -> bool {
        self.pending.is_some() == (self.execution == ExecutionState::Halted)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
