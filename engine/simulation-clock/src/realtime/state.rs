//! Real-time clock state machine

use serde::{Deserialize, Serialize};

use crate::error::IllegalTransition;

/// Externally observable mode of a clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockMode {
    RealTime,
    Simulated,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockState {
    InitRealTime,
    InitSimulated,
    RealtimeRunning,
    SimulatedRunning,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Start,
    Stop,
    RequestSimulated,
    DoSimulated,
    RequestRealTime,
    DoRealTime,
}

impl ClockState {
    pub fn initial(mode: ClockMode) -> Option<Self> {
        match mode {
            ClockMode::RealTime => Some(ClockState::InitRealTime),
            ClockMode::Simulated => Some(ClockState::InitSimulated),
            ClockMode::Stopped => None,
        }
    }

    pub fn mode(self) -> ClockMode {
        match self {
            ClockState::InitRealTime | ClockState::RealtimeRunning => ClockMode::RealTime,
            ClockState::InitSimulated | ClockState::SimulatedRunning => ClockMode::Simulated,
            ClockState::Stopped => ClockMode::Stopped,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, ClockState::RealtimeRunning | ClockState::SimulatedRunning)
    }

    pub fn is_initial(self) -> bool {
        matches!(self, ClockState::InitRealTime | ClockState::InitSimulated)
    }

    /// The state reached by applying `trigger`
    pub fn on(self, trigger: Trigger) -> Result<ClockState, IllegalTransition> {
        use ClockState::*;
        use Trigger::*;

        match (self, trigger) {
            (InitRealTime, RequestSimulated) => Ok(InitSimulated),
            (InitRealTime, Start) => Ok(RealtimeRunning),
            (InitSimulated, RequestRealTime) => Ok(InitRealTime),
            (InitSimulated, Start) => Ok(SimulatedRunning),

            (RealtimeRunning, RequestSimulated | RequestRealTime) => Ok(RealtimeRunning),
            (RealtimeRunning, DoSimulated) => Ok(SimulatedRunning),
            (RealtimeRunning, Stop) => Ok(Stopped),

            (SimulatedRunning, RequestRealTime | RequestSimulated) => Ok(SimulatedRunning),
            (SimulatedRunning, DoRealTime) => Ok(RealtimeRunning),
            (SimulatedRunning, Stop) => Ok(Stopped),

            (Stopped, Stop) => Ok(Stopped),

            (
                InitRealTime,
                Stop | DoSimulated | RequestRealTime | DoRealTime,
            )
            | (InitSimulated, Stop | DoSimulated | RequestSimulated | DoRealTime)
            | (RealtimeRunning, Start | DoRealTime)
            | (SimulatedRunning, Start | DoSimulated)
            | (
                Stopped,
                Start | RequestSimulated | DoSimulated | RequestRealTime | DoRealTime,
            ) => Err(IllegalTransition { from: self, trigger }),
        }
    }
}
