//! Gate state machine
//!
//! All gate transitions go through the `reduce()` function, which returns
//! the next state and a list of effects for the `GateController` to execute.
//! The reducer itself never touches buffers or sockets.

use serde::Serialize;

/// Gate state with epoch-millisecond timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Closed {
        opened_at: Option<i64>,
        closed_at: Option<i64>,
        /// The last close was forced by the recording ceiling
        buffer_or_time_limit: bool,
    },
    Open {
        opened_at: i64,
    },
}

impl Default for GateState {
    fn default() -> Self {
        GateState::Closed {
            opened_at: None,
            closed_at: None,
            buffer_or_time_limit: false,
        }
    }
}

impl GateState {
    pub fn is_open(&self) -> bool {
        matches!(self, GateState::Open { .. })
    }

    pub fn snapshot(&self) -> GateSnapshot {
        match *self {
            GateState::Open { opened_at } => GateSnapshot {
                is_open: true,
                opened_at: Some(opened_at),
                closed_at: None,
                buffer_or_time_limit: None,
            },
            GateState::Closed {
                opened_at,
                closed_at,
                buffer_or_time_limit,
            } => GateSnapshot {
                is_open: false,
                opened_at,
                closed_at,
                buffer_or_time_limit: closed_at.map(|_| buffer_or_time_limit),
            },
        }
    }
}

/// Commands that can trigger gate transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateCommand {
    Open {
        now: i64,
    },
    Close {
        now: i64,
        /// The non-continuous ceiling was reached
        buffer_or_time_limit: bool,
        /// Closed because of an error
        on_error: bool,
    },
}

/// Snapshot reported in `moduleEvent.gate`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateSnapshot {
    pub is_open: bool,
    pub opened_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_or_time_limit: Option<bool>,
}

/// Effects to be executed after a transition, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEffect {
    /// Start a new capture cycle
    ResetCapture,
    /// Ask the session to connect
    OpenSession,
    /// Flush the unsent suffix and send `audioend` (now or once Ready)
    FinalizeStream { buffer_or_time_limit: bool },
    /// Let the lookback buffer fill again
    ReleaseLookback,
    /// Emit the recording as a WAVE file, if enabled
    ExportWave,
    /// Report an open request on an open gate
    ReportAlreadyOpen,
    EmitGate(GateSnapshot),
}

/// Reducer function: (state, command) -> (next_state, effects)
///
/// Key rules:
/// - Closing a closed gate does nothing
/// - Opening an open gate is reported, never silently accepted
/// - A close caused by an error never exports audio
pub fn reduce(state: &GateState, command: GateCommand) -> (GateState, Vec<GateEffect>) {
    use GateEffect::*;

    match (*state, command) {
        (GateState::Closed { .. }, GateCommand::Open { now }) => {
            let next = GateState::Open { opened_at: now };
            (next, vec![ResetCapture, OpenSession, EmitGate(next.snapshot())])
        }

        (GateState::Open { .. }, GateCommand::Open { .. }) => (*state, vec![ReportAlreadyOpen]),

        (
            GateState::Open { opened_at },
            GateCommand::Close {
                now,
                buffer_or_time_limit,
                on_error,
            },
        ) => {
            let mut effects = vec![FinalizeStream {
                buffer_or_time_limit,
            }];
            effects.push(ReleaseLookback);
            if !on_error {
                effects.push(ExportWave);
            }
            let next = GateState::Closed {
                opened_at: Some(opened_at),
                closed_at: Some(now),
                buffer_or_time_limit,
            };
            effects.push(EmitGate(next.snapshot()));
            (next, effects)
        }

        (GateState::Closed { .. }, GateCommand::Close { .. }) => (*state, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(now: i64, limit: bool, on_error: bool) -> GateCommand {
        GateCommand::Close {
            now,
            buffer_or_time_limit: limit,
            on_error,
        }
    }

    #[test]
    fn closed_open_transitions_to_open() {
        let (next, effects) = reduce(&GateState::default(), GateCommand::Open { now: 100 });

        assert_eq!(next, GateState::Open { opened_at: 100 });
        assert_eq!(effects[0], GateEffect::ResetCapture);
        assert_eq!(effects[1], GateEffect::OpenSession);
        assert!(matches!(
            effects[2],
            GateEffect::EmitGate(GateSnapshot {
                is_open: true,
                opened_at: Some(100),
                ..
            })
        ));
    }

    #[test]
    fn open_open_is_reported_and_keeps_state() {
        let state = GateState::Open { opened_at: 100 };
        let (next, effects) = reduce(&state, GateCommand::Open { now: 200 });

        assert_eq!(next, state);
        assert_eq!(effects, vec![GateEffect::ReportAlreadyOpen]);
    }

    #[test]
    fn open_close_finalizes_and_exports() {
        let state = GateState::Open { opened_at: 100 };
        let (next, effects) = reduce(&state, close(250, false, false));

        assert_eq!(
            next,
            GateState::Closed {
                opened_at: Some(100),
                closed_at: Some(250),
                buffer_or_time_limit: false,
            }
        );
        assert_eq!(
            effects,
            vec![
                GateEffect::FinalizeStream {
                    buffer_or_time_limit: false
                },
                GateEffect::ReleaseLookback,
                GateEffect::ExportWave,
                GateEffect::EmitGate(GateSnapshot {
                    is_open: false,
                    opened_at: Some(100),
                    closed_at: Some(250),
                    buffer_or_time_limit: Some(false),
                }),
            ]
        );
    }

    #[test]
    fn ceiling_close_carries_limit_flag() {
        let state = GateState::Open { opened_at: 100 };
        let (next, effects) = reduce(&state, close(250, true, false));

        assert!(matches!(
            next,
            GateState::Closed {
                buffer_or_time_limit: true,
                ..
            }
        ));
        assert!(effects.contains(&GateEffect::FinalizeStream {
            buffer_or_time_limit: true
        }));
        assert!(matches!(
            effects.last(),
            Some(GateEffect::EmitGate(GateSnapshot {
                buffer_or_time_limit: Some(true),
                ..
            }))
        ));
    }

    #[test]
    fn error_close_skips_export() {
        let state = GateState::Open { opened_at: 100 };
        let (_, effects) = reduce(&state, close(250, false, true));
        assert!(!effects.contains(&GateEffect::ExportWave));
    }

    #[test]
    fn closed_close_is_noop() {
        let state = GateState::Closed {
            opened_at: Some(100),
            closed_at: Some(250),
            buffer_or_time_limit: true,
        };
        let (next, effects) = reduce(&state, close(300, true, false));

        assert_eq!(next, state);
        assert!(effects.is_empty());
    }

    #[test]
    fn reopen_clears_limit_flag() {
        let state = GateState::Closed {
            opened_at: Some(100),
            closed_at: Some(250),
            buffer_or_time_limit: true,
        };
        let (open, _) = reduce(&state, GateCommand::Open { now: 300 });
        let (closed, _) = reduce(&open, close(400, false, false));

        assert_eq!(closed.snapshot().buffer_or_time_limit, Some(false));
        assert_eq!(GateState::default().snapshot().buffer_or_time_limit, None);
    }

    #[test]
    fn gate_snapshot_serialization() {
        let snapshot = GateSnapshot {
            is_open: true,
            opened_at: Some(100),
            closed_at: None,
            buffer_or_time_limit: None,
        };
        assert_eq!(
            serde_json::to_string(&snapshot).unwrap(),
            r#"{"isOpen":true,"openedAt":100}"#
        );
    }
}
