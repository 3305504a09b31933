//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the tracker view and the
//! API server.

use production_core::domain::{JobFailure, JobFailureKind};
use production_core::tracker::{TrackerPhase, TrackerSnapshot};
use production_core::RecoveryAction;
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Re-attach after a failure; a transport failure starts a fresh loop.
    Retry,

    /// Discard the pending production and stop tracking it.
    NewTake,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Tracking resumed for a pending production.
    Tracking { job_id: String, category: String },

    Progress { phase: TrackerPhase, percent: u8 },

    Succeeded { output_url: String },

    Failed {
        kind: JobFailureKind,
        message: String,
        recovery: RecoveryAction,
    },

    /// The pending production was discarded.
    Cleared,

    /// Reports a fatal error to the client, which should display an error message.
    Error {
        code: String,
        message: String,
        recovery: RecoveryAction,
    },
}

impl ServerMessage {
    pub fn from_snapshot(snapshot: &TrackerSnapshot) -> Self {
        match (snapshot.phase, &snapshot.output_url, &snapshot.failure) {
            (TrackerPhase::Succeeded, Some(url), _) => Self::Succeeded {
                output_url: url.clone(),
            },
            (TrackerPhase::Failed, _, failure) => {
                let failure = failure.clone().unwrap_or_else(|| JobFailure::generation(None));
                Self::Failed {
                    kind: failure.kind,
                    recovery: failure.recovery(),
                    message: failure.message,
                }
            }
            (phase, _, _) => Self::Progress {
                phase,
                percent: snapshot.percent,
            },
        }
    }
}
