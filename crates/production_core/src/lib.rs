pub mod classify;
pub mod diagnostics;
pub mod domain;
pub mod error;
pub mod guard;
pub mod policy;
pub mod ports;
pub mod publication;
pub mod session;
pub mod submission;
pub mod tracker;

#[cfg(any(test, feature = "testing"))]
pub mod fakes;

pub use classify::{classify_prompt, Category};
pub use domain::{
    JobFailure, JobFailureKind, JobPoll, JobStatus, NewPublishedVideo, Profile, PublishedVideo,
    SubmittedJob, Visibility,
};
pub use error::{ProductionError, RecoveryAction};
pub use guard::MagnetGuard;
pub use policy::{HourWindow, QuotaDecision, QuotaPolicy, QuotaState, Verdict};
pub use ports::{
    DatabaseService, DiagnosticsSink, FaceSwapProvider, ObjectStorage, PortError, PortResult,
    SessionStore, TextClassifier,
};
pub use publication::{PublicationService, PublishRequest};
pub use session::{PendingSession, SessionPersistence, SlotState};
pub use submission::{CreateProduction, Identity, ProductionService};
pub use tracker::{TrackerConfig, TrackerPhase, TrackerRegistry, TrackerSnapshot, TrackerSubscription};
