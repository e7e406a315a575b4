//! Caseflow core - conversation state, workflow state machine, and shared
//! infrastructure (config, prompt templates, audit trail, run snapshots).
//!
//! Everything here is deterministic and free of I/O except the snapshot
//! store. The async stages and the engine driver live in `caseflow-agent`;
//! they apply events through the pure transition table in `engine` and
//! mutate state only through the checked append operations in `state`.

pub mod audit;
pub mod config;
pub mod engine;
pub mod snapshot;
pub mod state;
pub mod templates;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use config::{AppConfig, ConfigError, ConfigOverrides, EngineConfig, LoadOptions, LogFormat};
pub use engine::{
    EngineContext, EngineError, EngineEvent, EngineState, InquiryWorkflow, StateMachine,
    TransitionOutcome, WorkflowDefinition,
};
pub use snapshot::{RunSnapshot, SnapshotError, SnapshotStore, SnapshotSummary};
pub use state::{
    ConversationId, ConversationState, CoverageAction, CoverageRecord, EvidenceStore, GatherRecord,
    HopRecord, Message, MessageRole, PlanRecord, PlannedCall, Procedure, RunLimits, RunOutcome,
    StateError, ValidationAction, ValidationAttempt,
};
pub use templates::{PromptTemplate, ResponseMode, TemplateError, TemplateStore};
