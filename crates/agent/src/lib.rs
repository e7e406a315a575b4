//! Agent runtime - the workflow engine and its stages.
//!
//! This crate drives one conversation turn end to end:
//! 1. **Procedure selection** (`procedure`) - pick the one guidance document
//!    for the run, if any matches
//! 2. **Plan** (`plan`) - choose the tool calls for the current hop
//! 3. **Gather** (`gather`) - execute them concurrently with isolated failures
//! 4. **Coverage** (`coverage`) - judge whether the evidence suffices
//! 5. **Draft** (`draft`) - compose the prompt and generate a candidate reply
//! 6. **Validate** (`validate`) - check the candidate, retry or escalate
//!
//! # Architecture
//!
//! ```text
//! Plan → Gather → Coverage ─continue→ Plan   (≤ max_hops)
//!                    │proceed
//!                    ▼
//!                  Draft → Validate ─retry→ Draft   (≤ max_validation_retries)
//!                              │pass / exhausted
//!                              ▼
//!                    Delivered / Escalated
//! ```
//!
//! The transition table itself lives in `caseflow-core::engine`; the
//! [`runtime::WorkflowEngine`] here owns the external collaborators (tool
//! catalogue, LLM, validator, ticketing) and applies events through it.
//!
//! # Safety principle
//!
//! The LLM plans, judges and writes text. It never routes the state machine
//! directly: hop and retry budgets are enforced by the engine, and every
//! candidate response passes validation before delivery.

pub mod coverage;
pub mod draft;
pub mod gather;
pub mod llm;
pub mod plan;
pub mod procedure;
pub mod prompts;
pub mod runtime;
pub mod testkit;
pub mod validate;

pub use draft::{DraftDebug, DraftError, DraftOutcome};
pub use llm::{GenerationError, HttpLlmClient, LlmClient, RetryPolicy};
pub use procedure::ProcedureSelector;
pub use runtime::{RunError, RunReport, TracingAuditSink, WorkflowEngine};
pub use validate::{
    HttpResponseValidator, ResponseValidator, ValidationServiceError, ValidationVerdict,
};
