//! Exam module with threshold-protected content.
//!
//! This module implements the server-side logic for threshold-protected exams:
//!
//! - Exam creation: content encrypted under a fresh master key, one key share
//!   issued to each custodian organization
//! - Share collection with a per-exam lock and exactly-once reconstruction
//! - Questions encrypted under organization passphrases
//! - Signed answer batches, verified and committed all-or-nothing
//! - Score aggregation
//!
//! # Architecture
//!
//! - `call`: Message types for state-changing operations
//! - `handlers`: Business logic for processing calls
//! - `queries`: Read-only state access
//! - `results`: Score aggregation
//! - `state`: Module state and per-exam locks
//! - `store`: Record store contract and in-memory implementation
//! - `config`: Protocol configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```ignore
//! use exam_module::{handlers, ModuleState};
//!
//! let state = ModuleState::new();
//! let ctx = handlers::CallContext { caller: "admin".into(), timestamp: 0 };
//!
//! handlers::handle_register_organization(&state, &ctx, "org-a".into(), "A".into())?;
//! let exam = handlers::handle_create_exam(&state, &ctx, "exam-1".into(), ...)?;
//!
//! // Each organization later hands its share back
//! handlers::handle_submit_share(&state, &ctx, "exam-1".into(), "org-a".into(), share)?;
//! ```

pub mod call;
pub mod config;
pub mod error;
pub mod handlers;
pub mod queries;
pub mod results;
pub mod state;
pub mod store;

pub use call::{CallOutcome, ExamCall};
pub use config::{ConfigValidationError, ProtocolConfig};
pub use error::ExamError;
pub use handlers::{dispatch, CallContext, HandlerResult};
pub use queries::{ExamQuery, ExamQueryResponse};
pub use state::{ExamLocks, ModuleState};
pub use store::{ExamStore, MemoryStore, StoreSnapshot};
