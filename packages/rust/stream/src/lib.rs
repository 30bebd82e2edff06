//! Incremental EDA pipeline streaming core.
//!
//! This crate turns the server's `data:` event stream into a reconciled,
//! ordered view of analysis blocks:
//! - [`decoder`]: frames a byte stream on blank-line boundaries
//! - [`parser`]: turns frame payloads into [`BlockUpdate`](edastream_shared::BlockUpdate)s
//! - [`reconciler`]: merges updates by block identity in first-seen order
//! - [`session`]: owns one streaming request and drives the pipeline above
//!
//! Nothing here touches the network; the HTTP side plugs in through
//! [`Transport`].

pub mod decoder;
pub mod parser;
pub mod reconciler;
pub mod session;

pub use decoder::{DATA_PREFIX, FrameDecoder};
pub use parser::{FrameDiagnostic, parse_payload};
pub use reconciler::{BlockReconciler, BlockState, StatusCounts};
pub use session::{
    Callbacks, CancelHandle, PipelineSession, SessionOutcome, SessionReport, SessionStats,
    SessionStatus, SessionSubscriber, Transport,
};
