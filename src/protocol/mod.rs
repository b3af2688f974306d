//! Smart-HTTP upload-pack client
//!
//! # Layers
//!
//! - **pktline**: length-prefixed framing shared by every exchange
//! - **advertisement**: `/info/refs` parser
//! - **sideband**: upload-pack response demultiplexer
//! - **progress**: sinks for remote progress text
//! - **fetch**: the negotiation driver tying them together

pub mod advertisement;
mod fetch;
pub mod pktline;
mod progress;
pub mod sideband;

pub use fetch::{
    build_request, want_set, FetchClient, FetchOutcome, PackOutcome, CAPABILITIES,
    DEFAULT_HTTP_TIMEOUT, DEFAULT_USER_AGENT,
};
pub use progress::{NoopProgress, ProgressMode, ProgressSink, SpinnerProgress, StderrProgress};
