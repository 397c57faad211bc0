//! Misso Protocol
//!
//! Shared types for talking to the procedure backend: raw snapshot records
//! served over HTTP, envelopes pushed over the streaming socket, and the
//! normalized session model every consumer reads.

pub mod envelope;
pub mod records;
pub mod types;

pub use envelope::{InstrumentUsage, LiveSurgery, StreamEnvelope};
pub use records::{ConfigResponse, LiveFlag, LooseNumber, RawSurgeryRecord};
pub use types::*;
