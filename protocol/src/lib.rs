//! Wire protocol spoken between an instrumentation payload running inside the
//! target and the supervisor reading the target's output.
//!
//! Every event is a single line on the target's standard output: the literal
//! [`INTERCEPT_TAG`], a space, and a JSON object of the form
//! `{"time": ..., "event": ..., "data": {...}}`. Anything else on that stream is
//! ordinary program output.

mod envelope;

pub use envelope::DecodeError;
pub use envelope::Envelope;
pub use envelope::EventKind;
pub use envelope::INTERCEPT_TAG;
pub use envelope::decode_line;
pub use envelope::decode_tagged;
pub use envelope::encode_line;
pub use envelope::encode_tagged;
pub use envelope::is_tagged;
