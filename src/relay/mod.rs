//! Chat streaming relay.

pub mod stream_relay;

pub use stream_relay::{build_prompt, RelayOutcome, StreamRelay};
