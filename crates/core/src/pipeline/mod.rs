//! Event pipeline stages
//!
//! Every stage consumes a bounded event stream and produces a bounded event
//! stream, runs as one task, closes its output when the input closes, and
//! preserves order between distinct paths.

mod checksum;
mod debounce;
mod filter;

pub use checksum::ChecksumFilter;
pub use debounce::debounce;
pub use filter::ignore_filter;
