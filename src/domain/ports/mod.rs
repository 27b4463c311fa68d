//! Port definitions.

mod display_target_port;
mod remote_fetch_port;

pub use display_target_port::DisplayTarget;
pub use remote_fetch_port::RemoteFetch;
