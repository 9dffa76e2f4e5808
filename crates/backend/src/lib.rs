//! # relforge-backend
//!
//! The plugin's endpoint layer. Each handler takes the host-provided
//! storage namespace plus a typed request and returns a typed response; the
//! transport that routes paths to handlers stays on the host side.

mod backend;
mod configure;
mod errors;
mod release;
mod tasks;

pub use backend::Backend;
pub use configure::{ConfigureReleaseRequest, ConfigureTasksRequest};
pub use errors::{BackendError, BackendResult, ErrorResponse};
pub use release::{ReleaseRequest, ReleaseResponse};
pub use tasks::CancelResponse;
