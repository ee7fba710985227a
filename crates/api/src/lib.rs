//! Session API facade.
//!
//! Transport-agnostic request handling: DTOs in, DTOs or a categorised
//! [`ApiError`] out. A transport only has to (de)serialize.

pub mod dto;
pub mod error;
pub mod search;
pub mod service;

pub use error::ApiError;
pub use search::{SessionQuery, SessionSearch};
pub use service::{ApiResult, SessionService, checks_to_command};
