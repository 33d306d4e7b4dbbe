//! Data Transfer Objects for REST request/response serialization.

pub mod group_dto;
pub mod session_dto;

pub use group_dto::*;
pub use session_dto::*;
