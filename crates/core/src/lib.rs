//! `folio-core`: identity primitives shared by every layer.
//!
//! This crate contains **pure** value types (no infrastructure concerns).

pub mod email;
pub mod error;
pub mod id;

pub use email::Email;
pub use error::DomainError;
pub use id::SubjectId;
