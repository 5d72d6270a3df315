//! # Domain Layer
//!
//! Request and response shapes, peer capability rules and errors.

pub mod errors;
pub mod request;

pub use errors::{DeliveryError, DistributorError};
pub use request::{Delivery, FetchRequest, Request, RequestKind, Response};
