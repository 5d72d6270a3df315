//! Handler domain: connection-ending errors.

pub mod errors;

pub use errors::HandlerError;
