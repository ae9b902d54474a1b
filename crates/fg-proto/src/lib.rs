//! Wire format definitions for fieldgrid.
//!
//! Every type that crosses the directory's HTTP surface lives in [`v1`].
//! Binary fields are carried as hex (keys, signatures) or base64 (payloads)
//! inside JSON bodies.

#![forbid(unsafe_code)]

pub mod conversions;
pub mod v1;
pub mod validation;

#[cfg(test)]
mod proptests;
