//! Document request workflows for loan processing.
//!
//! An administrator chooses which documents a borrower must supply, the
//! borrower uploads files against those selections, and the administrator
//! reviews each upload. Everything hangs off an opaque request identifier.

pub mod config;
pub mod documents;
pub mod error;
pub mod integrations;
pub mod telemetry;
