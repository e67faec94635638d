//! # Communications interface crate.
//!
//! Provides the wire interface shared between the mower and its operator
//! clients.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Inbound operator commands
pub mod tc;

/// Outbound mower state telemetry
pub mod tm;
