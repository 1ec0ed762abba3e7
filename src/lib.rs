//! Zone Mirror
//!
//! Authoritative DNS answers for zones whose records live in a remote zone
//! management service and are mirrored into memory periodically.
//!
//! # Features
//!
//! * Periodic, non-blocking refresh of every mirrored zone
//! * Several managed zones sharing one apex, answered in configured order
//! * Delegation, wildcard and CNAME handling in the embedded zone engine
//! * Fallthrough to the next handler in the host's chain
//!
//! # Architecture
//!
//! The crate is divided into two main modules:
//! * `dns` - Record model, record parser and zone lookup engine
//! * `clouddns` - Mirroring of the remote zones and query handling

/// DNS building blocks: records, parsing and zone lookups
pub mod dns;

/// Zones mirrored from the remote Cloud DNS service
pub mod clouddns;
