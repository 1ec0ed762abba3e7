//! DNS building blocks
//!
//! # Module Structure
//!
//! * `protocol` - DNS record, question and message definitions
//! * `zone_parser` - Parser for single zone file record lines
//! * `zone` - In-memory zone data and the lookup engine
//! * `names` - Name normalization, zone matching and fallthrough policy
//! * `resolve` - Upstream resolution contract
//! * `logging` - Subscriber setup and component spans

/// DNS protocol definitions and message structures
pub mod protocol;

/// Zone file record line parser
pub mod zone_parser;

/// Zone data and lookups
pub mod zone;

/// Domain name helpers
pub mod names;

/// Upstream resolution for names outside the local data
pub mod resolve;

/// Structured logging setup
pub mod logging;
