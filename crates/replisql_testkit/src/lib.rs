//! # replisql Testkit
//!
//! Test utilities for replisql.
//!
//! This crate provides:
//! - Temporary databases and session helpers
//! - An in-process primary serving the sync protocol over loopback HTTP
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replisql_testkit::prelude::*;
//!
//! #[test]
//! fn replica_catches_up() {
//!     let primary = InMemoryPrimary::new();
//!     primary.append("CREATE TABLE t (x)", vec![]);
//!     let db = TestDatabase::new();
//!     let session = db.open_replica(&primary, "");
//!     session.sync().unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod primary;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::primary::*;
}

pub use fixtures::*;
pub use generators::*;
pub use primary::*;
