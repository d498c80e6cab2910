//! Transaction handling for sessions.
//!
//! The state machine decides which `BEGIN`/`COMMIT`/`ROLLBACK` commands a
//! session issues around user statements, based on the configured isolation
//! level and autocommit mode. It never talks to the engine itself; the
//! session runs the commands and reports the engine's real autocommit flag
//! back after each one.

mod state;

pub use state::{ScopeExit, TransactionState, TransactionStateMachine, TxnCommand};
