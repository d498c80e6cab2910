//! Transaction state machine.

use crate::config::{AutocommitMode, IsolationLevel};
use crate::error::{CoreError, CoreResult};
use crate::statement::StatementKind;

/// Whether a transaction is open on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction is open.
    Idle,
    /// A transaction is open.
    Open,
}

/// A transaction command the session must run on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnCommand {
    /// `BEGIN <level>`.
    Begin(IsolationLevel),
    /// `COMMIT`.
    Commit,
    /// `ROLLBACK`.
    Rollback,
}

/// What the session must do when a scope exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeExit {
    /// An enclosing scope is still active; nothing to do.
    Nested,
    /// Outermost scope succeeded; commit.
    Commit,
    /// Outermost scope failed, or an inner scope failed; roll back.
    Rollback,
}

/// Decides transaction commands for one session.
///
/// | isolation | mode | behavior |
/// |---|---|---|
/// | set | `Legacy` | `BEGIN <level>` before the first write while idle |
/// | none | `Legacy` | only user-issued transactions |
/// | any | `Enabled` | only user-issued transactions |
/// | any | `Disabled` | always open; re-opened after commit and before the next statement after rollback |
#[derive(Debug, Clone)]
pub struct TransactionStateMachine {
    isolation: Option<IsolationLevel>,
    mode: AutocommitMode,
    state: TransactionState,
    pending_writes: bool,
    syncing: bool,
    scope_depth: usize,
    rollback_only: bool,
}

impl TransactionStateMachine {
    /// Creates an idle state machine.
    pub fn new(isolation: Option<IsolationLevel>, mode: AutocommitMode) -> Self {
        Self {
            isolation,
            mode,
            state: TransactionState::Idle,
            pending_writes: false,
            syncing: false,
            scope_depth: 0,
            rollback_only: false,
        }
    }

    /// Configured isolation level.
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    /// Configured autocommit mode.
    pub fn mode(&self) -> AutocommitMode {
        self.mode
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// Returns true if the open transaction holds uncommitted changes.
    pub fn has_pending_writes(&self) -> bool {
        self.pending_writes
    }

    /// Returns true while a sync is running.
    pub fn is_syncing(&self) -> bool {
        self.syncing
    }

    /// Current scope nesting depth.
    pub fn scope_depth(&self) -> usize {
        self.scope_depth
    }

    fn begin_level(&self) -> IsolationLevel {
        self.isolation.unwrap_or(IsolationLevel::Deferred)
    }

    /// Command to run when the session is created.
    pub fn on_open(&self) -> Option<TxnCommand> {
        (self.mode == AutocommitMode::Disabled).then(|| TxnCommand::Begin(self.begin_level()))
    }

    /// Command to run before a statement of `kind`.
    pub fn before_statement(&self, kind: StatementKind) -> CoreResult<Option<TxnCommand>> {
        if self.syncing {
            return Err(CoreError::interface("sync in progress"));
        }
        if self.state == TransactionState::Open || kind == StatementKind::TransactionControl {
            return Ok(None);
        }
        let command = match (self.mode, self.isolation) {
            (AutocommitMode::Legacy, Some(level)) if kind.is_write() => {
                Some(TxnCommand::Begin(level))
            }
            (AutocommitMode::Disabled, _) => Some(TxnCommand::Begin(self.begin_level())),
            _ => None,
        };
        Ok(command)
    }

    /// Records that a statement of `kind` ran, given the engine's state after it.
    pub fn after_statement(&mut self, kind: StatementKind, engine_in_transaction: bool) {
        self.reconcile(engine_in_transaction);
        if self.state == TransactionState::Open && kind != StatementKind::Query {
            self.pending_writes = true;
        }
    }

    /// Aligns the state with the engine's autocommit flag.
    ///
    /// Covers user-issued transaction statements and engine-side automatic
    /// rollbacks.
    pub fn reconcile(&mut self, engine_in_transaction: bool) {
        self.state = if engine_in_transaction {
            TransactionState::Open
        } else {
            self.pending_writes = false;
            TransactionState::Idle
        };
    }

    /// Command to run for `commit()`; `None` when idle.
    pub fn commit(&self) -> Option<TxnCommand> {
        self.in_transaction().then_some(TxnCommand::Commit)
    }

    /// Command to run after a successful commit (re-open in `Disabled` mode).
    pub fn after_commit(&self) -> Option<TxnCommand> {
        if self.mode == AutocommitMode::Disabled && !self.syncing {
            Some(TxnCommand::Begin(self.begin_level()))
        } else {
            None
        }
    }

    /// Command to run for `rollback()`; `None` when idle.
    pub fn rollback(&self) -> Option<TxnCommand> {
        self.in_transaction().then_some(TxnCommand::Rollback)
    }

    /// Command to run when the session closes.
    pub fn close(&self) -> Option<TxnCommand> {
        self.rollback()
    }

    /// Starts a sync.
    ///
    /// Fails with a conflict inside a scope, or when the open transaction
    /// holds uncommitted changes. A clean open transaction is released with
    /// the returned rollback and re-opened by [`end_sync`](Self::end_sync).
    pub fn begin_sync(&mut self) -> CoreResult<Option<TxnCommand>> {
        if self.syncing {
            return Err(CoreError::interface("sync already in progress"));
        }
        if self.scope_depth > 0 {
            return Err(CoreError::conflict("cannot sync inside a transaction scope"));
        }
        if self.in_transaction() && self.pending_writes {
            return Err(CoreError::conflict(
                "cannot sync while the open transaction has uncommitted changes; commit or roll back first",
            ));
        }
        self.syncing = true;
        Ok(self.rollback())
    }

    /// Ends a sync and returns the command restoring the transaction mode.
    pub fn end_sync(&mut self) -> Option<TxnCommand> {
        self.syncing = false;
        if self.mode == AutocommitMode::Disabled && !self.in_transaction() {
            Some(TxnCommand::Begin(self.begin_level()))
        } else {
            None
        }
    }

    /// Enters a scope; the outermost scope opens a transaction when idle.
    pub fn enter_scope(&mut self) -> Option<TxnCommand> {
        self.scope_depth += 1;
        if self.scope_depth == 1 {
            self.rollback_only = false;
            if !self.in_transaction() {
                return Some(TxnCommand::Begin(self.begin_level()));
            }
        }
        None
    }

    /// Leaves a scope that succeeded (`ok`) or failed.
    ///
    /// A failure anywhere marks the transaction rollback-only; only the
    /// outermost exit acts.
    pub fn exit_scope(&mut self, ok: bool) -> ScopeExit {
        if !ok {
            self.rollback_only = true;
        }
        self.scope_depth = self.scope_depth.saturating_sub(1);
        if self.scope_depth > 0 {
            return ScopeExit::Nested;
        }
        let rollback = std::mem::take(&mut self.rollback_only);
        if rollback {
            ScopeExit::Rollback
        } else {
            ScopeExit::Commit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DML: StatementKind = StatementKind::Dml;
    const QUERY: StatementKind = StatementKind::Query;

    fn machine(isolation: Option<IsolationLevel>, mode: AutocommitMode) -> TransactionStateMachine {
        TransactionStateMachine::new(isolation, mode)
    }

    #[test]
    fn legacy_with_level_begins_before_writes_only() {
        let m = machine(Some(IsolationLevel::Immediate), AutocommitMode::Legacy);
        assert_eq!(m.on_open(), None);
        assert_eq!(m.before_statement(QUERY).unwrap(), None);
        assert_eq!(
            m.before_statement(DML).unwrap(),
            Some(TxnCommand::Begin(IsolationLevel::Immediate))
        );
        assert_eq!(
            m.before_statement(StatementKind::Ddl).unwrap(),
            Some(TxnCommand::Begin(IsolationLevel::Immediate))
        );
        assert_eq!(m.before_statement(StatementKind::TransactionControl).unwrap(), None);
    }

    #[test]
    fn legacy_without_level_and_enabled_never_begin() {
        for m in [
            machine(None, AutocommitMode::Legacy),
            machine(Some(IsolationLevel::Deferred), AutocommitMode::Enabled),
        ] {
            assert_eq!(m.before_statement(DML).unwrap(), None);
            assert_eq!(m.commit(), None);
            assert_eq!(m.rollback(), None);
        }
    }

    #[test]
    fn disabled_is_always_open() {
        let mut m = machine(None, AutocommitMode::Disabled);
        assert_eq!(m.on_open(), Some(TxnCommand::Begin(IsolationLevel::Deferred)));
        m.reconcile(true);
        assert!(m.in_transaction());
        assert_eq!(m.before_statement(QUERY).unwrap(), None);

        assert_eq!(m.commit(), Some(TxnCommand::Commit));
        m.reconcile(false);
        assert_eq!(
            m.after_commit(),
            Some(TxnCommand::Begin(IsolationLevel::Deferred))
        );

        m.reconcile(false);
        assert_eq!(
            m.before_statement(QUERY).unwrap(),
            Some(TxnCommand::Begin(IsolationLevel::Deferred))
        );
    }

    #[test]
    fn pending_writes_follow_statements() {
        let mut m = machine(Some(IsolationLevel::Deferred), AutocommitMode::Legacy);
        m.after_statement(QUERY, false);
        assert!(!m.has_pending_writes());
        m.after_statement(DML, true);
        assert!(m.has_pending_writes());
        m.reconcile(false);
        assert!(!m.has_pending_writes());
    }

    #[test]
    fn sync_gate() {
        let mut m = machine(None, AutocommitMode::Disabled);
        m.reconcile(true);

        // clean transaction is released and re-opened
        assert_eq!(m.begin_sync().unwrap(), Some(TxnCommand::Rollback));
        assert!(m.before_statement(QUERY).is_err());
        assert!(m.begin_sync().is_err());
        m.reconcile(false);
        assert_eq!(
            m.end_sync(),
            Some(TxnCommand::Begin(IsolationLevel::Deferred))
        );

        // dirty transaction is a conflict
        m.reconcile(true);
        m.after_statement(DML, true);
        let err = m.begin_sync().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
        assert!(!m.is_syncing());
    }

    #[test]
    fn sync_is_refused_inside_a_scope() {
        for mode in [AutocommitMode::Legacy, AutocommitMode::Enabled] {
            let mut m = machine(None, mode);
            assert!(m.enter_scope().is_some());
            m.reconcile(true);
            let err = m.begin_sync().unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
            assert!(!m.is_syncing());
            assert!(m.in_transaction(), "the scope keeps its transaction");
            assert_eq!(m.exit_scope(true), ScopeExit::Commit);
            assert_eq!(m.begin_sync().unwrap(), Some(TxnCommand::Rollback));
        }
    }

    #[test]
    fn nested_scopes_share_one_transaction() {
        let mut m = machine(Some(IsolationLevel::Deferred), AutocommitMode::Legacy);
        assert_eq!(
            m.enter_scope(),
            Some(TxnCommand::Begin(IsolationLevel::Deferred))
        );
        m.reconcile(true);
        assert_eq!(m.enter_scope(), None);
        assert_eq!(m.exit_scope(true), ScopeExit::Nested);
        assert_eq!(m.exit_scope(true), ScopeExit::Commit);
        assert_eq!(m.scope_depth(), 0);
    }

    #[test]
    fn inner_failure_poisons_outer_scope() {
        let mut m = machine(None, AutocommitMode::Enabled);
        m.enter_scope();
        m.enter_scope();
        assert_eq!(m.exit_scope(false), ScopeExit::Nested);
        assert_eq!(m.exit_scope(true), ScopeExit::Rollback);

        // next scope starts clean
        m.enter_scope();
        assert_eq!(m.exit_scope(true), ScopeExit::Commit);
    }
}
