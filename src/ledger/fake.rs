//! An in-memory ledger for tests. Counts opened and released sessions and can
//! be told to fail.

use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use async_trait::async_trait;

use super::{
    value::Value,
    Ledger, LedgerConfig, LedgerError, LedgerSession, Record, Session, TlsMode,
};


#[derive(Default)]
struct State {
    tables: Mutex<Vec<(&'static str, Record)>>,
    connects: AtomicUsize,
    releases: AtomicUsize,
}

#[derive(Clone, Default)]
pub(crate) struct FakeLedger {
    state: Arc<State>,
    unreachable: bool,
    failing_statements: bool,
}

impl FakeLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every `connect` fails.
    pub(crate) fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Connecting works, but every statement fails.
    pub(crate) fn failing_statements(mut self) -> Self {
        self.failing_statements = true;
        self
    }

    /// Adds a record directly, bypassing any session.
    pub(crate) fn push(&self, table: &'static str, record: Record) {
        self.state.tables.lock().unwrap().push((table, record));
    }

    pub(crate) fn records(&self, table: &str) -> Vec<Record> {
        self.state.tables.lock().unwrap()
            .iter()
            .filter(|(t, _)| *t == table)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub(crate) fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn connect(&self) -> Result<Session, LedgerError> {
        if self.unreachable {
            return Err(LedgerError::communication(
                "failed to connect to ledger",
                io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            ));
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Session::new(FakeSession {
            state: self.state.clone(),
            failing_statements: self.failing_statements,
            released: false,
        }))
    }
}

struct FakeSession {
    state: Arc<State>,
    failing_statements: bool,
    released: bool,
}

impl FakeSession {
    fn check(&self) -> Result<(), LedgerError> {
        if self.released {
            panic!("statement executed on released session");
        }
        if self.failing_statements {
            return Err(LedgerError::communication(
                "failed to execute ledger statement",
                io::Error::new(io::ErrorKind::BrokenPipe, "connection reset"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerSession for FakeSession {
    async fn select(
        &mut self,
        table: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<Vec<Record>, LedgerError> {
        self.check()?;
        let out = self.state.tables.lock().unwrap()
            .iter()
            .filter(|(t, r)| *t == table && r.get(field) == Some(&Value::String(value.into())))
            .map(|(_, r)| r.clone())
            .collect();
        Ok(out)
    }

    async fn insert(&mut self, table: &'static str, records: &[Record]) -> Result<u64, LedgerError> {
        self.check()?;
        let mut tables = self.state.tables.lock().unwrap();
        tables.extend(records.iter().map(|r| (table, r.clone())));
        Ok(records.len() as u64)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.state.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A ledger config with defaults for everything but the name.
pub(crate) fn config(name: Option<&str>) -> LedgerConfig {
    LedgerConfig {
        name: name.map(Into::into),
        user: "bank-ledger".into(),
        password: None,
        host: "127.0.0.1".into(),
        port: 5432,
        tls_mode: TlsMode::Off,
        server_cert: None,
    }
}
