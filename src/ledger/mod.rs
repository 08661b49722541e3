//! Access to the transaction ledger.
//!
//! The rest of the application only talks to the ledger through the
//! [`Ledger`] trait: it opens a [`Session`], executes exactly one statement
//! and drops the session again. Dropping a session always releases the
//! underlying connection, no matter whether the statement succeeded, failed
//! or the future was cancelled. Connections are never pooled or shared
//! between operations.

use std::{
    ops::{Deref, DerefMut},
    path::PathBuf,
};
use async_trait::async_trait;
use secrecy::SecretString;

use crate::prelude::*;


pub(crate) mod cmd;
mod migrations;
mod pg;
mod value;

#[cfg(test)]
pub(crate) mod fake;

pub(crate) use self::{
    migrations::{migrate, MigrationPlan},
    pg::PgLedger,
    value::{LedgerDecimal, LedgerTimestamp, Record},
};


#[derive(Debug, confique::Config)]
pub(crate) struct LedgerConfig {
    /// The name of the ledger to record transactions in. This is the name of
    /// the PostgreSQL database holding the ledger. Required: the service
    /// refuses to start without it.
    #[config(env = "LEDGER_NAME")]
    pub(crate) name: Option<String>,

    /// The username of the database user.
    #[config(env = "LEDGER_USER", default = "bank-ledger")]
    pub(crate) user: String,

    /// The password of the database user.
    #[config(env = "LEDGER_PASSWORD")]
    pub(crate) password: Option<SecretString>,

    /// The host the database server is running on.
    #[config(env = "LEDGER_HOST", default = "127.0.0.1")]
    pub(crate) host: String,

    /// The port the database server is listening on.
    #[config(env = "LEDGER_PORT", default = 5432)]
    pub(crate) port: u16,

    /// The TLS mode for the database connection.
    ///
    /// - "on": encryption is required and the server certificate is validated
    ///    against trusted certificates which are loaded from the system's
    ///    native certificate store. If `server_cert` is set, that's also
    ///    loaded and trusted.
    /// - "without-verify-cert": encryption is required, but the server
    ///   certificate is not checked. Allows MITM attacks! Discouraged.
    /// - "off": no encryption. Discouraged even more.
    #[config(env = "LEDGER_TLS_MODE", default = "on")]
    pub(crate) tls_mode: TlsMode,

    /// Path to the server certificate. Has to be a PEM encoded file
    /// containing one or more X509 certificates.
    pub(crate) server_cert: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum TlsMode {
    Off,
    On,
    WithoutVerifyCert,
}

impl LedgerConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.server_cert.is_some() && self.tls_mode != TlsMode::On {
            bail!(r#"`ledger.server_cert` is set, but TLS mode is NOT "on", which makes no sense"#);
        }

        Ok(())
    }
}


pub(crate) type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Everything that can go wrong when talking to the ledger.
#[derive(Debug, thiserror::Error)]
pub(crate) enum LedgerError {
    /// Required configuration is missing or invalid. Reported before any
    /// connection attempt is made.
    #[error("ledger is not configured correctly: {0}")]
    Config(String),

    /// Connecting to the ledger or executing a statement failed.
    #[error("{context}")]
    Communication {
        context: String,
        #[source]
        source: BoxedError,
    },

    /// A record returned by the ledger does not have the expected shape.
    #[error("malformed ledger record: {0}")]
    DataShape(String),

    /// A value cannot be represented by the ledger types. Detected before
    /// anything is sent to the ledger.
    #[error("value out of range: {0}")]
    OutOfRange(String),
}

impl LedgerError {
    pub(crate) fn communication(context: impl Into<String>, source: impl Into<BoxedError>) -> Self {
        Self::Communication {
            context: context.into(),
            source: source.into(),
        }
    }
}


/// Something that can open sessions to the ledger.
#[async_trait]
pub(crate) trait Ledger: Send + Sync {
    /// Opens a new connection. Every call creates a fresh one.
    async fn connect(&self) -> Result<Session, LedgerError>;
}

/// One open connection to the ledger. Only used through [`Session`], which
/// makes sure `release` is called.
#[async_trait]
pub(crate) trait LedgerSession: Send {
    /// Returns all records of `table` whose `field` equals `value`. The order
    /// is whatever the ledger returns.
    async fn select(
        &mut self,
        table: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<Vec<Record>, LedgerError>;

    /// Appends all `records` to `table` with a single statement. All records
    /// have to have the same fields. Returns the number of inserted rows.
    async fn insert(&mut self, table: &'static str, records: &[Record]) -> Result<u64, LedgerError>;

    /// Closes the connection. Must be idempotent.
    fn release(&mut self);
}

/// Owns an open ledger connection and releases it when dropped.
pub(crate) struct Session {
    inner: Box<dyn LedgerSession>,
}

impl Session {
    pub(crate) fn new(inner: impl LedgerSession + 'static) -> Self {
        Self { inner: Box::new(inner) }
    }
}

impl Deref for Session {
    type Target = dyn LedgerSession;
    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.inner
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.release();
    }
}


#[cfg(test)]
mod tests {
    use super::{fake::FakeLedger, *};

    #[tokio::test]
    async fn session_released_on_success() {
        let ledger = FakeLedger::new();
        {
            let mut session = ledger.connect().await.unwrap();
            session.select("transactions", "account_number", "A1").await.unwrap();
            assert_eq!(ledger.releases(), 0);
        }
        assert_eq!(ledger.connects(), 1);
        assert_eq!(ledger.releases(), 1);
    }

    #[tokio::test]
    async fn session_released_on_error() {
        async fn failing_op(ledger: &FakeLedger) -> Result<Vec<Record>, LedgerError> {
            let mut session = ledger.connect().await?;
            session.select("transactions", "account_number", "A1").await
        }

        let ledger = FakeLedger::new().failing_statements();
        let err = failing_op(&ledger).await.unwrap_err();
        assert!(matches!(err, LedgerError::Communication { .. }));
        assert_eq!(ledger.releases(), 1);
    }

    #[tokio::test]
    async fn session_released_when_future_is_cancelled() {
        use futures::FutureExt;

        let ledger = FakeLedger::new();
        let op = async {
            let _session = ledger.connect().await?;
            futures::future::pending::<()>().await;
            Ok::<_, LedgerError>(())
        };

        // Poll once so that the session is opened, then drop the future.
        let mut op = Box::pin(op);
        assert!((&mut op).now_or_never().is_none());
        assert_eq!(ledger.connects(), 1);
        assert_eq!(ledger.releases(), 0);
        drop(op);
        assert_eq!(ledger.releases(), 1);
    }

    #[tokio::test]
    async fn failed_connect_opens_no_session() {
        let ledger = FakeLedger::new().unreachable();
        let err = ledger.connect().await.err().unwrap();
        assert!(matches!(err, LedgerError::Communication { .. }));
        assert_eq!(ledger.releases(), 0);
    }

    #[test]
    fn server_cert_requires_tls() {
        let mut config = fake::config(Some("bank"));
        config.server_cert = Some("/tmp/cert.pem".into());
        config.tls_mode = TlsMode::Off;
        assert!(config.validate().is_err());
        config.tls_mode = TlsMode::On;
        assert!(config.validate().is_ok());
    }
}
