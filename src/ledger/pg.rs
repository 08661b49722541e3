//! The PostgreSQL backed ledger.

use std::{fs, future::Future, path::Path, sync::Arc, time::Instant};
use async_trait::async_trait;
use postgres_types::{ToSql, Type};
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, ServerName, UnixTime},
    DigitallySignedStruct, SignatureScheme,
};
use secrecy::ExposeSecret;
use tokio_postgres::{Client, NoTls, Row};
use tokio_postgres_rustls::MakeRustlsConnect;

use crate::prelude::*;
use super::{
    Ledger, LedgerConfig, LedgerDecimal, LedgerError, LedgerSession, LedgerTimestamp,
    Record, Session, TlsMode,
};


/// Opens one fresh PostgreSQL connection per session. The ledger name is the
/// name of the database.
pub(crate) struct PgLedger {
    name: String,
    pg_config: tokio_postgres::Config,
    tls: Option<MakeRustlsConnect>,
}

impl PgLedger {
    /// Prepares everything needed to connect, but does not connect yet. Fails
    /// if the ledger name is not configured.
    pub(crate) fn new(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let name = config.name.as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| LedgerError::Config(
                "no ledger name given (set `ledger.name` or the `LEDGER_NAME` \
                    environment variable)".into(),
            ))?;

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .user(&config.user)
            .dbname(name)
            .host(&config.host)
            .port(config.port)
            .application_name("bank-ledger");
        if let Some(password) = &config.password {
            pg_config.password(password.expose_secret());
        }

        let tls = match config.tls_mode {
            TlsMode::Off => None,
            _ => {
                let tls_config = tls_config(config)
                    .map_err(|e| LedgerError::Config(format!("{e:#}")))?;
                Some(MakeRustlsConnect::new(tls_config))
            }
        };

        debug!(
            "Prepared access to ledger 'postgresql://{}:*****@{}:{}/{}' (TLS: {:?})",
            config.user,
            config.host,
            config.port,
            name,
            config.tls_mode,
        );

        Ok(Self { name: name.to_owned(), pg_config, tls })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Opens a raw connection, e.g. for migrations. The connection is closed
    /// once the returned client is dropped.
    pub(crate) async fn connect_client(&self) -> Result<Client, LedgerError> {
        let before = Instant::now();
        let connect_err = |e: tokio_postgres::Error| LedgerError::communication(
            format!("failed to connect to ledger '{}'", self.name),
            e,
        );

        let client = match &self.tls {
            None => {
                let (client, connection) = self.pg_config.connect(NoTls).await
                    .map_err(connect_err)?;
                drive(connection);
                client
            }
            Some(tls) => {
                let (client, connection) = self.pg_config.connect(tls.clone()).await
                    .map_err(connect_err)?;
                drive(connection);
                client
            }
        };

        trace!("Connected to ledger '{}' in {:.2?}", self.name, before.elapsed());
        Ok(client)
    }
}

/// Runs the connection in the background until the client is dropped.
fn drive(connection: impl Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static) {
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("Ledger connection error: {e}");
        }
    });
}

#[async_trait]
impl Ledger for PgLedger {
    async fn connect(&self) -> Result<Session, LedgerError> {
        let client = self.connect_client().await?;
        Ok(Session::new(PgSession {
            ledger: self.name.clone(),
            client: Some(client),
        }))
    }
}


struct PgSession {
    ledger: String,
    client: Option<Client>,
}

impl PgSession {
    fn client(&self) -> Result<&Client, LedgerError> {
        self.client.as_ref().ok_or_else(|| LedgerError::communication(
            "ledger session was already released",
            std::io::Error::from(std::io::ErrorKind::NotConnected),
        ))
    }
}

#[async_trait]
impl LedgerSession for PgSession {
    async fn select(
        &mut self,
        table: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<Vec<Record>, LedgerError> {
        let query = format!(r#"select * from "{table}" where "{field}" = $1"#);
        trace!("Executing SQL query: \"{}\" with [{:?}]", query, value);

        let rows = self.client()?
            .query(&query, &[&value])
            .await
            .map_err(|e| LedgerError::communication(
                format!("failed to read from '{table}' in ledger '{}'", self.ledger),
                e,
            ))?;

        rows.iter().map(record_from_row).collect()
    }

    async fn insert(&mut self, table: &'static str, records: &[Record]) -> Result<u64, LedgerError> {
        if records.is_empty() {
            return Ok(0);
        }

        let (query, params) = insert_statement(table, records)?;
        trace!("Executing SQL query: \"{}\" with {:?}", query, params);

        self.client()?
            .execute(&query, &params)
            .await
            .map_err(|e| LedgerError::communication(
                format!("failed to append to '{table}' in ledger '{}'", self.ledger),
                e,
            ))
    }

    fn release(&mut self) {
        // Dropping the client makes the connection task finish.
        if self.client.take().is_some() {
            trace!("Released connection to ledger '{}'", self.ledger);
        }
    }
}

type SqlParams<'a> = Vec<&'a (dyn ToSql + Sync)>;

/// Builds one `insert` statement for all `records`, which must be non-empty
/// and all have the same fields. Columns are in field order, placeholders are
/// numbered consecutively across rows.
fn insert_statement<'a>(
    table: &str,
    records: &'a [Record],
) -> Result<(String, SqlParams<'a>), LedgerError> {
    let columns = records.first()
        .map(|first| first.fields().map(|(name, _)| name).collect::<Vec<_>>())
        .unwrap_or_default();
    let column_list = columns.iter().map(|c| format!(r#""{c}""#)).collect::<Vec<_>>();

    let mut params: SqlParams<'a> = Vec::with_capacity(columns.len() * records.len());
    let mut tuples = Vec::with_capacity(records.len());
    for record in records {
        if !record.fields().map(|(name, _)| name).eq(columns.iter().copied()) {
            return Err(LedgerError::DataShape(format!(
                "all records inserted together into '{table}' must have the same fields",
            )));
        }

        let placeholders = record.fields()
            .map(|(_, value)| {
                params.push(value);
                format!("${}", params.len())
            })
            .collect::<Vec<_>>();
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    // One statement for all rows: PostgreSQL commits either all of them or
    // none.
    let query = format!(
        r#"insert into "{table}" ({}) values {}"#,
        column_list.join(", "),
        tuples.join(", "),
    );

    Ok((query, params))
}

/// Converts all columns we understand into record fields. `NULL`s are left
/// out, as are columns of other types (like the surrogate `id`).
fn record_from_row(row: &Row) -> Result<Record, LedgerError> {
    fn get<'a, T: postgres_types::FromSql<'a>>(
        row: &'a Row,
        idx: usize,
    ) -> Result<Option<T>, LedgerError> {
        row.try_get::<_, Option<T>>(idx).map_err(|e| LedgerError::DataShape(format!(
            "could not read column '{}': {e}",
            row.columns()[idx].name(),
        )))
    }

    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let ty = column.type_();
        if *ty == Type::TEXT || *ty == Type::VARCHAR {
            if let Some(v) = get::<String>(row, idx)? {
                record.insert(name, v);
            }
        } else if <LedgerTimestamp as postgres_types::FromSql>::accepts(ty) {
            if let Some(v) = get::<LedgerTimestamp>(row, idx)? {
                record.insert(name, v);
            }
        } else if <LedgerDecimal as postgres_types::FromSql>::accepts(ty) {
            if let Some(v) = get::<LedgerDecimal>(row, idx)? {
                record.insert(name, v);
            }
        }
    }

    Ok(record)
}


// ===== TLS =====================================================================================

fn tls_config(config: &LedgerConfig) -> Result<rustls::ClientConfig> {
    // Prepare certificate store. If we do not verify the certificate, it's
    // just empty. Otherwise we load system-wide root CAs.
    let mut root_certs = rustls::RootCertStore::empty();
    if config.tls_mode == TlsMode::On {
        let system_certs = rustls_native_certs::load_native_certs();
        for e in &system_certs.errors {
            warn!("Error while loading system-wide certificates: {e}");
        }

        let (added, ignored) = root_certs.add_parsable_certificates(system_certs.certs);
        debug!("Loaded {added} system-wide certificates ({ignored} ignored)");

        if let Some(cert_path) = &config.server_cert {
            let custom_count = load_pem_file(cert_path, &mut root_certs)
                .with_context(|| format!("failed to load '{}'", cert_path.display()))?;
            debug!("Loaded {} certificates from '{}'", custom_count, cert_path.display());
        }
    }

    let mut tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_certs)
        .with_no_client_auth();

    if config.tls_mode == TlsMode::WithoutVerifyCert {
        tls_config.dangerous().set_certificate_verifier(Arc::new(DangerousAlwaysAcceptCerts));
    }

    Ok(tls_config)
}

/// Loads the PEM file at `path` and adds all X509 certificates in it to
/// `root_certs`. Returns an error if a non-x509 item is found. Returns the
/// number of certs added to `root_certs`.
fn load_pem_file(path: &Path, root_certs: &mut rustls::RootCertStore) -> Result<usize> {
    let file = fs::read(path).context("could not read file")?;

    let mut count = 0;
    for item in rustls_pemfile::read_all(&mut &*file) {
        match item.context("could not parse file as PEM")? {
            rustls_pemfile::Item::X509Certificate(cert) => {
                root_certs.add(cert).context("failed to load X509 certificate")?;
                count += 1;
            }
            _ => bail!("found unexpected item, expected X509 certificate"),
        }
    }

    Ok(count)
}

/// Certificate verifier that accepts every certificate. Only used for the
/// "without-verify-cert" TLS mode.
#[derive(Debug)]
struct DangerousAlwaysAcceptCerts;

impl ServerCertVerifier for DangerousAlwaysAcceptCerts {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }
}
