//! Pooled statement execution.
//!
//! The executor owns the deadpool pool and is the single place statements
//! cross into the driver. Session settings (as-of, audit context) are
//! applied with `SET LOCAL` inside an explicit transaction around the
//! statement, so they scope to exactly that statement and vanish on commit.

use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rustls::ClientConfig;
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info, warn};

use crate::binder::{FromRow, PgRow, RowSource};
use crate::config::ConnectionConfig;
use crate::error::{DbError, Result};
use crate::query::Query;

/// Connection timeout for new pool connections.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Statement executor over a shared connection pool.
#[derive(Clone)]
pub struct DbExecutor {
    pool: Pool,
}

impl DbExecutor {
    /// Connect a new pool from configuration and smoke-test it.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match config.ssl_mode.as_str() {
            "disable" => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.max_connections)
                    .build()
                    .map_err(|e| DbError::pool(e, "creating connection pool"))?
            }
            mode => {
                let tls_config = build_tls_config(mode)?;
                let tls = MakeRustlsConnect::new(tls_config);
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.max_connections)
                    .build()
                    .map_err(|e| DbError::pool(e, "creating connection pool"))?
            }
        };

        let client = pool
            .get()
            .await
            .map_err(|e| DbError::pool(e, "testing database connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool (shared with other components).
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for operations that need a raw client
    /// (the ingest pipeline's COPY sink).
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Execute a write statement; returns the affected row count.
    pub async fn execute(&self, query: &Query) -> Result<u64> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| DbError::pool(e, "getting connection for execute"))?;

        let params = param_refs(query);

        let outcome = if query.settings.is_empty() {
            client.execute(&query.sql, &params).await
        } else {
            let tx = client
                .transaction()
                .await
                .map_err(|e| wrap_query_error(e, query))?;
            for setting in &query.settings {
                tx.batch_execute(&setting.render())
                    .await
                    .map_err(|e| wrap_query_error(e, query))?;
            }
            let affected = tx.execute(&query.sql, &params).await;
            match affected {
                Ok(n) => {
                    tx.commit().await.map_err(|e| wrap_query_error(e, query))?;
                    Ok(n)
                }
                Err(e) => Err(e),
            }
        };

        outcome.map_err(|e| wrap_query_error(e, query))
    }

    /// Execute a read statement and materialize the result rows.
    pub async fn query<T: FromRow>(&self, query: &Query) -> Result<Vec<T>> {
        let rows = self.query_rows(query).await?;
        rows.iter()
            .map(|row| T::from_row(row as &dyn RowSource, ""))
            .collect()
    }

    /// Execute a read statement and return the raw adapted rows; used when
    /// the caller also needs result-set metadata columns (paging info).
    pub async fn query_rows(&self, query: &Query) -> Result<Vec<PgRow>> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| DbError::pool(e, "getting connection for query"))?;

        let params = param_refs(query);

        let rows = if query.settings.is_empty() {
            client.query(&query.sql, &params).await
        } else {
            let tx = client
                .transaction()
                .await
                .map_err(|e| wrap_query_error(e, query))?;
            for setting in &query.settings {
                tx.batch_execute(&setting.render())
                    .await
                    .map_err(|e| wrap_query_error(e, query))?;
            }
            let rows = tx.query(&query.sql, &params).await;
            match rows {
                Ok(rows) => {
                    tx.commit().await.map_err(|e| wrap_query_error(e, query))?;
                    Ok(rows)
                }
                Err(e) => Err(e),
            }
        };

        let rows = rows.map_err(|e| wrap_query_error(e, query))?;
        debug!(rows = rows.len(), "query returned");
        Ok(rows.into_iter().map(PgRow::new).collect())
    }

    /// Execute a raw, possibly multi-statement script (migration DDL).
    /// Values never travel through this path.
    pub async fn execute_script(&self, sql: &str) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DbError::pool(e, "getting connection for script"))?;

        client
            .simple_query(sql)
            .await
            .map_err(|e| DbError::pg_query(e, sql, String::new()))?;
        Ok(())
    }
}

fn param_refs(query: &Query) -> Vec<&(dyn ToSql + Sync)> {
    query
        .params
        .iter()
        .map(|p| p as &(dyn ToSql + Sync))
        .collect()
}

fn wrap_query_error(error: tokio_postgres::Error, query: &Query) -> DbError {
    DbError::pg_query(error, query.sql.clone(), query.params_preview())
}

/// TLS configuration per ssl_mode; `require` encrypts without verifying the
/// server certificate.
fn build_tls_config(ssl_mode: &str) -> Result<ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = match ssl_mode {
        "require" => {
            warn!("ssl_mode=require: TLS enabled but server certificate is not verified.");
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        }
        "verify-ca" | "verify-full" => {
            info!("ssl_mode={}: certificate verification enabled", ssl_mode);
            ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        }
        other => {
            return Err(DbError::Config(format!(
                "Invalid ssl_mode '{}'. Valid options: disable, require, verify-ca, verify-full",
                other
            )));
        }
    };

    Ok(config)
}

/// Certificate verifier for ssl_mode=require.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_config_modes() {
        assert!(build_tls_config("require").is_ok());
        assert!(build_tls_config("verify-ca").is_ok());
        assert!(build_tls_config("verify-full").is_ok());
        assert!(build_tls_config("allow").is_err());
    }
}
