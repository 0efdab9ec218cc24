//! OpenDAL Operator factory for GhostVault storage backends

use std::path::{Path, PathBuf};

use gv_core::config::{StorageBackend, StorageConfig};
use gv_core::{VaultError, VaultResult};
use opendal::Operator;
use secrecy::{ExposeSecret, SecretString};

/// S3 access credentials. Loaded from the environment, never from the config file.
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl S3Credentials {
    /// `GV_ACCESS_KEY_ID` / `GV_SECRET_ACCESS_KEY`, falling back to the `AWS_` names.
    pub fn from_env() -> VaultResult<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> VaultResult<Self> {
        let get = |names: [&str; 2]| {
            names
                .iter()
                .find_map(|n| lookup(n).filter(|v| !v.trim().is_empty()))
        };
        let access_key_id = get(["GV_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"]).ok_or_else(|| {
            VaultError::Config("S3 access key missing: set AWS_ACCESS_KEY_ID".into())
        })?;
        let secret = get(["GV_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY"]).ok_or_else(|| {
            VaultError::Config("S3 secret key missing: set AWS_SECRET_ACCESS_KEY".into())
        })?;
        Ok(Self {
            access_key_id,
            secret_access_key: SecretString::from(secret),
        })
    }
}

/// Build an operator for the configured backend.
///
/// The S3 backend needs `creds`; a missing credential set is a config error
/// rather than a silent fallback to some other backend. If `enforce_tls` is
/// set, a plaintext HTTP endpoint is refused; otherwise it is only warned about.
pub fn build_operator(
    storage: &StorageConfig,
    creds: Option<&S3Credentials>,
) -> VaultResult<Operator> {
    match storage.backend {
        StorageBackend::S3 => {
            let creds = creds.ok_or_else(|| {
                VaultError::Config("S3 backend selected but no credentials were provided".into())
            })?;
            build_s3(storage, creds)
        }
        StorageBackend::Fs => build_fs(&expand_home(&storage.root)),
        StorageBackend::Memory => memory_operator(),
    }
}

fn build_s3(storage: &StorageConfig, creds: &S3Credentials) -> VaultResult<Operator> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            return Err(VaultError::Config(format!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            )));
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP; credentials and ciphertext travel unencrypted. \
             Set storage.enforce_tls = true and use HTTPS in production."
        );
    }

    // Path-style addressing is the opendal default, which MinIO-style endpoints need.
    let builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&storage.bucket)
        .access_key_id(&creds.access_key_id)
        .secret_access_key(creds.secret_access_key.expose_secret());

    let op = Operator::new(builder)
        .map_err(|e| VaultError::Config(format!("creating S3 operator: {e}")))?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();
    Ok(op)
}

fn build_fs(root: &Path) -> VaultResult<Operator> {
    let root = root
        .to_str()
        .ok_or_else(|| VaultError::Config(format!("storage.root is not UTF-8: {root:?}")))?;
    let op = Operator::new(opendal::services::Fs::default().root(root))
        .map_err(|e| VaultError::Config(format!("creating fs operator: {e}")))?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

/// Process-local operator. Used by tests and by `backend = "memory"`.
pub fn memory_operator() -> VaultResult<Operator> {
    Operator::new(opendal::services::Memory::default())
        .map(|b| b.finish())
        .map_err(|e| VaultError::Config(format!("creating memory operator: {e}")))
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn creds() -> S3Credentials {
        S3Credentials {
            access_key_id: "key".into(),
            secret_access_key: SecretString::from("secret"),
        }
    }

    #[test]
    fn test_s3_http_allowed_without_enforce_tls() {
        let storage = StorageConfig {
            endpoint: "http://localhost:9000".into(),
            enforce_tls: false,
            ..Default::default()
        };
        assert!(build_operator(&storage, Some(&creds())).is_ok());
    }

    #[test]
    fn test_s3_http_rejected_with_enforce_tls() {
        let storage = StorageConfig {
            endpoint: "http://insecure:9000".into(),
            enforce_tls: true,
            ..Default::default()
        };
        let err = build_operator(&storage, Some(&creds())).unwrap_err();
        assert!(matches!(err, VaultError::Config(_)));
        assert!(err.to_string().contains("enforce_tls"));
    }

    #[test]
    fn test_s3_https_with_enforce_tls() {
        let storage = StorageConfig {
            endpoint: "https://s3.example.com".into(),
            enforce_tls: true,
            ..Default::default()
        };
        assert!(build_operator(&storage, Some(&creds())).is_ok());
    }

    #[test]
    fn test_s3_without_credentials_is_config_error() {
        let err = build_operator(&StorageConfig::default(), None).unwrap_err();
        assert!(matches!(err, VaultError::Config(_)));
    }

    #[test]
    fn test_memory_backend_needs_no_credentials() {
        let storage = StorageConfig {
            backend: StorageBackend::Memory,
            ..Default::default()
        };
        assert!(build_operator(&storage, None).is_ok());
    }

    #[test]
    fn test_credentials_prefer_gv_names() {
        let env: HashMap<&str, &str> = [
            ("AWS_ACCESS_KEY_ID", "aws-key"),
            ("GV_ACCESS_KEY_ID", "gv-key"),
            ("AWS_SECRET_ACCESS_KEY", "aws-secret"),
        ]
        .into_iter()
        .collect();
        let c = S3Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.access_key_id, "gv-key");
        assert_eq!(c.secret_access_key.expose_secret(), "aws-secret");
        assert!(!format!("{c:?}").contains("aws-secret"));
    }

    #[test]
    fn test_missing_credentials() {
        let err = S3Credentials::from_lookup(|_| None).unwrap_err();
        assert!(err.to_string().contains("AWS_ACCESS_KEY_ID"));
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home(Path::new("/var/lib/gv"));
        assert_eq!(expanded, PathBuf::from("/var/lib/gv"));
    }
}
