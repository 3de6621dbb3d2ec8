//! Command-line arguments and credential loading.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::errors::Error;
use crate::types::WriteStreamType;

pub const DEFAULT_ENDPOINT: &str = "https://bigquerystorage.googleapis.com";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

#[derive(Debug, Clone, Parser)]
#[command(
    name = "parkinghose",
    about = "Stream synthetic customer records into a BigQuery table"
)]
pub struct Args {
    /// delay between records in ms
    #[arg(short, long, default_value_t = 500)]
    pub sleep: u64,

    /// GCP project
    #[arg(short, long)]
    pub project: String,

    /// BigQuery dataset id
    #[arg(short, long)]
    pub dataset: String,

    /// BigQuery table id
    #[arg(short, long)]
    pub table: String,

    /// Service account key file; without it GOOGLE_OAUTH_ACCESS_TOKEN is used
    #[arg(long, env = CREDENTIALS_ENV)]
    pub credentials: Option<PathBuf>,

    /// Storage Write API base URL
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Write stream type
    #[arg(long, value_enum, default_value_t = WriteMode::Committed)]
    pub mode: WriteMode,

    /// Stop after this many acknowledged rows
    #[arg(long)]
    pub count: Option<u64>,

    /// Consecutive recoverable send failures tolerated before giving up
    #[arg(long, default_value_t = 3)]
    pub max_consecutive_failures: u32,
}

impl Args {
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.project, &self.dataset, &self.table)
    }

    pub fn credentials_source(&self) -> CredentialsSource {
        match &self.credentials {
            Some(path) => CredentialsSource::File(path.clone()),
            None => CredentialsSource::Env,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WriteMode {
    /// rows are visible as soon as they are acknowledged
    Committed,
    /// rows become visible when the stream is committed on close
    Pending,
}

impl WriteMode {
    pub fn stream_type(self) -> WriteStreamType {
        match self {
            WriteMode::Committed => WriteStreamType::Committed,
            WriteMode::Pending => WriteStreamType::Pending,
        }
    }
}

/// Destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(project: &str, dataset: &str, table: &str) -> Self {
        Self {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }

    /// `projects/{p}/datasets/{d}/tables/{t}`
    pub fn parent(&self) -> String {
        format!(
            "projects/{}/datasets/{}/tables/{}",
            self.project, self.dataset, self.table
        )
    }
}

/// Contents of a service account JSON key file.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type", default)]
    pub key_type: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let key: ServiceAccountKey = serde_json::from_str(json)?;
        if let Some(kind) = key.key_type.as_deref()
            && kind != "service_account"
        {
            return Err(Error::Config(format!(
                "Unsupported credentials type '{kind}'; expected 'service_account'"
            )));
        }
        if key.client_email.is_empty() {
            return Err(Error::Config("Service account key has no client_email".into()));
        }
        Ok(key)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}

#[derive(Clone, Debug)]
pub enum Credentials {
    ServiceAccount(ServiceAccountKey),
    /// Pre-issued bearer token, never refreshed.
    AccessToken(String),
}

pub enum CredentialsSource {
    File(PathBuf),
    Env,
}

impl Credentials {
    pub fn load(source: CredentialsSource) -> Result<Self, Error> {
        match source {
            CredentialsSource::File(path) => {
                Ok(Credentials::ServiceAccount(ServiceAccountKey::from_file(path)?))
            }
            CredentialsSource::Env => Self::from_env(),
        }
    }

    fn from_env() -> Result<Self, Error> {
        if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV)
            && !token.is_empty()
        {
            return Ok(Credentials::AccessToken(token));
        }
        let path = std::env::var(CREDENTIALS_ENV).map_err(|_| {
            Error::Config(format!(
                "No credentials: pass --credentials or set {ACCESS_TOKEN_ENV} or {CREDENTIALS_ENV}"
            ))
        })?;
        Ok(Credentials::ServiceAccount(ServiceAccountKey::from_file(path)?))
    }
}
