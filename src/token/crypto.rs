//! RS256 JWT assertions for the OAuth2 jwt-bearer grant.

use std::time::{SystemTime, UNIX_EPOCH};

use pkcs8::DecodePrivateKey as _;
use rsa::pkcs1::{DecodeRsaPrivateKey as _, EncodeRsaPrivateKey as _};
use serde::Serialize;

use crate::config::ServiceAccountKey;
use crate::errors::Error;

pub const WRITE_SCOPES: &str =
    "https://www.googleapis.com/auth/bigquery.insertdata https://www.googleapis.com/auth/bigquery";

/// Google caps assertion lifetime at one hour.
pub const ASSERTION_LIFETIME_SECS: u64 = 3600;

#[derive(Debug, Serialize, serde::Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub scope: String,
    pub iat: u64,
    pub exp: u64,
}

fn load_rsa_private_key_from_pem(pem_str: &str) -> Result<rsa::RsaPrivateKey, Error> {
    let blocks = pem::parse_many(pem_str.as_bytes())
        .map_err(|e| Error::Key(format!("PEM parse failed: {e}")))?;
    for block in &blocks {
        match block.tag() {
            "PRIVATE KEY" => {
                return rsa::RsaPrivateKey::from_pkcs8_der(block.contents())
                    .map_err(|e| Error::Key(format!("PKCS#8 parse failed: {e}")));
            }
            "RSA PRIVATE KEY" => {
                return rsa::RsaPrivateKey::from_pkcs1_der(block.contents())
                    .map_err(|e| Error::Key(format!("PKCS#1 parse failed: {e}")));
            }
            "ENCRYPTED PRIVATE KEY" => {
                return Err(Error::Key(
                    "Encrypted private keys are not supported in service account files".into(),
                ));
            }
            _ => continue,
        }
    }
    Err(Error::Key("No RSA private key block found".into()))
}

/// Signs a jwt-bearer assertion for `key` issued at `now`.
pub fn build_assertion(key: &ServiceAccountKey, now: SystemTime) -> Result<String, Error> {
    let rsa_key = load_rsa_private_key_from_pem(&key.private_key)?;
    let iat = now
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Config(format!("Time error: {e}")))?
        .as_secs();
    let claims = Claims {
        iss: key.client_email.clone(),
        sub: key.client_email.clone(),
        aud: key.token_uri.clone(),
        scope: WRITE_SCOPES.to_string(),
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };

    let pkcs1 = rsa_key
        .to_pkcs1_der()
        .map_err(|e| Error::Key(format!("PKCS#1 DER encode failed: {e}")))?;
    let enc_key = jsonwebtoken::EncodingKey::from_rsa_der(pkcs1.as_bytes());
    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = key.private_key_id.clone();
    jsonwebtoken::encode(&header, &claims, &enc_key)
        .map_err(|e| Error::JwtSign(format!("JWT signing failed: {e}")))
}
