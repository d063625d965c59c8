//! EdgeGrid (EG1-HMAC-SHA256) request signer
//!
//! Signs each request with:
//! - A signing key derived from the client secret and the request timestamp
//! - A random nonce per request
//! - A SHA-256 content hash for POST bodies (truncated to `max_body`)

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use hyper::Method;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::signer::{RequestOptions, SignError, Signer};
use crate::config::EdgeCredentials;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "EG1-HMAC-SHA256";

/// Signer for the edge platform's EdgeGrid authentication scheme
#[derive(Clone)]
pub struct EdgeGridSigner {
    client_token: String,
    client_secret: String,
    access_token: String,
    max_body: usize,
}

impl EdgeGridSigner {
    pub fn new(credentials: &EdgeCredentials) -> Self {
        Self {
            client_token: credentials.client_token.clone(),
            client_secret: credentials.client_secret.clone(),
            access_token: credentials.access_token.clone(),
            max_body: credentials.max_body,
        }
    }

    /// Build the `authorization` header for a fixed timestamp and nonce
    pub fn authorization_header(
        &self,
        options: &RequestOptions,
        timestamp: &str,
        nonce: &str,
    ) -> String {
        let auth_prefix = format!(
            "{} client_token={};access_token={};timestamp={};nonce={};",
            ALGORITHM, self.client_token, self.access_token, timestamp, nonce
        );

        let data_to_sign = [
            options.method.as_str(),
            options.protocol.as_str(),
            options.hostname.as_str(),
            options.path.as_str(),
            // No headers are canonicalized
            "",
            self.content_hash(options).as_str(),
            auth_prefix.as_str(),
        ]
        .join("\t");

        let signing_key = Self::hmac_base64(self.client_secret.as_bytes(), timestamp.as_bytes());
        let signature = Self::hmac_base64(signing_key.as_bytes(), data_to_sign.as_bytes());

        format!("{}signature={}", auth_prefix, signature)
    }

    fn content_hash(&self, options: &RequestOptions) -> String {
        match &options.body {
            Some(body) if options.method == Method::POST && !body.is_empty() => {
                let end = body.len().min(self.max_body);
                BASE64.encode(Sha256::digest(&body[..end]))
            }
            _ => String::new(),
        }
    }

    fn hmac_base64(key: &[u8], msg: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(msg);
        BASE64.encode(mac.finalize().into_bytes())
    }

    fn validate(&self) -> Result<(), SignError> {
        if self.client_token.is_empty() {
            return Err(SignError::MissingCredential("client_token"));
        }
        if self.client_secret.is_empty() {
            return Err(SignError::MissingCredential("client_secret"));
        }
        if self.access_token.is_empty() {
            return Err(SignError::MissingCredential("access_token"));
        }
        Ok(())
    }
}

impl Signer for EdgeGridSigner {
    fn sign(&self, mut options: RequestOptions) -> Result<RequestOptions, SignError> {
        self.validate()?;

        let timestamp = Utc::now().format("%Y%m%dT%H:%M:%S+0000").to_string();
        let authorization = self.authorization_header(&options, &timestamp, &new_nonce());
        options.set_header("authorization", authorization);

        Ok(options)
    }
}

impl std::fmt::Debug for EdgeGridSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeGridSigner")
            .field("client_token", &self.client_token)
            .field("max_body", &self.max_body)
            .finish_non_exhaustive()
    }
}

/// Random version-4 UUID text
fn new_nonce() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> EdgeGridSigner {
        EdgeGridSigner::new(&EdgeCredentials {
            host: "akab-host.luna.akamaiapis.net".to_string(),
            client_token: "akab-client-token".to_string(),
            client_secret: "client-secret".to_string(),
            access_token: "akab-access-token".to_string(),
            max_body: 8,
        })
    }

    const TIMESTAMP: &str = "20260101T00:00:00+0000";
    const NONCE: &str = "nonce-1";

    #[test]
    fn test_header_layout() {
        let options = RequestOptions::new(Method::GET, "akab-host.luna.akamaiapis.net", "/papi/v1/groups");
        let header = signer().authorization_header(&options, TIMESTAMP, NONCE);

        assert!(header.starts_with(
            "EG1-HMAC-SHA256 client_token=akab-client-token;access_token=akab-access-token;\
             timestamp=20260101T00:00:00+0000;nonce=nonce-1;signature="
        ));
        let signature = header.rsplit("signature=").next().unwrap();
        // base64 of a 32-byte MAC
        assert_eq!(signature.len(), 44);
    }

    #[test]
    fn test_signature_is_deterministic() {
        let signer = signer();
        let options = RequestOptions::new(Method::GET, "host", "/a");
        assert_eq!(
            signer.authorization_header(&options, TIMESTAMP, NONCE),
            signer.authorization_header(&options, TIMESTAMP, NONCE)
        );

        let other_path = RequestOptions::new(Method::GET, "host", "/b");
        assert_ne!(
            signer.authorization_header(&options, TIMESTAMP, NONCE),
            signer.authorization_header(&other_path, TIMESTAMP, NONCE)
        );
    }

    #[test]
    fn test_content_hash_only_for_post() {
        let signer = signer();

        let get = RequestOptions::new(Method::GET, "host", "/").with_body("{\"a\":1}");
        assert_eq!(signer.content_hash(&get), "");

        let post = RequestOptions::new(Method::POST, "host", "/").with_body("{\"a\":1}");
        assert_eq!(
            signer.content_hash(&post),
            BASE64.encode(Sha256::digest(b"{\"a\":1}"))
        );

        let empty = RequestOptions::new(Method::POST, "host", "/").with_body("");
        assert_eq!(signer.content_hash(&empty), "");
    }

    #[test]
    fn test_content_hash_truncates_to_max_body() {
        let signer = signer();
        let long = RequestOptions::new(Method::POST, "host", "/").with_body("0123456789abcdef");
        let prefix = RequestOptions::new(Method::POST, "host", "/").with_body("01234567");
        assert_eq!(signer.content_hash(&long), signer.content_hash(&prefix));
    }

    #[test]
    fn test_sign_adds_authorization() {
        let signed = signer()
            .sign(RequestOptions::new(Method::GET, "host", "/"))
            .unwrap();
        assert!(signed.header("authorization").unwrap().starts_with(ALGORITHM));
    }

    #[test]
    fn test_missing_credentials() {
        let signer = EdgeGridSigner::new(&EdgeCredentials {
            host: "host".to_string(),
            client_token: "token".to_string(),
            client_secret: String::new(),
            access_token: "access".to_string(),
            max_body: 1024,
        });
        let err = signer
            .sign(RequestOptions::new(Method::GET, "host", "/"))
            .unwrap_err();
        assert_eq!(err, SignError::MissingCredential("client_secret"));
    }

    #[test]
    fn test_nonce_format() {
        let nonce = new_nonce();
        assert_eq!(nonce.len(), 36);
        assert_eq!(Uuid::parse_str(&nonce).unwrap().get_version_num(), 4);
        assert_ne!(nonce, new_nonce());
    }
}
