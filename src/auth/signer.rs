//! Request description and the signing capability
//!
//! A [`Signer`] turns unsigned [`RequestOptions`] into signed ones by adding an
//! `authorization` header. The rest of the crate treats it as a black box.

use bytes::Bytes;
use hyper::Method;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::pool::{ConnectionAgent, Scheme};

/// Signing failures, passed to callers unchanged
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("{0}")]
    Failed(String),
}

/// Everything needed to issue one request
///
/// Header names are stored lowercase.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub hostname: String,
    pub path: String,
    pub method: Method,
    pub protocol: Scheme,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    /// Pooled agent to send through, attached by the enhancement step
    pub agent: Option<Arc<ConnectionAgent>>,
}

impl RequestOptions {
    pub fn new(method: Method, hostname: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            path: path.into(),
            method,
            protocol: Scheme::Https,
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
            agent: None,
        }
    }

    pub fn with_protocol(mut self, protocol: Scheme) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Produces signed request options
pub trait Signer: Send + Sync {
    fn sign(&self, options: RequestOptions) -> Result<RequestOptions, SignError>;
}

impl<F> Signer for F
where
    F: Fn(RequestOptions) -> Result<RequestOptions, SignError> + Send + Sync,
{
    fn sign(&self, options: RequestOptions) -> Result<RequestOptions, SignError> {
        self(options)
    }
}
