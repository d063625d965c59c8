//! `.edgerc` credential file parsing
//!
//! The file is INI-style:
//!
//! ```text
//! [default]
//! host = akab-xxxx.luna.akamaiapis.net
//! client_token = akab-...
//! client_secret = ...
//! access_token = akab-...
//! max-body = 131072
//! ```

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default number of body bytes covered by the content hash
pub const DEFAULT_MAX_BODY: usize = 131_072;

/// API client credentials from one `.edgerc` section
#[derive(Clone, PartialEq, Eq)]
pub struct EdgeCredentials {
    /// API hostname without scheme or trailing slash
    pub host: String,
    pub client_token: String,
    pub client_secret: String,
    pub access_token: String,
    pub max_body: usize,
}

impl EdgeCredentials {
    /// Read `section` from the file at `path` (`~` is expanded)
    pub fn load<P: AsRef<Path>>(path: P, section: &str) -> Result<Self> {
        let path = expand_home(path.as_ref());
        let content = std::fs::read_to_string(&path)
            .context(format!("Failed to read edgerc file: {:?}", path))?;

        Self::parse(&content, section).context(format!("Invalid edgerc file: {:?}", path))
    }

    /// Parse `section` out of edgerc text
    pub fn parse(content: &str, section: &str) -> Result<Self> {
        let sections = parse_sections(content);
        let values = sections
            .get(section)
            .ok_or_else(|| anyhow::anyhow!("Section '{}' not found", section))?;

        let required = |key: &str| -> Result<String> {
            values
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Missing '{}' in section '{}'", key, section))
        };

        let max_body = match values.get("max-body").or_else(|| values.get("max_body")) {
            Some(raw) => raw
                .parse()
                .context(format!("Invalid max-body value: {}", raw))?,
            None => DEFAULT_MAX_BODY,
        };

        Ok(Self {
            host: normalize_host(&required("host")?),
            client_token: required("client_token")?,
            client_secret: required("client_secret")?,
            access_token: required("access_token")?,
            max_body,
        })
    }
}

impl std::fmt::Debug for EdgeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeCredentials")
            .field("host", &self.host)
            .field("client_token", &self.client_token)
            .field("max_body", &self.max_body)
            .finish_non_exhaustive()
    }
}

fn parse_sections(content: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let (Some(section), Some((key, value))) = (&current, line.split_once('=')) else {
            continue;
        };

        let value = value.trim().trim_matches('"').trim_matches('\'');
        if let Some(values) = sections.get_mut(section) {
            values.insert(key.trim().to_string(), value.to_string());
        }
    }

    sections
}

fn normalize_host(host: &str) -> String {
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    host.trim_end_matches('/').to_string()
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EDGERC: &str = r#"
# API credentials
[default]
host = https://akab-default.luna.akamaiapis.net/
client_token = akab-client
client_secret = secret==
access_token = akab-access

[papi]
host = akab-papi.luna.akamaiapis.net
client_token = "akab-papi-client"
client_secret = papi-secret
access_token = akab-papi-access
max-body = 2048
; trailing comment
"#;

    #[test]
    fn test_parse_default_section() {
        let creds = EdgeCredentials::parse(EDGERC, "default").unwrap();
        assert_eq!(creds.host, "akab-default.luna.akamaiapis.net");
        assert_eq!(creds.client_token, "akab-client");
        // '=' inside the value is kept
        assert_eq!(creds.client_secret, "secret==");
        assert_eq!(creds.access_token, "akab-access");
        assert_eq!(creds.max_body, DEFAULT_MAX_BODY);
    }

    #[test]
    fn test_parse_named_section() {
        let creds = EdgeCredentials::parse(EDGERC, "papi").unwrap();
        assert_eq!(creds.host, "akab-papi.luna.akamaiapis.net");
        assert_eq!(creds.client_token, "akab-papi-client");
        assert_eq!(creds.max_body, 2048);
    }

    #[test]
    fn test_missing_section_and_key() {
        let err = EdgeCredentials::parse(EDGERC, "ccu").unwrap_err();
        assert!(err.to_string().contains("Section 'ccu' not found"));

        let err = EdgeCredentials::parse("[default]\nhost = h\n", "default").unwrap_err();
        assert!(err.to_string().contains("client_token"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EDGERC.as_bytes()).unwrap();

        let creds = EdgeCredentials::load(file.path(), "papi").unwrap();
        assert_eq!(creds.access_token, "akab-papi-access");

        assert!(EdgeCredentials::load("/nonexistent/.edgerc", "default").is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home(Path::new("/etc/edgerc")), PathBuf::from("/etc/edgerc"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/.edgerc")), home.join(".edgerc"));
            assert_eq!(expand_home(Path::new("~")), home);
        }
    }

    #[test]
    fn test_debug_hides_secret() {
        let creds = EdgeCredentials::parse(EDGERC, "default").unwrap();
        assert!(!format!("{:?}", creds).contains("secret=="));
    }
}
