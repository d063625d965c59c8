use std::env;
use std::fs;
use tempfile::TempDir;

const EDGERC: &str = r#"
[default]
host = https://akab-default.luna.akamaiapis.net/
client_token = akab-client-token
client_secret = client-secret
access_token = akab-access-token

[ccu]
host = akab-ccu.luna.akamaiapis.net
client_token = akab-ccu-client
client_secret = ccu-secret
access_token = akab-ccu-access
max-body = 4096
"#;

/// Test loading configuration from YAML file
#[test]
fn test_load_yaml_config() {
    let yaml = r#"
edgerc_path: /opt/edgepool/.edgerc
section: ccu
timeout_ms: 10000
account_switch_key: 1-TENANT

circuit_breaker:
  failure_threshold: 4
  cool_down_ms: 15000
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = edgepool::config::load_from_yaml(&config_path).unwrap();

    assert_eq!(config.edgerc_path, "/opt/edgepool/.edgerc");
    assert_eq!(config.section, "ccu");
    assert_eq!(config.timeout_ms, 10_000);
    assert_eq!(config.account_switch_key.as_deref(), Some("1-TENANT"));
    assert_eq!(config.circuit_breaker.failure_threshold, 4);
    assert_eq!(config.circuit_breaker.cool_down_ms, 15_000);

    // Untouched sections keep their defaults
    assert_eq!(config.retry_attempts, 3);
    assert_eq!(config.health.min_reuse_rate, 70.0);
}

/// Section override from the command line wins over the file
#[test]
fn test_load_config_section_override() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, "section: default\n").unwrap();

    let config = edgepool::config::load_config(config_path.to_str(), Some("ccu")).unwrap();
    assert_eq!(config.section, "ccu");
}

#[test]
fn test_invalid_yaml_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, "timeout_ms: [not, a, number]\n").unwrap();

    assert!(edgepool::config::load_from_yaml(&config_path).is_err());
    assert!(edgepool::config::load_from_yaml(temp_dir.path().join("missing.yaml")).is_err());
}

/// Test loading configuration from environment variables
#[test]
fn test_load_env_config() {
    env::set_var("EDGERC", "/tmp/test.edgerc");
    env::set_var("EDGERC_SECTION", "ccu");
    env::set_var("EDGEPOOL_TIMEOUT_MS", "2500");
    env::set_var("EDGEPOOL_RETRY_ATTEMPTS", "0");
    env::set_var("AKAMAI_ACCOUNT_SWITCH_KEY", "1-ENV");
    env::set_var("EDGEPOOL_WRAP_SIGNER", "false");

    let config = edgepool::config::load_from_env().unwrap();

    assert_eq!(config.edgerc_path, "/tmp/test.edgerc");
    assert_eq!(config.section, "ccu");
    assert_eq!(config.timeout_ms, 2500);
    assert_eq!(config.retry_attempts, 0);
    assert_eq!(config.account_switch_key.as_deref(), Some("1-ENV"));
    assert!(!config.wrap_signer);

    env::set_var("EDGEPOOL_TIMEOUT_MS", "soon");
    assert!(edgepool::config::load_from_env().is_err());

    for key in [
        "EDGERC",
        "EDGERC_SECTION",
        "EDGEPOOL_TIMEOUT_MS",
        "EDGEPOOL_RETRY_ATTEMPTS",
        "AKAMAI_ACCOUNT_SWITCH_KEY",
        "EDGEPOOL_WRAP_SIGNER",
    ] {
        env::remove_var(key);
    }
}

/// Test reading credentials from an edgerc file
#[test]
fn test_edgerc_sections() {
    let temp_dir = TempDir::new().unwrap();
    let edgerc_path = temp_dir.path().join(".edgerc");
    fs::write(&edgerc_path, EDGERC).unwrap();

    let default = edgepool::config::EdgeCredentials::load(&edgerc_path, "default").unwrap();
    assert_eq!(default.host, "akab-default.luna.akamaiapis.net");
    assert_eq!(default.max_body, 131_072);

    let ccu = edgepool::config::EdgeCredentials::load(&edgerc_path, "ccu").unwrap();
    assert_eq!(ccu.client_token, "akab-ccu-client");
    assert_eq!(ccu.max_body, 4096);

    assert!(edgepool::config::EdgeCredentials::load(&edgerc_path, "missing").is_err());
}

/// Core wiring from config to orchestrator
#[tokio::test]
async fn test_core_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let edgerc_path = temp_dir.path().join(".edgerc");
    fs::write(&edgerc_path, EDGERC).unwrap();

    let mut config = edgepool::Config::new();
    config.edgerc_path = edgerc_path.to_string_lossy().to_string();
    config.section = "ccu".to_string();
    config.wrap_signer = false;

    let core = edgepool::Core::new(config).unwrap();
    let orchestrator = core.orchestrator();
    assert_eq!(orchestrator.config().hostname, "akab-ccu.luna.akamaiapis.net");
    assert!(orchestrator.pooled_signer().is_none());
    assert_eq!(orchestrator.get_metrics().total_requests, 0);

    core.shutdown();
}
