//! Configuration file loading and environment override tests

use api_gateway::{Config, ConfigError, Gateway, GatewayError};
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

const CONFIG_YAML: &str = r#"
server:
  host: 127.0.0.1
  port: 8088
  shutdown_timeout_secs: 2
jwt_secret: "file-secret-file-secret-file-secret"
upstream:
  request_timeout_secs: 3
cors:
  allowed_origins:
    - https://app.example.com
services:
  - name: user-service
    path_prefix: /api/users
    target_url: http://user-service:8080
    strip_prefix: /api
    auth_required: true
  - name: media
    path_prefix: /api/media/
    target_url: http://media:8080
    env_var: MEDIA_BACKEND
"#;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

fn clear_env() {
    for var in ["JWT_SECRET", "USER_SERVICE_SERVICE_URL", "MEDIA_BACKEND", "MEDIA_SERVICE_URL"] {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_load_from_file() {
    clear_env();
    let file = write_config(CONFIG_YAML);

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8088);
    assert_eq!(config.server.shutdown_timeout_secs, 2);
    assert_eq!(config.jwt_secret, "file-secret-file-secret-file-secret");
    assert_eq!(config.upstream.request_timeout_secs, 3);
    assert_eq!(config.upstream.connect_timeout_secs, 10);
    assert_eq!(config.cors.allowed_origins, vec!["https://app.example.com"]);
    assert_eq!(config.services.len(), 2);
    assert_eq!(config.services[1].target_url, "http://media:8080");

    let gateway = Gateway::build(&config).unwrap();
    let prefixes: Vec<&str> = gateway.routes().map(|r| r.path_prefix()).collect();
    assert_eq!(prefixes, ["/api/users", "/api/media"]);
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_env();
    let file = write_config(CONFIG_YAML);
    env::set_var("JWT_SECRET", "env-secret-env-secret-env-secret-env");
    env::set_var("USER_SERVICE_SERVICE_URL", "http://10.0.0.7:9000");
    env::set_var("MEDIA_BACKEND", "http://10.0.0.8:9000");
    // Ignored: the media service names its own variable
    env::set_var("MEDIA_SERVICE_URL", "http://wrong:1");

    let config = Config::load(file.path());
    clear_env();
    let config = config.unwrap();

    assert_eq!(config.jwt_secret, "env-secret-env-secret-env-secret-env");
    assert_eq!(config.services[0].target_url, "http://10.0.0.7:9000");
    assert_eq!(config.services[1].target_url, "http://10.0.0.8:9000");
}

#[test]
#[serial]
fn test_secret_from_env_only() {
    clear_env();
    let file = write_config(
        r#"
services:
  - name: users
    path_prefix: /users
    target_url: http://users:8080
"#,
    );

    assert!(matches!(
        Config::load(file.path()),
        Err(ConfigError::EmptySecret)
    ));

    env::set_var("JWT_SECRET", "secret-from-the-environment-only!");
    let config = Config::load(file.path());
    clear_env();
    assert_eq!(config.unwrap().jwt_secret, "secret-from-the-environment-only!");
}

#[test]
#[serial]
fn test_missing_file_is_an_error() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let result = Config::load(&dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(ConfigError::Load(_))));
}

#[test]
fn test_duplicate_prefix_fails_gateway_build() {
    let mut config = Config::from_yaml(CONFIG_YAML).unwrap();
    config.services[1].path_prefix = "/api/users/".to_string();

    assert!(matches!(
        Gateway::build(&config),
        Err(GatewayError::Config(ConfigError::DuplicatePathPrefix { .. }))
    ));
}

#[test]
fn test_malformed_target_url_fails_gateway_build() {
    let mut config = Config::from_yaml(CONFIG_YAML).unwrap();
    config.services[0].target_url = "http://".to_string();

    match Gateway::build(&config) {
        Err(GatewayError::InvalidTargetUrl { service, .. }) => assert_eq!(service, "user-service"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("gateway built with malformed target"),
    }
}
