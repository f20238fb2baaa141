use tb_domain::config::Config;

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 3300);
}

#[test]
fn empty_file_yields_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.transport.timeout_ms, 5_000);
    assert_eq!(config.dispatch.tick_interval_secs, 30);
    assert_eq!(config.dispatch.max_concurrent, 1);
    assert_eq!(config.observability.service_name, "textblast");
    assert!(config.observability.otlp_endpoint.is_none());
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://localhost:*".to_string()));
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn full_file_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8080
api_token_env = "MY_TOKEN"

[server.rate_limit]
requests_per_second = 20
burst_size = 40

[workspace]
state_path = "/var/lib/textblast"

[transport]
base_url = "http://localhost:9000/send"
token_env = "GATEWAY_JWT"
timeout_ms = 2500

[dispatch]
tick_interval_secs = 5
max_concurrent = 8

[observability]
otlp_endpoint = "http://localhost:4317"
sample_rate = 0.25
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.api_token_env, "MY_TOKEN");
    assert_eq!(config.server.rate_limit.as_ref().unwrap().burst_size, 40);
    assert_eq!(
        config.workspace.state_path,
        std::path::PathBuf::from("/var/lib/textblast")
    );
    assert_eq!(config.transport.token_env, "GATEWAY_JWT");
    assert_eq!(config.transport.timeout_ms, 2_500);
    assert_eq!(config.dispatch.max_concurrent, 8);
    assert_eq!(config.observability.sample_rate, 0.25);
    assert!(config.validate().is_empty());
}
