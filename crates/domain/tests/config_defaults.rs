use tb_domain::config::Config;

#[test]
fn default_has_no_servers_and_local_tools_enabled() {
    let config = Config::default();
    assert!(config.mcp.servers.is_empty());
    assert!(config.mcp.local_tools);
    assert!(config.mcp.relay_url.is_none());
}

#[test]
fn default_timeouts_are_ten_seconds() {
    let config = Config::default();
    assert_eq!(config.mcp.initialize_timeout_secs, 10);
    assert_eq!(config.mcp.request_timeout_secs, 10);
}

#[test]
fn parses_server_list_from_toml() {
    let toml_str = r#"
[mcp]
relay_url = "https://relay.example.com/"

[[mcp.servers]]
url = "https://tools.example.com/sse"

[[mcp.servers]]
url = "https://other.example.com/sse"
use_relay = true
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.mcp.servers.len(), 2);
    assert_eq!(config.mcp.servers[0].url, "https://tools.example.com/sse");
    assert!(!config.mcp.servers[0].use_relay);
    assert!(config.mcp.servers[1].use_relay);
    assert_eq!(
        config.mcp.relay_url.as_deref(),
        Some("https://relay.example.com/")
    );
}

#[test]
fn use_relay_defaults_to_false() {
    let toml_str = r#"
[[mcp.servers]]
url = "http://localhost:8080/sse"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(!config.mcp.servers[0].use_relay);
}

#[test]
fn empty_mcp_section_parses() {
    let config: Config = toml::from_str("[mcp]\n").unwrap();
    assert!(config.mcp.servers.is_empty());
}

#[test]
fn timeouts_are_overridable() {
    let toml_str = r#"
[mcp]
initialize_timeout_secs = 30
request_timeout_secs = 5
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.mcp.initialize_timeout_secs, 30);
    assert_eq!(config.mcp.request_timeout_secs, 5);
}
