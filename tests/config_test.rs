//! Tests for configuration loading

use std::io::Write;

use keymesh::config::Config;

#[test]
fn test_default_round_trips_through_toml() {
    let config = Config::default();
    let serialized = toml::to_string(&config).unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(serialized.as_bytes()).unwrap();

    let loaded = Config::from_file(file.path()).unwrap();
    assert!(loaded.validate().is_ok());
    assert_eq!(loaded.selector.bucket_size, config.selector.bucket_size);
    assert_eq!(loaded.server.bind_addr, config.server.bind_addr);
}

#[test]
fn test_from_file_with_seeds() {
    let content = r#"
[spider]
seeds = ["keys-a.example.net", "keys-b.example.net"]
probe_port = 11371
request_timeout_secs = 10
rate_limit = 2
max_retries = 1
interval_secs = 600
country_zone = "zz.countries.nerd.dk"

[selector]
bucket_size = 1000
keys_sanity_min = 1000
keys_daily_jitter = 100

[server]
bind_addr = "127.0.0.1:9090"

[logging]
level = "debug"
format = "text"
"#;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.spider.seeds.len(), 2);
    assert_eq!(config.selector.keys_daily_jitter, 100);
    assert_eq!(config.server.bind_addr, "127.0.0.1:9090");
}

#[test]
fn test_missing_file_is_an_error() {
    let result = Config::from_file(std::path::Path::new("/nonexistent/keymesh.toml"));
    assert!(result.is_err());
}

#[test]
fn test_malformed_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"[spider\nseeds = ").unwrap();
    assert!(Config::from_file(file.path()).is_err());
}
