use alertd::cli::Cli;
use alertd::config::Config;
use serial_test::serial;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn config_file(toml_content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", toml_content).unwrap();
    file
}

fn cli_for(file: &NamedTempFile) -> Cli {
    Cli {
        config: Some(file.path().to_path_buf()),
        ..Default::default()
    }
}

#[test]
#[serial]
fn test_load_full_valid_config() {
    let file = config_file(
        r#"
        log_level = "debug"
        [lock]
        root_path = "/alertLocks"
        retry_initial_backoff_ms = 250
        retry_max_backoff_ms = 8000
        wait_timeout_seconds = 60
        [dispatch]
        max_jitter_seconds = 3
        [metrics]
        enabled = true
        listen_address = "0.0.0.0:9100"
        [repository]
        seed_file = "/var/lib/alertd/alerts.json"
        [channels]
        log_enabled = false
        [channels.webhook]
        name = "ops"
        url = "https://hooks.example.com/services/T000"
    "#,
    );

    let config = Config::load(&cli_for(&file)).unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.lock.root_path, "/alertLocks");
    assert_eq!(config.lock.retry_initial_backoff_ms, 250);
    assert_eq!(config.lock.retry_max_backoff_ms, 8000);
    assert_eq!(config.lock.wait_timeout_seconds, Some(60));
    assert_eq!(config.dispatch.max_jitter_seconds, 3);
    assert!(config.metrics.enabled);
    assert_eq!(
        config.metrics.listen_address,
        "0.0.0.0:9100".parse::<SocketAddr>().unwrap()
    );
    assert_eq!(
        config.repository.seed_file,
        Some(PathBuf::from("/var/lib/alertd/alerts.json"))
    );
    assert!(!config.channels.log_enabled);
    let webhook = config.channels.webhook.unwrap();
    assert_eq!(webhook.name, "ops");
    assert_eq!(webhook.url, "https://hooks.example.com/services/T000");
    assert_eq!(webhook.timeout_seconds, 10); // Not in the toml, so it should be the default value
}

#[test]
#[serial]
fn test_load_default_values() {
    let file = config_file("");

    let config = Config::load(&cli_for(&file)).unwrap();

    assert_eq!(config, Config::default());
    assert_eq!(config.lock.root_path, "/distributedLockRoot");
    assert_eq!(config.dispatch.max_jitter_seconds, 9);
}

#[test]
#[serial]
fn test_cli_overrides_file() {
    let file = config_file(
        r#"
        log_level = "warn"
        [dispatch]
        max_jitter_seconds = 3
    "#,
    );
    let cli = Cli {
        config: Some(file.path().to_path_buf()),
        log_level: Some("trace".to_string()),
        max_jitter: Some(0),
        metrics: true,
        seed: Some(PathBuf::from("seed.json")),
    };

    let config = Config::load(&cli).unwrap();

    assert_eq!(config.log_level, "trace");
    assert_eq!(config.dispatch.max_jitter_seconds, 0);
    assert!(config.metrics.enabled);
    assert_eq!(config.repository.seed_file, Some(PathBuf::from("seed.json")));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = config_file(
        r#"
        [lock]
        root_path = "/fromFile"
    "#,
    );
    std::env::set_var("ALERTD_LOCK__ROOT_PATH", "/fromEnv");

    let config = Config::load(&cli_for(&file));
    std::env::remove_var("ALERTD_LOCK__ROOT_PATH");

    assert_eq!(config.unwrap().lock.root_path, "/fromEnv");
}

#[test]
#[serial]
fn test_invalid_value_type() {
    let file = config_file(
        r#"
        [dispatch]
        max_jitter_seconds = "nine"
    "#,
    );

    assert!(Config::load(&cli_for(&file)).is_err());
}

#[test]
#[serial]
fn test_missing_required_field() {
    let file = config_file(
        r#"
        [channels.webhook]
        # url is missing
        name = "ops"
    "#,
    );

    assert!(Config::load(&cli_for(&file)).is_err());
}
