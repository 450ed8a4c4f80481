// tests/ingest_config.rs
use deal_ingest::config::ingest::{
    load_config_default, load_config_from, ENV_CONFIG_PATH, ENV_FLIGHT_API_KEY,
    ENV_HOTEL_CLIENT_ID, ENV_HOTEL_CLIENT_SECRET,
};
use std::path::PathBuf;
use std::{env, fs};

#[serial_test::serial]
#[test]
fn explicit_file_is_parsed_and_literal_values_kept() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("ingest.toml");
    fs::write(
        &p,
        r#"
database_path = "deals-test.sqlite"

[rate_limit]
cooldown_secs = 900

[flight]
api_key = "literal-key"
market = "GB"

[hotel]
enabled = false
"#,
    )
    .unwrap();

    let cfg = load_config_from(&p).unwrap();
    assert_eq!(cfg.database_path, PathBuf::from("deals-test.sqlite"));
    assert_eq!(cfg.rate_limit.cooldown_secs, 900);
    assert_eq!(cfg.rate_limit.state_ttl_secs, 3600);
    assert_eq!(cfg.flight.api_key, "literal-key");
    assert_eq!(cfg.flight.market, "GB");
    assert!(!cfg.hotel.enabled);
}

#[test]
fn broken_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("bad.toml");
    fs::write(&p, "[rate_limit\ncooldown_secs = ").unwrap();
    assert!(load_config_from(&p).is_err());
    assert!(load_config_from(&dir.path().join("missing.toml")).is_err());
}

#[serial_test::serial]
#[test]
fn env_placeholders_resolve_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("ingest.toml");
    fs::write(
        &p,
        r#"
[flight]
api_key = "ENV"
[hotel]
client_id = "ENV"
client_secret = "ENV"
"#,
    )
    .unwrap();

    env::set_var(ENV_FLIGHT_API_KEY, "k-123");
    env::set_var(ENV_HOTEL_CLIENT_ID, "cid-9");
    env::remove_var(ENV_HOTEL_CLIENT_SECRET);

    let cfg = load_config_from(&p).unwrap();
    assert_eq!(cfg.flight.api_key, "k-123");
    assert_eq!(cfg.hotel.client_id, "cid-9");
    // Missing secret resolves empty; the hotel fetch fails on its own later.
    assert_eq!(cfg.hotel.client_secret, "");

    env::remove_var(ENV_FLIGHT_API_KEY);
    env::remove_var(ENV_HOTEL_CLIENT_ID);
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // Isolate CWD so the repo's own config/ is not picked up.
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_CONFIG_PATH);

    // 1) Nothing on disk -> built-in defaults
    let cfg = load_config_default().unwrap();
    assert_eq!(cfg.rate_limit.cooldown_secs, 1800);
    assert_eq!(cfg.scheduler.interval_secs, 0);

    // 2) ./config/ingest.toml fallback
    let cfg_dir = tmp.path().join("config");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("ingest.toml"), "[rate_limit]\ncooldown_secs = 60\n").unwrap();
    let cfg = load_config_default().unwrap();
    assert_eq!(cfg.rate_limit.cooldown_secs, 60);

    // 3) Env var wins over the fallback
    let p_env = tmp.path().join("other.toml");
    fs::write(&p_env, "[rate_limit]\ncooldown_secs = 5\n").unwrap();
    env::set_var(ENV_CONFIG_PATH, p_env.display().to_string());
    let cfg = load_config_default().unwrap();
    assert_eq!(cfg.rate_limit.cooldown_secs, 5);

    // 4) Env var pointing nowhere is an error, not a silent fallback
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("nope.toml").display().to_string());
    assert!(load_config_default().is_err());

    env::remove_var(ENV_CONFIG_PATH);
    env::set_current_dir(&old).unwrap();
}
