use garrison_config::ConfigLoader;

#[test]
fn load_from_env_yields_validated_defaults() {
    let cfg = ConfigLoader::load_from_env().expect("env-only load must succeed");
    assert!(cfg.event_store_capacity > 0);
    assert!(cfg.backoff_cap_secs > 0);
}

#[test]
fn file_and_env_layer_in_priority_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garrison.toml");
    std::fs::write(
        &path,
        "event_store_capacity = 2048\nbackoff_cap_secs = 90\n",
    )
    .unwrap();

    unsafe {
        std::env::set_var("GARRISON_BACKOFF_CAP_SECS", "45");
    }

    let cfg = ConfigLoader::load(Some(&path)).unwrap();
    // File sets capacity; env has no override for it.
    assert_eq!(cfg.event_store_capacity, 2048);
    // Env overrides the file's value.
    assert_eq!(cfg.backoff_cap_secs, 45);

    unsafe {
        std::env::remove_var("GARRISON_BACKOFF_CAP_SECS");
    }
}
