use std::fs;

use tempfile::tempdir;
use winnetguard::policy::{AppIdentity, PolicyRegistry, SettingKey, SettingValue};

fn app(path: &str) -> AppIdentity {
    AppIdentity::new(path).unwrap()
}

#[test]
fn whitelist_and_settings_round_trip() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("policy.json");

    {
        let mut registry = PolicyRegistry::load(&store);
        registry.add_to_whitelist(&app("C:\\Apps\\A.exe"));
        registry.add_to_whitelist(&app("C:\\Apps\\B.exe"));
        registry
            .update_setting(SettingKey::UiFontSize, SettingValue::Integer(14))
            .unwrap();
    }

    let reloaded = PolicyRegistry::load(&store);
    let whitelist: Vec<String> = reloaded
        .whitelist()
        .iter()
        .map(|a| a.path().to_string())
        .collect();
    assert_eq!(whitelist, vec!["C:\\Apps\\A.exe", "C:\\Apps\\B.exe"]);
    assert!(reloaded.blacklist().is_empty());
    assert_eq!(reloaded.settings().ui_font_size(), 14);
    assert_eq!(reloaded.settings().max_connections_display(), 30);
}

#[test]
fn store_keeps_original_spelling_but_matches_any_case() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("policy.json");

    PolicyRegistry::load(&store).add_to_blacklist(&app("C:\\Program Files\\Tool\\Tool.EXE"));

    let contents = fs::read_to_string(&store).unwrap();
    assert!(contents.contains("Tool.EXE"));

    let reloaded = PolicyRegistry::load(&store);
    assert!(reloaded.is_blacklisted("c:\\program files\\tool\\tool.exe"));
}

#[test]
fn corrupt_store_falls_back_to_empty() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("policy.json");
    fs::write(&store, "{\"whitelist\": [\"unterminated").unwrap();

    let mut registry = PolicyRegistry::load(&store);
    assert!(registry.whitelist().is_empty());
    assert_eq!(registry.settings().ui_font_size(), 12);

    // The next mutation rewrites a valid store.
    registry.add_to_whitelist(&app("C:\\Apps\\A.exe"));
    let reloaded = PolicyRegistry::load(&store);
    assert!(reloaded.is_whitelisted("C:\\Apps\\A.exe"));
}

#[test]
fn out_of_range_stored_setting_uses_default() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("policy.json");
    fs::write(
        &store,
        r#"{
  "whitelist": [],
  "blacklist": [],
  "settings": {
    "max_connections_display": 5000,
    "connection_update_interval": 3.5
  }
}"#,
    )
    .unwrap();

    let registry = PolicyRegistry::load(&store);
    assert_eq!(registry.settings().max_connections_display(), 30);
    assert_eq!(
        registry.get_setting(SettingKey::ConnectionUpdateInterval),
        SettingValue::Float(3.5)
    );
}

#[test]
fn overlapping_lists_resolve_to_blocked() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("policy.json");
    fs::write(
        &store,
        r#"{
  "whitelist": ["C:\\Apps\\A.exe"],
  "blacklist": ["c:\\apps\\a.exe"]
}"#,
    )
    .unwrap();

    let registry = PolicyRegistry::load(&store);
    assert!(registry.is_blacklisted("C:\\Apps\\A.exe"));
    assert!(!registry.is_whitelisted("C:\\Apps\\A.exe"));
}

#[test]
fn legacy_settings_file_is_read_in_place() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("firewall_settings.json");
    fs::write(
        &store,
        r#"{
  "whitelist": [
    "C:\\Program Files\\Mozilla Firefox\\firefox.exe"
  ],
  "blacklist": [
    "C:\\Apps\\updater.exe"
  ],
  "settings": {
    "ui_font_size": 12,
    "process_font_size": 14,
    "connection_update_interval": 2.0,
    "max_connections_display": 30,
    "enable_notifications": false
  }
}"#,
    )
    .unwrap();

    let mut registry = PolicyRegistry::load(&store);
    assert!(registry.is_whitelisted("c:\\program files\\mozilla firefox\\firefox.exe"));
    assert!(registry.is_blacklisted("C:\\Apps\\updater.exe"));
    assert_eq!(registry.settings().process_font_size(), 14);
    assert!(!registry.settings().enable_notifications());

    // Rewriting keeps the document readable as plain JSON with the same keys.
    registry.add_to_blacklist(&app("C:\\Apps\\tool.exe"));
    let written = fs::read_to_string(&store).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(doc["blacklist"].as_array().unwrap().len(), 2);
    assert_eq!(doc["settings"]["process_font_size"], 14);
}
