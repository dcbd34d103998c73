use std::sync::Arc;

use tempfile::tempdir;
use winnetguard::cli::Command;
use winnetguard::cli_handler::handle_command;
use winnetguard::config::Config;
use winnetguard::context::AppContext;
use winnetguard::policy::{AppIdentity, PolicyRegistry};
use winnetguard::telemetry::AuditLogger;

fn context(store: &std::path::Path) -> AppContext {
    let mut config = Config::default();
    config.policy.store_path = Some(store.to_path_buf());
    AppContext::new(config, Arc::new(AuditLogger::new_memory()))
}

#[tokio::test]
async fn one_shot_writes_wait_for_the_running_daemon() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("policy.json");
    let ctx = context(&store);

    // What `run` holds for its lifetime.
    let mut daemon_lock = ctx.store_lock().unwrap();
    let held = daemon_lock.try_acquire().unwrap();
    let mut daemon_registry = ctx.load_registry();

    let err = handle_command(
        &ctx,
        Command::Allow {
            path: "C:\\Apps\\x.exe".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("daemon is running"));

    let set_font = || Command::Set {
        key: "ui_font_size".to_string(),
        value: "14".to_string(),
    };
    assert!(handle_command(&ctx, set_font()).await.is_err());
    assert!(handle_command(&ctx, Command::Reset { yes: true }).await.is_err());

    // The daemon's own writes are the only ones that land.
    daemon_registry.add_to_blacklist(&AppIdentity::new("C:\\Apps\\y.exe").unwrap());
    drop(held);

    handle_command(&ctx, set_font()).await.unwrap();
    let reloaded = PolicyRegistry::load(&store);
    assert!(reloaded.is_blacklisted("C:\\Apps\\y.exe"));
    assert!(!reloaded.is_known("C:\\Apps\\x.exe"));
    assert_eq!(reloaded.settings().ui_font_size(), 14);
}

#[tokio::test]
async fn second_daemon_refuses_to_start() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir.path().join("policy.json"));

    let mut first = ctx.store_lock().unwrap();
    let _held = first.try_acquire().unwrap();

    let err = handle_command(&ctx, Command::Run { no_console: true })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("in use by another winnetguard process"));
}
