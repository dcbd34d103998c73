//! One-shot command handling for winnetguard.
//!
//! Every command except `run` applies a single operation and exits. Decisions
//! go through the same [`PolicyEngine`] the daemon uses, so the safety gate,
//! rollback and audit trail behave identically.
//!
//! Commands that write the policy store hold its lock while they run. The
//! daemon holds it until it exits, so one-shot decisions are refused while it
//! is running and must be given through its console instead.

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;

use crate::cli::Command;
use crate::context::AppContext;
use crate::orchestrator;
use crate::policy::{
    PolicyEngine, RegistryError, SettingKey, SettingValue, StoreGuard, StoreLock,
};

/// Dispatch a parsed subcommand.
pub async fn handle_command(ctx: &AppContext, command: Command) -> Result<()> {
    debug!("Handling command {:?}", command);

    let mut store_lock = if command.writes_store() {
        Some(ctx.store_lock()?)
    } else {
        None
    };
    let _held = store_lock.as_mut().map(hold_store).transpose()?;

    match command {
        Command::Run { no_console } => orchestrator::run_daemon(ctx, !no_console).await,
        Command::Allow { path } => {
            let state = engine(ctx)?
                .allow(&path)
                .await
                .with_context(|| format!("Failed to allow {path}"))?;
            println!("{path}: {state:?}");
            Ok(())
        }
        Command::Block { path } => {
            let state = engine(ctx)?
                .block(&path)
                .await
                .with_context(|| format!("Failed to block {path}"))?;
            println!("{path}: {state:?}");
            Ok(())
        }
        Command::Forget { path } => {
            let state = engine(ctx)?
                .forget(&path)
                .await
                .with_context(|| format!("Failed to forget {path}"))?;
            println!("{path}: {state:?}");
            Ok(())
        }
        Command::Rules => list_rules(ctx).await,
        Command::Status => show_status(ctx).await,
        Command::Set { key, value } => set_setting(ctx, &key, &value),
        Command::Reset { yes } => reset(ctx, yes).await,
    }
}

fn hold_store(lock: &mut StoreLock) -> Result<StoreGuard<'_>> {
    match lock.try_acquire() {
        Ok(guard) => Ok(guard),
        Err(e @ RegistryError::Locked { .. }) => Err(anyhow!(
            "{e}; a winnetguard daemon is running, use its console to change the policy"
        )),
        Err(e) => Err(e.into()),
    }
}

fn engine(ctx: &AppContext) -> Result<PolicyEngine> {
    ctx.engine().context("Failed to start rule store worker")
}

async fn list_rules(ctx: &AppContext) -> Result<()> {
    let rules = ctx
        .rule_store()
        .context("Failed to start rule store worker")?
        .list_rules()
        .await
        .context("Failed to list firewall rules")?;

    if rules.is_empty() {
        println!("No rules.");
    }
    for rule in rules {
        let state = if rule.enabled { "enabled" } else { "disabled" };
        println!("{}\t{}\t{}\t{}", rule.name, rule.direction, state, rule.app_path);
    }
    Ok(())
}

async fn show_status(ctx: &AppContext) -> Result<()> {
    let registry = ctx.load_registry();
    match registry.store_path() {
        Some(path) => println!("Policy store: {}", path.display()),
        None => println!("Policy store: in memory (dry run)"),
    }
    println!("Whitelisted:  {}", registry.whitelist().len());
    println!("Blacklisted:  {}", registry.blacklist().len());

    let rules = ctx
        .rule_store()
        .context("Failed to start rule store worker")?
        .list_rules()
        .await;
    match rules {
        Ok(rules) => println!("Rules:        {}", rules.len()),
        Err(e) => println!("Rules:        unavailable ({e})"),
    }

    println!("\nSettings:");
    for key in SettingKey::ALL {
        println!("  {:<28} {}", key.as_str(), registry.get_setting(key));
    }
    Ok(())
}

fn set_setting(ctx: &AppContext, key: &str, value: &str) -> Result<()> {
    let key: SettingKey = key.parse()?;
    let Some(value) = SettingValue::parse(value) else {
        bail!("Cannot parse '{value}' as a number or boolean");
    };

    let mut registry = ctx.load_registry();
    registry.update_setting(key, value)?;
    println!("{} = {}", key, registry.get_setting(key));
    Ok(())
}

async fn reset(ctx: &AppContext, yes: bool) -> Result<()> {
    if !yes && !confirm_reset()? {
        println!("Aborted.");
        return Ok(());
    }

    let engine = engine(ctx)?;
    let report = engine
        .emergency_reset()
        .await
        .context("Emergency reset failed")?;

    for name in &report.removed {
        println!("Removed {name}");
    }
    println!("Cleared whitelist and blacklist.");

    if !report.failures.is_empty() {
        for (name, reason) in &report.failures {
            eprintln!("Failed to remove {name}: {reason}");
        }
        bail!("{} rules could not be removed", report.failures.len());
    }
    Ok(())
}

fn confirm_reset() -> Result<bool> {
    println!("\n\x1b[1;31m━━━ Emergency Reset ━━━\x1b[0m");
    println!("This removes every firewall rule created by winnetguard");
    println!("and clears all allow and block decisions.");
    print!("\nType 'yes' to continue: ");
    std::io::Write::flush(&mut std::io::stdout())?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("yes"))
}
