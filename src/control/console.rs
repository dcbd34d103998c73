//! Line-oriented console UI.
//!
//! Prints engine events as text and reads one command per line:
//!
//! ```text
//! allow <path>
//! block <path>
//! forget <path>
//! set <key> <value>
//! quit
//! ```
//!
//! End of input is treated like `quit`.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::channel::UiChannels;
use super::protocol::{EngineToUi, UiToEngine};
use crate::policy::settings::{SettingKey, SettingValue};

/// A console line that could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    /// First word is not a command.
    #[error("Unknown command '{0}' (expected allow, block, forget, set or quit)")]
    UnknownCommand(String),

    /// Command is missing an argument.
    #[error("Usage: {0}")]
    Usage(&'static str),

    /// Setting name is not recognized.
    #[error("Unknown setting '{0}'")]
    UnknownSetting(String),

    /// Setting value is not a number or boolean.
    #[error("Cannot parse setting value '{0}'")]
    BadValue(String),
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<UiToEngine>, ConsoleError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "allow" => UiToEngine::Allow {
            path: required(rest, "allow <path>")?,
        },
        "block" => UiToEngine::Block {
            path: required(rest, "block <path>")?,
        },
        "forget" => UiToEngine::Forget {
            path: required(rest, "forget <path>")?,
        },
        "set" => {
            let (key, value) = rest
                .split_once(char::is_whitespace)
                .ok_or(ConsoleError::Usage("set <key> <value>"))?;
            let key: SettingKey = key
                .parse()
                .map_err(|_| ConsoleError::UnknownSetting(key.to_string()))?;
            let value = value.trim();
            let value =
                SettingValue::parse(value).ok_or_else(|| ConsoleError::BadValue(value.to_string()))?;
            UiToEngine::UpdateSetting { key, value }
        }
        "quit" | "exit" => UiToEngine::UiShutdown,
        other => return Err(ConsoleError::UnknownCommand(other.to_string())),
    };
    Ok(Some(command))
}

fn required(arg: &str, usage: &'static str) -> Result<String, ConsoleError> {
    if arg.is_empty() {
        Err(ConsoleError::Usage(usage))
    } else {
        Ok(arg.to_string())
    }
}

/// Render an engine event as console text, one or more lines.
pub fn render(event: &EngineToUi) -> String {
    match event {
        EngineToUi::ConnectionSnapshot {
            connections,
            total,
            timestamp,
        } => {
            let mut out = format!(
                "[{}] {} connections ({} shown)\n",
                timestamp.format("%H:%M:%S"),
                total,
                connections.len()
            );
            for c in connections {
                out.push_str(&format!(
                    "  {:<24} {:>7} {} {} -> {} {}\n",
                    c.process_name, c.pid, c.protocol, c.local, c.remote, c.status
                ));
            }
            out
        }
        EngineToUi::PendingDecision { path, name, .. } => {
            format!("New application blocked: {name}\n  {path}\n  allow or block it to decide\n")
        }
        EngineToUi::DecisionApplied { path, state } => format!("{path}: {state:?}\n"),
        EngineToUi::SettingChanged { key, value } => format!("{key} = {value}\n"),
        EngineToUi::CommandFailed { command, reason } => {
            format!("error: '{command}' failed: {reason}\n")
        }
        EngineToUi::Shutdown => "Engine stopped\n".to_string(),
    }
}

/// Drive a console over `input` and `output` until the engine shuts down.
///
/// On `quit` or end of input a [`UiToEngine::UiShutdown`] is sent and
/// remaining events are printed until the engine confirms.
pub async fn run_console<R, W>(mut ui: UiChannels, input: R, mut output: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut reading = true;

    loop {
        tokio::select! {
            event = ui.recv() => {
                let Some(event) = event else {
                    debug!("Engine channel closed");
                    break;
                };
                output.write_all(render(&event).as_bytes()).await?;
                output.flush().await?;
                if matches!(event, EngineToUi::Shutdown) {
                    break;
                }
            }
            line = lines.next_line(), if reading => {
                let command = match line? {
                    Some(line) => match parse_command(&line) {
                        Ok(Some(command)) => command,
                        Ok(None) => continue,
                        Err(e) => {
                            output.write_all(format!("error: {e}\n").as_bytes()).await?;
                            output.flush().await?;
                            continue;
                        }
                    },
                    None => UiToEngine::UiShutdown,
                };

                if command == UiToEngine::UiShutdown {
                    reading = false;
                }
                if ui.send(command).await.is_err() {
                    debug!("Engine stopped accepting commands");
                    break;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::channel::create_channel_pair;
    use crate::policy::engine::AppState;

    #[test]
    fn test_parse_decisions() {
        assert_eq!(
            parse_command("allow C:\\Program Files\\App\\app.exe").unwrap(),
            Some(UiToEngine::Allow {
                path: "C:\\Program Files\\App\\app.exe".to_string()
            })
        );
        assert_eq!(
            parse_command("  BLOCK /opt/foo.exe ").unwrap(),
            Some(UiToEngine::Block {
                path: "/opt/foo.exe".to_string()
            })
        );
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("quit").unwrap(), Some(UiToEngine::UiShutdown));
    }

    #[test]
    fn test_parse_setting() {
        assert_eq!(
            parse_command("set max_connections_display 50").unwrap(),
            Some(UiToEngine::UpdateSetting {
                key: SettingKey::MaxConnectionsDisplay,
                value: SettingValue::Integer(50),
            })
        );
        assert_eq!(
            parse_command("set enable_notifications false").unwrap(),
            Some(UiToEngine::UpdateSetting {
                key: SettingKey::EnableNotifications,
                value: SettingValue::Bool(false),
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_command("allow").unwrap_err(),
            ConsoleError::Usage("allow <path>")
        );
        assert!(matches!(
            parse_command("set bogus 1").unwrap_err(),
            ConsoleError::UnknownSetting(_)
        ));
        assert!(matches!(
            parse_command("set ui_font_size big").unwrap_err(),
            ConsoleError::BadValue(_)
        ));
        assert!(matches!(
            parse_command("launch foo").unwrap_err(),
            ConsoleError::UnknownCommand(_)
        ));
    }

    #[test]
    fn test_render_failure() {
        let text = render(&EngineToUi::CommandFailed {
            command: "block svchost.exe".to_string(),
            reason: "Cannot block critical system process: svchost.exe".to_string(),
        });
        assert!(text.starts_with("error:"));
        assert!(text.contains("critical system process"));
    }

    #[tokio::test]
    async fn test_console_forwards_and_shuts_down() {
        let (mut engine, ui) = create_channel_pair();
        let input: &[u8] = b"allow /opt/foo.exe\nnonsense\n";
        let mut output = Vec::new();

        let responder = tokio::spawn(async move {
            let first = engine.rx.recv().await.unwrap();
            engine
                .tx
                .send(EngineToUi::DecisionApplied {
                    path: "/opt/foo.exe".to_string(),
                    state: AppState::Whitelisted,
                })
                .await
                .unwrap();
            // End of input arrives as a shutdown request.
            let second = engine.rx.recv().await.unwrap();
            engine.tx.send(EngineToUi::Shutdown).await.unwrap();
            (first, second)
        });

        run_console(ui, input, &mut output).await.unwrap();
        let (first, second) = responder.await.unwrap();

        assert_eq!(
            first,
            UiToEngine::Allow {
                path: "/opt/foo.exe".to_string()
            }
        );
        assert_eq!(second, UiToEngine::UiShutdown);

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("error: Unknown command 'nonsense'"));
        assert!(text.contains("Whitelisted"));
        assert!(text.contains("Engine stopped"));
    }
}
