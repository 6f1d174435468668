//! Interactive action console.
//!
//! A rustyline REPL that parses one action per line and dispatches it
//! against the adapter registry. With a single open adapter, commands
//! may omit the `--adapter`/`--port` selector.

use crate::actions::{dispatch, Action, ActionRequest};
use crate::keymap;
use crate::registry::AdapterRegistry;
use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;
use std::sync::Arc;

/// One parsed console line.
#[derive(Debug, PartialEq)]
pub enum ConsoleRequest {
    Action(ActionRequest),
    List,
    Keys,
    Help,
    Quit,
}

/// Run the REPL until the user quits. Readline blocks, so the loop runs
/// on a blocking thread and dispatches through the captured runtime
/// handle.
pub async fn run_console(registry: Arc<AdapterRegistry>) -> Result<()> {
    let runtime = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || console_loop(registry, runtime))
        .await
        .context("console task failed")?
}

fn console_loop(registry: Arc<AdapterRegistry>, runtime: tokio::runtime::Handle) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("cec-gw console; 'help' lists commands, 'quit' leaves.");

    loop {
        match editor.readline("cec> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                match parse_line(line) {
                    Ok(ConsoleRequest::Quit) => break,
                    Ok(ConsoleRequest::Help) => print_help(),
                    Ok(ConsoleRequest::Keys) => {
                        for name in keymap::key_names() {
                            println!("  {name}");
                        }
                    }
                    Ok(ConsoleRequest::List) => {
                        for adapter in runtime.block_on(registry.list()) {
                            let vendor = adapter
                                .vendor()
                                .unwrap_or_else(|_| "unknown vendor".to_string());
                            println!(
                                "  {} on {} ({vendor})",
                                adapter.name().bold(),
                                adapter.com_port()
                            );
                        }
                    }
                    Ok(ConsoleRequest::Action(mut request)) => {
                        // A lone adapter needs no selector.
                        if request.com_port.is_none() && request.adapter.is_none() {
                            let adapters = runtime.block_on(registry.list());
                            if let [only] = adapters.as_slice() {
                                request.com_port = Some(only.com_port().to_string());
                            }
                        }
                        match runtime.block_on(dispatch(&registry, request)) {
                            Ok(Value::Null) => println!("{}", "ok".green()),
                            Ok(value) => println!("{}", value.to_string().green()),
                            Err(e) => println!("{}", format!("CEC: {e}").red()),
                        }
                    }
                    Err(e) => println!("{}", e.to_string().yellow()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn print_help() {
    println!("Adapter selection: --adapter <name> and/or --port <com port>");
    println!();
    println!("  get-volume | set-volume <0-100> | volume-up | volume-down");
    println!("  get-mute | mute-on | mute-off | toggle-mute");
    println!("  device-power <device> | power-on <device> | standby <device>");
    println!("  power-on-all | standby-all");
    println!("  vendor <device> | menu-language <device> | osd-name <device>");
    println!("  cec-version <device> | is-active <device> | is-active-source <device>");
    println!("  set-active-source <device> | send-key <device> <key>");
    println!("  set-osd <device> <duration ms> <message>");
    println!("  set-menu <open|closed> | set-inactive-view | raw <hex command>");
    println!("  restart | list | keys | help | quit");
}

/// Parse one console line into a request. Quotes group multi-word
/// device names and messages.
pub fn parse_line(line: &str) -> Result<ConsoleRequest> {
    let tokens = split_tokens(line);
    let mut tokens = tokens.into_iter();
    let verb = tokens.next().ok_or_else(|| anyhow!("empty command"))?;

    match verb.as_str() {
        "list" => return Ok(ConsoleRequest::List),
        "keys" => return Ok(ConsoleRequest::Keys),
        "help" => return Ok(ConsoleRequest::Help),
        "quit" | "exit" => return Ok(ConsoleRequest::Quit),
        _ => {}
    }

    let mut adapter = None;
    let mut com_port = None;
    let mut positional: Vec<String> = Vec::new();
    while let Some(token) = tokens.next() {
        match token.as_str() {
            "--adapter" | "-a" => {
                adapter = Some(tokens.next().context("--adapter needs a value")?)
            }
            "--port" | "-p" => com_port = Some(tokens.next().context("--port needs a value")?),
            _ => positional.push(token),
        }
    }

    let mut positional = positional.into_iter();
    macro_rules! arg {
        ($what:expr) => {
            positional
                .next()
                .ok_or_else(|| anyhow!("{verb} needs {}", $what))?
        };
    }

    let action = match verb.as_str() {
        "get-volume" => Action::GetVolume,
        "set-volume" => Action::SetVolume {
            volume: arg!("a level")
                .parse()
                .context("volume must be a number from 0 to 100")?,
        },
        "volume-up" => Action::VolumeUp,
        "volume-down" => Action::VolumeDown,
        "get-mute" => Action::GetMute,
        "mute-on" => Action::MuteOn,
        "mute-off" => Action::MuteOff,
        "toggle-mute" => Action::ToggleMute,
        "device-power" => Action::GetDevicePower { device: arg!("a device") },
        "power-on" => Action::PowerOnDevice { device: arg!("a device") },
        "standby" => Action::StandbyDevice { device: arg!("a device") },
        "power-on-all" => Action::PowerOnAll,
        "standby-all" => Action::StandbyAll,
        "vendor" => Action::GetDeviceVendor { device: arg!("a device") },
        "menu-language" => Action::GetDeviceMenuLanguage { device: arg!("a device") },
        "osd-name" => Action::GetDeviceOsdName { device: arg!("a device") },
        "cec-version" => Action::GetDeviceCecVersion { device: arg!("a device") },
        "is-active" => Action::IsDeviceActive { device: arg!("a device") },
        "is-active-source" => Action::IsActiveSource { device: arg!("a device") },
        "set-active-source" => Action::SetDeviceActiveSource { device: arg!("a device") },
        "send-key" => Action::SendRemoteKey {
            device: arg!("a device"),
            key: arg!("a key name"),
        },
        "set-osd" => {
            let device = arg!("a device");
            let duration_ms = arg!("a duration in ms")
                .parse()
                .context("duration must be milliseconds")?;
            let message: Vec<String> = positional.collect();
            if message.is_empty() {
                bail!("set-osd needs a message");
            }
            Action::SetOsdString {
                device,
                message: message.join(" "),
                duration_ms,
            }
        }
        "set-menu" => Action::SetMenu {
            open: match arg!("open or closed").as_str() {
                "open" | "opened" | "on" => true,
                "closed" | "close" | "off" => false,
                other => bail!("set-menu takes open or closed, not '{other}'"),
            },
        },
        "set-inactive-view" => Action::SetInactiveView,
        "raw" => Action::RawCommand { command: arg!("a hex command") },
        "restart" => Action::RestartAdapter,
        other => bail!("unknown command '{other}' (try 'help')"),
    };

    Ok(ConsoleRequest::Action(ActionRequest {
        com_port,
        adapter,
        action,
    }))
}

/// Whitespace tokenizer honoring single and double quotes.
fn split_tokens(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_honors_quotes() {
        assert_eq!(
            split_tokens(r#"send-key "Playback Device 1" 'Volume Up'"#),
            vec!["send-key", "Playback Device 1", "Volume Up"]
        );
        assert_eq!(split_tokens("  get-volume  "), vec!["get-volume"]);
    }

    #[test]
    fn parses_plain_actions() {
        assert_eq!(
            parse_line("get-volume").unwrap(),
            ConsoleRequest::Action(ActionRequest {
                com_port: None,
                adapter: None,
                action: Action::GetVolume,
            })
        );
        assert_eq!(
            parse_line("set-volume 35").unwrap(),
            ConsoleRequest::Action(ActionRequest {
                com_port: None,
                adapter: None,
                action: Action::SetVolume { volume: 35 },
            })
        );
    }

    #[test]
    fn parses_adapter_selectors_anywhere() {
        let parsed = parse_line("power-on TV --adapter \"Living Room\" --port COM3").unwrap();
        assert_eq!(
            parsed,
            ConsoleRequest::Action(ActionRequest {
                com_port: Some("COM3".to_string()),
                adapter: Some("Living Room".to_string()),
                action: Action::PowerOnDevice { device: "TV".to_string() },
            })
        );
    }

    #[test]
    fn parses_send_key_and_osd() {
        let parsed = parse_line(r#"send-key TV "Volume Up""#).unwrap();
        assert_eq!(
            parsed,
            ConsoleRequest::Action(ActionRequest {
                com_port: None,
                adapter: None,
                action: Action::SendRemoteKey {
                    device: "TV".to_string(),
                    key: "Volume Up".to_string(),
                },
            })
        );

        let parsed = parse_line("set-osd TV 4000 Dinner is ready").unwrap();
        assert_eq!(
            parsed,
            ConsoleRequest::Action(ActionRequest {
                com_port: None,
                adapter: None,
                action: Action::SetOsdString {
                    device: "TV".to_string(),
                    message: "Dinner is ready".to_string(),
                    duration_ms: 4000,
                },
            })
        );
    }

    #[test]
    fn meta_commands_and_errors() {
        assert_eq!(parse_line("quit").unwrap(), ConsoleRequest::Quit);
        assert_eq!(parse_line("list").unwrap(), ConsoleRequest::List);
        assert!(parse_line("warp 9").is_err());
        assert!(parse_line("set-volume").is_err());
        assert!(parse_line("set-volume eleven").is_err());
        assert!(parse_line("set-menu sideways").is_err());
    }
}
