//! REPL – Read-Eval-Print Loop for the liftlink operator shell.
//!
//! Supported slash-commands:
//!   /help                        – show this list
//!   /status                      – device and transit overview
//!   /connect <id>                – start or restart a device link
//!   /disconnect <id>             – tear a device link down
//!   /relay <name> on|off         – drive one elevator relay directly
//!   /door open|close             – pulse the door buttons
//!   /floor <n>                   – pulse a floor button
//!   /transit <robot> <from> <to> – run a cross-floor transit
//!   /quit | /exit                – gracefully exit the CLI

use std::io::{self, BufRead, Write};

use colored::Colorize;
use liftlink_types::{ConnectionState, LiftError, RelayName, TransitRequest};
use tokio::runtime::Handle;

use crate::app::App;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Connect(String),
    Disconnect(String),
    Relay(RelayName, bool),
    Door { open: bool },
    Floor(u8),
    Transit { robot_id: String, from: u8, to: u8 },
    Quit,
}

/// Parse one input line.  `Err` carries the message shown to the operator.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".into());
    };
    let args: Vec<&str> = words.collect();

    let command = match (head, args.as_slice()) {
        ("/help", []) => Command::Help,
        ("/status", []) => Command::Status,
        ("/connect", [id]) => Command::Connect(id.to_string()),
        ("/disconnect", [id]) => Command::Disconnect(id.to_string()),
        ("/relay", [name, state]) => {
            let relay = name
                .parse::<RelayName>()
                .map_err(|_| format!("unknown relay '{name}'"))?;
            Command::Relay(relay, parse_switch(state)?)
        }
        ("/door", ["open"]) => Command::Door { open: true },
        ("/door", ["close"]) => Command::Door { open: false },
        ("/floor", [n]) => Command::Floor(parse_floor(n)?),
        ("/transit", [robot, from, to]) => Command::Transit {
            robot_id: robot.to_string(),
            from: parse_floor(from)?,
            to: parse_floor(to)?,
        },
        ("/quit" | "/exit", []) => Command::Quit,
        (
            "/help" | "/status" | "/connect" | "/disconnect" | "/relay" | "/door" | "/floor"
            | "/transit" | "/quit" | "/exit",
            _,
        ) => return Err(format!("bad arguments for {head}, see /help")),
        (other, _) => return Err(format!("unknown command '{other}'")),
    };
    Ok(command)
}

fn parse_switch(word: &str) -> Result<bool, String> {
    match word {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected on|off, got '{other}'")),
    }
}

fn parse_floor(word: &str) -> Result<u8, String> {
    word.parse::<u8>()
        .map_err(|_| format!("'{word}' is not a floor number"))
}

/// Run the interactive loop until `/quit` or end of input.
pub fn run(app: &App, handle: &Handle) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", "liftlink>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse(&line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                break;
            }
            Ok(command) => {
                if let Err(e) = execute(command, app, handle) {
                    println!("{} {}", "✗".red().bold(), e.to_string().red());
                }
            }
            Err(message) => println!(
                "{} {}. Type {} for available commands.",
                "✗".red().bold(),
                message.yellow(),
                "/help".bold()
            ),
        }
    }
}

fn execute(command: Command, app: &App, handle: &Handle) -> Result<(), LiftError> {
    match command {
        Command::Help => cmd_help(),
        Command::Status => cmd_status(app),
        Command::Connect(id) => {
            let _guard = handle.enter();
            app.connect(&id)?;
            println!("{} connecting {}", "✓".green(), id.bold());
        }
        Command::Disconnect(id) => {
            handle.block_on(app.disconnect(&id))?;
            println!("{} {} disconnected", "✓".green(), id.bold());
        }
        Command::Relay(relay, state) => {
            handle.block_on(app.elevator.set_relay(relay, state))?;
            println!("{} {} -> {}", "✓".green(), relay.as_str().bold(), on_off(state));
        }
        Command::Door { open } => {
            if open {
                handle.block_on(app.elevator.open_door())?;
            } else {
                handle.block_on(app.elevator.close_door())?;
            }
            println!("{} door {} pulsed", "✓".green(), if open { "open" } else { "close" });
        }
        Command::Floor(n) => {
            handle.block_on(app.elevator.select_floor(n))?;
            println!("{} floor {} pulsed", "✓".green(), n);
        }
        Command::Transit { robot_id, from, to } => {
            if !app.is_robot(&robot_id) {
                return Err(LiftError::UnknownDevice(robot_id));
            }
            let transit = {
                let _guard = handle.enter();
                app.transit.spawn(TransitRequest::new(robot_id.as_str(), from, to))?
            };
            println!(
                "{} transit {} started for {} ({} → {})",
                "✓".green(),
                transit.transit_id().to_string().dimmed(),
                robot_id.bold(),
                from,
                to
            );
            handle.spawn(async move {
                match transit.wait().await {
                    Ok(report) => println!(
                        "\n{} transit of {} to floor {} completed",
                        "✓".green().bold(),
                        report.robot_id.bold(),
                        report.destination_floor
                    ),
                    Err(e) => println!("\n{} transit failed: {}", "✗".red().bold(), e.to_string().red()),
                }
            });
        }
        Command::Quit => {}
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "liftlink Commands".bold().underline());
    println!("  {}                      – device and transit overview", "/status".bold().cyan());
    println!("  {}  – start / stop a device link", "/connect <id>  /disconnect <id>".bold().cyan());
    println!("  {}         – drive one elevator relay", "/relay <name> on|off".bold().cyan());
    println!("  {}             – pulse the door buttons", "/door open|close".bold().cyan());
    println!("  {}                   – pulse a floor button", "/floor <n>".bold().cyan());
    println!("  {} – robot transit between floors", "/transit <robot> <from> <to>".bold().cyan());
    println!("  {}                 – exit the CLI", "/quit  /exit".bold().cyan());
    println!(
        "  Relay names: {}",
        RelayName::ALL.map(RelayName::as_str).join(", ").dimmed()
    );
    println!();
}

fn cmd_status(app: &App) {
    println!("{}", "Devices".bold().underline());
    for device in app.status.snapshot() {
        let state = device.connection.to_string();
        let state = match device.connection {
            ConnectionState::Connected => state.green(),
            ConnectionState::Connecting | ConnectionState::Reconnecting => state.yellow(),
            ConnectionState::Disconnected | ConnectionState::Failed => state.red(),
        };
        println!(
            "  {:<16} {:<12} failed attempts: {}",
            device.device_id.bold(),
            state,
            device.failed_attempts
        );
        if let Some(error) = &device.last_error {
            println!("    last error: {}", error.red());
        }
    }

    let board = app.elevator.board();
    println!("{}", "Relays".bold().underline());
    for (relay, state) in board.iter() {
        println!("  {:<10} {}", relay.as_str(), on_off(state));
    }

    let active = app.transit.active();
    if !active.is_empty() {
        println!("{}", "Active transits".bold().underline());
        for robot_id in active {
            println!("  {}", robot_id.bold());
        }
    }
}

fn on_off(state: bool) -> colored::ColoredString {
    if state { "ON".green().bold() } else { "OFF".dimmed() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse("/help"), Ok(Command::Help));
        assert_eq!(parse("  /status \n"), Ok(Command::Status));
        assert_eq!(parse("/exit"), Ok(Command::Quit));
        assert_eq!(parse("/connect R1"), Ok(Command::Connect("R1".into())));
        assert_eq!(parse("/disconnect elevator"), Ok(Command::Disconnect("elevator".into())));
    }

    #[test]
    fn parses_elevator_commands() {
        assert_eq!(parse("/relay doorOpen on"), Ok(Command::Relay(RelayName::DoorOpen, true)));
        assert_eq!(parse("/relay floor3 off"), Ok(Command::Relay(RelayName::Floor3, false)));
        assert_eq!(parse("/door close"), Ok(Command::Door { open: false }));
        assert_eq!(parse("/floor 2"), Ok(Command::Floor(2)));
    }

    #[test]
    fn parses_transit() {
        assert_eq!(
            parse("/transit R1 1 4"),
            Ok(Command::Transit { robot_id: "R1".into(), from: 1, to: 4 })
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse("/relay lobby on").unwrap_err().contains("unknown relay"));
        assert!(parse("/relay doorOpen maybe").unwrap_err().contains("on|off"));
        assert!(parse("/floor two").unwrap_err().contains("not a floor"));
        assert!(parse("/transit R1 1").unwrap_err().contains("bad arguments"));
        assert!(parse("/door ajar").unwrap_err().contains("bad arguments"));
        assert!(parse("/launch").unwrap_err().contains("unknown command"));
    }
}
