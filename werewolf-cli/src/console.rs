//! Line-oriented game console.
//!
//! Game events stream to stdout while stdin accepts control commands:
//! - `#pause`, `#resume`, `#reset`, `#start` drive the engine
//! - `#status` prints the table
//! - `#quit` exits
//!
//! Playback is acknowledged as soon as a statement is printed.

use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use werewolf_core::{GameEngine, GameEvent, GameSnapshot, GameStatus};

pub async fn run(mut engine: GameEngine) -> anyhow::Result<()> {
    let mut events = engine.subscribe();
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdin_open = true;

    print_help();
    engine.start()?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if show(&engine, &event) {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "Console fell behind"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if command(&mut engine, line.trim()).await {
                        break;
                    }
                }
                None => stdin_open = false,
            },
        }
    }
    Ok(())
}

/// Print one event. Returns `true` once the game is over.
fn show(engine: &GameEngine, event: &GameEvent) -> bool {
    match event {
        GameEvent::Update { snapshot, message } => {
            println!("[day {} {}] {message}", snapshot.current_day, snapshot.phase);
            if snapshot.status == GameStatus::Finished {
                print_table(snapshot);
                return true;
            }
        }
        GameEvent::Speak { speaker, text, .. } => {
            println!("  {speaker}: {text}");
            engine.acknowledge_playback(speaker);
        }
        GameEvent::Halted { reason } => {
            println!("[HALTED] {reason}");
            return true;
        }
    }
    false
}

/// Handle a console command. Returns `true` to exit.
async fn command(engine: &mut GameEngine, line: &str) -> bool {
    let result = match line {
        "" => Ok(()),
        "#quit" | "#exit" => {
            println!("Goodbye!");
            return true;
        }
        "#pause" => engine.pause().await,
        "#resume" => engine.resume(),
        "#reset" => engine.reset().await,
        "#start" => engine.start(),
        "#status" => {
            print_table(&engine.get_state());
            Ok(())
        }
        "#help" => {
            print_help();
            Ok(())
        }
        other => {
            println!("[ERROR] Unknown command: {other}");
            Ok(())
        }
    };
    if let Err(e) = result {
        println!("[ERROR] {e}");
    }
    false
}

fn print_table(snapshot: &GameSnapshot) {
    println!("[STATUS] {} | day {} | {}", snapshot.status, snapshot.current_day, snapshot.phase);
    for c in &snapshot.characters {
        let role = c.role.map(|r| r.to_string()).unwrap_or_else(|| "?".into());
        let state = if c.alive { "alive" } else { "dead" };
        println!("  {:<12} {:<10} {state}", c.name, role);
    }
    if let Some(winner) = snapshot.winner {
        println!("  Winner: the {winner}");
    }
}

fn print_help() {
    println!("Commands:");
    println!("  #pause   - Pause after the current phase");
    println!("  #resume  - Resume a paused game");
    println!("  #reset   - Discard the game and return to waiting");
    println!("  #start   - Start a new game after a reset");
    println!("  #status  - Show the table");
    println!("  #quit    - Exit");
    println!();
}
