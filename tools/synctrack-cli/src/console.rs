//! Line commands read from stdin while serving.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use anyhow::{Context, Result, bail};
use synctrack_core::Interpolation;

pub const HELP: &str = "\
commands:
  set <track> <row> <value> [step|linear|smooth|ramp]
  del <track> <row>
  undo | redo
  row <n>
  pause | play
  save          write the editor's track files
  load          reload the track files, dropping unsaved edits
  remote-save   ask players to write theirs
  tracks        list tracks and values at the current row
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Set {
        track: String,
        row: u32,
        value: f32,
        interpolation: Interpolation,
    },
    Delete {
        track: String,
        row: u32,
    },
    Undo,
    Redo,
    Row(u32),
    Pause,
    Play,
    Save,
    Load,
    RemoteSave,
    Tracks,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (verb, args.as_slice()) {
            ("set", [track, row, value, rest @ ..]) => {
                let interpolation = match rest {
                    [] => Interpolation::Linear,
                    [name] => name.parse().map_err(anyhow::Error::msg)?,
                    _ => bail!("usage: set <track> <row> <value> [interpolation]"),
                };
                Self::Set {
                    track: track.to_string(),
                    row: parse_row(row)?,
                    value: value
                        .parse()
                        .with_context(|| format!("invalid value '{}'", value))?,
                    interpolation,
                }
            }
            ("set", _) => bail!("usage: set <track> <row> <value> [interpolation]"),
            ("del" | "delete", [track, row]) => Self::Delete {
                track: track.to_string(),
                row: parse_row(row)?,
            },
            ("del" | "delete", _) => bail!("usage: del <track> <row>"),
            ("row", [row]) => Self::Row(parse_row(row)?),
            ("row", _) => bail!("usage: row <n>"),
            ("undo", []) => Self::Undo,
            ("redo", []) => Self::Redo,
            ("pause", []) => Self::Pause,
            ("play", []) => Self::Play,
            ("save", []) => Self::Save,
            ("load", []) => Self::Load,
            ("remote-save", []) => Self::RemoteSave,
            ("tracks", []) => Self::Tracks,
            ("help" | "?", _) => Self::Help,
            ("quit" | "exit", []) => Self::Quit,
            (verb, _) => bail!("unknown command '{}' (try 'help')", verb),
        };
        Ok(Some(command))
    }
}

fn parse_row(text: &str) -> Result<u32> {
    text.parse()
        .with_context(|| format!("invalid row '{}'", text))
}

/// Forward stdin lines to the poll loop. The channel closes at end of input.
pub fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ConsoleCommand {
        ConsoleCommand::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_set() {
        assert_eq!(
            parse("set cam.x 16 2.5 smooth"),
            ConsoleCommand::Set {
                track: "cam.x".to_string(),
                row: 16,
                value: 2.5,
                interpolation: Interpolation::Smooth,
            }
        );
        // Linear by default
        assert_eq!(
            parse("  set fx 0 -1 "),
            ConsoleCommand::Set {
                track: "fx".to_string(),
                row: 0,
                value: -1.0,
                interpolation: Interpolation::Linear,
            }
        );
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("undo"), ConsoleCommand::Undo);
        assert_eq!(parse("redo"), ConsoleCommand::Redo);
        assert_eq!(parse("row 42"), ConsoleCommand::Row(42));
        assert_eq!(parse("remote-save"), ConsoleCommand::RemoteSave);
        assert_eq!(parse("load"), ConsoleCommand::Load);
        assert_eq!(parse("exit"), ConsoleCommand::Quit);
        assert_eq!(
            parse("del cam.x 4"),
            ConsoleCommand::Delete {
                track: "cam.x".to_string(),
                row: 4
            }
        );
    }

    #[test]
    fn test_blank_line() {
        assert_eq!(ConsoleCommand::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        for line in [
            "set cam.x 1",
            "set cam.x -1 0",
            "set cam.x 1 abc",
            "set cam.x 1 0 cubic",
            "del cam.x",
            "row",
            "undo now",
            "jump 3",
        ] {
            assert!(ConsoleCommand::parse(line).is_err(), "{:?} parsed", line);
        }
    }
}
