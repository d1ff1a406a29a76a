//! Line-oriented command front end.
//!
//! Each line typed at the console maps to one session operation. Parsing is
//! kept separate from execution so it can be tested without a session.

use std::fmt;
use std::path::PathBuf;

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `mode <ID>`
    Mode(String),
    /// `start [MS]`; without an argument the configured interval is used
    Start(Option<String>),
    /// `pause`, toggles like the pause button
    Pause,
    /// `resume`
    Resume,
    /// `stop`
    Stop,
    /// `reset`
    Reset,
    /// `save [PATH]`
    Save(Option<PathBuf>),
    /// `status`
    Status,
    /// `modes`
    Modes,
    /// `help`
    Help,
    /// `quit` / `exit`
    Quit,
}

/// A line that is not a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseError {}

/// Help text listing every command.
pub const HELP: &str = "\
Commands:
  mode <ID>      select measurement mode (e.g. mode RES)
  start [MS]     start sampling every MS milliseconds
  pause          pause or unpause sampling
  resume         resume sampling
  stop           stop sampling (data is kept)
  reset          clear the data without stopping
  save [PATH]    export CSV (default: timestamped file in the output dir)
  status         show run state
  modes          list available modes
  quit           stop and exit";

impl ConsoleCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = words.collect();
        let argument = (!rest.is_empty()).then(|| rest.join(" "));

        let command = match verb.to_ascii_lowercase().as_str() {
            "mode" | "select" => match argument {
                Some(id) => ConsoleCommand::Mode(id),
                None => return Err(ParseError("usage: mode <ID>".into())),
            },
            "start" => ConsoleCommand::Start(argument),
            "pause" => ConsoleCommand::Pause,
            "resume" => ConsoleCommand::Resume,
            "stop" => ConsoleCommand::Stop,
            "reset" | "clear" => ConsoleCommand::Reset,
            "save" => ConsoleCommand::Save(argument.map(PathBuf::from)),
            "status" => ConsoleCommand::Status,
            "modes" => ConsoleCommand::Modes,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => {
                return Err(ParseError(format!(
                    "unknown command '{other}', type 'help' for a list"
                )))
            }
        };
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(
            ConsoleCommand::parse("mode RES").unwrap(),
            Some(ConsoleCommand::Mode("RES".into()))
        );
        assert_eq!(
            ConsoleCommand::parse("  START 250 ").unwrap(),
            Some(ConsoleCommand::Start(Some("250".into())))
        );
        assert_eq!(
            ConsoleCommand::parse("start").unwrap(),
            Some(ConsoleCommand::Start(None))
        );
        assert_eq!(
            ConsoleCommand::parse("save runs/my run.csv").unwrap(),
            Some(ConsoleCommand::Save(Some(PathBuf::from("runs/my run.csv"))))
        );
        assert_eq!(ConsoleCommand::parse("exit").unwrap(), Some(ConsoleCommand::Quit));
    }

    #[test]
    fn interval_text_is_passed_through_unvalidated() {
        // The scheduler owns interval validation.
        assert_eq!(
            ConsoleCommand::parse("start abc").unwrap(),
            Some(ConsoleCommand::Start(Some("abc".into())))
        );
    }

    #[test]
    fn blank_and_unknown_lines() {
        assert_eq!(ConsoleCommand::parse("   ").unwrap(), None);
        assert!(ConsoleCommand::parse("mode").is_err());
        let err = ConsoleCommand::parse("launch").unwrap_err();
        assert!(err.to_string().contains("launch"));
    }
}
