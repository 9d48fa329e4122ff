//! REPL slash commands.

pub const HELP: &str = "\
  /clear            Clear history and summary (token counters are kept)
  /compact          Summarize older history now
  /approvals reset  Forget tool calls approved this session
  /usage            Show token usage and context fill
  /help             Show this help
  /exit             Save and quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Clear,
    Compact,
    ResetApprovals,
    Usage,
    Help,
    Exit,
    Unknown(String),
}

impl SlashCommand {
    /// `None` when `line` is not a slash command.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('/') {
            return None;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let command = match words.as_slice() {
            ["/clear"] => Self::Clear,
            ["/compact"] => Self::Compact,
            ["/approvals", "reset"] => Self::ResetApprovals,
            ["/usage"] => Self::Usage,
            ["/help"] | ["/?"] => Self::Help,
            ["/exit"] | ["/quit"] => Self::Exit,
            _ => Self::Unknown(line.to_string()),
        };
        Some(command)
    }
}
