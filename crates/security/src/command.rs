//! Shell command checks: deny-list, allow-prefix and injection detection.

/// Sequences that chain or substitute commands.
///
/// An allow-listed prefix says nothing about what follows one of these.
pub const INJECTION_METACHARS: &[&str] = &[";", "|", "&&", "||", "$(", "`", "\n"];

/// Whether the command chains, pipes or substitutes another command.
pub fn has_injection_metachars(command: &str) -> bool {
    INJECTION_METACHARS.iter().any(|m| command.contains(m))
}

/// The first deny-listed substring found in `command`, if any.
pub fn denied_substring<'a>(command: &str, denied: &'a [String]) -> Option<&'a str> {
    denied
        .iter()
        .map(String::as_str)
        .filter(|d| !d.is_empty())
        .find(|d| command.contains(d))
}

/// Whether `command` starts with `prefix` on a word boundary.
///
/// The character after the prefix must be a space or the end of the
/// command, so an allow-entry `git` covers `git status` but not `gitx`.
pub fn matches_prefix(command: &str, prefix: &str) -> bool {
    let command = command.trim_start();
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return false;
    }
    match command.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(' '),
        None => false,
    }
}

/// The first whitespace-delimited token, used as the approval pattern.
pub fn first_token(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}
