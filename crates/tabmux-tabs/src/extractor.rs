//! Editor-mode and command-extraction heuristics, kept behind a small
//! trait so the implementation can later be swapped for OSC-133
//! semantic-prompt handling on terminals that support it.
//! [`HeuristicExtractor`] is the only implementation right now; nothing in
//! this crate depends on its regex shapes beyond the trait boundary.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::VecDeque;
use std::time::Duration;

/// Rolling output buffer cap kept per tab.
pub const OUTPUT_BUFFER_CAP: usize = 50;

/// Extraction is rate-limited to once per this interval, per tab.
pub const EXTRACT_RATE_LIMIT: Duration = Duration::from_millis(500);

lazy_static! {
    // user@host:path[$#>] <cmd>
    static ref RE_USER_HOST: Regex = Regex::new(r"^\S+@\S+:\S*[$#>]\s+(.+)$").unwrap();
    // path[$#>] <cmd>  (no '@', so it doesn't also match the user@host form)
    static ref RE_PATH: Regex = Regex::new(r"^[^\s@]+:\S*[$#>]\s+(.+)$").unwrap();
    // generic …[$#>] <cmd>
    static ref RE_GENERIC: Regex = Regex::new(r"^.*[$#>]\s+(.+)$").unwrap();
    // entry into a likely full-screen program
    static ref RE_EDITOR_ENTRY: Regex =
        Regex::new(r"(?i)^\s*(vi|vim|nano|emacs|pico|ed|less|more|cat|man)(\s|$)").unwrap();
    // ":<word>" exit pattern (":q", ":wq", ":x", arbitrary ex-mode command)
    static ref RE_EXIT_COLON_WORD: Regex = Regex::new(r"^:\w+$").unwrap();
}

/// Single-token exit patterns that flip `editorMode` back off, minus
/// `Ctrl+X` and the `:<word>` family which are handled separately (the
/// former is a control byte, not text; the latter is a regex).
const EXIT_LITERALS: &[&str] = &["q", "wq", ":q", ":wq", "ZZ", "x"];

/// `Ctrl+X` (0x18), nano's save-and-exit chord.
const CTRL_X: u8 = 0x18;

fn match_prompt_line(line: &str) -> Option<&str> {
    RE_USER_HOST
        .captures(line)
        .or_else(|| RE_PATH.captures(line))
        .or_else(|| RE_GENERIC.captures(line))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Swappable command-extraction strategy.
pub trait CommandExtractor: Send + Sync + 'static {
    /// Scan the rolling output buffer for a just-completed command: a line
    /// matching one of the prompt templates that is itself followed by
    /// another prompt line. Returns `None` if no such pair exists yet, or
    /// if the candidate fails the rejection rules (escape-prefixed,
    /// < 2 chars).
    fn extract(&self, lines: &VecDeque<String>) -> Option<String>;

    /// True if `command` looks like entry into a full-screen program.
    fn is_editor_entry(&self, command: &str) -> bool;

    /// True if `raw_input` (one write from the UI) is a recognized
    /// single-token exit sequence for the program `editorMode` assumes is
    /// running.
    fn is_editor_exit(&self, raw_input: &[u8]) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicExtractor;

impl CommandExtractor for HeuristicExtractor {
    fn extract(&self, lines: &VecDeque<String>) -> Option<String> {
        let prompts: Vec<&str> = lines.iter().filter_map(|l| match_prompt_line(l)).collect();
        if prompts.len() < 2 {
            return None;
        }
        // The most recently completed command is the second-to-last prompt
        // match — the last one is the new (possibly still-empty) prompt
        // line that proves the previous command actually finished.
        let candidate = prompts[prompts.len() - 2].trim();
        if candidate.starts_with('\u{1b}') || candidate.chars().count() < 2 {
            return None;
        }
        Some(candidate.to_string())
    }

    fn is_editor_entry(&self, command: &str) -> bool {
        RE_EDITOR_ENTRY.is_match(command)
    }

    fn is_editor_exit(&self, raw_input: &[u8]) -> bool {
        if raw_input == [CTRL_X] {
            return true;
        }
        let Ok(text) = std::str::from_utf8(raw_input) else {
            return false;
        };
        let trimmed = text.trim_end_matches(['\r', '\n']);
        EXIT_LITERALS.contains(&trimmed) || RE_EXIT_COLON_WORD.is_match(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(lines: &[&str]) -> VecDeque<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_command_between_two_prompts() {
        let extractor = HeuristicExtractor;
        let lines = buf(&["alice@host:~$ ls -la", "total 12", "alice@host:~$ "]);
        assert_eq!(extractor.extract(&lines), Some("ls -la".to_string()));
    }

    #[test]
    fn no_candidate_without_a_following_prompt() {
        let extractor = HeuristicExtractor;
        let lines = buf(&["alice@host:~$ ls -la", "total 12"]);
        assert_eq!(extractor.extract(&lines), None);
    }

    #[test]
    fn short_commands_are_rejected() {
        let extractor = HeuristicExtractor;
        let lines = buf(&["$ l", "$ "]);
        assert_eq!(extractor.extract(&lines), None);
    }

    #[test]
    fn escape_prefixed_candidate_is_rejected() {
        let extractor = HeuristicExtractor;
        let lines = buf(&["$ \u{1b}[6n", "$ "]);
        assert_eq!(extractor.extract(&lines), None);
    }

    #[test]
    fn editor_entry_detected_case_insensitively() {
        let extractor = HeuristicExtractor;
        assert!(extractor.is_editor_entry("vim notes.txt"));
        assert!(extractor.is_editor_entry("Nano /etc/hosts"));
        assert!(!extractor.is_editor_entry("vimdiff a b"));
    }

    #[test]
    fn editor_exit_literals_and_colon_word() {
        let extractor = HeuristicExtractor;
        assert!(extractor.is_editor_exit(b"ZZ"));
        assert!(extractor.is_editor_exit(b":wq\r\n"));
        assert!(extractor.is_editor_exit(b":x123"));
        assert!(extractor.is_editor_exit(&[0x18]));
        assert!(!extractor.is_editor_exit(b"hello"));
    }
}
