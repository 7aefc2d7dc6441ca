//! `.tplrc` configuration file parser.
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `/set <name>=<value>` or `/set <name> <value>` | set an engine option |
//! | `/delimiters <open> <close>` | change the fragment tags |
//! | Lines starting with `;` or `#` | comment, ignored |
//! | Any other `/command` | silently skipped |
//!
//! Options:
//!
//! | Name | Default |
//! |------|---------|
//! | `loop_check_interval` | 100 |
//! | `long_loop_threshold` | 100 |
//! | `max_call_depth` | 256 |
//! | `eval_stack_mb` | 64 |
//! | `pause_poll_ms` | 50 |
//! | `error_marker` | `[[error: {}]]` |
//! | `line_offset` | 0 |
//! | `trace_variables` | on |

use std::path::Path;

use thiserror::Error;

use crate::document::Delimiters;
use crate::script::InterpConfig;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

/// Engine and debugger options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub delimiters: Delimiters,
    pub loop_check_interval: usize,
    pub long_loop_threshold: usize,
    pub max_call_depth: usize,
    /// Stack size of the evaluation thread, in MiB.
    pub eval_stack_mb: usize,
    /// How often a paused debug session polls for a resume action.
    pub pause_poll_ms: u64,
    /// Inline replacement for a failed fragment; `{}` is the message.
    pub error_marker: String,
    /// Extra lines added to every display line.
    pub line_offset: usize,
    /// Record visible variables in every debug step.
    pub trace_variables: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let interp = InterpConfig::default();
        EngineConfig {
            delimiters: Delimiters::default(),
            loop_check_interval: interp.loop_check_interval,
            long_loop_threshold: interp.long_loop_threshold,
            max_call_depth: interp.max_call_depth,
            eval_stack_mb: 64,
            pause_poll_ms: 50,
            error_marker: "[[error: {}]]".to_owned(),
            line_offset: 0,
            trace_variables: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interp_config(&self) -> InterpConfig {
        InterpConfig {
            loop_check_interval: self.loop_check_interval,
            long_loop_threshold: self.long_loop_threshold,
            max_call_depth: self.max_call_depth,
        }
    }

    /// The inline marker for a fragment that failed with `message`.
    pub fn error_marker(&self, message: &str) -> String {
        self.error_marker.replace("{}", message)
    }

    /// Parse a config string.
    ///
    /// Unknown directives are skipped; bad values on recognised lines are
    /// reported and leave the option at its previous value.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = EngineConfig::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            let Some(rest) = line.strip_prefix('/') else {
                errors.push(ConfigError {
                    line: lineno,
                    message: format!("expected a /command, found '{line}'"),
                });
                continue;
            };

            let (cmd, args_str) = rest
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((rest, ""));
            let tokens = split_args(args_str.trim());

            let result = match cmd {
                "set" => parse_set(&tokens, &mut config),
                "delimiters" => parse_delimiters(&tokens, &mut config),
                _ => Ok(()),
            };
            if let Err(message) = result {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.
fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if !in_quotes => {
                in_quotes = true;
                quoted = true;
            }
            '"' if in_quotes => in_quotes = false,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() || quoted {
                    args.push(std::mem::take(&mut cur));
                    quoted = false;
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() || quoted {
        args.push(cur);
    }
    args
}

// ── /set ─────────────────────────────────────────────────────────────────────

/// Parse `/set <name>=<value>` or `/set <name> <value>`.
fn parse_set(tokens: &[String], config: &mut EngineConfig) -> Result<(), String> {
    if tokens.is_empty() {
        return Err("/set: requires an argument".into());
    }

    let (name, value) = if let Some(eq) = tokens[0].find('=') {
        let mut value = tokens[0][eq + 1..].to_owned();
        for t in &tokens[1..] {
            value.push(' ');
            value.push_str(t);
        }
        (tokens[0][..eq].to_owned(), value)
    } else if tokens.len() >= 2 {
        (tokens[0].clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("/set: missing value for '{}'", tokens[0]));
    };

    match name.as_str() {
        "loop_check_interval" => config.loop_check_interval = positive(&name, &value)?,
        "long_loop_threshold" => config.long_loop_threshold = number(&name, &value)?,
        "max_call_depth" => config.max_call_depth = positive(&name, &value)?,
        "eval_stack_mb" => config.eval_stack_mb = positive(&name, &value)?,
        "pause_poll_ms" => config.pause_poll_ms = positive(&name, &value)? as u64,
        "line_offset" => config.line_offset = number(&name, &value)?,
        "error_marker" => config.error_marker = value,
        "trace_variables" => config.trace_variables = flag(&name, &value)?,
        "" => return Err("/set: variable name cannot be empty".into()),
        other => return Err(format!("/set: unknown option '{other}'")),
    }
    Ok(())
}

fn number(name: &str, value: &str) -> Result<usize, String> {
    value
        .parse()
        .map_err(|_| format!("/set {name}: '{value}' is not a number"))
}

fn positive(name: &str, value: &str) -> Result<usize, String> {
    match number(name, value)? {
        0 => Err(format!("/set {name}: must be greater than 0")),
        n => Ok(n),
    }
}

fn flag(name: &str, value: &str) -> Result<bool, String> {
    match value {
        "on" | "1" | "true" | "yes" => Ok(true),
        "off" | "0" | "false" | "no" => Ok(false),
        _ => Err(format!("/set {name}: expected on or off, got '{value}'")),
    }
}

// ── /delimiters ──────────────────────────────────────────────────────────────

fn parse_delimiters(tokens: &[String], config: &mut EngineConfig) -> Result<(), String> {
    match tokens {
        [open, close] if !open.is_empty() && !close.is_empty() && open != close => {
            config.delimiters = Delimiters {
                open: open.clone(),
                close: close.clone(),
            };
            Ok(())
        }
        [_, _] => Err("/delimiters: tags must be non-empty and distinct".into()),
        _ => Err("/delimiters: expected <open> <close>".into()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // -- split_args -----------------------------------------------------------

    #[test]
    fn split_simple() {
        assert_eq!(split_args("foo bar baz"), ["foo", "bar", "baz"]);
    }

    #[test]
    fn split_quoted_spaces() {
        assert_eq!(split_args(r#""[[ oops ]]" 42"#), ["[[ oops ]]", "42"]);
    }

    #[test]
    fn split_escaped_quote_inside_quotes() {
        assert_eq!(split_args(r#""say \"hi\"""#), [r#"say "hi""#]);
    }

    #[test]
    fn split_keeps_empty_quoted() {
        assert_eq!(split_args(r#""" x"#), ["", "x"]);
    }

    // -- /set -----------------------------------------------------------------

    #[test]
    fn set_equals_syntax() {
        let (cfg, errs) = EngineConfig::load_str("/set loop_check_interval=25");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.loop_check_interval, 25);
        assert_eq!(cfg.interp_config().loop_check_interval, 25);
    }

    #[test]
    fn set_space_syntax() {
        let (cfg, errs) = EngineConfig::load_str("/set max_call_depth 64");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.max_call_depth, 64);
    }

    #[test]
    fn set_eval_stack() {
        let (cfg, errs) = EngineConfig::load_str("/set eval_stack_mb 128\n/set eval_stack_mb 0");
        assert_eq!(errs.len(), 1);
        assert_eq!(cfg.eval_stack_mb, 128);
    }

    #[test]
    fn set_value_with_spaces() {
        let (cfg, errs) = EngineConfig::load_str("/set error_marker <!-- failed: {} -->");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.error_marker("x is not defined"), "<!-- failed: x is not defined -->");
    }

    #[test]
    fn set_flag() {
        let (cfg, errs) = EngineConfig::load_str("/set trace_variables=off");
        assert!(errs.is_empty(), "{errs:?}");
        assert!(!cfg.trace_variables);
    }

    #[test]
    fn bad_values_are_reported_per_line() {
        let (cfg, errs) = EngineConfig::load_str(
            "/set pause_poll_ms=fast\n\
             /set loop_check_interval=0\n\
             /set colour=blue\n\
             /set max_call_depth=10",
        );
        let lines: Vec<_> = errs.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![1, 2, 3]);
        assert_eq!(cfg.pause_poll_ms, 50);
        assert_eq!(cfg.loop_check_interval, 100);
        assert_eq!(cfg.max_call_depth, 10);
        assert_eq!(errs[2].to_string(), "line 3: /set: unknown option 'colour'");
    }

    // -- /delimiters ----------------------------------------------------------

    #[test]
    fn delimiters_directive() {
        let (cfg, errs) = EngineConfig::load_str("/delimiters {{ }}");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.delimiters.open, "{{");
        assert_eq!(cfg.delimiters.close, "}}");
    }

    #[test]
    fn delimiters_must_differ() {
        let (cfg, errs) = EngineConfig::load_str("/delimiters %% %%");
        assert_eq!(errs.len(), 1);
        assert_eq!(cfg.delimiters, Delimiters::default());
    }

    // -- Comments & skipping --------------------------------------------------

    #[test]
    fn comments_and_blank_lines_ignored() {
        let (cfg, errs) = EngineConfig::load_str(
            ";; engine options\n\
             # also a comment\n\
             \n\
             /set line_offset=4",
        );
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.line_offset, 4);
    }

    #[test]
    fn unknown_commands_silently_skipped() {
        let (cfg, errs) = EngineConfig::load_str("/theme dark\n/set long_loop_threshold=10");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.long_loop_threshold, 10);
    }

    #[test]
    fn bare_text_is_an_error() {
        let (_, errs) = EngineConfig::load_str("loop_check_interval = 5");
        assert_eq!(errs.len(), 1);
    }

    #[test]
    fn load_file_reads_disk() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "/set pause_poll_ms=5\n/delimiters [% %]").unwrap();
        let (cfg, errs) = EngineConfig::load_file(f.path()).unwrap();
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.pause_poll_ms, 5);
        assert_eq!(cfg.delimiters.open, "[%");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EngineConfig::load_file(&dir.path().join("nope")).is_err());
    }
}
