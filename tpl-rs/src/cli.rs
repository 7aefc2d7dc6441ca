//! Command-line argument parsing.
//!
//! Usage:
//!   tpl [-c<config>] [-vqjs] [-b<line>]... render|plan|ast|debug <file>

use std::path::PathBuf;

use directories::ProjectDirs;

pub const USAGE: &str = "Usage: tpl [-c<config>] [-vqjs] [-b<line>]... render|plan|ast|debug <file>";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Which config file to load.
    pub config: ConfigFile,
    /// Each `-v` raises the log level one step.
    pub verbose: u8,
    /// Warnings and errors only (`-q`).
    pub quiet: bool,
    /// Machine-readable output (`-j`).
    pub json: bool,
    /// Breakpoint lines for `debug` (`-b<line>`, repeatable).
    pub breakpoints: Vec<usize>,
    /// Pause before the first statement (`-s`).
    pub step: bool,
    pub command: Command,
    pub file: PathBuf,
}

/// How to choose the config file.
#[derive(Debug, Default)]
pub enum ConfigFile {
    /// The per-user config dir, then `./.tplrc` (default).
    #[default]
    Search,
    /// `-c` with no file argument: defaults only.
    Skip,
    /// `-c<file>`: load this specific file.
    Explicit(PathBuf),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Print the rendered document.
    #[default]
    Render,
    /// Print the phased execution plan.
    Plan,
    /// Print statements and control-flow edges.
    Ast,
    /// Render under the interactive debugger.
    Debug,
}

impl Command {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "render" => Command::Render,
            "plan" => Command::Plan,
            "ast" => Command::Ast,
            "debug" => Command::Debug,
            _ => return None,
        })
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(&raw[1..])
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing.
        if arg == "--" {
            i += 1;
            positional.extend(argv[i..].iter().cloned());
            break;
        }

        if !arg.starts_with('-') || arg == "-" {
            positional.push(arg.to_owned());
            i += 1;
            continue;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'v' => args.verbose = args.verbose.saturating_add(1),
                'q' => args.quiet = true,
                'j' => args.json = true,
                's' => args.step = true,

                // -c[<file>]
                'c' => {
                    if j + 1 < chars.len() {
                        let file: String = chars[j + 1..].iter().collect();
                        args.config = ConfigFile::Explicit(PathBuf::from(file));
                        j = chars.len();
                    } else if i + 1 < argv.len()
                        && !argv[i + 1].starts_with('-')
                        && Command::parse(&argv[i + 1]).is_none()
                    {
                        i += 1;
                        args.config = ConfigFile::Explicit(PathBuf::from(&argv[i]));
                    } else {
                        args.config = ConfigFile::Skip;
                    }
                }

                // -b<line>
                'b' => {
                    let line = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err("-b requires a line number".to_owned());
                    };
                    let line: usize = line
                        .parse()
                        .ok()
                        .filter(|&n| n > 0)
                        .ok_or_else(|| format!("invalid line number: {line}"))?;
                    args.breakpoints.push(line);
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    match positional.len() {
        0 | 1 => return Err("expected a command and a file".to_owned()),
        2 => {
            args.command = Command::parse(&positional[0])
                .ok_or_else(|| format!("unknown command: {}", positional[0]))?;
            args.file = PathBuf::from(positional.remove(1));
        }
        n => return Err(format!("too many arguments ({n})")),
    }

    Ok(args)
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Search for the user config file in the standard locations.
/// Returns the first path that exists, or `None`.
pub fn find_user_config() -> Option<PathBuf> {
    ProjectDirs::from("", "", "tpl")
        .map(|dirs| dirs.config_dir().join("config"))
        .into_iter()
        .chain(std::iter::once(PathBuf::from("./.tplrc")))
        .find(|p| p.exists())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
