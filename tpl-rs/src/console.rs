//! Line-oriented front end for `tpl debug`.
//!
//! | Input | Effect |
//! |-------|--------|
//! | `c`, `continue` | run to the next breakpoint |
//! | `s`, `step` | step into |
//! | `n`, `next` | step over |
//! | `o`, `out` | step out |
//! | `q`, `stop` | finish without pausing again |
//! | `b <line>` / `d <line>` | add / remove a breakpoint |
//! | `bl` | list breakpoints |
//! | `v`, `vars` | every visible variable |
//! | `p <name>` | one variable |
//! | `set <name> <json>` | assign a variable |
//! | `h`, `?` | this table |

use std::io::{self, Write};

use crossterm::queue;
use crossterm::style::{Color, ContentStyle, Print, ResetColor, SetStyle, Stylize};

use crate::debug::{ExecutionStep, ResumeAction, SnapshotValue};

pub const HELP: &str = "\
c continue | s step | n next | o out | q stop
b <line> | d <line> | bl | v | p <name> | set <name> <json> | h";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Resume(ResumeAction),
    Break(usize),
    Clear(usize),
    ListBreakpoints,
    Vars,
    Print(String),
    Set(String, SnapshotValue),
    Help,
    /// Blank line: repeat the previous resume action.
    Repeat,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(w, r)| (w, r.trim()));

        let no_args = |cmd: ConsoleCommand| {
            if rest.is_empty() {
                Ok(cmd)
            } else {
                Err(format!("{word}: takes no arguments"))
            }
        };
        let line_arg = || {
            rest.parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| format!("{word}: expected a line number"))
        };

        match word {
            "" => Ok(ConsoleCommand::Repeat),
            "c" | "continue" => no_args(ConsoleCommand::Resume(ResumeAction::Continue)),
            "s" | "step" => no_args(ConsoleCommand::Resume(ResumeAction::StepInto)),
            "n" | "next" => no_args(ConsoleCommand::Resume(ResumeAction::StepOver)),
            "o" | "out" => no_args(ConsoleCommand::Resume(ResumeAction::StepOut)),
            "q" | "stop" => no_args(ConsoleCommand::Resume(ResumeAction::Stop)),
            "b" | "break" => line_arg().map(ConsoleCommand::Break),
            "d" | "delete" => line_arg().map(ConsoleCommand::Clear),
            "bl" => no_args(ConsoleCommand::ListBreakpoints),
            "v" | "vars" => no_args(ConsoleCommand::Vars),
            "h" | "help" | "?" => no_args(ConsoleCommand::Help),
            "p" | "print" if !rest.is_empty() => Ok(ConsoleCommand::Print(rest.to_owned())),
            "set" => {
                let (name, json) = rest
                    .split_once(char::is_whitespace)
                    .ok_or("set: expected <name> <json>")?;
                let json: serde_json::Value = serde_json::from_str(json.trim())
                    .map_err(|e| format!("set: {e}"))?;
                Ok(ConsoleCommand::Set(name.to_owned(), SnapshotValue::from(json)))
            }
            other => Err(format!("unknown command '{other}' (h for help)")),
        }
    }
}

// ── Output ────────────────────────────────────────────────────────────────────

pub struct Console<W: Write> {
    out: W,
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Console { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Pause banner: location, statement kind and source.
    pub fn show_step(&mut self, step: &ExecutionStep) -> io::Result<()> {
        let banner = ContentStyle::new().with(Color::Yellow).bold();
        queue!(
            self.out,
            SetStyle(banner),
            Print(format!("paused at line {}", step.display_line)),
            ResetColor,
            Print(format!(
                " [{:?}, depth {}, step {}]\n",
                step.statement_type, step.call_depth, step.index
            )),
            SetStyle(ContentStyle::new().with(Color::Cyan)),
            Print(format!("  {}\n", step.code)),
            ResetColor,
        )?;
        self.out.flush()
    }

    pub fn show_vars(&mut self, step: &ExecutionStep) -> io::Result<()> {
        if step.variables.is_empty() {
            return self.note("no variables captured");
        }
        for v in &step.variables {
            self.show_var(&v.name, &v.value)?;
        }
        self.out.flush()
    }

    pub fn show_var(&mut self, name: &str, value: &SnapshotValue) -> io::Result<()> {
        queue!(
            self.out,
            SetStyle(ContentStyle::new().with(Color::Green)),
            Print(format!("  {name}")),
            ResetColor,
            Print(format!(" = {}\n", value.render())),
        )
    }

    pub fn note(&mut self, msg: &str) -> io::Result<()> {
        queue!(self.out, Print(format!("{msg}\n")))?;
        self.out.flush()
    }

    pub fn error(&mut self, msg: &str) -> io::Result<()> {
        queue!(
            self.out,
            SetStyle(ContentStyle::new().with(Color::Red)),
            Print(format!("{msg}\n")),
            ResetColor,
        )?;
        self.out.flush()
    }

    pub fn prompt(&mut self) -> io::Result<()> {
        queue!(self.out, Print("(tpl) ".dim()))?;
        self.out.flush()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
