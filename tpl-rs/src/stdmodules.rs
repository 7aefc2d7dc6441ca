//! The `tp.*` module set registered by the `tpl` binary.
//!
//! | Call | Kind | Result |
//! |------|------|--------|
//! | `tp.file.title` | pure property | file stem of the note |
//! | `tp.file.path` | pure property | path as given on the command line |
//! | `tp.date.now(format?, offset?)` | pure | formatted UTC date, `offset` in days |
//! | `tp.system.prompt(message, default?)` | interactive | one line of input |
//!
//! Date formats use the `YYYY-MM-DD` token style of note templates.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::modules::{CommandResult, FunctionMeta, ModuleRegistry};
use crate::script::Value;

pub const DEFAULT_DATE_FORMAT: &str = "YYYY-MM-DD";

type Input = Arc<Mutex<Box<dyn BufRead + Send>>>;

pub struct StdModules {
    path: PathBuf,
    /// Fixed clock in Unix seconds; the system clock when unset.
    now: Option<i64>,
    input: Option<Input>,
}

impl StdModules {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StdModules {
            path: path.into(),
            now: None,
            input: None,
        }
    }

    pub fn with_clock(mut self, unix_secs: i64) -> Self {
        self.now = Some(unix_secs);
        self
    }

    /// Read prompt answers from `reader` instead of stdin.
    pub fn with_input(mut self, reader: impl BufRead + Send + 'static) -> Self {
        self.input = Some(Arc::new(Mutex::new(Box::new(reader))));
        self
    }

    pub fn build(self) -> ModuleRegistry {
        let title = note_title(&self.path);
        let path = self.path.display().to_string();
        let now = self.now;
        let input = self.input;

        ModuleRegistry::new()
            .with("file", "title", FunctionMeta::pure("file name without extension").property(), move |_| {
                CommandResult::Ok(Value::str(title.clone()))
            })
            .with("file", "path", FunctionMeta::pure("path of the note").property(), move |_| {
                CommandResult::Ok(Value::str(path.clone()))
            })
            .with("date", "now", FunctionMeta::pure("current date, optionally offset by days"), move |args| {
                date_now(args, now.unwrap_or_else(unix_now))
            })
            .with("system", "prompt", FunctionMeta::effectful("ask the user for a line of text"), move |args| {
                prompt(args, input.as_ref())
            })
    }
}

fn note_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

// ── tp.date ───────────────────────────────────────────────────────────────────

fn date_now(args: &[Value], now: i64) -> CommandResult {
    let format = match args.first() {
        None | Some(Value::Undefined) | Some(Value::Null) => DEFAULT_DATE_FORMAT.to_owned(),
        Some(v) => v.to_display(),
    };
    let offset = match args.get(1) {
        None | Some(Value::Undefined) | Some(Value::Null) => 0.0,
        Some(v) => v.to_number(),
    };
    if !offset.is_finite() {
        return CommandResult::Err(format!("invalid day offset {}", args[1].to_display()));
    }
    let secs = now + (offset.trunc() as i64) * 86_400;
    CommandResult::Ok(Value::str(format_date(&format, secs)))
}

/// Broken-down UTC time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Civil {
    year: i64,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    /// 0 = Sunday.
    weekday: u32,
}

impl Civil {
    fn from_unix(secs: i64) -> Self {
        let day_secs = secs.rem_euclid(86_400) as u32;
        let days = secs.div_euclid(86_400);
        let (year, month, day) = civil_from_days(days);
        Civil {
            year,
            month,
            day,
            hour: day_secs / 3600,
            minute: (day_secs % 3600) / 60,
            second: day_secs % 60,
            // 1970-01-01 was a Thursday.
            weekday: (days + 4).rem_euclid(7) as u32,
        }
    }
}

/// Days since the epoch to (year, month 1-12, day 1-31).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let mo = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = yoe as i64 + era * 400 + i64::from(mo <= 2);
    (y, mo, d)
}

const MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June",
    "July", "August", "September", "October", "November", "December",
];
const DAYS: [&str; 7] = ["Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday"];

/// Longest tokens first so `MMMM` wins over `MM`.
const TOKENS: [&str; 14] = [
    "YYYY", "MMMM", "dddd", "MMM", "ddd", "YY", "MM", "DD", "HH", "mm", "ss", "M", "D", "A",
];

/// Expand date tokens; `[...]` escapes literal text.
pub fn format_date(format: &str, unix_secs: i64) -> String {
    let t = Civil::from_unix(unix_secs);
    let mut out = String::with_capacity(format.len() + 8);
    let mut rest = format;

    while let Some(c) = rest.chars().next() {
        if c == '[' {
            if let Some(end) = rest.find(']') {
                out.push_str(&rest[1..end]);
                rest = &rest[end + 1..];
                continue;
            }
        }
        let Some(tok) = TOKENS.iter().find(|tok| rest.starts_with(**tok)) else {
            out.push(c);
            rest = &rest[c.len_utf8()..];
            continue;
        };
        match *tok {
            "YYYY" => out.push_str(&format!("{:04}", t.year)),
            "YY" => out.push_str(&format!("{:02}", t.year.rem_euclid(100))),
            "MMMM" => out.push_str(MONTHS[t.month as usize - 1]),
            "MMM" => out.push_str(&MONTHS[t.month as usize - 1][..3]),
            "MM" => out.push_str(&format!("{:02}", t.month)),
            "M" => out.push_str(&t.month.to_string()),
            "DD" => out.push_str(&format!("{:02}", t.day)),
            "D" => out.push_str(&t.day.to_string()),
            "dddd" => out.push_str(DAYS[t.weekday as usize]),
            "ddd" => out.push_str(&DAYS[t.weekday as usize][..3]),
            "HH" => out.push_str(&format!("{:02}", t.hour)),
            "mm" => out.push_str(&format!("{:02}", t.minute)),
            "ss" => out.push_str(&format!("{:02}", t.second)),
            "A" => out.push_str(if t.hour < 12 { "AM" } else { "PM" }),
            _ => out.push_str(tok),
        }
        rest = &rest[tok.len()..];
    }
    out
}

// ── tp.system ─────────────────────────────────────────────────────────────────

/// End of input cancels the render; an empty answer takes the default when
/// one is given and cancels otherwise.
fn prompt(args: &[Value], input: Option<&Input>) -> CommandResult {
    let message = args.first().map(Value::to_display).unwrap_or_default();
    let default = args
        .get(1)
        .filter(|v| !matches!(v, Value::Undefined | Value::Null))
        .map(Value::to_display);

    let mut stderr = io::stderr();
    let _ = match &default {
        Some(d) => write!(stderr, "{message} [{d}]: "),
        None => write!(stderr, "{message}: "),
    };
    let _ = stderr.flush();

    let mut line = String::new();
    let read = match input {
        Some(reader) => reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read_line(&mut line),
        None => io::stdin().lock().read_line(&mut line),
    };
    match read {
        Ok(0) => {
            debug!(%message, "prompt reached end of input");
            CommandResult::Cancelled
        }
        Ok(_) => {
            let answer = line.trim_end_matches(['\r', '\n']);
            match (answer.is_empty(), default) {
                (false, _) => CommandResult::Ok(Value::str(answer)),
                (true, Some(d)) => CommandResult::Ok(Value::str(d)),
                (true, None) => CommandResult::Cancelled,
            }
        }
        Err(e) => CommandResult::Err(format!("cannot read input: {e}")),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::PurityOracle;
    use std::io::Cursor;

    // 2024-02-29 13:05:09 UTC, a Thursday.
    const LEAP_DAY: i64 = 1_709_211_909;

    fn modules(input: &str) -> ModuleRegistry {
        StdModules::new("notes/Weekly Review.md")
            .with_clock(LEAP_DAY)
            .with_input(Cursor::new(input.to_owned()))
            .build()
    }

    #[test]
    fn file_properties() {
        let r = modules("");
        assert_eq!(r.execute("file", "title", &[]), CommandResult::Ok(Value::str("Weekly Review")));
        assert_eq!(
            r.execute("file", "path", &[]),
            CommandResult::Ok(Value::str("notes/Weekly Review.md"))
        );
        assert!(r.meta("file", "title").unwrap().property);
        assert_eq!(r.is_pure("file", "path"), Some(true));
    }

    #[test]
    fn date_tokens() {
        assert_eq!(format_date("YYYY-MM-DD", LEAP_DAY), "2024-02-29");
        assert_eq!(format_date("dddd, MMMM D", LEAP_DAY), "Thursday, February 29");
        assert_eq!(format_date("ddd MMM YY HH:mm:ss A", LEAP_DAY), "Thu Feb 24 13:05:09 PM");
        assert_eq!(format_date("[Week of] M/D", LEAP_DAY), "Week of 2/29");
        assert_eq!(format_date("YYYY-MM-DD", 0), "1970-01-01");
    }

    #[test]
    fn date_now_with_offset() {
        let r = modules("");
        assert_eq!(r.execute("date", "now", &[]), CommandResult::Ok(Value::str("2024-02-29")));
        assert_eq!(
            r.execute("date", "now", &[Value::str("YYYY-MM-DD"), Value::Number(1.0)]),
            CommandResult::Ok(Value::str("2024-03-01"))
        );
        assert_eq!(
            r.execute("date", "now", &[Value::Undefined, Value::Number(-366.0)]),
            CommandResult::Ok(Value::str("2023-02-28"))
        );
        assert!(matches!(
            r.execute("date", "now", &[Value::str("YYYY"), Value::str("soon")]),
            CommandResult::Err(_)
        ));
    }

    #[test]
    fn prompt_answers_defaults_and_cancel() {
        let r = modules("Ada\n\n");
        let ask = |args: &[Value]| r.execute("system", "prompt", args);
        assert_eq!(ask(&[Value::str("Name")]), CommandResult::Ok(Value::str("Ada")));
        assert_eq!(
            ask(&[Value::str("Role"), Value::str("author")]),
            CommandResult::Ok(Value::str("author"))
        );
        assert_eq!(ask(&[Value::str("More")]), CommandResult::Cancelled);
        assert_eq!(r.is_pure("system", "prompt"), Some(false));
    }

    #[test]
    fn empty_answer_without_default_cancels() {
        let r = modules("\n");
        assert_eq!(r.execute("system", "prompt", &[Value::str("Name")]), CommandResult::Cancelled);
    }
}
