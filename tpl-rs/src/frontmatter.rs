//! Document metadata: the leading `---` block.
//!
//! ```text
//! ---
//! title: "Weekly review"
//! tags: [work, review]
//! due: 2024-03-01
//! owner:
//!   name: Sam
//!   teams:
//!     - core
//!     - infra
//! ---
//! ```
//!
//! The block is YAML, read with `serde_yaml` and kept as JSON values so
//! scripts see the same shapes module results use.  Timestamps stay strings;
//! non-string map keys are stringified.

use serde_json::{Map, Value as Json};
use serde_yaml::Value as Yaml;

use crate::error::ParseError;
use crate::modules::FrontmatterSource;

const FENCE: &str = "---";

// ── Splitting ─────────────────────────────────────────────────────────────────

/// Separate the frontmatter block from the body.
///
/// Returns the raw metadata text (without fences), the body, and the number
/// of lines the block occupied including both fences.  A document without a
/// closed leading fence has no frontmatter and offset 0.
pub fn split(doc: &str) -> (Option<&str>, &str, usize) {
    let first_end = doc.find('\n').unwrap_or(doc.len());
    if doc[..first_end].trim_end() != FENCE {
        return (None, doc, 0);
    }
    let mut pos = (first_end + 1).min(doc.len());
    let mut lines = 1;
    while pos < doc.len() {
        let end = doc[pos..].find('\n').map_or(doc.len(), |i| pos + i);
        lines += 1;
        if doc[pos..end].trim_end() == FENCE {
            let body_start = (end + 1).min(doc.len());
            return (Some(&doc[first_end + 1..pos]), &doc[body_start..], lines);
        }
        pos = end + 1;
    }
    (None, doc, 0)
}

// ── Frontmatter ───────────────────────────────────────────────────────────────

/// Parsed metadata, resolvable by dotted path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    root: Map<String, Json>,
}

impl Frontmatter {
    /// Split `doc` and parse its metadata block.  Returns the metadata (empty
    /// when absent), the body and the line offset.
    pub fn from_document(doc: &str) -> Result<(Frontmatter, &str, usize), ParseError> {
        let (meta, body, offset) = split(doc);
        let fm = match meta {
            // The block starts on line 2, after the opening fence.
            Some(text) => Frontmatter::parse_at(text, 1)?,
            None => Frontmatter::default(),
        };
        Ok((fm, body, offset))
    }

    pub fn parse(text: &str) -> Result<Frontmatter, ParseError> {
        Self::parse_at(text, 0)
    }

    fn parse_at(text: &str, line_base: usize) -> Result<Frontmatter, ParseError> {
        if text.trim().is_empty() {
            return Ok(Frontmatter::default());
        }
        let yaml: Yaml = serde_yaml::from_str(text).map_err(|e| {
            let (line, column) = e.location().map_or((1, 1), |l| (l.line(), l.column()));
            ParseError::new(line_base + line, column, format!("frontmatter: {e}"))
        })?;
        match to_json(yaml) {
            Json::Object(root) => Ok(Frontmatter { root }),
            Json::Null => Ok(Frontmatter::default()),
            _ => Err(ParseError::new(line_base + 1, 1, "frontmatter must be a mapping")),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Json> {
        self.root.get(key)
    }

    pub fn to_json(&self) -> Json {
        Json::Object(self.root.clone())
    }
}

impl FrontmatterSource for Frontmatter {
    fn resolve(&self, path: &str) -> Option<Json> {
        if path.is_empty() {
            return Some(self.to_json());
        }
        let mut parts = path.split('.');
        let mut cur = self.root.get(parts.next()?)?;
        for part in parts {
            cur = match cur {
                Json::Object(m) => m.get(part)?,
                Json::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur.clone())
    }
}

// ── YAML conversion ───────────────────────────────────────────────────────────

fn to_json(value: Yaml) -> Json {
    match value {
        Yaml::Null => Json::Null,
        Yaml::Bool(b) => Json::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Json::from(i)
            } else if let Some(u) = n.as_u64() {
                Json::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(Json::Null, Json::Number)
            }
        }
        Yaml::String(s) => Json::String(s),
        Yaml::Sequence(items) => Json::Array(items.into_iter().map(to_json).collect()),
        Yaml::Mapping(map) => Json::Object(
            map.into_iter()
                .map(|(k, v)| (key_string(k), to_json(v)))
                .collect(),
        ),
        Yaml::Tagged(tagged) => to_json(tagged.value),
    }
}

fn key_string(key: Yaml) -> String {
    match key {
        Yaml::String(s) => s,
        Yaml::Null => "null".to_owned(),
        Yaml::Bool(b) => b.to_string(),
        Yaml::Number(n) => n.to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_owned())
            .unwrap_or_default(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOC: &str = "---\n\
title: \"Weekly review\"\n\
tags: [work, review]\n\
count: 3\n\
ratio: 0.5\n\
draft: false\n\
owner:\n  name: Sam\n  teams:\n    - core\n    - infra\n\
---\nBody <% tp.frontmatter.title %>\n";

    #[test]
    fn split_reports_line_offset() {
        let (meta, body, offset) = split(DOC);
        assert!(meta.unwrap().starts_with("title:"));
        assert_eq!(body, "Body <% tp.frontmatter.title %>\n");
        assert_eq!(offset, 12);
    }

    #[test]
    fn no_frontmatter() {
        assert_eq!(split("plain\n---\n"), (None, "plain\n---\n", 0));
        assert_eq!(split("---\nunclosed: true\n"), (None, "---\nunclosed: true\n", 0));
    }

    #[test]
    fn parses_scalars_and_nesting() {
        let (fm, _, _) = Frontmatter::from_document(DOC).unwrap();
        assert_eq!(
            fm.to_json(),
            json!({
                "title": "Weekly review",
                "tags": ["work", "review"],
                "count": 3,
                "ratio": 0.5,
                "draft": false,
                "owner": {"name": "Sam", "teams": ["core", "infra"]}
            })
        );
    }

    #[test]
    fn resolves_dotted_paths() {
        let (fm, _, _) = Frontmatter::from_document(DOC).unwrap();
        assert_eq!(fm.resolve("owner.name"), Some(json!("Sam")));
        assert_eq!(fm.resolve("owner.teams.1"), Some(json!("infra")));
        assert_eq!(fm.resolve("tags.0"), Some(json!("work")));
        assert_eq!(fm.resolve("owner.missing"), None);
        assert_eq!(fm.resolve("").unwrap()["count"], json!(3));
    }

    #[test]
    fn list_of_maps_and_same_indent_lists() {
        let fm = Frontmatter::parse(
            "people:\n- name: Ana\n  role: lead\n- name: Bo\nempty:\nurl: http://x.io/a # link\n",
        )
        .unwrap();
        assert_eq!(
            fm.to_json(),
            json!({
                "people": [{"name": "Ana", "role": "lead"}, {"name": "Bo"}],
                "empty": null,
                "url": "http://x.io/a"
            })
        );
    }

    #[test]
    fn inline_collections() {
        let fm = Frontmatter::parse("a: {x: 1, y: [2, 'three, four']}\nb: []\nc: ~\n").unwrap();
        assert_eq!(
            fm.to_json(),
            json!({"a": {"x": 1, "y": [2, "three, four"]}, "b": [], "c": null})
        );
    }

    #[test]
    fn comment_only_block_is_empty() {
        let (fm, body, offset) = Frontmatter::from_document("---\n# nothing yet\n---\nx").unwrap();
        assert!(fm.is_empty());
        assert_eq!(body, "x");
        assert_eq!(offset, 3);
    }

    #[test]
    fn non_string_keys_and_dates() {
        let fm = Frontmatter::parse("2024: leap\ndue: 2024-03-01\n").unwrap();
        assert_eq!(fm.get("2024"), Some(&json!("leap")));
        assert_eq!(fm.get("due"), Some(&json!("2024-03-01")));
    }

    #[test]
    fn malformed_block_is_reported_below_the_fence() {
        let err = Frontmatter::from_document("---\ntitle: ok\ntags: [a, b\n---\n").unwrap_err();
        assert!(err.line >= 2, "line {}", err.line);
        assert!(err.message.starts_with("frontmatter:"));
        assert!(Frontmatter::parse("- just\n- a list\n").is_err());
    }
}
