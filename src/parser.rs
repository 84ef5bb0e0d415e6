//! Awesome-list markdown parsing.
//!
//! A list is a sequence of headings, each followed by bullet lists whose items
//! link to a project. Parsers turn that into categories of items; profiles are
//! the default parser with list-specific heading rules.

use std::collections::HashMap;

use anyhow::Result;
use once_cell::sync::Lazy;
use pulldown_cmark::{Event, Parser as MarkdownParser, Tag, TagEnd};
use regex::Regex;
use serde::Deserialize;

const DEFAULT_HEADING_DEPTHS: &[u8] = &[2, 3];

/// "Name - description" / "Name: description" separators
static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s[-:]\s(.+)").expect("valid regex"));

/// Leading separator left after stripping the link text
static LEADING_SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-:|]+\s*").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedItem {
    pub name: String,
    pub url: String,
    pub description: String,
    pub stars: Option<u64>,
    pub last_commit_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCategory {
    pub title: String,
    pub depth: u8,
    pub items: Vec<ParsedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedList {
    pub title: Option<String>,
    pub header: Option<String>,
    pub toc: bool,
    pub categories: Vec<ParsedCategory>,
}

/// Per-list parsing options (also the `parserOptions` config block)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ParserOptions {
    pub heading_depths: Option<Vec<u8>>,
    pub ignore_headings: Option<Vec<String>>,
}

impl ParserOptions {
    /// Layer `overrides` on top of `self`: depths are replaced, ignored
    /// headings accumulate
    pub fn merge(&self, overrides: &ParserOptions) -> ParserOptions {
        let ignore_headings = match (&self.ignore_headings, &overrides.ignore_headings) {
            (None, None) => None,
            (base, extra) => Some(
                base.iter()
                    .flatten()
                    .chain(extra.iter().flatten())
                    .cloned()
                    .collect(),
            ),
        };

        ParserOptions {
            heading_depths: overrides
                .heading_depths
                .clone()
                .or_else(|| self.heading_depths.clone()),
            ignore_headings,
        }
    }
}

pub trait ListParser: Send + Sync {
    fn id(&self) -> &str;
    fn parse(&self, markdown: &str, options: &ParserOptions) -> ParsedList;
}

/// Heading-driven parser shared by every profile
pub struct DefaultParser;

impl ListParser for DefaultParser {
    fn id(&self) -> &str {
        "default"
    }

    fn parse(&self, markdown: &str, options: &ParserOptions) -> ParsedList {
        parse_markdown(markdown, options)
    }
}

/// Default parser with baked-in options for a specific list
pub struct ProfileParser {
    id: String,
    defaults: ParserOptions,
}

impl ProfileParser {
    pub fn new(id: impl Into<String>, defaults: ParserOptions) -> Self {
        Self {
            id: id.into(),
            defaults,
        }
    }
}

impl ListParser for ProfileParser {
    fn id(&self) -> &str {
        &self.id
    }

    fn parse(&self, markdown: &str, options: &ParserOptions) -> ParsedList {
        parse_markdown(markdown, &self.defaults.merge(options))
    }
}

#[derive(Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Box<dyn ListParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the default parser and all built-in profiles
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let builtin: Vec<Box<dyn ListParser>> = vec![
            Box::new(DefaultParser),
            Box::new(ProfileParser::new(
                "awesome-rust",
                profile_options(&[2, 3], &["Table of contents"]),
            )),
            Box::new(ProfileParser::new(
                "awesome-zig",
                profile_options(&[2, 3], &["Contents"]),
            )),
            Box::new(ProfileParser::new(
                "awesome-postgres",
                profile_options(&[3], &["Contents"]),
            )),
        ];
        for parser in builtin {
            registry.parsers.insert(parser.id().to_string(), parser);
        }
        registry
    }

    pub fn register(&mut self, parser: Box<dyn ListParser>) -> Result<()> {
        let id = parser.id().to_string();
        if self.parsers.contains_key(&id) {
            anyhow::bail!("Parser already registered: {}", id);
        }
        self.parsers.insert(id, parser);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&dyn ListParser> {
        self.parsers
            .get(id)
            .map(|p| p.as_ref())
            .ok_or_else(|| anyhow::anyhow!("Unknown parser: {}", id))
    }
}

fn profile_options(depths: &[u8], ignore: &[&str]) -> ParserOptions {
    ParserOptions {
        heading_depths: Some(depths.to_vec()),
        ignore_headings: Some(ignore.iter().map(|s| s.to_string()).collect()),
    }
}

/// In-progress top-level list item
#[derive(Default)]
struct ItemBuilder {
    /// Item text outside nested lists
    text: String,
    link_url: Option<String>,
    link_text: String,
    in_first_link: bool,
}

impl ItemBuilder {
    fn finish(self) -> Option<ParsedItem> {
        let url = self.link_url?;
        let name = collapse_whitespace(&self.link_text);
        if url.is_empty() || name.is_empty() {
            return None;
        }
        let description = extract_description(&collapse_whitespace(&self.text), &name);
        Some(ParsedItem {
            name,
            url,
            description,
            stars: None,
            last_commit_at: None,
        })
    }
}

fn parse_markdown(markdown: &str, options: &ParserOptions) -> ParsedList {
    let depths = options
        .heading_depths
        .as_deref()
        .unwrap_or(DEFAULT_HEADING_DEPTHS);
    let ignored: Vec<String> = options
        .ignore_headings
        .iter()
        .flatten()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let mut list = ParsedList::default();
    // Index into list.categories that items currently go to
    let mut current: Option<usize> = None;

    let mut heading: Option<(u8, String)> = None;
    let mut list_depth = 0usize;
    let mut item: Option<ItemBuilder> = None;

    for event in MarkdownParser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                heading = Some((level as u8, String::new()));
            }
            Event::End(TagEnd::Heading(_)) => {
                let Some((depth, text)) = heading.take() else {
                    continue;
                };
                let text = collapse_whitespace(&text);
                if depth == 1 && list.title.is_none() {
                    list.title = Some(text.clone());
                }
                if depths.contains(&depth) {
                    if ignored.contains(&text.to_lowercase()) {
                        current = None;
                    } else {
                        list.categories.push(ParsedCategory {
                            title: text,
                            depth,
                            items: Vec::new(),
                        });
                        current = Some(list.categories.len() - 1);
                    }
                }
            }
            Event::Start(Tag::List(_)) => {
                list_depth += 1;
            }
            Event::End(TagEnd::List(_)) => {
                list_depth = list_depth.saturating_sub(1);
            }
            Event::Start(Tag::Item) if list_depth == 1 && current.is_some() => {
                item = Some(ItemBuilder::default());
            }
            Event::End(TagEnd::Item) if list_depth == 1 => {
                if let (Some(builder), Some(idx)) = (item.take(), current) {
                    if let Some(parsed) = builder.finish() {
                        list.categories[idx].items.push(parsed);
                    }
                }
            }
            Event::Start(Tag::Link { dest_url, .. }) => {
                if let Some(builder) = item.as_mut() {
                    if builder.link_url.is_none() {
                        builder.link_url = Some(dest_url.to_string());
                        builder.in_first_link = true;
                    }
                }
            }
            Event::End(TagEnd::Link) => {
                if let Some(builder) = item.as_mut() {
                    builder.in_first_link = false;
                }
            }
            Event::Text(text) | Event::Code(text) => {
                push_text(&mut heading, &mut item, list_depth, &text);
            }
            Event::SoftBreak | Event::HardBreak => {
                push_text(&mut heading, &mut item, list_depth, " ");
            }
            _ => {}
        }
    }

    list
}

fn push_text(heading: &mut Option<(u8, String)>, item: &mut Option<ItemBuilder>, list_depth: usize, text: &str) {
    if let Some((_, buf)) = heading.as_mut() {
        buf.push_str(text);
        return;
    }
    if let Some(builder) = item.as_mut() {
        if builder.in_first_link {
            builder.link_text.push_str(text);
        }
        // Nested sub-lists belong to the item but not to its description
        if list_depth == 1 {
            builder.text.push_str(text);
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Description is whatever follows the link name, or the text after the first
/// " - " / " : " separator
fn extract_description(text: &str, link_text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    if let Some(prefix) = text.get(..link_text.len()) {
        if prefix.to_lowercase() == link_text.to_lowercase() {
            let rest = text[link_text.len()..].trim();
            return LEADING_SEPARATOR_RE.replace(rest, "").trim().to_string();
        }
    }

    SEPARATOR_RE
        .captures(text)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}
