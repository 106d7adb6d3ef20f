//! The platform directive mini-language.
//!
//! A directive selects which platforms take part in a pipeline run and how
//! they pair up:
//!
//! ```text
//! directive := group (WS group)*
//! group     := left (':' right)?
//! left      := item (',' item)*
//! right     := item (',' item)*
//! ```
//!
//! Every item on the left of a group is linked to every item on the right, in
//! both directions. A group without a colon names platforms with no links.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DirectiveError;

/// How a colon-less group treats a platform that earlier groups already linked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColonlessGroup {
    /// Replace the platform's accumulated links with an empty set.
    #[default]
    Reset,
    /// Keep accumulated links; only ensure the platform is present.
    Merge,
}

/// Parsed directive: platform name to the set of platforms linked to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Directive {
    links: BTreeMap<String, BTreeSet<String>>,
}

impl Directive {
    /// Parse with the default [`ColonlessGroup::Reset`] semantics.
    pub fn parse(input: &str) -> Result<Self, DirectiveError> {
        Self::parse_with(input, ColonlessGroup::default())
    }

    /// Parse with explicit colon-less group semantics.
    pub fn parse_with(input: &str, colonless: ColonlessGroup) -> Result<Self, DirectiveError> {
        let mut links: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for group in input.split_whitespace() {
            let sides: Vec<&str> = group.split(':').collect();
            match sides.as_slice() {
                [left] => {
                    for item in split_items(left, group)? {
                        match colonless {
                            ColonlessGroup::Reset => {
                                links.insert(item.to_string(), BTreeSet::new());
                            }
                            ColonlessGroup::Merge => {
                                links.entry(item.to_string()).or_default();
                            }
                        }
                    }
                }
                [left, right] => {
                    let left = split_items(left, group)?;
                    let right = split_items(right, group)?;
                    for l in &left {
                        for r in &right {
                            links
                                .entry(l.to_string())
                                .or_default()
                                .insert(r.to_string());
                            links
                                .entry(r.to_string())
                                .or_default()
                                .insert(l.to_string());
                        }
                    }
                }
                _ => {
                    return Err(DirectiveError::TooManyColons {
                        group: group.to_string(),
                    })
                }
            }
        }

        Ok(Self { links })
    }

    /// Whether `platform` is named anywhere in the directive.
    pub fn contains(&self, platform: &str) -> bool {
        self.links.contains_key(platform)
    }

    /// Platforms linked to `platform`, if it is named.
    pub fn links(&self, platform: &str) -> Option<&BTreeSet<String>> {
        self.links.get(platform)
    }

    /// All named platforms in sorted order.
    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.links
    }
}

/// Parse a directive string with default semantics.
pub fn parse_directive(input: &str) -> Result<Directive, DirectiveError> {
    Directive::parse(input)
}

/// Extract the directive embedded in a commit message as `[ci <directive>]`.
pub fn extract_commit_tag(message: &str) -> Option<&str> {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let re = TAG.get_or_init(|| Regex::new(r"\[ *ci (.*) *\]").expect("static regex is valid"));
    re.captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

fn split_items<'a>(side: &'a str, group: &str) -> Result<Vec<&'a str>, DirectiveError> {
    side.split(',')
        .map(str::trim)
        .map(|item| {
            if item.is_empty() {
                Err(DirectiveError::EmptyItem {
                    group: group.to_string(),
                })
            } else {
                Ok(item)
            }
        })
        .collect()
}
