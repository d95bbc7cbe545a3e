//! Release title parsing
//!
//! Turns human-authored release titles such as
//! `[SubsPlease] Sousou no Frieren - 01 (1080p) [F02B9CEE].mkv` into a
//! [`ParsedRelease`]. Parsing fails closed: a title missing any field is
//! rejected as a whole, because a wrong automatic match is worse than a
//! skipped release.
//!
//! Resolution markers are searched in a fixed order:
//! 1. bracketed markers anywhere in the title (`[1080p]`, `[1920x1080]`)
//! 2. parenthesised markers (`(1080p)`, `(1920x1080)`) present in both the
//!    title and the episode name; the marker is cut out of the name

use crate::error::{Error, ParseFailure, Result};
use crate::types::Resolution;
use regex::Regex;

/// Structured metadata extracted from a release title
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedRelease {
    /// Title as received, trimmed, without a `.torrent` suffix
    pub original_title: String,
    /// Episode name with brackets and resolution markers removed
    pub canonical_episode_name: String,
    /// Vertical resolution
    pub resolution: Resolution,
    /// Leading bracketed group name
    pub release_group: String,
}

/// Compiled title parser
///
/// Build once with [`TitleParser::new`] and share; parsing is `&self` and
/// performs no I/O.
#[derive(Debug)]
pub struct TitleParser {
    release_group: Regex,
    bracketed: [Regex; 2],
    parenthesised: [(Regex, Regex); 2],
}

impl TitleParser {
    /// Compile the parser's patterns
    pub fn new() -> Result<Self> {
        Ok(Self {
            release_group: compile(r"^\[([^\]]*)\]")?,
            bracketed: [
                compile(r"\[\D*(\d+)?[p|i]\D*\]")?,
                compile(r"\[.*\d+x(\d+)?\.*\]")?,
            ],
            parenthesised: [
                (
                    compile(r"\(\D*(\d+)?p\D*\)")?,
                    compile(r"\([^\(]*\d+?p[^\)]*\)")?,
                ),
                (
                    compile(r"\([^\(]*\d+x(\d+)?[^\)]*\)")?,
                    compile(r"\([^\(]*\d+x\d+?[^\)]*\)")?,
                ),
            ],
        })
    }

    /// Parse `title` as a release of `anime_name`
    ///
    /// When the episode name does not contain `anime_name`, each alternate
    /// title found in it is replaced by the canonical one before giving up.
    pub fn parse(
        &self,
        title: &str,
        anime_name: &str,
        alt_names: &[String],
    ) -> std::result::Result<ParsedRelease, ParseFailure> {
        let release_group = self
            .release_group
            .captures(title)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|g| !g.trim().is_empty())
            .ok_or_else(|| ParseFailure::MissingReleaseGroup {
                title: title.to_string(),
            })?;

        let title = title.strip_suffix(".torrent").unwrap_or(title);

        let mut working = title;
        while let Some(stripped) = working
            .strip_suffix(".mp4")
            .or_else(|| working.strip_suffix(".mkv"))
        {
            working = stripped;
        }

        let mut episode_name = bracket_free_text(working);
        if episode_name.trim().is_empty() {
            return Err(ParseFailure::MissingEpisodeName {
                title: title.to_string(),
            });
        }

        let height = match self.bracketed_resolution(title) {
            Some(height) => height,
            None => self
                .parenthesised_resolution(title, &mut episode_name)
                .ok_or_else(|| ParseFailure::MissingResolution {
                    title: title.to_string(),
                })?,
        };

        let value: u32 = height
            .parse()
            .map_err(|_| ParseFailure::MissingResolution {
                title: title.to_string(),
            })?;
        let resolution =
            Resolution::from_height(value).ok_or_else(|| ParseFailure::UnsupportedResolution {
                title: title.to_string(),
                value,
            })?;

        let mut name = episode_name.trim().to_string();
        if !name.contains(anime_name) {
            for alt in alt_names {
                let alt = alt.trim();
                if !alt.is_empty() && name.contains(alt) {
                    name = name.replace(alt, anime_name);
                }
            }
        }
        if anime_name.is_empty() || !name.contains(anime_name) {
            return Err(ParseFailure::AnimeMismatch {
                title: title.to_string(),
                anime: anime_name.to_string(),
            });
        }

        Ok(ParsedRelease {
            original_title: title.trim().to_string(),
            canonical_episode_name: name,
            resolution,
            release_group,
        })
    }

    fn bracketed_resolution(&self, title: &str) -> Option<String> {
        self.bracketed
            .iter()
            .find_map(|pattern| last_capture(pattern, title))
    }

    fn parenthesised_resolution(&self, title: &str, episode_name: &mut String) -> Option<String> {
        for (find, remove) in &self.parenthesised {
            let Some(height) = last_capture(find, title) else {
                continue;
            };
            if remove.is_match(episode_name) {
                *episode_name = remove.replace_all(episode_name, "").into_owned();
                return Some(height);
            }
        }
        None
    }
}

/// Tags inserted between a published name and its resolution marker
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtraTags<'a> {
    /// Free-form tags, rendered first and verbatim
    pub others: Option<&'a str>,
    /// Adds `[Uncensored]`
    pub uncensored: bool,
    /// Adds `[BD]`
    pub bluray: bool,
}

impl ExtraTags<'_> {
    fn render(&self) -> String {
        let mut out = String::new();
        if let Some(others) = self.others.filter(|o| !o.is_empty()) {
            out.push_str(others);
        }
        if self.uncensored {
            out.push_str("[Uncensored]");
        }
        if self.bluray {
            out.push_str("[BD]");
        }
        out
    }
}

/// File name of a published episode, e.g. `[SSA] Show - 01 [BD][720p].mp4`
pub fn episode_file_name(
    publisher_tag: &str,
    name: &str,
    resolution: Resolution,
    tags: ExtraTags<'_>,
    extension: &str,
) -> String {
    format!(
        "[{}] {} {}[{}].{}",
        publisher_tag,
        name,
        tags.render(),
        resolution,
        extension
    )
}

/// Name of a published batch, e.g. `[SSA] Show [1080p][Batch]`
pub fn batch_name(
    publisher_tag: &str,
    name: &str,
    resolution: Resolution,
    tags: ExtraTags<'_>,
) -> String {
    format!(
        "[{}] {} {}[{}][Batch]",
        publisher_tag,
        name,
        tags.render(),
        resolution
    )
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::Other(format!("invalid built-in pattern {}: {}", pattern, e)))
}

/// Last non-empty first-group capture of `pattern` in `text`
fn last_capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}

/// Concatenation of every span of `text` outside `[...]`
fn bracket_free_text(text: &str) -> String {
    let mut depth = 0usize;
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '^' => {}
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}
