use std::sync::LazyLock;

use regex::Regex;

static CHAPTER_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Chapter (\d+(?:\.\d+)?)").expect("chapter number regex")
});

/// One installment of the work, resolved from a listing label.
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    pub display_name: String,
    /// Normalized number text (`"95.5"`, `"12.0"`), or the label itself when
    /// no number could be extracted.
    pub number: String,
    /// Numeric ordering key; `f64::INFINITY` when the label carries no number.
    pub sort_key: f64,
    pub source_url: String,
}

impl Chapter {
    pub fn new(display_name: impl Into<String>, source_url: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let parsed = parse_chapter_number(&display_name);
        let (number, sort_key) = match parsed {
            Some(text) => {
                let value = text.parse::<f64>().unwrap_or(f64::INFINITY);
                (text, value)
            }
            None => (display_name.clone(), f64::INFINITY),
        };

        Self {
            display_name,
            number,
            sort_key,
            source_url: source_url.into(),
        }
    }

    /// Name used for the scratch directory and the output document.
    pub fn file_stem(&self) -> String {
        sanitize_name(&self.number)
    }
}

/// Extracts the first `Chapter <N>[.<M>]` number from a label after turning
/// dashes into decimal points (`"Chapter 95-5"` is chapter `95.5`). Whole
/// numbers gain a `.0` suffix.
pub fn parse_chapter_number(label: &str) -> Option<String> {
    let normalized = label.replace('-', ".");
    let captures = CHAPTER_NUMBER_RE.captures(&normalized)?;
    let mut number = captures.get(1)?.as_str().to_owned();
    if !number.contains('.') {
        number.push_str(".0");
    }
    Some(number)
}

/// Chapter number for display and naming; falls back to the label unchanged.
pub fn extract_chapter_number(label: &str) -> String {
    parse_chapter_number(label).unwrap_or_else(|| label.to_owned())
}

/// Sorts `(label, url)` pairs ascending by chapter number. Labels without a
/// number go last, keeping their discovery order.
pub fn sort_chapters<I, L, U>(links: I) -> Vec<Chapter>
where
    I: IntoIterator<Item = (L, U)>,
    L: Into<String>,
    U: Into<String>,
{
    let mut chapters = links
        .into_iter()
        .map(|(label, url)| Chapter::new(label, url))
        .collect::<Vec<_>>();
    chapters.sort_by(|a, b| a.sort_key.total_cmp(&b.sort_key));
    chapters
}

/// Replaces characters that are unsafe in file names (`<>:"/\|?*`) with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => ch,
        })
        .collect()
}
