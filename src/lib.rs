#![deny(clippy::unwrap_used)]

use itertools::Itertools;
use lazy_regex::regex;

pub mod import;
pub mod normalize;
pub mod product;
pub mod product_family;
pub mod rehost;
pub mod shopify;
pub mod spec_group;
pub mod spec_item;
pub mod specs;

/// Import mode, mirrored into the produced records' visibility.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ImportMode {
    #[default]
    Draft,
    Public,
}

impl ImportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Public => "public",
        }
    }
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "public" => Self::Public,
            _ => Self::Draft,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupplierCode(pub String);

pub fn slugify(input: &str) -> String {
    let regex = regex!(r"[^a-z0-9]+");
    regex
        .replace_all(&input.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

pub fn strip_html(input: &str) -> String {
    let regex = regex!(r"(?s)<[^>]*>");
    let text = regex.replace_all(input, " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_chars(input: &str, max: usize) -> &str {
    if input.is_empty() || input.len() <= max {
        return input;
    }
    let mut end = 0usize;
    let mut count = 0usize;
    for (idx, ch) in input.char_indices() {
        if count >= max {
            break;
        }
        end = idx + ch.len_utf8();
        count += 1;
    }
    &input[..end]
}

pub fn title_case(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ordered-unique union: existing order kept, new entries appended, no duplicates.
/// Shared taxonomy collections only ever grow through this.
pub fn merge_unique(existing: &[String], incoming: &[String]) -> Vec<String> {
    existing
        .iter()
        .chain(incoming)
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .unique()
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_titles() {
        assert_eq!(slugify("LED Strip 5050 (RGB), 12V!"), "led-strip-5050-rgb-12v");
        assert_eq!(slugify("  --Trimmed--  "), "trimmed");
        assert_eq!(slugify("already-a-slug"), "already-a-slug");
    }

    #[test]
    fn strips_markup() {
        assert_eq!(
            strip_html("<p>Hello <b>world</b></p>\n<img src=\"x\">"),
            "Hello world"
        );
        assert_eq!(strip_html("plain text"), "plain text");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn title_cases_labels() {
        assert_eq!(title_case("weight kg"), "Weight Kg");
        assert_eq!(title_case("POWER SUPPLY"), "Power Supply");
    }

    #[test]
    fn merges_unique_preserving_order() {
        let existing = vec!["Width".to_string(), "Height".to_string()];
        let incoming = vec!["Height".to_string(), "Depth".to_string()];
        assert_eq!(merge_unique(&existing, &incoming), ["Width", "Height", "Depth"]);
        assert!(merge_unique(&[], &[]).is_empty());
    }
}
