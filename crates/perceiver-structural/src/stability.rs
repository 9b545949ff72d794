//! Heuristics that tell hand-written attribute values apart from tokens a
//! framework or build step generated.
//!
//! Volatile values stay on the descriptor as plain attributes but never feed
//! identity hashing, and locators built from them are ranked last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Attributes conventionally reserved for automation hooks, most specific first.
pub const TEST_ID_ATTRS: &[&str] = &[
    "data-testid",
    "data-test-id",
    "data-test",
    "data-qa",
    "data-cy",
];

static FRAMEWORK_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(ember\d+|ext-gen\d+|yui_|gwt-uid-|ng-\d|mui-\d|react-select-\d|headlessui-|radix-|rc-[a-z]+-\d|downshift-\d|:r[0-9a-z]*:$|__next_)",
    )
    .expect("framework id pattern")
});

static UUID_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("uuid pattern")
});

static LONG_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4,}").expect("digit run pattern"));

static LIBRARY_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^((css|sc|jss|emotion|styled|svelte|astro|chakra|tw)-[A-Za-z0-9]+|[A-Za-z]+_[A-Za-z]+__[A-Za-z0-9_-]{5}|makeStyles-[A-Za-z]+-\d+|Mui[A-Z][A-Za-z]*-[a-z][A-Za-z]*)$",
    )
    .expect("library class pattern")
});

static UTILITY_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)^(
            (sm|md|lg|xl|2xl|hover|focus|active|disabled|dark|group-hover):.+
          | -?[mp][trblxyse]?-(\d+(\.\d+)?|px|auto|\[.+\])
          | (w|h|min-w|max-w|min-h|max-h|size)-.+
          | (text|bg|border|ring|fill|stroke|from|to|via|divide|outline|decoration|placeholder)-[a-z]+(-\d{2,3})?
          | (flex|grid|block|inline|inline-block|inline-flex|hidden|contents|table|static|fixed|absolute|relative|sticky|truncate|uppercase|lowercase|capitalize|italic|underline|container|clearfix|visible|invisible|sr-only|shadow|rounded|border)
          | (items|justify|content|self|place|gap|space|order|col|row|grid-cols|grid-rows|basis|grow|shrink|z|top|bottom|left|right|inset|opacity|overflow|font|leading|tracking|rounded|border|shadow|cursor|select|transition|duration|ease|delay|animate|scale|rotate|translate|d|align|float|position)-.+
        )$",
    )
    .expect("utility class pattern")
});

/// True when an id, test-id or similar value looks generated rather than authored.
pub fn is_volatile_value(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    if FRAMEWORK_ID.is_match(value) || UUID_LIKE.is_match(value) || LONG_DIGITS.is_match(value) {
        return true;
    }
    if value.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if value
        .split(|c: char| matches!(c, '-' | '_' | ':' | '.'))
        .any(is_hex_token)
    {
        return true;
    }
    let digits = value.chars().filter(char::is_ascii_digit).count();
    value.len() >= 16 && digits * 10 >= value.len() * 3
}

/// Hex run of at least six characters mixing letters and digits (`a1b2c3`).
fn is_hex_token(token: &str) -> bool {
    token.len() >= 6
        && token.chars().all(|c| c.is_ascii_hexdigit())
        && token.chars().any(|c| c.is_ascii_digit())
        && token.chars().any(|c| c.is_ascii_alphabetic())
}

/// CSS-utility tokens (spacing, sizing, colour, layout) that say nothing about
/// what the element is.
pub fn is_utility_class(class: &str) -> bool {
    UTILITY_CLASS.is_match(class)
}

/// Classes emitted by CSS-in-JS or CSS-module tooling.
pub fn is_library_class(class: &str) -> bool {
    LIBRARY_CLASS.is_match(class)
}

pub fn is_meaningful_class(class: &str) -> bool {
    !class.is_empty()
        && !is_utility_class(class)
        && !is_library_class(class)
        && !is_volatile_value(class)
}

/// Meaningful classes in their original order.
pub fn meaningful_classes<'a>(classes: &[&'a str]) -> Vec<&'a str> {
    classes
        .iter()
        .copied()
        .filter(|class| is_meaningful_class(class))
        .collect()
}
