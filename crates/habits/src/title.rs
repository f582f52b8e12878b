//! Habit title rewriting.
//!
//! Two independent passes over the title:
//! - a progress counter `[n]` or `[n/m]` gets its numerator bumped
//! - a date stamp `[YYYY-MM-DD]` is replaced with the current date
//!
//! The passes match disjoint bracket syntaxes, so they never interfere.
//! Both are total: titles without a match come back unchanged.

use chrono::NaiveDate;
use regex::{NoExpand, Regex};
use std::sync::LazyLock;

/// Bracketed progress counter, with an optional fixed target.
static COUNTER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([0-9]+)(?:/([0-9]+))?\]").unwrap());

/// Bracketed ISO date.
static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[0-9]{4}-[0-9]{2}-[0-9]{2}\]").unwrap());

/// Format written into refreshed date stamps. Must stay matchable by
/// [`DATE_PATTERN`] so the next completion refreshes it again.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Increment the first bracketed counter in `title`.
///
/// `[31]` becomes `[32]` and `[31/79]` becomes `[32/79]`. Only the first
/// counter is touched. A numerator too large for `u64` leaves the title as is.
#[must_use]
pub fn task_counter(title: &str) -> String {
    let Some(caps) = COUNTER_PATTERN.captures(title) else {
        return title.to_string();
    };

    let Some(next) = caps[1]
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_add(1))
    else {
        return title.to_string();
    };

    let replacement = match caps.get(2) {
        Some(target) => format!("[{next}/{}]", target.as_str()),
        None => format!("[{next}]"),
    };

    let whole = caps.get(0).map_or(0..0, |m| m.range());
    let mut updated = String::with_capacity(title.len() + 1);
    updated.push_str(&title[..whole.start]);
    updated.push_str(&replacement);
    updated.push_str(&title[whole.end..]);
    updated
}

/// Replace every bracketed ISO date in `title` with `today`.
#[must_use]
pub fn date_updater(title: &str, today: NaiveDate) -> String {
    let stamp = format!("[{}]", today.format(DATE_FORMAT));
    DATE_PATTERN
        .replace_all(title, NoExpand(&stamp))
        .into_owned()
}

/// Full rewrite applied to a completed habit: counter, then date.
#[must_use]
pub fn update_title(title: &str, today: NaiveDate) -> String {
    date_updater(&task_counter(title), today)
}
