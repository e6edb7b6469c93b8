use std::fs;
use std::path::Path;
use std::time::Instant;

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use wr_compiler::{optimize_rules, parse_rules};
use wr_core::MemoryStore;

pub fn read_rules_file(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))
}

/// Parse, dedupe and load a rules file into a fresh store.
pub fn load_store(path: &Path) -> Result<MemoryStore, String> {
    let start = Instant::now();
    let content = read_rules_file(path)?;

    let mut rules = parse_rules(&content)
        .map_err(|e| format!("Invalid rules file '{}': {}", path.display(), e))?;
    let optimize = optimize_rules(&mut rules);

    let store = MemoryStore::with_rules(rules)
        .map_err(|e| format!("Failed to load '{}': {}", path.display(), e))?;

    log::debug!(
        "loaded {} rules from '{}' in {:.1}ms ({} duplicates dropped)",
        optimize.after,
        path.display(),
        start.elapsed().as_secs_f64() * 1000.0,
        optimize.deduped
    );

    Ok(store)
}

/// RFC 3339 timestamp, or a bare `YYYY-MM-DD` taken as midnight UTC.
pub fn parse_datetime(value: &str) -> Result<OffsetDateTime, String> {
    if let Ok(date) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(date);
    }
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map(|date| date.midnight().assume_utc())
        .map_err(|_| format!("expected an RFC 3339 timestamp or YYYY-MM-DD date, got '{value}'"))
}
