//! Reverse dependency walk over the local package database.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use super::query::run_query;
use crate::command::CommandRunner;
use crate::error::QueryError;

/// What: Collect every installed package that transitively requires `root`.
///
/// Inputs:
/// - `runner`: Command runner.
/// - `root`: Installed package name.
/// - `cache`: `Required By` lists already fetched during this run.
///
/// Output:
/// - Dependent names, excluding `root` itself.
///
/// # Errors
/// - `QueryError` when `pacman -Qi root` fails. Intermediate lookups that
///   fail are logged and treated as leaves.
pub fn dependents<R: CommandRunner + ?Sized>(
    runner: &R,
    root: &str,
    cache: &RefCell<HashMap<String, Vec<String>>>,
) -> Result<BTreeSet<String>, QueryError> {
    let first = required_by(runner, root, cache)?;

    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = first.into_iter().collect();
    while let Some(current) = queue.pop_front() {
        if current == root || !seen.insert(current.clone()) {
            continue;
        }
        match required_by(runner, &current, cache) {
            Ok(next) => queue.extend(next.into_iter().filter(|n| !seen.contains(n))),
            Err(e) => {
                tracing::warn!(package = %current, error = %e, "failed to query dependents; treating as leaf");
            }
        }
    }
    tracing::debug!(package = %root, count = seen.len(), "collected dependents");
    Ok(seen)
}

fn required_by<R: CommandRunner + ?Sized>(
    runner: &R,
    name: &str,
    cache: &RefCell<HashMap<String, Vec<String>>>,
) -> Result<Vec<String>, QueryError> {
    if let Some(hit) = cache.borrow().get(name) {
        return Ok(hit.clone());
    }
    let text = run_query(runner, &["-Qi", name])?;
    let map = parse_key_value_output(&text);
    let list = split_ws_or_none(map.get("Required By"));
    cache.borrow_mut().insert(name.to_string(), list.clone());
    Ok(list)
}

/// What: `Required By` lists of many installed packages from one `pacman -Qi` call.
///
/// Inputs:
/// - `runner`: Command runner.
/// - `names`: Installed package names.
///
/// Output:
/// - Requirers per package name; empty input issues no query.
///
/// # Errors
/// - `QueryError` when the query fails.
pub fn required_by_many<R: CommandRunner + ?Sized>(
    runner: &R,
    names: &BTreeSet<String>,
) -> Result<BTreeMap<String, BTreeSet<String>>, QueryError> {
    if names.is_empty() {
        return Ok(BTreeMap::new());
    }
    let mut args = vec!["-Qi"];
    args.extend(names.iter().map(String::as_str));
    let text = run_query(runner, &args)?;
    Ok(parse_required_by_records(&text))
}

/// What: Split multi-package `pacman -Qi` output into `Name` to `Required By` pairs.
///
/// Details:
/// - Records are separated by blank lines; a record without `Name` is dropped.
pub(crate) fn parse_required_by_records(text: &str) -> BTreeMap<String, BTreeSet<String>> {
    let mut out = BTreeMap::new();
    let mut record = String::new();
    for line in text.lines().chain(std::iter::once("")) {
        if !line.trim().is_empty() {
            record.push_str(line);
            record.push('\n');
            continue;
        }
        if record.is_empty() {
            continue;
        }
        let map = parse_key_value_output(&record);
        if let Some(name) = map.get("Name") {
            out.insert(
                name.clone(),
                split_ws_or_none(map.get("Required By")).into_iter().collect(),
            );
        }
        record.clear();
    }
    out
}

/// What: Parse `pacman -Qi` output into a key/value map.
///
/// Details:
/// - Indented continuation lines are appended to the previous key.
pub(crate) fn parse_key_value_output(text: &str) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    let mut last_key: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if (line.starts_with(' ') || line.starts_with('\t'))
            && let Some(key) = &last_key
        {
            let entry = map.entry(key.clone()).or_default();
            if !entry.ends_with(' ') {
                entry.push(' ');
            }
            entry.push_str(line.trim());
        } else if let Some((k, v)) = line.split_once(':') {
            let key = k.trim().to_string();
            last_key = Some(key.clone());
            map.insert(key, v.trim().to_string());
        }
    }
    map
}

fn split_ws_or_none(field: Option<&String>) -> Vec<String> {
    field.map_or_else(Vec::new, |value| {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            Vec::new()
        } else {
            trimmed.split_whitespace().map(ToString::to_string).collect()
        }
    })
}
