//! Surfacing notable lines from package manager output.

/// What: Pick lines containing any keyword, with one line of context on each side.
///
/// Inputs:
/// - `output`: Captured command output.
/// - `keywords`: Case-insensitive keywords, e.g. `pacnew`.
///
/// Output:
/// - Selected lines in their original order, each at most once.
#[must_use]
pub fn highlights(output: &str, keywords: &[String]) -> Vec<String> {
    let lines: Vec<&str> = output.lines().collect();
    let needles: Vec<String> = keywords
        .iter()
        .filter(|k| !k.is_empty())
        .map(|k| k.to_lowercase())
        .collect();
    let mut keep = vec![false; lines.len()];
    for (i, line) in lines.iter().enumerate() {
        let lower = line.to_lowercase();
        if needles.iter().any(|n| lower.contains(n.as_str())) {
            keep[i.saturating_sub(1)..=(i + 1).min(lines.len() - 1)]
                .iter_mut()
                .for_each(|k| *k = true);
        }
    }
    lines
        .into_iter()
        .zip(keep)
        .filter(|(_, k)| *k)
        .map(|(l, _)| l.to_string())
        .collect()
}

/// Log the highlighted lines of `output` at warn level.
pub fn log_highlights(operation: &str, output: &str, keywords: &[String]) {
    let selected = highlights(output, keywords);
    if selected.is_empty() {
        return;
    }
    tracing::warn!(
        operation = %operation,
        "pacman output needs attention:\n{}",
        selected.join("\n")
    );
}
