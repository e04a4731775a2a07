/// Reduces a free-text filter to `[A-Za-z0-9 whitespace - _ . , @]` and trims
/// it. `None` means no filter should be applied.
pub fn sanitize_search_term(raw: &str) -> Option<String> {
    let kept: String = raw
        .chars()
        .filter(|ch| {
            ch.is_ascii_alphanumeric()
                || ch.is_whitespace()
                || matches!(ch, '-' | '_' | '.' | ',' | '@')
        })
        .collect();
    let trimmed = kept.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// `ILIKE` pattern for a sanitized term. Underscores are escaped so they
/// match literally.
pub fn contains_pattern(term: &str) -> String {
    format!("%{}%", term.replace('_', "\\_"))
}
