//! Column and table name assembly.
//!
//! Names join path components with the configured separator. Above the
//! deep-nesting threshold a name collapses to its most identifying
//! components, which keeps identifiers bounded for database loading.
//! Components containing the separator are not escaped; callers control
//! their keys.

/// Join path components into a column name. Above `threshold` components the
/// name collapses to `first + sep + second-to-last + sep + last`.
pub(crate) fn column_name(components: &[String], separator: &str, threshold: usize) -> String {
    let parts = non_empty(components);
    if parts.len() > threshold && parts.len() >= 3 {
        return [parts[0], parts[parts.len() - 2], parts[parts.len() - 1]].join(separator);
    }
    parts.join(separator)
}

/// Join table-name components (the entity name plus the array ancestry).
/// Above `threshold` components the name collapses to
/// `first + sep + "nested" + sep + last`.
pub(crate) fn table_name(components: &[String], separator: &str, threshold: usize) -> String {
    let parts = non_empty(components);
    if parts.len() > threshold && parts.len() >= 3 {
        return [parts[0], "nested", parts[parts.len() - 1]].join(separator);
    }
    parts.join(separator)
}

fn non_empty(components: &[String]) -> Vec<&str> {
    components
        .iter()
        .map(String::as_str)
        .filter(|c| !c.is_empty())
        .collect()
}
