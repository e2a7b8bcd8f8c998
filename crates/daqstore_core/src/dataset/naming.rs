//! Child naming inside type groups.

/// Base name for fragment datasets without a configured base.
pub const DEFAULT_DATASET_BASE: &str = "TimeSlice";

/// Base name for container groups.
pub const CONTAINER_GROUP_BASE: &str = "Container";

/// Picks the first free dataset name.
///
/// Without a configured base the candidates are `TimeSlice0`,
/// `TimeSlice1`, ...; with one they are `base`, `base1`, `base2`, ...
pub fn next_dataset_name(base: Option<&str>, exists: impl Fn(&str) -> bool) -> String {
    match base {
        Some(base) => {
            if !exists(base) {
                return base.to_string();
            }
            first_free(base, 1, exists)
        }
        None => first_free(DEFAULT_DATASET_BASE, 0, exists),
    }
}

/// Picks the first free container group name: `Container0`, `Container1`, ...
pub fn next_container_name(exists: impl Fn(&str) -> bool) -> String {
    first_free(CONTAINER_GROUP_BASE, 0, exists)
}

fn first_free(base: &str, start: u64, exists: impl Fn(&str) -> bool) -> String {
    (start..)
        .map(|n| format!("{base}{n}"))
        .find(|name| !exists(name))
        .unwrap_or_else(|| base.to_string())
}
