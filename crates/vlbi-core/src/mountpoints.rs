//! FlexBuff/Mark6 mount-point discovery and pattern/group resolution.
//!
//! Built-in aliases `1`, `2`, `3`, `4`, `flexbuf` resolve to fixed
//! patterns; Mark6 groupids (`[1-4]+`, e.g. `"124"`) resolve to the union
//! of their member aliases' patterns. Resolution is iterative: partition
//! the current list into already-valid patterns and aliases still needing
//! a lookup, resolve the aliases one level, repeat until nothing is left
//! to resolve.

use std::collections::{BTreeSet, HashMap};

/// A glob or anchored-regex pattern matched against mount-point paths.
pub type Pattern = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountpointError {
    pub undefined_group: String,
}

impl std::fmt::Display for MountpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "group definition '{}' not found", self.undefined_group)
    }
}

impl std::error::Error for MountpointError {}

fn builtin_groupdefs() -> HashMap<&'static str, Vec<Pattern>> {
    let mut m = HashMap::new();
    m.insert("1", vec!["^/mnt/disk/1/[0-7]$".to_string()]);
    m.insert("2", vec!["^/mnt/disk/2/[0-7]$".to_string()]);
    m.insert("3", vec!["^/mnt/disk/3/[0-7]$".to_string()]);
    m.insert("4", vec!["^/mnt/disk/4/[0-7]$".to_string()]);
    m.insert("flexbuf", vec!["^/mnt/disk[0-9]+$".to_string()]);
    m
}

/// Whether `groupid` is exactly `[1-4]+` (a Mark6 groupid union, e.g.
/// `"124"`), as opposed to a single builtin alias or an explicit pattern.
fn is_mk6_groupid(groupid: &str) -> bool {
    !groupid.is_empty() && groupid.chars().all(|c| ('1'..='4').contains(&c))
}

/// A pattern that needs no further alias resolution: an anchored regex
/// (`^...$`) or a path-shaped glob, as opposed to a bare alias token like
/// `"1"` or `"flexbuf"`.
pub fn is_valid_pattern(s: &str) -> bool {
    s.starts_with('^') || s.contains('/') || s.contains('*') || s.contains('?')
}

/// Patterns a single builtin alias or Mark6 groupid union resolves to, or
/// an empty list if `groupid` is neither.
pub fn pattern_of(groupid: &str) -> Vec<Pattern> {
    let builtins = builtin_groupdefs();
    if let Some(p) = builtins.get(groupid) {
        return p.clone();
    }
    if is_mk6_groupid(groupid) {
        let mut out = Vec::new();
        for c in groupid.chars() {
            let key = c.to_string();
            if let Some(p) = builtins.get(key.as_str()) {
                out.extend(p.clone());
            }
        }
        return out;
    }
    Vec::new()
}

pub fn is_builtin(groupid: &str) -> bool {
    builtin_groupdefs().contains_key(groupid) || is_mk6_groupid(groupid)
}

/// Resolves a list of patterns/aliases/groupids against an optional set of
/// user-defined group definitions, returning the deduplicated union of all
/// patterns reached. Fails if an alias is neither a builtin nor present in
/// `user_groups`.
pub fn resolve_patterns(
    patterns: &[impl AsRef<str>],
    user_groups: &HashMap<String, Vec<Pattern>>,
) -> Result<Vec<Pattern>, MountpointError> {
    let mut accumulator: BTreeSet<Pattern> = BTreeSet::new();
    let mut remaining: Vec<Pattern> = patterns.iter().map(|s| s.as_ref().to_string()).collect();

    while !remaining.is_empty() {
        let mut next_round = Vec::new();
        for item in remaining {
            if is_valid_pattern(&item) {
                accumulator.insert(item);
                continue;
            }
            let builtin = pattern_of(&item);
            if !builtin.is_empty() {
                next_round.extend(builtin);
                continue;
            }
            match user_groups.get(&item) {
                Some(defs) => next_round.extend(defs.clone()),
                None => {
                    return Err(MountpointError {
                        undefined_group: item,
                    })
                }
            }
        }
        remaining = next_round;
    }

    Ok(accumulator.into_iter().collect())
}

/// Holds the set of discovered FlexBuff mount points and the map of
/// stream-name to filter-pattern-list used to route recorded streams
/// across them.
pub struct Mk6Info {
    pub mountpoints: Vec<String>,
    pub stream_filters: HashMap<String, Vec<Pattern>>,
}

impl Mk6Info {
    /// Builds an `Mk6Info` from an already-discovered set of mount-point
    /// paths (real mount-point discovery walks `/mnt`, an OS-specific
    /// concern left to the caller).
    pub fn new(discovered_mountpoints: Vec<String>) -> Self {
        Mk6Info {
            mountpoints: discovered_mountpoints,
            stream_filters: HashMap::new(),
        }
    }

    pub fn set_stream_filter(&mut self, stream: impl Into<String>, patterns: Vec<Pattern>) {
        self.stream_filters.insert(stream.into(), patterns);
    }
}
