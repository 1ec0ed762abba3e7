//! Domain name helpers: normalization, label aware containment and zone matching
//!
//! All names handled by the zone engine are normalized the same way: lowercase,
//! surrounding whitespace and the trailing dot removed. The root zone is the
//! empty string.

/// Normalize a domain name for storage and comparison
pub fn normalize_name(name: &str) -> String {
    let name = name.trim();
    let name = name.strip_suffix('.').unwrap_or(name);
    name.to_ascii_lowercase()
}

/// Returns true if `name` is equal to `zone` or below it
///
/// Both names must already be normalized. Containment respects label
/// boundaries, so `badexample.org` is not inside `example.org`.
pub fn is_subdomain(name: &str, zone: &str) -> bool {
    if zone.is_empty() {
        return true;
    }
    if name == zone {
        return true;
    }

    name.len() > zone.len()
        && name.ends_with(zone)
        && name.as_bytes()[name.len() - zone.len() - 1] == b'.'
}

/// Number of labels in a normalized name; the root has none
pub fn label_count(name: &str) -> usize {
    if name.is_empty() {
        0
    } else {
        name.split('.').count()
    }
}

/// Strips the leftmost label, returning `None` for the root
pub fn parent(name: &str) -> Option<&str> {
    if name.is_empty() {
        return None;
    }

    match name.find('.') {
        Some(pos) => Some(&name[pos + 1..]),
        None => Some(""),
    }
}

/// Finds the most specific configured zone containing a query name
#[derive(Debug, Clone, Default)]
pub struct ZoneMatcher {
    zones: Vec<String>,
}

impl ZoneMatcher {
    pub fn new<I, S>(zones: I) -> ZoneMatcher
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ZoneMatcher {
            zones: zones
                .into_iter()
                .map(|zone| normalize_name(zone.as_ref()))
                .collect(),
        }
    }

    pub fn zones(&self) -> &[String] {
        &self.zones
    }

    /// Returns the longest zone that contains `qname`, or `None` when this
    /// server holds no authority for it.
    pub fn matches(&self, qname: &str) -> Option<&str> {
        let qname = normalize_name(qname);

        self.zones
            .iter()
            .filter(|zone| is_subdomain(&qname, zone))
            .max_by_key(|zone| label_count(zone))
            .map(|zone| zone.as_str())
    }
}

/// Policy deciding which negative answers are handed to the next handler
///
/// The default policy never falls through. A policy built from an empty zone
/// list covers every name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fallthrough {
    zones: Option<Vec<String>>,
}

impl Fallthrough {
    /// Never fall through
    pub fn none() -> Fallthrough {
        Fallthrough { zones: None }
    }

    /// Fall through for every name
    pub fn all() -> Fallthrough {
        Fallthrough {
            zones: Some(vec![String::new()]),
        }
    }

    /// Fall through for names within the given zones; an empty list means all names
    pub fn from_zones<I, S>(zones: I) -> Fallthrough
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let zones: Vec<String> = zones
            .into_iter()
            .map(|zone| normalize_name(zone.as_ref()))
            .collect();

        if zones.is_empty() {
            return Fallthrough::all();
        }

        Fallthrough {
            zones: Some(zones),
        }
    }

    pub fn through(&self, qname: &str) -> bool {
        let qname = normalize_name(qname);
        match self.zones {
            Some(ref zones) => zones.iter().any(|zone| is_subdomain(&qname, zone)),
            None => false,
        }
    }
}
