/// Fuzzy resolution of free-text cooperative mentions to canonical tenant
/// ids. The matching order is an explicit strategy list, first success wins,
/// so precedence stays auditable: exact, containment, then edit-distance
/// similarity.
pub struct TenantDirectory {
    entries: Vec<DirectoryEntry>,
}

#[derive(Clone, Copy, Debug)]
struct DirectoryEntry {
    /// Pre-normalized lookup key (uppercase, alphanumeric only).
    key: &'static str,
    tenant_id: &'static str,
    display_name: &'static str,
}

/// Several keys may map to one tenant id; that is the directory's aliasing
/// mechanism, not an error.
const BUILTIN_DIRECTORY: &[DirectoryEntry] = &[
    DirectoryEntry { key: "FUSION", tenant_id: "fusion", display_name: "Fusion" },
    DirectoryEntry { key: "FUSIONCOOP", tenant_id: "fusion", display_name: "Fusion" },
    DirectoryEntry { key: "IMMIGRATION", tenant_id: "immigration", display_name: "Immigration" },
    DirectoryEntry { key: "IMMIGRATIONMCS", tenant_id: "immigration", display_name: "Immigration" },
    DirectoryEntry { key: "SILVERLINE", tenant_id: "silverline", display_name: "Silverline" },
    DirectoryEntry { key: "HARBORLIGHT", tenant_id: "harborlight", display_name: "Harborlight" },
    DirectoryEntry { key: "UNITYFIRST", tenant_id: "unityfirst", display_name: "Unity First" },
    DirectoryEntry { key: "CRESTVIEW", tenant_id: "crestview", display_name: "Crestview" },
];

const SIMILARITY_THRESHOLD: f64 = 0.6;

impl Default for TenantDirectory {
    fn default() -> Self {
        Self { entries: BUILTIN_DIRECTORY.to_vec() }
    }
}

impl TenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a raw mention to a canonical tenant id. Returns `None` when
    /// no strategy succeeds; the caller falls back to free-text extraction
    /// before giving up.
    pub fn resolve(&self, raw: &str) -> Option<&'static str> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return None;
        }

        let strategies: &[fn(&Self, &str) -> Option<&'static str>] =
            &[Self::exact_match, Self::containment_match, Self::similarity_match];

        strategies.iter().find_map(|strategy| strategy(self, &normalized))
    }

    /// Display name for a canonical tenant id, when known.
    pub fn display_name(&self, tenant_id: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|entry| entry.tenant_id == tenant_id)
            .map(|entry| entry.display_name)
    }

    /// Candidate names handed to the extraction collaborator.
    pub fn candidate_names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|entry| entry.key).collect()
    }

    /// First `limit` distinct display names in directory order, used when
    /// prompting the member with examples.
    pub fn example_names(&self, limit: usize) -> Vec<&'static str> {
        let mut names = Vec::new();
        for entry in &self.entries {
            if !names.contains(&entry.display_name) {
                names.push(entry.display_name);
            }
            if names.len() == limit {
                break;
            }
        }
        names
    }

    fn exact_match(&self, normalized: &str) -> Option<&'static str> {
        self.entries.iter().find(|entry| entry.key == normalized).map(|entry| entry.tenant_id)
    }

    fn containment_match(&self, normalized: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|entry| normalized.contains(entry.key) || entry.key.contains(normalized))
            .map(|entry| entry.tenant_id)
    }

    fn similarity_match(&self, normalized: &str) -> Option<&'static str> {
        let mut best: Option<(&'static str, f64)> = None;
        for entry in &self.entries {
            let score = similarity(normalized, entry.key);
            // Strict comparison keeps the first-encountered entry on ties.
            if score > SIMILARITY_THRESHOLD && best.map_or(true, |(_, top)| score > top) {
                best = Some((entry.tenant_id, score));
            }
        }
        best.map(|(tenant_id, _)| tenant_id)
    }
}

/// Uppercase and strip everything that is not ASCII alphanumeric.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_uppercase())
        .collect()
}

/// Normalized edit-distance similarity: `1 - levenshtein / max_len`.
fn similarity(left: &str, right: &str) -> f64 {
    let max_len = left.chars().count().max(right.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(left, right) as f64 / max_len as f64
}

fn levenshtein(left: &str, right: &str) -> usize {
    let left: Vec<char> = left.chars().collect();
    let right: Vec<char> = right.chars().collect();
    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }

    let mut previous: Vec<usize> = (0..=right.len()).collect();
    let mut current = vec![0usize; right.len() + 1];

    for (i, left_ch) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, right_ch) in right.iter().enumerate() {
            let substitution_cost = usize::from(left_ch != right_ch);
            current[j + 1] = (previous[j] + substitution_cost)
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[right.len()]
}
