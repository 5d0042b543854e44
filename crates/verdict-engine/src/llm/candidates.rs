/// Ordered, first-occurrence-deduplicated list of model identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CandidateList(Vec<String>);

impl CandidateList {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a CandidateList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn push_unique_candidate(candidates: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return;
    }
    if !candidates.iter().any(|existing| existing == trimmed) {
        candidates.push(trimmed.to_string());
    }
}

/// Build the model candidate list in priority order:
/// explicit preference, runtime override, environment default, built-ins.
///
/// Blank entries are dropped and later duplicates are removed. An empty
/// `builtins` slice is a configuration defect; the result may then be empty.
pub fn resolve_candidates(
    preference: Option<&str>,
    runtime_override: Option<&str>,
    env_default: Option<&str>,
    builtins: &[String],
) -> CandidateList {
    let mut out = Vec::with_capacity(builtins.len() + 3);
    for candidate in [preference, runtime_override, env_default].into_iter().flatten() {
        push_unique_candidate(&mut out, candidate);
    }
    for builtin in builtins {
        push_unique_candidate(&mut out, builtin);
    }
    CandidateList(out)
}

/// Ordered provider keys. An empty set cannot be constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet(Vec<String>);

impl CredentialSet {
    /// Returns `None` when no non-blank key remains after deduplication.
    pub fn new<I, S>(keys: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Vec::new();
        for key in keys {
            push_unique_candidate(&mut out, key.as_ref());
        }
        if out.is_empty() {
            None
        } else {
            Some(Self(out))
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&str> {
        self.0.get(slot).map(String::as_str)
    }

    /// Slots in try order, starting with `preferred` when it is in range and
    /// continuing in configured order without repeats.
    pub fn prioritized(&self, preferred: Option<usize>) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.0.len());
        if let Some(slot) = preferred.filter(|slot| *slot < self.0.len()) {
            order.push(slot);
        }
        order.extend((0..self.0.len()).filter(|slot| Some(*slot) != preferred));
        order
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|key| verdict_core::util::redact_key(key)))
            .finish()
    }
}
