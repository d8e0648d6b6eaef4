//! Free-text failure classification.
//!
//! The external process reports provider problems only as text on stdout or
//! stderr. Every pattern the dispatcher reacts to lives in [`RULES`] so the
//! mapping can be audited in one place. Rules are checked in order and the
//! first matching kind wins.

use std::sync::LazyLock;

use regex::RegexSet;

use crate::errors::FailureKind;

/// Ordered `(kind, case-insensitive patterns)` table.
pub const RULES: &[(FailureKind, &[&str])] = &[
    (
        FailureKind::InsufficientCredit,
        &[
            r"insufficient[ _]balance",
            r"insufficient[ _]credit",
            r"credit balance is too low",
            r"no resource package",
            r"please recharge",
        ],
    ),
    (
        FailureKind::RateLimited,
        &[
            r"rate_limit_error",
            r"rate[ -]limit(ed)?",
            r"too many requests",
            r"\b429\b",
            r"overloaded_error",
        ],
    ),
    (
        FailureKind::BinaryNotFound,
        &[r"\benoent\b", r"command not found", r"no such file or directory"],
    ),
    (
        FailureKind::Timeout,
        &[r"\bsigterm\b", r"timed out", r"\betimedout\b"],
    ),
];

struct Compiled {
    set: RegexSet,
    /// Kind for each pattern index in `set`.
    kinds: Vec<FailureKind>,
}

static COMPILED: LazyLock<Compiled> = LazyLock::new(|| {
    let mut patterns = Vec::new();
    let mut kinds = Vec::new();
    for (kind, pats) in RULES {
        for pat in *pats {
            patterns.push(format!("(?i){pat}"));
            kinds.push(*kind);
        }
    }
    let set = RegexSet::new(&patterns).expect("classification patterns are valid");
    Compiled { set, kinds }
});

/// Classify process output. Returns `None` when nothing in the table matches.
pub fn classify(text: &str) -> Option<FailureKind> {
    let compiled = &*COMPILED;
    let matches = compiled.set.matches(text);
    // Pattern indices follow table order, so the lowest index is the first rule.
    matches.iter().next().map(|idx| compiled.kinds[idx])
}

/// Classify, falling back to [`FailureKind::UnknownProcessError`].
pub fn classify_or_unknown(text: &str) -> FailureKind {
    classify(text).unwrap_or(FailureKind::UnknownProcessError)
}
