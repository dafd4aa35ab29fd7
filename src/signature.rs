//! Failure signature tracking
//!
//! Reduces the current set of failures to one string and counts how many
//! consecutive attempts produced exactly that string. The comparison is
//! exact, so any byte of difference counts as progress.

/// One target file's state after an execution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub file: String,
    /// Failure trace, `None` when the file ran clean
    pub failure: Option<String>,
}

impl FileReport {
    pub fn clean(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            failure: None,
        }
    }

    pub fn failing(file: impl Into<String>, failure: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            failure: Some(failure.into()),
        }
    }

    pub fn is_failing(&self) -> bool {
        self.failure.is_some()
    }
}

/// Concatenate all failure texts in target order; clean files contribute nothing.
pub fn failure_signature(reports: &[FileReport]) -> String {
    reports
        .iter()
        .filter_map(|r| r.failure.as_deref())
        .collect()
}

/// Per-session counters, owned by the session and mutated once per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptState {
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub constant_error_count: u32,
    pub last_error_signature: String,
}

impl AttemptState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            max_attempts,
            constant_error_count: 0,
            last_error_signature: String::new(),
        }
    }

    pub fn budget_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Start a fresh stuck window. Called once escalation has been attempted,
    /// whatever it retrieved.
    pub fn reset_streak(&mut self) {
        self.constant_error_count = 0;
    }
}

/// Decides when repeated identical failures warrant outside research.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureTracker {
    pub threshold: u32,
    pub search_enabled: bool,
}

impl SignatureTracker {
    pub fn new(threshold: u32, search_enabled: bool) -> Self {
        Self {
            threshold,
            search_enabled,
        }
    }

    /// Fold the current reports into `state` and report whether escalation
    /// should run this attempt.
    pub fn observe(&self, state: &mut AttemptState, reports: &[FileReport]) -> bool {
        let signature = failure_signature(reports);

        if !signature.is_empty() && signature == state.last_error_signature {
            state.constant_error_count += 1;
        } else {
            state.constant_error_count = 0;
            state.last_error_signature = signature;
        }

        self.search_enabled && state.constant_error_count >= self.threshold
    }
}
