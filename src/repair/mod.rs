//! The repair loop
//!
//! Each attempt runs every target, updates the failure streak, optionally
//! researches, asks the model for replacements, writes them, and re-checks.
//! The session ends when a re-check is clean or the attempt budget runs out.

use crate::apply::ChangeApplier;
use crate::config::Settings;
use crate::error::RepairError;
use crate::executor::Executor;
use crate::llm::{ChatMessage, LanguageModel};
use crate::prompt::{assemble_prompt, read_sources, render_directory_tree, PromptContext};
use crate::prompts::{REPAIR_GUIDE, REPAIR_SYSTEM};
use crate::research::ResearchEscalator;
use crate::signature::{AttemptState, FileReport, SignatureTracker};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};


/// The knobs the loop itself needs, already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairSettings {
    pub code_dir: PathBuf,
    pub targets: Vec<String>,
    pub max_attempts: u32,
    pub enable_internet_search: bool,
    pub internet_search_threshold: u32,
    pub pause: Duration,
    /// Directory names hidden from the project tree (the session log dir)
    pub tree_skip: Vec<String>,
}

impl RepairSettings {
    pub fn new(settings: &Settings, targets: Vec<String>) -> Self {
        Self {
            code_dir: settings.code_dir.clone(),
            targets,
            max_attempts: settings.max_attempts,
            enable_internet_search: settings.enable_internet_search,
            internet_search_threshold: settings.internet_search_threshold,
            pause: settings.pause,
            tree_skip: Vec::new(),
        }
    }

    pub fn hide_from_tree(mut self, dir_name: impl Into<String>) -> Self {
        self.tree_skip.push(dir_name.into());
        self
    }
}

/// How a session that did not abort ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl SessionOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            SessionOutcome::Succeeded { attempts } | SessionOutcome::Exhausted { attempts } => {
                *attempts
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Succeeded { .. })
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Succeeded { attempts } => {
                write!(f, "fixed after {} attempt(s)", attempts)
            }
            SessionOutcome::Exhausted { attempts } => {
                write!(f, "still failing after {} attempt(s)", attempts)
            }
        }
    }
}

pub struct RepairSession<'a> {
    settings: RepairSettings,
    model: &'a dyn LanguageModel,
    executor: &'a dyn Executor,
    research: Option<&'a ResearchEscalator>,
    tracker: SignatureTracker,
    applier: ChangeApplier,
}

impl<'a> RepairSession<'a> {
    pub fn new(
        settings: RepairSettings,
        model: &'a dyn LanguageModel,
        executor: &'a dyn Executor,
    ) -> Self {
        let tracker =
            SignatureTracker::new(settings.internet_search_threshold, settings.enable_internet_search);
        let applier = ChangeApplier::new(&settings.code_dir);
        Self {
            settings,
            model,
            executor,
            research: None,
            tracker,
            applier,
        }
    }

    /// Attach the research escalator. Without one, escalation never fires.
    pub fn with_research(mut self, research: &'a ResearchEscalator) -> Self {
        self.research = Some(research);
        self
    }

    /// Run every target once, in target order.
    pub fn check(&self) -> Result<Vec<FileReport>, RepairError> {
        self.settings
            .targets
            .iter()
            .map(|file| -> Result<FileReport, RepairError> {
                let execution = self.executor.run(file)?;
                Ok(match execution.failure_text() {
                    Some(failure) => FileReport::failing(file.as_str(), failure),
                    None => FileReport::clean(file.as_str()),
                })
            })
            .collect()
    }

    fn build_prompt(
        &self,
        reports: &[FileReport],
        research: Option<&str>,
    ) -> Result<String, RepairError> {
        let tree = render_directory_tree(&self.settings.code_dir, &self.settings.tree_skip);
        let sources = read_sources(&self.settings.code_dir, &self.settings.targets)?;
        Ok(assemble_prompt(&PromptContext {
            directory_tree: &tree,
            sources: &sources,
            reports,
            research,
        }))
    }

    /// Drive the loop to a terminal state.
    pub async fn run(&self) -> Result<SessionOutcome, RepairError> {
        let mut state = AttemptState::new(self.settings.max_attempts);
        let escalation_possible = self.research.is_some();
        info!(
            "Repairing {} file(s) in {} with {}",
            self.settings.targets.len(),
            self.settings.code_dir.display(),
            self.model.describe()
        );

        loop {
            state.attempt_count += 1;
            info!("Attempt {}...", state.attempt_count);

            let reports = self.check()?;
            let escalate = self.tracker.observe(&mut state, &reports) && escalation_possible;
            debug!(
                "Failing files: {}, identical failure streak: {}",
                reports.iter().filter(|r| r.is_failing()).count(),
                state.constant_error_count
            );

            let prompt = match self.research.filter(|_| escalate) {
                Some(escalator) => {
                    info!(
                        "Same error detected for {} attempts, fetching internet information...",
                        self.tracker.threshold
                    );
                    let plain = self.build_prompt(&reports, None)?;
                    let research = escalator.research(self.model, &plain).await;
                    state.reset_streak();
                    let research = research?;
                    if research.is_empty() {
                        warn!("No internet information retrieved; continuing without it");
                    } else {
                        info!("Using internet information from: {}", research.sources.join(", "));
                    }
                    self.build_prompt(&reports, Some(&research.content))?
                }
                None => self.build_prompt(&reports, None)?,
            };

            let request = format!("{}{}", prompt, REPAIR_GUIDE);
            let reply = self
                .model
                .generate(&[ChatMessage::user(request)], Some(REPAIR_SYSTEM))
                .await?;

            let changes = crate::parse::parse_code_changes(&reply);
            debug!("Model proposed {} file(s)", changes.len());
            let applied = self.applier.apply(&changes);
            debug!("Wrote {} file(s): {}", applied.written.len(), applied.written.join(", "));
            for diff in &applied.summary.diffs {
                let (added, removed) = diff.stats();
                debug!(file = %diff.file, added, removed, "changed lines");
            }
            if applied.summary.is_empty() {
                info!("No changes were made on this attempt.");
            } else {
                info!("AI made these changes:\n{}", applied.summary);
            }
            if !applied.failures.is_empty() {
                warn!(
                    "{} of {} proposed file(s) could not be written",
                    applied.failures.len(),
                    changes.len()
                );
            }

            let recheck = self.check()?;
            if recheck.iter().all(|r| !r.is_failing()) {
                info!("All errors fixed.");
                return Ok(SessionOutcome::Succeeded {
                    attempts: state.attempt_count,
                });
            }

            if state.budget_exhausted() {
                info!("Maximum attempts reached without fixing all errors.");
                return Ok(SessionOutcome::Exhausted {
                    attempts: state.attempt_count,
                });
            }

            info!("Error still exists. Trying again after a pause...");
            if !self.settings.pause.is_zero() {
                tokio::time::sleep(self.settings.pause).await;
            }
        }
    }
}
