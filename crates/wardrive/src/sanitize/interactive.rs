//! The guided pre-upload cleanup.
//!
//! Locate, scan, preview, confirm, back up, remove, then decide whether to
//! keep the backup. Nothing is written unless the operator says yes.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

use tracing::info;

use super::{apply, find_capture_files, format_size, preview, render_preview, Preview, SanitizationReport};
use crate::backup::BackupManager;
use crate::error::Result;
use crate::rules::PhyMatchers;

/// Operator interaction used by [`run_interactive`].
pub trait Prompt {
    /// Show a line of text.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be written.
    fn say(&mut self, text: &str) -> io::Result<()>;

    /// Ask a yes/no question.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal cannot be read or written.
    fn confirm(&mut self, question: &str, default: bool) -> io::Result<bool>;
}

/// A [`Prompt`] on the process's stdin and stdout.
#[derive(Debug, Default)]
pub struct StdioPrompt;

impl Prompt for StdioPrompt {
    fn say(&mut self, text: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{text}")
    }

    fn confirm(&mut self, question: &str, default: bool) -> io::Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        let mut out = io::stdout().lock();
        write!(out, "{question} {hint} ")?;
        out.flush()?;

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer)? == 0 {
            return Ok(false);
        }
        Ok(parse_answer(&answer).unwrap_or(default))
    }
}

fn parse_answer(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// How an interactive session ended.
#[derive(Debug)]
pub enum InteractiveOutcome {
    /// No capture files were found.
    NoFiles,
    /// Nothing matched; nothing was written.
    Clean(Preview),
    /// The operator declined; nothing was written.
    Declined(Preview),
    /// Records were removed.
    Completed {
        /// What was removed.
        report: SanitizationReport,
        /// Whether the backup was kept.
        backup_kept: bool,
    },
}

/// Run the guided cleanup over `root`.
///
/// # Errors
///
/// Returns an error if the prompt fails, or if the backup cannot be
/// created (in which case nothing has been modified).
pub fn run_interactive<P: Prompt>(
    prompt: &mut P,
    root: &Path,
    matchers: &PhyMatchers,
    in_use: Duration,
    backups: &BackupManager,
) -> Result<InteractiveOutcome> {
    prompt.say(&format!("[1/7] Looking for capture files in {}", root.display()))?;
    let found = find_capture_files(root);
    if found.is_empty() {
        prompt.say("No capture files found.")?;
        return Ok(InteractiveOutcome::NoFiles);
    }
    let total: u64 = found.iter().map(|f| f.size_bytes).sum();
    prompt.say(&format!("      {} files, {}", found.len(), format_size(total)))?;

    prompt.say("[2/7] Scanning against dynamic exclusions")?;
    let scan = preview(root, matchers, in_use);

    prompt.say("[3/7] Preview")?;
    prompt.say(render_preview(&scan).trim_end())?;
    if scan.is_clean() {
        return Ok(InteractiveOutcome::Clean(scan));
    }

    prompt.say("[4/7] Confirm")?;
    let question = format!(
        "Remove {} records from {} files? A backup is made first.",
        scan.total_matches, scan.affected_files
    );
    if !prompt.confirm(&question, false)? {
        prompt.say("Cancelled; nothing was changed.")?;
        return Ok(InteractiveOutcome::Declined(scan));
    }

    prompt.say(&format!("[5/7] Backing up to {}", backups.root().display()))?;
    let mut report = apply(&scan, matchers, Some(backups))?;

    prompt.say("[6/7] Removed")?;
    for result in &report.results {
        match &result.error {
            Some(err) => prompt.say(&format!("      failed: {} ({err})", result.target.display()))?,
            None => prompt.say(&format!(
                "      {}: {} removed",
                result.target.display(),
                result.removed_count
            ))?,
        }
    }
    prompt.say(&format!(
        "      {} records removed from {} files in {} ms",
        report.records_removed, report.files_modified, report.duration_ms
    ))?;

    prompt.say("[7/7] Backup")?;
    let mut backup_kept = true;
    if let Some(backup) = &report.backup {
        prompt.say(&format!(
            "      {} ({})",
            backup.path.display(),
            format_size(backup.total_size_bytes)
        ))?;
        if !prompt.confirm("Keep the backup?", true)? {
            backups.delete_backup(&backup.path)?;
            backup_kept = false;
            prompt.say("      Backup deleted.")?;
        }
    }
    if !backup_kept {
        report.backup = None;
    }

    info!(removed = report.records_removed, backup_kept, "Interactive sanitization finished");
    Ok(InteractiveOutcome::Completed { report, backup_kept })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::fs;

    use filetime::FileTime;

    use super::*;
    use crate::rules::{FilterRule, MatchType, Phy, PhyRules};
    use crate::testutil::KismetFixture;

    #[derive(Default)]
    struct ScriptedPrompt {
        answers: VecDeque<bool>,
        transcript: Vec<String>,
    }

    impl ScriptedPrompt {
        fn answering(answers: &[bool]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
                transcript: Vec::new(),
            }
        }
    }

    impl Prompt for ScriptedPrompt {
        fn say(&mut self, text: &str) -> io::Result<()> {
            self.transcript.push(text.to_string());
            Ok(())
        }

        fn confirm(&mut self, question: &str, default: bool) -> io::Result<bool> {
            self.transcript.push(question.to_string());
            Ok(self.answers.pop_front().unwrap_or(default))
        }
    }

    fn iphone_rules() -> PhyMatchers {
        let mut rules = PhyRules::default();
        rules.get_mut(Phy::Wifi).push(FilterRule::new(
            "iPhone*",
            MatchType::Pattern,
            "iOS hotspots",
            Phy::Wifi,
        ));
        PhyMatchers::new(&rules)
    }

    fn capture() -> KismetFixture {
        let fx = KismetFixture::new();
        fx.add_wifi("AA:00:00:00:00:01", "iPhone Hotspot 7F2", 1.0, 1.0);
        fx.add_wifi("AA:00:00:00:00:02", "Home", 1.0, 1.0);
        filetime::set_file_mtime(fx.path(), FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
        fx
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("Y\n"), Some(true));
        assert_eq!(parse_answer(" no "), Some(false));
        assert_eq!(parse_answer("\n"), None);
        assert_eq!(parse_answer("maybe"), None);
    }

    #[test]
    fn test_declining_changes_nothing() {
        let fx = capture();
        let backups = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(backups.path());
        let mut prompt = ScriptedPrompt::answering(&[false]);

        let outcome =
            run_interactive(&mut prompt, fx.dir(), &iphone_rules(), Duration::from_secs(30), &manager)
                .unwrap();

        assert!(matches!(outcome, InteractiveOutcome::Declined(ref p) if p.total_matches == 1));
        assert_eq!(fx.count("devices"), 2);
        assert!(manager.list_backups().unwrap().is_empty());
        assert!(prompt.transcript.iter().any(|l| l.starts_with("[4/7]")));
        assert!(!prompt.transcript.iter().any(|l| l.starts_with("[5/7]")));
    }

    #[test]
    fn test_confirm_and_keep_backup() {
        let fx = capture();
        let pristine = fs::read(fx.path()).unwrap();
        let backups = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(backups.path());
        let mut prompt = ScriptedPrompt::answering(&[true, true]);

        let outcome =
            run_interactive(&mut prompt, fx.dir(), &iphone_rules(), Duration::from_secs(30), &manager)
                .unwrap();

        let InteractiveOutcome::Completed { report, backup_kept } = outcome else {
            panic!("expected completion");
        };
        assert!(backup_kept);
        assert_eq!(report.records_removed, 1);
        assert_eq!(fx.count("devices"), 1);
        let backup = report.backup.unwrap();
        assert_eq!(fs::read(&backup.files[0].copy).unwrap(), pristine);
        assert!(prompt.transcript.iter().any(|l| l.starts_with("[7/7]")));
    }

    #[test]
    fn test_confirm_and_discard_backup() {
        let fx = capture();
        let backups = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(backups.path());
        let mut prompt = ScriptedPrompt::answering(&[true, false]);

        let outcome =
            run_interactive(&mut prompt, fx.dir(), &iphone_rules(), Duration::from_secs(30), &manager)
                .unwrap();

        assert!(matches!(outcome, InteractiveOutcome::Completed { backup_kept: false, .. }));
        assert!(manager.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_clean_capture_asks_nothing() {
        let fx = KismetFixture::new();
        fx.add_wifi("AA:00:00:00:00:02", "Home", 1.0, 1.0);
        filetime::set_file_mtime(fx.path(), FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
        let backups = tempfile::tempdir().unwrap();
        let mut prompt = ScriptedPrompt::default();

        let outcome = run_interactive(
            &mut prompt,
            fx.dir(),
            &iphone_rules(),
            Duration::from_secs(30),
            &BackupManager::new(backups.path()),
        )
        .unwrap();
        assert!(matches!(outcome, InteractiveOutcome::Clean(_)));
        assert!(prompt.transcript.iter().all(|l| !l.ends_with('?')));
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        let mut prompt = ScriptedPrompt::default();
        let outcome = run_interactive(
            &mut prompt,
            dir.path(),
            &iphone_rules(),
            Duration::from_secs(30),
            &BackupManager::new(backups.path()),
        )
        .unwrap();
        assert!(matches!(outcome, InteractiveOutcome::NoFiles));
    }
}
