//! Per-challenge results of one game

use std::fmt;
use std::time::Duration;

use colored::Colorize;

/// Result of one challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    /// Ran out of time; the reason is for the summary only
    Failed(String),
    /// Abandoned because of shutdown
    Interrupted,
}

impl Verdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Verdict::Passed)
    }
}

/// One line of the report
#[derive(Debug, Clone)]
pub struct ChallengeRecord {
    pub name: String,
    pub verdict: Verdict,
    pub elapsed: Duration,
}

impl fmt::Display for ChallengeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = format!("{:>8.1?}", self.elapsed);
        match &self.verdict {
            Verdict::Passed => write!(f, "{} {:<12} {}", "✓".green(), self.name, elapsed.dimmed()),
            Verdict::Failed(reason) => write!(
                f,
                "{} {:<12} {} {}",
                "✗".red(),
                self.name,
                elapsed.dimmed(),
                reason.yellow()
            ),
            Verdict::Interrupted => write!(f, "{} {:<12} {}", "-".dimmed(), self.name, "interrupted".dimmed()),
        }
    }
}

/// Everything that happened in one game
#[derive(Debug, Clone, Default)]
pub struct DungeonReport {
    records: Vec<ChallengeRecord>,
    interrupted: bool,
}

impl DungeonReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: impl Into<String>, verdict: Verdict, elapsed: Duration) -> &ChallengeRecord {
        if verdict == Verdict::Interrupted {
            self.interrupted = true;
        }
        self.records.push(ChallengeRecord {
            name: name.into(),
            verdict,
            elapsed,
        });
        &self.records[self.records.len() - 1]
    }

    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    pub fn records(&self) -> &[ChallengeRecord] {
        &self.records
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn passed(&self) -> usize {
        self.records.iter().filter(|r| r.verdict.is_passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.verdict, Verdict::Failed(_)))
            .count()
    }

    /// True when every challenge ran and passed
    pub fn all_passed(&self) -> bool {
        !self.interrupted && !self.records.is_empty() && self.failed() == 0
    }

    /// Colored multi-line summary for the terminal
    pub fn summary(&self) -> String {
        let mut out = format!("{}\n", "Dungeon report".bright_cyan().bold());
        for record in &self.records {
            out.push_str(&format!("  {}\n", record));
        }

        let tally = format!("{}/{} challenges passed", self.passed(), self.records.len());
        let tally = if self.all_passed() {
            tally.green().bold()
        } else if self.interrupted {
            tally.yellow().bold()
        } else {
            tally.red().bold()
        };
        out.push_str(&format!("{}", tally));
        if self.interrupted {
            out.push_str(&format!(" {}", "(interrupted)".dimmed()));
        }
        out
    }
}
