use colored::Colorize;
use core::fmt;
use tabled::{Table, Tabled, settings::Style};

/// Category of a per-record failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailureKind {
    Parse,
    LookupMiss,
    Transient,
    FilesystemConflict,
    Rename,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Parse => "parse",
            FailureKind::LookupMiss => "lookup miss",
            FailureKind::Transient => "transient",
            FailureKind::FilesystemConflict => "filesystem conflict",
            FailureKind::Rename => "rename",
        }
    }

    fn hint(&self) -> &'static str {
        match self {
            FailureKind::Parse => {
                "Files that did not match the filename pattern were left out of the index. \
                 Rename them (normalize-film-files can help) or pass a different --regex."
            }
            FailureKind::LookupMiss => {
                "No metadata was found for these films. This is usually a wrong year or a \
                 misspelled title; fix the file names, then rerun generate-base-index and \
                 generate-films-index."
            }
            FailureKind::Transient => {
                "These requests kept failing. Rerun the same command later; finished work \
                 is cached and will not be fetched again."
            }
            FailureKind::FilesystemConflict => {
                "Existing entries that this tool did not create were left untouched. Move \
                 them away, or rerun with --symlinks if hard links cannot cross volumes."
            }
            FailureKind::Rename => "These files were not renamed. Rename them by hand.",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record that a batch stage had to skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub subject: String,
    pub detail: String,
}

#[derive(Tabled)]
struct Row<'a> {
    #[tabled(rename = "kind")]
    kind: &'static str,
    #[tabled(rename = "item")]
    subject: &'a str,
    #[tabled(rename = "reason")]
    detail: &'a str,
}

/// Failures accumulated over a run, printed once at the end.
#[derive(Debug, Default, Clone)]
pub struct FailureReport {
    failures: Vec<Failure>,
}

impl FailureReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: FailureKind, subject: impl Into<String>, detail: impl Into<String>) {
        let failure = Failure {
            kind,
            subject: subject.into(),
            detail: detail.into(),
        };
        tracing::warn!(kind = %failure.kind, subject = %failure.subject, "{}", failure.detail);
        self.failures.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn count(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }

    /// Render the report as a table followed by one hint per failure kind.
    pub fn render(&self) -> String {
        if self.failures.is_empty() {
            return String::new();
        }
        let mut sorted: Vec<&Failure> = self.failures.iter().collect();
        sorted.sort_by(|a, b| (a.kind, &a.subject).cmp(&(b.kind, &b.subject)));

        let rows = sorted.iter().map(|f| Row {
            kind: f.kind.as_str(),
            subject: &f.subject,
            detail: &f.detail,
        });
        let mut out = Table::new(rows).with(Style::sharp()).to_string();
        out.push('\n');

        let mut kinds: Vec<FailureKind> = sorted.iter().map(|f| f.kind).collect();
        kinds.dedup();
        for kind in kinds {
            out.push('\n');
            let hint = format!("{}: {}", kind.as_str().bold(), kind.hint());
            out.push_str(&textwrap::fill(&hint, textwrap::termwidth().min(100)));
            out.push('\n');
        }
        out
    }

    /// Print the report to stdout, or nothing if every record succeeded.
    pub fn print(&self, stage: &str) {
        if self.failures.is_empty() {
            println!("{} {}", stage, "completed without failures".green());
            return;
        }
        println!(
            "{} {} {}",
            stage,
            "finished with".yellow(),
            format!("{} failure(s)", self.failures.len()).yellow().bold()
        );
        println!("{}", self.render());
    }
}
