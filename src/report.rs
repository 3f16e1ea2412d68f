//! Human-readable and machine-friendly summaries of an evaluation.

use serde::Serialize;

#[cfg(feature = "journal")]
use crate::journal::JournalSnapshot;
use crate::orchestrator::EvaluationReport;
use crate::unit::CandidateId;
use crate::verdict::{MutationVerdict, SuiteVerdict};

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// Markdown summary.
    Markdown,
    /// JSON summary with all mutants inline.
    Json,
}

/// Per-mutant report entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutantReport {
    /// Mutant id.
    pub id: String,
    /// Mutation operator.
    pub mutator: String,
    /// Description of the change.
    pub description: String,
    /// `killed` or `survived`.
    pub verdict: String,
    /// Detecting tests as `name (kind)`.
    pub detected_by: Vec<String>,
}

impl MutantReport {
    fn new(mutant: &CandidateId, verdict: &MutationVerdict) -> Self {
        let (mutator, description) = mutant
            .mutation
            .as_ref()
            .map(|m| (m.mutator.clone(), m.description.clone()))
            .unwrap_or_default();
        let detected_by = match verdict {
            MutationVerdict::Killed { detected_by } => detected_by
                .iter()
                .map(|d| format!("{} ({})", d.test_name, d.kind))
                .collect(),
            MutationVerdict::Survived => Vec::new(),
        };
        Self {
            id: mutant.mutant_id().to_string(),
            mutator,
            description,
            verdict: verdict.to_string(),
            detected_by,
        }
    }
}

/// Aggregated counts and verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteSummary {
    /// Code unit under test.
    pub code_unit: String,
    /// `pass`, `fail`, `skipped`, `broken`, or `incomplete`.
    pub verdict: String,
    /// Killed percentage.
    pub kill_rate: Option<f64>,
    /// Configured threshold.
    pub threshold: Option<f64>,
    /// Judged mutants.
    pub total: usize,
    /// Killed mutants.
    pub killed: usize,
    /// Surviving mutants.
    pub survived: usize,
    /// Killed mutants with a timeout among their detections.
    pub killed_by_timeout: usize,
    /// Mutation operators.
    pub mutators: Vec<String>,
    /// Failing baseline tests when the suite was broken.
    pub broken_tests: Vec<String>,
}

impl SuiteSummary {
    fn from_verdicts<'a>(verdicts: impl Iterator<Item = &'a MutationVerdict>) -> Self {
        let mut out = Self {
            code_unit: String::new(),
            verdict: String::new(),
            kill_rate: None,
            threshold: None,
            total: 0,
            killed: 0,
            survived: 0,
            killed_by_timeout: 0,
            mutators: Vec::new(),
            broken_tests: Vec::new(),
        };
        for verdict in verdicts {
            out.total += 1;
            if verdict.is_killed() {
                out.killed += 1;
            } else {
                out.survived += 1;
            }
            if verdict.killed_by_timeout() {
                out.killed_by_timeout += 1;
            }
        }
        out
    }

    /// Summary of a finished evaluation.
    pub fn from_evaluation(report: &EvaluationReport) -> Self {
        let mut out = Self::from_verdicts(report.mutants.iter().map(|m| &m.verdict));
        out.code_unit = report.code_unit.clone();
        out.verdict = report.verdict.to_string();
        out.kill_rate = report.kill_rate;
        out.threshold = Some(report.threshold);
        out.mutators = report.mutators.clone();
        out
    }

    /// Summary of a replayed journal.
    #[cfg(feature = "journal")]
    pub fn from_snapshot(snapshot: &JournalSnapshot) -> Self {
        let mut out = Self::from_verdicts(snapshot.verdicts.iter().map(|(_, v)| v));
        match (&snapshot.suite, &snapshot.suite_broken) {
            (Some(suite), _) => {
                out.code_unit = suite.code_unit.clone();
                out.verdict = suite.verdict.to_string();
                out.kill_rate = suite.kill_rate;
                out.threshold = Some(suite.threshold);
                out.mutators = suite.mutators.clone();
            }
            (None, Some(failing)) => {
                out.verdict = "broken".to_string();
                out.broken_tests = failing.clone();
            }
            (None, None) => out.verdict = "incomplete".to_string(),
        }
        if out.code_unit.is_empty() {
            if let Some(run) = snapshot.runs.values().next() {
                out.code_unit = run.candidate.code_unit.clone();
            }
        }
        out
    }

    /// True for a passing suite.
    pub fn passed(&self) -> bool {
        self.verdict == SuiteVerdict::Pass.to_string()
    }
}

/// Render a finished evaluation.
pub fn render_evaluation(
    report: &EvaluationReport,
    format: ReportFormat,
) -> Result<String, serde_json::Error> {
    let mutants: Vec<MutantReport> = report
        .mutants
        .iter()
        .map(|m| MutantReport::new(&m.mutant, &m.verdict))
        .collect();
    render_summary(&SuiteSummary::from_evaluation(report), &mutants, format)
}

/// Render a replayed journal.
#[cfg(feature = "journal")]
pub fn render_journal(
    snapshot: &JournalSnapshot,
    format: ReportFormat,
) -> Result<String, serde_json::Error> {
    let mutants: Vec<MutantReport> = snapshot
        .verdicts
        .iter()
        .map(|(id, verdict)| MutantReport::new(id, verdict))
        .collect();
    render_summary(&SuiteSummary::from_snapshot(snapshot), &mutants, format)
}

/// Render a summary and its mutants.
pub fn render_summary(
    summary: &SuiteSummary,
    mutants: &[MutantReport],
    format: ReportFormat,
) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
            "summary": summary,
            "mutants": mutants,
        })),
        ReportFormat::Markdown => Ok(render_markdown(summary, mutants)),
    }
}

fn render_markdown(summary: &SuiteSummary, mutants: &[MutantReport]) -> String {
    let mut out = format!("# Mutation Suite {}\n\n", summary.code_unit);
    out.push_str(&format!("- verdict: {}\n", summary.verdict));
    if let Some(threshold) = summary.threshold {
        out.push_str(&format!("- threshold: {threshold:.2}%\n"));
    }
    if !summary.mutators.is_empty() {
        out.push_str(&format!("- mutators: {}\n", summary.mutators.join(", ")));
    }
    if !summary.broken_tests.is_empty() {
        out.push_str("\n## Failing without mutation\n\n");
        for test in &summary.broken_tests {
            out.push_str(&format!("- {test}\n"));
        }
    }

    out.push_str("\n## Summary\n\n| metric | count |\n|---|---:|\n");
    out.push_str(&format!("| total | {} |\n", summary.total));
    out.push_str(&format!("| killed | {} |\n", summary.killed));
    out.push_str(&format!("| survived | {} |\n", summary.survived));
    out.push_str(&format!(
        "| killed by timeout | {} |\n",
        summary.killed_by_timeout
    ));
    match summary.kill_rate {
        Some(rate) => out.push_str(&format!("| kill rate | {rate:.2}% |\n")),
        None => out.push_str("| kill rate | n/a |\n"),
    }

    if !mutants.is_empty() {
        out.push_str("\n## Mutants\n\n");
        for m in mutants {
            out.push_str(&format!("### {}\n\n", m.id));
            if !m.mutator.is_empty() {
                out.push_str(&format!("- **mutator**: {}\n", m.mutator));
            }
            if !m.description.is_empty() {
                out.push_str(&format!("- **change**: {}\n", m.description));
            }
            out.push_str(&format!("- **verdict**: {}\n", m.verdict));
            for detection in &m.detected_by {
                out.push_str(&format!("- detected by {detection}\n"));
            }
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::OutcomeKind;
    use crate::unit::MutationDescriptor;
    use crate::verdict::Detection;

    fn mutants() -> Vec<MutantReport> {
        vec![
            MutantReport::new(
                &CandidateId::mutant(
                    "unit",
                    MutationDescriptor::new("m1", "increments", "i++ -> i--"),
                ),
                &MutationVerdict::Killed {
                    detected_by: vec![Detection {
                        test_name: "loops".to_string(),
                        kind: OutcomeKind::TimedOut,
                    }],
                },
            ),
            MutantReport::new(
                &CandidateId::mutant("unit", MutationDescriptor::new("m2", "return_vals", "1 -> 0")),
                &MutationVerdict::Survived,
            ),
        ]
    }

    fn summary() -> SuiteSummary {
        let verdicts = [
            MutationVerdict::Killed {
                detected_by: vec![Detection {
                    test_name: "loops".to_string(),
                    kind: OutcomeKind::TimedOut,
                }],
            },
            MutationVerdict::Survived,
        ];
        let mut summary = SuiteSummary::from_verdicts(verdicts.iter());
        summary.code_unit = "unit".to_string();
        summary.verdict = SuiteVerdict::Fail.to_string();
        summary.kill_rate = Some(50.0);
        summary.threshold = Some(100.0);
        summary
    }

    #[test]
    fn counts_follow_verdicts() {
        let summary = summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.killed, 1);
        assert_eq!(summary.survived, 1);
        assert_eq!(summary.killed_by_timeout, 1);
        assert!(!summary.passed());
    }

    #[test]
    fn markdown_lists_mutants_and_detections() {
        let md = render_summary(&summary(), &mutants(), ReportFormat::Markdown)
            .expect("markdown should render");
        assert!(md.contains("# Mutation Suite unit"));
        assert!(md.contains("| kill rate | 50.00% |"));
        assert!(md.contains("- detected by loops (timed_out)"));
        assert!(md.contains("### m2"));
    }

    #[test]
    fn json_contains_summary_and_mutants() {
        let json = render_summary(&summary(), &mutants(), ReportFormat::Json)
            .expect("json should render");
        let value: serde_json::Value = serde_json::from_str(&json).expect("json should parse");
        assert_eq!(value["summary"]["killed"], 1);
        assert_eq!(value["mutants"][1]["verdict"], "survived");
    }
}
