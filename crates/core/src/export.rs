//! ExportGate (spec §4.5): a deterministic, mode-labeled PDF rendered
//! purely from an `AnalysisJob`'s persisted artifacts.

use lopdf::{Document, Object, Stream, content::Content, content::Operation, dictionary};

use crate::errors::ExportError;
use crate::models::{AnalysisJob, AnalysisMode, Finding, Findings, JobStatus, Severity};

/// Consolidated view over a job's quick/deep findings, ready for rendering.
struct Consolidated<'a> {
    mode: AnalysisMode,
    findings: Vec<(&'a Finding, &'static str)>,
    partial: bool,
}

/// `ExportReport(job_id) -> bytes`. Callers are expected to have already
/// loaded `job` from the `JobStore`; this function only enforces the
/// terminal-state precondition and renders.
pub fn export_report(job: &AnalysisJob, session_analysis_context: Option<&str>) -> Result<Vec<u8>, ExportError> {
    if !job.status.is_terminal_success() {
        return Err(ExportError::PreconditionFailed(format!(
            "job status is {}, expected done or completed",
            job.status.as_str()
        )));
    }

    let mode = crate::findings::resolve_mode(job.analysis_mode, session_analysis_context);
    let consolidated = consolidate(job, mode);
    Ok(render_pdf(job, &consolidated))
}

/// Prefers deep findings over quick when both exist (spec §4.5); a
/// quick-only job keeps its `phase` label on every finding. Marks the
/// render `partial` if neither pass ended up with usable artifacts —
/// a state the §4.4 guardrail should make unreachable, but the renderer
/// degrades gracefully rather than panicking.
fn consolidate(job: &AnalysisJob, mode: AnalysisMode) -> Consolidated<'_> {
    let deep: Option<&Findings> = job.deep_findings.as_ref().filter(|f| !f.findings.is_empty());
    let quick: Option<&Findings> = job.quick_findings.as_ref().filter(|f| !f.findings.is_empty());

    let (findings, partial): (Vec<(&Finding, &'static str)>, bool) = match (deep, quick) {
        (Some(d), _) => (d.findings.iter().map(|f| (f, "deep")).collect(), false),
        (None, Some(q)) => (q.findings.iter().map(|f| (f, "quick")).collect(), false),
        (None, None) => (Vec::new(), true),
    };

    Consolidated { mode, findings, partial }
}

fn top_priorities(findings: &[(&Finding, &'static str)]) -> Vec<&(&Finding, &'static str)> {
    findings.iter().filter(|(f, _)| f.severity == Severity::High).take(3).collect()
}

fn secondary_focus<'a>(findings: &[(&'a Finding, &'static str)], priorities: &[&(&'a Finding, &'static str)]) -> Vec<&'a Finding> {
    findings
        .iter()
        .map(|(f, _)| *f)
        .filter(|f| !priorities.iter().any(|(pf, _)| std::ptr::eq(*pf, *f)))
        .filter(|f| f.severity == Severity::Medium)
        .take(2)
        .collect()
}

fn weekly_actions(findings: &[(&Finding, &'static str)]) -> Vec<String> {
    let mut actions: Vec<String> = findings
        .iter()
        .flat_map(|(f, _)| f.suggested_drills.iter().take(1).cloned())
        .collect();
    actions.truncate(3);
    while actions.len() < 3 {
        actions.push("Review footage with a coach for a full breakdown.".to_string());
    }
    actions
}

fn render_pdf(job: &AnalysisJob, consolidated: &Consolidated) -> Vec<u8> {
    let title = consolidated.mode.report_title();
    let mut lines: Vec<String> = Vec::new();

    lines.push(title.clone());
    if consolidated.partial {
        lines.push("Status: partial (one or more analysis artifacts were unavailable)".into());
    }
    lines.push(String::new());
    lines.push("Coach summary".into());
    lines.push(format!(
        "This report consolidates {} finding(s) from the {} analysis pipeline.",
        consolidated.findings.len(),
        job.stage
    ));
    lines.push(String::new());

    let priorities = top_priorities(&consolidated.findings);
    lines.push("Top priorities".into());
    if priorities.is_empty() {
        lines.push("  (none at high severity)".into());
    }
    for (finding, phase) in &priorities {
        push_finding(&mut lines, finding, phase);
    }
    lines.push(String::new());

    let secondary = secondary_focus(&consolidated.findings, &priorities);
    lines.push("Secondary focus".into());
    if secondary.is_empty() {
        lines.push("  (none)".into());
    }
    for finding in &secondary {
        push_finding(&mut lines, finding, "");
    }
    lines.push(String::new());

    lines.push("This week".into());
    for action in weekly_actions(&consolidated.findings) {
        lines.push(format!("  - {action}"));
    }
    lines.push(String::new());

    lines.push("Findings".into());
    for (finding, phase) in &consolidated.findings {
        push_finding(&mut lines, finding, phase);
    }
    lines.push(String::new());

    lines.push("Evidence appendix".into());
    for (finding, phase) in &consolidated.findings {
        lines.push(format!(
            "  {} [{}]: {}",
            finding.code,
            phase,
            finding.evidence
        ));
    }

    build_pdf_bytes(&lines)
}

fn push_finding(lines: &mut Vec<String>, finding: &Finding, phase: &str) {
    let badge = match finding.severity {
        Severity::Low => "LOW",
        Severity::Medium => "MEDIUM",
        Severity::High => "HIGH",
    };
    let phase_suffix = if phase.is_empty() { String::new() } else { format!(" ({phase})") };
    lines.push(format!("  [{badge}] {}{}", finding.title, phase_suffix));
    lines.push(format!("    {}", finding.message));
    for drill in finding.suggested_drills.iter().take(3) {
        lines.push(format!("    - drill: {drill}"));
    }
}

/// Renders plain text lines into a minimal single-page PDF. `lopdf` is the
/// same crate already relied on elsewhere for PDF handling; here it is
/// used to write rather than parse, keeping the byte stream real PDF
/// rather than a text file wearing a `.pdf` extension.
fn build_pdf_bytes(lines: &[String]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut operations = vec![Operation::new("BT", vec![]), Operation::new("Tf", vec!["F1".into(), 10.into()])];
    let mut y = 760.0;
    for line in lines {
        let sanitized = sanitize_for_pdf(line);
        operations.push(Operation::new("Td", vec![0.into(), 0.into()]));
        operations.push(Operation::new(
            "Tm",
            vec![1.into(), 0.into(), 0.into(), 1.into(), 40.into(), y.into()],
        ));
        operations.push(Operation::new("Tj", vec![Object::string_literal(sanitized)]));
        y -= 14.0;
        if y < 40.0 {
            break;
        }
    }
    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap_or_default()));

    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    if doc.save_to(&mut bytes).is_err() {
        return Vec::new();
    }
    bytes
}

fn sanitize_for_pdf(line: &str) -> String {
    line.chars().filter(|c| c.is_ascii() && !c.is_control()).take(110).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn job_with_status(status: JobStatus) -> AnalysisJob {
        AnalysisJob {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            status,
            stage: "DONE".into(),
            progress_pct: 100,
            analysis_mode: Some(AnalysisMode::Bowling),
            sample_fps: 30,
            include_frames: false,
            s3_key: "videos/1.mp4".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: Some(Utc::now()),
            error_message: None,
            quick_results: None,
            deep_results: None,
            quick_findings: None,
            quick_report: None,
            deep_findings: None,
            deep_report: None,
            quick_results_s3_key: None,
            deep_results_s3_key: None,
        }
    }

    #[test]
    fn non_terminal_job_is_rejected() {
        let job = job_with_status(JobStatus::DeepRunning);
        let err = export_report(&job, None).unwrap_err();
        match err {
            ExportError::PreconditionFailed(msg) => assert!(
                msg.contains("deep_running"),
                "expected snake_case status in message, got: {msg}"
            ),
            other => panic!("expected PreconditionFailed, got {other:?}"),
        }
    }

    #[test]
    fn terminal_job_with_no_findings_renders_partial_without_panicking() {
        let job = job_with_status(JobStatus::Done);
        let bytes = export_report(&job, None).unwrap();
        assert!(!bytes.is_empty());
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn completed_alias_is_accepted_like_done() {
        let job = job_with_status(JobStatus::Completed);
        assert!(export_report(&job, None).is_ok());
    }

    #[test]
    fn title_matches_resolved_mode() {
        let metrics = crate::analysis::compute_metrics(
            crate::analysis::extract_pose(b"clip", 30, crate::analysis::Pass::Deep),
            b"clip",
            30,
        );
        let findings = crate::findings::generate_bowling_findings(&metrics);
        let mut job = job_with_status(JobStatus::Done);
        job.deep_findings = Some(findings.clone());
        job.deep_report = Some(crate::findings::assemble_report(AnalysisMode::Bowling, crate::analysis::Pass::Deep, &findings));
        let consolidated = consolidate(&job, AnalysisMode::Bowling);
        assert_eq!(consolidated.mode.report_title(), "Bowling Analysis Report");
        assert!(!consolidated.partial);
    }
}
