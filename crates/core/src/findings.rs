//! Mode resolution and `FindingsDispatcher` (spec §4.4), plus the
//! persistence guardrail that keeps a terminal-success job from ever
//! carrying a null findings/report pair.

use serde_json::json;

use crate::analysis::{Metrics, Pass};
use crate::models::{AnalysisMode, AnalysisPhase, Finding, Findings, Report, Severity};

/// `mode := job.analysis_mode || session.analysis_context || "batting"`,
/// computed once per job (spec §4.4) and identical across quick and deep
/// payloads.
pub fn resolve_mode(job_analysis_mode: Option<AnalysisMode>, session_analysis_context: Option<&str>) -> AnalysisMode {
    job_analysis_mode
        .or_else(|| session_analysis_context.and_then(AnalysisMode::parse))
        .unwrap_or_default()
}

fn severity_from(value: f64) -> Severity {
    if value >= 0.66 {
        Severity::High
    } else if value >= 0.33 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn overall_level(findings: &[Finding]) -> Severity {
    findings
        .iter()
        .map(|f| f.severity)
        .max()
        .unwrap_or(Severity::Low)
}

fn phase_of(pass: Pass) -> AnalysisPhase {
    match pass {
        Pass::Quick => AnalysisPhase::Quick,
        Pass::Deep => AnalysisPhase::Deep,
    }
}

fn evidence(metrics: &Metrics, keys: &[&str]) -> serde_json::Value {
    json!({
        "worst_frames": metrics.pose.worst_frames,
        "reliability": metrics.pose.reliability,
        "clip_duration_secs": metrics.clip_duration_secs,
        "metrics": keys.iter().map(|k| (*k, metrics.get(k))).collect::<std::collections::BTreeMap<_, _>>(),
    })
}

/// Dispatches to the mode-specific generator (spec §4.4). Each generator's
/// finding codes are isolated to its own mode — no cross-mode code ever
/// appears in another mode's output.
pub fn dispatch_findings(mode: AnalysisMode, metrics: &Metrics) -> Findings {
    match mode {
        AnalysisMode::Batting => generate_batting_findings(metrics),
        AnalysisMode::Bowling => generate_bowling_findings(metrics),
        AnalysisMode::Wicketkeeping => generate_wicketkeeping_findings(metrics),
        AnalysisMode::Fielding => generate_fielding_findings(metrics),
    }
}

pub fn generate_batting_findings(metrics: &Metrics) -> Findings {
    let phase = Some(phase_of(metrics.pass));
    let findings = vec![
        Finding {
            code: "HEAD_MOVEMENT".into(),
            title: "Head stability through contact".into(),
            severity: severity_from(metrics.get("head_stability")),
            message: "Head position drifts during the swing rather than staying still through contact.".into(),
            why_matters: "A stable head keeps the eyes level on the ball, improving contact consistency.".into(),
            evidence: evidence(metrics, &["head_stability"]),
            suggested_drills: vec!["Wall drill: head against wall through downswing".into(), "Shadow batting with a mirror".into()],
            phase,
        },
        Finding {
            code: "BAT_SWING_PATH".into(),
            title: "Swing path deviation".into(),
            severity: severity_from(metrics.get("swing_path_deviation")),
            message: "The bat path shows lateral deviation from an ideal straight-line approach.".into(),
            why_matters: "A tighter swing path widens the effective hitting zone.".into(),
            evidence: evidence(metrics, &["swing_path_deviation"]),
            suggested_drills: vec!["Tee work focusing on bat path".into(), "Resistance band swing path drill".into()],
            phase,
        },
        Finding {
            code: "WEIGHT_TRANSFER".into(),
            title: "Weight transfer timing".into(),
            severity: severity_from(metrics.get("weight_transfer_timing")),
            message: "Transfer of weight onto the front foot is mistimed relative to bat swing initiation.".into(),
            why_matters: "Correct sequencing generates more power without sacrificing balance.".into(),
            evidence: evidence(metrics, &["weight_transfer_timing"]),
            suggested_drills: vec!["Step-and-swing drill".into()],
            phase,
        },
        Finding {
            code: "BALANCE_STABILITY".into(),
            title: "Post-shot balance".into(),
            severity: severity_from(metrics.get("balance_stability")),
            message: "Balance is not consistently maintained through the follow-through.".into(),
            why_matters: "Poor balance limits shot selection and recovery for the next delivery.".into(),
            evidence: evidence(metrics, &["balance_stability"]),
            suggested_drills: vec!["Single-leg balance hold".into(), "Slow-motion shadow shots".into()],
            phase,
        },
    ];
    Findings {
        overall_level: overall_level(&findings),
        findings,
    }
}

pub fn generate_bowling_findings(metrics: &Metrics) -> Findings {
    let phase = Some(phase_of(metrics.pass));
    let mut findings = Vec::new();

    if !metrics.pose.ball_tracking_available {
        findings.push(Finding {
            code: "INSUFFICIENT_BALL_TRACKING".into(),
            title: "Ball tracking signal unavailable".into(),
            severity: Severity::Low,
            message: "Release-point and trajectory signals could not be derived from this clip with confidence.".into(),
            why_matters: "Ball-flight-dependent findings are omitted rather than guessed from an unreliable signal.".into(),
            evidence: evidence(metrics, &["release_point_variance"]),
            suggested_drills: vec!["Re-record from a side-on camera angle with the ball in frame".into()],
            phase,
        });
    } else {
        findings.push(Finding {
            code: "INCONSISTENT_RELEASE_POINT".into(),
            title: "Release point consistency".into(),
            severity: severity_from(metrics.get("release_point_variance")),
            message: "The ball release point varies noticeably delivery to delivery.".into(),
            why_matters: "A repeatable release point is the single biggest driver of line-and-length consistency.".into(),
            evidence: evidence(metrics, &["release_point_variance"]),
            suggested_drills: vec!["Target-line run-throughs".into(), "Release point marker drill".into()],
            phase,
        });
        findings.push(Finding {
            code: "SWING_ANALYSIS".into(),
            title: "Swing trajectory consistency".into(),
            severity: severity_from(metrics.get("swing_trajectory_consistency")),
            message: "Swing trajectory through the air is inconsistent across deliveries.".into(),
            why_matters: "Consistent swing shape makes the threat harder for a batter to pick early.".into(),
            evidence: evidence(metrics, &["swing_trajectory_consistency"]),
            suggested_drills: vec!["Seam-position drills".into()],
            phase,
        });
    }

    findings.push(Finding {
        code: "FRONT_ARM_ALIGNMENT".into(),
        title: "Front arm alignment".into(),
        severity: severity_from(metrics.get("front_arm_alignment")),
        message: "Front arm drops or drifts away from the target line during the delivery stride.".into(),
        why_matters: "A high, aligned front arm keeps the shoulders square and supports accuracy.".into(),
        evidence: evidence(metrics, &["front_arm_alignment"]),
        suggested_drills: vec!["Wall-brace front arm drill".into(), "Slow-motion delivery stride walkthrough".into()],
        phase,
    });

    Findings {
        overall_level: overall_level(&findings),
        findings,
    }
}

pub fn generate_wicketkeeping_findings(metrics: &Metrics) -> Findings {
    let phase = Some(phase_of(metrics.pass));
    let findings = vec![
        Finding {
            code: "GLOVE_POSITIONING".into(),
            title: "Glove positioning".into(),
            severity: severity_from(metrics.get("glove_position_error")),
            message: "Glove position lags behind the line of the ball rather than leading it.".into(),
            why_matters: "Leading with the gloves reduces fumbles on balls taking the edge.".into(),
            evidence: evidence(metrics, &["glove_position_error"]),
            suggested_drills: vec!["Mirror glove-tracking drill".into()],
            phase,
        },
        Finding {
            code: "STANCE_READINESS".into(),
            title: "Stance readiness".into(),
            severity: severity_from(metrics.get("stance_readiness")),
            message: "Stance is not consistently set and balanced before each delivery.".into(),
            why_matters: "A ready stance shortens reaction time to bat-pad chances.".into(),
            evidence: evidence(metrics, &["stance_readiness"]),
            suggested_drills: vec!["Rhythm stance drill with a partner feeder".into(), "Low crouch hold".into()],
            phase,
        },
        Finding {
            code: "LATERAL_MOVEMENT".into(),
            title: "Lateral movement efficiency".into(),
            severity: severity_from(metrics.get("lateral_movement_efficiency")),
            message: "Lateral movement to either side shows unnecessary steps or delayed push-off.".into(),
            why_matters: "Efficient lateral movement extends reachable range without overbalancing.".into(),
            evidence: evidence(metrics, &["lateral_movement_efficiency"]),
            suggested_drills: vec!["Lateral shuffle with cone targets".into()],
            phase,
        },
        Finding {
            code: "CATCH_TECHNIQUE".into(),
            title: "Catch technique".into(),
            severity: severity_from(metrics.get("catch_technique_score")),
            message: "Hand position and give at the point of the catch are inconsistent.".into(),
            why_matters: "Soft hands and a controlled give reduce dropped or spilled chances.".into(),
            evidence: evidence(metrics, &["catch_technique_score"]),
            suggested_drills: vec!["Soft-hands catching drill".into(), "Reaction ball catching".into()],
            phase,
        },
    ];
    Findings {
        overall_level: overall_level(&findings),
        findings,
    }
}

pub fn generate_fielding_findings(metrics: &Metrics) -> Findings {
    let phase = Some(phase_of(metrics.pass));
    let findings = vec![
        Finding {
            code: "APPROACH_ANGLE".into(),
            title: "Approach angle to the ball".into(),
            severity: severity_from(metrics.get("approach_angle_deviation")),
            message: "Approach to the ball is not consistently taken on a line that sets up the throw.".into(),
            why_matters: "The right approach angle shortens the gather-and-release sequence.".into(),
            evidence: evidence(metrics, &["approach_angle_deviation"]),
            suggested_drills: vec!["Angled approach cone drill".into()],
            phase,
        },
        Finding {
            code: "THROWING_MECHANICS".into(),
            title: "Throwing mechanics".into(),
            severity: severity_from(metrics.get("throwing_mechanics_score")),
            message: "Throwing arm action shows inconsistent alignment and follow-through.".into(),
            why_matters: "Clean mechanics improve both throw accuracy and arm health over a season.".into(),
            evidence: evidence(metrics, &["throwing_mechanics_score"]),
            suggested_drills: vec!["Long toss progression".into(), "Throwing mechanics wall drill".into()],
            phase,
        },
        Finding {
            code: "GROUND_FIELDING_TECHNIQUE".into(),
            title: "Ground fielding technique".into(),
            severity: severity_from(metrics.get("ground_fielding_technique")),
            message: "Base position and hands on ground-ball pickups are inconsistent.".into(),
            why_matters: "Consistent technique on ground balls cuts down on misfields under pressure.".into(),
            evidence: evidence(metrics, &["ground_fielding_technique"]),
            suggested_drills: vec!["Low base fielding drill".into()],
            phase,
        },
        Finding {
            code: "REACTION_TIME".into(),
            title: "Reaction time".into(),
            severity: severity_from(metrics.get("reaction_time_ms_normalized")),
            message: "First-step reaction to the ball off the bat is delayed relative to target benchmarks.".into(),
            why_matters: "Faster first-step reaction extends effective fielding range.".into(),
            evidence: evidence(metrics, &["reaction_time_ms_normalized"]),
            suggested_drills: vec!["Reaction ball first-step drill".into(), "Visual cue release drill".into()],
            phase,
        },
    ];
    Findings {
        overall_level: overall_level(&findings),
        findings,
    }
}

/// Assembles the companion `Report` for a generated `Findings` set.
pub fn assemble_report(mode: AnalysisMode, pass: Pass, findings: &Findings) -> Report {
    let mut text = format!(
        "{} — {} pass\n\nOverall level: {:?}\n\n",
        mode.report_title(),
        pass.as_str(),
        findings.overall_level
    );
    for finding in &findings.findings {
        text.push_str(&format!("- [{:?}] {}: {}\n", finding.severity, finding.title, finding.message));
    }
    let sections = json!({
        "finding_count": findings.findings.len(),
        "codes": findings.findings.iter().map(|f| f.code.clone()).collect::<Vec<_>>(),
    });
    Report {
        text,
        sections: Some(sections),
    }
}

/// Error describing which persisted artifact was missing when the
/// guardrail in §4.4 fires. The worker sets `error_message` from this and
/// aborts rather than marking the job done.
#[derive(Debug, thiserror::Error)]
pub enum GuardrailViolation {
    #[error("findings missing for {pass} pass")]
    MissingFindings { pass: &'static str },
    #[error("report missing for {pass} pass")]
    MissingReport { pass: &'static str },
    #[error("findings list empty for {pass} pass")]
    EmptyFindingsList { pass: &'static str },
}

/// Asserts that the artifacts for the pass just completed are present and
/// well-formed, before the worker is allowed to advance the job's status.
/// This is the last line of defense against persisting a job as
/// successful with nothing for the UI to render.
pub fn check_persistence_guardrail(
    pass: Pass,
    findings: Option<&Findings>,
    report: Option<&Report>,
) -> Result<(), GuardrailViolation> {
    let pass_name = pass.as_str();
    let findings = findings.ok_or(GuardrailViolation::MissingFindings { pass: pass_name })?;
    report.ok_or(GuardrailViolation::MissingReport { pass: pass_name })?;
    if findings.findings.is_empty() {
        return Err(GuardrailViolation::EmptyFindingsList { pass: pass_name });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{compute_metrics, extract_pose};

    fn metrics_for(mode_seed: &[u8], pass: Pass) -> Metrics {
        let pose = extract_pose(mode_seed, 24, pass);
        compute_metrics(pose, mode_seed, 24)
    }

    #[test]
    fn resolve_mode_prefers_job_then_session_then_default() {
        assert_eq!(
            resolve_mode(Some(AnalysisMode::Bowling), Some("fielding")),
            AnalysisMode::Bowling
        );
        assert_eq!(resolve_mode(None, Some("fielding")), AnalysisMode::Fielding);
        assert_eq!(resolve_mode(None, None), AnalysisMode::Batting);
        assert_eq!(resolve_mode(None, Some("not-a-mode")), AnalysisMode::Batting);
    }

    #[test]
    fn bowling_findings_never_contain_batting_codes() {
        let metrics = metrics_for(b"bowling-clip", Pass::Deep);
        let findings = generate_bowling_findings(&metrics);
        let batting_codes = ["HEAD_MOVEMENT", "BAT_SWING_PATH", "WEIGHT_TRANSFER", "BALANCE_STABILITY"];
        for finding in &findings.findings {
            assert!(!batting_codes.contains(&finding.code.as_str()));
        }
        assert!(findings.findings.iter().any(|f| {
            ["INSUFFICIENT_BALL_TRACKING", "INCONSISTENT_RELEASE_POINT", "SWING_ANALYSIS", "FRONT_ARM_ALIGNMENT"]
                .contains(&f.code.as_str())
        }));
    }

    #[test]
    fn each_mode_set_is_isolated() {
        let metrics = metrics_for(b"any-clip", Pass::Quick);
        let all = [
            generate_batting_findings(&metrics),
            generate_bowling_findings(&metrics),
            generate_wicketkeeping_findings(&metrics),
            generate_fielding_findings(&metrics),
        ];
        let mut seen = std::collections::HashSet::new();
        for findings in &all {
            for finding in &findings.findings {
                assert!(seen.insert(finding.code.clone()), "duplicate code across modes: {}", finding.code);
            }
        }
    }

    #[test]
    fn guardrail_rejects_missing_report() {
        let metrics = metrics_for(b"clip", Pass::Quick);
        let findings = generate_batting_findings(&metrics);
        let err = check_persistence_guardrail(Pass::Quick, Some(&findings), None).unwrap_err();
        assert!(matches!(err, GuardrailViolation::MissingReport { .. }));
    }

    #[test]
    fn guardrail_accepts_complete_artifacts() {
        let metrics = metrics_for(b"clip", Pass::Quick);
        let findings = generate_batting_findings(&metrics);
        let report = assemble_report(AnalysisMode::Batting, Pass::Quick, &findings);
        assert!(check_persistence_guardrail(Pass::Quick, Some(&findings), Some(&report)).is_ok());
    }
}
