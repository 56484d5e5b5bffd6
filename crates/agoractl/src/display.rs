//! Display helpers for agoractl output.

use agora_shared::evaluation::CaseReport;
use agora_shared::rpc::{HealthResponse, SessionView};
use agora_shared::transcript::{StageOutcome, Transcript, TranscriptEventKind};
use agora_shared::{ConfidenceLabel, ConfidenceSummary, PropertyOutcome, Role, Turn};
use owo_colors::OwoColorize;

const HR: &str = "────────────────────────────────────────────────────────";

fn print_kv(key: &str, value: &str, width: usize) {
    println!("{:width$} {}", key.dimmed(), value, width = width);
}

/// Print an agent reply
pub fn print_reply(turn: &Turn, show_trace: bool) {
    println!();
    println!("{}", turn.text);

    if let Some(summary) = &turn.confidence {
        if summary.total() > 0 {
            println!();
            println!("{}", confidence_line(summary).dimmed());
        }
    }

    if show_trace {
        if let Some(report) = &turn.report {
            println!();
            print_transcript(&report.transcript);
        }
    }
    println!();
}

fn confidence_line(summary: &ConfidenceSummary) -> String {
    let parts: Vec<String> = [
        ConfidenceLabel::Verified,
        ConfidenceLabel::Likely,
        ConfidenceLabel::Uncertain,
        ConfidenceLabel::Unverifiable,
    ]
    .iter()
    .filter(|l| summary.count(**l) > 0)
    .map(|l| format!("{} {}", summary.count(*l), l))
    .collect();
    format!(
        "confidence {:.0}%: {}",
        summary.aggregate * 100.0,
        parts.join(", ")
    )
}

/// Print a reasoning transcript
pub fn print_transcript(transcript: &Transcript) {
    println!("{}", HR.dimmed());
    for event in &transcript.events {
        let prefix = format!("{:>6}ms {:<12}", event.elapsed_ms, event.actor.to_string());
        match &event.kind {
            TranscriptEventKind::StageStart { stage } => {
                println!("{} {} {}", prefix.dimmed(), "▶".cyan(), stage);
            }
            TranscriptEventKind::StageEnd { stage, outcome } => match outcome {
                StageOutcome::Ok => println!("{} {} {}", prefix.dimmed(), "✓".green(), stage),
                StageOutcome::Degraded { reason } => println!(
                    "{} {} {} ({})",
                    prefix.dimmed(),
                    "!".yellow(),
                    stage,
                    reason.yellow()
                ),
                StageOutcome::Skipped => {
                    println!("{} {} {} (skipped)", prefix.dimmed(), "-".dimmed(), stage)
                }
            },
            TranscriptEventKind::Step { text, confidence } => match confidence {
                Some(c) => println!("{}   {} [{:.2}]", prefix.dimmed(), text, c),
                None => println!("{}   {}", prefix.dimmed(), text),
            },
            TranscriptEventKind::Retry { stage, error } => {
                println!("{} {} {} retried after {}", prefix.dimmed(), "↻".yellow(), stage, error);
            }
            TranscriptEventKind::Note { text } => {
                println!("{}   {}", prefix.dimmed(), text.italic());
            }
            TranscriptEventKind::Unknown => {}
        }
    }
    if transcript.dropped > 0 {
        println!("{}", format!("({} more events not recorded)", transcript.dropped).dimmed());
    }
    println!("{}", HR.dimmed());
}

/// Print a session export
pub fn print_session(view: &SessionView) {
    println!("\n{}", format!("session {}", view.id).bold());
    println!("{}", HR.dimmed());
    let kw = 14;
    print_kv("state", view.state.as_str(), kw);
    print_kv("started", &view.created_at.to_rfc3339(), kw);
    print_kv("turns", &view.metrics.turns.to_string(), kw);
    print_kv(
        "answered",
        &format!(
            "{} (boundary {}, clarified {}, degraded {})",
            view.metrics.answered,
            view.metrics.boundary,
            view.metrics.clarifications,
            view.metrics.degraded
        ),
        kw,
    );
    print_kv("engagement", &format!("{:.2}", view.metrics.engagement), kw);
    if !view.scope_memory.is_empty() {
        let topics: Vec<String> = view
            .scope_memory
            .iter()
            .map(|e| format!("{} ({})", e.topic, e.verdict))
            .collect();
        print_kv("topics", &topics.join(", "), kw);
    }
    println!("{}", HR.dimmed());

    for turn in &view.turns {
        match turn.role {
            Role::User => println!("{} {}", "you:".cyan().bold(), turn.text),
            Role::Agent => {
                let state = turn
                    .final_state()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default();
                println!("{} {}", "agora:".green().bold(), format!("[{}]", state).dimmed());
                println!("{}\n", turn.text);
            }
        }
    }
}

/// Print evaluation results; returns the number of failed properties
pub fn print_eval(reports: &[CaseReport]) -> usize {
    let mut failed = 0;
    for report in reports {
        let mark = if report.failed() == 0 {
            "PASS".green().bold().to_string()
        } else {
            "FAIL".red().bold().to_string()
        };
        println!(
            "{} {} ({}/{})",
            mark,
            report.case_id,
            report.passed(),
            report.results.len()
        );
        for (name, outcome) in &report.results {
            match outcome {
                PropertyOutcome::Pass => println!("    {} {}", "✓".green(), name.dimmed()),
                PropertyOutcome::Fail { reason } => {
                    println!("    {} {}: {}", "✗".red(), name, reason)
                }
            }
        }
        failed += report.failed();
    }
    println!("{}", HR.dimmed());
    let total: usize = reports.iter().map(|r| r.results.len()).sum();
    println!("{} of {} properties passed", total - failed, total);
    failed
}

pub fn print_status(health: &HealthResponse, url: &str) {
    println!("\n{}", format!("agorad v{}", health.version).bold());
    println!("{}", HR.dimmed());
    let kw = 10;
    print_kv("url", url, kw);
    print_kv("uptime", &format_uptime(health.uptime_secs), kw);
    print_kv("sessions", &health.active_sessions.to_string(), kw);
}

fn format_uptime(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {}m", h, m)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}
