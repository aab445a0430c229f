//! Printable ASCII rendering of a convergence report

use std::fmt::Write;

use super::ConvergenceReport;
use crate::session::Session;

const EXCERPT_CHARS: usize = 100;
const RULE: &str = "============================================================";

/// Replace anything outside printable ASCII with `?`; whitespace becomes a space
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c,
            '\n' | '\r' | '\t' => ' ',
            _ => '?',
        })
        .collect()
}

/// Sanitized text cut to `EXCERPT_CHARS`
pub fn excerpt(text: &str) -> String {
    let clean = sanitize(text.trim());
    if clean.len() <= EXCERPT_CHARS {
        clean
    } else {
        format!("{}...", &clean[..EXCERPT_CHARS - 3])
    }
}

/// Render `report` for `session`
pub fn render_map(session: &Session, report: &ConvergenceReport) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = write_map(&mut out, session, report);
    out
}

fn write_map(out: &mut String, session: &Session, report: &ConvergenceReport) -> std::fmt::Result {
    writeln!(out, "{}", RULE)?;
    writeln!(out, "CONVERGENCE MAP")?;
    writeln!(out, "{}", RULE)?;
    writeln!(out, "Session: {}", sanitize(&session.id))?;
    writeln!(out, "Problem: {}", excerpt(&session.problem))?;
    writeln!(
        out,
        "Score:   {:.2} (threshold {:.2}, {})",
        report.convergence_score,
        report.threshold,
        if report.converged { "converged" } else { "not converged" }
    )?;
    writeln!(
        out,
        "Thoughts: {} total, {} endorsed, {} integrations",
        report.total_thoughts, report.endorsed_thoughts, report.total_integrations
    )?;

    writeln!(out)?;
    writeln!(out, "CONSENSUS AREAS")?;
    if report.consensus.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for item in &report.consensus {
        writeln!(
            out,
            "  [#{} {}] {}",
            item.thought_id,
            item.agent_lens,
            excerpt(&item.content)
        )?;
        writeln!(
            out,
            "      agreement {:+.2} from {} lens(es)",
            item.agreement, item.endorsement_count
        )?;
    }

    writeln!(out)?;
    writeln!(out, "PRODUCTIVE TENSIONS")?;
    if report.tensions.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for tension in &report.tensions {
        writeln!(
            out,
            "  [#{} {}] {}",
            tension.thought_id,
            tension.agent_lens,
            excerpt(&tension.content)
        )?;
        writeln!(
            out,
            "      support: {} | challenge: {} | spread {:.2}",
            join(&tension.supporters),
            join(&tension.challengers),
            tension.spread
        )?;
        for challenge in &tension.challenges {
            writeln!(
                out,
                "      - {} ({:+.2}): {}",
                challenge.from_agent,
                challenge.level,
                excerpt(&challenge.concern)
            )?;
        }
    }

    writeln!(out)?;
    writeln!(out, "CIRCULAR REASONING")?;
    if report.cycles.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for cycle in &report.cycles {
        let mut path: Vec<String> = cycle.iter().map(|id| format!("#{}", id)).collect();
        if let Some(first) = cycle.first() {
            path.push(format!("#{}", first));
        }
        writeln!(out, "  {}", path.join(" -> "))?;
    }

    writeln!(out)?;
    writeln!(out, "AGENT CONTRIBUTIONS")?;
    for contribution in &report.agent_contributions {
        writeln!(
            out,
            "  {:<11} {:<20} {:>3} thought(s), avg weight {:.2}",
            contribution.agent_lens.as_str(),
            "#".repeat(contribution.thought_count.min(20)),
            contribution.thought_count,
            contribution.average_weight
        )?;
    }
    writeln!(out, "{}", RULE)?;
    Ok(())
}

fn join(lenses: &[crate::session::AgentLens]) -> String {
    lenses
        .iter()
        .map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::ConvergenceEngine;
    use crate::session::{AgentLens, GraphLimits, ThoughtGraph};

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("caf\u{e9}\tbar\n"), "caf? bar ");
        assert_eq!(sanitize("plain ~text~"), "plain ~text~");
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "a".repeat(150);
        let e = excerpt(&long);
        assert_eq!(e.len(), 100);
        assert!(e.ends_with("..."));
        assert_eq!(excerpt("short"), "short");
    }

    #[test]
    fn test_map_sections_and_ascii() {
        let session = Session::new(
            "Ship the r\u{e9}write?".into(),
            vec![AgentLens::Analytical, AgentLens::Skeptical, AgentLens::Creative],
        );
        let mut g = ThoughtGraph::new(GraphLimits::default());
        g.contribute(AgentLens::Analytical, "Latency drops by 40%", &[], 0.8)
            .unwrap();
        g.contribute(AgentLens::Creative, "Ship behind a flag \u{1F680}", &[1], 0.6)
            .unwrap();
        g.endorse(1, AgentLens::Creative, 0.9, None).unwrap();
        g.endorse(2, AgentLens::Analytical, 0.7, None).unwrap();
        g.endorse(2, AgentLens::Skeptical, -0.9, Some("rollback plan?"))
            .unwrap();
        g.propose_integration(AgentLens::Skeptical, "flag + rollback", &[2, 1])
            .unwrap();

        let report = ConvergenceEngine::default().analyze(&session, &g, 0.6);
        let map = render_map(&session, &report);

        assert!(map.is_ascii());
        assert!(map.contains("CONSENSUS AREAS"));
        assert!(map.contains("PRODUCTIVE TENSIONS"));
        assert!(map.contains("CIRCULAR REASONING"));
        assert!(map.contains("AGENT CONTRIBUTIONS"));
        assert!(map.contains("Ship the r?write?"));
        assert!(map.contains("rollback plan?"));
        assert!(map.contains("#1 -> #2 -> #1"));
    }
}
