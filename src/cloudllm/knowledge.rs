//! Shared knowledge base: observations, hypotheses, findings, and target info.
//!
//! Grounded on `original_source/reagent/model/hypothesis.py` and
//! `original_source/reagent/model/binary.py`. The orchestrator (`orchestrator.rs`)
//! mutates this model in response to `update_model` tool calls and renders a
//! summary into subagent prompts; this module owns only the data shape and the
//! promotion/summary operations, not dispatch.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn gen_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Raw, uninterpreted data observed during analysis: disassembly, strings,
/// hex dumps, trace output. Observations don't carry interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub address: Option<u64>,
    pub data: String,
    pub timestamp: f64,
}

impl Observation {
    pub fn new(kind: impl Into<String>, source: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: gen_id(),
            kind: kind.into(),
            source: source.into(),
            address: None,
            data: data.into(),
            timestamp: timestamp_now(),
        }
    }

    pub fn with_address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }
}

/// Hypothesis verification status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypothesisStatus {
    Proposed,
    Testing,
    Confirmed,
    Rejected,
}

/// An interpretive claim about the binary, proposed by an agent and needing
/// verification, e.g. "sub_401230 is an AES-128-ECB encryption routine".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub description: String,
    pub category: String,
    /// 0.0 - 1.0.
    pub confidence: f64,
    /// Observation ids supporting this hypothesis.
    pub evidence: Vec<String>,
    pub status: HypothesisStatus,
    pub proposed_by: String,
    pub verified_by: Option<String>,
    pub address: Option<u64>,
}

impl Hypothesis {
    pub fn new(description: impl Into<String>, category: impl Into<String>, proposed_by: impl Into<String>) -> Self {
        Self {
            id: gen_id(),
            description: description.into(),
            category: category.into(),
            confidence: 0.5,
            evidence: Vec::new(),
            status: HypothesisStatus::Proposed,
            proposed_by: proposed_by.into(),
            verified_by: None,
            address: None,
        }
    }

    pub fn confirm(&mut self, agent: impl Into<String>, additional_evidence: Vec<String>) {
        self.status = HypothesisStatus::Confirmed;
        self.verified_by = Some(agent.into());
        self.confidence = 1.0;
        self.evidence.extend(additional_evidence);
    }

    pub fn reject(&mut self, agent: impl Into<String>) {
        self.status = HypothesisStatus::Rejected;
        self.verified_by = Some(agent.into());
        self.confidence = 0.0;
    }
}

/// A verified, confirmed fact about the binary — the terminal output of
/// analysis, either promoted from a confirmed hypothesis or established
/// directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub description: String,
    pub category: String,
    pub addresses: Vec<u64>,
    pub evidence: Vec<String>,
    pub verified: bool,
    pub verified_by: String,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl Finding {
    /// Constructs a finding established directly by an agent, without going
    /// through [`KnowledgeModel::promote_hypothesis`].
    pub fn new(
        description: impl Into<String>,
        category: impl Into<String>,
        addresses: Vec<u64>,
        evidence: Vec<String>,
        verified_by: impl Into<String>,
    ) -> Self {
        Self {
            id: gen_id(),
            description: description.into(),
            category: category.into(),
            addresses,
            evidence,
            verified: true,
            verified_by: verified_by.into(),
            details: serde_json::Map::new(),
        }
    }
}

/// Static metadata about the analysis target, forwarded by the caller and
/// never computed by this crate (SPEC_FULL §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetInfo {
    pub path: String,
    pub format: String,
    pub arch: String,
    pub endian: String,
    pub bits: u32,
    pub stripped: bool,
    pub pie: bool,
    pub nx: bool,
    pub canary: bool,
    /// "none" | "partial" | "full".
    pub relro: String,
    pub entry_point: Option<u64>,
    #[serde(default)]
    pub sections: Vec<String>,
}

/// The shared knowledge base tracked across all agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeModel {
    pub target: TargetInfo,
    pub observations: Vec<Observation>,
    pub hypotheses: Vec<Hypothesis>,
    pub findings: Vec<Finding>,
    pub functions: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub strings: Vec<serde_json::Value>,
}

impl KnowledgeModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observation(&mut self, obs: Observation) -> String {
        let id = obs.id.clone();
        self.observations.push(obs);
        id
    }

    pub fn add_hypothesis(&mut self, hyp: Hypothesis) -> String {
        let id = hyp.id.clone();
        self.hypotheses.push(hyp);
        id
    }

    pub fn add_finding(&mut self, finding: Finding) -> String {
        let id = finding.id.clone();
        self.findings.push(finding);
        id
    }

    pub fn get_hypothesis(&self, id: &str) -> Option<&Hypothesis> {
        self.hypotheses.iter().find(|h| h.id == id)
    }

    pub fn get_hypothesis_mut(&mut self, id: &str) -> Option<&mut Hypothesis> {
        self.hypotheses.iter_mut().find(|h| h.id == id)
    }

    /// Promotes a confirmed hypothesis to a [`Finding`] and appends it; returns
    /// `None` if `hypothesis_id` is unknown.
    pub fn promote_hypothesis(
        &mut self,
        hypothesis_id: &str,
        agent: impl Into<String>,
        details: serde_json::Map<String, serde_json::Value>,
    ) -> Option<Finding> {
        let agent = agent.into();
        let hyp = self.get_hypothesis_mut(hypothesis_id)?;
        hyp.confirm(agent.clone(), Vec::new());

        let finding = Finding {
            id: gen_id(),
            description: hyp.description.clone(),
            category: hyp.category.clone(),
            addresses: hyp.address.into_iter().collect(),
            evidence: hyp.evidence.clone(),
            verified: true,
            verified_by: agent,
            details,
        };
        self.findings.push(finding.clone());
        Some(finding)
    }

    pub fn unverified_hypotheses(&self) -> Vec<&Hypothesis> {
        self.hypotheses
            .iter()
            .filter(|h| h.status == HypothesisStatus::Proposed)
            .collect()
    }

    /// Renders a context-appropriate summary for injection into a subagent's
    /// prompt. `for_agent == Some("dynamic")` narrows to unverified hypotheses
    /// and drops observations (matches `original_source`'s per-mode shaping).
    pub fn summary(&self, for_agent: Option<&str>, max_chars: usize) -> String {
        let mut sections: Vec<String> = Vec::new();

        if !self.target.path.is_empty() {
            sections.push(format!(
                "## Target\nPath: {}\nFormat: {} | Arch: {} | Bits: {} | Endian: {}\nStripped: {} | PIE: {} | NX: {}",
                self.target.path,
                self.target.format,
                self.target.arch,
                self.target.bits,
                self.target.endian,
                self.target.stripped,
                self.target.pie,
                self.target.nx
            ));
        }

        if !self.functions.is_empty() {
            let lines: Vec<String> = self
                .functions
                .iter()
                .take(50)
                .map(|(addr, name)| format!("  {addr}: {name}"))
                .collect();
            sections.push(format!("## Functions ({} total)\n{}", self.functions.len(), lines.join("\n")));
        }

        if for_agent != Some("dynamic") {
            let recent: Vec<&Observation> = self.observations.iter().rev().take(20).collect();
            if !recent.is_empty() {
                let lines: Vec<String> = recent
                    .iter()
                    .rev()
                    .map(|o| {
                        let addr = o.address.map(|a| format!("{a:#x}")).unwrap_or_else(|| "N/A".to_string());
                        let data: String = o.data.chars().take(200).collect();
                        format!("  [{}] {} @ {}: {}", o.id, o.kind, addr, data)
                    })
                    .collect();
                sections.push(format!(
                    "## Observations ({} total, showing last {})\n{}",
                    self.observations.len(),
                    recent.len(),
                    lines.join("\n")
                ));
            }
        }

        let (hyps, label): (Vec<&Hypothesis>, &str) = if for_agent == Some("dynamic") {
            (self.unverified_hypotheses(), "Hypotheses Needing Verification")
        } else {
            (self.hypotheses.iter().collect(), "Hypotheses")
        };
        if !hyps.is_empty() {
            let lines: Vec<String> = hyps
                .iter()
                .map(|h| {
                    format!(
                        "  [{}] [{:?}] (conf: {:.1}) {}",
                        h.id,
                        h.status,
                        h.confidence,
                        h.description
                    )
                })
                .collect();
            sections.push(format!("## {label}\n{}", lines.join("\n")));
        }

        if !self.findings.is_empty() {
            let lines: Vec<String> = self
                .findings
                .iter()
                .map(|f| format!("  [{}] [{}] {} (verified: {})", f.id, f.category, f.description, f.verified_by))
                .collect();
            sections.push(format!("## Confirmed Findings\n{}", lines.join("\n")));
        }

        let mut result = sections.join("\n\n");
        if result.chars().count() > max_chars {
            result = result.chars().take(max_chars).collect::<String>() + "\n[... summary truncated]";
        }
        result
    }
}

fn timestamp_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promote_hypothesis_creates_finding_and_confirms() {
        let mut model = KnowledgeModel::new();
        let mut hyp = Hypothesis::new("uses AES-ECB", "crypto", "static-1");
        hyp.address = Some(0x4012);
        let id = model.add_hypothesis(hyp);

        let finding = model.promote_hypothesis(&id, "dynamic-1", Default::default()).unwrap();
        assert!(finding.verified);
        assert_eq!(finding.verified_by, "dynamic-1");

        let hyp = model.get_hypothesis(&id).unwrap();
        assert_eq!(hyp.status, HypothesisStatus::Confirmed);
        assert_eq!(hyp.confidence, 1.0);
    }

    #[test]
    fn promote_unknown_hypothesis_returns_none() {
        let mut model = KnowledgeModel::new();
        assert!(model.promote_hypothesis("missing", "agent", Default::default()).is_none());
    }

    #[test]
    fn unverified_hypotheses_excludes_confirmed() {
        let mut model = KnowledgeModel::new();
        let h1 = model.add_hypothesis(Hypothesis::new("a", "crypto", "s1"));
        let h2 = model.add_hypothesis(Hypothesis::new("b", "auth", "s1"));
        model.get_hypothesis_mut(&h1).unwrap().confirm("d1", vec![]);

        let remaining = model.unverified_hypotheses();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, h2);
    }

    #[test]
    fn summary_for_dynamic_omits_observations() {
        let mut model = KnowledgeModel::new();
        model.add_observation(Observation::new("strings", "static-1", "flag{test}"));
        model.add_hypothesis(Hypothesis::new("maybe a flag check", "auth", "static-1"));

        let full = model.summary(None, 16_000);
        let dynamic = model.summary(Some("dynamic"), 16_000);
        assert!(full.contains("## Observations"));
        assert!(!dynamic.contains("## Observations"));
        assert!(dynamic.contains("Hypotheses Needing Verification"));
    }
}
