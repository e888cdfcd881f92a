//! SLA classes and the delivery-receipts dashboard.
//!
//! Both are derived views: pending messages come from the inbox files,
//! ack history from the event log. Nothing here mutates an inbox.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use coord_core::types::MessagePriority;
use coord_store::StateStore;
use serde::Serialize;
use serde_json::json;

use crate::inbox::InboxMessage;

/// Warn/escalate thresholds in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlaClass {
    pub warn_after_mins: i64,
    pub escalate_after_mins: i64,
}

pub fn sla_for(priority: MessagePriority) -> SlaClass {
    match priority {
        MessagePriority::Urgent => SlaClass {
            warn_after_mins: 1,
            escalate_after_mins: 3,
        },
        MessagePriority::High => SlaClass {
            warn_after_mins: 3,
            escalate_after_mins: 10,
        },
        MessagePriority::Normal => SlaClass {
            warn_after_mins: 10,
            escalate_after_mins: 30,
        },
        MessagePriority::Low => SlaClass {
            warn_after_mins: 60,
            escalate_after_mins: 240,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaStage {
    Warning,
    Escalated,
}

#[derive(Debug, Serialize)]
pub struct SlaFinding {
    pub target: String,
    pub message_ts: String,
    pub priority: MessagePriority,
    pub stage: SlaStage,
    pub age_mins: i64,
}

/// Inbox targets present on disk.
fn inbox_targets(store: &StateStore) -> Vec<String> {
    let mut targets = Vec::new();
    let Ok(entries) = std::fs::read_dir(store.inbox_dir()) else {
        return targets;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(target) = name.strip_suffix(".jsonl") {
            targets.push(target.to_string());
        }
    }
    targets.sort();
    targets
}

/// Sweep every inbox for messages past their SLA thresholds, emitting
/// `PeerMessageSLAWarning` / `PeerMessageEscalated` events once per
/// message and stage.
pub fn run_sla_check(store: &StateStore) -> Result<Vec<SlaFinding>> {
    let now = Utc::now();
    let events = store.recent_events(coord_store::json::MAX_JSONL_ENTRIES)?;
    let already_flagged: std::collections::BTreeSet<(String, String, String)> = events
        .entries
        .iter()
        .filter(|e| {
            e.event == "PeerMessageSLAWarning" || e.event == "PeerMessageEscalated"
        })
        .filter_map(|e| {
            Some((
                e.event.clone(),
                e.field_str("to")?.to_string(),
                e.field_str("message_ts")?.to_string(),
            ))
        })
        .collect();

    let mut findings = Vec::new();
    for target in inbox_targets(store) {
        let read = coord_store::json::read_jsonl_tail::<InboxMessage>(
            &store.inbox_file(&target),
            coord_store::json::MAX_JSONL_ENTRIES,
        )?;
        for message in read.entries {
            let Some(age_secs) = coord_core::time::age_seconds(&message.ts, now) else {
                continue;
            };
            let age_mins = age_secs / 60;
            let class = sla_for(message.priority);
            let stage = if age_mins >= class.escalate_after_mins {
                SlaStage::Escalated
            } else if age_mins >= class.warn_after_mins {
                SlaStage::Warning
            } else {
                continue;
            };
            let event_name = match stage {
                SlaStage::Warning => "PeerMessageSLAWarning",
                SlaStage::Escalated => "PeerMessageEscalated",
            };
            let key = (
                event_name.to_string(),
                target.clone(),
                message.ts.clone(),
            );
            if !already_flagged.contains(&key) {
                store.append_event(
                    event_name,
                    json!({
                        "to": target,
                        "message_ts": message.ts,
                        "from": message.from,
                        "priority": message.priority.as_str(),
                        "age_mins": age_mins,
                    }),
                )?;
            }
            findings.push(SlaFinding {
                target: target.clone(),
                message_ts: message.ts,
                priority: message.priority,
                stage,
                age_mins,
            });
        }
    }
    Ok(findings)
}

#[derive(Debug, Serialize)]
pub struct MemberReceipts {
    pub target: String,
    pub queue_depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending_mins: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_latency_p50_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_latency_p95_secs: Option<i64>,
    /// Histogram of consecutive-send run lengths before an ack; runs
    /// longer than 1 are effectively retries.
    pub resend_runs: BTreeMap<usize, usize>,
}

#[derive(Debug, Serialize)]
pub struct ReceiptsDashboard {
    pub generated_at: String,
    pub members: Vec<MemberReceipts>,
}

fn percentile(sorted: &[i64], pct: f64) -> Option<i64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
    sorted.get(rank).copied()
}

/// Join inbox contents with the event log into a per-target summary.
pub fn receipts_dashboard(store: &StateStore) -> Result<ReceiptsDashboard> {
    let now = Utc::now();
    let events = store.recent_events(coord_store::json::MAX_JSONL_ENTRIES)?;

    // Per-target ack latency samples and resend runs, replayed in order.
    let mut first_unacked: BTreeMap<String, chrono::DateTime<Utc>> = BTreeMap::new();
    let mut run_len: BTreeMap<String, usize> = BTreeMap::new();
    let mut samples: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    let mut runs: BTreeMap<String, BTreeMap<usize, usize>> = BTreeMap::new();

    for event in &events.entries {
        match event.event.as_str() {
            "MessageSent" => {
                let Some(to) = event.field_str("to") else { continue };
                let Some(ts) = coord_core::time::parse_iso(&event.ts) else { continue };
                first_unacked.entry(to.to_string()).or_insert(ts);
                *run_len.entry(to.to_string()).or_insert(0) += 1;
            }
            "InboxChecked" => {
                let Some(session) = event.field_str("session") else { continue };
                let Some(ts) = coord_core::time::parse_iso(&event.ts) else { continue };
                if let Some(sent_at) = first_unacked.remove(session) {
                    samples
                        .entry(session.to_string())
                        .or_default()
                        .push((ts - sent_at).num_seconds().max(0));
                }
                if let Some(len) = run_len.remove(session) {
                    if len > 0 {
                        *runs.entry(session.to_string()).or_default().entry(len).or_insert(0) += 1;
                    }
                }
            }
            _ => {}
        }
    }

    let mut members = Vec::new();
    for target in inbox_targets(store) {
        let pending = coord_store::json::read_jsonl_tail::<InboxMessage>(
            &store.inbox_file(&target),
            coord_store::json::MAX_JSONL_ENTRIES,
        )?;
        let oldest_pending_mins = pending
            .entries
            .first()
            .and_then(|m| coord_core::time::age_seconds(&m.ts, now))
            .map(|secs| secs / 60);

        let mut sorted = samples.remove(&target).unwrap_or_default();
        sorted.sort_unstable();

        members.push(MemberReceipts {
            queue_depth: pending.entries.len(),
            oldest_pending_mins,
            ack_latency_p50_secs: percentile(&sorted, 0.50),
            ack_latency_p95_secs: percentile(&sorted, 0.95),
            resend_runs: runs.remove(&target).unwrap_or_default(),
            target,
        });
    }

    Ok(ReceiptsDashboard {
        generated_at: coord_core::time::to_iso(now),
        members,
    })
}

#[cfg(test)]
#[path = "sla_tests.rs"]
mod tests;
