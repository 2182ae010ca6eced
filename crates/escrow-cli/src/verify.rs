//! # `escrowd verify-audit`
//!
//! Recomputes every hash of an exported audit chain and reports the first
//! broken link. Accepts either a bare JSON array of events or the envelope
//! returned by `GET /v1/escrows/{id}/audit`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::Value;

use escrow_ledger::{AuditEvent, ChainReport};

#[derive(Args, Debug)]
pub struct VerifyAuditArgs {
    /// Path to the exported chain (JSON).
    pub file: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyOutput {
    events: usize,
    #[serde(flatten)]
    report: ChainReport,
}

/// Parse an exported chain in either accepted shape.
pub fn parse_events(text: &str) -> Result<Vec<AuditEvent>> {
    let doc: Value = serde_json::from_str(text).context("audit export is not valid JSON")?;
    let events = match doc {
        Value::Array(_) => doc,
        Value::Object(mut map) => match map.remove("events") {
            Some(events) => events,
            None => bail!("audit export object has no \"events\" field"),
        },
        _ => bail!("audit export must be an array of events or an object with \"events\""),
    };
    serde_json::from_value(events).context("audit export contains a malformed event")
}

/// Returns exit code 0 when the chain verifies, 1 when it is broken.
pub fn run_verify_audit(args: &VerifyAuditArgs) -> Result<u8> {
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let events = parse_events(&text)?;
    let report = ChainReport::of(&events);

    if let (Some(index), Some(reason)) = (report.broken_at, report.reason.as_deref()) {
        tracing::error!(index, reason, file = %args.file.display(), "audit chain broken");
    }
    let verified = report.verified;
    let output = VerifyOutput {
        events: events.len(),
        report,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(if verified { 0 } else { 1 })
}
