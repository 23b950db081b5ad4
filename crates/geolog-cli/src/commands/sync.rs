use std::path::Path;

use chrono::{Duration as ChronoDuration, Utc};
use geolog_core::config::ClientConfig;
use geolog_core::sync::{SyncReconciler, SyncReport};

use crate::commands::common::{
    authorized_api, dead_letter_item, format_dead_letter_line, format_sample_line, open_queue,
    pending_item, require_session, PendingItem,
};
use crate::error::CliError;

pub async fn run_sync(config: &ClientConfig, db_path: &Path) -> Result<(), CliError> {
    let session = require_session(config)?;
    let queue = open_queue(db_path, config).await?;
    let api = authorized_api(config, &session)?;
    let reconciler = SyncReconciler::new(api, queue, session.user.id.clone());

    let report = reconciler.reconcile().await;
    println!("{}", format_sync_report(&report));
    if report.success {
        Ok(())
    } else {
        Err(CliError::SyncFailed(
            report
                .error
                .unwrap_or_else(|| "some samples were not acknowledged".to_string()),
        ))
    }
}

pub fn format_sync_report(report: &SyncReport) -> String {
    let mut line = format!(
        "Synced {} of {} sample(s) in {} pass(es)",
        report.synced, report.attempted, report.passes
    );
    if report.unacknowledged > 0 {
        line.push_str(&format!(", {} unacknowledged", report.unacknowledged));
    }
    if report.dead_lettered > 0 {
        line.push_str(&format!(", {} dead-lettered", report.dead_lettered));
    }
    line
}

pub async fn run_pending(
    dead: bool,
    as_json: bool,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let owner_id = require_session(config)?.user.id;
    let queue = open_queue(db_path, config).await?;
    let now = Utc::now();

    if dead {
        let entries = queue.list_dead_letters(&owner_id).await?;
        if as_json {
            let items = entries.iter().map(dead_letter_item).collect::<Vec<PendingItem>>();
            println!("{}", serde_json::to_string_pretty(&items)?);
            return Ok(());
        }
        if entries.is_empty() {
            println!("No dead-lettered samples.");
            return Ok(());
        }
        for entry in &entries {
            println!("{}", format_dead_letter_line(entry, now));
        }
        return Ok(());
    }

    let samples = queue.try_list_unsynced(&owner_id).await?;
    if as_json {
        let items = samples
            .iter()
            .map(pending_item)
            .collect::<Vec<PendingItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    let counts = queue.counts(&owner_id).await?;
    if samples.is_empty() {
        println!("Nothing pending ({} delivered).", counts.synced);
    } else {
        for sample in &samples {
            println!("{}", format_sample_line(sample, now));
        }
        println!(
            "{} pending, {} dead-lettered, {} delivered",
            counts.pending, counts.dead_lettered, counts.synced
        );
    }
    Ok(())
}

pub async fn run_requeue(config: &ClientConfig, db_path: &Path) -> Result<(), CliError> {
    let owner_id = require_session(config)?.user.id;
    let queue = open_queue(db_path, config).await?;
    let requeued = queue.requeue_dead_letters(&owner_id).await?;
    println!("Requeued {requeued} sample(s)");
    Ok(())
}

pub async fn run_prune(
    older_than_days: u32,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let queue = open_queue(db_path, config).await?;
    let cutoff = Utc::now() - ChronoDuration::days(i64::from(older_than_days));
    let removed = queue.prune_synced(cutoff).await?;
    println!("Removed {removed} delivered sample(s)");
    Ok(())
}
