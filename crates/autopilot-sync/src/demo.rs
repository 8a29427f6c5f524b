//! One-shot walkthrough against a single table: list, create, list, update, list.

use anyhow::{Context, Result};
use autopilot_core::RemoteRow;
use autopilot_storage::{RemoteTableClient, RowQuery};
use chrono::Local;
use tracing::{info, warn};

use crate::upsert::UpsertEngine;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemoReport {
    pub initial_rows: usize,
    pub created_row: Option<String>,
    pub updated_status: Option<String>,
    pub final_rows: usize,
}

async fn list_and_log(engine: &UpsertEngine, table_id: &str) -> Result<Vec<RemoteRow>> {
    let rows = engine
        .list_rows(table_id, &RowQuery::default())
        .await
        .with_context(|| format!("listing rows of {table_id}"))?;
    info!(table_id, count = rows.len(), "found rows");
    for row in &rows {
        info!("- {} (ID: {})", row.display_title(), row.id);
    }
    Ok(rows)
}

pub async fn run_demo(engine: &UpsertEngine, table_id: &str) -> Result<DemoReport> {
    let mut report = DemoReport::default();

    info!("step 1: listing current rows");
    report.initial_rows = list_and_log(engine, table_id).await?.len();

    info!("step 2: creating a new row");
    let title = format!(
        "Test Entry from Notion AutoPilot - {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    match engine.create_row(table_id, &title, None).await {
        Ok(created) => {
            info!(row_id = %created.row_id, "created new row");
            report.created_row = Some(created.row_id);
        }
        Err(err) => warn!(error = %err, "could not create demo row"),
    }

    info!("step 3: listing rows to show the new row");
    list_and_log(engine, table_id).await?;

    let Some(row_id) = report.created_row.clone() else {
        warn!("skipping status update as no row was created");
        return Ok(report);
    };

    info!("step 4: updating the status of the new row");
    let schema = engine
        .client()
        .discover(table_id)
        .await
        .with_context(|| format!("retrieving schema of {table_id}"))?;
    let second_option = schema
        .status_column()
        .and_then(|column| column.options.get(1).cloned());
    match second_option {
        Some(status) => {
            engine
                .update_status(&row_id, &status)
                .await
                .with_context(|| format!("updating status of {row_id}"))?;
            report.updated_status = Some(status);
        }
        None => info!("status column offers fewer than two options; leaving status unchanged"),
    }

    info!("step 5: listing rows to verify the update");
    report.final_rows = list_and_log(engine, table_id).await?.len();
    info!("demo completed");
    Ok(report)
}
