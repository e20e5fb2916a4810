use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::analytics;
use crate::error::AppError;
use crate::models::CalculationSummary;
use crate::source::ProgressSource;
use crate::store::AnalyticsStore;

/// One full recalculation: fetch every progress record, aggregate, and replace
/// both stored collections. Any failure aborts the run before the store is
/// touched or rolls the store write back.
pub async fn calculate<S, T>(
    source: &S,
    store: &T,
    now: DateTime<Utc>,
) -> Result<CalculationSummary, AppError>
where
    S: ProgressSource,
    T: AnalyticsStore,
{
    info!("Starting analytics calculation");
    let records = source.fetch_progress_records().await?;
    info!(records = records.len(), "Fetched progress records");
    if let Some(latest) = records.iter().map(|r| r.created_at).max() {
        debug!(%latest, "Most recent progress record");
    }

    let snapshot = analytics::aggregate(&records, now);
    store.replace_all(&snapshot).await?;

    let summary = CalculationSummary {
        class_averages_calculated: snapshot.class_averages.len(),
        school_analytics_calculated: snapshot.school_analytics.len(),
        total_progress_records: snapshot.total_records,
    };
    info!(
        class_averages = summary.class_averages_calculated,
        school_analytics = summary.school_analytics_calculated,
        "Analytics calculated and stored"
    );
    Ok(summary)
}
