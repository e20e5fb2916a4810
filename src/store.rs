use std::future::Future;

use serde::Deserialize;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::{AnalyticsSnapshot, ClassAverage, SchoolAnalytics};

/// Equality filters applied to stored analytics documents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyticsFilter {
    pub school_id: Option<String>,
    pub teacher_id: Option<String>,
}

/// Document store holding the derived collections. Every write replaces the
/// previous contents wholesale.
pub trait AnalyticsStore: Clone + Send + Sync + 'static {
    fn replace_all(
        &self,
        snapshot: &AnalyticsSnapshot,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn class_averages(
        &self,
        filter: &AnalyticsFilter,
    ) -> impl Future<Output = Result<Vec<ClassAverage>, AppError>> + Send;

    /// Only `school_id` applies here.
    fn school_analytics(
        &self,
        filter: &AnalyticsFilter,
    ) -> impl Future<Output = Result<Vec<SchoolAnalytics>, AppError>> + Send;
}

/// JSONB-backed collections in the `progress_analytics` schema.
#[derive(Clone)]
pub struct PgAnalyticsStore {
    pool: PgPool,
}

impl PgAnalyticsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AnalyticsStore for PgAnalyticsStore {
    async fn replace_all(&self, snapshot: &AnalyticsSnapshot) -> Result<(), AppError> {
        // Dropping the transaction on any error rolls the clear back.
        let mut tx = self.pool.begin().await.map_err(AppError::Store)?;

        sqlx::query("DELETE FROM progress_analytics.class_averages")
            .execute(&mut *tx)
            .await
            .map_err(AppError::Store)?;
        sqlx::query("DELETE FROM progress_analytics.school_analytics")
            .execute(&mut *tx)
            .await
            .map_err(AppError::Store)?;

        for (position, doc) in snapshot.class_averages.iter().enumerate() {
            sqlx::query(
                "INSERT INTO progress_analytics.class_averages (position, doc) VALUES ($1, $2)",
            )
            .bind(position as i32)
            .bind(Json(doc))
            .execute(&mut *tx)
            .await
            .map_err(AppError::Store)?;
        }

        for (position, doc) in snapshot.school_analytics.iter().enumerate() {
            sqlx::query(
                "INSERT INTO progress_analytics.school_analytics (position, doc) VALUES ($1, $2)",
            )
            .bind(position as i32)
            .bind(Json(doc))
            .execute(&mut *tx)
            .await
            .map_err(AppError::Store)?;
        }

        tx.commit().await.map_err(AppError::Store)?;
        Ok(())
    }

    async fn class_averages(
        &self,
        filter: &AnalyticsFilter,
    ) -> Result<Vec<ClassAverage>, AppError> {
        let docs: Vec<Json<ClassAverage>> = sqlx::query_scalar(
            r#"
            SELECT doc FROM progress_analytics.class_averages
            WHERE ($1::text IS NULL OR doc ->> 'school_id' = $1)
              AND ($2::text IS NULL OR doc ->> 'teacher_id' = $2)
            ORDER BY position
            "#,
        )
        .bind(filter.school_id.as_deref())
        .bind(filter.teacher_id.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(docs.into_iter().map(|Json(doc)| doc).collect())
    }

    async fn school_analytics(
        &self,
        filter: &AnalyticsFilter,
    ) -> Result<Vec<SchoolAnalytics>, AppError> {
        let docs: Vec<Json<SchoolAnalytics>> = sqlx::query_scalar(
            r#"
            SELECT doc FROM progress_analytics.school_analytics
            WHERE ($1::text IS NULL OR doc ->> 'school_id' = $1)
            ORDER BY position
            "#,
        )
        .bind(filter.school_id.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(docs.into_iter().map(|Json(doc)| doc).collect())
    }
}
