use std::future::Future;

use sqlx::PgPool;

use crate::db;
use crate::error::AppError;
use crate::models::ProgressRecord;

/// Read-only source of progress records joined with classroom, school and
/// student attributes.
pub trait ProgressSource: Clone + Send + Sync + 'static {
    fn fetch_progress_records(
        &self,
    ) -> impl Future<Output = Result<Vec<ProgressRecord>, AppError>> + Send;
}

#[derive(Clone)]
pub struct PgProgressSource {
    pool: PgPool,
}

impl PgProgressSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ProgressSource for PgProgressSource {
    async fn fetch_progress_records(&self) -> Result<Vec<ProgressRecord>, AppError> {
        // The connection goes back to the pool when it drops, on every path.
        let mut conn = self.pool.acquire().await.map_err(AppError::Fetch)?;
        db::fetch_progress_records(&mut conn)
            .await
            .map_err(AppError::Fetch)
    }
}
