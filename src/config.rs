use crate::error::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connection settings read from the environment at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    /// Where derived analytics documents are written. Defaults to the source
    /// database.
    pub analytics_database_url: String,
    pub max_connections: u32,
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url =
            non_empty("DATABASE_URL").ok_or(AppError::MissingConfig("DATABASE_URL"))?;
        let analytics_database_url =
            non_empty("ANALYTICS_DATABASE_URL").unwrap_or_else(|| database_url.clone());
        let max_connections = match non_empty("PROGRESS_MAX_CONNECTIONS") {
            Some(raw) => raw.trim().parse::<u32>().ok().filter(|n| *n > 0).ok_or_else(|| {
                AppError::Validation(format!(
                    "PROGRESS_MAX_CONNECTIONS must be a positive integer, got '{raw}'"
                ))
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            analytics_database_url,
            max_connections,
        })
    }

    pub fn shares_database(&self) -> bool {
        self.database_url == self.analytics_database_url
    }
}
