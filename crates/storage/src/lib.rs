use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use uuid::Uuid;

use shared::domain::{CompanyId, SavedCompany};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Fields of a company entered by the user before it gets an id.
#[derive(Debug, Clone, Default)]
pub struct NewCompany {
    pub name: String,
    pub url: Option<String>,
    pub hq: Option<String>,
    pub industry: Option<String>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn add_company(&self, company: NewCompany) -> Result<SavedCompany> {
        let name = company.name.trim();
        if name.is_empty() {
            bail!("company name is required");
        }

        let saved = SavedCompany {
            id: CompanyId(Uuid::new_v4().to_string()),
            name: name.to_string(),
            url: non_blank(company.url),
            hq: non_blank(company.hq),
            industry: non_blank(company.industry),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO saved_companies (id, name, url, hq, industry, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(saved.id.as_str())
        .bind(&saved.name)
        .bind(&saved.url)
        .bind(&saved.hq)
        .bind(&saved.industry)
        .bind(saved.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to save company '{}'", saved.name))?;
        Ok(saved)
    }

    /// Saved companies, oldest first.
    pub async fn list_companies(&self) -> Result<Vec<SavedCompany>> {
        let rows = sqlx::query(
            "SELECT id, name, url, hq, industry, created_at FROM saved_companies
             ORDER BY created_at ASC, name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(company_from_row).collect()
    }

    pub async fn find_company(&self, company_id: &CompanyId) -> Result<Option<SavedCompany>> {
        let row = sqlx::query(
            "SELECT id, name, url, hq, industry, created_at FROM saved_companies WHERE id = ?",
        )
        .bind(company_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(company_from_row).transpose()
    }

    /// Returns whether a company was removed.
    pub async fn remove_company(&self, company_id: &CompanyId) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM saved_companies WHERE id = ?")
            .bind(company_id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }
}

fn company_from_row(row: &SqliteRow) -> Result<SavedCompany> {
    Ok(SavedCompany {
        id: CompanyId(row.try_get("id")?),
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        hq: row.try_get("hq")?,
        industry: row.try_get("industry")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
