use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use tracing::info;

/// How a migration decides whether it still needs to run. There is no
/// version table: the live schema is the source of truth, so every
/// migration must be safe to re-run after a partial or repeated startup.
enum Check {
    /// Run when the named table does not exist yet.
    TableMissing(&'static str),
    /// Run when the named column is absent from the table.
    ColumnMissing {
        table: &'static str,
        column: &'static str,
    },
}

struct Migration {
    id: &'static str,
    check: Check,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: "initial_schema",
        check: Check::TableMissing("articles"),
        sql: include_str!("../migrations/001_initial_schema.sql"),
    },
    Migration {
        id: "fixed_categories",
        check: Check::TableMissing("categories"),
        sql: include_str!("../migrations/002_fixed_categories.sql"),
    },
    Migration {
        id: "multiple_categories",
        check: Check::TableMissing("article_categories"),
        sql: include_str!("../migrations/003_multiple_categories.sql"),
    },
    Migration {
        id: "category_mappings",
        check: Check::TableMissing("category_mappings"),
        sql: include_str!("../migrations/004_category_mappings.sql"),
    },
    Migration {
        id: "advertising_fields",
        check: Check::ColumnMissing {
            table: "articles",
            column: "is_advertisement",
        },
        sql: include_str!("../migrations/005_advertising_fields.sql"),
    },
    Migration {
        id: "media_files",
        check: Check::ColumnMissing {
            table: "articles",
            column: "media_files",
        },
        sql: include_str!("../migrations/006_media_files.sql"),
    },
    Migration {
        id: "schedule_settings",
        check: Check::TableMissing("schedule_settings"),
        sql: include_str!("../migrations/007_schedule_settings.sql"),
    },
    Migration {
        id: "daily_summaries",
        check: Check::TableMissing("daily_summaries"),
        sql: include_str!("../migrations/008_daily_summaries.sql"),
    },
];

/// Run all pending migrations. Each executes in its own transaction; a
/// failure rolls back that migration and aborts startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let mut applied = 0;

    for migration in MIGRATIONS {
        if !check_needed(pool, &migration.check).await? {
            continue;
        }

        let mut tx = pool
            .begin()
            .await
            .with_context(|| format!("starting transaction for migration '{}'", migration.id))?;
        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("applying migration '{}'", migration.id))?;
        tx.commit()
            .await
            .with_context(|| format!("committing migration '{}'", migration.id))?;

        applied += 1;
        info!(id = migration.id, "applied migration");
    }

    if applied == 0 {
        info!("database schema up to date");
    } else {
        info!(applied, "database migrations applied");
    }

    Ok(())
}

async fn check_needed(pool: &SqlitePool, check: &Check) -> Result<bool> {
    match check {
        Check::TableMissing(table) => {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_one(pool)
                .await
                .context("probing sqlite_master")?;
            let n: i64 = row.get("n");
            Ok(n == 0)
        }
        Check::ColumnMissing { table, column } => {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM pragma_table_info(?) WHERE name = ?")
                .bind(table)
                .bind(column)
                .fetch_one(pool)
                .await
                .context("probing table info")?;
            let n: i64 = row.get("n");
            Ok(n == 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool")
    }

    #[tokio::test]
    async fn migrations_create_schema() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.expect("migrations run");

        let row = sqlx::query("SELECT COUNT(*) AS n FROM categories")
            .fetch_one(&pool)
            .await
            .unwrap();
        let n: i64 = row.get("n");
        assert_eq!(n, 7, "taxonomy seeded");

        let row = sqlx::query("SELECT COUNT(*) AS n FROM schedule_settings")
            .fetch_one(&pool)
            .await
            .unwrap();
        let n: i64 = row.get("n");
        assert_eq!(n, 4, "default tasks seeded");
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.expect("first run");
        run_migrations(&pool).await.expect("second run is a no-op");

        // Re-running must not duplicate seeds or columns
        let row = sqlx::query("SELECT COUNT(*) AS n FROM categories")
            .fetch_one(&pool)
            .await
            .unwrap();
        let n: i64 = row.get("n");
        assert_eq!(n, 7);

        let row = sqlx::query("SELECT COUNT(*) AS n FROM pragma_table_info('articles') WHERE name = 'media_files'")
            .fetch_one(&pool)
            .await
            .unwrap();
        let n: i64 = row.get("n");
        assert_eq!(n, 1);
    }
}
