use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, profiles, generations)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE profiles (
                id          TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                full_name   TEXT,
                username    TEXT UNIQUE,
                credits     INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- product_id is a soft reference: products live in the seller's store
            CREATE TABLE generations (
                id                TEXT PRIMARY KEY,
                user_id           TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                product_id        TEXT,
                prompt            TEXT NOT NULL,
                source_image_url  TEXT NOT NULL,
                result_urls       TEXT NOT NULL,
                created_at        TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_generations_user
                ON generations(user_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (modernize jobs)");
        conn.execute_batch(
            "
            CREATE TABLE modernize_jobs (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                status      TEXT NOT NULL DEFAULT 'queued',
                cursor      INTEGER NOT NULL DEFAULT 0,
                total       INTEGER NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE modernize_items (
                job_id      TEXT NOT NULL REFERENCES modernize_jobs(id) ON DELETE CASCADE,
                position    INTEGER NOT NULL,
                title       TEXT,
                image_url   TEXT,
                status      TEXT NOT NULL DEFAULT 'queued',
                result_url  TEXT,
                error       TEXT,
                PRIMARY KEY (job_id, position)
            );

            CREATE INDEX idx_modernize_jobs_status
                ON modernize_jobs(status, created_at);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
