use crate::Database;
use crate::models::{
    GenerationRow, ModernizeItemRow, ModernizeJobRow, NewModernizeItem, ProfileRow, UserRow,
};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use studio_types::models::{ItemStatus, JobStatus};

impl Database {
    // -- Users & profiles --

    /// Create the user and its profile in one transaction. The profile starts
    /// with `credits` free credits.
    pub fn create_user_with_profile(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
        credits: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO users (id, email, password) VALUES (?1, ?2, ?3)",
                (id, email, password_hash),
            )?;
            tx.execute(
                "INSERT INTO profiles (id, full_name, credits) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, full_name, credits],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, email, password, created_at FROM users WHERE email = ?1",
                    [email],
                    |row| {
                        Ok(UserRow {
                            id: row.get(0)?,
                            email: row.get(1)?,
                            password: row.get(2)?,
                            created_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, user_id))
    }

    pub fn is_username_taken(&self, username: &str, except_user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM profiles WHERE username = ?1 AND id != ?2)",
                [username, except_user_id],
                |row| row.get(0),
            )?;
            Ok(taken)
        })
    }

    /// Overwrite only the fields that are `Some`. Returns the updated profile,
    /// or `None` if the user has no profile.
    pub fn update_profile(
        &self,
        user_id: &str,
        full_name: Option<&str>,
        username: Option<&str>,
    ) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE profiles
                 SET full_name = COALESCE(?2, full_name),
                     username  = COALESCE(?3, username)
                 WHERE id = ?1",
                rusqlite::params![user_id, full_name, username],
            )?;
            query_profile(conn, user_id)
        })
    }

    // -- Credit ledger --

    /// Debit one credit if, and only if, the balance is at least one.
    ///
    /// Single conditional statement, so two concurrent callers can never both
    /// take the last credit. Returns the new balance, or `None` when nothing
    /// was debited (empty balance or unknown user).
    pub fn try_debit_credit(&self, user_id: &str) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let remaining = conn
                .query_row(
                    "UPDATE profiles SET credits = credits - 1
                     WHERE id = ?1 AND credits >= 1
                     RETURNING credits",
                    [user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(remaining)
        })
    }

    // -- Generations --

    pub fn insert_generation(&self, row: &GenerationRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO generations (id, user_id, product_id, prompt, source_image_url, result_urls)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    row.id,
                    row.user_id,
                    row.product_id,
                    row.prompt,
                    row.source_image_url,
                    row.result_urls,
                ],
            )?;
            Ok(())
        })
    }

    /// Newest first.
    pub fn list_generations(&self, user_id: &str, limit: u32) -> Result<Vec<GenerationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, product_id, prompt, source_image_url, result_urls, created_at
                 FROM generations
                 WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![user_id, limit], |row| {
                    Ok(GenerationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        product_id: row.get(2)?,
                        prompt: row.get(3)?,
                        source_image_url: row.get(4)?,
                        result_urls: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn count_generations(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM generations WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Returns false if the generation does not exist or belongs to someone else.
    pub fn delete_generation(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "DELETE FROM generations WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
            )?;
            Ok(affected > 0)
        })
    }

    // -- Modernize jobs --

    pub fn create_modernize_job(
        &self,
        job_id: &str,
        user_id: &str,
        items: &[NewModernizeItem],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO modernize_jobs (id, user_id, status, total) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![job_id, user_id, JobStatus::Queued.as_str(), items.len() as i64],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO modernize_items (job_id, position, title, image_url, status)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for (position, item) in items.iter().enumerate() {
                    stmt.execute(rusqlite::params![
                        job_id,
                        position as i64,
                        item.title,
                        item.image_url,
                        ItemStatus::Queued.as_str(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_modernize_job(
        &self,
        job_id: &str,
    ) -> Result<Option<(ModernizeJobRow, Vec<ModernizeItemRow>)>> {
        self.with_conn(|conn| {
            let job = conn
                .query_row(
                    "SELECT id, user_id, status, cursor, total, created_at, updated_at
                     FROM modernize_jobs WHERE id = ?1",
                    [job_id],
                    |row| {
                        Ok(ModernizeJobRow {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            status: row.get(2)?,
                            cursor: row.get(3)?,
                            total: row.get(4)?,
                            created_at: row.get(5)?,
                            updated_at: row.get(6)?,
                        })
                    },
                )
                .optional()?;

            let Some(job) = job else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT job_id, position, title, image_url, status, result_url, error
                 FROM modernize_items WHERE job_id = ?1 ORDER BY position",
            )?;
            let items = stmt
                .query_map([job_id], |row| {
                    Ok(ModernizeItemRow {
                        job_id: row.get(0)?,
                        position: row.get(1)?,
                        title: row.get(2)?,
                        image_url: row.get(3)?,
                        status: row.get(4)?,
                        result_url: row.get(5)?,
                        error: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(Some((job, items)))
        })
    }

    /// Jobs that were queued or mid-run when the process last stopped, oldest first.
    pub fn unfinished_modernize_jobs(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM modernize_jobs
                 WHERE status IN (?1, ?2)
                 ORDER BY created_at, rowid",
            )?;
            let ids = stmt
                .query_map(
                    [JobStatus::Queued.as_str(), JobStatus::Running.as_str()],
                    |row| row.get::<_, String>(0),
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    pub fn set_modernize_job_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE modernize_jobs SET status = ?2, updated_at = datetime('now') WHERE id = ?1",
                [job_id, status.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn mark_modernize_item_processing(&self, job_id: &str, position: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE modernize_items SET status = ?3 WHERE job_id = ?1 AND position = ?2",
                rusqlite::params![job_id, position, ItemStatus::Processing.as_str()],
            )?;
            Ok(())
        })
    }

    /// Record the outcome of one item and move the job cursor past it.
    pub fn finish_modernize_item(
        &self,
        job_id: &str,
        position: i64,
        status: ItemStatus,
        result_url: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE modernize_items SET status = ?3, result_url = ?4, error = ?5
                 WHERE job_id = ?1 AND position = ?2",
                rusqlite::params![job_id, position, status.as_str(), result_url, error],
            )?;
            tx.execute(
                "UPDATE modernize_jobs SET cursor = ?2, updated_at = datetime('now') WHERE id = ?1",
                rusqlite::params![job_id, position + 1],
            )?;
            tx.commit()?;
            Ok(())
        })
    }
}

fn query_profile(conn: &Connection, user_id: &str) -> Result<Option<ProfileRow>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, u.email, p.full_name, p.username, p.credits
         FROM profiles p
         JOIN users u ON u.id = p.id
         WHERE p.id = ?1",
    )?;

    let row = stmt
        .query_row([user_id], |row| {
            Ok(ProfileRow {
                id: row.get(0)?,
                email: row.get(1)?,
                full_name: row.get(2)?,
                username: row.get(3)?,
                credits: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use uuid::Uuid;

    fn db_with_user(credits: i64) -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4().to_string();
        db.create_user_with_profile(&id, &format!("{}@example.com", id), "hash", Some("Ada Shop"), credits)
            .unwrap();
        (db, id)
    }

    fn generation(id: &str, user_id: &str, prompt: &str) -> GenerationRow {
        GenerationRow {
            id: id.to_string(),
            user_id: user_id.to_string(),
            product_id: None,
            prompt: prompt.to_string(),
            source_image_url: "https://cdn.example/in.png".to_string(),
            result_urls: r#"["https://cdn.example/out.png"]"#.to_string(),
            created_at: String::new(),
        }
    }

    #[test]
    fn debit_stops_at_zero() {
        let (db, id) = db_with_user(2);

        assert_eq!(db.try_debit_credit(&id).unwrap(), Some(1));
        assert_eq!(db.try_debit_credit(&id).unwrap(), Some(0));
        assert_eq!(db.try_debit_credit(&id).unwrap(), None);
        assert_eq!(db.get_profile(&id).unwrap().unwrap().credits, 0);
    }

    #[test]
    fn debit_for_unknown_user_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.try_debit_credit("nobody").unwrap(), None);
    }

    #[test]
    fn concurrent_debits_never_overdraw() {
        let (db, id) = db_with_user(5);
        let db = Arc::new(db);

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let db = db.clone();
                let id = id.clone();
                thread::spawn(move || db.try_debit_credit(&id).unwrap())
            })
            .collect();

        let landed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Option::is_some)
            .count();

        assert_eq!(landed, 5);
        assert_eq!(db.get_profile(&id).unwrap().unwrap().credits, 0);
    }

    #[test]
    fn profile_joins_email_and_keeps_unset_fields() {
        let (db, id) = db_with_user(10);

        let updated = db.update_profile(&id, None, Some("ada")).unwrap().unwrap();
        assert_eq!(updated.full_name.as_deref(), Some("Ada Shop"));
        assert_eq!(updated.username.as_deref(), Some("ada"));
        assert_eq!(updated.email, format!("{}@example.com", id));
        assert_eq!(updated.credits, 10);

        assert!(!db.is_username_taken("ada", &id).unwrap());
        assert!(db.is_username_taken("ada", "someone-else").unwrap());
    }

    #[test]
    fn duplicate_email_or_username_is_a_constraint_violation() {
        let (db, id) = db_with_user(1);
        let email = format!("{}@example.com", id);

        let err = db.create_user_with_profile("u-2", &email, "hash", None, 1).unwrap_err();
        assert!(crate::is_constraint_violation(&err));
        assert!(db.get_profile("u-2").unwrap().is_none());

        db.create_user_with_profile("u-3", "other@example.com", "hash", None, 1).unwrap();
        db.update_profile(&id, None, Some("ada")).unwrap();
        let err = db.update_profile("u-3", None, Some("ada")).unwrap_err();
        assert!(crate::is_constraint_violation(&err));
    }

    #[test]
    fn generations_are_listed_newest_first_and_deleted_by_owner_only() {
        let (db, id) = db_with_user(1);
        db.insert_generation(&generation("g1", &id, "beach")).unwrap();
        db.insert_generation(&generation("g2", &id, "forest")).unwrap();

        let rows = db.list_generations(&id, 50).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["g2", "g1"]);
        assert_eq!(db.count_generations(&id).unwrap(), 2);

        assert!(!db.delete_generation("g1", "intruder").unwrap());
        assert!(db.delete_generation("g1", &id).unwrap());
        assert!(!db.delete_generation("g1", &id).unwrap());
        assert_eq!(db.count_generations(&id).unwrap(), 1);
    }

    #[test]
    fn modernize_job_tracks_cursor_and_item_outcomes() {
        let (db, id) = db_with_user(1);
        let items = vec![
            NewModernizeItem { title: Some("Mug".into()), image_url: Some("https://cdn.example/mug.png".into()) },
            NewModernizeItem { title: Some("Poster".into()), image_url: None },
        ];
        db.create_modernize_job("job-1", &id, &items).unwrap();
        assert_eq!(db.unfinished_modernize_jobs().unwrap(), ["job-1"]);

        db.set_modernize_job_status("job-1", JobStatus::Running).unwrap();
        db.mark_modernize_item_processing("job-1", 0).unwrap();
        db.finish_modernize_item("job-1", 0, ItemStatus::Done, Some("https://cdn.example/out.png"), None)
            .unwrap();
        db.finish_modernize_item("job-1", 1, ItemStatus::Skipped, None, None).unwrap();
        db.set_modernize_job_status("job-1", JobStatus::Completed).unwrap();

        let (job, items) = db.get_modernize_job("job-1").unwrap().unwrap();
        assert_eq!(job.status, "completed");
        assert_eq!(job.cursor, 2);
        assert_eq!(job.total, 2);
        assert_eq!(items[0].status, "done");
        assert_eq!(items[0].result_url.as_deref(), Some("https://cdn.example/out.png"));
        assert_eq!(items[1].status, "skipped");
        assert!(db.unfinished_modernize_jobs().unwrap().is_empty());
    }
}
