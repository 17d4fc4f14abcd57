/// Database row types — these map directly to SQLite rows.
/// Distinct from studio-types API bodies to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct ProfileRow {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub credits: i64,
}

pub struct GenerationRow {
    pub id: String,
    pub user_id: String,
    pub product_id: Option<String>,
    pub prompt: String,
    pub source_image_url: String,
    /// JSON array of result URLs.
    pub result_urls: String,
    pub created_at: String,
}

pub struct ModernizeJobRow {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub cursor: i64,
    pub total: i64,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ModernizeItemRow {
    pub job_id: String,
    pub position: i64,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub status: String,
    pub result_url: Option<String>,
    pub error: Option<String>,
}

/// Item as submitted, before it has a status.
pub struct NewModernizeItem {
    pub title: Option<String>,
    pub image_url: Option<String>,
}
