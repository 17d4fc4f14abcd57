//! Bulk modernize jobs.
//!
//! A job is a persisted list of catalog items plus a cursor. One worker task
//! drains jobs in submission order and runs the items strictly one at a
//! time through the same credit-gated generation as `POST /generate`. A
//! failing item is recorded and the job moves on; nothing cancels a job once
//! it is queued. The cursor is written after every item, so a restart
//! resumes where the previous process stopped.

use axum::{
    Extension, Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use studio_db::models::{ModernizeItemRow, NewModernizeItem};
use studio_types::api::{Claims, ModernizeAccepted, ModernizeItemResponse, ModernizeJobResponse, ModernizeRequest};
use studio_types::models::{ItemStatus, JobStatus};

use crate::error::ApiError;
use crate::generate::{BULK_PROMPT, generate_for_user};
use crate::history::parse_db_timestamp;
use crate::state::{AppState, db_call};

pub const MAX_JOB_ITEMS: usize = 100;

/// Sending half of the worker's job channel.
#[derive(Clone)]
pub struct ModernizeQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl ModernizeQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, job_id: String) {
        if self.tx.send(job_id).is_err() {
            error!("Modernize worker is gone; job left queued until restart");
        }
    }
}

pub fn spawn_worker(state: AppState, mut jobs: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job_id) = jobs.recv().await {
            if let Err(e) = run_job(&state, &job_id).await {
                error!("Modernize job {} aborted: {}", job_id, e);
            }
        }
    })
}

/// Re-enqueue jobs interrupted by a shutdown. Call once at startup.
pub async fn resume_unfinished(state: &AppState) -> anyhow::Result<usize> {
    let ids = db_call(state, |db| db.unfinished_modernize_jobs()).await?;
    let count = ids.len();
    for id in ids {
        state.modernize.enqueue(id);
    }
    if count > 0 {
        info!("Resuming {} unfinished modernize job(s)", count);
    }
    Ok(count)
}

async fn run_job(state: &AppState, job_id: &str) -> anyhow::Result<()> {
    let id = job_id.to_string();
    let Some((job, items)) = db_call(state, move |db| db.get_modernize_job(&id)).await? else {
        warn!("Modernize job {} vanished before it ran", job_id);
        return Ok(());
    };
    let user_id: Uuid = job.user_id.parse()?;

    let id = job_id.to_string();
    db_call(state, move |db| db.set_modernize_job_status(&id, JobStatus::Running)).await?;
    info!("Modernize job {} running from item {} of {}", job_id, job.cursor, job.total);

    for item in items.into_iter().filter(|item| item.position >= job.cursor) {
        let (status, result_url, failure) = process_item(state, user_id, &item).await?;

        let id = job_id.to_string();
        let position = item.position;
        db_call(state, move |db| {
            db.finish_modernize_item(&id, position, status, result_url.as_deref(), failure.as_deref())
        })
        .await?;
    }

    let id = job_id.to_string();
    db_call(state, move |db| db.set_modernize_job_status(&id, JobStatus::Completed)).await?;
    info!("Modernize job {} completed", job_id);
    Ok(())
}

/// Returns the item's final status, result URL and failure message.
async fn process_item(
    state: &AppState,
    user_id: Uuid,
    item: &ModernizeItemRow,
) -> anyhow::Result<(ItemStatus, Option<String>, Option<String>)> {
    let Some(image_url) = item.image_url.clone() else {
        return Ok((ItemStatus::Skipped, None, None));
    };

    let (id, position) = (item.job_id.clone(), item.position);
    db_call(state, move |db| db.mark_modernize_item_processing(&id, position)).await?;

    match generate_for_user(state, user_id, &image_url, BULK_PROMPT, None).await {
        Ok(generated) => Ok((ItemStatus::Done, generated.result.into_iter().next(), None)),
        Err(e) => {
            warn!("Modernize item {}#{} failed: {}", item.job_id, item.position, e);
            Ok((ItemStatus::Failed, None, Some(e.to_string())))
        }
    }
}

/// POST /bulk/modernize — queue every item for re-staging. Returns 202 at once.
pub async fn create_job(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<ModernizeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;

    if req.products.is_empty() {
        return Err(ApiError::BadRequest("At least one product is required".into()));
    }
    if req.products.len() > MAX_JOB_ITEMS {
        return Err(ApiError::BadRequest(format!("At most {} products per job", MAX_JOB_ITEMS)));
    }

    let items: Vec<NewModernizeItem> = req.products.iter().map(item_from_value).collect();
    let total = items.len();
    let job_id = Uuid::new_v4();

    let (jid, uid) = (job_id.to_string(), claims.sub.to_string());
    db_call(&state, move |db| db.create_modernize_job(&jid, &uid, &items))
        .await
        .map_err(ApiError::internal("Failed to create job"))?;

    state.modernize.enqueue(job_id.to_string());
    info!("User {} queued modernize job {} with {} items", claims.sub, job_id, total);

    Ok((StatusCode::ACCEPTED, Json(ModernizeAccepted { job_id, total })))
}

/// GET /bulk/modernize/{job_id} — job snapshot. Other users' jobs are 404.
pub async fn get_job(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    job_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ModernizeJobResponse>, ApiError> {
    let Path(job_id) = job_id?;
    let jid = job_id.to_string();
    let (job, items) = db_call(&state, move |db| db.get_modernize_job(&jid))
        .await
        .map_err(ApiError::internal("Failed to load job"))?
        .ok_or(ApiError::NotFound)?;

    if job.user_id != claims.sub.to_string() {
        return Err(ApiError::NotFound);
    }

    let items = items
        .into_iter()
        .map(|item| ModernizeItemResponse {
            position: item.position as usize,
            status: ItemStatus::parse(&item.status).unwrap_or_else(|| {
                warn!("Unknown item status '{}' on job {}", item.status, item.job_id);
                ItemStatus::Failed
            }),
            title: item.title,
            image_url: item.image_url,
            result_url: item.result_url,
            error: item.error,
        })
        .collect();

    Ok(Json(ModernizeJobResponse {
        id: job_id,
        status: JobStatus::parse(&job.status).unwrap_or_else(|| {
            warn!("Unknown job status '{}' on job {}", job.status, job.id);
            JobStatus::Queued
        }),
        cursor: job.cursor as usize,
        total: job.total as usize,
        items,
        created_at: parse_db_timestamp(&job.created_at),
        updated_at: parse_db_timestamp(&job.updated_at),
    }))
}

/// Accepts a trimmed `{ title, imageUrl }` object or a raw scraped item,
/// whose first image is either `{ src }` or a bare URL string.
fn item_from_value(value: &Value) -> NewModernizeItem {
    let title = value.get("title").and_then(Value::as_str).map(str::to_string);

    let image_url = value
        .get("imageUrl")
        .and_then(Value::as_str)
        .or_else(|| {
            let first = value.get("images")?.get(0)?;
            first.get("src").and_then(Value::as_str).or_else(|| first.as_str())
        })
        .filter(|url| !url.trim().is_empty())
        .map(str::to_string);

    NewModernizeItem { title, image_url }
}
