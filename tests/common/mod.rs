use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use doc_control::activity::{ActivityEvent, ActivityLogger};
use doc_control::auth::jwt::JwtService;
use doc_control::auth::AuthenticatedUser;
use doc_control::auth::policy::RolePolicy;
use doc_control::config::{AppConfig, EmailConfig};
use doc_control::db::{self, PgPool};
use doc_control::error::{ControlError, ControlResult};
use doc_control::models::NewUser;
use doc_control::notifier::{EmailMessage, EmailReceipt, Notifier};
use doc_control::routes;
use doc_control::state::{AppState, Collaborators};
use doc_control::storage::BlobStore;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub path: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Default)]
pub struct FakeBlobStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn store(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<String> {
        let stored = StoredObject {
            path: path.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.path.clone(), stored);
        Ok(path.to_string())
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(path), "object {path} missing");
        Ok(format!("https://fake-storage/{path}?expires_in={}", ttl.as_secs()))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| anyhow!("object {path} missing"))
    }
}

impl FakeBlobStore {
    #[allow(dead_code)]
    pub async fn get(&self, path: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(path).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

/// Records every message; can be switched into a failing mode.
#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<EmailMessage>>,
    failing: Mutex<bool>,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send_email(&self, message: EmailMessage) -> ControlResult<EmailReceipt> {
        if *self.failing.lock().await {
            return Err(ControlError::Notification("provider rejected message".into()));
        }
        let mut guard = self.sent.lock().await;
        guard.push(message);
        Ok(EmailReceipt {
            id: format!("msg-{}", guard.len()),
        })
    }
}

impl FakeNotifier {
    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().await.clone()
    }

    #[allow(dead_code)]
    pub async fn set_failing(&self, failing: bool) {
        *self.failing.lock().await = failing;
    }
}

/// Room for the concurrent command tests plus the request path.
const TEST_POOL_SIZE: u32 = 10;

#[derive(Clone, Debug)]
pub struct TestUser {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub role: String,
    pub email: String,
    pub token: String,
}

impl TestUser {
    /// The identity the auth extractor would build from this user's token.
    #[allow(dead_code)]
    pub fn identity(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: self.id,
            organization_id: self.organization_id,
            role: self.role.clone(),
            email: self.email.clone(),
        }
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeBlobStore>,
    notifier: Arc<FakeNotifier>,
    events: Mutex<mpsc::UnboundedReceiver<ActivityEvent>>,
    pub organization_id: Uuid,
}

impl TestApp {
    /// `None` when `TEST_DATABASE_URL` is not configured; callers skip.
    pub async fn new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("skipping integration test: TEST_DATABASE_URL is not set");
            return Ok(None);
        };

        let config = AppConfig {
            database_url,
            database_max_pool_size: TEST_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            email: EmailConfig::default(),
            app_base_url: "https://app.test".to_string(),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeBlobStore::default());
        let notifier = Arc::new(FakeNotifier::default());
        let (activity, events) = ActivityLogger::channel();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(
            pool,
            config,
            Collaborators {
                storage: storage.clone(),
                notifier: notifier.clone(),
                policy: Arc::new(RolePolicy),
                activity,
            },
            jwt,
        );
        let router = routes::create_router(state.clone());

        Ok(Some(Self {
            state,
            router,
            storage,
            notifier,
            events: Mutex::new(events),
            organization_id: Uuid::new_v4(),
        }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(|conn| truncate_all(conn)).await
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeBlobStore> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn notifier(&self) -> Arc<FakeNotifier> {
        self.notifier.clone()
    }

    /// Events queued since the last call.
    #[allow(dead_code)]
    pub async fn take_events(&self) -> Vec<ActivityEvent> {
        let mut receiver = self.events.lock().await;
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Inserts a user in the test organization and mints a token for them.
    pub async fn user(&self, role: &str) -> Result<TestUser> {
        self.user_in(self.organization_id, role).await
    }

    pub async fn user_in(&self, organization_id: Uuid, role: &str) -> Result<TestUser> {
        let id = Uuid::new_v4();
        let email = format!("{role}-{}@example.com", &id.to_string()[..8]);
        let row = NewUser {
            id,
            email: email.clone(),
            full_name: None,
            role: role.to_string(),
            organization_id,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(doc_control::schema::users::table)
                .values(&row)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(())
        })
        .await?;

        let token = self.state.jwt.generate_token(
            id,
            organization_id,
            role,
            &email,
            chrono::Duration::minutes(30),
        )?;
        Ok(TestUser {
            id,
            organization_id,
            role: role.to_string(),
            email,
            token,
        })
    }

    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: Option<&T>,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match payload {
            Some(payload) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(payload)?))?,
            None => builder.body(Body::empty())?,
        };
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, Some(payload), token).await
    }

    #[allow(dead_code)]
    pub async fn post_empty(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_json::<()>(Method::POST, path, None, token).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, Some(payload), token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, Some(payload), token).await
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_json::<()>(Method::GET, path, None, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_json::<()>(Method::DELETE, path, None, token).await
    }

    #[allow(dead_code)]
    pub async fn upload_revision(
        &self,
        document_id: Uuid,
        file: Option<(&str, &str, &[u8])>,
        change_summary: &str,
        is_review_only: bool,
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        if let Some((filename, content_type, data)) = file {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                    filename
                )
                .as_bytes(),
            );
            body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
            body.extend(data);
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(b"Content-Disposition: form-data; name=\"change_summary\"\r\n\r\n");
        body.extend(change_summary.as_bytes());
        body.extend(b"\r\n");
        if is_review_only {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(b"Content-Disposition: form-data; name=\"is_review_only\"\r\n\r\ntrue\r\n");
        }
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/documents/{document_id}/revisions"))
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

/// Runs `job` on `workers` threads, each holding its own pooled connection,
/// released together once every thread has one.
#[allow(dead_code)]
pub fn run_concurrently<T, F>(pool: &PgPool, workers: usize, job: F) -> Vec<Result<T>>
where
    T: Send,
    F: Fn(usize, &mut PgConnection) -> Result<T> + Sync,
{
    let barrier = Barrier::new(workers);
    tokio::task::block_in_place(|| {
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|index| {
                    let (barrier, job) = (&barrier, &job);
                    scope.spawn(move || {
                        let conn = pool.get();
                        barrier.wait();
                        let mut conn = conn.context("failed to get database connection")?;
                        job(index, &mut conn)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("worker thread panicked")))
                })
                .collect()
        })
    })
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn read_json<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).with_context(|| {
        format!(
            "unexpected response body: {}",
            String::from_utf8_lossy(&body)
        )
    })
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE activity_logs, competency_history, email_reminder_logs, \
         employee_competencies, document_review_schedules, document_revisions, documents, \
         document_categories, users RESTART IDENTITY CASCADE;
         UPDATE email_reminder_settings
            SET is_enabled = TRUE, thresholds_months = '{1,3,6}', manager_emails = '{}',
                updated_by = NULL
          WHERE id = 1;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
