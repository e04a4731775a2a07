mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Months, NaiveDate, Utc};
use common::{acquire_db_lock, read_json, run_concurrently, TestApp, TestUser};
use doc_control::activity::ActivityAction;
use doc_control::error::ControlError;
use doc_control::lifecycle::revisions::{self, NewRevisionInput, RevisionUpload};
use serde::Deserialize;
use serde_json::json;
use tokio::runtime::Handle;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct DocumentBody {
    id: Uuid,
    doc_number: String,
    owner_id: Uuid,
    status: String,
    current_revision_id: Option<Uuid>,
    next_review_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct DocumentDetailBody {
    document: DocumentBody,
    current_revision: Option<RevisionBody>,
}

#[derive(Debug, Deserialize)]
struct RevisionBody {
    id: Uuid,
    revision_number: i32,
    status: String,
    file_name: Option<String>,
    has_file: bool,
    is_review_only: bool,
    review_comments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScheduleBody {
    due_date: NaiveDate,
    status: String,
    no_changes_needed: bool,
    completed_by: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct ApprovalBody {
    revision: RevisionBody,
    document: DocumentBody,
    schedule: ScheduleBody,
    superseded_revision_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct FileUrlBody {
    url: String,
    expires_in: u64,
}

async fn create_document(app: &TestApp, user: &TestUser, doc_number: &str) -> Result<DocumentBody> {
    let response = app
        .post_json(
            "/api/documents",
            &json!({ "doc_number": doc_number, "title": "Hand hygiene procedure" }),
            Some(&user.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await
}

async fn upload(app: &TestApp, document_id: Uuid, user: &TestUser) -> Result<RevisionBody> {
    let response = app
        .upload_revision(
            document_id,
            Some(("procedure.pdf", "application/pdf", b"%PDF-1.4 body")),
            "initial issue",
            false,
            &user.token,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json(response).await
}

async fn submit(app: &TestApp, revision_id: Uuid, user: &TestUser) -> Result<RevisionBody> {
    let response = app
        .post_empty(&format!("/api/revisions/{revision_id}/submit"), Some(&user.token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    read_json(response).await
}

async fn approve(app: &TestApp, revision_id: Uuid, user: &TestUser) -> Result<ApprovalBody> {
    let response = app
        .post_json(
            &format!("/api/revisions/{revision_id}/approve"),
            &json!({ "comments": "looks right" }),
            Some(&user.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    read_json(response).await
}

#[tokio::test]
async fn revision_lifecycle_supersedes_previous_approval() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let manager = app.user("manager").await?;
    let today = Utc::now().date_naive();

    let document = create_document(&app, &manager, "SOP-001").await?;
    assert_eq!(document.status, "draft");
    assert_eq!(document.owner_id, manager.id);
    assert!(document.current_revision_id.is_none());

    let first = upload(&app, document.id, &manager).await?;
    assert_eq!(first.revision_number, 1);
    assert_eq!(first.status, "draft");
    assert!(first.has_file);
    assert_eq!(first.file_name.as_deref(), Some("procedure.pdf"));
    assert_eq!(app.storage().object_count().await, 1);

    let submitted = submit(&app, first.id, &manager).await?;
    assert_eq!(submitted.status, "under_review");
    let response = app
        .get(&format!("/api/documents/{}", document.id), Some(&manager.token))
        .await?;
    let detail: DocumentDetailBody = read_json(response).await?;
    assert_eq!(detail.document.status, "under_review");

    let approval = approve(&app, first.id, &manager).await?;
    assert_eq!(approval.revision.status, "approved");
    assert_eq!(approval.revision.review_comments.as_deref(), Some("looks right"));
    assert_eq!(approval.document.status, "approved");
    assert_eq!(approval.document.current_revision_id, Some(first.id));
    let expected_review = today + Months::new(12);
    assert_eq!(approval.document.next_review_date, Some(expected_review));
    assert_eq!(approval.schedule.due_date, expected_review);
    assert_eq!(approval.schedule.status, "pending");
    assert!(approval.superseded_revision_id.is_none());

    let second = upload(&app, document.id, &manager).await?;
    assert_eq!(second.revision_number, 2);
    submit(&app, second.id, &manager).await?;
    let approval = approve(&app, second.id, &manager).await?;
    assert_eq!(approval.superseded_revision_id, Some(first.id));
    assert_eq!(approval.document.current_revision_id, Some(second.id));

    let response = app
        .get(&format!("/api/documents/{}/revisions", document.id), Some(&manager.token))
        .await?;
    let revisions: Vec<RevisionBody> = read_json(response).await?;
    let statuses: Vec<(i32, &str)> = revisions
        .iter()
        .map(|revision| (revision.revision_number, revision.status.as_str()))
        .collect();
    assert_eq!(statuses, vec![(2, "approved"), (1, "superseded")]);

    let response = app
        .get(&format!("/api/documents/{}", document.id), Some(&manager.token))
        .await?;
    let detail: DocumentDetailBody = read_json(response).await?;
    let current = detail.current_revision.expect("current revision present");
    assert_eq!(current.id, second.id);

    let response = app
        .get(&format!("/api/documents/{}/schedules", document.id), Some(&manager.token))
        .await?;
    let schedules: Vec<ScheduleBody> = read_json(response).await?;
    let open = schedules
        .iter()
        .filter(|schedule| schedule.status != "completed")
        .count();
    assert_eq!(schedules.len(), 2);
    assert_eq!(open, 1);
    let closed = schedules
        .iter()
        .find(|schedule| schedule.status == "completed")
        .expect("first cycle closed by the second approval");
    assert!(!closed.no_changes_needed);
    assert_eq!(closed.completed_by, Some(manager.id));

    let actions: Vec<ActivityAction> = app
        .take_events()
        .await
        .into_iter()
        .map(|event| event.action)
        .collect();
    assert!(actions.contains(&ActivityAction::DocumentCreated));
    assert_eq!(
        actions
            .iter()
            .filter(|action| **action == ActivityAction::RevisionApproved)
            .count(),
        2
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn repeated_commands_conflict() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let manager = app.user("manager").await?;

    let document = create_document(&app, &manager, "SOP-002").await?;
    let revision = upload(&app, document.id, &manager).await?;

    let response = app
        .post_json(
            &format!("/api/revisions/{}/approve", revision.id),
            &json!({}),
            Some(&manager.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    submit(&app, revision.id, &manager).await?;
    let response = app
        .post_empty(&format!("/api/revisions/{}/submit", revision.id), Some(&manager.token))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    approve(&app, revision.id, &manager).await?;
    let response = app
        .post_empty(&format!("/api/revisions/{}/approve", revision.id), Some(&manager.token))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .post_json(
            &format!("/api/revisions/{}/reject", revision.id),
            &json!({ "comments": "too late" }),
            Some(&manager.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rejection_restores_document_status() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let manager = app.user("manager").await?;

    let document = create_document(&app, &manager, "SOP-003").await?;
    let draft = upload(&app, document.id, &manager).await?;
    submit(&app, draft.id, &manager).await?;

    let response = app
        .post_json(
            &format!("/api/revisions/{}/reject", draft.id),
            &json!({ "comments": "   " }),
            Some(&manager.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            &format!("/api/revisions/{}/reject", draft.id),
            &json!({ "comments": "missing scope section" }),
            Some(&manager.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let rejected: RevisionBody = read_json(response).await?;
    assert_eq!(rejected.status, "rejected");
    assert_eq!(rejected.review_comments.as_deref(), Some("missing scope section"));

    let response = app
        .get(&format!("/api/documents/{}", document.id), Some(&manager.token))
        .await?;
    let detail: DocumentDetailBody = read_json(response).await?;
    assert_eq!(detail.document.status, "draft");

    let approved = upload(&app, document.id, &manager).await?;
    submit(&app, approved.id, &manager).await?;
    approve(&app, approved.id, &manager).await?;

    let follow_up = upload(&app, document.id, &manager).await?;
    submit(&app, follow_up.id, &manager).await?;
    let response = app
        .post_json(
            &format!("/api/revisions/{}/reject", follow_up.id),
            &json!({ "comments": "not needed" }),
            Some(&manager.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .get(&format!("/api/documents/{}", document.id), Some(&manager.token))
        .await?;
    let detail: DocumentDetailBody = read_json(response).await?;
    assert_eq!(detail.document.status, "approved");
    assert_eq!(detail.document.current_revision_id, Some(approved.id));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn uploads_require_file_unless_review_only() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let manager = app.user("manager").await?;
    let document = create_document(&app, &manager, "SOP-004").await?;

    let response = app
        .upload_revision(document.id, None, "no file", false, &manager.token)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .upload_revision(document.id, None, "periodic review", true, &manager.token)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let review_only: RevisionBody = read_json(response).await?;
    assert!(review_only.is_review_only);
    assert!(!review_only.has_file);

    let response = app
        .get(&format!("/api/revisions/{}/file", review_only.id), Some(&manager.token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let with_file = upload(&app, document.id, &manager).await?;
    let response = app
        .get(&format!("/api/revisions/{}/file", with_file.id), Some(&manager.token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let link: FileUrlBody = read_json(response).await?;
    assert!(link.url.starts_with("https://fake-storage/documents/"));
    assert_eq!(link.expires_in, 3600);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn roles_and_tenants_are_enforced() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let manager = app.user("manager").await?;
    let staff = app.user("staff").await?;
    let outsider = app.user_in(Uuid::new_v4(), "admin").await?;

    let response = app
        .post_json(
            "/api/documents",
            &json!({ "doc_number": "SOP-900", "title": "Unauthorised" }),
            Some(&staff.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let document = create_document(&app, &manager, "SOP-005").await?;
    let revision = upload(&app, document.id, &manager).await?;
    submit(&app, revision.id, &manager).await?;

    let response = app
        .post_empty(&format!("/api/revisions/{}/approve", revision.id), Some(&staff.token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .get(&format!("/api/documents/{}", document.id), Some(&outsider.token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_empty(&format!("/api/revisions/{}/approve", revision.id), Some(&outsider.token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.get("/api/documents", Some(&outsider.token)).await?;
    let listed: Vec<DocumentBody> = read_json(response).await?;
    assert!(listed.is_empty());

    let response = app
        .post_json(
            "/api/documents",
            &json!({ "doc_number": "SOP-005", "title": "Duplicate" }),
            Some(&manager.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/documents",
            &json!({ "doc_number": "SOP-006", "title": "Foreign owner", "owner_id": outsider.id }),
            Some(&manager.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .patch_json(
            &format!("/api/documents/{}", document.id),
            &json!({ "owner_id": outsider.id }),
            Some(&manager.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .patch_json(
            &format!("/api/documents/{}", document.id),
            &json!({ "owner_id": staff.id }),
            Some(&manager.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let reassigned: DocumentBody = read_json(response).await?;
    assert_eq!(reassigned.owner_id, staff.id);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn withdrawn_documents_are_frozen() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let admin = app.user("admin").await?;
    let manager = app.user("manager").await?;

    let document = create_document(&app, &manager, "SOP-006").await?;
    let revision = upload(&app, document.id, &manager).await?;

    let response = app
        .post_empty(&format!("/api/documents/{}/withdraw", document.id), Some(&manager.token))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_empty(&format!("/api/documents/{}/withdraw", document.id), Some(&admin.token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let withdrawn: DocumentBody = read_json(response).await?;
    assert_eq!(withdrawn.status, "withdrawn");
    assert_eq!(withdrawn.doc_number, "SOP-006");

    let response = app
        .post_empty(&format!("/api/documents/{}/withdraw", document.id), Some(&admin.token))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .post_empty(&format!("/api/revisions/{}/submit", revision.id), Some(&manager.token))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .get("/api/documents?status=withdrawn", Some(&manager.token))
        .await?;
    let listed: Vec<DocumentBody> = read_json(response).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, document.id);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn search_filter_is_sanitized() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let manager = app.user("manager").await?;

    let response = app
        .post_json(
            "/api/documents",
            &json!({ "doc_number": "HR-010", "title": "OBrienscript handover notes" }),
            Some(&manager.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    create_document(&app, &manager, "HR-011").await?;

    let response = app
        .get("/api/documents?search=O%27Brien%3Cscript%3E", Some(&manager.token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let raw: Vec<DocumentBody> = read_json(response).await?;
    let response = app
        .get("/api/documents?search=OBrienscript", Some(&manager.token))
        .await?;
    let sanitized: Vec<DocumentBody> = read_json(response).await?;
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].doc_number, "HR-010");
    assert_eq!(sanitized.len(), 1);
    assert_eq!(sanitized[0].id, raw[0].id);

    let response = app
        .get("/api/documents?search=%3C%3E%27", Some(&manager.token))
        .await?;
    let unfiltered: Vec<DocumentBody> = read_json(response).await?;
    assert_eq!(unfiltered.len(), 2);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_authors_receive_consecutive_numbers() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let manager = app.user("manager").await?;
    let document = create_document(&app, &manager, "SOP-400").await?;

    const AUTHORS: usize = 8;
    let identity = manager.identity();
    let state = &app.state;
    let runtime = Handle::current();
    let results = run_concurrently(&state.pool, AUTHORS, |index, conn| {
        let ctx = state.command(&identity);
        let input = NewRevisionInput {
            file: Some(RevisionUpload {
                file_name: format!("draft-{index}.docx"),
                content_type: None,
                bytes: format!("draft {index}").into_bytes(),
            }),
            change_summary: Some(format!("author {index}")),
            ..NewRevisionInput::default()
        };
        let revision = runtime.block_on(revisions::create_revision(
            conn,
            state.storage.as_ref(),
            &ctx,
            document.id,
            input,
        ))?;
        Ok(revision.revision_number)
    });

    let mut numbers = results.into_iter().collect::<Result<Vec<i32>>>()?;
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=AUTHORS as i32).collect::<Vec<_>>());

    let response = app
        .get(&format!("/api/documents/{}/revisions", document.id), Some(&manager.token))
        .await?;
    let listed: Vec<RevisionBody> = read_json(response).await?;
    assert_eq!(listed.len(), AUTHORS);
    assert!(listed.iter().all(|revision| revision.status == "draft"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn simultaneous_approvals_have_one_winner() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let manager = app.user("manager").await?;
    let admin = app.user("admin").await?;
    let document = create_document(&app, &manager, "SOP-401").await?;
    let revision = upload(&app, document.id, &manager).await?;
    submit(&app, revision.id, &manager).await?;

    let reviewers = [manager.identity(), admin.identity()];
    let state = &app.state;
    let results = run_concurrently(&state.pool, 4, |index, conn| {
        let ctx = state.command(&reviewers[index % reviewers.len()]);
        Ok(revisions::approve_revision(conn, &ctx, revision.id, None)?)
    });

    let (won, lost): (Vec<_>, Vec<_>) = results.into_iter().partition(|result| result.is_ok());
    assert_eq!(won.len(), 1);
    for result in lost {
        let err = result.err().expect("losing approval returns an error");
        assert!(matches!(
            err.downcast_ref::<ControlError>(),
            Some(ControlError::InvalidStateTransition { .. })
        ));
    }

    let response = app
        .get(&format!("/api/documents/{}/schedules", document.id), Some(&manager.token))
        .await?;
    let schedules: Vec<ScheduleBody> = read_json(response).await?;
    assert_eq!(schedules.len(), 1);
    assert_eq!(schedules[0].status, "pending");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn competing_revisions_leave_one_approved() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let manager = app.user("manager").await?;
    let document = create_document(&app, &manager, "SOP-402").await?;
    let first = upload(&app, document.id, &manager).await?;
    let second = upload(&app, document.id, &manager).await?;
    submit(&app, first.id, &manager).await?;
    submit(&app, second.id, &manager).await?;

    let candidates = [first.id, second.id];
    let identity = manager.identity();
    let state = &app.state;
    let results = run_concurrently(&state.pool, candidates.len(), |index, conn| {
        let ctx = state.command(&identity);
        let outcome = revisions::approve_revision(conn, &ctx, candidates[index], None)?;
        Ok(outcome.revision.id)
    });
    let approved_in_order = results.into_iter().collect::<Result<Vec<Uuid>>>()?;
    assert_eq!(approved_in_order.len(), 2);

    let response = app
        .get(&format!("/api/documents/{}/revisions", document.id), Some(&manager.token))
        .await?;
    let listed: Vec<RevisionBody> = read_json(response).await?;
    let approved: Vec<Uuid> = listed
        .iter()
        .filter(|revision| revision.status == "approved")
        .map(|revision| revision.id)
        .collect();
    assert_eq!(approved.len(), 1);
    assert_eq!(
        listed
            .iter()
            .filter(|revision| revision.status == "superseded")
            .count(),
        1
    );

    let response = app
        .get(&format!("/api/documents/{}", document.id), Some(&manager.token))
        .await?;
    let detail: DocumentDetailBody = read_json(response).await?;
    let current = detail.current_revision.expect("current revision present");
    assert_eq!(current.id, approved[0]);

    let response = app
        .get(&format!("/api/documents/{}/schedules", document.id), Some(&manager.token))
        .await?;
    let schedules: Vec<ScheduleBody> = read_json(response).await?;
    assert_eq!(
        schedules
            .iter()
            .filter(|schedule| schedule.status != "completed")
            .count(),
        1
    );

    app.cleanup().await?;
    Ok(())
}
