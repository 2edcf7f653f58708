use crate::test_context::TestContext;
use chrono::{DateTime, Utc};
use color_eyre::eyre::{eyre, Context, Result};
use common_services::reconcile::recover_expired;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires a running Postgres (secrets.database_url in assets/settings.yaml)"]
async fn integration_test() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    color_eyre::install().ok();

    let mut context = TestContext::new().await?;

    test_health_endpoint(&context)
        .await
        .wrap_err("test_health_endpoint")?;
    test_validation_rejection(&context)
        .await
        .wrap_err("test_validation_rejection")?;
    test_happy_path(&context).await.wrap_err("test_happy_path")?;
    test_priority_overtake(&context)
        .await
        .wrap_err("test_priority_overtake")?;
    test_capacity_backpressure(&context)
        .await
        .wrap_err("test_capacity_backpressure")?;
    test_cooperative_cancel(&context)
        .await
        .wrap_err("test_cooperative_cancel")?;
    test_crash_recovery(&mut context)
        .await
        .wrap_err("test_crash_recovery")?;

    Ok(())
}

async fn test_health_endpoint(context: &TestContext) -> Result<()> {
    let response = context
        .http_client
        .get(context.api_url("/health"))
        .send()
        .await?;

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "healthy");

    info!("✅ health endpoint");
    Ok(())
}

async fn test_validation_rejection(context: &TestContext) -> Result<()> {
    let before = list_total(context).await?;

    let response = context
        .http_client
        .post(context.api_url("/api/jobs/submit"))
        .json(&json!({ "prompt": "", "width": 500 }))
        .send()
        .await?;

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await?;
    assert_eq!(body["error_kind"], "validation");
    let message = body["error"].as_str().unwrap_or_default();
    assert!(message.contains("prompt length"), "got: {message}");
    assert!(message.contains("width"), "got: {message}");

    // No orphan record was created.
    assert_eq!(list_total(context).await?, before);

    info!("✅ validation rejection");
    Ok(())
}

async fn test_happy_path(context: &TestContext) -> Result<()> {
    let job_id = submit(context, &json!({ "prompt": "a cat walks", "seed": 42 })).await?;

    let record = wait_for_status(context, job_id, "completed", Duration::from_secs(20)).await?;
    assert_eq!(record["progress"], 1.0);
    assert_eq!(record["params"]["seed"], 42);

    let submitted_at = timestamp(&record, "submitted_at")?;
    let started_at = timestamp(&record, "started_at")?;
    let completed_at = timestamp(&record, "completed_at")?;
    assert!(submitted_at <= started_at);
    assert!(started_at <= completed_at);

    let response = context
        .http_client
        .get(context.api_url(&format!("/api/jobs/{job_id}/download")))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "video/mp4"
    );
    let bytes = response.bytes().await?;
    assert_eq!(&bytes[..], &b"fake video bytes"[..]);

    info!("✅ happy path");
    Ok(())
}

async fn test_priority_overtake(context: &TestContext) -> Result<()> {
    // One slow job occupies the only slot while A and B queue up.
    let blocker = submit(context, &json!({ "prompt": "slow blocker" })).await?;
    let job_a = submit(context, &json!({ "prompt": "job a", "priority": 0 })).await?;
    let job_b = submit(context, &json!({ "prompt": "job b", "priority": 5 })).await?;

    wait_for_status(context, blocker, "completed", Duration::from_secs(30)).await?;
    let record_a = wait_for_status(context, job_a, "completed", Duration::from_secs(30)).await?;
    let record_b = wait_for_status(context, job_b, "completed", Duration::from_secs(30)).await?;

    let started_a = timestamp(&record_a, "started_at")?;
    let started_b = timestamp(&record_b, "started_at")?;
    assert!(
        started_b < started_a,
        "priority 5 should start before priority 0 ({started_b} vs {started_a})"
    );

    info!("✅ priority overtake");
    Ok(())
}

async fn test_capacity_backpressure(context: &TestContext) -> Result<()> {
    let jobs = vec![
        submit(context, &json!({ "prompt": "backpressure one" })).await?,
        submit(context, &json!({ "prompt": "backpressure two" })).await?,
        submit(context, &json!({ "prompt": "backpressure three" })).await?,
    ];

    // With max_concurrent_jobs = 1 there is never more than one active job.
    let mut max_active = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let status: Value = context
            .http_client
            .get(context.api_url("/api/system/status"))
            .send()
            .await?
            .json()
            .await?;
        max_active = max_active.max(status["active_jobs"].as_i64().unwrap_or(0));

        let mut done = 0;
        for job_id in &jobs {
            let record = get_status(context, *job_id).await?;
            if record["status"] == "completed" {
                done += 1;
            }
        }
        if done == jobs.len() {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            return Err(eyre!("jobs did not finish in time"));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(max_active <= 1, "observed {max_active} concurrent jobs");

    info!("✅ capacity backpressure");
    Ok(())
}

async fn test_cooperative_cancel(context: &TestContext) -> Result<()> {
    let job_id = submit(context, &json!({ "prompt": "slow cancel target" })).await?;

    // Wait until it is visibly running.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let record = get_status(context, job_id).await?;
        if record["status"] == "processing" && record["progress"].as_f64().unwrap_or(0.0) >= 0.2 {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            return Err(eyre!("job never reached 20% progress"));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let response = context
        .http_client
        .delete(context.api_url(&format!("/api/jobs/{job_id}")))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let record = wait_for_status(context, job_id, "cancelled", Duration::from_secs(15)).await?;
    assert_eq!(record["error_kind"], "cancelled");

    // No artifact was left behind.
    let artifact = context
        .settings
        .generator
        .artifact_path(&job_id.to_string());
    assert!(!artifact.exists(), "cancelled job left an artifact");

    // Cancel on a terminal job is a pure read.
    let response = context
        .http_client
        .delete(context.api_url(&format!("/api/jobs/{job_id}")))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "cancelled");

    info!("✅ cooperative cancel");
    Ok(())
}

async fn test_crash_recovery(context: &mut TestContext) -> Result<()> {
    let job_id = submit(context, &json!({ "prompt": "slow crash victim" })).await?;

    // Wait for the claim, then kill the replica mid-run.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let record = get_status(context, job_id).await?;
        if record["status"] == "processing" {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            return Err(eyre!("job was never claimed"));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    context.kill_worker();

    // Let the lease run out, then sweep.
    tokio::time::sleep(context.settings.worker.lease() + Duration::from_secs(1)).await;
    let recovered = recover_expired(&context.pool, context.settings.reconciler.max_retries).await?;
    assert!(recovered.contains(&job_id));

    let record = get_status(context, job_id).await?;
    assert_eq!(record["status"], "pending");
    assert_eq!(record["retry_count"], 1);

    // A surviving replica picks it up and drives it home.
    context.restart_worker();
    let record = wait_for_status(context, job_id, "completed", Duration::from_secs(30)).await?;
    assert_eq!(record["retry_count"], 1);

    // started_at reflects the second run: it postdates the crash sweep.
    let started_at = timestamp(&record, "started_at")?;
    let completed_at = timestamp(&record, "completed_at")?;
    assert!(started_at <= completed_at);

    info!("✅ crash recovery");
    Ok(())
}

// --- helpers ---

async fn submit(context: &TestContext, body: &Value) -> Result<Uuid> {
    let response = context
        .http_client
        .post(context.api_url("/api/jobs/submit"))
        .json(body)
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "pending");
    Ok(body["job_id"]
        .as_str()
        .ok_or_else(|| eyre!("missing job_id"))?
        .parse()?)
}

async fn get_status(context: &TestContext, job_id: Uuid) -> Result<Value> {
    let response = context
        .http_client
        .get(context.api_url(&format!("/api/jobs/{job_id}/status")))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    Ok(response.json().await?)
}

async fn wait_for_status(
    context: &TestContext,
    job_id: Uuid,
    expected: &str,
    timeout: Duration,
) -> Result<Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let record = get_status(context, job_id).await?;
        if record["status"] == expected {
            return Ok(record);
        }
        let status = &record["status"];
        if status == "failed" || (status == "cancelled" && expected != "cancelled") {
            return Err(eyre!("job {job_id} ended as {status}, wanted {expected}"));
        }
        if tokio::time::Instant::now() > deadline {
            return Err(eyre!(
                "job {job_id} stuck in {status}, wanted {expected} within {timeout:?}"
            ));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn list_total(context: &TestContext) -> Result<i64> {
    let body: Value = context
        .http_client
        .get(context.api_url("/api/jobs/list"))
        .send()
        .await?
        .json()
        .await?;
    body["total"]
        .as_i64()
        .ok_or_else(|| eyre!("list response without total"))
}

fn timestamp(record: &Value, field: &str) -> Result<DateTime<Utc>> {
    Ok(record[field]
        .as_str()
        .ok_or_else(|| eyre!("{field} missing"))?
        .parse()?)
}
