//! Webhook endpoints for git hosting providers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use sitehook_core::push::PushEvent;
use sitehook_runner::BuildOptions;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/github/{name}", post(github_webhook))
}

/// Handle a GitHub webhook delivery for one target.
///
/// A push to the target's branch replaces whatever the target is doing with a
/// fresh build. The build runs in the background.
async fn github_webhook(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    // Without a secret no delivery can be authenticated, so none is accepted.
    let Some(secret) = state.webhook_secret.as_deref() else {
        warn!(target_name = %name, "Webhook delivery refused, no webhook secret configured");
        return Err(ApiError::Unavailable(
            "webhook secret not configured".to_string(),
        ));
    };
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok());
    if !verify_github_signature(secret, &body, signature) {
        warn!(target_name = %name, "Webhook signature did not validate, is the secret configured correctly?");
        return Err(ApiError::Forbidden("invalid signature".to_string()));
    }

    let runner = state
        .runner(&name)
        .ok_or_else(|| ApiError::NotFound(format!("unknown target '{}'", name)))?;

    let event_type = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    if event_type != "push" {
        info!(target_name = %name, event = %event_type, "Ignoring non-push event");
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;
    let push = PushEvent::from_github_payload(&payload)
        .ok_or_else(|| ApiError::BadRequest("push event without ref".to_string()))?;

    if !push.targets_branch(runner.branch()) {
        debug!(
            target_name = %name,
            push_ref = %push.r#ref,
            branch = %runner.branch(),
            "Push to another branch, not building"
        );
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))));
    }

    info!(
        target_name = %name,
        push_ref = %push.r#ref,
        sha = ?push.after,
        pusher = %push.pusher,
        "Push received, starting build"
    );
    runner
        .build(BuildOptions {
            abort_running: true,
            ..Default::default()
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))))
}

/// Verify GitHub webhook signature.
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
