//! GitHub push-webhook ingress (spec §6). Verifies `X-Hub-Signature-256`
//! against `GITHUB_WEBHOOK_SECRET` when configured, accepts only `push`
//! events, and enqueues a regeneration job via `isocrates_jobs::JobQueue`.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Verify a GitHub `sha256=<hex>` signature against the raw request body.
/// Constant-time via `Mac::verify_slice`, which never short-circuits on the
/// first mismatched byte.
fn verify_signature(body: &[u8], signature_header: &str, secret: &str) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig_bytes).is_ok()
}

pub async fn github_webhook(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    if let Some(secret) = &state.config.github_webhook_secret {
        let signature = headers.get("x-hub-signature-256").and_then(|v| v.to_str().ok()).unwrap_or("");
        if !verify_signature(&body, signature, secret) {
            warn!("webhook signature verification failed");
            return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "invalid webhook signature"}))).into_response();
        }
    } else {
        warn!("GITHUB_WEBHOOK_SECRET not configured — skipping signature verification");
    }

    let event_type = headers.get("x-github-event").and_then(|v| v.to_str().ok()).unwrap_or("");
    if event_type != "push" {
        return Json(serde_json::json!({
            "status": "ignored",
            "message": format!("event type '{event_type}' ignored, only 'push' is processed"),
        }))
        .into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "invalid JSON payload"}))).into_response(),
    };

    let repo_url = payload
        .get("repository")
        .and_then(|r| r.get("clone_url").or_else(|| r.get("html_url")))
        .and_then(|v| v.as_str());
    let Some(repo_url) = repo_url else {
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": "no repository URL in payload"}))).into_response();
    };

    let commit_sha = payload
        .get("head_commit")
        .and_then(|c| c.get("id"))
        .and_then(|v| v.as_str())
        .or_else(|| payload.get("after").and_then(|v| v.as_str()));

    match state.queue.enqueue(repo_url, commit_sha).await {
        Ok(job) => Json(serde_json::json!({
            "status": "queued",
            "job_id": job.id,
            "message": format!("regeneration job enqueued for {repo_url}"),
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "failed to enqueue regeneration job");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signature_verifies() {
        let secret = "topsecret";
        let body = br#"{"hello":"world"}"#;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(verify_signature(body, &format!("sha256={sig}"), secret));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let secret = "topsecret";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(b"original");
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(!verify_signature(b"tampered", &format!("sha256={sig}"), secret));
    }

    #[test]
    fn missing_prefix_fails_verification() {
        assert!(!verify_signature(b"body", "deadbeef", "secret"));
    }

    #[test]
    fn malformed_hex_fails_verification() {
        assert!(!verify_signature(b"body", "sha256=not-hex", "secret"));
    }
}
