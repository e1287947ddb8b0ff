//! Notifier client - command-line entry point
//!
//! Connects with the token in `NOTIFIER_TOKEN`, logs every toast and unread-count
//! change, and stops cleanly on Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use notifier_client::toast::{default_title, ToastEvent, ToastManager};
use notifier_client::{ClientConfig, Credential, NotificationClient, SessionState};
use tokio::sync::broadcast::error::RecvError;

fn credential_from_env() -> Result<Credential> {
    let token = std::env::var("NOTIFIER_TOKEN").context("NOTIFIER_TOKEN is not set")?;
    match std::env::var("NOTIFIER_TOKEN_EXPIRES_AT") {
        Ok(raw) => {
            let expires_at = DateTime::parse_from_rfc3339(raw.trim())
                .with_context(|| format!("NOTIFIER_TOKEN_EXPIRES_AT={raw:?} is not RFC 3339"))?
                .with_timezone(&Utc);
            Ok(Credential::new(token, expires_at))
        }
        Err(_) => Credential::from_jwt(token)
            .context("token has no readable expiry; set NOTIFIER_TOKEN_EXPIRES_AT"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("notifier_client=debug")),
        )
        .init();

    let config = ClientConfig::from_env().context("invalid configuration")?;
    let locale = config.locale;
    let credential = credential_from_env()?;

    let client = NotificationClient::builder(config)
        .credential(credential)
        .build()?;
    let toasts = ToastManager::new();
    client.register(Arc::new(toasts.clone()));

    let mut toast_events = toasts.subscribe();
    let mut unread = client.unread().subscribe();
    let mut status = client.watch_status();

    client.start()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping");
                client.stop();
                toasts.clear();
                break;
            }
            event = toast_events.recv() => match event {
                Ok(ToastEvent::Shown(toast)) => {
                    let title = toast
                        .title
                        .as_deref()
                        .unwrap_or_else(|| default_title(toast.severity, locale));
                    tracing::info!(
                        id = %toast.id,
                        severity = ?toast.severity,
                        duration_ms = toast.duration_ms,
                        "{}: {}",
                        title,
                        toast.message
                    );
                }
                Ok(ToastEvent::Removed { id, reason }) => {
                    tracing::debug!(id = %id, reason = ?reason, "toast removed");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} toast events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            changed = unread.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(count) = *unread.borrow_and_update() {
                    tracing::info!(unread = count, "unread count");
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                match &current.last_error {
                    Some(err) if !current.state.is_live() => tracing::warn!(
                        state = %current.state,
                        attempt = current.attempt,
                        "session {}: {}",
                        current.state,
                        err
                    ),
                    _ => tracing::info!(state = %current.state, "session {}", current.state),
                }
                if current.state == SessionState::Disconnected {
                    let reason = current.last_error.map(|e| e.to_string()).unwrap_or_default();
                    anyhow::bail!("session ended: {reason}");
                }
            }
        }
    }

    Ok(())
}
