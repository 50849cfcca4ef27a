use crate::{models::{DiagnosticsResponse, ErrorResponse}, routes::AppState, services::auth_service::CallerIdentity};
use axum::{extract::{State, Extension}, http::StatusCode, Json};
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Engine and host diagnostics
pub async fn diagnostics(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {
    let collab = &state.collab;
    let n_sessions = collab.session_count() as u32;
    let n_active_users = collab.user_count() as u32;
    let n_subscribed_docs = collab.subscribed_document_count() as u32;
    let n_subscriptions = collab.subscription_count() as u32;
    let n_broker_topics = collab.broker_topic_count() as u32;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0)
        }
    };

    info!(
        "Diagnostics for {}: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Sessions: {}, Streams: {}",
        caller.user_id,
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_sessions,
        n_subscriptions
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_sessions,
            n_active_users,
            n_subscribed_docs,
            n_subscriptions,
            n_broker_topics,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
