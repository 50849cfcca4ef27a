use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream};
use std::convert::Infallible;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::auth::auth;
use crate::collab::multiplexer::StreamEvent;
use crate::models::ErrorResponse;
use crate::routes::AppState;
use crate::services::auth_service::CallerIdentity;
use crate::utils::scope_guard::ScopeGuard;

/// Server-sent stream of a document's activity. Committed changes arrive as `change` events and
/// join, leave and cursor updates as `presence` events; a final `canceled` event is sent when
/// the server tears the subscription down. A client disconnect drops the stream, which releases
/// the subscription.
pub async fn doc_changes(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(document_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<ErrorResponse>)> {
    auth::ensure_document_reader(state.store.as_ref(), &document_id, &caller.user_id).await?;

    let subscription = state.collab.stream_changes(&document_id, &caller.user_id).await;
    let shutdown = state.collab.shutdown_signal();
    info!(
        "Opened change stream {} on document {}",
        subscription.consumer_id(),
        document_id
    );

    let consumer_id = subscription.consumer_id().to_string();
    let closed = ScopeGuard::new(move || {
        debug!("Change stream {} on document {} closed", consumer_id, document_id);
    });

    let events = stream::unfold(
        (subscription, shutdown, false, closed),
        |(mut subscription, mut shutdown, finished, closed)| async move {
            if finished {
                return None;
            }

            let next = tokio::select! {
                event = subscription.recv() => event,
                _ = wait_for_shutdown(&mut shutdown) => None,
            };

            let Some(next) = next else {
                subscription.release();
                let event = Event::default().event("canceled").data("subscription closed");
                return Some((Ok(event), (subscription, shutdown, true, closed)));
            };

            let event = match next {
                StreamEvent::Change(change) => {
                    match Event::default().event("change").json_data(change.as_ref()) {
                        Ok(event) => event.id(change.version.clone()),
                        Err(e) => {
                            error!("Error encoding change {} for streaming: {}", change.version, e);
                            Event::default().comment("undeliverable change")
                        }
                    }
                }
                StreamEvent::Presence(presence) => {
                    match Event::default().event("presence").json_data(presence.as_ref()) {
                        Ok(event) => event,
                        Err(e) => {
                            error!("Error encoding presence update for streaming: {}", e);
                            Event::default().comment("undeliverable presence update")
                        }
                    }
                }
            };
            Some((Ok(event), (subscription, shutdown, false, closed)))
        },
    );

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|down| *down).await.is_err() {
        // Sender gone without a shutdown; nothing will ever cancel us from here
        std::future::pending::<()>().await;
    }
}
