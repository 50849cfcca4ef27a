use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Document store is reachable", body = ReadyResponse),
        (status = 503, description = "Document store is unreachable", body = ReadyResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Join the collaboration session of a document
#[utoipa::path(
    post,
    path = "/api/v1/documents/{document_id}/session/join",
    params(("document_id" = String, Path, description = "Document UUID")),
    responses(
        (status = 200, description = "Joined", body = JoinSessionResponse),
        (status = 400, description = "Malformed document id", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "No read access", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn session_join_doc() {}

/// Leave the collaboration session of a document
#[utoipa::path(
    post,
    path = "/api/v1/documents/{document_id}/session/leave",
    params(("document_id" = String, Path, description = "Document UUID")),
    responses(
        (status = 200, description = "Left", body = LeaveSessionResponse),
        (status = 400, description = "Malformed document id", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn session_leave_doc() {}

/// List the users present in a document
#[utoipa::path(
    get,
    path = "/api/v1/documents/{document_id}/session/users",
    params(("document_id" = String, Path, description = "Document UUID")),
    responses(
        (status = 200, description = "Active users", body = ActiveUsersResponse),
        (status = 403, description = "No read access", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn session_users_doc() {}

/// Move the caller's cursor; doubles as a heartbeat
#[utoipa::path(
    post,
    path = "/api/v1/documents/{document_id}/session/cursor",
    params(("document_id" = String, Path, description = "Document UUID")),
    request_body = CursorUpdateRequest,
    responses(
        (status = 200, description = "Cursor recorded", body = CursorUpdateResponse),
        (status = 403, description = "No read access", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn session_cursor_doc() {}

/// Server-sent stream of document activity (`change` and `presence` events, then `canceled`)
#[utoipa::path(
    get,
    path = "/api/v1/documents/{document_id}/changes",
    params(("document_id" = String, Path, description = "Document UUID")),
    responses(
        (status = 200, description = "text/event-stream of DocumentChange (`change`) and PresenceEvent (`presence`)", body = DocumentChange, content_type = "text/event-stream"),
        (status = 403, description = "No read access", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn doc_changes_doc() {}

/// Submit edits against a base version
#[utoipa::path(
    post,
    path = "/api/v1/documents/{document_id}/sync",
    params(("document_id" = String, Path, description = "Document UUID")),
    request_body = SyncDocumentRequest,
    responses(
        (status = 200, description = "Applied, or conflict with the missed changes", body = SyncDocumentResponse),
        (status = 403, description = "No read access", body = ErrorResponse),
        (status = 404, description = "Document not found", body = ErrorResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn doc_sync_doc() {}

/// Engine and host diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics", body = DiagnosticsResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        session_join_doc,
        session_leave_doc,
        session_users_doc,
        session_cursor_doc,
        doc_changes_doc,
        doc_sync_doc,
        diagnostics_doc,
    ),
    components(
        schemas(
            HealthResponse, ReadyResponse, ErrorResponse, DiagnosticsResponse,
            ActiveUser, Operation, OperationType, DocumentChange, PresenceEvent,
            JoinSessionResponse, LeaveSessionResponse, ActiveUsersResponse,
            CursorUpdateRequest, CursorUpdateResponse,
            SyncDocumentRequest, SyncDocumentResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_document_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/documents/{document_id}/sync"));
        assert!(doc.paths.paths.contains_key("/api/v1/documents/{document_id}/changes"));
    }
}
