use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use crate::models::ActiveUser;

/// Response returned after joining a document session
#[derive(Serialize, Deserialize, ToSchema)]
pub struct JoinSessionResponse {
    pub session_id: String,
    pub active_users: Vec<ActiveUser>,
    pub change_topic: String,
    pub presence_topic: String,
}

/// Response returned after leaving a document session
#[derive(Serialize, Deserialize, ToSchema)]
pub struct LeaveSessionResponse {
    pub success: bool,
}

/// Response listing the users present in a document
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ActiveUsersResponse {
    pub users: Vec<ActiveUser>,
}

/// Request payload for a cursor/heartbeat update
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CursorUpdateRequest {
    pub cursor_position: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CursorUpdateResponse {
    pub success: bool,
}
