//! Row types mapped straight from SQLite, kept apart from the wire DTOs in
//! anonbox-types.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub verify_code: String,
    pub verify_code_expires_at: String,
    pub is_verified: bool,
    pub is_accepting_messages: bool,
    pub created_at: String,
}

/// Insert parameters for a fresh, unverified account.
pub struct NewUser<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub verify_code: &'a str,
    pub verify_code_expires_at: &'a str,
    pub created_at: &'a str,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub recipient_id: String,
    pub sender_id: Option<String>,
    /// Joined from `users`; `None` for anonymous messages.
    pub sender_username: Option<String>,
    pub content: String,
    pub created_at: String,
}
