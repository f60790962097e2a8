use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to create shell session: {message}")]
    CreateSession { message: String },
    #[error("unknown session id '{session_id}'")]
    UnknownSession { session_id: String },
}

impl SessionError {
    pub(crate) fn create_session(message: impl Into<String>) -> Self {
        Self::CreateSession {
            message: message.into(),
        }
    }

    pub(crate) fn unknown_session(session_id: impl Into<String>) -> Self {
        Self::UnknownSession {
            session_id: session_id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
