use tokio_tungstenite::tungstenite;

/// Errors produced by the chat client.
///
/// Inside the synchronizer these are caught at the boundary and logged; only
/// user-initiated commands hand them back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("websocket transport failed: {0}")]
    Transport(#[from] Box<tungstenite::Error>),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("channel is not open")]
    ChannelClosed,

    #[error("unknown conversation {0}")]
    UnknownConversation(String),
}

impl From<tungstenite::Error> for SyncError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

impl SyncError {
    /// True for failures where the remote end could not be reached at all.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Http(err) => err.is_connect() || err.is_timeout(),
            Self::Transport(err) => matches!(
                err.as_ref(),
                tungstenite::Error::Io(io_err) if matches!(
                    io_err.kind(),
                    std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                )
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
