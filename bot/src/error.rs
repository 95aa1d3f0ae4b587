use thiserror::Error;

pub type BotResult<T> = Result<T, BotError>;

#[derive(Debug, Error)]
pub enum BotError {
    /// Transport failure. The URL is stripped because it embeds the token.
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Telegram API error {code:?}: {description}")]
    Api {
        code: Option<i32>,
        description: String,
    },

    #[error("malformed API response: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pack(#[from] veil_packer::PackError),

    #[error("pipeline worker stopped: {0}")]
    Worker(String),
}

impl From<reqwest::Error> for BotError {
    fn from(error: reqwest::Error) -> Self {
        BotError::Http(error.without_url())
    }
}
