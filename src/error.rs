use thiserror::Error;

/// Catalog fetch failed; fatal to the listing view, retriable by the user.
#[derive(Error, Debug)]
pub enum ListingError {
    #[error("Server error: {status}")]
    Status { status: u16 },

    #[error("No response from server. Check your internet connection. ({0})")]
    Transport(String),

    #[error("Could not read the coin listing: {0}")]
    Decode(String),
}

/// A single price poll failed. Transient; the next tick retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuoteError {
    #[error("No response from price service: {0}")]
    Transport(String),

    #[error("Price service error: {status}")]
    Status { status: u16 },

    /// Logical error reported inside an otherwise successful payload.
    #[error("{0}")]
    Api(String),

    #[error("Malformed price payload: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum DetailsError {
    #[error("Failed to fetch coin details: server error {status}")]
    Status { status: u16 },

    #[error("Failed to fetch coin details: {0}")]
    Transport(String),

    #[error("Could not read coin details: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum RecommendationError {
    #[error("OpenAI API key is not configured. Set OPENAI_API_KEY and restart.")]
    MissingApiKey,

    #[error("Market data for this coin is incomplete. Please try again.")]
    MissingMarketData,

    #[error("Invalid API key. Check the OpenAI API key.")]
    InvalidApiKey,

    #[error("Too many requests. Please try again later.")]
    RateLimited,

    #[error("OpenAI server error ({status}). Please try again later.")]
    Upstream { status: u16 },

    #[error("API error: {status} - {message}")]
    Status { status: u16, message: String },

    #[error("No answer received from OpenAI. Check your internet connection. ({0})")]
    Transport(String),

    #[error("No response from OpenAI")]
    EmptyAnswer,

    #[error("Could not parse the recommendation: {0}")]
    Unparseable(String),

    #[error(transparent)]
    Details(#[from] DetailsError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Coin {0} is not in the selection")]
    NotSelected(String),

    #[error("Coin {0} is already selected")]
    AlreadySelected(String),

    #[error("Selection holds at most {capacity} coins, got {requested}")]
    OverCapacity { capacity: usize, requested: usize },
}

impl QuoteError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl ListingError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl DetailsError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_quote_error_displays_raw_message() {
        let err = QuoteError::Api("rate limited".to_string());
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn test_listing_status_message() {
        let err = ListingError::Status { status: 429 };
        assert_eq!(err.to_string(), "Server error: 429");
    }
}
