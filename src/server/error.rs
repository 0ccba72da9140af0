use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::server::utils::{
    crypto_utils::TokenError, m3u8_utils::PlaylistRewriteError, proxy_url_utils::ProxyUrlError,
};

pub type AppResult<T> = Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),

    #[error("could not validate credentials")]
    Forbidden,

    #[error("upstream request failed: {0}")]
    BadGateway(String),

    #[error("internal server error")]
    InternalServerError,

    #[error("{0}")]
    InternalServerErrorWithContext(String),

    #[error(transparent)]
    ProxyUrl(#[from] ProxyUrlError),

    #[error(transparent)]
    Playlist(#[from] PlaylistRewriteError),
}

impl From<TokenError> for Error {
    fn from(err: TokenError) -> Self {
        Self::ProxyUrl(ProxyUrlError::Token(err))
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::InternalServerError | Self::InternalServerErrorWithContext(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ProxyUrl(ProxyUrlError::Token(_)) => StatusCode::UNAUTHORIZED,
            Self::ProxyUrl(_) => StatusCode::BAD_REQUEST,
            Self::Playlist(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!("request failed with {}: {}", status, self);
        } else {
            warn!("request rejected with {}: {}", status, self);
        }

        // don't leak internals on 500s
        let message = match self {
            Self::InternalServerErrorWithContext(_) => Self::InternalServerError.to_string(),
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
