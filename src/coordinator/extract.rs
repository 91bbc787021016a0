//! Request extractors whose rejections render as `{"detail": ...}`

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::common::Error;

/// Feature id from the `:id` path segment. Anything that is not a UUID
/// matches no feature, so it is a 404 rather than a 400.
#[derive(Debug, Clone, Copy)]
pub struct FeatureId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for FeatureId
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<Uuid>::from_request_parts(parts, state).await {
            Ok(Path(id)) => Ok(FeatureId(id)),
            Err(e) => {
                tracing::debug!(path = %parts.uri.path(), error = %e, "unparseable feature id");
                Err(Error::NotFound(parts.uri.path().to_string()))
            }
        }
    }
}

/// JSON request body; malformed or incomplete bodies are a 400
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(Error::Validation(rejection.body_text())),
        }
    }
}
