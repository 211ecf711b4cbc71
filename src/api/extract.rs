//! Request extractors
//!
//! Thin wrappers over axum's `Json`, `Query` and `Path` that reject with
//! [`ApiError`] so malformed input gets the standard error body.

use axum::extract::{FromRequest, FromRequestParts};

use crate::api::error::ApiError;

/// JSON body; a bad body is a `validation_error`
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Query string; a bad parameter is a `validation_error`
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// Path parameters
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);
