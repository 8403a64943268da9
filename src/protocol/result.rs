//! Outcome of a correlated request.

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::{Error, Result};

use super::response::{Request, Response};

// ============================================================================
// RequestResult
// ============================================================================

/// The outcome of sending a request and waiting for its response.
///
/// Always holds the request plus exactly one of a response or an error.
/// A received `Error` response is still a response: it lands in the response
/// arm and [`RequestResult::is_successful`] reports `false`.
#[derive(Debug)]
pub struct RequestResult {
    request: Request,
    outcome: std::result::Result<Response, Error>,
}

impl RequestResult {
    /// A response was received.
    #[inline]
    #[must_use]
    pub fn success(request: Request, response: Response) -> Self {
        Self {
            request,
            outcome: Ok(response),
        }
    }

    /// No response could be obtained (send failure, timeout, closed connection).
    #[inline]
    #[must_use]
    pub fn failure(request: Request, error: Error) -> Self {
        Self {
            request,
            outcome: Err(error),
        }
    }

    /// Returns `true` if a response arrived and it is not an `Error` response.
    #[inline]
    #[must_use]
    pub fn is_successful(&self) -> bool {
        matches!(&self.outcome, Ok(response) if !response.is_error())
    }

    /// Returns the request that was sent.
    #[inline]
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the response, if one arrived.
    #[inline]
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        self.outcome.as_ref().ok()
    }

    /// Returns the transport, timeout, or connection error, if any.
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.outcome.as_ref().err()
    }

    /// Splits into the request and the raw outcome.
    #[must_use]
    pub fn into_parts(self) -> (Request, std::result::Result<Response, Error>) {
        (self.request, self.outcome)
    }

    /// Returns the response, or the error that prevented one.
    ///
    /// # Errors
    ///
    /// Returns the failure error if no response arrived.
    pub fn into_response(self) -> Result<Response> {
        self.outcome
    }

    /// Returns the success body.
    ///
    /// # Errors
    ///
    /// - the failure error if no response arrived
    /// - [`Error::ErrorResponse`] if the peer answered with an error
    pub fn into_result(self) -> Result<Value> {
        self.outcome?.into_result()
    }
}

// ============================================================================
// Tests
// ============================================================================
