//! HTTP error plumbing: a status code, an optional body message and
//! `Allow` header, plus the call-site location for log correlation.

use core::fmt;
use core::panic::Location;
use std::error::Error as StdError;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

pub struct HttpErrorBuilder {
    pub code: StatusCode,
    pub loc: &'static Location<'static>,
    pub msg: Option<String>,
    pub allow: Option<&'static str>,
}

impl HttpErrorBuilder {
    #[inline]
    #[track_caller]
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            loc: Location::caller(),
            msg: None,
            allow: None,
        }
    }

    /// Builds an error from a source, falling back to the source's own
    /// `Display` for the body message when [`with_msg`](Self::with_msg)
    /// wasn't called — callers get a real reason in the response body
    /// without having to restate the error as a string at every call site.
    #[inline]
    pub fn err<T: Into<Box<dyn StdError + Sync + Send + 'static>>>(self) -> impl FnOnce(T) -> HttpError {
        move |source| {
            let source: Box<dyn StdError + Sync + Send + 'static> = source.into();
            let msg = self.msg.unwrap_or_else(|| source.to_string());
            HttpError {
                code: self.code,
                loc: self.loc,
                msg: Some(msg),
                allow: self.allow,
                source: Some(source),
            }
        }
    }

    #[inline]
    pub fn with_msg(mut self, msg: impl Into<String>) -> HttpErrorBuilder {
        self.msg = Some(msg.into());
        self
    }

    #[inline]
    pub fn with_allow(mut self, allow: &'static str) -> HttpErrorBuilder {
        self.allow = Some(allow);
        self
    }

    #[inline]
    pub fn msg(self, msg: impl Into<String>) -> HttpError {
        HttpError {
            code: self.code,
            loc: self.loc,
            msg: Some(msg.into()),
            allow: self.allow,
            source: None,
        }
    }
}

pub struct HttpError {
    pub code: StatusCode,
    pub loc: &'static Location<'static>,
    pub msg: Option<String>,
    pub allow: Option<&'static str>,
    pub source: Option<Box<dyn StdError + Sync + Send + 'static>>,
}

impl HttpError {
    #[inline]
    #[track_caller]
    pub fn method_not_allowed() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::METHOD_NOT_ALLOWED)
    }

    #[inline]
    #[track_caller]
    pub fn length_required() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::LENGTH_REQUIRED)
    }

    #[inline]
    #[track_caller]
    pub fn payload_too_large() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::PAYLOAD_TOO_LARGE)
    }

    #[inline]
    #[track_caller]
    pub fn bad_request() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::BAD_REQUEST)
    }

    #[inline]
    #[track_caller]
    pub fn service_unavailable() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::SERVICE_UNAVAILABLE)
    }

    #[inline]
    #[track_caller]
    pub fn internal() -> HttpErrorBuilder {
        HttpErrorBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.code, self.loc)?;

        if let Some(msg) = &self.msg {
            write!(f, ": {msg}")?;
        }

        if let Some(source) = self.source.as_deref() {
            write!(f, " [source: {source}")?;
            for cause in anyhow::Chain::new(source).skip(1) {
                write!(f, ", because {cause}")?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self);

        let body = self.msg.clone().unwrap_or_else(|| self.code.to_string());
        let mut response = (self.code, body).into_response();

        response
            .headers_mut()
            .insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));

        if let Some(allow) = self.allow {
            response
                .headers_mut()
                .insert(axum::http::header::ALLOW, HeaderValue::from_static(allow));
        }

        response
    }
}
