//! Shared reqwest client construction.
//!
//! Both the catalog fetcher and the aria2 RPC client go through
//! [`build_http_client`] so proxy handling stays identical.

use std::panic::{AssertUnwindSafe, catch_unwind};

use reqwest::{Client, ClientBuilder, Proxy};
use thiserror::Error;
use tracing::warn;

/// Failure to construct an HTTP client.
#[derive(Debug, Error)]
pub enum HttpClientError {
    /// Both the default and the env-proxy builders panicked.
    #[error("HTTP client construction for {purpose} panicked while reading proxy settings")]
    Panicked {
        /// Which component requested the client.
        purpose: String,
    },

    /// The builder rejected its configuration.
    #[error("HTTP client construction for {purpose} failed: {source}")]
    Build {
        /// Which component requested the client.
        purpose: String,
        /// Underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

/// Builds a client from `configure`, retrying with env-only proxy lookup if
/// system proxy discovery panics (seen in sandboxed macOS environments).
///
/// # Errors
///
/// Returns [`HttpClientError`] when neither builder produces a client.
pub fn build_http_client<F>(purpose: &str, configure: F) -> Result<Client, HttpClientError>
where
    F: Fn(ClientBuilder) -> ClientBuilder,
{
    match try_build(&configure, false) {
        Ok(client) => Ok(client),
        Err(BuildFailure::Panic) => {
            warn!(
                purpose,
                "HTTP client hit system proxy panic; using env-proxy fallback builder"
            );
            try_build(&configure, true).map_err(|failure| failure.into_error(purpose))
        }
        Err(failure) => Err(failure.into_error(purpose)),
    }
}

enum BuildFailure {
    Panic,
    Build(reqwest::Error),
}

impl BuildFailure {
    fn into_error(self, purpose: &str) -> HttpClientError {
        match self {
            Self::Panic => HttpClientError::Panicked {
                purpose: purpose.to_string(),
            },
            Self::Build(source) => HttpClientError::Build {
                purpose: purpose.to_string(),
                source,
            },
        }
    }
}

fn try_build<F>(configure: &F, disable_system_proxy_lookup: bool) -> Result<Client, BuildFailure>
where
    F: Fn(ClientBuilder) -> ClientBuilder,
{
    catch_unwind(AssertUnwindSafe(|| {
        let mut builder = configure(Client::builder());
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildFailure::Build)
    }))
    .map_err(|_| BuildFailure::Panic)?
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = first_env_var(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"])
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = first_env_var(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"])
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn first_env_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
