//! Request pipeline integration.
//!
//! [`TenantContextLayer`] wraps an HTTP service so each request is resolved
//! to a tenant, runs inside that tenant's context, and always leaves it
//! again. The active context is process-wide, so the manager admits one
//! request at a time; others wait. A request whose future is dropped still
//! exits before the next one is admitted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Request;
use tower::{Layer, Service};
use tracing::debug;

use crate::error::{ContextError, ResolutionError};
use crate::manager::TenantContextManager;
use crate::resolver::TenantResolver;

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Errors from [`TenantContextService`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError<E> {
    #[error("request carries no host")]
    MissingHost,
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("inner service failed: {0}")]
    Inner(E),
}

/// Host a request was addressed to: the `Host` header, else the URI authority.
#[must_use]
pub fn request_host<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host())
}

// ---------------------------------------------------------------------------
// TenantContextLayer
// ---------------------------------------------------------------------------

/// Tower layer that runs each request inside its tenant's context.
#[derive(Debug, Clone)]
pub struct TenantContextLayer {
    manager: Arc<TenantContextManager>,
    resolver: Arc<TenantResolver>,
}

impl TenantContextLayer {
    #[must_use]
    pub fn new(manager: Arc<TenantContextManager>, resolver: Arc<TenantResolver>) -> Self {
        Self { manager, resolver }
    }
}

impl<S> Layer<S> for TenantContextLayer {
    type Service = TenantContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TenantContextService {
            inner,
            manager: Arc::clone(&self.manager),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

// ---------------------------------------------------------------------------
// TenantContextService
// ---------------------------------------------------------------------------

/// Service wrapper that enters the request's tenant context around `inner`.
///
/// The [`TenantResourceContext`](switchyard_core::TenantResourceContext) is
/// inserted into the request extensions before `inner` is called.
#[derive(Debug, Clone)]
pub struct TenantContextService<S> {
    inner: S,
    manager: Arc<TenantContextManager>,
    resolver: Arc<TenantResolver>,
}

impl<S, B> Service<Request<B>> for TenantContextService<S>
where
    S: Service<Request<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = PipelineError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(PipelineError::Inner)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        // The ready service goes into the future; keep a fresh clone.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let resolved = request_host(&req).map(|host| {
            let query_override = self.resolver.override_from_query(req.uri().query());
            self.resolver.resolve(host, query_override.as_deref())
        });
        let manager = Arc::clone(&self.manager);

        Box::pin(async move {
            let tenant = match resolved {
                Some(Ok(tenant)) => tenant,
                Some(Err(e)) => {
                    debug!(error = %e, "request rejected before tenant context");
                    return Err(PipelineError::Resolution(e));
                }
                None => {
                    debug!("request rejected before tenant context: no host");
                    return Err(PipelineError::MissingHost);
                }
            };

            let response = manager
                .scoped(tenant, move |context| {
                    req.extensions_mut().insert(context);
                    inner.call(req)
                })
                .await?;
            response.map_err(PipelineError::Inner)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
