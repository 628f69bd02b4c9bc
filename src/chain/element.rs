//! # Pipeline stages and dispatch.
//!
//! A pipeline is an ordered list of [`Element`]s. Each element gets the call
//! plus a [`Next`] cursor and decides whether, and how, to hand it on:
//!
//! ```text
//! Chain::request(ctx, req)
//!   └─► e0.request(ctx, req, next=[e1, e2])
//!         └─► next.request ─► e1.request(ctx, req, next=[e2])
//!                               └─► next.request ─► e2.request(ctx, req, next=[])
//!                                                     └─► next.request ─► Ok(req.connection)
//! ```
//!
//! The end of the chain echoes the request's connection for `request` and
//! succeeds for `close`.
//!
//! [`Chain::build`] hands each element a [`ChainRef`], a weak capability to
//! call the whole pipeline again. The healing element uses it to re-issue
//! close/request from its background monitor.

use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::chain::CallContext;
use crate::error::ChainError;
use crate::events::Connection;

/// Connection-establishment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Connection being requested; `connection.id` keys the logical connection.
    pub connection: Connection,
}

impl ServiceRequest {
    /// Wraps a connection.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

/// The request/close contract a whole pipeline offers to its caller.
#[async_trait]
pub trait NetworkServiceClient: Send + Sync + 'static {
    /// Establishes (or refreshes) a connection.
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ServiceRequest,
    ) -> Result<Connection, ChainError>;

    /// Tears a connection down.
    async fn close(&self, ctx: &mut CallContext, conn: Connection) -> Result<(), ChainError>;
}

/// One stage of a pipeline.
///
/// Both methods default to pass-through.
#[async_trait]
pub trait Element: Send + Sync + 'static {
    /// Handles a request; call `next.request` to continue down the chain.
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        next.request(ctx, request).await
    }

    /// Handles a close; call `next.close` to continue down the chain.
    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next<'_>,
    ) -> Result<(), ChainError> {
        next.close(ctx, conn).await
    }
}

/// Cursor over the stages after the current one.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    rest: &'a [Arc<dyn Element>],
}

impl<'a> Next<'a> {
    /// Invokes `request` on the next stage.
    pub async fn request(
        self,
        ctx: &mut CallContext,
        request: ServiceRequest,
    ) -> Result<Connection, ChainError> {
        match self.rest.split_first() {
            Some((head, tail)) => head.request(ctx, request, Next { rest: tail }).await,
            None => Ok(request.connection),
        }
    }

    /// Invokes `close` on the next stage.
    pub async fn close(self, ctx: &mut CallContext, conn: Connection) -> Result<(), ChainError> {
        match self.rest.split_first() {
            Some((head, tail)) => head.close(ctx, conn, Next { rest: tail }).await,
            None => Ok(()),
        }
    }

    /// Number of stages left.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

/// Ordered pipeline of elements.
pub struct Chain {
    elements: Vec<Arc<dyn Element>>,
}

impl Chain {
    /// Pipeline from a fixed list of elements.
    pub fn new(elements: Vec<Arc<dyn Element>>) -> Arc<Self> {
        Arc::new(Self { elements })
    }

    /// Pipeline whose elements may call back into it.
    ///
    /// `make` receives a [`ChainRef`] to the chain being built. It must not be
    /// invoked before `build` returns (it reports `PipelineClosed` until then).
    pub fn build<F>(make: F) -> Arc<Self>
    where
        F: FnOnce(ChainRef) -> Vec<Arc<dyn Element>>,
    {
        Arc::new_cyclic(|weak| Self {
            elements: make(ChainRef {
                inner: weak.clone(),
            }),
        })
    }

    /// Weak capability to this chain.
    pub fn handle(self: &Arc<Self>) -> ChainRef {
        ChainRef {
            inner: Arc::downgrade(self),
        }
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// True if the chain has no stages.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn head(&self) -> Next<'_> {
        Next {
            rest: &self.elements,
        }
    }
}

#[async_trait]
impl NetworkServiceClient for Chain {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ServiceRequest,
    ) -> Result<Connection, ChainError> {
        self.head().request(ctx, request).await
    }

    async fn close(&self, ctx: &mut CallContext, conn: Connection) -> Result<(), ChainError> {
        self.head().close(ctx, conn).await
    }
}

/// Weak handle to a [`Chain`], usable wherever a [`NetworkServiceClient`] is.
#[derive(Clone)]
pub struct ChainRef {
    inner: Weak<Chain>,
}

impl ChainRef {
    fn upgrade(&self) -> Result<Arc<Chain>, ChainError> {
        self.inner.upgrade().ok_or(ChainError::PipelineClosed)
    }
}

#[async_trait]
impl NetworkServiceClient for ChainRef {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ServiceRequest,
    ) -> Result<Connection, ChainError> {
        self.upgrade()?.request(ctx, request).await
    }

    async fn close(&self, ctx: &mut CallContext, conn: Connection) -> Result<(), ChainError> {
        self.upgrade()?.close(ctx, conn).await
    }
}
