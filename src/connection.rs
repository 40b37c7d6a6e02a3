//! Resource connection abstraction
//!
//! This module defines the [`Connection`] trait the connection pool
//! manages. The actual wire transport (stdio pipes, streamable HTTP,
//! SSE) is a collaborator outside this crate: implementations accept a
//! target URL plus a header map (including the `Authorization` header
//! produced by the auth manager) and hand back a connected, closable
//! handle.
//!
//! The close/error seam is a [`CancellationToken`]: implementations
//! cancel it when the underlying connection closes or fails, and the
//! pool watches it to drop the corresponding entry.

use tokio_util::sync::CancellationToken;

/// A live, closable connection to a resource server.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to
/// share across tasks.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use mcplink::connection::Connection;
///
/// #[derive(Debug)]
/// struct LoopbackConnection {
///     closed: CancellationToken,
/// }
///
/// #[async_trait]
/// impl Connection for LoopbackConnection {
///     fn closed(&self) -> CancellationToken {
///         self.closed.clone()
///     }
///
///     async fn close(&self) {
///         self.closed.cancel();
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait Connection: Send + Sync + std::fmt::Debug {
    /// Returns a token that is cancelled when the connection has closed
    /// or failed, whether through [`close`](Self::close) or an
    /// underlying transport error.
    fn closed(&self) -> CancellationToken;

    /// Closes the connection and releases its resources. Implementations
    /// must also cancel the [`closed`](Self::closed) token. Closing an
    /// already closed connection is a no-op.
    async fn close(&self);
}
