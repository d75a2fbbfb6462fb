//! Pluggable consumer for decoded messages.

/// Receives every fully decoded message from a connection.
///
/// Called from the connection's read loop, so messages arrive in receive
/// order for that connection. Implementations should return quickly; a
/// slow handler stalls further reads on the same connection (but no other).
pub trait Handler<M>: Send + Sync + 'static {
    /// Consume one decoded message.
    fn handle(&self, message: M);
}

impl<M, F> Handler<M> for F
where
    F: Fn(M) + Send + Sync + 'static,
{
    fn handle(&self, message: M) {
        self(message)
    }
}
