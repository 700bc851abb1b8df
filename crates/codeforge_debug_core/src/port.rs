use tokio::net::TcpListener;

use crate::{OrchestratorError, Result};

/// Ask the OS for a currently unused TCP port.
///
/// The listener is dropped before returning, so another process may grab the
/// port before the container publishes it. The window is short because the
/// launch follows immediately.
pub async fn find_available_port() -> Result<u16> {
    let listener = TcpListener::bind(("0.0.0.0", 0))
        .await
        .map_err(OrchestratorError::PortAllocation)?;
    let port = listener
        .local_addr()
        .map_err(OrchestratorError::PortAllocation)?
        .port();
    drop(listener);

    tracing::debug!("Allocated host port {}", port);
    Ok(port)
}
