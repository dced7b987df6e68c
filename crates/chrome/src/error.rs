/// Errors raised while allocating ports, launching the renderer, or talking
/// to it over the debugging channel.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    /// No free debugging port in the scan range.
    #[error("Cant find free port")]
    ResourceExhausted,

    /// The renderer process could not be started or died during startup.
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    /// The debugging endpoint never became reachable.
    #[error("Cant connect to browser: {0}")]
    ConnectTimeout(String),

    /// The renderer answered, but not in the state we expect.
    #[error("Unexpected browser state: {0}")]
    UnexpectedState(String),

    /// No response with a matching id arrived in time.
    #[error("Browser method '{method}' timed out")]
    Timeout { method: String },

    /// The channel closed or produced an unreadable frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The renderer answered a command with an error object.
    #[error("Browser method '{method}' failed: {message}")]
    Remote { method: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
