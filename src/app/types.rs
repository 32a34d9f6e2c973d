/// Why the application is shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    /// Quit from the keyboard or another control surface
    UserRequest(String),
    Error(String),
}
