use std::env;

/// Path of the `AF_UNIX` socket the supervisor listens on when `UNIX_SOCKET` isn't set.
pub const DEFAULT_SOCKET_FILE: &str = "unix.socket";

#[derive(Debug, Clone)]
pub struct Settings {
    pub socket_path: String,
}

impl Settings {
    pub fn from_env() -> Self {
        let socket_path =
            env::var("UNIX_SOCKET").unwrap_or_else(|_| DEFAULT_SOCKET_FILE.to_string());
        Self { socket_path }
    }
}
