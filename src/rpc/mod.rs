// Request/response surface that lets many processes share the one modem.
pub mod client;
pub mod protocol;
pub mod server;
