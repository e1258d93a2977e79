// Everything that touches the modem serial port lives here. Only the executor
// worker thread ever holds a `SerialTransport`; everyone else talks to it
// through an `ExecutorHandle`.
pub mod executor;
pub mod gnss;
pub mod port;
pub mod service;
pub mod session;
pub mod status;
pub mod transport;

#[cfg(test)]
pub mod testing;
