//! Provisioning error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerialError {
    #[error("Serial port error: {0}")]
    Port(#[from] serialport::Error),
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Device answered with HTTP status {0}")]
    Status(u16),
    #[error(transparent)]
    Serial(#[from] SerialError),
    #[error("Provisioning task aborted: {0}")]
    Task(String),
}
