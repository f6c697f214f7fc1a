use serving_kernel::{DriverError, ServingError};
use serving_plane::{BootstrapError, ConfigError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Serving(#[from] ServingError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
