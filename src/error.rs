use tch::TchError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid activate function: {0:?} (expected \"sigmoid\" or \"tanh\")")]
    InvalidActivation(String),
    #[error("image size {size} is not divisible by {divisor}")]
    SizeNotDivisible { size: i64, divisor: i64 },
    #[error("batch size must be positive, got {0}")]
    InvalidBatchSize(i64),
    #[error("dataset of {len} images cannot fill one batch of {batch_size}")]
    DatasetTooSmall { len: i64, batch_size: i64 },
    #[error(transparent)]
    Tch(#[from] TchError),
}
