use dbt_backend::CodeRegionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("code region: {0}")]
    Region(#[from] CodeRegionError),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),
}
