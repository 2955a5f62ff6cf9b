use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("player binary not found: {0}")]
    MissingBinary(String),

    #[error("failed to launch player {binary}")]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },
}
