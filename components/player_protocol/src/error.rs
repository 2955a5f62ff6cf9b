use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed player message: {0}")]
    Malformed(String),
}
