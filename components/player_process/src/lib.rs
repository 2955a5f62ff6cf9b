mod error;
mod supervisor;

pub use error::SpawnError;
pub use supervisor::{
    build_player_args, session_socket_path, PlayerProcess, PlayerSpec, TERM_GRACE,
};
