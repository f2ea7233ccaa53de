//! Playlist requests: index gate, assembly and M3U output

mod assembler;
mod gate;
mod m3u;
mod manager;

pub use assembler::{root_rewrite, PlaylistAssembler};
pub use gate::IndexGate;
pub use manager::PlaylistManager;
