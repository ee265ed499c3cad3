pub mod mode;
pub mod moves;
pub mod protocol;
pub mod status;

pub use mode::{GameMode, Score};
pub use moves::{Move, Outcome, Side, resolve};
pub use protocol::{ClientMessage, ServerMessage};
pub use status::SessionStatus;
