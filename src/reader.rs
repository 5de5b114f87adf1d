//! Reading sessions and locally persisted reading positions.

mod position;
mod session;

pub use position::{PositionStore, clamp_position, position_key, scroll_fraction};
pub use session::{ReaderView, ReadingSession, load_session};
