//! Pure reducers over [`RoomState`]: night resolution, voting resolution,
//! victory checks, and phase advancement. No I/O and no suspension; callers
//! commit the mutated state through the room store.
//!
//! [`RoomState`]: crate::types::RoomState

mod night;
mod phase;
mod victory;
mod voting;

pub use night::{resolve_night, NightSummary};
pub use phase::{
    accrue_afk_strikes, advance_phase, night_complete, voting_complete, PhaseChange,
    DAY_ANNOUNCEMENT_MS,
};
pub use victory::{apply_victory, check_victory};
pub use voting::{resolve_voting, tally, VotingSummary};
