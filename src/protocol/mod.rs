pub mod filters;
pub mod info;
pub mod messages;
pub mod player;
pub mod stats;
pub mod tracks;

pub use filters::Filters;
pub use info::NodeInfo;
pub use messages::{NodeMessage, PlayerEvent, TrackEndReason};
pub use player::{NodePlayer, PlayerState, PlayerUpdate, VoiceState};
pub use stats::NodeStats;
pub use tracks::{LoadResult, LoadType, PlaylistInfo, Track, TrackException, TrackInfo};
