//! # Domain Models
//!
//! Validated identifiers and filter types shared by the gateway, parser and
//! discovery engine.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ItemId`] | Ten-character provider item id |
//! | [`CategoryId`] | Non-zero category node id |
//! | [`RankRange`] | Optional inclusive rank bounds, split into [`Segment`]s |
//! | [`PriceRange`] | Optional inclusive price bounds |
//! | [`Strategy`] | Velocity/balanced/patient discovery strategy |
//! | [`UtcDateTime`] | UTC timestamp with provider-clock conversion |

mod item;
mod range;
mod timestamp;

pub use item::{CategoryId, ItemId};
pub use range::{segment_of, PriceRange, RankRange, Segment, Strategy, SEGMENT_COUNT};
pub use timestamp::{UtcDateTime, PROVIDER_EPOCH_UNIX};
