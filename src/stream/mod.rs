//! Motion-JPEG streaming: per-frame rendering, the chunk iterator and the
//! broadcast hub that feeds HTTP viewers.

mod hub;
mod multipart;
mod producer;

pub use hub::{Chunk, StreamHub, Subscription, DEFAULT_SUBSCRIBER_CAPACITY};
pub use multipart::{frame_part, BOUNDARY, CONTENT_TYPE};
pub use producer::{FramePipeline, FrameStream};
