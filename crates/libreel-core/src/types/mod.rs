pub mod ids;
pub mod post;

pub use ids::{generate_post_id, generate_report_id};
pub use post::{Author, Block, FeedFilter, Post, Report};

/// Current time in milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
