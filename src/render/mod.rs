//! Display rendering for assistant replies and transcript pages.

pub mod normalize;
pub mod page;

pub use normalize::{ResponseNormalizer, render_markdown, strip_reasoning};
pub use page::TranscriptPage;
