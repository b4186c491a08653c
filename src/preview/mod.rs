/// Preview thumbnails
///
/// A background worker generates one JPEG per video into `.data/previews/`
/// and reports progress to the UI through a channel.
pub mod bridge;
pub mod cache;
pub mod extractor;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod pipeline;

pub use bridge::{PreviewBridge, PreviewReady, PreviewState};
pub use cache::{artifact_path, ensure, load_thumbnail, EnsureOutcome};
pub use extractor::{detect, CommandExtractor, PreviewError, ThumbnailExtractor, UnavailableExtractor};
pub use pipeline::{PreviewEvent, PreviewItem, PreviewPipeline};
