pub mod archive;
pub mod auth;
pub mod conversion_guard;
pub mod livestream;
pub mod metadata;
pub mod stream;
pub mod tasks;

pub use archive::{archive_file_stem, find_archive, ArchiveConverter, FfmpegArchiveConverter};
pub use auth::{Claims, IdentityAuthorizer, JwtAuthorizer};
pub use conversion_guard::{ConversionGuard, ConversionPermit};
pub use livestream::{LivestreamBackends, LivestreamService};
pub use metadata::{MemoryStreamMetadataStore, StreamMetadataStore};
pub use stream::StreamService;
pub use tasks::BackgroundTasks;
