pub mod archive;
pub mod attestor;
pub mod registry;

pub use archive::ArchiveStorage;
pub use archive::MIN_ARCHIVE_PAYLOAD;
pub use attestor::Attestor;
pub use registry::Registry;
