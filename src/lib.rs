pub mod error;
pub mod number;
pub mod header;
pub mod io_stream;
pub mod record;
pub mod volume;
pub mod explorer;
pub mod writer;
pub mod archive;

pub use error::{PackError, Result};
pub use header::{CatalogPointer, HeaderSet, HeaderType};
pub use record::{CatalogEntry, EntryKind};
pub use volume::{FsProvider, MemoryProvider, MemoryVolume, Volume, VolumeProvider};
pub use explorer::{ArchiveExplorer, ExplorerVisitor};
pub use writer::{ArchiveWriter, Content, WriterOptions, WriterProvider, WrittenArchive};
pub use archive::Archive;
