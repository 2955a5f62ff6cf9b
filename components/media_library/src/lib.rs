mod library;
mod transfer;

pub use library::{LibraryError, MediaFile, MediaLibrary};
pub use transfer::{TransferError, TransferJob, TRANSFER_CHUNK_SIZE};
