//! Adapters for the external collaborators: Redis pub/sub and receipt file storage.

pub mod broadcast;
pub mod storage;

pub use broadcast::Broadcaster;
pub use storage::{ReceiptStorage, UploadedFile};
