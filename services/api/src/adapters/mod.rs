pub mod blob_fs;
pub mod db;
pub mod http_fetch;
pub mod local_file;
pub mod pdf;

pub use blob_fs::FilesystemBlobStore;
pub use db::DbAdapter;
pub use http_fetch::HttpDocumentFetcher;
pub use local_file::JsonFileStorage;
pub use pdf::PdfiumRasterizer;
