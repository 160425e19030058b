pub mod export;
pub mod upload;

pub use export::{render_export, ExportFormat};
pub use upload::{run_upload_pipeline, sanitize_filename_stem, UploadOutcome, UploadRequest};
