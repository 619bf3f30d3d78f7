pub mod pages;
pub mod profile;

use std::path::PathBuf;
use std::sync::Arc;

pub type ApiState = Arc<ApiStateInner>;

pub struct ApiStateInner {
    /// Where uploaded avatars are written
    pub upload_dir: PathBuf,
    /// URL prefix the upload dir is served under
    pub uploads_route: String,
}

impl ApiStateInner {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            uploads_route: "/uploads".into(),
        }
    }
}
