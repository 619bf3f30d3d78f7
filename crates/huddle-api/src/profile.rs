use std::path::Path;

use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use huddle_types::api::{DEFAULT_AVATAR, ProfileResponse};

use crate::ApiState;

/// 5 MB limit for avatar uploads
pub const MAX_AVATAR_SIZE: usize = 5 * 1024 * 1024;
const MAX_EXTENSION_LEN: usize = 8;

/// POST /update-profile: multipart form with `displayName` and either a
/// `profilePicture` file or a `profilePictureUrl`. Returns the resulting
/// profile; clients announce it over the socket themselves.
pub async fn update_profile(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, StatusCode> {
    let mut display_name = String::new();
    let mut picture_url: Option<String> = None;
    let mut upload: Option<(Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("Malformed profile form: {}", e);
        StatusCode::BAD_REQUEST
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "displayName" => {
                display_name = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            }
            "profilePictureUrl" => {
                let url = field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                if !url.trim().is_empty() {
                    picture_url = Some(url.trim().to_string());
                }
            }
            "profilePicture" => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                // Browsers send an empty part when no file was chosen
                if !bytes.is_empty() {
                    if bytes.len() > MAX_AVATAR_SIZE {
                        return Err(StatusCode::PAYLOAD_TOO_LARGE);
                    }
                    upload = Some((file_name, bytes.to_vec()));
                }
            }
            _ => {}
        }
    }

    let display_name = display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let profile_picture = match upload {
        Some((file_name, bytes)) => store_avatar(&state, file_name.as_deref(), &bytes).await?,
        None => picture_url.unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
    };

    Ok(Json(ProfileResponse {
        display_name,
        profile_picture,
    }))
}

/// Write an avatar under a fresh name and return the URL it is served from.
async fn store_avatar(
    state: &ApiState,
    file_name: Option<&str>,
    bytes: &[u8],
) -> Result<String, StatusCode> {
    tokio::fs::create_dir_all(&state.upload_dir).await.map_err(|e| {
        error!("Failed to create upload directory: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let stored_name = match file_name.and_then(sanitized_extension) {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    };
    let path = state.upload_dir.join(&stored_name);

    let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
        error!("Failed to create file {}: {}", path.display(), e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    file.write_all(bytes).await.map_err(|e| {
        error!("Failed to write file {}: {}", path.display(), e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    info!("Stored avatar {} ({} bytes)", stored_name, bytes.len());
    Ok(format!("{}/{}", state.uploads_route, stored_name))
}

/// Lowercased alphanumeric extension of a client file name, if it has one.
/// Anything else is dropped so client names never reach the filesystem.
fn sanitized_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > MAX_EXTENSION_LEN || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{Router, body::Body, http::Request, routing::post};
    use tower::ServiceExt;

    use crate::ApiStateInner;

    const BOUNDARY: &str = "huddle-test-boundary";

    struct Part<'a> {
        name: &'a str,
        file_name: Option<&'a str>,
        body: &'a [u8],
    }

    fn form(parts: &[Part]) -> Vec<u8> {
        let mut out = Vec::new();
        for part in parts {
            out.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part.file_name {
                Some(file_name) => out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        part.name, file_name
                    )
                    .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name).as_bytes(),
                ),
            }
            out.extend_from_slice(part.body);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        out
    }

    fn app(upload_dir: &Path) -> Router {
        Router::new()
            .route("/update-profile", post(update_profile))
            .with_state(Arc::new(ApiStateInner::new(upload_dir)))
    }

    async fn submit(upload_dir: &Path, parts: &[Part<'_>]) -> (StatusCode, Option<ProfileResponse>) {
        let request = Request::builder()
            .method("POST")
            .uri("/update-profile")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(form(parts)))
            .unwrap();

        let response = app(upload_dir).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).ok())
    }

    fn temp_upload_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("huddle-uploads-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn url_is_used_when_no_file_is_sent() {
        let dir = temp_upload_dir();
        let (status, profile) = submit(
            &dir,
            &[
                Part { name: "displayName", file_name: None, body: b" Ann " },
                Part { name: "profilePictureUrl", file_name: None, body: b"https://example.com/a.png" },
            ],
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let profile = profile.unwrap();
        assert_eq!(profile.display_name, "Ann");
        assert_eq!(profile.profile_picture, "https://example.com/a.png");
    }

    #[tokio::test]
    async fn default_avatar_without_picture() {
        let dir = temp_upload_dir();
        let (status, profile) = submit(
            &dir,
            &[Part { name: "displayName", file_name: None, body: b"Ann" }],
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile.unwrap().profile_picture, DEFAULT_AVATAR);
    }

    #[tokio::test]
    async fn uploaded_file_is_stored_and_served_from_uploads() {
        let dir = temp_upload_dir();
        let (status, profile) = submit(
            &dir,
            &[
                Part { name: "displayName", file_name: None, body: b"Ann" },
                Part { name: "profilePicture", file_name: Some("../me.PNG"), body: b"not really a png" },
            ],
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let url = profile.unwrap().profile_picture;
        let stored = url.strip_prefix("/uploads/").unwrap();
        assert!(stored.ends_with(".png"));
        assert!(!stored.contains(".."));
        assert_eq!(std::fs::read(dir.join(stored)).unwrap(), b"not really a png");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn blank_display_name_is_bad_request() {
        let dir = temp_upload_dir();
        let (status, _) = submit(
            &dir,
            &[Part { name: "displayName", file_name: None, body: b"   " }],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn extensions_are_sanitized() {
        assert_eq!(sanitized_extension("cat.JPG").as_deref(), Some("jpg"));
        assert_eq!(sanitized_extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(sanitized_extension("noext"), None);
        assert_eq!(sanitized_extension("weird.p/ng"), None);
        assert_eq!(sanitized_extension("x.averyveryverylongext"), None);
    }
}
