use anyhow::Context;
use bytes::Bytes;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ValidationErrors;
use crate::storage::FileStore;

pub const PROFILE_IMAGE_DIR: &str = "profile-images";
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const ALLOWED_EXTENSIONS: [&str; 4] = ["jpeg", "png", "jpg", "gif"];

/// A file part received from the client, not yet checked.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub original_name: String,
    pub body: Bytes,
}

impl ImageUpload {
    /// Lowercased extension of the client-supplied file name.
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.original_name.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// An upload that passed validation; the extension is one of the allowed set.
#[derive(Debug, Clone)]
pub struct ProfileImage {
    extension: String,
    content_type: &'static str,
    body: Bytes,
}

/// Checks type, content and size, recording failures under `profile_image`.
pub fn validate_image(upload: ImageUpload, errors: &mut ValidationErrors) -> Option<ProfileImage> {
    const FIELD: &str = "profile_image";

    let Some(kind) = sniff_image(&upload.body) else {
        errors.add(FIELD, "The profile image field must be an image.");
        return None;
    };
    let extension = upload
        .extension()
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()));
    let Some(extension) = extension else {
        errors.add(
            FIELD,
            "The profile image field must be a file of type: jpeg, png, jpg, gif.",
        );
        return None;
    };
    if upload.body.len() > MAX_IMAGE_BYTES {
        errors.add(
            FIELD,
            "The profile image field must not be greater than 5120 kilobytes.",
        );
        return None;
    }

    Some(ProfileImage {
        extension,
        content_type: kind,
        body: upload.body,
    })
}

/// Identifies JPEG, PNG and GIF payloads by their magic bytes.
fn sniff_image(body: &[u8]) -> Option<&'static str> {
    if body.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if body.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if body.starts_with(b"GIF87a") || body.starts_with(b"GIF89a") {
        Some("image/gif")
    } else {
        None
    }
}

/// `<unix seconds>_<random hex>.<ext>`
pub fn generate_filename(extension: &str) -> String {
    let secs = OffsetDateTime::now_utc().unix_timestamp();
    format!("{}_{}.{}", secs, Uuid::new_v4().simple(), extension)
}

pub fn public_url(app_url: &str, path: &str) -> String {
    format!("{}/storage/{}", app_url.trim_end_matches('/'), path)
}

/// Writes the image under a fresh name and returns its relative path.
pub async fn store_profile_image(files: &dyn FileStore, image: ProfileImage) -> anyhow::Result<String> {
    let path = format!(
        "{}/{}",
        PROFILE_IMAGE_DIR,
        generate_filename(&image.extension)
    );
    files
        .put(&path, image.body, image.content_type)
        .await
        .with_context(|| format!("store profile image {}", path))?;
    Ok(path)
}
