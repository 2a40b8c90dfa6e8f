use std::io::Cursor;

use image::ImageFormat;
use image::codecs::jpeg::JpegEncoder;

use crate::error::ImageError;
use crate::models::ImageResource;
use crate::services::api::RemoteSource;

/// Re-encoding quality for lossy formats.
const JPEG_QUALITY: u8 = 70;

/// Container mime type for an image file name, by extension. Anything not
/// recognized is treated as JPEG, the site's dominant format.
pub fn mime_for(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Fetch and re-encode one image resource. Called only at serialization
/// time; normalization never downloads bytes. A malformed URL returns empty
/// bytes (the caller silently skips the image); everything else maps onto
/// the recoverable [`ImageError`] taxonomy.
pub async fn fetch_image<S: RemoteSource>(
    source: &S,
    resource: &ImageResource,
) -> Result<Vec<u8>, ImageError> {
    if reqwest::Url::parse(&resource.url).is_err() {
        tracing::debug!(url = %resource.url, "not a valid image url");
        return Ok(Vec::new());
    }

    let (status, body) = source
        .fetch_bytes(&resource.url)
        .await
        .map_err(|e| ImageError::Transport {
            detail: e.to_string(),
        })?;

    match status {
        200 => reencode(&body, &resource.extension),
        404 => Err(ImageError::NotFound {
            url: resource.url.clone(),
        }),
        other => Err(ImageError::Fetch {
            status: other,
            url: resource.url.clone(),
        }),
    }
}

/// Decode the remote bytes and re-encode them into the resource's target
/// format. `jpg` is normalized to the canonical `jpeg` encoder name.
pub fn reencode(bytes: &[u8], extension: &str) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory(bytes).map_err(|e| {
        tracing::debug!(error = %e, "undecodable image");
        ImageError::Corrupt
    })?;

    let extension = if extension.eq_ignore_ascii_case("jpg") {
        "jpeg"
    } else {
        extension
    };
    let format = ImageFormat::from_extension(extension).ok_or(ImageError::Corrupt)?;

    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
            img.write_with_encoder(encoder)
                .map_err(|_| ImageError::Corrupt)?;
        }
        _ => img
            .write_to(&mut out, format)
            .map_err(|_| ImageError::Corrupt)?,
    }
    Ok(out.into_inner())
}
