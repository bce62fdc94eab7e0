use image::ImageFormat;
use reqwest::Client;
use std::io::Cursor;
use std::time::Duration;

use crate::models::batch::BatchRequest;

/// Detail images are cut into slices of at most this height before being
/// sent to the provider.
const SPLIT_HEIGHT: u32 = 1600;

/// Per-download bound; a dead image host must not stall the whole batch.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// One in-memory image attached to an inspection request.
#[derive(Debug, Clone)]
pub struct ImagePart {
    pub file_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// Downloads and prepares the images referenced by a queued request.
pub struct ImageService {
    http: Client,
    base_url: String,
}

impl ImageService {
    pub fn new(base_url: String) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// Assemble every image the inspector should see for one request:
    /// the representative images (paths relative to the image host) plus
    /// the detail images (absolute URLs), the latter split into slices.
    /// GIF content is excluded — the provider rejects it.
    pub async fn collect_parts(&self, request: &BatchRequest) -> Vec<ImagePart> {
        let mut parts = Vec::new();

        if !request.representative_file.trim().is_empty() {
            let urls: Vec<String> = request
                .representative_file
                .split(',')
                .map(|path| format!("{}{}", self.base_url, path.trim().replace(' ', "%20")))
                .collect();

            for part in self.download_all(&urls).await {
                if is_gif(&part) {
                    tracing::warn!(file = %part.file_name, "GIF excluded from inspection");
                    continue;
                }
                parts.push(part);
            }
        }

        if !request.image_html.trim().is_empty() {
            let urls: Vec<String> = request
                .image_html
                .split(',')
                .map(|url| url.trim().to_string())
                .collect();

            let downloaded = self.download_all(&urls).await;
            for part in split_images(downloaded, SPLIT_HEIGHT) {
                if is_gif(&part) {
                    tracing::warn!(file = %part.file_name, "GIF excluded from inspection");
                    continue;
                }
                parts.push(part);
            }
        }

        parts
    }

    /// Download each URL; individual failures are logged and skipped so one
    /// broken link does not sink the request.
    async fn download_all(&self, urls: &[String]) -> Vec<ImagePart> {
        let mut parts = Vec::new();
        for url in urls {
            if url.is_empty() {
                continue;
            }
            match self.download(url).await {
                Ok(part) => parts.push(part),
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Image download failed, skipping");
                }
            }
        }
        parts
    }

    async fn download(&self, url: &str) -> Result<ImagePart, reqwest::Error> {
        let response = self
            .http
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .header("User-Agent", "Mozilla/5.0")
            .header("Accept", "image/avif,image/webp,image/apng,image/*,*/*;q=0.8")
            .send()
            .await?
            .error_for_status()?;

        let file_name = file_name_from_url(url);
        let mime_type = guess_mime(&file_name).to_string();
        let content = response.bytes().await?.to_vec();

        Ok(ImagePart {
            file_name,
            mime_type,
            content,
        })
    }
}

fn is_gif(part: &ImagePart) -> bool {
    part.mime_type.to_lowercase().contains("image/gif")
}

/// Last path segment of a URL, query string removed.
fn file_name_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("image")
        .to_string()
}

fn guess_mime(file_name: &str) -> &'static str {
    let lower = file_name.to_lowercase();
    match lower.rsplit('.').next() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("avif") => "image/avif",
        _ => "application/octet-stream",
    }
}

/// Cut each image into slices at most `target_height` pixels tall.
/// Slices re-encode as PNG; images that fail to decode are skipped.
fn split_images(parts: Vec<ImagePart>, target_height: u32) -> Vec<ImagePart> {
    let mut result = Vec::new();

    for part in parts {
        let decoded = match image::load_from_memory(&part.content) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!(file = %part.file_name, error = %e, "Undecodable image skipped");
                continue;
            }
        };

        let width = decoded.width();
        let height = decoded.height();
        let base_name = part
            .file_name
            .rsplit_once('.')
            .map(|(base, _)| base.to_string())
            .unwrap_or_else(|| part.file_name.clone());

        if height <= target_height {
            if let Some(encoded) = encode_png(&decoded, &part.file_name) {
                result.push(ImagePart {
                    file_name: part.file_name,
                    mime_type: "image/png".to_string(),
                    content: encoded,
                });
            }
            continue;
        }

        let slices = height.div_ceil(target_height);
        for index in 0..slices {
            let y = index * target_height;
            let slice_height = target_height.min(height - y);
            let slice = decoded.crop_imm(0, y, width, slice_height);

            if let Some(encoded) = encode_png(&slice, &part.file_name) {
                result.push(ImagePart {
                    file_name: format!("{}_part{:03}.png", base_name, index + 1),
                    mime_type: "image/png".to_string(),
                    content: encoded,
                });
            }
        }
    }

    result
}

fn encode_png(img: &image::DynamicImage, file_name: &str) -> Option<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    match img.write_to(&mut buffer, ImageFormat::Png) {
        Ok(()) => Some(buffer.into_inner()),
        Err(e) => {
            tracing::warn!(file = %file_name, error = %e, "Image re-encode failed, skipping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png_part(name: &str, width: u32, height: u32) -> ImagePart {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        ImagePart {
            file_name: name.to_string(),
            mime_type: "image/png".to_string(),
            content: buffer.into_inner(),
        }
    }

    #[test]
    fn short_images_pass_through_as_single_part() {
        let parts = split_images(vec![png_part("detail.png", 100, 1200)], SPLIT_HEIGHT);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].file_name, "detail.png");
    }

    #[test]
    fn tall_images_are_cut_into_height_bounded_slices() {
        let parts = split_images(vec![png_part("detail.png", 80, 4000)], SPLIT_HEIGHT);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].file_name, "detail_part001.png");
        assert_eq!(parts[2].file_name, "detail_part003.png");

        let last = image::load_from_memory(&parts[2].content).unwrap();
        assert_eq!(last.height(), 800);
    }

    #[test]
    fn undecodable_images_are_dropped() {
        let broken = ImagePart {
            file_name: "broken.png".to_string(),
            mime_type: "image/png".to_string(),
            content: vec![0, 1, 2, 3],
        };
        let parts = split_images(vec![broken], SPLIT_HEIGHT);
        assert!(parts.is_empty());
    }

    #[test]
    fn mime_is_guessed_from_the_file_extension() {
        assert_eq!(guess_mime("a.JPG"), "image/jpeg");
        assert_eq!(guess_mime("b.webp"), "image/webp");
        assert_eq!(guess_mime("noext"), "application/octet-stream");
    }

    #[test]
    fn url_file_name_drops_query_parameters() {
        assert_eq!(
            file_name_from_url("https://img.example.com/goods/783/a_h.jpg?v=3"),
            "a_h.jpg"
        );
        assert_eq!(file_name_from_url("https://img.example.com/"), "image");
    }
}
