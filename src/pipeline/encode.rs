//! Image encoding: PNG page file → base64 `ImageData`.
//!
//! The rasterizer already wrote lossless PNGs, so the bytes are sent as-is;
//! re-encoding through `image` would only cost time. `detail: "high"` asks
//! OpenAI-style providers for the full tile budget, without which the small
//! print of tariff tables is lost.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::Path;
use tracing::debug;

/// Read a page image and wrap it for a multimodal request.
pub async fn encode_page_file(path: &Path) -> std::io::Result<ImageData> {
    let bytes = tokio::fs::read(path).await?;
    Ok(encode_png_bytes(&bytes))
}

/// Base64-wrap PNG bytes.
pub fn encode_png_bytes(bytes: &[u8]) -> ImageData {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded image → {} bytes base64", b64.len());
    ImageData::new(b64, "image/png").with_detail("high")
}
