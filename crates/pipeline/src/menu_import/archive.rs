//! Portable export archive.
//!
//! Layout:
//!
//! ```text
//! <slug>/manifest.json
//! <slug>/images/dish_001.webp
//! <slug>/images/...
//! ```

use std::io::{Cursor, Write};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::state::DishImage;

pub fn build_archive(slug: &str, manifest_json: &[u8], images: &[DishImage]) -> Result<Vec<u8>, String> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(6));

    let manifest_entry = format!("{slug}/manifest.json");
    writer
        .start_file(manifest_entry.as_str(), options)
        .map_err(|e| format!("failed to add '{manifest_entry}': {e}"))?;
    writer
        .write_all(manifest_json)
        .map_err(|e| format!("failed to write '{manifest_entry}': {e}"))?;

    for image in images {
        let entry = format!("{slug}/images/{}", image.filename);
        writer
            .start_file(entry.as_str(), options)
            .map_err(|e| format!("failed to add '{entry}': {e}"))?;
        writer
            .write_all(&image.bytes)
            .map_err(|e| format!("failed to write '{entry}': {e}"))?;
    }

    let finished = writer
        .finish()
        .map_err(|e| format!("failed to finalize archive: {e}"))?;
    Ok(finished.into_inner())
}
