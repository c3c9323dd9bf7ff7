use std::collections::HashSet;
use std::io::{Cursor, Write};

use bytes::Bytes;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::ExportError;
use crate::models::Concept;

pub const ARCHIVE_NAME: &str = "Amigurumi_Concepts.zip";
const UNTITLED_FOLDER: &str = "untitled_concept";
const METADATA_FILE: &str = "info.json";

pub struct ConceptArchive {
    pub filename: &'static str,
    pub bytes: Bytes,
}

/// Keeps letters, digits, whitespace, `-` and `_`, turns each whitespace run
/// into one `_` and lowercases the result.
pub fn sanitize_folder_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_space = false;
    for ch in name.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch.to_ascii_lowercase());
            in_space = false;
        }
    }
    out
}

/// Hands out folder names unique within one export, suffixing `_1`, `_2`, …
/// in first-seen order.
#[derive(Default)]
struct FolderNames {
    used: HashSet<String>,
}

impl FolderNames {
    fn claim(&mut self, concept_name: &str) -> String {
        let mut base = sanitize_folder_name(concept_name);
        if base.is_empty() {
            base = UNTITLED_FOLDER.to_string();
        }
        let mut candidate = base.clone();
        let mut suffix = 0;
        while self.used.contains(&candidate) {
            suffix += 1;
            candidate = format!("{base}_{suffix}");
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

fn add_image(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    folder: &str,
    concept: &Concept,
    options: SimpleFileOptions,
) -> Result<bool, ExportError> {
    let Some(image) = &concept.image_url else {
        return Ok(false);
    };
    let bytes = image
        .decode()
        .map_err(|e| ExportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    zip.start_file(format!("{folder}/image.{}", image.extension()), options)?;
    zip.write_all(&bytes)?;
    Ok(true)
}

/// Packs every concept into its own folder: the decoded image when there is
/// one, and always an `info.json` with the concept's text fields.
pub fn export_concepts(concepts: &[Concept]) -> Result<ConceptArchive, ExportError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut folders = FolderNames::default();
    let mut images = 0;

    for concept in concepts {
        let folder = folders.claim(&concept.details.name);
        zip.add_directory(folder.as_str(), options)?;

        match add_image(&mut zip, &folder, concept, options) {
            Ok(true) => images += 1,
            Ok(false) => {}
            Err(e) => warn!("⚠️ Could not add image for concept \"{}\": {}", concept.details.name, e),
        }

        let metadata = serde_json::to_vec_pretty(&concept.details)?;
        zip.start_file(format!("{folder}/{METADATA_FILE}"), options)?;
        zip.write_all(&metadata)?;
    }

    let cursor = zip.finish()?;
    let bytes = Bytes::from(cursor.into_inner());
    info!("📦 Archive built: {} concepts, {} images, {} bytes", concepts.len(), images, bytes.len());
    Ok(ConceptArchive { filename: ARCHIVE_NAME, bytes })
}
