use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::model::{DocType, EnrollmentRecord, MarksheetAggregate};

const MANIFEST_ENTRY: &str = "manifest.json";
const DOCUMENT_ENTRY: &str = "document.json";
pub const DOCUMENT_FORMAT_V1: &str = "marksheetd-document-v1";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedDocument {
    pub document_id: String,
    pub doc_type: DocType,
    pub location: String,
    pub sha256: String,
    pub generated_at: String,
}

/// Produces downstream documents for verified marksheets.
///
/// Called synchronously; any retry policy belongs to the implementation.
pub trait DocumentGenerationGateway {
    fn generate(
        &self,
        doc_type: DocType,
        aggregate: &MarksheetAggregate,
        enrollment: &EnrollmentRecord,
    ) -> Result<GeneratedDocument, GatewayError>;
}

/// Writes each document as a zip package under a local directory.
#[derive(Debug, Clone)]
pub struct LocalDocumentGateway {
    out_dir: PathBuf,
}

impl LocalDocumentGateway {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

impl DocumentGenerationGateway for LocalDocumentGateway {
    fn generate(
        &self,
        doc_type: DocType,
        aggregate: &MarksheetAggregate,
        enrollment: &EnrollmentRecord,
    ) -> Result<GeneratedDocument, GatewayError> {
        let document_id = Uuid::new_v4().to_string();
        let generated_at = chrono::Utc::now().to_rfc3339();
        let file_name = format!(
            "{}-{}-{}-{}.zip",
            enrollment.enrollment_no,
            file_safe(&aggregate.year),
            doc_type.as_str(),
            &document_id[..8]
        );
        let out_path = self.out_dir.join(file_name);

        let document = json!({
            "documentId": document_id,
            "docType": doc_type,
            "student": {
                "enrollmentNo": enrollment.enrollment_no,
                "name": enrollment.student_name,
                "guardianName": enrollment.guardian_name,
                "dateOfBirth": enrollment.date_of_birth,
                "courseCode": enrollment.course_code,
                "centerCode": enrollment.center_code,
            },
            "marksheet": aggregate,
        });
        let document_bytes =
            serde_json::to_vec_pretty(&document).context("failed to serialize document")?;
        let sha256 = format!("{:x}", Sha256::digest(&document_bytes));

        write_package(&out_path, doc_type, &document_bytes, &sha256, &generated_at)?;

        Ok(GeneratedDocument {
            document_id,
            doc_type,
            location: out_path.to_string_lossy().to_string(),
            sha256,
            generated_at,
        })
    }
}

fn write_package(
    out_path: &Path,
    doc_type: DocType,
    document_bytes: &[u8],
    sha256: &str,
    generated_at: &str,
) -> anyhow::Result<()> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": DOCUMENT_FORMAT_V1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "docType": doc_type,
        "generatedAt": generated_at,
        "documentSha256": sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DOCUMENT_ENTRY, opts)
        .context("failed to start document entry")?;
    zip.write_all(document_bytes)
        .context("failed to write document entry")?;

    zip.finish().context("failed to finalize document package")?;
    Ok(())
}

fn file_safe(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
