//! Completed-job archive endpoint.
//!
//! Packages the audio files a completed job produced into a zip. Audio is
//! already compressed, so entries are stored rather than deflated.

use std::io::{Cursor, Read, Write};
use std::path::{Path as FsPath, PathBuf};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tracing::info;
use zip::write::SimpleFileOptions;

use nugsd_core::{sanitize_filename, JobStatus};

use crate::error::HttpError;
use crate::state::AppState;

/// `GET /api/download/{id}` - streaming zip of a completed job's files.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, HttpError> {
    let job = state
        .queue
        .job(&id)
        .ok_or_else(|| HttpError::NotFound(format!("job {id} not found")))?;
    if job.status != JobStatus::Complete {
        return Err(HttpError::NotFound(format!("job {id} is not complete")));
    }
    let title = job
        .title
        .ok_or_else(|| HttpError::NotFound(format!("job {id} has no resolved title")))?;

    let out_path = state.config.read().unwrap().out_path.clone();
    let folder = PathBuf::from(out_path).join(sanitize_filename(&title));
    if !folder.is_dir() {
        return Err(HttpError::NotFound(format!(
            "no downloaded files found for job {id}"
        )));
    }

    // Zip assembly is blocking file I/O; keep it off the async runtime.
    let archive = tokio::task::spawn_blocking(move || build_zip(&folder))
        .await
        .map_err(|err| HttpError::Internal(err.to_string()))?
        .map_err(|err| HttpError::Internal(format!("failed to build archive: {err}")))?;

    info!(job_id = %id, bytes = archive.len(), "Serving job archive");
    let disposition = format!("attachment; filename=\"{}.zip\"", sanitize_filename(&title));
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(archive),
    )
        .into_response())
}

/// Zip every regular file directly inside `folder`.
fn build_zip(folder: &FsPath) -> std::io::Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    let mut entries: Vec<_> = std::fs::read_dir(folder)?
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .collect();
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        writer.start_file(name, options)?;
        let mut file = std::fs::File::open(entry.path())?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        writer.write_all(&buf)?;
    }

    let cursor = writer
        .finish()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_zip_packages_only_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("01. Jam.flac"), b"flacdata").unwrap();
        std::fs::write(dir.path().join("02. Encore.flac"), b"moredata").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let bytes = build_zip(dir.path()).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["01. Jam.flac", "02. Encore.flac"]);

        let mut content = String::new();
        archive
            .by_name("01. Jam.flac")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "flacdata");
    }
}
