//! External muxer driver.
//!
//! Three FFmpeg invocations, all stream-copy: a duration probe that reads
//! stderr (FFmpeg exits 1 when given only an input), TS→MP4 remux with
//! optional chapter metadata, and a piped TS→AAC extract for decrypted HLS
//! audio segments.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use nugsd_core::DownloadError;

/// Duration line in FFmpeg's stderr banner.
static DURATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration: ([\d:.]+)").unwrap());

/// Drives the external muxer binary.
#[derive(Clone, Debug)]
pub struct Remuxer {
    command: PathBuf,
}

impl Remuxer {
    /// Resolve the muxer command per the configured discovery preference:
    /// PATH lookup, or the binary next to the executable.
    #[must_use]
    pub fn new(use_env_var: bool) -> Self {
        let command = if use_env_var {
            PathBuf::from("ffmpeg")
        } else {
            match std::env::current_exe() {
                Ok(exe) => exe.with_file_name("ffmpeg"),
                Err(err) => {
                    warn!(error = %err, "Cannot locate executable directory, using ffmpeg from PATH");
                    PathBuf::from("ffmpeg")
                }
            }
        };
        Self { command }
    }

    /// Probe a TS file's duration in whole seconds.
    ///
    /// FFmpeg is invoked with only an input; the expected outcome is exit
    /// status 1 with the duration in stderr. Any other non-zero status is a
    /// mux failure.
    pub async fn duration_secs(&self, ts_path: &Path) -> Result<u32, DownloadError> {
        let output = tokio::process::Command::new(&self.command)
            .arg("-hide_banner")
            .arg("-i")
            .arg(ts_path)
            .stderr(Stdio::piped())
            .stdout(Stdio::null())
            .output()
            .await
            .map_err(|err| DownloadError::mux(format!("failed to run muxer: {err}")))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        match output.status.code() {
            Some(0 | 1) => {}
            status => {
                return Err(DownloadError::mux(format!(
                    "duration probe exited with {status:?}: {stderr}"
                )))
            }
        }
        if !stderr.contains("At least one output file must be specified") {
            warn!(ts = %ts_path.display(), "Unexpected muxer output during duration probe");
        }

        let dur = extract_duration(&stderr).ok_or_else(|| {
            DownloadError::mux(format!("could not extract duration from muxer output: {stderr}"))
        })?;
        parse_duration(dur)
    }

    /// Remux a TS file into an MP4 container, optionally embedding chapter
    /// metadata. Deletes the TS (and chapter file) on success and the
    /// half-written MP4 on failure.
    pub async fn ts_to_mp4(
        &self,
        ts_path: &Path,
        mp4_path: &Path,
        chapters_path: Option<&Path>,
    ) -> Result<(), DownloadError> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg("-hide_banner").arg("-i").arg(ts_path);
        if let Some(chapters) = chapters_path {
            cmd.arg("-f").arg("ffmetadata").arg("-i").arg(chapters);
            cmd.arg("-map_metadata").arg("1");
        }
        cmd.arg("-c").arg("copy").arg("-y").arg(mp4_path);
        cmd.stderr(Stdio::piped()).stdout(Stdio::null());

        info!(ts = %ts_path.display(), mp4 = %mp4_path.display(), "Remuxing video to MP4");
        let output = cmd
            .output()
            .await
            .map_err(|err| DownloadError::mux(format!("failed to run muxer: {err}")))?;

        if !output.status.success() {
            let _ = std::fs::remove_file(mp4_path);
            return Err(DownloadError::mux(format!(
                "remux failed ({:?}): {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        if let Err(err) = std::fs::remove_file(ts_path) {
            warn!(file = %ts_path.display(), error = %err, "Failed to delete TS file after remux");
        }
        if let Some(chapters) = chapters_path {
            if let Err(err) = std::fs::remove_file(chapters) {
                warn!(file = %chapters.display(), error = %err, "Failed to delete chapter file after remux");
            }
        }
        Ok(())
    }

    /// Losslessly extract the AAC stream from decrypted TS bytes, piped
    /// through stdin.
    pub async fn ts_to_aac(&self, ts_data: &[u8], out_path: &Path) -> Result<(), DownloadError> {
        info!(out = %out_path.display(), "Remuxing TS to AAC container");
        let mut child = tokio::process::Command::new(&self.command)
            .arg("-i")
            .arg("pipe:0")
            .arg("-c:a")
            .arg("copy")
            .arg("-vn")
            .arg("-y")
            .arg(out_path)
            .stdin(Stdio::piped())
            .stderr(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|err| DownloadError::mux(format!("failed to run muxer: {err}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DownloadError::mux("muxer stdin unavailable"))?;
        stdin
            .write_all(ts_data)
            .await
            .map_err(|err| DownloadError::mux(format!("failed to pipe TS data: {err}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| DownloadError::mux(format!("failed waiting for muxer: {err}")))?;
        if !output.status.success() {
            return Err(DownloadError::mux(format!(
                "AAC remux failed ({:?}): {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}

/// Pull the duration string out of FFmpeg stderr.
#[must_use]
pub fn extract_duration(stderr: &str) -> Option<&str> {
    DURATION_REGEX
        .captures(stderr)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Convert `HH:MM:SS.cc` to whole seconds, rounded.
pub fn parse_duration(dur: &str) -> Result<u32, DownloadError> {
    let bad = || DownloadError::mux(format!("failed to parse duration string '{dur}'"));

    let mut parts = dur.splitn(3, ':');
    let (Some(h), Some(m), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(bad());
    };
    let (s, frac) = rest.split_once('.').unwrap_or((rest, "0"));

    let h: u64 = h.parse().map_err(|_| bad())?;
    let m: u64 = m.parse().map_err(|_| bad())?;
    let s: u64 = s.parse().map_err(|_| bad())?;
    let frac_ms: f64 = frac.parse().map_err(|_| bad())?;

    let total = (h * 3600 + m * 60 + s) as f64 + frac_ms / 1000.0;
    Ok(total.round() as u32)
}

/// Write FFMETADATA chapter markers for a video.
///
/// Each chapter runs from its rounded start to one second before the next
/// chapter's rounded start, clamped to `[start, duration]`; the last chapter
/// ends at the video duration. Entries missing `chapterSeconds` or
/// `chaptername` are skipped.
pub fn write_chapters_file(
    chapters: &[serde_json::Value],
    duration_secs: u32,
    out_path: &Path,
) -> Result<(), DownloadError> {
    use std::fmt::Write as _;

    let mut body = String::from(";FFMETADATA1\n");
    for (idx, chapter) in chapters.iter().enumerate() {
        let (Some(start), Some(name)) = (
            chapter.get("chapterSeconds").and_then(serde_json::Value::as_f64),
            chapter.get("chaptername").and_then(serde_json::Value::as_str),
        ) else {
            warn!(chapter_index = idx, "Skipping chapter with missing fields");
            continue;
        };

        let start_rounded = start.round() as i64;
        let mut end = i64::from(duration_secs);
        if let Some(next_start) = chapters
            .get(idx + 1)
            .and_then(|next| next.get("chapterSeconds"))
            .and_then(serde_json::Value::as_f64)
            .filter(|next| *next > start)
        {
            end = next_start.round() as i64 - 1;
        }
        let end = end.max(start_rounded).min(i64::from(duration_secs));

        write!(
            body,
            "\n[CHAPTER]\nTIMEBASE=1/1\nSTART={start_rounded}\nEND={end}\nTITLE={name}\n"
        )
        .expect("write to string");
    }

    std::fs::write(out_path, body)
        .map_err(|err| DownloadError::filesystem(out_path.display().to_string(), &err))?;
    info!(file = %out_path.display(), "Chapter metadata file created");
    Ok(())
}
