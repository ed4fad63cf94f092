//! Video download workflow.
//!
//! Resolves the video SKU, acquires the master manifest, picks a variant by
//! resolution, streams the segments sequentially into a TS file, and remuxes
//! to MP4 with optional chapter metadata. Per-segment failures are logged
//! and skipped; the remux step decides whether the result is viable.

use std::path::Path;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use nugsd_core::{sanitize_filename, AppConfig, DownloadError, DownloadOptions, ProgressUpdate};

use crate::catalog::ContainerMeta;
use crate::download::{make_dirs, Downloader};
use crate::hls;
use crate::quality::resolve_res;
use crate::session::{Session, USER_AGENT};

/// Progress update cadence while downloading segments.
const SEGMENT_UPDATE_INTERVAL_MS: u128 = 500;

/// Pick the video SKU of a container.
///
/// `productFormatList` is consulted first: an exact `pfType` match on the
/// preferred format wins, then any video-looking entry; entries flagged
/// subscription-stream-only are skipped throughout. Older catalog items
/// carry the SKU in `products` instead, matched by format string.
#[must_use]
pub(crate) fn video_sku_id(meta: &ContainerMeta, preferred_format: i64, job_id: &str) -> i64 {
    for pf in &meta.product_format_list {
        if pf.is_sub_stream_only == 1 {
            continue;
        }
        if pf.pf_type == preferred_format && pf.sku_id != 0 {
            return pf.sku_id;
        }
    }
    for pf in &meta.product_format_list {
        if pf.is_sub_stream_only == 1 {
            continue;
        }
        if pf.sku_id != 0 && pf.format_str.to_lowercase().contains("video") {
            return pf.sku_id;
        }
    }

    for product in &meta.products {
        let format = product.format_str.to_uppercase();
        if product.sku_id != 0
            && (format.contains("LIVE HD VIDEO")
                || format.contains("MP4")
                || format.contains("VIDEO ON DEMAND"))
        {
            return product.sku_id;
        }
    }

    tracing::debug!(job_id, container_id = meta.container_id, "No video SKU found in container");
    0
}

/// Pick the livestream SKU: the product format whose string is exactly
/// `LIVE HD VIDEO`.
#[must_use]
pub(crate) fn livestream_sku(meta: &ContainerMeta) -> i64 {
    meta.product_format_list
        .iter()
        .find(|pf| pf.format_str == "LIVE HD VIDEO")
        .map_or(0, |pf| pf.sku_id)
}

/// Download and remux one video asset.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn process_video(
    dl: &Downloader,
    job_id: &str,
    video_id: &str,
    legacy_uguid: &str,
    opts: DownloadOptions,
    cfg: &AppConfig,
    session: &Session,
    preloaded: Option<ContainerMeta>,
    is_livestream: bool,
) -> Result<(), DownloadError> {
    let meta = match preloaded {
        Some(meta) => meta,
        None => dl.catalog.container_meta(video_id).await?,
    };

    if let Some(artwork) = meta.artwork_url() {
        dl.jobs.update_artwork(job_id, artwork);
    }

    let mut chapters_available = !opts.skip_chapters && !meta.video_chapters.is_empty();

    let sku_id = if is_livestream {
        livestream_sku(&meta)
    } else {
        video_sku_id(&meta, i64::from(cfg.video_format), job_id)
    };
    if sku_id == 0 {
        return Err(DownloadError::download(
            "no suitable video product SKU found in metadata",
        ));
    }

    // Purchased videos go through the legacy player endpoint keyed by uguid;
    // everything else uses the subscription stream-meta endpoint.
    let manifest_url = if legacy_uguid.is_empty() {
        dl.catalog
            .stream_url(meta.container_id, sku_id, 0, &session.stream_params)
            .await?
    } else {
        dl.catalog
            .purchased_manifest_url(sku_id, video_id, &session.user_id, legacy_uguid)
            .await?
    };

    let want_res = resolve_res(cfg.video_format);
    let master = hls::fetch_master(dl.client(), &manifest_url).await?;
    let (variant_uri, res_label) = hls::select_video_variant(&master, want_res)?;
    info!(job_id, resolution = %res_label, "Video variant selected");

    let video_title = meta.display_title();
    info!(job_id, video = %video_title, "Video resolved");
    dl.jobs.update_title(job_id, &video_title);

    let artist_dir = Path::new(cfg.effective_video_out_path()).join(sanitize_filename(&meta.artist_name));
    make_dirs(&artist_dir)?;
    let base_name = format!(
        "{}_{res_label}",
        sanitize_filename(meta.container_info.trim_end())
    );
    let ts_path = artist_dir.join(format!("{base_name}.ts"));
    let mp4_path = artist_dir.join(format!("{base_name}.mp4"));

    if mp4_path.is_file() {
        info!(job_id, file = %mp4_path.display(), "Video already exists locally");
        return Ok(());
    }

    let (base_url, query) = hls::manifest_base(&manifest_url)?;
    let variant_url = format!("{base_url}{variant_uri}{query}");
    let segment_uris = hls::segment_uris(dl.client(), &variant_url, &query).await?;

    if let Err(err) = download_segments(dl, job_id, &ts_path, &base_url, &segment_uris).await {
        let _ = std::fs::remove_file(&ts_path);
        return Err(err);
    }

    // Chapter failures downgrade to a chapterless remux rather than failing
    // the whole job.
    let chapters_path = ts_path.with_extension("ffmeta");
    if chapters_available {
        match dl.remux.duration_secs(&ts_path).await {
            Ok(duration) => {
                if let Err(err) =
                    crate::remux::write_chapters_file(&meta.video_chapters, duration, &chapters_path)
                {
                    warn!(job_id, error = %err, "Failed to write chapter file");
                    chapters_available = false;
                }
            }
            Err(err) => {
                warn!(job_id, error = %err, "Failed to probe video duration for chapters");
                chapters_available = false;
            }
        }
    }

    dl.send_progress(ProgressUpdate::message(job_id, "Remuxing video to MP4..."));
    let chapters_arg = chapters_available.then_some(chapters_path.as_path());
    dl.remux.ts_to_mp4(&ts_path, &mp4_path, chapters_arg).await?;

    info!(job_id, file = %mp4_path.display(), "Video processed successfully");
    Ok(())
}

/// Stream every segment sequentially into the TS file, aggregating byte
/// counts and emitting throttled `Segment i/N` progress.
async fn download_segments(
    dl: &Downloader,
    job_id: &str,
    ts_path: &Path,
    base_url: &str,
    segment_uris: &[String],
) -> Result<(), DownloadError> {
    let seg_total = segment_uris.len();
    let file_name = ts_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut file = tokio::fs::File::create(ts_path)
        .await
        .map_err(|err| DownloadError::filesystem(ts_path.display().to_string(), &err))?;

    info!(job_id, seg_total, "Downloading video segments");
    dl.send_progress(ProgressUpdate {
        job_id: job_id.to_string(),
        message: Some(format!("Downloading {seg_total} video segments...")),
        current_file: Some(file_name.clone()),
        ..ProgressUpdate::default()
    });

    let started = Instant::now();
    let mut total_bytes: i64 = 0;
    let mut last_update: Option<Instant> = None;

    for (i, seg_uri) in segment_uris.iter().enumerate() {
        let seg_num = i + 1;
        let seg_url = format!("{base_url}{seg_uri}");

        let resp = match dl
            .client()
            .get(&seg_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!(job_id, seg_num, error = %err, "Segment request failed, skipping");
                continue;
            }
        };
        if resp.status() != reqwest::StatusCode::OK {
            warn!(job_id, seg_num, status = resp.status().as_u16(), "Bad status for segment, skipping");
            continue;
        }

        let mut stream = resp.bytes_stream();
        let mut failed = false;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if let Err(err) = file.write_all(&chunk).await {
                        return Err(DownloadError::filesystem(ts_path.display().to_string(), &err));
                    }
                    total_bytes += chunk.len() as i64;
                }
                Err(err) => {
                    warn!(job_id, seg_num, error = %err, "Segment read failed mid-stream");
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            continue;
        }

        let now = Instant::now();
        let due = last_update
            .map_or(true, |last| now.duration_since(last).as_millis() >= SEGMENT_UPDATE_INTERVAL_MS);
        if due {
            last_update = Some(now);
            let elapsed_ms = now.duration_since(started).as_millis();
            let speed_bps = if elapsed_ms > 500 && total_bytes > 0 {
                (total_bytes as i128 * 1000 / elapsed_ms as i128) as i64
            } else {
                0
            };
            dl.send_progress(ProgressUpdate {
                job_id: job_id.to_string(),
                percentage: seg_num as f64 / seg_total as f64 * 100.0,
                bytes_downloaded: total_bytes,
                total_bytes: -1,
                speed_bps,
                message: Some(format!("Segment {seg_num}/{seg_total}")),
                current_file: Some(file_name.clone()),
                ..ProgressUpdate::default()
            });
        }
    }

    file.flush()
        .await
        .map_err(|err| DownloadError::filesystem(ts_path.display().to_string(), &err))?;

    dl.send_progress(ProgressUpdate {
        job_id: job_id.to_string(),
        percentage: 100.0,
        message: Some("Segment download complete".to_string()),
        current_file: Some(file_name),
        bytes_downloaded: total_bytes,
        total_bytes,
        ..ProgressUpdate::default()
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Product, ProductFormat};

    fn format_entry(pf_type: i64, format_str: &str, sku_id: i64, stream_only: i64) -> ProductFormat {
        ProductFormat {
            pf_type,
            format_str: format_str.to_string(),
            sku_id,
            is_sub_stream_only: stream_only,
        }
    }

    #[test]
    fn preferred_format_wins_in_product_format_list() {
        let meta = ContainerMeta {
            product_format_list: vec![
                format_entry(2, "SD VIDEO", 10, 0),
                format_entry(3, "HD VIDEO", 20, 0),
            ],
            ..ContainerMeta::default()
        };
        assert_eq!(video_sku_id(&meta, 3, "j1"), 20);
    }

    #[test]
    fn stream_only_entries_are_skipped() {
        let meta = ContainerMeta {
            product_format_list: vec![
                format_entry(3, "HD VIDEO", 20, 1),
                format_entry(2, "SD VIDEO", 10, 0),
            ],
            ..ContainerMeta::default()
        };
        // The preferred pfType 3 entry is stream-only; the fallback scan
        // finds the other video entry.
        assert_eq!(video_sku_id(&meta, 3, "j1"), 10);
    }

    #[test]
    fn products_array_is_the_fallback() {
        let meta = ContainerMeta {
            products: vec![
                Product {
                    format_str: "FLAC".into(),
                    sku_id: 5,
                    is_sub_stream_only: 0,
                },
                Product {
                    format_str: "Video on Demand".into(),
                    sku_id: 42,
                    is_sub_stream_only: 0,
                },
            ],
            ..ContainerMeta::default()
        };
        assert_eq!(video_sku_id(&meta, 3, "j1"), 42);
    }

    #[test]
    fn no_video_sku_yields_zero() {
        let meta = ContainerMeta::default();
        assert_eq!(video_sku_id(&meta, 3, "j1"), 0);
    }

    #[test]
    fn livestream_sku_requires_exact_format_string() {
        let meta = ContainerMeta {
            product_format_list: vec![
                format_entry(1, "LIVE HD VIDEO (trailer)", 7, 0),
                format_entry(2, "LIVE HD VIDEO", 8, 0),
            ],
            ..ContainerMeta::default()
        };
        assert_eq!(livestream_sku(&meta), 8);

        let none = ContainerMeta {
            product_format_list: vec![format_entry(1, "AUDIO", 9, 0)],
            ..ContainerMeta::default()
        };
        assert_eq!(livestream_sku(&none), 0);
    }
}
