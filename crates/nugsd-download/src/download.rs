//! Downloader orchestrator - top-level per-job logic.
//!
//! One `Downloader` lives for the process. For each job it establishes a
//! session, classifies the URL, and dispatches to the album, playlist,
//! artist, or video handler. Track and segment failures are logged and
//! skipped; anything else surfaces to the worker, which marks the job
//! failed.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use nugsd_core::{
    sanitize_filename, AppConfig, DownloadError, DownloadOptions, Job, ProgressUpdate,
};

use crate::catalog::{CatalogClient, ContainerMeta, TrackMeta};
use crate::hls;
use crate::progress::ProgressCounter;
use crate::quality::{self, Quality, FORMAT_HLS};
use crate::queue::JobStore;
use crate::remux::Remuxer;
use crate::session::{Session, StreamParams, USER_AGENT};
use crate::urls::{classify, UrlKind};
use crate::video;
use crate::worker::JobRunner;

/// Referer required by the download CDN.
const PLAYER_URL: &str = "https://play.nugs.net/";

/// Deadline for resolving catalog short-links.
const REDIRECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Platform IDs probed against the stream-meta endpoint per track.
const PROBE_PLATFORM_IDS: [i64; 4] = [1, 4, 7, 10];

/// Build the shared cookie-bearing HTTP client and the non-following client
/// used for short-link resolution. Both share one cookie jar; the upstream
/// API depends on session cookies set during login.
pub fn build_clients() -> reqwest::Result<(reqwest::Client, reqwest::Client)> {
    let jar = Arc::new(reqwest::cookie::Jar::default());
    let client = reqwest::Client::builder()
        .cookie_provider(Arc::clone(&jar))
        .build()?;
    let redirect_client = reqwest::Client::builder()
        .cookie_provider(jar)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(REDIRECT_TIMEOUT)
        .build()?;
    Ok((client, redirect_client))
}

/// Core logic for fetching and downloading catalog assets.
pub struct Downloader {
    config: Arc<RwLock<AppConfig>>,
    client: reqwest::Client,
    redirect_client: reqwest::Client,
    pub(crate) catalog: CatalogClient,
    pub(crate) remux: Remuxer,
    progress_tx: mpsc::Sender<ProgressUpdate>,
    pub(crate) jobs: Arc<dyn JobStore>,
}

impl Downloader {
    /// Create a downloader wired to the shared config, clients, progress
    /// channel, and job store.
    pub fn new(
        config: Arc<RwLock<AppConfig>>,
        client: reqwest::Client,
        redirect_client: reqwest::Client,
        progress_tx: mpsc::Sender<ProgressUpdate>,
        jobs: Arc<dyn JobStore>,
    ) -> Self {
        let use_ffmpeg_env_var = config.read().unwrap().use_ffmpeg_env_var;
        Self {
            catalog: CatalogClient::new(client.clone()),
            remux: Remuxer::new(use_ffmpeg_env_var),
            config,
            client,
            redirect_client,
            progress_tx,
            jobs,
        }
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Non-blocking send on the progress channel; a full channel drops the
    /// update with a warning.
    pub(crate) fn send_progress(&self, update: ProgressUpdate) {
        if self.progress_tx.try_send(update).is_err() {
            warn!("Progress channel full, discarding update");
        }
    }

    /// Process a single job end to end.
    async fn process_job(&self, job: &Job) -> Result<(), DownloadError> {
        let cfg = self.config.read().unwrap().clone();
        info!(job_id = %job.id, url = %job.original_url, "Starting job");

        let session = Session::establish(&self.client, &cfg).await?;
        let opts = effective_options(job.options, &cfg);

        let Some((id, kind)) = classify(&job.original_url) else {
            error!(job_id = %job.id, url = %job.original_url, "Unsupported URL");
            return Err(DownloadError::unsupported_url(&job.original_url));
        };
        info!(job_id = %job.id, ?kind, id = %id, "URL classified");

        match kind {
            UrlKind::Release => {
                self.process_album(&job.id, &id, opts, &cfg, &session, None).await
            }
            UrlKind::UserPlaylistHash | UrlKind::UserPlaylistLib => {
                self.process_playlist(&job.id, &id, &cfg, &session, false).await
            }
            UrlKind::CatalogShort => {
                let resolved = self.resolve_redirect(&job.original_url).await?;
                match classify(&resolved) {
                    Some((playlist_id, UrlKind::UserPlaylistHash | UrlKind::UserPlaylistLib)) => {
                        info!(job_id = %job.id, playlist_id = %playlist_id, "Processing resolved playlist");
                        self.process_playlist(&job.id, &playlist_id, &cfg, &session, true).await
                    }
                    _ => Err(DownloadError::unsupported_url(format!(
                        "resolved URL {resolved} is not a recognised playlist"
                    ))),
                }
            }
            UrlKind::VideoHash => {
                video::process_video(self, &job.id, &id, "", opts, &cfg, &session, None, false)
                    .await
            }
            UrlKind::Artist => self.process_artist(&job.id, &id, opts, &cfg, &session).await,
            UrlKind::ExclusiveLivestream
            | UrlKind::WatchExclusiveLivestream
            | UrlKind::MyWebcastLib
            | UrlKind::WatchRelease => {
                // The API returns a container whose SKU determines video
                self.process_album(&job.id, &id, opts, &cfg, &session, None).await
            }
            UrlKind::MyWebcastHash => {
                video::process_video(self, &job.id, &id, "", opts, &cfg, &session, None, true)
                    .await
            }
            UrlKind::Purchased => {
                if session.legacy_uguid.is_empty() {
                    return Err(DownloadError::auth(
                        "cannot download purchased item: failed to extract legacy uguid from token",
                    ));
                }
                let show_id = extract_show_id(&job.original_url).ok_or_else(|| {
                    DownloadError::unsupported_url(
                        "could not extract showID from purchased URL query parameters",
                    )
                })?;
                info!(job_id = %job.id, show_id = %show_id, "Processing purchased video item");
                video::process_video(
                    self,
                    &job.id,
                    &show_id,
                    &session.legacy_uguid,
                    opts,
                    &cfg,
                    &session,
                    None,
                    true,
                )
                .await
            }
        }
    }

    /// Download all tracks or the video SKU of an album/show container.
    pub(crate) async fn process_album(
        &self,
        job_id: &str,
        container_id: &str,
        opts: DownloadOptions,
        cfg: &AppConfig,
        session: &Session,
        preloaded: Option<ContainerMeta>,
    ) -> Result<(), DownloadError> {
        let meta = match preloaded {
            Some(meta) => meta,
            None => self.catalog.container_meta(container_id).await?,
        };

        // Content-level dedup: a completed job that resolved to the same
        // container ID means this work is already done.
        if meta.container_id != 0 {
            let cid = meta.container_id.to_string();
            self.jobs.update_container_id(job_id, &cid);
            if let Some(original) = self.jobs.completed_job_with_container_id(&cid) {
                info!(job_id, container_id = %cid, original_job_id = %original,
                    "Duplicate completed content detected");
                return Err(DownloadError::duplicate_completed(cid, original));
            }
        }

        if let Some(artwork) = meta.artwork_url() {
            self.jobs.update_artwork(job_id, artwork);
        }

        let tracks: Vec<TrackMeta> = meta.track_list().to_vec();
        let track_total = tracks.len();
        let video_sku = video::video_sku_id(&meta, i64::from(cfg.video_format), job_id);

        if video_sku == 0 && track_total == 0 {
            error!(job_id, container_id, "Release has no tracks or videos");
            return Err(DownloadError::NoContent {
                container_id: container_id.to_string(),
            });
        }

        if video_sku != 0 {
            if opts.skip_videos {
                info!(job_id, container_id, "Skipping video for container due to options");
            } else if opts.force_video || track_total == 0 || meta.is_video_container() {
                info!(job_id, container_id, video_sku, "Processing video for container");
                return video::process_video(
                    self, job_id, container_id, "", opts, cfg, session, Some(meta), false,
                )
                .await;
            }
            // Video exists but wasn't requested: fall through to the tracks
        }

        let album_folder = meta.display_title();
        info!(job_id, album = %album_folder, "Album resolved");
        self.jobs.update_title(job_id, &album_folder);

        let album_path = Path::new(&cfg.out_path).join(sanitize_filename(&album_folder));
        make_dirs(&album_path)?;

        for (i, track) in tracks.iter().enumerate() {
            let track_num = i + 1;
            if let Err(err) = self
                .process_track(job_id, &album_path, track_num, track_total, track, cfg, &session.stream_params)
                .await
            {
                // Best-effort: keep going with the remaining tracks
                error!(job_id, track_num, song = %track.song_title, error = %err,
                    "Track failed, continuing with remaining tracks");
            }
        }
        Ok(())
    }

    /// Download every container of an artist.
    ///
    /// Processing continues past per-container failures; the first error is
    /// remembered and returned at the end.
    pub(crate) async fn process_artist(
        &self,
        job_id: &str,
        artist_id: &str,
        opts: DownloadOptions,
        cfg: &AppConfig,
        session: &Session,
    ) -> Result<(), DownloadError> {
        let containers = self.catalog.artist_containers(artist_id).await?;
        let item_total = containers.len();
        info!(job_id, artist = %containers[0].artist_name, item_total, "Artist resolved");
        self.jobs.update_title(job_id, &containers[0].artist_name);

        let mut first_err: Option<DownloadError> = None;
        for (i, container) in containers.iter().enumerate() {
            info!(job_id, item = i + 1, item_total, container = %container.container_info,
                "Processing artist item");
            let container_id = container.container_id.to_string();
            if let Err(err) = self
                .process_album(job_id, &container_id, opts, cfg, session, None)
                .await
            {
                error!(job_id, container_id = %container_id, error = %err, "Artist item failed");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Download every track of a playlist.
    pub(crate) async fn process_playlist(
        &self,
        job_id: &str,
        playlist_id: &str,
        cfg: &AppConfig,
        session: &Session,
        is_catalog: bool,
    ) -> Result<(), DownloadError> {
        let meta = self
            .catalog
            .playlist_meta(playlist_id, &cfg.email, &session.legacy_token, is_catalog)
            .await?;
        if meta.items.is_empty() {
            return Err(DownloadError::upstream_decode(
                "get playlist meta",
                format!("playlist {playlist_id} is empty or returned no data"),
            ));
        }

        info!(job_id, playlist = %meta.play_list_name, "Playlist resolved");
        self.jobs.update_title(job_id, &meta.play_list_name);

        let playlist_path = Path::new(&cfg.out_path).join(sanitize_filename(&meta.play_list_name));
        make_dirs(&playlist_path)?;

        let track_total = meta.items.len();
        for (i, item) in meta.items.iter().enumerate() {
            let track_num = i + 1;
            if let Err(err) = self
                .process_track(job_id, &playlist_path, track_num, track_total, &item.track, cfg, &session.stream_params)
                .await
            {
                error!(job_id, track_num, song = %item.track.song_title, error = %err,
                    "Playlist track failed, continuing");
            }
        }
        Ok(())
    }

    /// Resolve stream URLs for one track, pick a quality, and download it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn process_track(
        &self,
        job_id: &str,
        folder: &Path,
        track_num: usize,
        track_total: usize,
        track: &TrackMeta,
        cfg: &AppConfig,
        params: &StreamParams,
    ) -> Result<(), DownloadError> {
        let track_pct = (track_num - 1) as f64 / track_total as f64 * 100.0;

        // Probe the stream-meta endpoint across platform IDs; each hit is
        // classified by URL shape and deduplicated by format code.
        let mut quals: Vec<Quality> = Vec::new();
        for platform_id in PROBE_PLATFORM_IDS {
            let stream_url = match self.catalog.stream_url(track.track_id, 0, platform_id, params).await {
                Ok(url) => url,
                Err(err) => {
                    warn!(job_id, track_id = track.track_id, platform_id, error = %err,
                        "Stream metadata probe failed");
                    continue;
                }
            };
            match quality::query_quality(&stream_url) {
                Some(quality) if !quals.iter().any(|q| q.format == quality.format) => {
                    quals.push(quality);
                }
                Some(_) => {}
                None => warn!(job_id, url = %stream_url, "Unsupported quality format from stream URL"),
            }
        }

        if quals.is_empty() {
            error!(job_id, track_id = track.track_id, song = %track.song_title,
                "No valid stream URLs found for track");
            return Err(DownloadError::download("no valid stream URLs found for track"));
        }

        if quality::is_hls_only(&quals) {
            info!(job_id, track_id = track.track_id, "Track is HLS-only, only AAC is available");
            let master_url = quals
                .iter()
                .find(|q| q.format == FORMAT_HLS)
                .map(|q| q.url.clone())
                .ok_or_else(|| {
                    DownloadError::download("could not find master playlist URL for HLS track")
                })?;

            let track_fname = track_filename(track_num, &track.song_title, ".m4a");
            let track_path = folder.join(&track_fname);
            self.send_progress(ProgressUpdate {
                job_id: job_id.to_string(),
                message: Some(format!("Downloading HLS track {track_num}/{track_total}")),
                current_file: Some(track_fname),
                percentage: track_pct,
                current_track: track_num as u32,
                total_tracks: track_total as u32,
                ..ProgressUpdate::default()
            });
            return self.download_hls_audio(job_id, &track_path, &master_url).await;
        }

        let chosen = quality::choose_quality(&quals, cfg.format).ok_or_else(|| {
            DownloadError::download("could not determine a suitable download quality")
        })?;

        let track_fname = track_filename(track_num, &track.song_title, chosen.extension);
        let track_path = folder.join(&track_fname);
        if track_path.is_file() {
            info!(job_id, track_num, track_total, file = %track_fname, "Track already exists, skipping");
            return Ok(());
        }

        info!(job_id, track_num, track_total, song = %track.song_title, specs = %chosen.specs,
            "Downloading track");
        self.send_progress(ProgressUpdate {
            job_id: job_id.to_string(),
            message: Some(format!("Downloading track {track_num}/{track_total}")),
            current_file: Some(track_fname.clone()),
            percentage: track_pct,
            current_track: track_num as u32,
            total_tracks: track_total as u32,
            ..ProgressUpdate::default()
        });

        if let Err(err) = self.download_file(job_id, &track_path, &chosen.url).await {
            error!(job_id, file = %track_fname, error = %err, "Download failed, removing partial file");
            let _ = std::fs::remove_file(&track_path);
            return Err(err);
        }

        self.send_progress(ProgressUpdate {
            job_id: job_id.to_string(),
            message: Some(format!("Finished track {track_num}/{track_total}")),
            current_file: Some(track_fname),
            percentage: track_num as f64 / track_total as f64 * 100.0,
            current_track: track_num as u32,
            total_tracks: track_total as u32,
            ..ProgressUpdate::default()
        });
        Ok(())
    }

    /// Full pipeline for an HLS-only audio track: pick the top variant,
    /// fetch key material, download and decrypt the single segment, then
    /// extract the AAC stream into the final path.
    async fn download_hls_audio(
        &self,
        job_id: &str,
        track_path: &Path,
        master_url: &str,
    ) -> Result<(), DownloadError> {
        let (media_url, specs) = hls::resolve_audio_media_url(&self.client, master_url).await?;
        info!(job_id, specs = %specs, "Selected HLS variant");

        self.send_progress(ProgressUpdate {
            job_id: job_id.to_string(),
            message: Some("Starting HLS download...".to_string()),
            current_file: track_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            ..ProgressUpdate::default()
        });

        let media = hls::parse_audio_media(&self.client, &media_url).await?;
        let key = hls::fetch_key(&self.client, &media.key_url).await?;

        let temp_path = track_path.with_extension("enc.ts");
        self.send_progress(ProgressUpdate::message(job_id, "Downloading HLS segment..."));
        self.download_file(job_id, &temp_path, &media.segment_url).await?;

        let encrypted = std::fs::read(&temp_path)
            .map_err(|err| DownloadError::filesystem(temp_path.display().to_string(), &err))?;
        let _ = std::fs::remove_file(&temp_path);

        let decrypted = hls::decrypt_segment(&encrypted, &key, &media.iv)?;

        self.send_progress(ProgressUpdate::message(job_id, "Remuxing HLS segment..."));
        self.remux.ts_to_aac(&decrypted, track_path).await?;

        self.send_progress(ProgressUpdate {
            job_id: job_id.to_string(),
            message: Some("HLS track processed successfully.".to_string()),
            percentage: 100.0,
            ..ProgressUpdate::default()
        });
        Ok(())
    }

    /// Stream a response body to a file, reporting progress through the
    /// counter. Accepts 200 and 206; Content-Length drives the percentage
    /// and its absence makes progress indeterminate.
    pub(crate) async fn download_file(
        &self,
        job_id: &str,
        file_path: &Path,
        download_url: &str,
    ) -> Result<(), DownloadError> {
        self.send_progress(ProgressUpdate {
            job_id: job_id.to_string(),
            message: Some("Starting download...".to_string()),
            current_file: file_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            ..ProgressUpdate::default()
        });

        let resp = self
            .client
            .get(download_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::REFERER, PLAYER_URL)
            .header(reqwest::header::RANGE, "bytes=0-")
            .send()
            .await
            .map_err(|err| DownloadError::download(format!("failed to start download: {err}")))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::download(format!(
                "bad status code {status} downloading {download_url}"
            )));
        }

        let total = resp.content_length().map_or(-1, |len| len as i64);
        if total < 0 {
            warn!(job_id, url = download_url, "No Content-Length header, progress will be indeterminate");
        }

        let mut file = tokio::fs::File::create(file_path)
            .await
            .map_err(|err| DownloadError::filesystem(file_path.display().to_string(), &err))?;

        let mut counter = ProgressCounter::new(job_id, total, self.progress_tx.clone());
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|err| DownloadError::download(format!("failed during copy: {err}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|err| DownloadError::filesystem(file_path.display().to_string(), &err))?;
            counter.add(chunk.len());
        }
        file.flush()
            .await
            .map_err(|err| DownloadError::filesystem(file_path.display().to_string(), &err))?;

        self.send_progress(counter.final_update());
        Ok(())
    }

    /// Follow one redirect of a short-link and return the target URL.
    async fn resolve_redirect(&self, short_url: &str) -> Result<String, DownloadError> {
        let resp = self
            .redirect_client
            .get(short_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|err| {
                DownloadError::download(format!("failed to resolve short URL {short_url}: {err}"))
            })?;

        if !resp.status().is_redirection() {
            return Err(DownloadError::download(format!(
                "expected redirect for short URL {short_url}, got HTTP {}",
                resp.status().as_u16()
            )));
        }
        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                DownloadError::download(format!(
                    "no Location header in redirect response for {short_url}"
                ))
            })?;
        info!(from = short_url, to = location, "Resolved short URL");
        Ok(location.to_string())
    }
}

#[async_trait]
impl JobRunner for Downloader {
    async fn run(&self, job: &Job) -> Result<(), DownloadError> {
        self.process_job(job).await
    }
}

/// Merge per-job options with the config-wide policy flags.
#[must_use]
pub(crate) fn effective_options(job_opts: DownloadOptions, cfg: &AppConfig) -> DownloadOptions {
    DownloadOptions {
        force_video: job_opts.force_video || cfg.force_video,
        skip_videos: job_opts.skip_videos || cfg.skip_videos,
        skip_chapters: job_opts.skip_chapters || cfg.skip_chapters,
    }
}

/// `NN. <sanitised title><ext>`.
#[must_use]
pub(crate) fn track_filename(track_num: usize, title: &str, extension: &str) -> String {
    format!("{track_num:02}. {}{extension}", sanitize_filename(title))
}

/// Pull the `showID` query parameter out of a purchased-item URL.
#[must_use]
pub(crate) fn extract_show_id(raw_url: &str) -> Option<String> {
    let parsed = url::Url::parse(raw_url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "showID")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

pub(crate) fn make_dirs(path: &Path) -> Result<(), DownloadError> {
    std::fs::create_dir_all(path)
        .map_err(|err| DownloadError::filesystem(path.display().to_string(), &err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_options_or_config_flags() {
        let cfg = AppConfig {
            skip_videos: true,
            ..AppConfig::default()
        };
        let merged = effective_options(
            DownloadOptions {
                force_video: true,
                ..DownloadOptions::default()
            },
            &cfg,
        );
        assert!(merged.force_video);
        assert!(merged.skip_videos);
        assert!(!merged.skip_chapters);
    }

    #[test]
    fn track_filename_zero_pads_and_sanitizes() {
        assert_eq!(track_filename(3, "Jam > Reprise", ".flac"), "03. Jam _ Reprise.flac");
        assert_eq!(
            track_filename(12, "What/Ever: Pt. 2?", ".m4a"),
            "12. What_Ever_ Pt. 2_.m4a"
        );
    }

    #[test]
    fn show_id_extracted_from_purchased_url() {
        let url = "https://www.nugs.net/on/demandware.store/Sites-NugsNet-Site/default/Stash-QueueVideo?showID=23329&skuID=12";
        assert_eq!(extract_show_id(url).as_deref(), Some("23329"));

        let no_show = "https://www.nugs.net/on/demandware.store/Sites-NugsNet-Site/default/Stash-QueueVideo?skuID=12";
        assert!(extract_show_id(no_show).is_none());
    }
}
