//! Catalog metadata client.
//!
//! Issues parameterised GETs against the stream API for container, playlist,
//! artist, stream, and purchased-video metadata. The upstream returns
//! occasionally polymorphic fields (`coverImage` may be a string or absent,
//! `videoChapters` is a heterogeneous array); those are modeled as
//! `serde_json::Value` with explicit accessors, never shape coercion.

use serde::Deserialize;
use tracing::debug;

use nugsd_core::DownloadError;

use crate::session::StreamParams;

/// Base URL for the metadata APIs.
const STREAM_API_BASE: &str = "https://streamapi.nugs.net/";

/// User agent used by playlist, purchased, and stream-meta calls.
const USER_AGENT_TWO: &str = "nugsnetAndroid";

/// Developer key required by the secure (user playlist) API path.
const DEV_KEY: &str = "x7f54tgbdyc64y656thy47er4";

/// API page size for artist container listings.
const ARTIST_PAGE_LIMIT: usize = 100;

/// A purchasable format of a container.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Product {
    pub format_str: String,
    #[serde(rename = "skuID")]
    pub sku_id: i64,
    pub is_sub_stream_only: i64,
}

/// A product format entry, used mainly by livestream containers.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductFormat {
    pub pf_type: i64,
    pub format_str: String,
    #[serde(rename = "skuID")]
    pub sku_id: i64,
    pub is_sub_stream_only: i64,
}

/// A single audio track.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackMeta {
    #[serde(rename = "trackID")]
    pub track_id: i64,
    #[serde(rename = "songID")]
    pub song_id: i64,
    pub song_title: String,
    pub track_num: i64,
    pub disc_num: i64,
}

/// Image details used by artwork fields.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageInfo {
    pub url: String,
}

/// Metadata for a container (album, show, webcast, video release).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerMeta {
    #[serde(rename = "containerID")]
    pub container_id: i64,
    pub container_info: String,
    pub artist_name: String,
    pub container_type_str: String,
    pub tracks: Vec<TrackMeta>,
    pub songs: Vec<TrackMeta>,
    pub products: Vec<Product>,
    pub product_format_list: Vec<ProductFormat>,
    /// Heterogeneous chapter objects; consumed by the remux driver.
    pub video_chapters: Vec<serde_json::Value>,
    pub vod_player_image: String,
    /// May be a string, null, or missing entirely.
    pub cover_image: Option<serde_json::Value>,
    pub img: ImageInfo,
    pub pics: Vec<ImageInfo>,
}

impl ContainerMeta {
    /// Artwork URL by priority: `vodPlayerImage`, `coverImage` when it is a
    /// string, `img.url`, `pics[0].url`.
    #[must_use]
    pub fn artwork_url(&self) -> Option<&str> {
        if !self.vod_player_image.is_empty() {
            return Some(&self.vod_player_image);
        }
        if let Some(serde_json::Value::String(url)) = &self.cover_image {
            if !url.is_empty() {
                return Some(url);
            }
        }
        if !self.img.url.is_empty() {
            return Some(&self.img.url);
        }
        self.pics.first().filter(|p| !p.url.is_empty()).map(|p| p.url.as_str())
    }

    /// The track list; the API populates `tracks` or `songs` inconsistently.
    #[must_use]
    pub fn track_list(&self) -> &[TrackMeta] {
        if self.tracks.is_empty() {
            &self.songs
        } else {
            &self.tracks
        }
    }

    /// Container types that are inherently video content.
    #[must_use]
    pub fn is_video_container(&self) -> bool {
        matches!(self.container_type_str.as_str(), "Video" | "Bundle" | "Show")
    }

    /// Folder/title base: `<artist> - <containerInfo>`, right-trimmed.
    #[must_use]
    pub fn display_title(&self) -> String {
        format!("{} - {}", self.artist_name, self.container_info.trim_end())
    }
}

#[derive(Debug, Deserialize)]
struct AlbumMeta {
    #[serde(rename = "Response")]
    response: Option<ContainerMeta>,
}

/// One playlist entry.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PlaylistItem {
    pub track: TrackMeta,
}

/// Playlist metadata.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaylistMeta {
    pub play_list_name: String,
    pub items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct PlaylistEnvelope {
    #[serde(rename = "Response")]
    response: Option<PlaylistMeta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArtistPage {
    containers: Vec<ContainerMeta>,
}

#[derive(Debug, Deserialize)]
struct ArtistEnvelope {
    #[serde(rename = "Response")]
    response: Option<ArtistPage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StreamMeta {
    stream_link: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PurchasedManifest {
    #[serde(rename = "fileURL")]
    file_url: String,
    response_code: i64,
}

/// Client for the catalog metadata endpoints.
#[derive(Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
}

impl CatalogClient {
    /// Create a client sharing the process-wide cookie-bearing HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        user_agent: &str,
        context: &'static str,
    ) -> Result<T, DownloadError> {
        let url = format!("{STREAM_API_BASE}{path}");
        debug!(context, url = %url, "Catalog request");
        let resp = self
            .client
            .get(&url)
            .query(query)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|err| DownloadError::upstream_decode(context, err.to_string()))?;

        if !resp.status().is_success() {
            return Err(DownloadError::upstream_status(context, resp.status().as_u16()));
        }
        resp.json()
            .await
            .map_err(|err| DownloadError::upstream_decode(context, err.to_string()))
    }

    /// Fetch metadata for a container ID.
    pub async fn container_meta(&self, container_id: &str) -> Result<ContainerMeta, DownloadError> {
        let meta: AlbumMeta = self
            .get_json(
                "api.aspx",
                &[
                    ("method", "catalog.container"),
                    ("containerID", container_id),
                    ("vdisp", "1"),
                ],
                crate::session::USER_AGENT,
                "get album meta",
            )
            .await?;
        meta.response.ok_or_else(|| {
            DownloadError::upstream_decode(
                "get album meta",
                format!("API returned empty response for container {container_id}"),
            )
        })
    }

    /// Fetch metadata for a playlist.
    ///
    /// Catalog playlists use the public API path; user playlists go through
    /// the secure path and need the account email, the developer key, and
    /// the legacy token.
    pub async fn playlist_meta(
        &self,
        playlist_id: &str,
        email: &str,
        legacy_token: &str,
        is_catalog: bool,
    ) -> Result<PlaylistMeta, DownloadError> {
        let envelope: PlaylistEnvelope = if is_catalog {
            self.get_json(
                "api.aspx",
                &[("method", "catalog.playlist"), ("plGUID", playlist_id)],
                USER_AGENT_TWO,
                "get playlist meta",
            )
            .await?
        } else {
            self.get_json(
                "secureApi.aspx",
                &[
                    ("method", "user.playlist"),
                    ("playlistID", playlist_id),
                    ("developerKey", DEV_KEY),
                    ("user", email),
                    ("token", legacy_token),
                ],
                USER_AGENT_TWO,
                "get playlist meta",
            )
            .await?
        };
        envelope.response.ok_or_else(|| {
            DownloadError::upstream_decode(
                "get playlist meta",
                format!("playlist {playlist_id} is empty or returned no data"),
            )
        })
    }

    /// Fetch every container for an artist, paging until an empty page.
    pub async fn artist_containers(
        &self,
        artist_id: &str,
    ) -> Result<Vec<ContainerMeta>, DownloadError> {
        let mut all = Vec::new();
        let mut offset = 1usize;
        let limit = ARTIST_PAGE_LIMIT.to_string();

        loop {
            let offset_str = offset.to_string();
            let envelope: ArtistEnvelope = self
                .get_json(
                    "api.aspx",
                    &[
                        ("method", "catalog.containersAll"),
                        ("limit", limit.as_str()),
                        ("artistList", artist_id),
                        ("availType", "1"),
                        ("vdisp", "1"),
                        ("startOffset", offset_str.as_str()),
                    ],
                    crate::session::USER_AGENT,
                    "get artist meta",
                )
                .await?;

            let Some(page) = envelope.response else {
                if offset == 1 {
                    return Err(DownloadError::upstream_decode(
                        "get artist meta",
                        "artist API returned no response data",
                    ));
                }
                break;
            };
            if page.containers.is_empty() {
                break;
            }
            offset += page.containers.len();
            all.extend(page.containers);
        }

        if all.is_empty() {
            return Err(DownloadError::upstream_decode(
                "get artist meta",
                format!("no containers found for artist {artist_id}"),
            ));
        }
        Ok(all)
    }

    /// Resolve a stream URL for an audio track (`format` > 0, platform ID)
    /// or a video container (`format` = 0, SKU + container ID).
    pub async fn stream_url(
        &self,
        track_or_container_id: i64,
        sku_id: i64,
        format: i64,
        params: &StreamParams,
    ) -> Result<String, DownloadError> {
        let id = track_or_container_id.to_string();
        let sku = sku_id.to_string();
        let fmt = format.to_string();

        let mut query: Vec<(&str, &str)> = Vec::with_capacity(9);
        if format == 0 {
            query.push(("skuId", sku.as_str()));
            query.push(("containerID", id.as_str()));
            query.push(("chap", "1"));
        } else {
            query.push(("platformID", fmt.as_str()));
            query.push(("trackID", id.as_str()));
        }
        query.push(("app", "1"));
        query.push(("subscriptionID", params.subscription_id.as_str()));
        query.push(("subCostplanIDAccessList", params.plan_id.as_str()));
        query.push(("nn_userID", params.user_id.as_str()));
        query.push(("startDateStamp", params.start_stamp.as_str()));
        query.push(("endDateStamp", params.end_stamp.as_str()));

        let meta: StreamMeta = self
            .get_json("bigriver/subPlayer.aspx", &query, USER_AGENT_TWO, "get stream meta")
            .await?;
        if meta.stream_link.is_empty() {
            return Err(DownloadError::upstream_decode(
                "get stream meta",
                "stream metadata API returned an empty stream link",
            ));
        }
        Ok(meta.stream_link)
    }

    /// Resolve the manifest URL for a purchased video.
    pub async fn purchased_manifest_url(
        &self,
        sku_id: i64,
        show_id: &str,
        user_id: &str,
        uguid: &str,
    ) -> Result<String, DownloadError> {
        let sku = sku_id.to_string();
        let meta: PurchasedManifest = self
            .get_json(
                "bigriver/vidPlayer.aspx",
                &[
                    ("skuId", sku.as_str()),
                    ("showId", show_id),
                    ("uguid", uguid),
                    ("nn_userID", user_id),
                    ("app", "1"),
                ],
                USER_AGENT_TWO,
                "get purchased manifest",
            )
            .await?;
        if meta.response_code != 0 || meta.file_url.is_empty() {
            return Err(DownloadError::upstream_decode(
                "get purchased manifest",
                format!("purchased manifest API reported an error (code {})", meta.response_code),
            ));
        }
        Ok(meta.file_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_meta_parses_upstream_field_names() {
        let meta: AlbumMeta = serde_json::from_str(
            r#"{
                "methodName": "catalog.container",
                "Response": {
                    "containerID": 98765,
                    "containerInfo": "2024/07/04 Folsom Field ",
                    "artistName": "Phish",
                    "containerTypeStr": "Show",
                    "tracks": [
                        {"trackID": 1, "songTitle": "Jam", "trackNum": 1},
                        {"trackID": 2, "songTitle": "Encore", "trackNum": 2}
                    ],
                    "productFormatList": [
                        {"pfType": 2, "formatStr": "LIVE HD VIDEO", "skuID": 77, "isSubStreamOnly": 0}
                    ],
                    "vodPlayerImage": "",
                    "coverImage": "https://img.example/cover.jpg",
                    "img": {"url": "https://img.example/small.jpg"},
                    "pics": []
                }
            }"#,
        )
        .unwrap();

        let meta = meta.response.unwrap();
        assert_eq!(meta.container_id, 98765);
        assert_eq!(meta.track_list().len(), 2);
        assert_eq!(meta.track_list()[0].track_id, 1);
        assert!(meta.is_video_container());
        assert_eq!(meta.display_title(), "Phish - 2024/07/04 Folsom Field");
        assert_eq!(meta.product_format_list[0].sku_id, 77);
    }

    #[test]
    fn artwork_priority_chain() {
        let mut meta = ContainerMeta {
            vod_player_image: "https://img/vod.jpg".into(),
            cover_image: Some(serde_json::Value::String("https://img/cover.jpg".into())),
            img: ImageInfo { url: "https://img/img.jpg".into() },
            pics: vec![ImageInfo { url: "https://img/pic0.jpg".into() }],
            ..ContainerMeta::default()
        };
        assert_eq!(meta.artwork_url(), Some("https://img/vod.jpg"));

        meta.vod_player_image.clear();
        assert_eq!(meta.artwork_url(), Some("https://img/cover.jpg"));

        // Non-string coverImage is ignored, not coerced
        meta.cover_image = Some(serde_json::json!({"unexpected": true}));
        assert_eq!(meta.artwork_url(), Some("https://img/img.jpg"));

        meta.img.url.clear();
        assert_eq!(meta.artwork_url(), Some("https://img/pic0.jpg"));

        meta.pics.clear();
        assert_eq!(meta.artwork_url(), None);
    }

    #[test]
    fn track_list_falls_back_to_songs() {
        let meta = ContainerMeta {
            songs: vec![TrackMeta { track_id: 9, ..TrackMeta::default() }],
            ..ContainerMeta::default()
        };
        assert_eq!(meta.track_list()[0].track_id, 9);
    }

    #[test]
    fn playlist_envelope_parses() {
        let envelope: PlaylistEnvelope = serde_json::from_str(
            r#"{
                "methodName": "user.playlist",
                "Response": {
                    "playListName": "Road Trip",
                    "items": [
                        {"ID": 1, "track": {"trackID": 11, "songTitle": "Opener"}},
                        {"ID": 2, "track": {"trackID": 12, "songTitle": "Closer"}}
                    ]
                }
            }"#,
        )
        .unwrap();
        let playlist = envelope.response.unwrap();
        assert_eq!(playlist.play_list_name, "Road Trip");
        assert_eq!(playlist.items.len(), 2);
        assert_eq!(playlist.items[1].track.track_id, 12);
    }

    #[test]
    fn purchased_manifest_error_code_detected() {
        let manifest: PurchasedManifest =
            serde_json::from_str(r#"{"fileURL": "", "responseCode": 4}"#).unwrap();
        assert_eq!(manifest.response_code, 4);
        assert!(manifest.file_url.is_empty());
    }
}
