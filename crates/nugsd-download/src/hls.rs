//! HLS engine: playlist parsing, key handling, and segment decryption.
//!
//! Audio tracks that only stream over HLS consist of a single AES-128-CBC
//! encrypted MPEG-TS segment; video assets are plain sequential segments.
//! The upstream signs child URIs through the manifest's query string, so the
//! original query is preserved and appended to every child URI.

use std::sync::LazyLock;

use aes::cipher::{block_padding::NoPadding, BlockModeDecrypt, KeyIvInit};
use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist};
use regex::Regex;
use tracing::warn;

use nugsd_core::DownloadError;

use crate::quality::{format_res, res_fallback};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// AES-128 block and key size.
const BLOCK_SIZE: usize = 16;

/// Bitrate embedded in HLS variant filenames, e.g. `..._256k_v4.m3u8`.
static BITRATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w]+(?:_(\d+)k_v\d+)").unwrap());

/// Key material and segment location for a single-segment audio stream.
#[derive(Clone, Debug)]
pub struct AudioMedia {
    /// Absolute URL of the AES-128 key.
    pub key_url: String,
    /// Declared initialisation vector.
    pub iv: [u8; BLOCK_SIZE],
    /// Absolute URL of the encrypted segment.
    pub segment_url: String,
}

/// Split a manifest URL into its directory base and its query string.
///
/// The base is scheme + host + path up to the last slash; the query keeps
/// its leading `?` so it can be appended to child URIs directly.
pub fn manifest_base(manifest_url: &str) -> Result<(String, String), DownloadError> {
    let parsed = url::Url::parse(manifest_url)
        .map_err(|err| DownloadError::download(format!("failed to parse manifest URL: {err}")))?;
    let path = parsed.path();
    let Some(last_slash) = path.rfind('/') else {
        return Err(DownloadError::download(format!(
            "could not find path separator in manifest URL {manifest_url}"
        )));
    };
    let host = parsed
        .host_str()
        .ok_or_else(|| DownloadError::download(format!("manifest URL {manifest_url} has no host")))?;
    let base = format!("{}://{}{}", parsed.scheme(), host, &path[..=last_slash]);
    let query = format!("?{}", parsed.query().unwrap_or(""));
    Ok((base, query))
}

/// Extract the bitrate number from an HLS variant URI, if present.
#[must_use]
pub fn extract_bitrate(variant_uri: &str) -> Option<&str> {
    BITRATE_REGEX
        .captures(variant_uri)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Fetch and parse a playlist.
pub async fn fetch_playlist(
    client: &reqwest::Client,
    url: &str,
) -> Result<Playlist, DownloadError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|err| DownloadError::download(format!("failed to GET playlist {url}: {err}")))?;
    if !resp.status().is_success() {
        return Err(DownloadError::download(format!(
            "bad status for playlist {url}: HTTP {}",
            resp.status().as_u16()
        )));
    }
    let body = resp
        .bytes()
        .await
        .map_err(|err| DownloadError::download(format!("failed to read playlist {url}: {err}")))?;
    m3u8_rs::parse_playlist_res(&body)
        .map_err(|err| DownloadError::download(format!("failed to decode playlist {url}: {err:?}")))
}

/// Fetch a playlist that must be a master manifest.
pub async fn fetch_master(
    client: &reqwest::Client,
    url: &str,
) -> Result<MasterPlaylist, DownloadError> {
    match fetch_playlist(client, url).await? {
        Playlist::MasterPlaylist(master) => Ok(master),
        Playlist::MediaPlaylist(_) => Err(DownloadError::download(format!(
            "expected HLS master playlist but got media playlist for {url}"
        ))),
    }
}

/// Pick the top-bandwidth variant of an audio master playlist.
///
/// Returns the variant URI and a specs string (`"<N> Kbps AAC"`, or the
/// unknown-bitrate fallback when neither the filename nor the bandwidth
/// yields a number).
pub fn select_audio_variant(master: &MasterPlaylist) -> Result<(String, String), DownloadError> {
    if master.variants.is_empty() {
        return Err(DownloadError::download("HLS master playlist contains no variants"));
    }
    let mut variants: Vec<_> = master.variants.iter().collect();
    variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));

    let best = variants[0];
    let bitrate = extract_bitrate(&best.uri)
        .map(str::to_string)
        .or_else(|| (best.bandwidth > 0).then(|| (best.bandwidth / 1000).to_string()));

    let specs = match bitrate {
        Some(rate) => format!("{rate} Kbps AAC"),
        None => {
            warn!(uri = %best.uri, "Could not determine bitrate for HLS variant");
            "AAC (Unknown Bitrate)".to_string()
        }
    };
    Ok((best.uri.clone(), specs))
}

/// Parse the audio master playlist at `master_url` and return the absolute
/// media playlist URL of its best variant plus the specs string.
pub async fn resolve_audio_media_url(
    client: &reqwest::Client,
    master_url: &str,
) -> Result<(String, String), DownloadError> {
    let playlist = fetch_playlist(client, master_url).await?;
    let Playlist::MasterPlaylist(master) = playlist else {
        return Err(DownloadError::download(format!(
            "expected HLS master playlist but got media playlist for {master_url}"
        )));
    };
    let (variant_uri, specs) = select_audio_variant(&master)?;
    let (base, query) = manifest_base(master_url)?;
    Ok((format!("{base}{variant_uri}{query}"), specs))
}

/// Parse the audio media playlist: require encryption key info and at least
/// one segment, validate the IV, and resolve absolute URLs.
pub async fn parse_audio_media(
    client: &reqwest::Client,
    media_url: &str,
) -> Result<AudioMedia, DownloadError> {
    let playlist = fetch_playlist(client, media_url).await?;
    let Playlist::MediaPlaylist(media) = playlist else {
        return Err(DownloadError::download(format!(
            "expected HLS media playlist but got master for {media_url}"
        )));
    };
    let (base, query) = manifest_base(media_url)?;
    audio_media_from_playlist(&media, &base, &query)
}

fn audio_media_from_playlist(
    media: &MediaPlaylist,
    base: &str,
    query: &str,
) -> Result<AudioMedia, DownloadError> {
    let Some(first_segment) = media.segments.first() else {
        return Err(DownloadError::hls_key("HLS media playlist contains no segments"));
    };
    let Some(key) = &first_segment.key else {
        return Err(DownloadError::hls_key(
            "HLS media playlist does not contain encryption key info",
        ));
    };
    let key_uri = key.uri.as_deref().unwrap_or("");
    if key_uri.is_empty() {
        return Err(DownloadError::hls_key("HLS key URI is empty"));
    }

    let iv_string = key.iv.as_deref().unwrap_or("");
    if !iv_string.starts_with("0x") {
        return Err(DownloadError::hls_key("HLS key IV is missing or invalid format"));
    }
    let iv_bytes = hex::decode(&iv_string[2..])
        .map_err(|err| DownloadError::hls_key(format!("failed to decode IV hex string: {err}")))?;
    let iv: [u8; BLOCK_SIZE] = iv_bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| {
            DownloadError::hls_key(format!("decoded IV is not 16 bytes: {} bytes", bytes.len()))
        })?;

    let key_url = if key_uri.starts_with("http") {
        key_uri.to_string()
    } else {
        format!("{base}{key_uri}")
    };

    Ok(AudioMedia {
        key_url,
        iv,
        segment_url: format!("{base}{}{query}", first_segment.uri),
    })
}

/// Fetch the AES-128 key. The key must be exactly 16 bytes.
pub async fn fetch_key(
    client: &reqwest::Client,
    key_url: &str,
) -> Result<[u8; BLOCK_SIZE], DownloadError> {
    let resp = client
        .get(key_url)
        .send()
        .await
        .map_err(|err| DownloadError::hls_key(format!("failed to GET HLS key: {err}")))?;
    if !resp.status().is_success() {
        return Err(DownloadError::hls_key(format!(
            "bad status for HLS key {key_url}: HTTP {}",
            resp.status().as_u16()
        )));
    }
    let body = resp
        .bytes()
        .await
        .map_err(|err| DownloadError::hls_key(format!("failed to read HLS key: {err}")))?;
    if body.len() < BLOCK_SIZE {
        return Err(DownloadError::hls_key(format!(
            "HLS key is {} bytes, expected {BLOCK_SIZE}",
            body.len()
        )));
    }
    let mut key = [0u8; BLOCK_SIZE];
    key.copy_from_slice(&body[..BLOCK_SIZE]);
    Ok(key)
}

/// Decrypt an AES-128-CBC segment and strip PKCS#7 padding when present.
pub fn decrypt_segment(
    ciphertext: &[u8],
    key: &[u8; BLOCK_SIZE],
    iv: &[u8; BLOCK_SIZE],
) -> Result<Vec<u8>, DownloadError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(DownloadError::hls_key(
            "encrypted data is not a multiple of the block size",
        ));
    }
    let mut buf = ciphertext.to_vec();
    let decryptor = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|err| DownloadError::hls_key(format!("failed to create AES cipher: {err}")))?;
    decryptor
        .decrypt_padded::<NoPadding>(&mut buf)
        .map_err(|err| DownloadError::hls_key(format!("decryption failed: {err}")))?;
    Ok(pkcs7_unpad(buf))
}

/// Strip a valid trailing PKCS#7 pad; data with an out-of-range or
/// mismatched trailer is returned as-is. Some servers omit the padding.
#[must_use]
pub fn pkcs7_unpad(data: Vec<u8>) -> Vec<u8> {
    let len = data.len();
    if len == 0 || len % BLOCK_SIZE != 0 {
        return data;
    }
    let pad_len = data[len - 1] as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE {
        return data;
    }
    if data[len - pad_len..].iter().any(|&b| b as usize != pad_len) {
        return data;
    }
    let mut data = data;
    data.truncate(len - pad_len);
    data
}

/// List the ordered segment URIs of a media playlist, query appended.
pub async fn segment_uris(
    client: &reqwest::Client,
    media_url: &str,
    query: &str,
) -> Result<Vec<String>, DownloadError> {
    let playlist = fetch_playlist(client, media_url).await?;
    let Playlist::MediaPlaylist(media) = playlist else {
        return Err(DownloadError::download(format!(
            "expected HLS media playlist but got master for {media_url}"
        )));
    };
    let uris: Vec<String> = media
        .segments
        .iter()
        .map(|seg| format!("{}{query}", seg.uri))
        .collect();
    if uris.is_empty() {
        return Err(DownloadError::download("HLS media playlist contained no segments"));
    }
    Ok(uris)
}

/// Pick a video variant from a master playlist.
///
/// Variants are sorted by bandwidth descending. A `2160` target takes the
/// highest-bandwidth variant and reports its actual resolution; any other
/// target walks the fallback ladder, and when nothing on the ladder exists
/// the highest-bandwidth variant wins.
///
/// Returns the variant URI and the display resolution (e.g. "720p").
pub fn select_video_variant(
    master: &MasterPlaylist,
    want_res: &str,
) -> Result<(String, String), DownloadError> {
    if master.variants.is_empty() {
        return Err(DownloadError::download("video master playlist contains no variants"));
    }
    let mut variants: Vec<_> = master.variants.iter().collect();
    variants.sort_by(|a, b| b.bandwidth.cmp(&a.bandwidth));

    let height_of = |variant: &m3u8_rs::VariantStream| {
        variant.resolution.as_ref().map(|res| res.height.to_string())
    };

    if want_res == "2160" {
        let best = variants[0];
        if let Some(height) = height_of(best) {
            return Ok((best.uri.clone(), format_res(&height)));
        }
        warn!("Could not determine resolution of highest-bandwidth variant, using ladder");
    }

    let mut current = want_res.to_string();
    loop {
        if let Some(variant) = variants
            .iter()
            .find(|v| height_of(v).as_deref() == Some(current.as_str()))
        {
            if current != want_res {
                tracing::info!(wanted = want_res, chosen = %current, "Resolution unavailable, fell back");
            }
            return Ok((variant.uri.clone(), format_res(&current)));
        }
        match res_fallback(&current) {
            Some(next) => current = next.to_string(),
            None => break,
        }
    }

    // Nothing on the ladder: take the highest-bandwidth variant.
    let best = variants[0];
    let height = height_of(best).ok_or_else(|| {
        DownloadError::download(
            "failed to find a suitable video variant and could not determine resolution of best variant",
        )
    })?;
    Ok((best.uri.clone(), format_res(&height)))
}
