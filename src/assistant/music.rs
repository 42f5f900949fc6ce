//! Music lookup and playback preparation
//!
//! Searches the iTunes Search API (keyless, ranked results with preview
//! audio), downloads the first-ranked track, and transcodes it to the
//! pipeline's native 16 kHz mono PCM16 WAV for playback.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::audio;

const DEFAULT_SEARCH_URL: &str = "https://itunes.apple.com/search";

#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub artist: String,
    pub preview_url: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    #[serde(default, rename = "trackName")]
    track_name: String,
    #[serde(default, rename = "artistName")]
    artist_name: String,
    #[serde(default, rename = "previewUrl")]
    preview_url: Option<String>,
}

pub struct MusicClient {
    client: Client,
    search_url: String,
}

impl MusicClient {
    pub fn new() -> Self {
        Self::with_search_url(DEFAULT_SEARCH_URL)
    }

    pub fn with_search_url(search_url: &str) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            search_url: search_url.to_string(),
        }
    }

    /// First ranked track with downloadable audio
    pub async fn search(&self, query: &str) -> Result<Track> {
        let response = self
            .client
            .get(&self.search_url)
            .query(&[("term", query), ("media", "music"), ("limit", "5")])
            .send()
            .await
            .context("music search failed")?
            .error_for_status()
            .context("music search rejected")?;

        let data: SearchResponse = response
            .json()
            .await
            .context("music search returned malformed JSON")?;

        data.results
            .into_iter()
            .find_map(|r| {
                r.preview_url.map(|preview_url| Track {
                    name: r.track_name,
                    artist: r.artist_name,
                    preview_url,
                })
            })
            .context("no playable track found")
    }

    /// Download a track's audio and transcode to 16 kHz mono PCM16 WAV.
    pub async fn fetch_wav(&self, track: &Track) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get(&track.preview_url)
            .send()
            .await
            .context("track download failed")?
            .error_for_status()
            .context("track download rejected")?
            .bytes()
            .await
            .context("track body read failed")?;

        info!(
            "downloaded {} bytes for \"{}\" by {}",
            bytes.len(),
            track.name,
            track.artist
        );

        let pcm = audio::transcode_to_pcm16(&bytes).await?;
        audio::pcm_bytes_to_wav(&pcm, audio::SAMPLE_RATE)
    }
}

impl Default for MusicClient {
    fn default() -> Self {
        Self::new()
    }
}
