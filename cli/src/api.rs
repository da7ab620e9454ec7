use crate::types::{
    HealthResponse, MixRequest, MixResponse, SubmitResponse, TaskStatus, TierFlags, TrackInput,
};
use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use reqwest::Url;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

/// Thin wrapper over the worker's HTTP surface. All methods issue a single
/// request and return the parsed body; retries and sequencing live with the
/// callers.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: Url,
}

impl Client {
    pub fn new(base_url: Option<&str>) -> Result<Self> {
        let url = base_url
            .map(Url::parse)
            .unwrap_or_else(|| Url::parse(DEFAULT_BASE_URL))
            .context("invalid worker base URL")?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url: url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("failed to build URL for {path}"))
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.endpoint("api/health")?;
        let response = self.http.get(url).send().await.context("worker health request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("worker responded with status {}", response.status());
        }
        response.json().await.context("failed to parse health response")
    }

    /// `POST /api/remix` with the tier flags as query parameters and the
    /// track as a multipart `file` field.
    pub async fn submit_separation(
        &self,
        track: &TrackInput,
        flags: TierFlags,
    ) -> Result<SubmitResponse> {
        let mut url = self.endpoint("api/remix")?;
        url.query_pairs_mut()
            .append_pair("fast_mode", bool_str(flags.fast_mode))
            .append_pair("turbo_mode", bool_str(flags.turbo_mode));
        let form = Form::new().part("file", audio_part(track));
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .context("separation request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("worker responded with status {}", response.status());
        }
        response.json().await.context("failed to parse separation response")
    }

    /// `POST /api/generate` with all three tags URL-encoded as query
    /// parameters.
    pub async fn submit_generation(
        &self,
        mood: &str,
        genre: &str,
        language: &str,
    ) -> Result<SubmitResponse> {
        let mut url = self.endpoint("api/generate")?;
        url.query_pairs_mut()
            .append_pair("mood", mood)
            .append_pair("genre", genre)
            .append_pair("language", language);
        let response = self.http.post(url).send().await.context("generation request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("worker responded with status {}", response.status());
        }
        response.json().await.context("failed to parse generation response")
    }

    /// `POST /api/smart-mix`: both tracks plus mood/genre in the multipart
    /// body, tier flags in the query string.
    pub async fn submit_smart_blend(
        &self,
        primary: &TrackInput,
        backing: &TrackInput,
        mood: &str,
        genre: &str,
        flags: TierFlags,
    ) -> Result<SubmitResponse> {
        let mut url = self.endpoint("api/smart-mix")?;
        url.query_pairs_mut()
            .append_pair("fast_mode", bool_str(flags.fast_mode))
            .append_pair("turbo_mode", bool_str(flags.turbo_mode));
        let form = Form::new()
            .part("file1", audio_part(primary))
            .part("file2", audio_part(backing))
            .text("mood", mood.to_string())
            .text("genre", genre.to_string());
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .context("smart blend request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("worker responded with status {}", response.status());
        }
        response.json().await.context("failed to parse smart blend response")
    }

    /// Synchronous `POST /api/mix`. Resolves with the finished artifact
    /// reference; no task id, no polling.
    pub async fn mix_stems(&self, request: &MixRequest) -> Result<MixResponse> {
        let url = self.endpoint("api/mix")?;
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .context("mix request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("worker responded with status {}", response.status());
        }
        response.json().await.context("failed to parse mix response")
    }

    /// Synchronous `POST /api/mix-two-files`. Everything rides in the
    /// multipart body, `blend_ratio` included.
    pub async fn blend_tracks(
        &self,
        primary: &TrackInput,
        backing: &TrackInput,
        blend_ratio: f32,
        mood: &str,
        genre: &str,
    ) -> Result<MixResponse> {
        let url = self.endpoint("api/mix-two-files")?;
        let form = Form::new()
            .part("file1", audio_part(primary))
            .part("file2", audio_part(backing))
            .text("blend_ratio", blend_ratio.to_string())
            .text("mood", mood.to_string())
            .text("genre", genre.to_string());
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .context("blend request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("worker responded with status {}", response.status());
        }
        response.json().await.context("failed to parse blend response")
    }

    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let url = self.endpoint(&format!("api/task-status/{task_id}"))?;
        let response = self.http.get(url).send().await.context("task status request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("worker responded with status {}", response.status());
        }
        response.json().await.context("failed to parse task status")
    }

    pub fn download_url(&self, file: &str) -> Result<Url> {
        self.endpoint(&format!("api/download/{file}"))
    }

    pub async fn download(&self, file: &str) -> Result<Vec<u8>> {
        let url = self.download_url(file)?;
        let response = self.http.get(url).send().await.context("download request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("worker responded with status {}", response.status());
        }
        let bytes = response.bytes().await.context("failed to read artifact bytes")?;
        Ok(bytes.to_vec())
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn audio_part(track: &TrackInput) -> Part {
    Part::bytes(track.bytes.clone()).file_name(track.file_name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_url_points_at_the_worker_download_route() {
        let client = Client::new(Some("http://localhost:9999")).unwrap();
        let url = client.download_url("out.wav").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9999/api/download/out.wav");
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(Client::new(Some("not a url")).is_err());
    }
}
