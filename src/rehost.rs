use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::StreamExt;
use lazy_regex::regex;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;

static CONCURRENCY: Lazy<usize> = Lazy::new(|| {
    std::env::var("REHOST_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(4)
});

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Rehost a batch of asset links. Failed entries are dropped, so the
    /// output may be shorter than the input.
    async fn rehost_many(&self, urls: &[String]) -> Vec<String>;
}

#[derive(Deserialize, Debug)]
struct RehostResponse {
    url: String,
}

pub struct HttpAssetStore {
    client: reqwest::Client,
    upload_url: String,
    asset_host: String,
    profile: String,
}

impl HttpAssetStore {
    pub fn new(
        client: reqwest::Client,
        upload_url: impl Into<String>,
        asset_host: impl Into<String>,
        profile: impl Into<String>,
    ) -> Self {
        Self {
            client,
            upload_url: upload_url.into(),
            asset_host: asset_host.into(),
            profile: profile.into(),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self, anyhow::Error> {
        let upload_url: String = envmnt::get_parse("ASSET_UPLOAD_URL")
            .map_err(|_| anyhow!("ASSET_UPLOAD_URL not set"))?;
        let asset_host: String = envmnt::get_parse("ASSET_HOST")
            .map_err(|_| anyhow!("ASSET_HOST not set"))?;
        let profile = envmnt::get_or("ASSET_PROFILE", "catalog");
        Ok(Self::new(client, upload_url, asset_host, profile))
    }

    /// Already-hosted links keep their url as is.
    fn is_internal(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        parsed
            .host_str()
            .map(|host| host.eq_ignore_ascii_case(&self.asset_host))
            .unwrap_or(false)
    }

    async fn rehost_one(&self, url: &str) -> Result<String, anyhow::Error> {
        let source = direct_download_link(url);
        let resp = self
            .client
            .post(&self.upload_url)
            .json(&json!({ "url": source, "profile": self.profile }))
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "Asset upload {status}: {}",
                crate::truncate_chars(text.trim(), 200)
            ));
        }
        let resp: RehostResponse = serde_json::from_str(&text)?;
        Ok(resp.url)
    }
}

#[async_trait]
impl AssetStore for HttpAssetStore {
    async fn rehost_many(&self, urls: &[String]) -> Vec<String> {
        futures::stream::iter(urls.iter().cloned().map(|url| async move {
            if self.is_internal(&url) {
                return Some(url.clone());
            }
            match self.rehost_one(&url).await {
                Ok(hosted) => Some(hosted),
                Err(err) => {
                    log::warn!("Unable to rehost {url}: {err}");
                    None
                }
            }
        }))
        .buffered(*CONCURRENCY)
        .filter_map(|res| async move { res })
        .collect()
        .await
    }
}

/// Rewrite shared-drive viewer links into direct-download form.
pub fn direct_download_link(url: &str) -> String {
    let regex = regex!(r"https?://drive\.google\.com/file/d/([^/?#]+)/view\S*");
    match regex.captures(url) {
        Some(caps) => format!("https://drive.google.com/uc?export=download&id={}", &caps[1]),
        None => url.to_string(),
    }
}
