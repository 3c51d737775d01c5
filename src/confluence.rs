use crate::config::ConfluenceConfig;
use anyhow::{Context, Result, anyhow};
use reqwest::{Client, RequestBuilder, multipart};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const CONTENT_PATH: &str = "/rest/api/content";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Image to attach next to the page body.
#[derive(Debug, Clone, Copy)]
pub struct Attachment<'a> {
    pub filename: &'a str,
    pub mime: &'a str,
    pub bytes: &'a [u8],
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ContentRef>,
}

#[derive(Debug, Deserialize)]
struct ContentRef {
    id: String,
    version: Option<VersionRef>,
}

#[derive(Debug, Deserialize)]
struct VersionRef {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    id: String,
    #[serde(rename = "_links")]
    links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
struct PageLinks {
    webui: Option<String>,
}

/// Confluence REST client. Publishing is skipped when the wiki is not
/// configured.
#[derive(Clone)]
pub struct ConfluencePublisher {
    http: Client,
    target: Option<Target>,
}

#[derive(Clone)]
struct Target {
    base_url: String,
    email: String,
    api_token: String,
    space_key: String,
    parent_page_id: Option<String>,
}

impl ConfluencePublisher {
    pub fn new(config: &ConfluenceConfig) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let target = if config.is_configured() {
            let field = |v: &Option<String>| v.as_deref().unwrap_or_default().trim().to_string();
            Some(Target {
                base_url: field(&config.url).trim_end_matches('/').to_string(),
                email: field(&config.email),
                api_token: field(&config.api_token),
                space_key: field(&config.space_key),
                parent_page_id: config
                    .parent_page_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            })
        } else {
            None
        };
        Ok(Self { http, target })
    }

    pub fn disabled() -> Self {
        Self {
            http: Client::new(),
            target: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.target.is_some()
    }

    /// Creates or updates the page titled `title`. Returns the page URL, or
    /// `None` when publishing is not configured.
    pub async fn publish(&self, title: &str, html: &str, diagram: Option<Attachment<'_>>) -> Result<Option<String>> {
        let Some(target) = &self.target else {
            log::info!("Confluence is not configured, skipping publish of '{}'", title);
            return Ok(None);
        };

        let body = match &diagram {
            Some(attachment) => format!("{}{}", html, diagram_section(attachment.filename)),
            None => html.to_string(),
        };

        let existing = self.find_page(target, title).await?;
        let payload = page_payload(
            title,
            &target.space_key,
            &body,
            existing.as_ref().map(|(_, version)| *version),
            target.parent_page_id.as_deref(),
        );

        let request = match &existing {
            Some((id, _)) => self.http.put(format!("{}{}/{}", target.base_url, CONTENT_PATH, id)),
            None => self.http.post(format!("{}{}", target.base_url, CONTENT_PATH)),
        };
        let response = authed(request, target).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Confluence page write failed ({}): {}", status, text));
        }
        let page: PageResponse = response.json().await.context("Unreadable Confluence page response")?;

        if let Some(attachment) = diagram {
            if let Err(e) = self.upload_attachment(target, &page.id, attachment).await {
                log::warn!("Diagram upload to page {} failed: {:#}", page.id, e);
            }
        }

        let webui = page.links.and_then(|l| l.webui).unwrap_or_default();
        log::info!("Published '{}' to Confluence page {}", title, page.id);
        Ok(Some(page_url(&target.base_url, &webui)))
    }

    async fn find_page(&self, target: &Target, title: &str) -> Result<Option<(String, u64)>> {
        let request = self
            .http
            .get(format!("{}{}", target.base_url, CONTENT_PATH))
            .query(&[("title", title), ("spaceKey", target.space_key.as_str()), ("expand", "version")]);
        let response = authed(request, target).send().await?.error_for_status()?;
        let found: SearchResponse = response.json().await.context("Unreadable Confluence search response")?;
        Ok(found
            .results
            .into_iter()
            .next()
            .map(|page| (page.id, page.version.map_or(1, |v| v.number))))
    }

    async fn upload_attachment(&self, target: &Target, page_id: &str, attachment: Attachment<'_>) -> Result<()> {
        let base = format!("{}{}/{}/child/attachment", target.base_url, CONTENT_PATH, page_id);

        let lookup = self.http.get(&base).query(&[("filename", attachment.filename)]);
        let found: SearchResponse = authed(lookup, target)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("Unreadable attachment lookup")?;

        let url = match found.results.first() {
            Some(existing) => format!("{}/{}/data", base, existing.id),
            None => base,
        };
        let part = multipart::Part::bytes(attachment.bytes.to_vec())
            .file_name(attachment.filename.to_string())
            .mime_str(attachment.mime)?;
        let form = multipart::Form::new().part("file", part);

        authed(self.http.post(url), target)
            .header("X-Atlassian-Token", "nocheck")
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn authed(request: RequestBuilder, target: &Target) -> RequestBuilder {
    request
        .basic_auth(&target.email, Some(&target.api_token))
        .header("Accept", "application/json")
}

pub fn diagram_section(filename: &str) -> String {
    format!(
        "<h2>Диаграмма бизнес-процесса</h2>\
         <ac:image ac:align=\"center\" ac:layout=\"center\" ac:width=\"800\">\
         <ri:attachment ri:filename=\"{}\"/></ac:image>",
        filename
    )
}

/// Storage-format page body. `current_version` marks an update; ancestors are
/// only set on create.
pub fn page_payload(
    title: &str,
    space_key: &str,
    html: &str,
    current_version: Option<u64>,
    parent_page_id: Option<&str>,
) -> Value {
    let mut payload = json!({
        "type": "page",
        "title": title,
        "space": {"key": space_key},
        "body": {"storage": {"value": html, "representation": "storage"}},
    });
    match current_version {
        Some(version) => payload["version"] = json!({"number": version + 1}),
        None => {
            if let Some(parent) = parent_page_id {
                let id = parent.parse::<u64>().map(Value::from).unwrap_or_else(|_| Value::from(parent));
                payload["ancestors"] = json!([{"id": id}]);
            }
        }
    }
    payload
}

pub fn page_url(base_url: &str, webui: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), webui)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_payload_carries_parent() {
        let payload = page_payload("BRD", "ENG", "<p>x</p>", None, Some("12345"));
        assert_eq!(payload["space"]["key"], "ENG");
        assert_eq!(payload["body"]["storage"]["representation"], "storage");
        assert_eq!(payload["ancestors"][0]["id"], 12345);
        assert!(payload.get("version").is_none());
    }

    #[test]
    fn test_update_payload_bumps_version_without_ancestors() {
        let payload = page_payload("BRD", "ENG", "<p>x</p>", Some(4), Some("12345"));
        assert_eq!(payload["version"]["number"], 5);
        assert!(payload.get("ancestors").is_none());
    }

    #[test]
    fn test_diagram_section_references_attachment() {
        let section = diagram_section("process_diagram.svg");
        assert!(section.starts_with("<h2>Диаграмма бизнес-процесса</h2>"));
        assert!(section.contains("ri:filename=\"process_diagram.svg\""));
    }

    #[test]
    fn test_page_url_joins_base_and_webui() {
        assert_eq!(
            page_url("https://wiki.example.com/", "/spaces/ENG/pages/1/BRD"),
            "https://wiki.example.com/spaces/ENG/pages/1/BRD"
        );
    }

    #[actix_rt::test]
    async fn test_unconfigured_publish_is_skipped() {
        let publisher = ConfluencePublisher::new(&ConfluenceConfig::default()).unwrap();
        assert!(!publisher.is_configured());
        assert_eq!(publisher.publish("BRD", "<p>x</p>", None).await.unwrap(), None);
    }
}
