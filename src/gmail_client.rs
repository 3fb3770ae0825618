use anyhow::{Context, Result};
use async_trait::async_trait;
use google_gmail1::api::{Label, Message, Scope};
use google_gmail1::{hyper, hyper_rustls, oauth2, Gmail};
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::GmailConfig;
use crate::error::{ItemFailure, StoreError};
use crate::stats::request_tracker::RequestTracker;
use crate::stats::store::{DetailLevel, ListPage, MessageId, MessageMetadata, MessagePart, MessageStore};

const USER_ID: &str = "me";

/// System labels shown on the dashboard.
pub const KEY_LABELS: [&str; 7] = ["INBOX", "SENT", "DRAFT", "SPAM", "TRASH", "IMPORTANT", "STARRED"];

/// Mailbox identity and totals from the profile endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    pub email_address: String,
    pub messages_total: u64,
    pub threads_total: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelCount {
    pub id: String,
    pub name: String,
    pub label_type: String,
    pub messages_total: u64,
    pub messages_unread: u64,
    pub threads_total: u64,
}

pub struct GmailClient {
    hub: Gmail<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>,
}

impl GmailClient {
    pub async fn new(config: &GmailConfig) -> Result<Self> {
        info!("Connecting to Gmail API via OAuth2");

        let credentials_path = config
            .credentials_path
            .as_deref()
            .context("GMAIL_CREDENTIALS_PATH must be set to connect to Gmail")?;

        let secret = oauth2::read_application_secret(credentials_path)
            .await
            .context("Unable to read OAuth2 client credentials file")?;

        // Tokens are refreshed by the authenticator and cached on disk between runs
        let auth = oauth2::InstalledFlowAuthenticator::builder(
            secret,
            oauth2::InstalledFlowReturnMethod::HTTPRedirect,
        )
        .persist_tokens_to_disk(&config.token_cache_path)
        .build()
        .await
        .context("Unable to create OAuth2 authenticator")?;

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .build();

        let client = hyper::Client::builder().build(connector);
        let hub = Gmail::new(client, auth);

        info!("✅ Gmail API connection established successfully (read-only scope)");

        Ok(GmailClient { hub })
    }

    pub async fn account_snapshot(&self, tracker: &mut RequestTracker) -> Result<AccountSnapshot> {
        tracker.record("users.getProfile");
        let (_, profile) = self
            .hub
            .users()
            .get_profile(USER_ID)
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(classify_error)
            .context("Unable to read mailbox profile")?;

        Ok(AccountSnapshot {
            email_address: profile.email_address.unwrap_or_else(|| "(unknown)".to_string()),
            messages_total: non_negative(profile.messages_total),
            threads_total: non_negative(profile.threads_total),
        })
    }

    /// Label totals sorted by name (case-insensitive).
    ///
    /// With `only`, details are fetched just for labels whose name is listed.
    pub async fn label_counts(&self, only: Option<&[&str]>, tracker: &mut RequestTracker) -> Result<Vec<LabelCount>> {
        tracker.record("users.labels.list");
        let (_, response) = self
            .hub
            .users()
            .labels_list(USER_ID)
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(classify_error)
            .context("Unable to list labels")?;

        let mut counts = Vec::new();
        for label in response.labels.unwrap_or_default() {
            let (Some(id), name) = (label.id, label.name) else {
                continue;
            };
            if let Some(wanted) = only {
                if !name.as_deref().is_some_and(|n| wanted.contains(&n)) {
                    continue;
                }
            }

            debug!("Fetching label details for {}", id);
            tracker.record("users.labels.get");
            let (_, detail) = self
                .hub
                .users()
                .labels_get(USER_ID, &id)
                .add_scope(Scope::Readonly)
                .doit()
                .await
                .map_err(classify_error)
                .with_context(|| format!("Unable to read label {}", id))?;

            counts.push(label_count(id, detail));
        }

        counts.sort_by_key(|l| l.name.to_lowercase());
        Ok(counts)
    }

    /// Print every label with its message and thread totals.
    pub async fn print_labels(&self, tracker: &mut RequestTracker) -> Result<()> {
        let labels = self.label_counts(None, tracker).await?;

        if labels.is_empty() {
            println!("No labels found.");
            return Ok(());
        }

        println!("Labels: {}\n", labels.len());
        println!("{:<40} {:>9} {:>9} {:>9}  {:<8}", "Label Name", "Messages", "Unread", "Threads", "Type");
        println!("{}", "=".repeat(80));
        for label in labels {
            println!(
                "{:<40} {:>9} {:>9} {:>9}  {:<8}",
                label.name, label.messages_total, label.messages_unread, label.threads_total, label.label_type
            );
        }

        Ok(())
    }
}

#[async_trait]
impl MessageStore for GmailClient {
    async fn list_ids(
        &self,
        query: &str,
        labels: Option<&[String]>,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let mut call = self
            .hub
            .users()
            .messages_list(USER_ID)
            .q(query)
            .max_results(page_size)
            .add_scope(Scope::Readonly);

        if let Some(token) = page_token {
            call = call.page_token(token);
        }
        for label in labels.unwrap_or_default() {
            call = call.add_label_ids(label);
        }

        let (_, response) = call.doit().await.map_err(classify_error)?;

        Ok(ListPage {
            ids: response
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.id)
                .collect(),
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_metadata(&self, id: &str, detail: DetailLevel) -> Result<MessageMetadata, StoreError> {
        let call = self
            .hub
            .users()
            .messages_get(USER_ID, id)
            .add_scope(Scope::Readonly);

        let call = match detail {
            DetailLevel::Minimal => call.format("metadata").add_metadata_headers("From"),
            DetailLevel::Full => call.format("full"),
        };

        let (_, message) = call.doit().await.map_err(classify_error)?;

        message_to_metadata(id, message, detail).map_err(|failure| StoreError::RequestFailed {
            status: None,
            message: failure.reason,
        })
    }
}

/// Map a Gmail client error onto the store failure taxonomy.
pub fn classify_error(error: google_gmail1::Error) -> StoreError {
    use google_gmail1::Error as ApiError;

    match error {
        ApiError::BadRequest(body) => classify_error_body(&body),
        ApiError::Failure(response) => {
            let status = response.status();
            StoreError::from_http_status(status.as_u16(), &[], format!("HTTP {}", status))
        }
        ApiError::HttpError(e) => StoreError::TransportFailed(e.to_string()),
        ApiError::Io(e) => StoreError::TransportFailed(e.to_string()),
        // Revoked or expired refresh token: no request can succeed without re-consent
        ApiError::MissingToken(e) => StoreError::RequestFailed {
            status: Some(401),
            message: format!("no usable OAuth2 token: {}", e),
        },
        other => StoreError::RequestFailed {
            status: None,
            message: other.to_string(),
        },
    }
}

/// Classify a Google JSON error document (`{"error": {"code", "message", "errors": [{"reason"}]}}`).
pub fn classify_error_body(body: &serde_json::Value) -> StoreError {
    let error = &body["error"];
    let message = error["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    let reasons: Vec<&str> = error["errors"]
        .as_array()
        .map(|errors| errors.iter().filter_map(|e| e["reason"].as_str()).collect())
        .unwrap_or_default();

    match error["code"].as_u64().and_then(|c| u16::try_from(c).ok()) {
        Some(status) => StoreError::from_http_status(status, &reasons, message),
        None => StoreError::RequestFailed { status: None, message },
    }
}

/// Validate a fetched message and reduce it to the fields the aggregator uses.
pub fn message_to_metadata(
    requested_id: &str,
    message: Message,
    detail: DetailLevel,
) -> Result<MessageMetadata, ItemFailure> {
    let id = message
        .id
        .ok_or_else(|| ItemFailure::new(requested_id, "response has no message id"))?;
    let internal_timestamp_ms = message
        .internal_date
        .ok_or_else(|| ItemFailure::new(id.as_str(), "response has no internalDate"))?;

    let size_estimate_bytes = match message.size_estimate {
        Some(size) => u64::try_from(size).unwrap_or(0),
        None => {
            debug!("Message {} has no sizeEstimate, counting 0 bytes", id);
            0
        }
    };

    let mut raw_headers = Vec::new();
    let mut part_tree = None;
    let mut has_parts = false;

    if let Some(payload) = message.payload {
        for header in payload.headers.clone().unwrap_or_default() {
            if let (Some(name), Some(value)) = (header.name, header.value) {
                raw_headers.push((name, value));
            }
        }
        has_parts = payload.parts.as_ref().is_some_and(|p| !p.is_empty());
        if detail == DetailLevel::Full {
            part_tree = Some(convert_part(payload));
        }
    } else {
        warn!("Message {} has no payload", id);
    }

    let sender_header = raw_headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("From"))
        .map(|(_, value)| value.clone());

    Ok(MessageMetadata {
        id,
        internal_timestamp_ms,
        size_estimate_bytes,
        sender_header,
        raw_headers,
        has_parts,
        part_tree,
    })
}

fn convert_part(part: google_gmail1::api::MessagePart) -> MessagePart {
    MessagePart {
        mime_type: part.mime_type,
        filename: part.filename,
        attachment_id: part.body.and_then(|b| b.attachment_id),
        parts: part
            .parts
            .unwrap_or_default()
            .into_iter()
            .map(convert_part)
            .collect(),
    }
}

fn label_count(id: String, detail: Label) -> LabelCount {
    LabelCount {
        name: detail.name.unwrap_or_else(|| id.clone()),
        id,
        label_type: detail.type_.unwrap_or_default(),
        messages_total: non_negative(detail.messages_total),
        messages_unread: non_negative(detail.messages_unread),
        threads_total: non_negative(detail.threads_total),
    }
}

fn non_negative(value: Option<i32>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}
