//! Pass-through client for the attachment storage service.
//!
//! Every call is a single attempt. Non-2xx answers are reported with the
//! service's own status and error text.

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::AttachmentLimits;
use crate::error::{RelayError, UpstreamError};
use crate::types::AttachmentMetadata;
use crate::util::{http, join_url};

/// One file as received from the caller.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

fn megabytes(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}

/// Check a batch of files against the upload limits before any network call.
pub fn validate_files<'a, I>(files: I, limits: &AttachmentLimits) -> Result<(), RelayError>
where
    I: IntoIterator<Item = (&'a str, u64, &'a str)>,
{
    let mut total = 0u64;
    let mut count = 0usize;
    for (name, size, mime) in files {
        count += 1;
        if size > limits.max_file_bytes {
            return Err(RelayError::validation(format!(
                "File \"{}\" is too large. Maximum size is {}MB.",
                name,
                megabytes(limits.max_file_bytes)
            )));
        }
        if !limits.allowed_mime_types.is_empty()
            && !limits.allowed_mime_types.iter().any(|m| m == mime)
        {
            return Err(RelayError::validation(format!(
                "File type \"{}\" is not supported.",
                mime
            )));
        }
        total = total.saturating_add(size);
    }
    if count == 0 {
        return Err(RelayError::validation("No files provided"));
    }
    if total > limits.max_total_bytes {
        return Err(RelayError::validation(format!(
            "Total upload size exceeds {}MB.",
            megabytes(limits.max_total_bytes)
        )));
    }
    Ok(())
}

/// Validate owned upload files.
pub fn validate_uploads(files: &[UploadFile], limits: &AttachmentLimits) -> Result<(), RelayError> {
    validate_files(
        files
            .iter()
            .map(|f| (f.file_name.as_str(), f.size(), f.mime_type.as_str())),
        limits,
    )
}

async fn ensure_success(
    resp: reqwest::Response,
    fallback: &str,
) -> Result<reqwest::Response, RelayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = http::error_message(resp, fallback).await;
    warn!("Attachment service returned {}: {}", status, message);
    Err(UpstreamError::Api {
        status: status.as_u16(),
        message,
    }
    .into())
}

async fn read_json(resp: reqwest::Response) -> Result<Value, RelayError> {
    resp.json::<Value>()
        .await
        .map_err(|e| UpstreamError::Parse(e.to_string()).into())
}

/// Pull a metadata list out of the service's list response. Accepts a bare
/// array or one wrapped in `attachments`, `files` or `data`.
fn metadata_list(body: &Value) -> Vec<AttachmentMetadata> {
    let items = match body {
        Value::Array(items) => Some(items),
        other => ["attachments", "files", "data"]
            .iter()
            .find_map(|key| other.get(*key).and_then(Value::as_array)),
    };
    items
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn metadata_single(body: &Value) -> Option<AttachmentMetadata> {
    serde_json::from_value(body.clone()).ok().or_else(|| {
        ["attachment", "metadata", "data"]
            .iter()
            .find_map(|key| body.get(*key))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    })
}

/// Client for the remote attachment service.
pub struct AttachmentRelay {
    base_url: String,
}

impl AttachmentRelay {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Upload files for a chatbot. Returns the service's JSON answer
    /// (file ids and metadata) untouched.
    pub async fn upload(
        &self,
        chatbot_id: &str,
        session_id: Option<&str>,
        files: Vec<UploadFile>,
        bearer: Option<&str>,
    ) -> Result<Value, RelayError> {
        info!("Uploading {} attachment(s) for chatbot {}", files.len(), chatbot_id);

        let mut form = Form::new().text("chatbotId", chatbot_id.to_string());
        if let Some(sid) = session_id {
            form = form.text("sessionId", sid.to_string());
        }
        for file in files {
            let part = Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(&file.mime_type)
                .map_err(|e| RelayError::validation(format!("Invalid MIME type: {}", e)))?;
            form = form.part("files", part);
        }

        let mut request = http::client()
            .post(self.url("/api/attachments/upload"))
            .multipart(form);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.map_err(UpstreamError::from)?;
        let resp = ensure_success(resp, "Failed to upload file").await?;
        read_json(resp).await
    }

    /// Start a download. The caller streams the body and forwards the
    /// content headers.
    pub async fn download(&self, file_id: &str) -> Result<reqwest::Response, RelayError> {
        let resp = http::client()
            .get(self.url(&format!("/api/attachments/{}/download", encode(file_id))))
            .send()
            .await
            .map_err(UpstreamError::from)?;
        ensure_success(resp, "Failed to download file").await
    }

    pub async fn list(&self, chatbot_id: &str) -> Result<Vec<AttachmentMetadata>, RelayError> {
        let resp = http::client()
            .get(self.url(&format!("/api/attachments/list/{}", encode(chatbot_id))))
            .send()
            .await
            .map_err(UpstreamError::from)?;
        let resp = ensure_success(resp, "Failed to list attachments").await?;
        Ok(metadata_list(&read_json(resp).await?))
    }

    pub async fn metadata(&self, file_id: &str) -> Result<AttachmentMetadata, RelayError> {
        let resp = http::client()
            .get(self.url(&format!("/api/attachments/{}", encode(file_id))))
            .send()
            .await
            .map_err(UpstreamError::from)?;
        let resp = ensure_success(resp, "Failed to get attachment metadata").await?;
        let body = read_json(resp).await?;
        metadata_single(&body)
            .ok_or_else(|| UpstreamError::Parse("unrecognized metadata response".into()).into())
    }

    pub async fn delete(&self, file_id: &str) -> Result<(), RelayError> {
        let resp = http::client()
            .delete(self.url(&format!("/api/attachments/{}", encode(file_id))))
            .send()
            .await
            .map_err(UpstreamError::from)?;
        ensure_success(resp, "Failed to delete file").await?;
        info!("Deleted attachment {}", file_id);
        Ok(())
    }
}

/// Send one file to the workflow engine's ingestion webhook and return the
/// vector id it assigns.
pub async fn upload_vector_file(
    webhook_url: &str,
    chatbot_id: &str,
    session_id: &str,
    file: UploadFile,
) -> Result<String, RelayError> {
    info!("Forwarding {} to workflow file webhook", file.file_name);
    let part = Part::bytes(file.bytes)
        .file_name(file.file_name.clone())
        .mime_str(&file.mime_type)
        .map_err(|e| RelayError::validation(format!("Invalid MIME type: {}", e)))?;
    let form = Form::new()
        .text("chatbotId", chatbot_id.to_string())
        .text("sessionId", session_id.to_string())
        .text("fileName", file.file_name)
        .part("file", part);

    let resp = http::client()
        .post(webhook_url)
        .multipart(form)
        .send()
        .await
        .map_err(UpstreamError::from)?;
    let resp = ensure_success(resp, "Failed to upload file to workflow").await?;
    let body = read_json(resp).await?;

    let item = match &body {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    ["vectorId", "vector_id", "id", "fileId"]
        .iter()
        .find_map(|key| item.get(*key))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| UpstreamError::Parse("workflow response carried no vectorId".into()).into())
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_file_over_100mb_rejected() {
        let limits = AttachmentLimits::default();
        let err = validate_files([("big.pdf", 100 * MB + 1, "application/pdf")], &limits)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "File \"big.pdf\" is too large. Maximum size is 100MB."
        );
        assert!(validate_files([("ok.pdf", 100 * MB, "application/pdf")], &limits).is_ok());
    }

    #[test]
    fn test_total_over_500mb_rejected() {
        let limits = AttachmentLimits::default();
        let files: Vec<(&str, u64, &str)> = (0..6)
            .map(|_| ("part.pdf", 90 * MB, "application/pdf"))
            .collect();
        let err = validate_files(files, &limits).unwrap_err();
        assert_eq!(err.to_string(), "Total upload size exceeds 500MB.");
    }

    #[test]
    fn test_unsupported_type_rejected() {
        let limits = AttachmentLimits::default();
        let err = validate_files([("run.exe", 10, "application/x-msdownload")], &limits)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "File type \"application/x-msdownload\" is not supported."
        );
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let limits = AttachmentLimits::default();
        let none: Vec<(&str, u64, &str)> = Vec::new();
        assert!(validate_files(none, &limits).is_err());
    }

    #[test]
    fn test_metadata_list_shapes() {
        let item = json!({
            "fileId": "f1", "fileName": "a.pdf", "mimeType": "application/pdf",
            "fileSize": 10, "uploadedAt": "2024-01-01T00:00:00Z", "status": "ready"
        });
        assert_eq!(metadata_list(&json!([item.clone()])).len(), 1);
        assert_eq!(metadata_list(&json!({ "attachments": [item.clone()] })).len(), 1);
        assert_eq!(metadata_list(&json!({ "files": [item.clone(), item] })).len(), 2);
        assert!(metadata_list(&json!({ "unexpected": true })).is_empty());
    }

    #[test]
    fn test_metadata_single_shapes() {
        let item = json!({
            "fileId": "f1", "fileName": "a.pdf", "mimeType": "application/pdf", "fileSize": 10
        });
        assert_eq!(metadata_single(&item).unwrap().file_id, "f1");
        assert_eq!(
            metadata_single(&json!({ "attachment": item })).unwrap().file_name,
            "a.pdf"
        );
        assert!(metadata_single(&json!({})).is_none());
    }
}
