//! Reading inbound form submissions.
//!
//! Inference requests arrive as `multipart/form-data` (with images) or as
//! urlencoded forms. Anything unreadable degrades to an empty form so the
//! module still receives the request.

use axum::extract::{Form, FromRequest, Multipart, Request};
use axum::http::header;
use reqwest::multipart::Part;
use tracing::debug;

use crate::queue::{RequestFormFile, RequestPayload};

/// Fields and files of one submission, in the order they were sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundForm {
    /// Plain fields.
    pub fields: Vec<(String, String)>,
    /// Uploaded files.
    pub files: Vec<RequestFormFile>,
}

impl InboundForm {
    /// Reads the body of `request` according to its content type.
    pub async fn read(request: Request) -> Self {
        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            match Multipart::from_request(request, &()).await {
                Ok(multipart) => Self::read_multipart(multipart).await,
                Err(e) => {
                    debug!(error = %e, "Unreadable multipart body");
                    Self::default()
                }
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            match Form::<Vec<(String, String)>>::from_request(request, &()).await {
                Ok(Form(fields)) => Self {
                    fields,
                    files: Vec::new(),
                },
                Err(e) => {
                    debug!(error = %e, "Unreadable form body");
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    async fn read_multipart(mut multipart: Multipart) -> Self {
        let mut form = Self::default();
        loop {
            let field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Multipart body cut short");
                    break;
                }
            };

            let name = field.name().unwrap_or_default().to_owned();
            if let Some(filename) = field.file_name().map(ToOwned::to_owned) {
                let content_type = field.content_type().map(ToOwned::to_owned);
                match field.bytes().await {
                    Ok(data) => {
                        let mut file = RequestFormFile::new(name, filename, data.to_vec());
                        if let Some(content_type) = content_type {
                            file = file.with_content_type(content_type);
                        }
                        form.files.push(file);
                    }
                    Err(e) => {
                        debug!(error = %e, "Unreadable file field");
                        break;
                    }
                }
            } else {
                match field.text().await {
                    Ok(value) => form.fields.push((name, value)),
                    Err(e) => {
                        debug!(error = %e, "Unreadable form field");
                        break;
                    }
                }
            }
        }
        form
    }

    /// Copies fields and files into `payload`.
    pub fn fill(&self, payload: &mut RequestPayload) {
        payload.extend_values(self.fields.iter().cloned());
        for file in &self.files {
            payload.add_file(file.clone());
        }
    }

    /// Rebuilds the submission for forwarding to a peer.
    #[must_use]
    pub fn to_multipart(&self) -> reqwest::multipart::Form {
        let mut out = reqwest::multipart::Form::new();
        for (name, value) in &self.fields {
            out = out.text(name.clone(), value.clone());
        }
        for file in &self.files {
            out = out.part(file.name.clone(), file_part(file));
        }
        out
    }
}

fn file_part(file: &RequestFormFile) -> Part {
    let part = || Part::bytes(file.data.clone()).file_name(file.filename.clone());
    match file.content_type.as_deref() {
        Some(content_type) => part().mime_str(content_type).unwrap_or_else(|_| part()),
        None => part(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[tokio::test]
    async fn urlencoded_fields_keep_order() {
        let request = Request::builder()
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("min_confidence=0.4&label=a&label=b"))
            .unwrap();

        let form = InboundForm::read(request).await;
        assert_eq!(form.fields.len(), 3);

        let mut payload = RequestPayload::new("detect");
        form.fill(&mut payload);
        assert_eq!(payload.values("label").unwrap(), ["a", "b"]);
        assert_eq!(payload.parse_value::<f32>("min_confidence"), Some(0.4));
    }

    #[tokio::test]
    async fn multipart_files_are_captured() {
        let body = "--XYZ\r\n\
Content-Disposition: form-data; name=\"min_confidence\"\r\n\r\n\
0.5\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"image\"; filename=\"cat.jpg\"\r\n\
Content-Type: image/jpeg\r\n\r\n\
JPEGDATA\r\n\
--XYZ--\r\n";
        let request = Request::builder()
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XYZ")
            .body(Body::from(body))
            .unwrap();

        let form = InboundForm::read(request).await;
        assert_eq!(form.fields, vec![("min_confidence".to_string(), "0.5".to_string())]);
        assert_eq!(form.files[0].filename, "cat.jpg");
        assert_eq!(form.files[0].data, b"JPEGDATA");
        assert_eq!(form.files[0].content_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn garbage_degrades_to_empty() {
        let request = Request::builder()
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XYZ")
            .body(Body::from("not multipart at all"))
            .unwrap();

        assert_eq!(InboundForm::read(request).await, InboundForm::default());
    }
}
