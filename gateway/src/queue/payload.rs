//! Request payloads handed to analysis modules.
//!
//! A payload mirrors an HTML form submission: an optional command, ordered
//! multi-valued fields, uploaded files and any URL segments that trailed the
//! matched route. The JSON shape is what module workers already understand,
//! so field names are fixed.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// A single form field with all of its values, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadValue {
    /// Field name.
    #[serde(rename = "Key")]
    pub key: String,
    /// Field values.
    #[serde(rename = "Value")]
    pub values: Vec<String>,
}

/// A file uploaded with the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFormFile {
    /// Form field name the file was posted under.
    pub name: String,
    /// Original file name.
    pub filename: String,
    /// MIME type reported by the client.
    pub content_type: Option<String>,
    /// Raw file content, base64 on the wire.
    #[serde(
        default,
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64"
    )]
    pub data: Vec<u8>,
}

impl RequestFormFile {
    /// Creates a file attachment.
    #[must_use]
    pub fn new(name: impl Into<String>, filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            filename: filename.into(),
            content_type: None,
            data,
        }
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Everything a module needs to process one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// Command the module should run.
    pub command: Option<String>,
    /// Query string and form values.
    #[serde(default)]
    pub values: Vec<PayloadValue>,
    /// Uploaded files.
    #[serde(default)]
    pub files: Vec<RequestFormFile>,
    /// Path segments after the matched route.
    #[serde(default)]
    pub url_segments: Vec<String>,
}

impl RequestPayload {
    /// Creates an empty payload for the given command.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    /// Sets the trailing URL segments.
    #[must_use]
    pub fn with_url_segments(mut self, segments: Vec<String>) -> Self {
        self.url_segments = segments;
        self
    }

    /// Appends name/value pairs, grouping repeated names under one field.
    pub fn extend_values<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in pairs {
            self.set_value(key, value, false);
        }
    }

    /// Sets a field value.
    ///
    /// With `overwrite` the field is replaced by the single value; otherwise the
    /// value is appended to the existing ones. Field order is preserved.
    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>, overwrite: bool) {
        let key = key.into();
        let value = value.into();

        match self.values.iter_mut().find(|pair| pair.key == key) {
            Some(pair) if overwrite => pair.values = vec![value],
            Some(pair) => pair.values.push(value),
            None => self.values.push(PayloadValue {
                key,
                values: vec![value],
            }),
        }
    }

    /// Returns the first value of a field.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values(key).and_then(|values| values.first()).map(String::as_str)
    }

    /// Returns all values of a field.
    #[must_use]
    pub fn values(&self, key: &str) -> Option<&[String]> {
        self.values
            .iter()
            .find(|pair| pair.key == key)
            .map(|pair| pair.values.as_slice())
    }

    /// Parses the first value of a field.
    ///
    /// Returns `None` when the field is missing or does not parse.
    #[must_use]
    pub fn parse_value<T: FromStr>(&self, key: &str) -> Option<T> {
        self.value(key).and_then(|value| value.trim().parse().ok())
    }

    /// Adds a file attachment.
    pub fn add_file(&mut self, file: RequestFormFile) {
        self.files.push(file);
    }

    /// Returns the first file posted under `name`.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<&RequestFormFile> {
        self.files.iter().find(|file| file.name == name)
    }

    /// Returns the file at `index`.
    #[must_use]
    pub fn file_at(&self, index: usize) -> Option<&RequestFormFile> {
        self.files.get(index)
    }
}

fn serialize_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = Option::<String>::deserialize(deserializer)?;
    match encoded {
        Some(text) => STANDARD.decode(text).map_err(serde::de::Error::custom),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_value_appends_or_overwrites_in_place() {
        let mut payload = RequestPayload::new("detect");
        payload.set_value("min_confidence", "0.4", true);
        payload.set_value("label", "cat", false);
        payload.set_value("label", "dog", false);
        payload.set_value("min_confidence", "0.6", true);

        assert_eq!(payload.values[0].key, "min_confidence");
        assert_eq!(payload.value("min_confidence"), Some("0.6"));
        assert_eq!(
            payload.values("label"),
            Some(&["cat".to_string(), "dog".to_string()][..])
        );
    }

    #[test]
    fn parse_value_handles_numbers_and_bools() {
        let mut payload = RequestPayload::default();
        payload.extend_values([("count", "3"), ("ratio", "0.25"), ("flag", "true")]);

        assert_eq!(payload.parse_value::<i32>("count"), Some(3));
        assert_eq!(payload.parse_value::<f32>("ratio"), Some(0.25));
        assert_eq!(payload.parse_value::<bool>("flag"), Some(true));
        assert_eq!(payload.parse_value::<i32>("ratio"), None);
        assert_eq!(payload.parse_value::<i32>("missing"), None);
    }

    #[test]
    fn serializes_in_worker_wire_format() {
        let mut payload = RequestPayload::new("detect").with_url_segments(vec!["extra".into()]);
        payload.set_value("moduleId", "yolo", true);
        payload.add_file(
            RequestFormFile::new("image", "cat.jpg", vec![1, 2, 3]).with_content_type("image/jpeg"),
        );

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["command"], "detect");
        assert_eq!(json["values"][0]["Key"], "moduleId");
        assert_eq!(json["values"][0]["Value"][0], "yolo");
        assert_eq!(json["files"][0]["contentType"], "image/jpeg");
        assert_eq!(json["files"][0]["data"], "AQID");
        assert_eq!(json["urlSegments"][0], "extra");

        let back: RequestPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.file("image").map(|f| f.data.clone()), Some(vec![1, 2, 3]));
    }
}
