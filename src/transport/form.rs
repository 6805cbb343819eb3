//! Multipart form bodies.
//!
//! The detection service takes uploads as `multipart/form-data`. Parts keep
//! their insertion order on the wire.

use rand::RngCore;

use super::ImageUpload;

#[derive(Clone, Debug, PartialEq)]
pub struct FilePart {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
enum Part {
    Text { name: String, value: String },
    File { name: String, file: FilePart },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Form {
    parts: Vec<Part>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parts.push(Part::Text {
            name: name.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn file(mut self, name: &str, upload: &ImageUpload) -> Self {
        self.parts.push(Part::File {
            name: name.to_string(),
            file: FilePart {
                file_name: upload.file_name.clone(),
                content_type: upload.content_type.clone(),
                bytes: upload.bytes.clone(),
            },
        });
        self
    }

    /// Value of the first text field named `name`.
    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            Part::Text { name: n, value } if n == name => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn file_part(&self, name: &str) -> Option<&FilePart> {
        self.parts.iter().find_map(|part| match part {
            Part::File { name: n, file } if n == name => Some(file),
            _ => None,
        })
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.parts
            .iter()
            .map(|part| match part {
                Part::Text { name, .. } | Part::File { name, .. } => name.as_str(),
            })
            .collect()
    }

    pub fn content_type(boundary: &str) -> String {
        format!("multipart/form-data; boundary={boundary}")
    }

    pub fn encode(&self, boundary: &str) -> Vec<u8> {
        let mut body = Vec::new();
        for part in &self.parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match part {
                Part::Text { name, value } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            escape_quoted(name)
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                Part::File { name, file } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            escape_quoted(name),
                            escape_quoted(&file.file_name)
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(
                        format!("Content-Type: {}\r\n\r\n", file.content_type).as_bytes(),
                    );
                    body.extend_from_slice(&file.bytes);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body
    }
}

/// Random boundary; 16 bytes of entropy makes a collision with image data negligible.
pub fn new_boundary() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("parking-capture-{}", hex::encode(bytes))
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "%22")
        .replace(['\r', '\n'], " ")
}
