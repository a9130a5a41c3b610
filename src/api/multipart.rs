//! Minimal `multipart/form-data` decoding for image uploads.

use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Decoded form fields, in upload order.
#[derive(Clone, Debug, Default)]
pub struct Form {
    parts: Vec<FormPart>,
}

impl Form {
    pub fn parse(content_type: &str, body: &[u8]) -> Result<Self> {
        let boundary = boundary_from_content_type(content_type)?;
        Ok(Self {
            parts: parse_parts(&boundary, body)?,
        })
    }

    pub fn part(&self, name: &str) -> Option<&FormPart> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Text value of a field, trimmed. Non-UTF-8 values are an error.
    pub fn text(&self, name: &str) -> Result<Option<&str>> {
        match self.part(name) {
            Some(part) => std::str::from_utf8(&part.data)
                .map(|s| Some(s.trim()))
                .map_err(|_| anyhow!("form field '{}' is not valid UTF-8", name)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

fn boundary_from_content_type(content_type: &str) -> Result<String> {
    let mut params = content_type.split(';');
    let mime = params.next().unwrap_or("").trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return Err(anyhow!("expected multipart/form-data, got '{}'", mime));
    }
    for param in params {
        if let Some((k, v)) = param.split_once('=') {
            if k.trim().eq_ignore_ascii_case("boundary") {
                let boundary = v.trim().trim_matches('"');
                if boundary.is_empty() || boundary.len() > 70 {
                    return Err(anyhow!("invalid multipart boundary"));
                }
                return Ok(boundary.to_string());
            }
        }
    }
    Err(anyhow!("multipart content type is missing a boundary"))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

fn parse_parts(boundary: &str, body: &[u8]) -> Result<Vec<FormPart>> {
    let delimiter = format!("--{boundary}");
    let next_delimiter = format!("\r\n--{boundary}");
    let mut pos = find(body, delimiter.as_bytes(), 0)
        .ok_or_else(|| anyhow!("multipart body has no opening boundary"))?
        + delimiter.len();
    let mut parts = Vec::new();

    loop {
        if body[pos..].starts_with(b"--") {
            return Ok(parts);
        }
        if !body[pos..].starts_with(b"\r\n") {
            return Err(anyhow!("malformed multipart boundary line"));
        }
        pos += 2;

        let header_end = find(body, b"\r\n\r\n", pos)
            .ok_or_else(|| anyhow!("multipart part is missing its header terminator"))?;
        let headers = std::str::from_utf8(&body[pos..header_end])
            .map_err(|_| anyhow!("multipart headers are not valid UTF-8"))?;
        let data_start = header_end + 4;
        let data_end = find(body, next_delimiter.as_bytes(), data_start)
            .ok_or_else(|| anyhow!("multipart part is not terminated"))?;

        parts.push(part_from_headers(headers, body[data_start..data_end].to_vec())?);
        pos = data_end + next_delimiter.len();
    }
}

fn part_from_headers(headers: &str, data: Vec<u8>) -> Result<FormPart> {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                if let Some((k, v)) = param.split_once('=') {
                    let v = v.trim().trim_matches('"').to_string();
                    match k.trim() {
                        "name" => name = Some(v),
                        "filename" => filename = Some(v),
                        _ => {}
                    }
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }
    Ok(FormPart {
        name: name.ok_or_else(|| anyhow!("multipart part has no field name"))?,
        filename,
        content_type,
        data,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a multipart body from `(name, filename, data)` triples.
    pub(crate) fn build_body(boundary: &str, fields: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, data) in fields {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match filename {
                Some(filename) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: image/png\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                }
                None => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body
    }

    #[test]
    fn parses_file_and_text_fields() {
        let image = b"\x89PNG\r\n--not-a-boundary\r\n\x00\xff";
        let body = build_body(
            "XyZ123",
            &[
                ("file", Some("capture.png"), image),
                ("known_distance", None, b"30"),
            ],
        );
        let form = Form::parse("multipart/form-data; boundary=XyZ123", &body).unwrap();
        assert_eq!(form.len(), 2);
        let file = form.part("file").unwrap();
        assert_eq!(file.data, image.to_vec());
        assert_eq!(file.filename.as_deref(), Some("capture.png"));
        assert_eq!(file.content_type.as_deref(), Some("image/png"));
        assert_eq!(form.text("known_distance").unwrap(), Some("30"));
        assert_eq!(form.text("focal_length").unwrap(), None);
    }

    #[test]
    fn quoted_boundary_is_accepted() {
        let body = build_body("b", &[("session_id", None, b"kiosk")]);
        let form = Form::parse("Multipart/Form-Data; boundary=\"b\"", &body).unwrap();
        assert_eq!(form.text("session_id").unwrap(), Some("kiosk"));
    }

    #[test]
    fn rejects_wrong_content_type_and_truncated_bodies() {
        assert!(Form::parse("application/json", b"{}").is_err());
        assert!(Form::parse("multipart/form-data", b"").is_err());
        let body = build_body("b", &[("file", Some("x.png"), b"abc")]);
        let truncated = &body[..body.len() - 12];
        assert!(Form::parse("multipart/form-data; boundary=b", truncated).is_err());
    }

    #[test]
    fn empty_form_has_no_parts() {
        let form = Form::parse("multipart/form-data; boundary=b", b"--b--\r\n").unwrap();
        assert!(form.is_empty());
    }
}
