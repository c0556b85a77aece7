//! WebDAV multistatus (`207`) parsing
//!
//! Turns a `PROPFIND` response body into [`DavResource`]s. Element names are
//! matched on their local part, so any namespace prefix the server chooses
//! works. Hrefs are resolved against the user's files root and returned as
//! decoded, `/`-separated relative paths.

use chrono::{DateTime, Utc};
use oxisync_core::domain::{RemoteEntry, RemoteError};
use quick_xml::events::Event;
use quick_xml::Reader;

/// Properties requested by every listing
pub const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:prop>
    <d:displayname/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:getetag/>
    <d:getcontenttype/>
    <d:resourcetype/>
    <oc:checksums/>
  </d:prop>
</d:propfind>"#;

/// One `<d:response>` of a multistatus body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavResource {
    pub href: String,
    pub display_name: Option<String>,
    pub content_length: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Quotes stripped
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub is_collection: bool,
    /// Lowercase hex SHA-256 from `oc:checksums`, when offered
    pub sha256: Option<String>,
}

impl DavResource {
    /// Converts to a [`RemoteEntry`] at `path`
    pub fn into_entry(self, path: String) -> RemoteEntry {
        RemoteEntry {
            path,
            is_directory: self.is_collection,
            size: if self.is_collection {
                0
            } else {
                self.content_length.unwrap_or(0)
            },
            modified: self.last_modified.unwrap_or_else(Utc::now),
            content_hash: self.sha256,
            etag: self.etag,
            mime_type: self.content_type,
        }
    }
}

#[derive(Clone, Copy)]
enum Field {
    Href,
    DisplayName,
    ContentLength,
    LastModified,
    ETag,
    ContentType,
    Checksum,
}

fn field_for(local_name: &[u8]) -> Option<Field> {
    match local_name {
        b"href" => Some(Field::Href),
        b"displayname" => Some(Field::DisplayName),
        b"getcontentlength" => Some(Field::ContentLength),
        b"getlastmodified" => Some(Field::LastModified),
        b"getetag" => Some(Field::ETag),
        b"getcontenttype" => Some(Field::ContentType),
        b"checksum" => Some(Field::Checksum),
        _ => None,
    }
}

/// Parses a multistatus document
pub fn parse_multistatus(xml: &str) -> Result<Vec<DavResource>, RemoteError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut resources = Vec::new();
    let mut current: Option<DavResource> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"response" => current = Some(DavResource::default()),
                    b"collection" => {
                        if let Some(res) = current.as_mut() {
                            res.is_collection = true;
                        }
                    }
                    other => field = field_for(other),
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(res) = current.as_mut() {
                        res.is_collection = true;
                    }
                }
            }
            Ok(Event::Text(e)) => {
                let (Some(res), Some(f)) = (current.as_mut(), field) else {
                    continue;
                };
                let text = e
                    .unescape()
                    .map_err(|err| RemoteError::Protocol(format!("bad XML text: {err}")))?;
                apply(res, f, text.trim());
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"response" {
                    if let Some(res) = current.take() {
                        if !res.href.is_empty() {
                            resources.push(res);
                        }
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RemoteError::Protocol(format!(
                    "XML parse error at {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(resources)
}

fn apply(res: &mut DavResource, field: Field, text: &str) {
    match field {
        Field::Href => res.href = text.to_string(),
        Field::DisplayName => res.display_name = Some(text.to_string()),
        Field::ContentLength => res.content_length = text.parse().ok(),
        Field::LastModified => {
            res.last_modified = DateTime::parse_from_rfc2822(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        Field::ETag => {
            let etag = text.trim_start_matches("W/").trim_matches('"');
            if !etag.is_empty() {
                res.etag = Some(etag.to_string());
            }
        }
        Field::ContentType => res.content_type = Some(text.to_string()),
        Field::Checksum => {
            res.sha256 = text.split_whitespace().find_map(|c| {
                let (algo, value) = c.split_once(':')?;
                algo.eq_ignore_ascii_case("sha256")
                    .then(|| value.to_ascii_lowercase())
            })
        }
    }
}

/// Resolves an href against the decoded path of the files root.
///
/// Returns `None` for hrefs outside the root. The root itself maps to `""`.
pub fn relative_path(href: &str, root_path: &str) -> Option<String> {
    let href_path = match url::Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    let decoded = urlencoding::decode(&href_path).ok()?;
    let root = root_path.trim_end_matches('/');
    let rest = decoded.strip_prefix(root)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(rest.trim_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:response>
    <d:href>/dav/files/alice/Documents/</d:href>
    <d:propstat>
      <d:prop>
        <d:displayname>Documents</d:displayname>
        <d:getlastmodified>Tue, 05 Mar 2024 10:00:00 GMT</d:getlastmodified>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:getetag>"dir-etag"</d:getetag>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/files/alice/Documents/Q1%20plan.txt</d:href>
    <d:propstat>
      <d:prop>
        <d:displayname>Q1 plan.txt</d:displayname>
        <d:getcontentlength>1234</d:getcontentlength>
        <d:getlastmodified>Wed, 06 Mar 2024 08:30:00 GMT</d:getlastmodified>
        <d:getetag>"abc123"</d:getetag>
        <d:getcontenttype>text/plain</d:getcontenttype>
        <d:resourcetype/>
        <oc:checksums><oc:checksum>SHA1:0a0b MD5:ffee SHA256:ABCDEF01</oc:checksum></oc:checksums>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn parses_collections_and_files() {
        let res = parse_multistatus(LISTING).unwrap();
        assert_eq!(res.len(), 2);

        assert!(res[0].is_collection);
        assert_eq!(res[0].etag.as_deref(), Some("dir-etag"));

        let file = &res[1];
        assert!(!file.is_collection);
        assert_eq!(file.content_length, Some(1234));
        assert_eq!(file.etag.as_deref(), Some("abc123"));
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(file.sha256.as_deref(), Some("abcdef01"));
        assert_eq!(
            file.last_modified.unwrap().to_rfc3339(),
            "2024-03-06T08:30:00+00:00"
        );
    }

    #[test]
    fn other_prefixes_are_accepted() {
        let xml = r#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/x/</D:href>
            <D:propstat><D:prop><D:resourcetype><D:collection></D:collection></D:resourcetype></D:prop></D:propstat>
            </D:response></D:multistatus>"#;
        let res = parse_multistatus(xml).unwrap();
        assert_eq!(res.len(), 1);
        assert!(res[0].is_collection);
    }

    #[test]
    fn malformed_xml_is_protocol_error() {
        let err = parse_multistatus("<d:multistatus><d:response></d:multistatus>").unwrap_err();
        assert!(matches!(err, RemoteError::Protocol(_)));
    }

    #[test]
    fn relative_paths_are_decoded() {
        let root = "/dav/files/alice";
        assert_eq!(relative_path("/dav/files/alice/", root).as_deref(), Some(""));
        assert_eq!(
            relative_path("/dav/files/alice/Documents/Q1%20plan.txt", root).as_deref(),
            Some("Documents/Q1 plan.txt")
        );
        assert_eq!(
            relative_path("https://cloud.example.com/dav/files/alice/a/", root).as_deref(),
            Some("a")
        );
        assert_eq!(relative_path("/dav/files/alicia/x", root), None);
        assert_eq!(relative_path("/elsewhere", root), None);
    }
}
