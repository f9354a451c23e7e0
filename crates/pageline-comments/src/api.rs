//! Comments endpoint: URL construction, reply classification, page source

use pageline_core::{FailureClass, HttpReply, HttpSettings, TransportError, build_client, get_text};
use serde::Deserialize;
use serde_json::Value;
use url::{ParseError, Url};

use crate::state::ItemId;

pub const DEFAULT_BASE_URL: &str = "https://feedback.minecraft.net";
pub const DEFAULT_USER_AGENT: &str = "MinecraftFeedbackResearch/1.0";
pub const PER_PAGE: u32 = 100;

/// One page of the comments listing
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CommentsPage {
    #[serde(default)]
    pub comments: Vec<Value>,
    #[serde(default)]
    pub next_page: Option<String>,
}

impl CommentsPage {
    /// Cursor for the following page; null or empty ends the walk.
    pub fn next_url(&self) -> Option<&str> {
        self.next_page.as_deref().filter(|u| !u.is_empty())
    }
}

/// First-page URL for an identifier, records in creation order.
///
/// The identifier is one percent-encoded path segment.
pub fn comments_url(base_url: &str, id: &ItemId, per_page: u32) -> Result<String, ParseError> {
    let mut url = Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|()| ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(["api", "v2", "community", "posts", &id.key(), "comments.json"]);
    url.query_pairs_mut()
        .append_pair("per_page", &per_page.to_string())
        .append_pair("sort_by", "created_at")
        .append_pair("sort_order", "asc");
    Ok(url.into())
}

/// Classified result of a single page request
#[derive(Debug, Clone, PartialEq)]
pub enum PageReply {
    Page(CommentsPage),
    NotFound,
    /// 403 or 429
    RateLimited(u16),
    /// Any other non-2xx status
    Status(u16),
    Transport(TransportError),
    /// 2xx with a body that is not a comments page
    Malformed(String),
}

impl PageReply {
    /// Backoff class for retryable replies; `None` for page/not-found.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::Page(_) | Self::NotFound => None,
            Self::RateLimited(_) => Some(FailureClass::RateLimited),
            Self::Status(_) => Some(FailureClass::ServerError),
            Self::Transport(e) => Some(e.class()),
            Self::Malformed(_) => Some(FailureClass::Unexpected),
        }
    }

    /// Short description for retry logs
    pub fn describe(&self) -> String {
        match self {
            Self::Page(p) => format!("{} records", p.comments.len()),
            Self::NotFound => "404".to_string(),
            Self::RateLimited(s) | Self::Status(s) => format!("HTTP {s}"),
            Self::Transport(e) => e.to_string(),
            Self::Malformed(m) => format!("unreadable body: {m}"),
        }
    }
}

/// Map a raw HTTP exchange to a `PageReply`.
pub fn classify_reply(reply: HttpReply) -> PageReply {
    if reply.is_success() {
        return match serde_json::from_str::<CommentsPage>(&reply.body) {
            Ok(page) => PageReply::Page(page),
            Err(e) => PageReply::Malformed(e.to_string()),
        };
    }
    match reply.status {
        404 => PageReply::NotFound,
        403 | 429 => PageReply::RateLimited(reply.status),
        status => PageReply::Status(status),
    }
}

/// Anything that can answer a page request
pub trait PageSource {
    fn get_page(&self, url: &str) -> PageReply;
}

impl<T: PageSource + ?Sized> PageSource for &T {
    fn get_page(&self, url: &str) -> PageReply {
        (**self).get_page(url)
    }
}

/// Live source backed by the shared reqwest client
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(settings: &HttpSettings) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(settings)?,
        })
    }
}

impl PageSource for HttpPageSource {
    fn get_page(&self, url: &str) -> PageReply {
        match get_text(&self.client, url) {
            Ok(reply) => classify_reply(reply),
            Err(e) => PageReply::Transport(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(status: u16, body: &str) -> HttpReply {
        HttpReply {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn url_shape() {
        assert_eq!(
            comments_url("https://feedback.minecraft.net/", &ItemId::Num(123), 100).unwrap(),
            "https://feedback.minecraft.net/api/v2/community/posts/123/comments.json?per_page=100&sort_by=created_at&sort_order=asc"
        );
        assert_eq!(
            comments_url("http://api.test", &ItemId::Num(7), 50).unwrap(),
            "http://api.test/api/v2/community/posts/7/comments.json?per_page=50&sort_by=created_at&sort_order=asc"
        );
    }

    #[test]
    fn text_id_is_one_path_segment() {
        let url = comments_url("http://api.test", &ItemId::from("a/b?c#d"), 100).unwrap();
        assert_eq!(
            url,
            "http://api.test/api/v2/community/posts/a%2Fb%3Fc%23d/comments.json?per_page=100&sort_by=created_at&sort_order=asc"
        );
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.path_segments().unwrap().count(), 6);
        assert!(parsed.fragment().is_none());
    }

    #[test]
    fn unusable_base_is_error() {
        assert!(comments_url("not a url", &ItemId::Num(1), 100).is_err());
        assert!(comments_url("mailto:x@y", &ItemId::Num(1), 100).is_err());
    }

    #[test]
    fn success_parses_page() {
        let r = classify_reply(reply(200, r#"{"comments": [{"id": 1}], "next_page": "http://x/2"}"#));
        let PageReply::Page(page) = r else {
            panic!("expected page, got {r:?}");
        };
        assert_eq!(page.comments.len(), 1);
        assert_eq!(page.next_url(), Some("http://x/2"));
    }

    #[test]
    fn missing_fields_default() {
        let PageReply::Page(page) = classify_reply(reply(200, "{}")) else {
            panic!("expected page");
        };
        assert!(page.comments.is_empty());
        assert_eq!(page.next_url(), None);
    }

    #[test]
    fn empty_cursor_ends_walk() {
        let page = CommentsPage {
            comments: vec![],
            next_page: Some(String::new()),
        };
        assert_eq!(page.next_url(), None);
    }

    #[test]
    fn status_classes() {
        assert_eq!(classify_reply(reply(404, "")), PageReply::NotFound);
        assert_eq!(classify_reply(reply(429, "")), PageReply::RateLimited(429));
        assert_eq!(classify_reply(reply(403, "")), PageReply::RateLimited(403));
        assert_eq!(classify_reply(reply(502, "")), PageReply::Status(502));
        assert_eq!(classify_reply(reply(400, "")), PageReply::Status(400));
    }

    #[test]
    fn malformed_body_is_unexpected() {
        let r = classify_reply(reply(200, "<html>"));
        assert!(matches!(r, PageReply::Malformed(_)));
        assert_eq!(r.failure_class(), Some(FailureClass::Unexpected));
    }

    #[test]
    fn failure_classes() {
        assert_eq!(PageReply::NotFound.failure_class(), None);
        assert_eq!(
            PageReply::Status(500).failure_class(),
            Some(FailureClass::ServerError)
        );
        assert_eq!(
            PageReply::Transport(TransportError::Timeout("t".into())).failure_class(),
            Some(FailureClass::Timeout)
        );
        assert_eq!(
            PageReply::Transport(TransportError::Connection("c".into())).failure_class(),
            Some(FailureClass::Connection)
        );
    }
}
