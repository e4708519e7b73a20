//! HTTP custom actions: outbound requests with an SSRF policy guard.

use std::net::IpAddr;

use url::{Host, Url};

use super::{render_template, ActionContext, ActionDecl};
use crate::{BlockError, Payload};

const HTTP_TIMEOUT_SECS: u64 = 30;
const MAX_BODY_BYTES: usize = 1024 * 1024;
const ERROR_EXCERPT_BYTES: usize = 200;

pub async fn run(
    decl: &ActionDecl,
    payload: &Payload,
    ctx: &ActionContext<'_>,
) -> Result<(), BlockError> {
    let url_template = decl
        .url
        .as_deref()
        .ok_or_else(|| BlockError::Validation("http action requires a url".to_string()))?;

    let url = render_template(url_template, payload)?;
    check_ssrf(&url)?;

    let body = match decl.body.as_deref() {
        Some(tpl) => render_template(tpl, payload)?,
        None => String::new(),
    };
    if body.len() > MAX_BODY_BYTES {
        return Err(BlockError::Http(format!(
            "request body exceeds {MAX_BODY_BYTES} bytes"
        )));
    }

    let method = decl
        .method
        .as_deref()
        .unwrap_or("POST")
        .to_uppercase()
        .parse::<reqwest::Method>()
        .map_err(|_| {
            BlockError::Validation(format!(
                "invalid HTTP method: {}",
                decl.method.as_deref().unwrap_or_default()
            ))
        })?;

    let mut request = ctx
        .http
        .request(method, url.as_str())
        .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS));

    if !body.is_empty() {
        let trimmed = body.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            request = request.header(reqwest::header::CONTENT_TYPE, "application/json");
        }
        request = request.body(body);
    }

    let response = request.send().await?;
    let status = response.status();
    if status.as_u16() >= 400 {
        let text = response.text().await.unwrap_or_default();
        return Err(BlockError::Http(format!(
            "{status}: {}",
            byte_excerpt(&text, ERROR_EXCERPT_BYTES)
        )));
    }

    tracing::debug!(url = %url, status = %status, "http action delivered");
    Ok(())
}

/// Refuse URLs that could reach the server's own network: non-http(s)
/// schemes, localhost, loopback, RFC1918 private ranges, link-local, and
/// unspecified addresses. A hard failure, checked before any request is
/// issued.
pub fn check_ssrf(url_str: &str) -> Result<(), BlockError> {
    let url =
        Url::parse(url_str).map_err(|e| BlockError::Validation(format!("invalid url: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(BlockError::Ssrf(format!("scheme '{other}' is not allowed")));
        }
    }

    match url.host() {
        None => Err(BlockError::Ssrf("url has no host".to_string())),
        Some(Host::Domain(domain)) => {
            if domain.eq_ignore_ascii_case("localhost") {
                return Err(BlockError::Ssrf("localhost is not allowed".to_string()));
            }
            Ok(())
        }
        Some(Host::Ipv4(ip)) => check_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => match ip.to_ipv4_mapped() {
            Some(v4) => check_ip(IpAddr::V4(v4)),
            None => check_ip(IpAddr::V6(ip)),
        },
    }
}

fn check_ip(ip: IpAddr) -> Result<(), BlockError> {
    let blocked = match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || is_unique_local(v6),
    };
    if blocked {
        Err(BlockError::Ssrf(format!("address {ip} is not allowed")))
    } else {
        Ok(())
    }
}

fn is_unique_local(v6: std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

/// First `limit` bytes of `text`, cut at a char boundary.
fn byte_excerpt(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
