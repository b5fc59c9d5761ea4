//! DKIM TXT record model
//!
//! A DKIM public key is published as a TXT record at
//! `<selector>._domainkey.<domain>` with the tag list
//! `v=DKIM1; h=sha256; k=rsa; s=email; p=<base64 key>`.

/// Build the DNS name a DKIM record for `selector` lives at
pub fn record_name(selector: &str, domain: &str) -> String {
    format!("{}._domainkey.{}", selector, domain)
}

/// Tag list of a DKIM key record, in publication order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DkimRecord {
    tags: Vec<(String, String)>,
}

impl DkimRecord {
    /// RSA/SHA-256 email key record for `public_key` (base64, unchunked)
    pub fn new(public_key: &str) -> Self {
        let tags = [
            ("v", "DKIM1"),
            ("h", "sha256"),
            ("k", "rsa"),
            ("s", "email"),
            ("p", public_key),
        ]
        .into_iter()
        .map(|(tag, value)| (tag.to_string(), value.to_string()))
        .collect();

        Self { tags }
    }

    /// Ordered `(tag, value)` pairs
    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    /// Render as TXT content, `tag=value` pairs joined by `"; "`
    pub fn to_txt(&self) -> String {
        self.tags
            .iter()
            .map(|(tag, value)| format!("{}={}", tag, value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Render with the key given in chunked (quoted segment) form
    ///
    /// Providers that take zone-file style values publish this instead of
    /// [`DkimRecord::to_txt`]. The tag prefix becomes its own quoted segment.
    pub fn to_chunked_txt(&self, chunked_key: &str) -> String {
        let prefix = self
            .tags
            .iter()
            .filter(|(tag, _)| tag != "p")
            .map(|(tag, value)| format!("{}={}; ", tag, value))
            .collect::<String>();

        format!("\"{}p=\" {}", prefix, chunked_key)
    }
}
