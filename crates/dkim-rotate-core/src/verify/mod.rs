//! Propagation verification
//!
//! After a record is published, every DNS server configured for the domain is
//! asked for the TXT record and the answer is compared against the expected
//! DKIM tags. The record only counts as propagated when all servers agree.
//!
//! ## Matching Rules
//!
//! - Exactly one TXT record must be returned; more is ambiguous and fails
//! - Multi-segment answers (`"v=DKIM1; ..." "rest"`) are joined first
//! - Tags are compared as an unordered multiset of `tag=value` pairs
//! - Whitespace inside tag values is ignored (keys are often folded)
//! - A failed lookup fails that server
//! - No configured servers means there is nothing to verify

pub mod hickory;

pub use hickory::HickoryTxtLookup;

use std::sync::Arc;
use std::time::Duration;

use crate::traits::TxtLookup;

/// Checks that a TXT record is visible with the expected content
#[derive(Clone)]
pub struct PropagationVerifier {
    lookup: Arc<dyn TxtLookup>,
    timeout: Duration,
}

impl PropagationVerifier {
    /// Create a verifier; each lookup is bounded by `timeout`
    pub fn new(lookup: Arc<dyn TxtLookup>, timeout: Duration) -> Self {
        Self { lookup, timeout }
    }

    /// Whether every server in `servers` serves `expected` at `record_name`
    pub async fn verify(
        &self,
        record_name: &str,
        expected: &[(String, String)],
        servers: &[String],
    ) -> bool {
        if servers.is_empty() {
            tracing::debug!("No DNS servers configured for {}, skipping verification", record_name);
            return true;
        }

        let mut verified = true;
        for server in servers {
            // Query every server so each stale one is logged
            verified &= self.verify_server(record_name, expected, server).await;
        }
        verified
    }

    async fn verify_server(
        &self,
        record_name: &str,
        expected: &[(String, String)],
        server: &str,
    ) -> bool {
        let answers = match tokio::time::timeout(
            self.timeout,
            self.lookup.lookup_txt(server, record_name),
        )
        .await
        {
            Ok(Ok(answers)) => answers,
            Ok(Err(e)) => {
                tracing::error!("TXT lookup of {} at {} failed: {}", record_name, server, e);
                return false;
            }
            Err(_) => {
                tracing::error!(
                    "TXT lookup of {} at {} timed out after {}s",
                    record_name,
                    server,
                    self.timeout.as_secs()
                );
                return false;
            }
        };

        let answer = match answers.as_slice() {
            [answer] => answer,
            [] => {
                tracing::warn!("{} returned no TXT record for {}", server, record_name);
                return false;
            }
            _ => {
                tracing::warn!(
                    "{} returned {} TXT records for {}. There must only be one!",
                    server,
                    answers.len(),
                    record_name
                );
                return false;
            }
        };

        tracing::debug!("Received from {} TXT value {}", server, answer);
        let matches = tags_match(&parse_tags(answer), expected);
        if !matches {
            tracing::error!(
                "Answer from {} for {} differs from the published content",
                server,
                record_name
            );
        }
        matches
    }
}

/// Join the character-strings of a TXT answer
///
/// Accepts either the presentation form (`"abc" "def"`, with `\"` and `\\`
/// escapes) or an already joined value.
pub fn join_segments(answer: &str) -> String {
    let trimmed = answer.trim();
    if !trimmed.starts_with('"') {
        return trimmed.to_string();
    }

    let mut joined = String::with_capacity(trimmed.len());
    let mut in_quotes = false;
    let mut chars = trimmed.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    joined.push(escaped);
                }
            }
            _ if in_quotes => joined.push(c),
            _ => {}
        }
    }
    joined
}

/// Parse a DKIM TXT answer into `(tag, value)` pairs
///
/// Empty fields (e.g. after a trailing `;`) are skipped. A field without `=`
/// becomes a tag with an empty value so it still breaks the comparison.
pub fn parse_tags(answer: &str) -> Vec<(String, String)> {
    join_segments(answer)
        .split(';')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(|field| {
            let (tag, value) = field.split_once('=').unwrap_or((field, ""));
            let value: String = value.chars().filter(|c| !c.is_whitespace()).collect();
            (tag.trim().to_string(), value)
        })
        .collect()
}

/// Order-independent comparison; repeated tags must repeat on both sides
pub fn tags_match(found: &[(String, String)], expected: &[(String, String)]) -> bool {
    let mut found = found.to_vec();
    let mut expected = expected.to_vec();
    found.sort();
    expected.sort();
    found == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DkimRecord;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct Scripted(HashMap<String, Result<Vec<String>, String>>);

    #[async_trait]
    impl TxtLookup for Scripted {
        async fn lookup_txt(&self, server: &str, _name: &str) -> Result<Vec<String>, crate::Error> {
            match self.0.get(server) {
                Some(Ok(answers)) => Ok(answers.clone()),
                Some(Err(message)) => Err(crate::Error::lookup(message.clone())),
                None => Ok(vec![]),
            }
        }
    }

    fn verifier(answers: Vec<(&str, Result<Vec<String>, String>)>) -> PropagationVerifier {
        let map = answers
            .into_iter()
            .map(|(server, answer)| (server.to_string(), answer))
            .collect();
        PropagationVerifier::new(Arc::new(Scripted(map)), Duration::from_secs(5))
    }

    fn servers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    const NAME: &str = "202401._domainkey.example.com";

    #[test]
    fn test_join_segments() {
        assert_eq!(join_segments("\"v=DKIM1; p=AB\" \"CD\""), "v=DKIM1; p=ABCD");
        assert_eq!(join_segments("v=DKIM1; p=ABCD"), "v=DKIM1; p=ABCD");
        assert_eq!(join_segments("\"a\\\"b\""), "a\"b");
    }

    #[test]
    fn test_tag_order_is_ignored() {
        let expected = DkimRecord::new("KEY").tags().to_vec();
        let found = parse_tags("p=KEY; s=email; k=rsa; h=sha256; v=DKIM1;");
        assert!(tags_match(&found, &expected));
    }

    #[test]
    fn test_differing_value_or_count_fails() {
        let expected = DkimRecord::new("KEY").tags().to_vec();
        assert!(!tags_match(
            &parse_tags("v=DKIM1; h=sha256; k=rsa; s=email; p=OTHER"),
            &expected
        ));
        assert!(!tags_match(
            &parse_tags("v=DKIM1; h=sha256; k=rsa; p=KEY"),
            &expected
        ));
        assert!(!tags_match(
            &parse_tags("v=DKIM1; h=sha256; k=rsa; s=email; p=KEY; t=y"),
            &expected
        ));
    }

    #[tokio::test]
    async fn test_no_servers_passes() {
        let expected = DkimRecord::new("KEY").tags().to_vec();
        assert!(verifier(vec![]).verify(NAME, &expected, &[]).await);
    }

    #[tokio::test]
    async fn test_chunked_answer_passes() {
        let expected = DkimRecord::new("KEYPART1KEYPART2").tags().to_vec();
        let v = verifier(vec![(
            "ns1",
            Ok(vec![
                "\"v=DKIM1; h=sha256; k=rsa; s=email; p=KEYPART1\" \"KEYPART2\"".to_string(),
            ]),
        )]);
        assert!(v.verify(NAME, &expected, &servers(&["ns1"])).await);
    }

    #[tokio::test]
    async fn test_multiple_records_fail() {
        let expected = DkimRecord::new("KEY").tags().to_vec();
        let content = DkimRecord::new("KEY").to_txt();
        let v = verifier(vec![("ns1", Ok(vec![content.clone(), content]))]);
        assert!(!v.verify(NAME, &expected, &servers(&["ns1"])).await);
    }

    #[tokio::test]
    async fn test_one_stale_server_fails_all() {
        let expected = DkimRecord::new("KEY").tags().to_vec();
        let v = verifier(vec![
            ("ns1", Ok(vec![DkimRecord::new("KEY").to_txt()])),
            ("ns2", Ok(vec![DkimRecord::new("OLD").to_txt()])),
        ]);
        assert!(v.verify(NAME, &expected, &servers(&["ns1"])).await);
        assert!(!v.verify(NAME, &expected, &servers(&["ns1", "ns2"])).await);
    }

    #[tokio::test]
    async fn test_lookup_error_and_missing_record_fail() {
        let expected = DkimRecord::new("KEY").tags().to_vec();
        let v = verifier(vec![("ns1", Err("unreachable".to_string()))]);
        assert!(!v.verify(NAME, &expected, &servers(&["ns1"])).await);
        assert!(!v.verify(NAME, &expected, &servers(&["ns-empty"])).await);
    }
}
