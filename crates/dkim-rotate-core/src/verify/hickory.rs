//! TXT lookups against a specific name server using hickory-resolver

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use std::net::IpAddr;
use std::time::Duration;

use crate::Error;
use crate::traits::TxtLookup;

/// Queries each server directly, bypassing the system resolver and caches
#[derive(Debug, Clone)]
pub struct HickoryTxtLookup {
    timeout: Duration,
}

impl HickoryTxtLookup {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn server_addresses(server: &str) -> Result<Vec<IpAddr>, Error> {
        if let Ok(ip) = server.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let addresses: Vec<IpAddr> = tokio::net::lookup_host((server, 53))
            .await
            .map_err(|e| Error::lookup(format!("Cannot resolve DNS server {}: {}", server, e)))?
            .map(|addr| addr.ip())
            .collect();

        if addresses.is_empty() {
            return Err(Error::lookup(format!("DNS server {} has no address", server)));
        }
        Ok(addresses)
    }

    fn resolver(&self, addresses: &[IpAddr]) -> TokioAsyncResolver {
        let name_servers = NameServerConfigGroup::from_ips_clear(addresses, 53, true);
        let config = ResolverConfig::from_parts(None, vec![], name_servers);

        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 2;
        opts.cache_size = 0;

        TokioAsyncResolver::tokio(config, opts)
    }
}

#[async_trait]
impl TxtLookup for HickoryTxtLookup {
    async fn lookup_txt(&self, server: &str, name: &str) -> Result<Vec<String>, Error> {
        let addresses = Self::server_addresses(server).await?;
        let resolver = self.resolver(&addresses);

        match resolver.txt_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    txt.txt_data()
                        .iter()
                        .map(|segment| String::from_utf8_lossy(segment).into_owned())
                        .collect::<String>()
                })
                .collect()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(vec![]),
                _ => Err(Error::lookup(format!(
                    "TXT lookup of {} at {} failed: {}",
                    name, server, e
                ))),
            },
        }
    }
}
