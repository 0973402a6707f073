use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::Serialize;

/// Network context of a span. Service names are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipv4: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipv6: Option<Ipv6Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
}

impl Endpoint {
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::default()
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4
    }

    pub fn ipv6(&self) -> Option<Ipv6Addr> {
        self.ipv6
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn is_empty(&self) -> bool {
        self.service_name.is_none()
            && self.ipv4.is_none()
            && self.ipv6.is_none()
            && self.port.is_none()
    }

    pub fn to_builder(&self) -> EndpointBuilder {
        EndpointBuilder {
            inner: self.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EndpointBuilder {
    inner: Endpoint,
}

impl EndpointBuilder {
    pub fn service_name(&mut self, name: impl AsRef<str>) -> &mut Self {
        let name = name.as_ref().trim();
        self.inner.service_name = (!name.is_empty()).then(|| name.to_lowercase());
        self
    }

    /// Sets the address when `ip` is an IP literal; anything else (host
    /// names, placeholders) leaves the address unset.
    pub fn ip(&mut self, ip: &str) -> &mut Self {
        match ip.trim().parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => self.inner.ipv4 = Some(v4),
            Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
                Some(v4) => self.inner.ipv4 = Some(v4),
                None => self.inner.ipv6 = Some(v6),
            },
            Err(_) => {}
        }
        self
    }

    pub fn port(&mut self, port: u16) -> &mut Self {
        self.inner.port = (port != 0).then_some(port);
        self
    }

    pub fn build(&self) -> Endpoint {
        self.inner.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_service_and_ignores_non_ip_hosts() {
        let ep = Endpoint::builder()
            .service_name("Frontend")
            .ip("db.internal")
            .port(0)
            .build();
        assert_eq!(ep.service_name(), Some("frontend"));
        assert_eq!(ep.ipv4(), None);
        assert_eq!(ep.port(), None);
    }

    #[test]
    fn maps_ipv4_in_ipv6() {
        let ep = Endpoint::builder().ip("::ffff:10.0.0.7").port(5432).build();
        assert_eq!(ep.ipv4(), Some(Ipv4Addr::new(10, 0, 0, 7)));
        assert_eq!(ep.ipv6(), None);
        assert_eq!(ep.port(), Some(5432));
    }

    #[test]
    fn blank_endpoint_is_empty() {
        assert!(Endpoint::builder().service_name("  ").build().is_empty());
    }
}
