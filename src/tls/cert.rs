//! Peer certificate summaries
//!
//! Only the fields a client typically logs or asserts on are extracted.

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
}

#[cfg(feature = "openssl")]
mod from_openssl {
    use super::CertInfo;
    use openssl::nid::Nid;
    use openssl::x509::{X509NameRef, X509Ref};
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    impl CertInfo {
        /// Extract certificate information from an X.509 certificate
        pub fn from_x509(cert: &X509Ref) -> Self {
            CertInfo {
                subject: get_cn(cert.subject_name()),
                issuer: get_cn(cert.issuer_name()),
                subject_alt_names: get_subject_alt_names(cert),
            }
        }
    }

    /// Get Common Name from X509_NAME
    pub(super) fn get_cn(name: &X509NameRef) -> String {
        name.entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| entry.data().as_utf8().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "<undef>".to_string())
    }

    pub(super) fn get_subject_alt_names(cert: &X509Ref) -> Vec<String> {
        let mut names = Vec::new();

        if let Some(san_ext) = cert.subject_alt_names() {
            for name in san_ext {
                if let Some(dns) = name.dnsname() {
                    names.push(format!("DNS:{}", dns));
                } else if let Some(ip) = name.ipaddress() {
                    let addr = match ip.len() {
                        4 => IpAddr::V4(Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3])),
                        16 => {
                            let mut octets = [0u8; 16];
                            octets.copy_from_slice(ip);
                            IpAddr::V6(Ipv6Addr::from(octets))
                        }
                        _ => continue,
                    };
                    names.push(format!("IP:{}", addr));
                }
            }
        }

        names
    }

    /// Extract the peer certificate chain from an SSL connection
    ///
    /// On the client side OpenSSL's peer chain already starts with the leaf.
    pub fn get_cert_chain(ssl: &openssl::ssl::SslRef) -> Vec<CertInfo> {
        if let Some(chain) = ssl.peer_cert_chain() {
            return chain.iter().map(CertInfo::from_x509).collect();
        }

        ssl.peer_certificate()
            .map(|cert| vec![CertInfo::from_x509(&cert)])
            .unwrap_or_default()
    }
}

#[cfg(feature = "openssl")]
pub use from_openssl::get_cert_chain;
