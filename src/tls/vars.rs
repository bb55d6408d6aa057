//! Negotiated session parameters
//!
//! Populated by the engine once the handshake completes and exposed through
//! [`TlsSession::info`](super::TlsSession::info).

use super::cert::CertInfo;

const UNDEF: &str = "<undef>";

/// Connection parameters available after the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI servername sent to the peer
    pub servername: Option<String>,

    /// Negotiated ALPN protocol
    pub alpn: Option<String>,

    /// Certificate chain (index 0 is peer cert)
    pub cert_chain: Vec<CertInfo>,
}

impl SessionInfo {
    /// Collect session parameters from an SSL connection
    #[cfg(feature = "openssl")]
    pub fn from_ssl(ssl: &openssl::ssl::SslRef) -> Self {
        SessionInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| UNDEF.to_string()),
            servername: ssl
                .servername(openssl::ssl::NameType::HOST_NAME)
                .map(|s| s.to_string()),
            alpn: ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).to_string()),
            cert_chain: super::cert::get_cert_chain(ssl),
        }
    }

    /// Get certificate info by index (0 = peer cert, 1+ = chain)
    pub fn cert(&self, index: usize) -> Option<&CertInfo> {
        self.cert_chain.get(index)
    }

    /// Look up a variable by name
    ///
    /// Recognizes `tls.version`, `tls.cipher`, `tls.servername`, `tls.alpn`
    /// and `tls.cert[N].subject|issuer|subject_alt_names`. Unset values read
    /// as `<undef>`; unknown names and missing certificates as `None`.
    pub fn get(&self, name: &str) -> Option<String> {
        let value = match parse_var(name)? {
            Var::Version => self.version.clone(),
            Var::Cipher => self.cipher.clone(),
            Var::Servername => self.servername.clone().unwrap_or_else(|| UNDEF.to_string()),
            Var::Alpn => self.alpn.clone().unwrap_or_else(|| UNDEF.to_string()),
            Var::Cert(index, field) => {
                let cert = self.cert(index)?;
                match field {
                    CertField::Subject => cert.subject.clone(),
                    CertField::Issuer => cert.issuer.clone(),
                    CertField::AltNames if cert.subject_alt_names.is_empty() => UNDEF.to_string(),
                    CertField::AltNames => cert.subject_alt_names.join(", "),
                }
            }
        };
        Some(value)
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        SessionInfo {
            version: UNDEF.to_string(),
            cipher: UNDEF.to_string(),
            servername: None,
            alpn: None,
            cert_chain: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CertField {
    Subject,
    Issuer,
    AltNames,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Var {
    Version,
    Cipher,
    Servername,
    Alpn,
    Cert(usize, CertField),
}

fn parse_var(name: &str) -> Option<Var> {
    let var = match name.strip_prefix("tls.")? {
        "version" => Var::Version,
        "cipher" => Var::Cipher,
        "servername" => Var::Servername,
        "alpn" => Var::Alpn,
        other => {
            // cert.<field> is the peer cert, certN.<field> walks the chain
            let (index, field) = other.strip_prefix("cert")?.split_once('.')?;
            let index = if index.is_empty() { 0 } else { index.parse().ok()? };
            let field = match field {
                "subject" => CertField::Subject,
                "issuer" => CertField::Issuer,
                "subject_alt_names" => CertField::AltNames,
                _ => return None,
            };
            Var::Cert(index, field)
        }
    };
    Some(var)
}
