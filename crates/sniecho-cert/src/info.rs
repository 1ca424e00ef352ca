//! Parsed view of a leaf certificate

use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::public_key::PublicKey;

use crate::CertError;

/// Key usage bits relevant to a TLS server certificate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyUsageFlags {
    pub digital_signature: bool,
    pub key_agreement: bool,
    pub key_encipherment: bool,
}

/// Identity attributes of a certificate, extracted once so handshakes and
/// logs never need to re-parse the DER
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub common_name: Option<String>,
    pub dns_names: Vec<String>,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub is_ca: bool,
    pub basic_constraints_present: bool,
    pub key_usage: KeyUsageFlags,
    pub server_auth: bool,
    pub client_auth: bool,
    /// Serial number in lowercase hex
    pub serial: String,
    pub self_issued: bool,
    pub public_key_algorithm: &'static str,
    pub public_key_bits: Option<usize>,
}

impl CertificateInfo {
    pub fn from_der(der: &[u8]) -> Result<Self, CertError> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| CertError::Parse(e.to_string()))?;

        Self::from_x509(&cert)
    }

    fn from_x509(cert: &X509Certificate<'_>) -> Result<Self, CertError> {
        let parse_err = |e: x509_parser::error::X509Error| CertError::Parse(e.to_string());

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_owned);

        let dns_names = match cert.subject_alternative_name().map_err(parse_err)? {
            Some(san) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            None => Vec::new(),
        };

        let basic_constraints = cert.basic_constraints().map_err(parse_err)?;
        let key_usage = cert
            .key_usage()
            .map_err(parse_err)?
            .map(|ku| KeyUsageFlags {
                digital_signature: ku.value.digital_signature(),
                key_agreement: ku.value.key_agreement(),
                key_encipherment: ku.value.key_encipherment(),
            })
            .unwrap_or_default();
        let (server_auth, client_auth) = cert
            .extended_key_usage()
            .map_err(parse_err)?
            .map(|eku| (eku.value.server_auth, eku.value.client_auth))
            .unwrap_or((false, false));

        let (public_key_algorithm, public_key_bits) = match cert.public_key().parsed() {
            Ok(PublicKey::RSA(rsa)) => ("RSA", Some(rsa.key_size())),
            Ok(PublicKey::EC(point)) => ("EC", Some(point.key_size())),
            _ => ("other", None),
        };

        Ok(Self {
            subject: cert.subject().to_string(),
            common_name,
            dns_names,
            not_before: asn1_to_datetime(cert.validity().not_before.timestamp())?,
            not_after: asn1_to_datetime(cert.validity().not_after.timestamp())?,
            is_ca: basic_constraints.as_ref().is_some_and(|bc| bc.value.ca),
            basic_constraints_present: basic_constraints.is_some(),
            key_usage,
            server_auth,
            client_auth,
            serial: cert.tbs_certificate.serial.to_str_radix(16),
            self_issued: cert.subject().as_raw() == cert.issuer().as_raw(),
            public_key_algorithm,
            public_key_bits,
        })
    }

    /// Whether the current time falls inside the validity window
    pub fn is_current(&self) -> bool {
        self.is_valid_at(OffsetDateTime::now_utc())
    }

    fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.not_before <= now && now <= self.not_after
    }
}

fn asn1_to_datetime(timestamp: i64) -> Result<OffsetDateTime, CertError> {
    OffsetDateTime::from_unix_timestamp(timestamp).map_err(|e| CertError::Parse(e.to_string()))
}
