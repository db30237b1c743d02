//! X.509 certificate parsing backed by `x509-parser`.

use crate::core::{CertificateParser, ParsedCertificate};
use chrono::{DateTime, Utc};
use thiserror::Error;
use x509_parser::prelude::*;

/// Errors raised while parsing a single certificate.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("malformed certificate: {0}")]
    Malformed(String),
    #[error("validity timestamp out of range: {0}")]
    InvalidValidity(i64),
}

/// Parses DER certificates and precertificates.
#[derive(Debug, Default, Clone, Copy)]
pub struct X509CertificateParser;

impl CertificateParser for X509CertificateParser {
    fn parse(&self, der: &[u8]) -> Result<ParsedCertificate, CertificateError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CertificateError::Malformed(e.to_string()))?;

        let common_name = first_common_name(cert.subject());
        let issuer_common_name = first_common_name(cert.issuer());

        let mut dns_names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    dns_names.push(dns.to_string());
                }
            }
        }

        Ok(ParsedCertificate {
            common_name,
            dns_names,
            issuer_common_name,
            not_before: to_utc(cert.validity().not_before.timestamp())?,
            not_after: to_utc(cert.validity().not_after.timestamp())?,
        })
    }
}

fn first_common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn to_utc(seconds: i64) -> Result<DateTime<Utc>, CertificateError> {
    DateTime::<Utc>::from_timestamp(seconds, 0).ok_or(CertificateError::InvalidValidity(seconds))
}
