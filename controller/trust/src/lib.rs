#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The certificate authority consumed by the synchronization engine.
//!
//! Root material is created (or loaded) once at startup and is read-only
//! afterwards; leaf issuance only reads it, so an `Authority` can be shared
//! across engine instances behind an `Arc`.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Validity of controller-issued serving certificates.
pub const LEAF_VALIDITY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Validity of a generated root certificate.
pub const ROOT_VALIDITY: Duration = Duration::from_secs(3000 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("failed to generate certificate: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A leaf certificate/key pair issued for one node name.
#[derive(Clone, Debug)]
pub struct Leaf {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Process-wide signing authority.
pub struct Authority {
    issuer: Issuer<'static, KeyPair>,
    root_cert_pem: String,
}

// === impl Authority ===

impl Authority {
    /// Generates a fresh self-signed root.
    pub fn generate(organization: &str) -> Result<Self, TrustError> {
        let key = KeyPair::generate()?;

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(2));
        params.use_authority_key_identifier_extension = true;
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::seconds(10);
        params.not_after =
            time::OffsetDateTime::now_utc() + time::Duration::seconds(ROOT_VALIDITY.as_secs() as i64);

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, organization);
        dn.push(DnType::OrganizationName, organization);
        params.distinguished_name = dn;

        let cert = params.self_signed(&key)?;
        let root_cert_pem = cert.pem();

        info!("generated new root certificate");

        Ok(Self {
            issuer: Issuer::new(params, key),
            root_cert_pem,
        })
    }

    /// Loads operator-supplied root material from PEM files.
    pub fn from_pem_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, TrustError> {
        let read = |path: &Path| {
            std::fs::read_to_string(path).map_err(|source| TrustError::Read {
                path: path.display().to_string(),
                source,
            })
        };
        let cert_pem = read(cert_path.as_ref())?;
        let key_pem = read(key_path.as_ref())?;

        info!(path = %cert_path.as_ref().display(), "loaded root certificate");

        Self::from_pem(&cert_pem, &key_pem)
    }

    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, TrustError> {
        let key = KeyPair::from_pem(key_pem)?;
        let issuer = Issuer::from_ca_cert_pem(cert_pem, key)?;
        Ok(Self {
            issuer,
            root_cert_pem: cert_pem.to_string(),
        })
    }

    /// Issues a short-lived serving certificate for the given names.
    ///
    /// Names may be DNS names or IP literals; both end up as subject
    /// alternative names. The leaf is valid for both server and client
    /// authentication so proxies can use it for mutual TLS.
    pub fn issue_leaf(&self, names: &[String], validity: Duration) -> Result<Leaf, TrustError> {
        let key = KeyPair::generate()?;

        let mut params = CertificateParams::new(names.to_vec())?;
        params.is_ca = IsCa::NoCa;
        params.use_authority_key_identifier_extension = true;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::seconds(10);
        params.not_after =
            time::OffsetDateTime::now_utc() + time::Duration::seconds(validity.as_secs() as i64);

        let mut dn = DistinguishedName::new();
        if let Some(name) = names.first() {
            dn.push(DnType::CommonName, name.clone());
        }
        params.distinguished_name = dn;

        let cert = params.signed_by(&key, &self.issuer)?;

        Ok(Leaf {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }

    pub fn root_cert_pem(&self) -> &str {
        &self.root_cert_pem
    }
}

impl std::fmt::Debug for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authority").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_issue() {
        let authority = Authority::generate("xds-controller").unwrap();
        assert!(authority.root_cert_pem().starts_with("-----BEGIN CERTIFICATE-----"));

        let leaf = authority
            .issue_leaf(&["svc-a".to_string(), "10.0.0.1".to_string()], LEAF_VALIDITY)
            .unwrap();
        assert!(leaf.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(leaf.key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn issued_leaves_have_distinct_keys() {
        let authority = Authority::generate("xds-controller").unwrap();
        let a = authority.issue_leaf(&["a".to_string()], LEAF_VALIDITY).unwrap();
        let b = authority.issue_leaf(&["a".to_string()], LEAF_VALIDITY).unwrap();
        assert_ne!(a.key_pem, b.key_pem);
        assert_ne!(a.cert_pem, b.cert_pem);
    }
}
