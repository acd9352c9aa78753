//! Sender certificates for sealed delivery
//!
//! A sealed message carries a sender certificate so the recipient can learn
//! who sent it even though the transport could not. The chain is two levels
//! deep: the trust root signs a server certificate, and the server key signs
//! the sender certificate.

use serde::{Deserialize, Serialize};

use crate::{
    error::{CertificateError, CryptoError},
    keys::{IdentityKey, IdentityKeyPair, SIGNATURE_SIZE},
};

/// Intermediate certificate binding a server signing key to a key id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCertificate {
    /// Server key id, used to report which certificate failed
    pub key_id: u32,
    /// Key that signs sender certificates
    pub key: IdentityKey,
    /// Trust root signature over `key_id || key`
    #[serde(with = "serde_bytes")]
    pub signature: [u8; SIGNATURE_SIZE],
}

impl ServerCertificate {
    /// Issue a server certificate signed by the trust root.
    pub fn issue(
        trust_root: &IdentityKeyPair,
        key_id: u32,
        key: IdentityKey,
    ) -> Result<Self, CryptoError> {
        let signature = trust_root.sign(&Self::signed_bytes(key_id, &key))?;
        Ok(Self { key_id, key, signature })
    }

    fn signed_bytes(key_id: u32, key: &IdentityKey) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + key.as_bytes().len());
        bytes.extend_from_slice(&key_id.to_be_bytes());
        bytes.extend_from_slice(key.as_bytes());
        bytes
    }

    fn verify(&self, trust_root: &IdentityKey) -> Result<(), CertificateError> {
        trust_root
            .verify(&Self::signed_bytes(self.key_id, &self.key), &self.signature)
            .map_err(|_| CertificateError::UntrustedServer { key_id: self.key_id })
    }
}

/// Certificate identifying the local account as a sealed sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderCertificate {
    /// Account identifier of the sender
    pub sender: String,
    /// Sending device id
    pub sender_device: u32,
    /// Expiry (unix millis); the certificate is rejected after this instant
    pub expires_at_millis: u64,
    /// Sender identity key
    pub identity_key: IdentityKey,
    /// Server certificate whose key signed this certificate
    pub signer: ServerCertificate,
    /// Server signature over the certificate fields
    #[serde(with = "serde_bytes")]
    pub signature: [u8; SIGNATURE_SIZE],
}

impl SenderCertificate {
    /// Issue a sender certificate signed by `server_key`.
    ///
    /// `server_key` must be the private half of `signer.key`; a mismatch is
    /// only detected at validation time.
    pub fn issue(
        server_key: &IdentityKeyPair,
        signer: ServerCertificate,
        sender: impl Into<String>,
        sender_device: u32,
        expires_at_millis: u64,
        identity_key: IdentityKey,
    ) -> Result<Self, CryptoError> {
        let sender = sender.into();
        let signature = server_key.sign(&Self::signed_bytes(
            &sender,
            sender_device,
            expires_at_millis,
            &identity_key,
        ))?;

        Ok(Self { sender, sender_device, expires_at_millis, identity_key, signer, signature })
    }

    fn signed_bytes(
        sender: &str,
        sender_device: u32,
        expires_at_millis: u64,
        identity_key: &IdentityKey,
    ) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + sender.len() + 4 + 8 + 32);
        bytes.extend_from_slice(&(sender.len() as u32).to_be_bytes());
        bytes.extend_from_slice(sender.as_bytes());
        bytes.extend_from_slice(&sender_device.to_be_bytes());
        bytes.extend_from_slice(&expires_at_millis.to_be_bytes());
        bytes.extend_from_slice(identity_key.as_bytes());
        bytes
    }

    /// Validate the full chain against `trust_root` at `now_millis`.
    ///
    /// Checks, in order: the trust root signed the server certificate, the
    /// server key signed this certificate, and the certificate has not
    /// expired.
    pub fn validate(
        &self,
        trust_root: &IdentityKey,
        now_millis: u64,
    ) -> Result<(), CertificateError> {
        self.signer.verify(trust_root)?;

        let signed = Self::signed_bytes(
            &self.sender,
            self.sender_device,
            self.expires_at_millis,
            &self.identity_key,
        );
        self.signer
            .key
            .verify(&signed, &self.signature)
            .map_err(|_| CertificateError::InvalidSenderSignature)?;

        if now_millis > self.expires_at_millis {
            return Err(CertificateError::Expired {
                expires_at_millis: self.expires_at_millis,
                now_millis,
            });
        }

        Ok(())
    }

    /// Encode as CBOR for caching.
    pub fn encode(&self) -> Result<Vec<u8>, CryptoError> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|e| CryptoError::Codec(e.to_string()))?;
        Ok(bytes)
    }

    /// Decode a cached certificate.
    pub fn decode(bytes: &[u8]) -> Result<Self, CertificateError> {
        ciborium::de::from_reader(bytes).map_err(|e| CertificateError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Chain {
        root: IdentityKeyPair,
        server: IdentityKeyPair,
        sender: IdentityKeyPair,
    }

    fn chain() -> Chain {
        Chain {
            root: IdentityKeyPair::from_seed([1u8; 32]),
            server: IdentityKeyPair::from_seed([2u8; 32]),
            sender: IdentityKeyPair::from_seed([3u8; 32]),
        }
    }

    fn issue(chain: &Chain, expires_at_millis: u64) -> SenderCertificate {
        let server_cert =
            ServerCertificate::issue(&chain.root, 7, chain.server.public_key()).unwrap();
        SenderCertificate::issue(
            &chain.server,
            server_cert,
            "alice",
            1,
            expires_at_millis,
            chain.sender.public_key(),
        )
        .unwrap()
    }

    #[test]
    fn valid_chain_validates() {
        let chain = chain();
        let cert = issue(&chain, 1_000);

        assert_eq!(cert.validate(&chain.root.public_key(), 1_000), Ok(()));
    }

    #[test]
    fn wrong_trust_root_is_untrusted_server() {
        let chain = chain();
        let cert = issue(&chain, 1_000);
        let other_root = IdentityKeyPair::from_seed([9u8; 32]).public_key();

        assert_eq!(
            cert.validate(&other_root, 0),
            Err(CertificateError::UntrustedServer { key_id: 7 })
        );
    }

    #[test]
    fn tampered_sender_is_rejected() {
        let chain = chain();
        let mut cert = issue(&chain, 1_000);
        cert.sender = "mallory".to_string();

        assert_eq!(
            cert.validate(&chain.root.public_key(), 0),
            Err(CertificateError::InvalidSenderSignature)
        );
    }

    #[test]
    fn expired_certificate_is_rejected() {
        let chain = chain();
        let cert = issue(&chain, 1_000);

        assert_eq!(
            cert.validate(&chain.root.public_key(), 1_001),
            Err(CertificateError::Expired { expires_at_millis: 1_000, now_millis: 1_001 })
        );
    }

    #[test]
    fn encoded_certificate_still_validates() {
        let chain = chain();
        let cert = issue(&chain, 5_000);

        let decoded = SenderCertificate::decode(&cert.encode().unwrap()).unwrap();
        assert_eq!(decoded, cert);
        assert!(decoded.validate(&chain.root.public_key(), 10).is_ok());
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            SenderCertificate::decode(&[0xFF, 0x00, 0x13]),
            Err(CertificateError::Malformed(_))
        ));
    }
}
