//! Key material and recipients for tests.

use sealwire_core::{
    AccessMode, AccountSnapshot, DistributionId, PreKeyBundle, ProtocolAddress, RecipientId,
    RecipientSnapshot, Registration, SenderCertificateCache,
};
use sealwire_crypto::{
    IdentityKey, IdentityKeyPair, KeyPair, ProfileKey, SenderCertificate, ServerCertificate,
};

/// Trust root and server key able to issue sender certificates.
pub struct CertificateAuthority {
    root: IdentityKeyPair,
    server: IdentityKeyPair,
    server_key_id: u32,
}

impl CertificateAuthority {
    /// Authority whose keys derive from `seed`.
    pub fn new(seed: u8) -> Self {
        Self {
            root: IdentityKeyPair::from_seed([seed; 32]),
            server: IdentityKeyPair::from_seed([seed.wrapping_add(1); 32]),
            server_key_id: u32::from(seed),
        }
    }

    /// Public trust root.
    pub fn trust_root(&self) -> IdentityKey {
        self.root.public_key()
    }

    /// Encoded sender certificate for `sender` expiring at `expires_at_millis`.
    #[allow(clippy::expect_used)]
    pub fn issue(&self, sender: &ProtocolAddress, expires_at_millis: u64) -> Vec<u8> {
        let signer =
            ServerCertificate::issue(&self.root, self.server_key_id, self.server.public_key())
                .expect("signing with a valid key");
        let identity = IdentityKeyPair::from_seed([0xEE; 32]).public_key();
        SenderCertificate::issue(
            &self.server,
            signer,
            sender.name.clone(),
            sender.device_id,
            expires_at_millis,
            identity,
        )
        .and_then(|certificate| certificate.encode())
        .expect("signing with a valid key")
    }

    /// Validated certificate cache for `sender`.
    pub fn cache(
        &self,
        sender: &ProtocolAddress,
        expires_at_millis: u64,
        now_millis: u64,
    ) -> SenderCertificateCache {
        let encoded = self.issue(sender, expires_at_millis);
        SenderCertificateCache::validate(&self.trust_root(), &encoded, now_millis)
    }
}

/// A peer device with a published bundle.
pub struct Peer {
    /// Peer identity
    pub identity: IdentityKeyPair,
    /// Peer device address
    pub address: ProtocolAddress,
}

impl Peer {
    /// Peer device `name.device_id` with identity derived from `seed`.
    pub fn new(name: &str, device_id: u32, seed: u8) -> Self {
        Self {
            identity: IdentityKeyPair::from_seed([seed; 32]),
            address: ProtocolAddress::new(name, device_id),
        }
    }

    /// Bundle signed by this peer's identity, with signed prekey from
    /// `signed_seed`.
    #[allow(clippy::expect_used)]
    pub fn bundle(&self, signed_seed: u8) -> PreKeyBundle {
        let signed = KeyPair::from_seed([signed_seed; 32]);
        PreKeyBundle {
            device_id: self.address.device_id,
            pre_key: Some((1, *KeyPair::from_seed([signed_seed.wrapping_add(1); 32]).public_key())),
            signed_pre_key_id: u32::from(signed_seed),
            signed_pre_key_public: *signed.public_key(),
            signed_pre_key_signature: self
                .identity
                .sign(signed.public_key())
                .expect("signing with a valid key"),
            identity_key: self.identity.public_key(),
        }
    }
}

/// Registered individual recipient with sealed access via profile key.
pub fn contact(id: u64) -> RecipientSnapshot {
    let address = ProtocolAddress::primary(format!("contact-{id}"));
    RecipientSnapshot::individual(RecipientId(id), address)
        .with_registration(Registration::Registered)
        .with_access_mode(AccessMode::Enabled)
        .with_profile_key(ProfileKey::from_bytes([id as u8; 32]))
}

/// Push group with sender-key distribution `distribution`.
pub fn push_group(id: u64, distribution: u128) -> RecipientSnapshot {
    let address = ProtocolAddress::primary(format!("group-{id}"));
    RecipientSnapshot::group(RecipientId(id), address, DistributionId(distribution))
}

/// The local account as a recipient.
pub fn note_to_self(account: &AccountSnapshot) -> RecipientSnapshot {
    RecipientSnapshot::individual(RecipientId(0), account.local_address.clone())
        .with_registration(Registration::Registered)
        .local()
}

/// Registered single-device account.
pub fn account(name: &str) -> AccountSnapshot {
    AccountSnapshot {
        registered: true,
        multi_device: false,
        local_address: ProtocolAddress::primary(name),
    }
}
