//! Redb-backed durable key store.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Values
//! are CBOR-encoded records. A Redb write transaction doubles as the session
//! lock's transaction: while a thread owns it, that thread's operations run
//! inside it and are committed or rolled back together.

#![allow(clippy::disallowed_types, reason = "Guards the open write transaction")]

use std::{
    collections::BTreeSet,
    path::Path,
    sync::{Arc, Mutex},
    thread::ThreadId,
};

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use sealwire_crypto::IdentityKeyPair;
use serde::{Serialize, de::DeserializeOwned};

use super::{
    KeyMaterialStore, PreKeyMetadata, PreKeyRecord, SenderKeyRecord, SessionRecord,
    SignedPreKeyRecord, StoreError, TransactionHost,
};
use crate::address::{DistributionId, ProtocolAddress};

/// Table: identity
/// Key: "local"
/// Value: identity private key bytes [32 bytes]
const IDENTITY: TableDefinition<&str, &[u8]> = TableDefinition::new("identity");

/// Table: pre_keys
/// Key: 24-bit prekey id
/// Value: CBOR-encoded PreKeyRecord
const PRE_KEYS: TableDefinition<u32, &[u8]> = TableDefinition::new("pre_keys");

/// Table: signed_pre_keys
/// Key: 24-bit signed prekey id
/// Value: CBOR-encoded SignedPreKeyRecord
const SIGNED_PRE_KEYS: TableDefinition<u32, &[u8]> = TableDefinition::new("signed_pre_keys");

/// Table: metadata
/// Key: "pre_keys"
/// Value: CBOR-encoded PreKeyMetadata
const METADATA: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

/// Table: sessions
/// Key: encoded address (see `encode_address`)
/// Value: CBOR-encoded SessionRecord
const SESSIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sessions");

/// Table: sender_keys
/// Key: encoded address + distribution id as big-endian bytes [16 bytes]
/// Value: CBOR-encoded SenderKeyRecord
const SENDER_KEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sender_keys");

/// Table: shared
/// Key: distribution id
/// Value: CBOR-encoded set of addresses holding our sender key
const SHARED: TableDefinition<u128, &[u8]> = TableDefinition::new("shared");

const IDENTITY_KEY: &str = "local";
const PRE_KEY_METADATA_KEY: &str = "pre_keys";

/// Durable key store backed by Redb.
///
/// Clone is cheap (Arc). Operations outside an explicit transaction each run
/// in their own write transaction, so they serialize with any open
/// transaction on another thread.
#[derive(Clone)]
pub struct RedbKeyStore {
    inner: Arc<Inner>,
}

struct Inner {
    db: Database,
    owner: Mutex<Option<ThreadId>>,
    transaction: Mutex<Option<WriteTransaction>>,
}

fn io_error(err: impl ToString) -> StoreError {
    StoreError::Io(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(ciborium::de::from_reader(bytes)?)
}

/// Length-prefixed name followed by the device id, so that all devices of one
/// account sort together and no name is a prefix of another's key.
fn encode_address(address: &ProtocolAddress) -> Vec<u8> {
    let mut key = address_prefix(&address.name);
    key.extend_from_slice(&address.device_id.to_be_bytes());
    key
}

fn address_prefix(name: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(2 + name.len() + 4);
    prefix.extend_from_slice(&(name.len() as u16).to_be_bytes());
    prefix.extend_from_slice(name.as_bytes());
    prefix
}

fn decode_address(key: &[u8]) -> Result<ProtocolAddress, StoreError> {
    let corrupt = || StoreError::Serialization(format!("corrupt address key: {key:02x?}"));

    let (len, rest) = key.split_first_chunk::<2>().ok_or_else(corrupt)?;
    let len = u16::from_be_bytes(*len) as usize;
    if rest.len() < len + 4 {
        return Err(corrupt());
    }
    let name = std::str::from_utf8(&rest[..len]).map_err(|_| corrupt())?;
    let device: [u8; 4] = rest[len..len + 4].try_into().map_err(|_| corrupt())?;

    Ok(ProtocolAddress::new(name, u32::from_be_bytes(device)))
}

fn encode_sender_key(address: &ProtocolAddress, distribution_id: DistributionId) -> Vec<u8> {
    let mut key = encode_address(address);
    key.extend_from_slice(&distribution_id.0.to_be_bytes());
    key
}

impl RedbKeyStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(io_error)?;

        let txn = db.begin_write().map_err(io_error)?;
        {
            let _ = txn.open_table(IDENTITY).map_err(io_error)?;
            let _ = txn.open_table(PRE_KEYS).map_err(io_error)?;
            let _ = txn.open_table(SIGNED_PRE_KEYS).map_err(io_error)?;
            let _ = txn.open_table(METADATA).map_err(io_error)?;
            let _ = txn.open_table(SESSIONS).map_err(io_error)?;
            let _ = txn.open_table(SENDER_KEYS).map_err(io_error)?;
            let _ = txn.open_table(SHARED).map_err(io_error)?;
        }
        txn.commit().map_err(io_error)?;

        Ok(Self {
            inner: Arc::new(Inner { db, owner: Mutex::new(None), transaction: Mutex::new(None) }),
        })
    }

    /// Run `f` inside the calling thread's open transaction, or inside a
    /// fresh one that is committed (`commit`) or aborted afterwards.
    #[allow(clippy::expect_used)]
    fn run<R>(
        &self,
        commit: bool,
        f: impl FnOnce(&WriteTransaction) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        if self.in_transaction() {
            let slot = self.inner.transaction.lock().expect("Mutex poisoned");
            let txn = slot.as_ref().ok_or_else(|| {
                StoreError::Transaction("transaction owner without open transaction".into())
            })?;
            return f(txn);
        }

        let txn = self.inner.db.begin_write().map_err(io_error)?;
        let result = match f(&txn) {
            Ok(result) => result,
            Err(err) => {
                let _ = txn.abort();
                return Err(err);
            },
        };

        if commit {
            txn.commit().map_err(io_error)?;
        } else {
            txn.abort().map_err(io_error)?;
        }
        Ok(result)
    }

    fn read<R>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        self.run(false, f)
    }

    fn write(
        &self,
        f: impl FnOnce(&WriteTransaction) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.run(true, f)
    }
}

impl KeyMaterialStore for RedbKeyStore {
    fn load_identity_key_pair(&self) -> Result<Option<IdentityKeyPair>, StoreError> {
        self.read(|txn| {
            let table = txn.open_table(IDENTITY).map_err(io_error)?;
            let Some(bytes) = table.get(IDENTITY_KEY).map_err(io_error)? else {
                return Ok(None);
            };
            IdentityKeyPair::from_private_bytes(bytes.value())
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string()))
        })
    }

    fn store_identity_key_pair(&self, key_pair: &IdentityKeyPair) -> Result<(), StoreError> {
        let bytes = key_pair.private_bytes();
        self.write(|txn| {
            let mut table = txn.open_table(IDENTITY).map_err(io_error)?;
            table.insert(IDENTITY_KEY, bytes.as_slice()).map_err(io_error)?;
            Ok(())
        })
    }

    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>, StoreError> {
        self.read(|txn| {
            let table = txn.open_table(PRE_KEYS).map_err(io_error)?;
            table.get(id).map_err(io_error)?.map(|bytes| decode(bytes.value())).transpose()
        })
    }

    fn store_pre_key(&self, record: &PreKeyRecord) -> Result<(), StoreError> {
        let bytes = encode(record)?;
        self.write(|txn| {
            let mut table = txn.open_table(PRE_KEYS).map_err(io_error)?;
            table.insert(record.id, bytes.as_slice()).map_err(io_error)?;
            Ok(())
        })
    }

    fn remove_pre_key(&self, id: u32) -> Result<(), StoreError> {
        self.write(|txn| {
            let mut table = txn.open_table(PRE_KEYS).map_err(io_error)?;
            table.remove(id).map_err(io_error)?;
            Ok(())
        })
    }

    fn pre_key_count(&self) -> Result<usize, StoreError> {
        self.read(|txn| {
            let table = txn.open_table(PRE_KEYS).map_err(io_error)?;
            let mut count = 0;
            for entry in table.iter().map_err(io_error)? {
                entry.map_err(io_error)?;
                count += 1;
            }
            Ok(count)
        })
    }

    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>, StoreError> {
        self.read(|txn| {
            let table = txn.open_table(SIGNED_PRE_KEYS).map_err(io_error)?;
            table.get(id).map_err(io_error)?.map(|bytes| decode(bytes.value())).transpose()
        })
    }

    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>, StoreError> {
        self.read(|txn| {
            let table = txn.open_table(SIGNED_PRE_KEYS).map_err(io_error)?;
            let mut records = Vec::new();
            for entry in table.iter().map_err(io_error)? {
                let (_, bytes) = entry.map_err(io_error)?;
                records.push(decode(bytes.value())?);
            }
            Ok(records)
        })
    }

    fn store_signed_pre_key(&self, record: &SignedPreKeyRecord) -> Result<(), StoreError> {
        let bytes = encode(record)?;
        self.write(|txn| {
            let mut table = txn.open_table(SIGNED_PRE_KEYS).map_err(io_error)?;
            table.insert(record.id, bytes.as_slice()).map_err(io_error)?;
            Ok(())
        })
    }

    fn remove_signed_pre_key(&self, id: u32) -> Result<(), StoreError> {
        self.write(|txn| {
            let mut table = txn.open_table(SIGNED_PRE_KEYS).map_err(io_error)?;
            table.remove(id).map_err(io_error)?;
            Ok(())
        })
    }

    fn load_pre_key_metadata(&self) -> Result<PreKeyMetadata, StoreError> {
        self.read(|txn| {
            let table = txn.open_table(METADATA).map_err(io_error)?;
            match table.get(PRE_KEY_METADATA_KEY).map_err(io_error)? {
                Some(bytes) => decode(bytes.value()),
                None => Ok(PreKeyMetadata::default()),
            }
        })
    }

    fn store_pre_key_metadata(&self, metadata: &PreKeyMetadata) -> Result<(), StoreError> {
        let bytes = encode(metadata)?;
        self.write(|txn| {
            let mut table = txn.open_table(METADATA).map_err(io_error)?;
            table.insert(PRE_KEY_METADATA_KEY, bytes.as_slice()).map_err(io_error)?;
            Ok(())
        })
    }

    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>, StoreError> {
        let key = encode_address(address);
        self.read(|txn| {
            let table = txn.open_table(SESSIONS).map_err(io_error)?;
            table
                .get(key.as_slice())
                .map_err(io_error)?
                .map(|bytes| decode(bytes.value()))
                .transpose()
        })
    }

    fn store_session(
        &self,
        address: &ProtocolAddress,
        record: &SessionRecord,
    ) -> Result<(), StoreError> {
        let key = encode_address(address);
        let bytes = encode(record)?;
        self.write(|txn| {
            let mut table = txn.open_table(SESSIONS).map_err(io_error)?;
            table.insert(key.as_slice(), bytes.as_slice()).map_err(io_error)?;
            Ok(())
        })
    }

    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>, StoreError> {
        let prefix = address_prefix(name);
        let mut start = prefix.clone();
        start.extend_from_slice(&[0x00; 4]);
        let mut end = prefix;
        end.extend_from_slice(&[0xFF; 4]);

        self.read(|txn| {
            let table = txn.open_table(SESSIONS).map_err(io_error)?;
            let mut devices = Vec::new();
            for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io_error)? {
                let (key, _) = entry.map_err(io_error)?;
                devices.push(decode_address(key.value())?.device_id);
            }
            Ok(devices)
        })
    }

    fn session_addresses(&self) -> Result<Vec<ProtocolAddress>, StoreError> {
        self.read(|txn| {
            let table = txn.open_table(SESSIONS).map_err(io_error)?;
            let mut addresses = Vec::new();
            for entry in table.iter().map_err(io_error)? {
                let (key, _) = entry.map_err(io_error)?;
                addresses.push(decode_address(key.value())?);
            }
            Ok(addresses)
        })
    }

    fn load_sender_key(
        &self,
        address: &ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Result<Option<SenderKeyRecord>, StoreError> {
        let key = encode_sender_key(address, distribution_id);
        self.read(|txn| {
            let table = txn.open_table(SENDER_KEYS).map_err(io_error)?;
            table
                .get(key.as_slice())
                .map_err(io_error)?
                .map(|bytes| decode(bytes.value()))
                .transpose()
        })
    }

    fn store_sender_key(
        &self,
        address: &ProtocolAddress,
        distribution_id: DistributionId,
        record: &SenderKeyRecord,
    ) -> Result<(), StoreError> {
        let key = encode_sender_key(address, distribution_id);
        let bytes = encode(record)?;
        self.write(|txn| {
            let mut table = txn.open_table(SENDER_KEYS).map_err(io_error)?;
            table.insert(key.as_slice(), bytes.as_slice()).map_err(io_error)?;
            Ok(())
        })
    }

    fn delete_sender_key(
        &self,
        address: &ProtocolAddress,
        distribution_id: DistributionId,
    ) -> Result<(), StoreError> {
        let key = encode_sender_key(address, distribution_id);
        self.write(|txn| {
            let mut table = txn.open_table(SENDER_KEYS).map_err(io_error)?;
            table.remove(key.as_slice()).map_err(io_error)?;
            Ok(())
        })
    }

    fn delete_all_sender_keys(&self) -> Result<(), StoreError> {
        self.write(|txn| {
            let mut table = txn.open_table(SENDER_KEYS).map_err(io_error)?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(io_error)? {
                let (key, _) = entry.map_err(io_error)?;
                keys.push(key.value().to_vec());
            }
            for key in keys {
                table.remove(key.as_slice()).map_err(io_error)?;
            }
            Ok(())
        })
    }

    fn shared_with(
        &self,
        distribution_id: DistributionId,
    ) -> Result<BTreeSet<ProtocolAddress>, StoreError> {
        self.read(|txn| {
            let table = txn.open_table(SHARED).map_err(io_error)?;
            match table.get(distribution_id.0).map_err(io_error)? {
                Some(bytes) => decode(bytes.value()),
                None => Ok(BTreeSet::new()),
            }
        })
    }

    fn mark_shared(
        &self,
        distribution_id: DistributionId,
        addresses: &[ProtocolAddress],
    ) -> Result<(), StoreError> {
        self.write(|txn| {
            let mut table = txn.open_table(SHARED).map_err(io_error)?;
            let mut shared: BTreeSet<ProtocolAddress> =
                match table.get(distribution_id.0).map_err(io_error)? {
                    Some(bytes) => decode(bytes.value())?,
                    None => BTreeSet::new(),
                };
            shared.extend(addresses.iter().cloned());

            let bytes = encode(&shared)?;
            table.insert(distribution_id.0, bytes.as_slice()).map_err(io_error)?;
            Ok(())
        })
    }

    fn delete_shared(&self, distribution_id: DistributionId) -> Result<(), StoreError> {
        self.write(|txn| {
            let mut table = txn.open_table(SHARED).map_err(io_error)?;
            table.remove(distribution_id.0).map_err(io_error)?;
            Ok(())
        })
    }

    fn delete_all_shared(&self) -> Result<(), StoreError> {
        self.write(|txn| {
            let mut table = txn.open_table(SHARED).map_err(io_error)?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(io_error)? {
                let (key, _) = entry.map_err(io_error)?;
                keys.push(key.value());
            }
            for key in keys {
                table.remove(key).map_err(io_error)?;
            }
            Ok(())
        })
    }
}

impl TransactionHost for RedbKeyStore {
    #[allow(clippy::expect_used)]
    fn transaction_owner(&self) -> Option<ThreadId> {
        *self.inner.owner.lock().expect("Mutex poisoned")
    }

    #[allow(clippy::expect_used)]
    fn begin_transaction(&self) -> Result<(), StoreError> {
        if self.in_transaction() {
            return Err(StoreError::Transaction("transaction already open on this thread".into()));
        }

        // Blocks until any other thread's write transaction has ended.
        let txn = self.inner.db.begin_write().map_err(io_error)?;

        *self.inner.transaction.lock().expect("Mutex poisoned") = Some(txn);
        *self.inner.owner.lock().expect("Mutex poisoned") = Some(std::thread::current().id());
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn end_transaction(&self, successful: bool) -> Result<(), StoreError> {
        if !self.in_transaction() {
            return Err(StoreError::Transaction("no transaction open on this thread".into()));
        }

        let txn = self.inner.transaction.lock().expect("Mutex poisoned").take();
        *self.inner.owner.lock().expect("Mutex poisoned") = None;

        let txn = txn.ok_or_else(|| {
            StoreError::Transaction("transaction owner without open transaction".into())
        })?;
        if successful { txn.commit().map_err(io_error) } else { txn.abort().map_err(io_error) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_key_roundtrip() {
        let address = ProtocolAddress::new("alice", 7);
        assert_eq!(decode_address(&encode_address(&address)).unwrap(), address);
    }

    #[test]
    fn truncated_address_key_is_corrupt() {
        let key = encode_address(&ProtocolAddress::new("alice", 7));
        assert!(matches!(
            decode_address(&key[..key.len() - 1]),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn name_prefix_does_not_match_longer_name() {
        let ab = encode_address(&ProtocolAddress::new("ab", 1));
        let prefix = address_prefix("a");
        assert!(!ab.starts_with(&prefix));
    }
}
