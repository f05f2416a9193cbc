//! Key handoff between the three parties.
//!
//! The salt is known to the Client and the RPP; the payload key to the Client
//! and the TPS. Each function here takes only the secrets its caller is
//! allowed to hold, so a party cannot reach for the other pair's key by
//! accident.
//!
//! 1. Client: [`ClientKeys::generate`], send the public half in `AskSession`.
//! 2. RPP: [`issue_salt`], wrap it for the Client, return it in `SendSession`.
//! 3. Client: [`ClientKeys::open_salt`], then [`seal_submission`].
//! 4. TPS: [`open_submission`], compute, [`seal_results`].
//! 5. Client: [`open_results`].

use crate::crypto::{
    AesKey, CryptoError, Encryptor, PrivateKey, PublicKey, Salt, decode_field, encode_field,
};
use crate::payload::{self, PayloadError, VariantRecord};

/// Error in one step of the handoff.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("decrypted payload is malformed: {0}")]
    Payload(#[from] PayloadError),
}

/// The Client's RSA keypair for one session.
#[derive(Debug, Clone)]
pub struct ClientKeys {
    public: PublicKey,
    private: PrivateKey,
}

impl ClientKeys {
    pub fn generate(enc: &dyn Encryptor) -> Result<Self, CryptoError> {
        let (public, private) = enc.generate_rsa_keypair()?;
        Ok(Self { public, private })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Unwrap the salt the RPP sent in `SendSession`.
    pub fn open_salt(
        &self,
        enc: &dyn Encryptor,
        encrypted_hash_key: &str,
    ) -> Result<Salt, CryptoError> {
        let wrapped = decode_field(encrypted_hash_key)?;
        Salt::from_bytes(enc.decrypt_with_private_key(&self.private, &wrapped)?)
    }
}

/// RPP side: draw a salt and wrap it for the Client.
///
/// Returns the salt to keep and the base64 `encryptedHashKey` field.
pub fn issue_salt(
    enc: &dyn Encryptor,
    client_key: &PublicKey,
) -> Result<(Salt, String), CryptoError> {
    let salt = Salt::generate()?;
    let wrapped = enc.encrypt_with_public_key(client_key, salt.as_bytes())?;
    Ok((salt, encode_field(&wrapped)))
}

/// The three opaque fields of `SendClientData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSubmission {
    pub encrypted_aes_key: String,
    pub encrypted_client_data: String,
    pub encrypted_excluded_variants: String,
}

/// Client side: hash identifiers, encrypt under a fresh payload key, wrap the
/// key for the TPS.
///
/// The returned [`AesKey`] must stay with the Client to open the results.
pub fn seal_submission(
    enc: &dyn Encryptor,
    tps_key: &PublicKey,
    salt: &Salt,
    records: &[VariantRecord],
    excluded: &[String],
) -> Result<(AesKey, SealedSubmission), CryptoError> {
    let hashed: Vec<VariantRecord> = records
        .iter()
        .map(|r| VariantRecord::new(salt.hash(&r.variant), r.gene.clone(), r.dosages.clone()))
        .collect();
    let hashed_excluded: Vec<String> = excluded.iter().map(|v| salt.hash(v)).collect();

    let key = enc.generate_aes_key()?;
    let data = enc.encrypt_aes(&key, payload::encode_records(&hashed).as_bytes())?;
    let excluded_list = payload::encode_variant_list(&hashed_excluded);
    let excluded = enc.encrypt_aes(&key, excluded_list.as_bytes())?;
    let wrapped_key = enc.encrypt_with_public_key(tps_key, key.as_bytes())?;

    let sealed = SealedSubmission {
        encrypted_aes_key: encode_field(&wrapped_key),
        encrypted_client_data: encode_field(&data),
        encrypted_excluded_variants: encode_field(&excluded),
    };
    Ok((key, sealed))
}

/// What the TPS sees once it has opened a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedSubmission {
    pub records: Vec<VariantRecord>,
    pub excluded: Vec<String>,
}

/// TPS side: unwrap the payload key with the TPS private key, then the
/// payload with the payload key.
pub fn open_submission(
    enc: &dyn Encryptor,
    tps_private: &PrivateKey,
    sealed: &SealedSubmission,
) -> Result<(AesKey, OpenedSubmission), HandoffError> {
    let wrapped_key = decode_field(&sealed.encrypted_aes_key)?;
    let key = AesKey::from_bytes(enc.decrypt_with_private_key(tps_private, &wrapped_key)?)?;

    let data = open_text(enc, &key, &sealed.encrypted_client_data)?;
    let excluded = open_text(enc, &key, &sealed.encrypted_excluded_variants)?;

    let opened = OpenedSubmission {
        records: payload::decode_records(&data)?,
        excluded: payload::decode_variant_list(&excluded),
    };
    Ok((key, opened))
}

/// TPS side: encrypt the result text for the Client.
pub fn seal_results(
    enc: &dyn Encryptor,
    key: &AesKey,
    results: &str,
) -> Result<String, CryptoError> {
    Ok(encode_field(&enc.encrypt_aes(key, results.as_bytes())?))
}

/// Client side: decrypt the `encryptedResults` field.
pub fn open_results(
    enc: &dyn Encryptor,
    key: &AesKey,
    encrypted_results: &str,
) -> Result<String, CryptoError> {
    open_text(enc, key, encrypted_results)
}

fn open_text(enc: &dyn Encryptor, key: &AesKey, field: &str) -> Result<String, CryptoError> {
    let bytes = enc.decrypt_aes(key, &decode_field(field)?)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::NotText)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::OpensslEncryptor;

    fn enc() -> OpensslEncryptor {
        OpensslEncryptor::new(1024)
    }

    #[test]
    fn full_handoff() {
        let enc = enc();
        let client = ClientKeys::generate(&enc).unwrap();
        let (tps_public, tps_private) = enc.generate_rsa_keypair().unwrap();

        let (rpp_salt, encrypted_hash_key) = issue_salt(&enc, client.public_key()).unwrap();
        let client_salt = client.open_salt(&enc, &encrypted_hash_key).unwrap();
        assert_eq!(client_salt, rpp_salt);

        let records = vec![VariantRecord::new("1-100-A-T", "GENE1", vec![1, 0, 2])];
        let excluded = vec!["1-200-C-G".to_string()];
        let (client_key, sealed) =
            seal_submission(&enc, &tps_public, &client_salt, &records, &excluded).unwrap();
        assert!(!sealed.encrypted_client_data.contains("GENE1"));

        let (tps_key, opened) = open_submission(&enc, &tps_private, &sealed).unwrap();
        assert_eq!(opened.records[0].variant, rpp_salt.hash("1-100-A-T"));
        assert_eq!(opened.records[0].dosages, vec![1, 0, 2]);
        assert_eq!(opened.excluded, vec![rpp_salt.hash("1-200-C-G")]);

        let results = seal_results(&enc, &tps_key, "GENE1\t0.03").unwrap();
        assert_eq!(open_results(&enc, &client_key, &results).unwrap(), "GENE1\t0.03");
    }

    #[test]
    fn wrong_tps_key_cannot_open_submission() {
        let enc = enc();
        let (tps_public, _) = enc.generate_rsa_keypair().unwrap();
        let (_, impostor) = enc.generate_rsa_keypair().unwrap();
        let salt = Salt::generate().unwrap();
        let (_, sealed) = seal_submission(&enc, &tps_public, &salt, &[], &[]).unwrap();
        assert!(matches!(
            open_submission(&enc, &impostor, &sealed),
            Err(HandoffError::Crypto(_))
        ));
    }

    #[test]
    fn salt_wrapped_for_another_client_is_useless() {
        let enc = enc();
        let alice = ClientKeys::generate(&enc).unwrap();
        let mallory = ClientKeys::generate(&enc).unwrap();
        let (_, wrapped) = issue_salt(&enc, alice.public_key()).unwrap();
        assert!(mallory.open_salt(&enc, &wrapped).is_err());
    }

    #[test]
    fn results_under_another_key_fail() {
        let enc = enc();
        let key = enc.generate_aes_key().unwrap();
        let other = enc.generate_aes_key().unwrap();
        let sealed = seal_results(&enc, &key, "r").unwrap();
        assert!(open_results(&enc, &other, &sealed).is_err());
    }
}
