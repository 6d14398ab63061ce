//! Key derivation tools

use eyre::{WrapErr, ensure};
use nexum_access::{
    Scheme,
    auth::{
        bac::MrzInfo,
        badge::DEFAULT_OBJECT_ID,
    },
    crypto::{CipherSuite, Key128},
    kdf::{DerivationInput, HashKdf, KdfStrategy, KeyDerivation},
};
use tracing::debug;

use super::CipherArg;

impl From<CipherArg> for CipherSuite {
    fn from(cipher: CipherArg) -> Self {
        match cipher {
            CipherArg::TripleDes => Self::TwoKeyTripleDes,
            CipherArg::Aes128 => Self::Aes128,
        }
    }
}

fn decode_hex(name: &str, value: &str) -> eyre::Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x")).wrap_err_with(|| format!("invalid {name}"))
}

/// Print the badge privacy and authentication keys
pub(crate) fn derive_keys_command(
    read_key: &str,
    object_id: Option<&str>,
    diversifier: &str,
    key_no: u8,
    cipher: CipherArg,
) -> eyre::Result<()> {
    let read_key = Key128::from_slice(&decode_hex("read key", read_key)?)?;
    let object_id = match object_id {
        Some(oid) => decode_hex("object identifier", oid)?,
        None => DEFAULT_OBJECT_ID.to_vec(),
    };
    let diversifier = decode_hex("diversifier", diversifier)?;
    ensure!(!diversifier.is_empty(), "diversifier must not be empty");

    let suite = CipherSuite::from(cipher);
    debug!(%suite, key_no, "Deriving badge keys");
    let (priv_key, auth_key) =
        KdfStrategy::for_static_keys(Scheme::Badge, suite).derive_pair(&DerivationInput {
            secret: read_key.as_bytes(),
            object_id: &object_id,
            diversifier: &diversifier,
            key_index: key_no,
        })?;

    println!("priv_key: {}", hex::encode_upper(priv_key.as_bytes()));
    println!("auth_key: {}", hex::encode_upper(auth_key.as_bytes()));
    Ok(())
}

/// Print the BAC key seed material, seed and document keys
pub(crate) fn mrz_seed_command(
    document_number: &str,
    date_of_birth: &str,
    date_of_expiry: &str,
) -> eyre::Result<()> {
    let mrz = MrzInfo::new(document_number, date_of_birth, date_of_expiry)?;
    let material = mrz.key_seed_material();
    let seed = HashKdf::sha1().seed(&DerivationInput::from_secret(material.as_bytes()));
    let (k_enc, k_mac) = mrz.document_keys()?;

    println!("MRZ information: {material}");
    println!("K_seed: {}", hex::encode_upper(seed));
    println!("K_enc:  {}", hex::encode_upper(k_enc.as_bytes()));
    println!("K_mac:  {}", hex::encode_upper(k_mac.as_bytes()));
    Ok(())
}
