//! On-disk RS256 key material for the token signer.
//!
//! The grounding codebase generates keys at boot if none exist and loads them
//! from `config.jwt_private_key`/`jwt_public_key` otherwise; this module fills
//! in that behavior.

use crate::config::Config;
use pem::Pem;
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::path::Path;

const KEY_DIR: &str = "data/keys";
const PRIVATE_KEY_PATH: &str = "data/keys/jwt_private.pem";
const PUBLIC_KEY_PATH: &str = "data/keys/jwt_public.pem";

pub fn check_keys_exist() -> bool {
    Path::new(PRIVATE_KEY_PATH).exists() && Path::new(PUBLIC_KEY_PATH).exists()
}

pub fn generate_and_save_keys() -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(KEY_DIR)?;

    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 2048)?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_der = private_key.to_pkcs1_der()?;
    let public_der = public_key.to_pkcs1_der()?;

    let private_pem = pem::encode(&Pem::new("RSA PRIVATE KEY", private_der.as_bytes().to_vec()));
    let public_pem = pem::encode(&Pem::new("RSA PUBLIC KEY", public_der.as_bytes().to_vec()));

    fs::write(PRIVATE_KEY_PATH, private_pem)?;
    fs::write(PUBLIC_KEY_PATH, public_pem)?;

    Ok(())
}

pub fn load_keys(_config: &Config) -> Result<(String, String), Box<dyn std::error::Error>> {
    let priv_pem = fs::read_to_string(PRIVATE_KEY_PATH)?;
    let pub_pem = fs::read_to_string(PUBLIC_KEY_PATH)?;
    Ok((priv_pem, pub_pem))
}
