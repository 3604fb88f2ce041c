pub mod email;
pub mod jwt_keys;
pub mod key_rotation;
