use rand::RngCore;
use uuid::Uuid;

/// New random security stamp: 20 random bytes, upper-case hex
pub fn new_security_stamp() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}

/// New random concurrency stamp
pub fn new_concurrency_stamp() -> String {
    Uuid::new_v4().to_string()
}
