use rand::{distributions::Alphanumeric, Rng};

/// Random alphanumeric credential of `len` characters from the thread-local CSPRNG.
pub fn generate_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
