mod console;
mod keys;
mod transcript;

pub use console::{read_password, run, Console};
pub use keys::{binding, key_to_bytes, Binding};
