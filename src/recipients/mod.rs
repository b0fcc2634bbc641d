pub mod dedup;
pub mod parser;

pub use dedup::{address_key, dedupe_recipients, email_key};
pub use parser::{parse_recipients, RecipientField};
