pub mod address_validator;
pub mod amount;

pub use address_validator::AddressValidator;
pub use amount::{format_units, parse_units};
