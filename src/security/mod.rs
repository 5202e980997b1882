pub mod validation;

pub use validation::{
    validate_connection_string, validate_data_type, validate_identifier, ValidationError,
};
