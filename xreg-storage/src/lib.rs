pub mod postgres;

pub use postgres::{storage_error_from_diesel, PostgresConfig, PostgresGateway};
