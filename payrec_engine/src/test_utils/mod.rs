//! Support utilities for integration tests: throwaway SQLite databases, created and migrated per test.
pub mod prepare_env;
