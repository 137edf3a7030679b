// tests/integration_test.rs

mod integration {
    pub mod replication_test;
    pub mod server_test;
    pub mod test_helpers;
}
