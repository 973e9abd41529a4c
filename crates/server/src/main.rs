//! Draft server binary.
//!
//! Listens on BIND_ADDR (e.g. 0.0.0.0:8888) and loads draftable content
//! from CONTENT_DIR.

#[tokio::main]
async fn main() {
    dd_core::log();
    dd_core::kys();
    dd_server::run().await.unwrap();
}
